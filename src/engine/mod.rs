pub mod items;
pub mod types;

pub use items::run_items;
pub use types::{FetchSettings, NodeContext, Record, RunSummary};
