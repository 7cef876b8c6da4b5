pub mod cli;
pub mod collector;
pub mod engine;
pub mod fetch;
pub mod nodes;
pub mod records;
