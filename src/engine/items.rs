use std::future::Future;

use anyhow::Result;
use serde_json::json;
use tracing::{error, warn};

use super::types::Record;

/// Process input items one after another.
///
/// A failing item either becomes an `{ error, operation }` record (when
/// `continue_on_fail` is set) or aborts the batch with the item index and
/// operation attached.
pub async fn run_items<F, Fut>(
    operation: &str,
    items: Vec<Record>,
    continue_on_fail: bool,
    mut process: F,
) -> Result<Vec<Record>>
where
    F: FnMut(usize, Record) -> Fut,
    Fut: Future<Output = Result<Vec<Record>>>,
{
    // The host always supplies at least one item; a bare invocation runs once.
    let items = if items.is_empty() {
        vec![Record::new()]
    } else {
        items
    };

    let mut output = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match process(index, item).await {
            Ok(records) => output.extend(records),
            Err(e) if continue_on_fail => {
                warn!(operation, item = index, error = %format!("{:#}", e), "Item failed, continuing");
                let mut record = Record::new();
                record.insert("success".to_string(), json!(false));
                record.insert("error".to_string(), json!(format!("{:#}", e)));
                record.insert("operation".to_string(), json!(operation));
                output.push(record);
            }
            Err(e) => {
                error!(operation, item = index, error = %format!("{:#}", e), "Item failed");
                return Err(e.context(format!("{} failed on item {}", operation, index)));
            }
        }
    }
    Ok(output)
}
