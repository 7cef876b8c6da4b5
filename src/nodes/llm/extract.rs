use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"```json\s*([\s\S]*?)```").ok());
static DOUBLE_QUOTED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""\{\s*([\s\S]*?)\}""#).ok());
static SINGLE_QUOTED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"'\{\s*([\s\S]*?)\}'").ok());

/// Locate a JSON document in a model reply.
///
/// Tries, in order: a ```` ```json ```` fence, a `"{...}"` or `'{...}'`
/// quoted object (inner text), the whole reply, then the span from the
/// first `{` to the last `}`. The returned text is not guaranteed to parse
/// for the first two forms.
pub fn extract_json_from_content(text: &str) -> Option<String> {
    for pattern in [&*FENCED, &*DOUBLE_QUOTED, &*SINGLE_QUOTED].into_iter().flatten() {
        if let Some(inner) = pattern.captures(text).and_then(|c| c.get(1)) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
    }

    if let Ok(parsed) = serde_json::from_str::<Value>(text) {
        return serde_json::to_string_pretty(&parsed).ok();
    }

    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last <= first {
        return None;
    }
    let span = &text[first..=last];
    serde_json::from_str::<Value>(span)
        .ok()
        .map(|_| span.trim().to_string())
}
