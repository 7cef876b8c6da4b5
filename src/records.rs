//! Shaping of output records: pruning, field allowlists, sorting, and the
//! config parsing helpers shared by the connector nodes.

use std::cmp::Ordering;

use serde_json::Value;

use crate::engine::types::Record;

/// Recursively drop nulls, blank strings, and arrays/objects that end up
/// empty. Returns `None` when nothing is left.
pub fn prune_empty(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Array(items) => {
            let kept: Vec<Value> = items.into_iter().filter_map(prune_empty).collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Array(kept))
            }
        }
        Value::Object(map) => {
            let kept: Record = map
                .into_iter()
                .filter_map(|(k, v)| prune_empty(v).map(|v| (k, v)))
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Object(kept))
            }
        }
        other => Some(other),
    }
}

/// Keep only `fields` (in the order given). An empty list keeps everything.
pub fn keep_fields(record: Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return record;
    }
    let mut record = record;
    let mut kept = Record::new();
    for field in fields {
        if let Some(value) = record.remove(field) {
            kept.insert(field.clone(), value);
        }
    }
    kept
}

/// Output records of a listing: prune every row, drop rows that are not
/// objects (or end up empty), sort, then apply the allowlist.
pub fn finalize(rows: Vec<Value>, fields: &[String], sort: Option<&SortRule>) -> Vec<Record> {
    let mut records: Vec<Record> = rows
        .into_iter()
        .filter_map(|v| match prune_empty(v) {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect();
    if let Some(rule) = sort {
        sort_records(&mut records, rule);
    }
    records
        .into_iter()
        .map(|r| keep_fields(r, fields))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRule {
    pub field: String,
    pub direction: SortDirection,
}

impl SortRule {
    /// Read `{"sort": {"field": "...", "direction": "asc"|"desc"}}`.
    pub fn from_config(config: &Value) -> Option<Self> {
        let sort = config.get("sort")?;
        let field = sort.get("field").and_then(|v| v.as_str())?.trim();
        if field.is_empty() {
            return None;
        }
        let direction = match sort.get("direction").and_then(|v| v.as_str()) {
            Some(d) if d.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        Some(Self {
            field: field.to_string(),
            direction,
        })
    }
}

/// Stable sort by one field. Numbers compare numerically when both sides are
/// numeric, everything else case-insensitively as text. Records missing the
/// field (or holding null) go last in either direction.
pub fn sort_records(records: &mut [Record], rule: &SortRule) {
    records.sort_by(|a, b| {
        let a = a.get(&rule.field).filter(|v| !v.is_null());
        let b = b.get(&rule.field).filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ord = compare_values(a, b);
                match rule.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        }
    });
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    scalar_text(a)
        .to_lowercase()
        .cmp(&scalar_text(b).to_lowercase())
}

/// Text rendering of a scalar: strings as-is, other values as JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Like [`scalar_text`] but only for strings, numbers and booleans.
pub fn safe_text(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        _ => String::new(),
    }
}

/// Numeric id carried by a value (number or numeric string).
pub fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse the `fields` allowlist: `["a", "b"]` or `[{"field": "a"}]`.
pub fn field_list(config: &Value) -> Vec<String> {
    config
        .get("fields")
        .and_then(|v| v.as_array())
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.as_str().or_else(|| f.get("field").and_then(|v| v.as_str())))
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse `filters: [{"field": ..., "value": ...}]`, dropping blank entries.
pub fn filter_pairs(config: &Value) -> Vec<(String, String)> {
    let Some(filters) = config.get("filters").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    filters
        .iter()
        .filter_map(|f| {
            let field = f.get("field").and_then(|v| v.as_str())?.trim();
            let value = f.get("value").map(scalar_text)?;
            let value = value.trim();
            if field.is_empty() || value.is_empty() {
                return None;
            }
            Some((field.to_string(), value.to_string()))
        })
        .collect()
}

/// `limit` from config, or `None` when `return_all` is set.
pub fn requested_limit(config: &Value, default: usize) -> Option<usize> {
    if config
        .get("return_all")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return None;
    }
    Some(
        config
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l.max(1) as usize)
            .unwrap_or(default),
    )
}

/// Percent-encode a query component (unreserved characters pass through).
pub fn percent_encode(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
