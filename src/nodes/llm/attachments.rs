//! Binary attachments carried on items, and PDF text split by page.
//!
//! Items carry files under `binary.<key>` as `{data, mimeType, fileName}`
//! with `data` base64-encoded.

use std::sync::LazyLock;

use anyhow::{Context as _, Result, anyhow};
use base64::Engine;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::engine::types::Record;

/// Lines of the previous page repeated ahead of the next one.
pub const OVERLAP_LINES: usize = 5;

/// Marks a page whose call produced no usable reply.
pub const FAILED_PAGE: &str = "ERROR:";

static SUPPLIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"nom_fourn\s*:\s*([^;]+);").ok());
static REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"réf\s*:\s*([^;]+);").ok());

#[derive(Debug, Clone)]
pub struct Attachment {
    pub key: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// The `binary.<key>` entry as received.
    pub raw: Value,
}

impl Attachment {
    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf" || self.key.ends_with(".pdf")
    }

    pub fn is_html(&self) -> bool {
        self.mime_type == "text/plain" || self.key.ends_with(".html")
    }
}

/// Keys to read: the configured property alone, else every binary key
/// starting with one of `prefixes`, in item order.
pub fn attachment_keys(item: &Record, property: Option<&str>, prefixes: &[&str]) -> Vec<String> {
    if let Some(property) = property.map(str::trim).filter(|p| !p.is_empty()) {
        return vec![property.to_string()];
    }
    item.get("binary")
        .and_then(|b| b.as_object())
        .map(|binary| {
            binary
                .keys()
                .filter(|k| prefixes.iter().any(|p| k.starts_with(p)))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

pub fn read_attachment(item: &Record, key: &str) -> Result<Attachment> {
    let raw = item
        .get("binary")
        .and_then(|b| b.get(key))
        .ok_or_else(|| anyhow!("No binary property '{}' on item", key))?;
    let data = raw
        .get("data")
        .and_then(|d| d.as_str())
        .ok_or_else(|| anyhow!("Binary property '{}' has no data", key))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .with_context(|| format!("Binary property '{}' is not valid base64", key))?;

    let text = |field: &str| raw.get(field).and_then(|v| v.as_str()).unwrap_or_default();
    let file_name = match text("fileName") {
        "" => key.to_string(),
        name => name.to_string(),
    };
    Ok(Attachment {
        key: key.to_string(),
        file_name,
        mime_type: text("mimeType").to_string(),
        bytes,
        raw: raw.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfPage {
    pub page_num: u32,
    pub text: String,
}

/// Text of every page, in page order, without blank lines.
pub fn pdf_pages(bytes: &[u8]) -> Result<Vec<PdfPage>> {
    let doc = lopdf::Document::load_mem(bytes).context("Failed to load PDF")?;
    doc.get_pages()
        .keys()
        .map(|&page_num| {
            let text = doc
                .extract_text(&[page_num])
                .with_context(|| format!("Failed to extract text from page {}", page_num))?;
            Ok(PdfPage {
                page_num,
                text: text
                    .lines()
                    .map(str::trim_end)
                    .filter(|line| !line.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
        })
        .collect()
}

/// Whole-document text.
pub fn pdf_text(pages: &[PdfPage]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// One prompt per page. Every page after the first is preceded by the last
/// [`OVERLAP_LINES`] lines of the page before it.
pub fn page_prompts(question: &str, file_name: &str, pages: &[PdfPage]) -> Vec<String> {
    let total = pages.len();
    pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let text = match index.checked_sub(1).and_then(|i| pages.get(i)) {
                Some(previous) => {
                    let lines: Vec<&str> = previous.text.split('\n').collect();
                    let overlap = lines[lines.len().saturating_sub(OVERLAP_LINES)..].join("\n");
                    format!("{}\n\n{}", overlap, page.text)
                }
                None => page.text.clone(),
            };
            format!(
                "{}\n\nContenu PDF extrait (Page {}/{} du fichier {}):\n{}",
                question, page.page_num, total, file_name, text
            )
        })
        .collect()
}

/// Join the page replies into one answer. The supplier name and reference
/// found in the first page's reply are stated once at the top; failed pages
/// are left out.
pub fn merge_page_replies(replies: &[String]) -> String {
    let mut merged = String::new();
    if let Some(first) = replies.first().filter(|r| !r.starts_with(FAILED_PAGE)) {
        for (label, pattern) in [("nom_fourn", &*SUPPLIER), ("réf", &*REFERENCE)] {
            let found = pattern
                .as_ref()
                .and_then(|re| re.captures(first))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string());
            if let Some(value) = found {
                merged.push_str(&format!("{}:{};\n", label, value));
            }
        }
    }
    let answered: Vec<&str> = replies
        .iter()
        .filter(|r| !r.starts_with(FAILED_PAGE))
        .map(String::as_str)
        .collect();
    merged.push_str(&answered.join("\n"));
    merged
}
