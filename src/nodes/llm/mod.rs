//! Document-to-JSON extraction through hosted LLMs.
//!
//! Both providers share the same per-item pipeline: collect the content to
//! send (PDF attachments first, then the item's own text or HTML), build a
//! prompt around the configured question, call the model and pull a JSON
//! object out of the reply.

pub mod attachments;
pub mod extract;
pub mod gemini;
pub mod mistral;

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::engine::types::Record;
use crate::records::scalar_text;

pub use extract::extract_json_from_content;

/// Credential block shared by both providers.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmCredentials {
    pub base_url: String,
    pub api_key: String,
}

impl LlmCredentials {
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Content chosen for one item and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSource {
    pub text: String,
    pub source: String,
}

static INLINE_LINK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<https?://.+?>").ok());
static IMAGE_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[image:.*?\][\s]*").ok());

const INVISIBLE: &[char] = &[
    '\u{200B}', '\u{FEFF}', '\u{00A0}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}',
    '\u{061C}', '\u{180E}',
];

fn is_invisible(c: char) -> bool {
    INVISIBLE.contains(&c)
        || ('\u{2060}'..='\u{206F}').contains(&c)
        || ('\u{FFF9}'..='\u{FFFB}').contains(&c)
        || ('\u{FE00}'..='\u{FE0F}').contains(&c)
}

/// Strip inline `<http...>` links, `[image: ...]` placeholders and
/// zero-width characters from a mail body.
pub fn clean_mail_text(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in [&*INLINE_LINK, &*IMAGE_TAG].into_iter().flatten() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out.chars().filter(|c| !is_invisible(*c)).collect()
}

/// Plain text of an HTML document, blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    html2md::parse_html(html)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut `text` at the earliest occurrence of any stop phrase.
pub fn truncate_at_stop(text: &str, phrases: &[String]) -> String {
    let cut = phrases
        .iter()
        .filter(|p| !p.is_empty())
        .filter_map(|p| text.find(p.as_str()))
        .min();
    match cut {
        Some(index) => text[..index].trim().to_string(),
        None => text.to_string(),
    }
}

/// `stop_phrases` as `["..."]` or `[{"text": "..."}]`.
pub fn stop_phrases(config: &Value) -> Vec<String> {
    config
        .get("stop_phrases")
        .and_then(|v| v.as_array())
        .map(|phrases| {
            phrases
                .iter()
                .filter_map(|p| p.as_str().or_else(|| p.get("text").and_then(|t| t.as_str())))
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text_field(item: &Record, key: &str) -> Option<String> {
    item.get(key)
        .map(scalar_text)
        .filter(|s| !s.trim().is_empty())
}

/// Fallback content of an item without usable attachments: text (with HTML
/// alongside it cleaned as a mail body), HTML converted to text, plain text,
/// or nothing.
pub fn select_content(item: &Record, stop: &[String]) -> PromptSource {
    let text = text_field(item, "text");
    let html = ["htmlContent", "HTML", "textAsHtml", "html"]
        .iter()
        .find_map(|k| text_field(item, k));

    if let (Some(text), Some(_)) = (&text, text_field(item, "html")) {
        return PromptSource {
            text: truncate_at_stop(&clean_mail_text(text), stop),
            source: "item_json_text_processed".into(),
        };
    }
    if let Some(html) = html {
        let converted = html_to_text(&html);
        if !converted.is_empty() {
            return PromptSource {
                text: converted,
                source: "html-only".into(),
            };
        }
    }
    if let Some(text) = text {
        return PromptSource {
            text: truncate_at_stop(&text, stop),
            source: "raw_text".into(),
        };
    }
    PromptSource {
        text: String::new(),
        source: "question_only".into(),
    }
}

pub fn build_prompt(question: &str, content: &PromptSource) -> String {
    if content.text.is_empty() {
        question.to_string()
    } else {
        format!(
            "{}\n\nContenu extrait (Source: {}):\n{}",
            question, content.source, content.text
        )
    }
}

/// `binaryPropertyName`: a single attachment to read instead of the
/// provider's default attachment keys.
pub fn binary_property(config: &Value) -> Option<&str> {
    config
        .get("binaryPropertyName")
        .and_then(|v| v.as_str())
        .filter(|p| !p.trim().is_empty())
}

/// The question, from the node config or else the item.
pub fn question(config: &Value, item: &Record) -> String {
    config
        .get("question")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| text_field(item, "question"))
        .unwrap_or_default()
}
