use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::attachments::{attachment_keys, pdf_pages, pdf_text, read_attachment};
use super::{
    LlmCredentials, PromptSource, binary_property, build_prompt, extract_json_from_content,
    html_to_text, question, select_content, stop_phrases,
};
use crate::engine::items::run_items;
use crate::engine::types::{NodeContext, Record};
use crate::fetch::ApiRequest;
use crate::nodes::Node;
use crate::records::percent_encode;

/// Content sent in one Gemini call, with the attachment it came from.
struct GeminiContent {
    prompt: PromptSource,
    file_name: Option<String>,
    binary: Option<Value>,
}

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-preview-04-17";
const MAX_OUTPUT_TOKENS: u32 = 8000;

pub struct GeminiNode;

fn reply_content(response: &Value) -> Option<&str> {
    response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}

/// `models/<name>` for a bare model name.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// PDF and HTML attachments of an item. Unreadable ones are logged and
/// skipped.
fn attachment_contents(item: &Record, property: Option<&str>, index: usize) -> Vec<GeminiContent> {
    let mut contents = Vec::new();
    for key in attachment_keys(item, property, &["attachment_", "data"]) {
        let loaded = read_attachment(item, &key).and_then(|attachment| {
            let (source, text) = if attachment.is_pdf() {
                let text = pdf_text(&pdf_pages(&attachment.bytes)?);
                (format!("pdf - {}", attachment.file_name), text)
            } else if attachment.is_html() {
                let text = html_to_text(&String::from_utf8_lossy(&attachment.bytes));
                (format!(".html - {}", attachment.file_name), text)
            } else {
                return Ok(None);
            };
            Ok(Some(GeminiContent {
                prompt: PromptSource { text, source },
                file_name: Some(attachment.file_name),
                binary: Some(attachment.raw),
            }))
        });
        match loaded {
            Ok(Some(content)) => contents.push(content),
            Ok(None) => {}
            Err(e) => {
                warn!(item = index, file = %key, error = %format!("{:#}", e), "Attachment unreadable");
            }
        }
    }
    contents
}

#[async_trait]
impl Node for GeminiNode {
    fn node_type(&self) -> &str {
        "gemini"
    }

    fn description(&self) -> &str {
        "Ask Gemini to extract structured JSON from PDF or HTML attachments, mail text or HTML"
    }

    async fn execute(
        &self,
        config: &Value,
        items: Vec<Record>,
        ctx: &NodeContext,
    ) -> Result<Vec<Record>> {
        let credentials: LlmCredentials = ctx.credentials("gemini")?;
        let stop = stop_phrases(config);
        let property = binary_property(config);
        let model = model_path(
            config
                .get("model")
                .and_then(|v| v.as_str())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(DEFAULT_MODEL),
        );
        let url = format!(
            "{}/v1beta/{}:generateContent?key={}",
            credentials.base(),
            model,
            percent_encode(&credentials.api_key)
        );

        run_items("gemini", items, ctx.continue_on_fail, |index, item| {
            let (stop, url, model) = (&stop, &url, &model);
            async move {
                let question = question(config, &item);
                let mut contents = attachment_contents(&item, property, index);
                if contents.is_empty() {
                    contents.push(GeminiContent {
                        prompt: select_content(&item, stop),
                        file_name: None,
                        binary: None,
                    });
                }

                let mut records = Vec::with_capacity(contents.len());
                for content in contents {
                    let prompt = build_prompt(&question, &content.prompt);
                    let PromptSource { text, source } = content.prompt;
                    let file_name = content.file_name.unwrap_or_else(|| "N/A".to_string());
                    info!(item = index, model = %model, source = %source, "Calling Gemini");

                    let request = ApiRequest::post(
                        url.as_str(),
                        json!({
                            "contents": [{ "parts": [{ "text": prompt }] }],
                            "generationConfig": { "maxOutputTokens": MAX_OUTPUT_TOKENS },
                        }),
                    );
                    let response = ctx.transport.call(&request).await.with_context(|| {
                        format!("Gemini API call failed ({}, file: {})", source, file_name)
                    })?;
                    let reply = reply_content(&response).unwrap_or_default().to_string();

                    let mut record = Record::new();
                    record.insert("source".into(), json!(source));
                    record.insert("fileName".into(), json!(file_name));
                    record.insert("extractedText".into(), json!(text));

                    let parsed = match extract_json_from_content(&reply) {
                        Some(raw) => serde_json::from_str::<Value>(&raw)
                            .map_err(|e| format!("JSON mal formé dans la réponse de l'IA: {}", e)),
                        None => Err(format!("Pas de JSON détecté dans la réponse de {}", source)),
                    };
                    match parsed {
                        Ok(data) => {
                            record.insert("dataContent".into(), data);
                        }
                        Err(message) => {
                            warn!(item = index, error = %message, "Gemini reply without usable JSON");
                            record.insert("rawContent".into(), json!(reply));
                            record.insert("error_parsing_json".into(), json!(message));
                        }
                    }
                    if let Some(binary) = content.binary {
                        record.insert("binary".into(), json!({ "data": binary }));
                    }
                    records.push(record);
                }
                Ok(records)
            }
        })
        .await
    }
}
