use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::attachments::{
    FAILED_PAGE, PdfPage, attachment_keys, merge_page_replies, page_prompts, pdf_pages,
    read_attachment,
};
use super::{
    LlmCredentials, binary_property, build_prompt, extract_json_from_content, question,
    select_content, stop_phrases,
};
use crate::engine::items::run_items;
use crate::engine::types::{NodeContext, Record};
use crate::fetch::{ApiRequest, Transport, TransportError};
use crate::nodes::Node;

pub const MODEL: &str = "mistral-7b-instruct";
const MAX_TOKENS: u32 = 8000;
const NO_FILE: &str = "N/A";

pub struct MistralNode;

/// Reply text of a chat-completions response.
fn reply_content(response: &Value) -> Option<&str> {
    response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

struct Chat<'a> {
    transport: &'a dyn Transport,
    url: String,
    model: String,
    api_key: String,
}

impl Chat<'_> {
    /// Ask one prompt; an answer without content comes back empty.
    async fn complete(&self, prompt: &str) -> Result<String, TransportError> {
        let request = ApiRequest::post(
            self.url.as_str(),
            json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "messages": [{ "role": "user", "content": prompt }],
            }),
        )
        .header("Authorization", format!("Bearer {}", self.api_key));
        let response = self.transport.call(&request).await?;
        Ok(reply_content(&response).unwrap_or_default().to_string())
    }

    /// One call per page. Failed pages are kept as `ERROR:` entries so the
    /// rest of the document still gets through.
    async fn complete_pages(&self, question: &str, file_name: &str, pages: &[PdfPage]) -> Vec<String> {
        let mut replies = Vec::with_capacity(pages.len());
        for (prompt, page) in page_prompts(question, file_name, pages).iter().zip(pages) {
            info!(file = file_name, page = page.page_num, pages = pages.len(), "Sending PDF page to Mistral");
            let reply = match self.complete(prompt).await {
                Ok(reply) if !reply.is_empty() => reply,
                Ok(_) => {
                    warn!(file = file_name, page = page.page_num, "Mistral returned no content");
                    format!("{} No content for page {}", FAILED_PAGE, page.page_num)
                }
                Err(e) => {
                    warn!(file = file_name, page = page.page_num, error = %e, "Mistral page call failed");
                    format!("{} API call failed for page {}: {}", FAILED_PAGE, page.page_num, e)
                }
            };
            replies.push(reply);
        }
        replies
    }
}

/// Output record for one piece of content. Malformed JSON in the reply fails
/// the item.
fn mistral_record(
    source: &str,
    extracted_text: Value,
    file_name: &str,
    reply: &str,
    raw_response: Value,
) -> Result<Record> {
    let mut record = Record::new();
    record.insert("source".into(), json!(source));
    record.insert("extractedText".into(), extracted_text);
    record.insert("fileName".into(), json!(file_name));

    match extract_json_from_content(reply) {
        Some(raw) => {
            let data: Value = serde_json::from_str(&raw).map_err(|e| {
                anyhow!(
                    "Malformed JSON in Mistral response for {} (file: {}): {}",
                    source,
                    file_name,
                    e
                )
            })?;
            record.insert("data".into(), data);
            record.insert("rawMistralResponse".into(), raw_response);
        }
        None => {
            record.insert("rawContent".into(), json!(reply));
            record.insert(
                "error_parsing_json".into(),
                json!(format!(
                    "Pas de JSON détecté dans la réponse de {} (fichier: {})",
                    source, file_name
                )),
            );
        }
    }
    Ok(record)
}

#[async_trait]
impl Node for MistralNode {
    fn node_type(&self) -> &str {
        "mistral"
    }

    fn description(&self) -> &str {
        "Ask Mistral to extract structured JSON from PDF attachments, mail text or HTML"
    }

    async fn execute(
        &self,
        config: &Value,
        items: Vec<Record>,
        ctx: &NodeContext,
    ) -> Result<Vec<Record>> {
        let credentials: LlmCredentials = ctx.credentials("mistral")?;
        let stop = stop_phrases(config);
        let property = binary_property(config);
        let chat = Chat {
            transport: ctx.transport.as_ref(),
            url: format!("{}/v1/chat/completions", credentials.base()),
            model: config
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or(MODEL)
                .to_string(),
            api_key: credentials.api_key.clone(),
        };

        run_items("mistral", items, ctx.continue_on_fail, |index, item| {
            let (stop, chat) = (&stop, &chat);
            async move {
                let question = question(config, &item);
                let mut records = Vec::new();

                let mut pdfs = Vec::new();
                for key in attachment_keys(&item, property, &["attachment_"]) {
                    let loaded = read_attachment(&item, &key).and_then(|attachment| {
                        if !attachment.is_pdf() {
                            return Ok(None);
                        }
                        let pages = pdf_pages(&attachment.bytes)?;
                        Ok(Some((attachment.file_name, pages)))
                    });
                    match loaded {
                        Ok(Some(pdf)) => pdfs.push(pdf),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(item = index, file = %key, error = %format!("{:#}", e), "PDF attachment unreadable");
                            let mut failed = Record::new();
                            failed.insert(
                                "error".into(),
                                json!(format!("Échec du traitement du PDF '{}': {:#}", key, e)),
                            );
                            failed.insert("file".into(), json!(key));
                            records.push(failed);
                        }
                    }
                }

                if pdfs.is_empty() {
                    let content = select_content(&item, stop);
                    let prompt = build_prompt(&question, &content);
                    info!(item = index, source = %content.source, chars = prompt.len(), "Calling Mistral");
                    let reply = chat.complete(&prompt).await.with_context(|| {
                        format!("Mistral API call failed ({}, file: {})", content.source, NO_FILE)
                    })?;
                    records.push(mistral_record(
                        &content.source,
                        json!(content.text),
                        NO_FILE,
                        &reply,
                        json!(reply),
                    )?);
                }

                for (file_name, pages) in pdfs {
                    let replies = chat.complete_pages(&question, &file_name, &pages).await;
                    let merged = merge_page_replies(&replies);
                    records.push(mistral_record(
                        &format!("pdf - {}", file_name),
                        json!(serde_json::to_string(&pages)?),
                        &file_name,
                        &merged,
                        json!(replies),
                    )?);
                }
                Ok(records)
            }
        })
        .await
    }
}
