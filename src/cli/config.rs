use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::engine::types::FetchSettings;

pub const DEFAULT_CONFIG_FILE: &str = "ironlink.yaml";

/// Configuration loaded from `ironlink.yaml`.
/// Every field is optional; missing values fall back to the environment or
/// built-in defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct IronLinkConfig {
    pub fetch: FetchConfig,
    pub continue_on_fail: Option<bool>,
    /// Credential blocks keyed by connector (`glpi`, `dolibarr`, `mistral`, `gemini`).
    pub credentials: HashMap<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: Option<usize>,
    pub retry_base_delay_ms: Option<u64>,
    pub cache_ttl_ms: Option<u64>,
    pub http_timeout_s: Option<u64>,
}

/// Environment variables consulted when a credential field is absent from
/// the file: `(block, field, variable)`.
const ENV_CREDENTIALS: &[(&str, &str, &str)] = &[
    ("glpi", "base_url", "GLPI_BASE_URL"),
    ("glpi", "app_token", "GLPI_APP_TOKEN"),
    ("glpi", "user_token", "GLPI_USER_TOKEN"),
    ("dolibarr", "base_url", "DOLIBARR_BASE_URL"),
    ("dolibarr", "api_key", "DOLIBARR_API_KEY"),
    ("mistral", "base_url", "MISTRAL_BASE_URL"),
    ("mistral", "api_key", "MISTRAL_API_KEY"),
    ("gemini", "base_url", "GEMINI_BASE_URL"),
    ("gemini", "api_key", "GEMINI_API_KEY"),
];

impl IronLinkConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `ironlink.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(contents)?)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            concurrency: self.fetch.concurrency.unwrap_or(defaults.concurrency),
            retry_base_delay: self
                .fetch
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            cache_ttl: self
                .fetch
                .cache_ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_ttl),
            http_timeout: self
                .fetch
                .http_timeout_s
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }

    /// Credential blocks with absent fields filled from `lookup`
    /// (normally the process environment).
    pub fn resolved_credentials<F>(&self, lookup: F) -> HashMap<String, Value>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut blocks = self.credentials.clone();
        for (block, field, var) in ENV_CREDENTIALS {
            let present = blocks
                .get(*block)
                .and_then(|b| b.get(*field))
                .is_some_and(|v| !v.is_null());
            if present {
                continue;
            }
            let Some(value) = lookup(var).filter(|v| !v.is_empty()) else {
                continue;
            };
            let entry = blocks.entry(block.to_string()).or_insert_with(|| json!({}));
            if let Value::Object(map) = entry {
                map.insert(field.to_string(), Value::String(value));
            }
        }
        blocks
    }
}
