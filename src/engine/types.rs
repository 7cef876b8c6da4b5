use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::fetch::Transport;
use crate::fetch::cache::DEFAULT_TTL;
use crate::fetch::limiter::DEFAULT_CONCURRENCY;

/// One item flowing through the host pipeline: a flat JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Tunables for the fetch engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    /// Ceiling for simultaneously in-flight calls (clamped to 1..=20).
    pub concurrency: usize,
    /// Base delay used to compute the single retry backoff.
    pub retry_base_delay: Duration,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_base_delay: Duration::from_millis(100),
            cache_ttl: DEFAULT_TTL,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything the host hands to a node for one execution.
#[derive(Clone)]
pub struct NodeContext {
    /// Credential blocks keyed by name (`glpi`, `dolibarr`, ...).
    pub credentials: HashMap<String, serde_json::Value>,
    pub transport: Arc<dyn Transport>,
    pub settings: FetchSettings,
    /// Record per-item failures in the output instead of aborting the batch.
    pub continue_on_fail: bool,
}

impl NodeContext {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials: HashMap::new(),
            transport,
            settings: FetchSettings::default(),
            continue_on_fail: false,
        }
    }

    pub fn with_credentials(mut self, name: &str, value: serde_json::Value) -> Self {
        self.credentials.insert(name.to_string(), value);
        self
    }

    pub fn with_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn continue_on_fail(mut self, enabled: bool) -> Self {
        self.continue_on_fail = enabled;
        self
    }

    /// Deserialize the credential block `name` into `T`.
    pub fn credentials<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let raw = self
            .credentials
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("No '{}' credentials configured", name))?;
        serde_json::from_value(raw.clone())
            .with_context(|| format!("Invalid '{}' credentials", name))
    }
}

/// Summary of one node execution, printed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub node_type: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub input_items: usize,
    pub output_records: usize,
}
