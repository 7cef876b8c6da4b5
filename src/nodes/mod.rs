pub mod dolibarr;
pub mod error;
pub mod glpi;
pub mod llm;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{NodeContext, Record};

pub use error::NodeError;

/// Trait that all nodes must implement.
#[async_trait]
pub trait Node: Send + Sync {
    /// Node type identifier (e.g., "glpi", "dolibarr").
    fn node_type(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Run the node over the incoming items and return the output records.
    async fn execute(
        &self,
        config: &serde_json::Value,
        items: Vec<Record>,
        ctx: &NodeContext,
    ) -> Result<Vec<Record>>;
}

/// Registry of available node types.
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Create a registry with all built-in nodes registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(glpi::GlpiNode));
        registry.register(Arc::new(dolibarr::DolibarrNode));
        registry.register(Arc::new(llm::mistral::MistralNode));
        registry.register(Arc::new(llm::gemini::GeminiNode));
        registry
    }

    /// Register a node implementation.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.node_type().to_string(), node);
    }

    /// Look up a node by type name.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(node_type).cloned()
    }

    /// List all registered node types with descriptions.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .nodes
            .values()
            .map(|n| (n.node_type(), n.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}
