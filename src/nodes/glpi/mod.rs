//! GLPI asset-management connector.
//!
//! One execution opens an API session, lists or fetches assets, enriches
//! each with its linked records (model, location, components, financial
//! info, plugin fields) and always closes the session again.

pub mod enrich;
pub mod filters;
pub mod fold;
pub mod relations;
pub mod session;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::collector::{CollectOptions, batch_size, collect_by_ids, collect_pages, identity_key};
use crate::engine::items::run_items;
use crate::engine::types::{NodeContext, Record};
use crate::fetch::Fetcher;
use crate::nodes::Node;
use crate::records::{SortRule, as_id, field_list, filter_pairs, finalize, requested_limit};

use enrich::Enricher;
use filters::{AssetFilter, candidate_ids};
use session::{GlpiCredentials, GlpiSession};

const DEFAULT_RESOURCE: &str = "Computer";
const DEFAULT_LIMIT: usize = 50;
const LIST_PAGE_SIZE: usize = 50;

pub struct GlpiNode;

/// Parsed node configuration.
#[derive(Debug, Clone)]
pub struct AssetQuery {
    pub resource: String,
    pub fields: Vec<String>,
    pub id: Option<i64>,
    pub filters: Vec<AssetFilter>,
    pub limit: Option<usize>,
    pub sort: Option<SortRule>,
}

impl AssetQuery {
    pub fn from_config(config: &Value) -> Result<Self> {
        let resource = config
            .get("resource")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_RESOURCE)
            .to_string();

        Ok(Self {
            resource,
            fields: field_list(config),
            id: config.get("id").and_then(as_id),
            filters: AssetFilter::parse_all(&filter_pairs(config))?,
            limit: requested_limit(config, DEFAULT_LIMIT),
            sort: SortRule::from_config(config),
        })
    }

    pub async fn run(&self, fetcher: &Fetcher, api_url: &str) -> Result<Vec<Record>> {
        let enricher = Enricher::new(fetcher, api_url, &self.resource);
        let batch = batch_size(fetcher.limiter().ceiling());

        let enriched: Vec<Value> = if let Some(id) = self.id {
            let detail = self.detail(fetcher, api_url, id).await;
            let asset = detail.ok_or_else(|| anyhow!("No data found for ID {}", id))?;
            vec![fold::fold(&asset, &enricher.resolve(&asset).await)]
        } else {
            let ids = if self.filters.is_empty() {
                self.list_ids(fetcher, api_url).await
            } else {
                candidate_ids(fetcher, api_url, &self.resource, &self.filters)
                    .await
                    .into_iter()
                    .collect()
            };
            info!(resource = %self.resource, assets = ids.len(), "Enriching assets");
            collect_by_ids(ids, self.limit, batch, |id| {
                let enricher = &enricher;
                async move {
                    let asset = self.detail(fetcher, api_url, id).await?;
                    Some(fold::fold(&asset, &enricher.resolve(&asset).await))
                }
            })
            .await
        };

        Ok(finalize(enriched, &self.fields, self.sort.as_ref()))
    }

    /// Asset record by id; `None` when the fetch failed or returned no object.
    async fn detail(&self, fetcher: &Fetcher, api_url: &str, id: i64) -> Option<Value> {
        let url = format!("{}/{}/{}", api_url, self.resource, id);
        let fetched = fetcher.get(&url, "AssetDetail").await;
        if let Some(e) = fetched.error() {
            warn!(id, error = %e, "Asset detail unavailable");
            return None;
        }
        let asset = fetched.into_value();
        asset.is_object().then_some(asset)
    }

    /// Page through the asset list and return the ids, in listing order.
    async fn list_ids(&self, fetcher: &Fetcher, api_url: &str) -> Vec<i64> {
        let options = CollectOptions::new(LIST_PAGE_SIZE, self.limit);
        let listed = collect_pages(&options, |page| {
            let url = format!(
                "{}/{}?expand_dropdowns=true&range={}-{}",
                api_url,
                self.resource,
                page.offset,
                page.last_row()
            );
            async move { fetcher.get(&url, "AssetList").await.items().to_vec() }
        })
        .await;
        listed
            .iter()
            .filter_map(|asset| identity_key(asset).and_then(|k| k.parse().ok()))
            .collect()
    }
}

#[async_trait]
impl Node for GlpiNode {
    fn node_type(&self) -> &str {
        "glpi"
    }

    fn description(&self) -> &str {
        "List GLPI assets enriched with components, location and plugin fields"
    }

    async fn execute(
        &self,
        config: &Value,
        _items: Vec<Record>,
        ctx: &NodeContext,
    ) -> Result<Vec<Record>> {
        let credentials: GlpiCredentials = ctx.credentials("glpi")?;
        let query = AssetQuery::from_config(config)?;

        let mut settings = ctx.settings.clone();
        if let Some(concurrency) = config.get("concurrency").and_then(|v| v.as_u64()) {
            settings.concurrency = concurrency as usize;
        }

        let session = GlpiSession::open(ctx.transport.as_ref(), &credentials).await?;
        let fetcher = Fetcher::new(Arc::clone(&ctx.transport), &settings).with_headers(session.headers());

        // The asset source runs once per execution, whatever the input.
        let outcome = run_items("glpi", Vec::new(), ctx.continue_on_fail, |_, _| {
            query.run(&fetcher, &session.api_url)
        })
        .await;

        session.close(ctx.transport.as_ref()).await;
        outcome
    }
}
