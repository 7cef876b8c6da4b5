//! Dolibarr ERP connector: paged collection listings and supplier-order
//! creation.

pub mod supplier_order;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::collector::{CollectOptions, PageRequest, collect_pages, collect_pages_parallel};
use crate::engine::items::run_items;
use crate::engine::types::{FetchSettings, NodeContext, Record};
use crate::fetch::{ApiRequest, Fetched, Fetcher, Transport, TransportError};
use crate::nodes::{Node, NodeError};
use crate::records::{
    SortRule, as_id, field_list, filter_pairs, finalize, percent_encode, requested_limit,
};

const LIST_PAGE_SIZE: usize = 500;
const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CustomerInvoices,
    Products,
    SupplierInvoices,
    SupplierOrders,
    Thirdparties,
    PostSupplierOrders,
}

impl FromStr for Operation {
    type Err = NodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "getCustomerInvoices" => Ok(Self::CustomerInvoices),
            "getProducts" => Ok(Self::Products),
            "getSupplierInvoices" => Ok(Self::SupplierInvoices),
            "getSupplierOrders" => Ok(Self::SupplierOrders),
            "getThirdparties" => Ok(Self::Thirdparties),
            "postSupplierOrders" => Ok(Self::PostSupplierOrders),
            other => Err(NodeError::InvalidInput(format!(
                "unknown Dolibarr operation '{}'",
                other
            ))),
        }
    }
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::CustomerInvoices => "getCustomerInvoices",
            Self::Products => "getProducts",
            Self::SupplierInvoices => "getSupplierInvoices",
            Self::SupplierOrders => "getSupplierOrders",
            Self::Thirdparties => "getThirdparties",
            Self::PostSupplierOrders => "postSupplierOrders",
        }
    }

    /// REST collection the operation works on.
    pub fn resource(self) -> &'static str {
        match self {
            Self::CustomerInvoices => "invoices",
            Self::Products => "products",
            Self::SupplierInvoices => "supplierinvoices",
            Self::SupplierOrders | Self::PostSupplierOrders => "supplierorders",
            Self::Thirdparties => "thirdparties",
        }
    }

    fn accepts_status(self) -> bool {
        matches!(self, Self::CustomerInvoices | Self::SupplierInvoices)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DolibarrCredentials {
    pub base_url: String,
    pub api_key: String,
}

impl DolibarrCredentials {
    pub fn api_root(&self) -> String {
        format!("{}/api/index.php", self.base_url.trim_end_matches('/'))
    }
}

/// Authenticated access to one Dolibarr instance.
#[derive(Clone)]
pub struct DolibarrClient {
    fetcher: Fetcher,
    root: String,
}

impl DolibarrClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: &FetchSettings,
        credentials: &DolibarrCredentials,
    ) -> Self {
        let fetcher = Fetcher::new(transport, settings)
            .with_headers(vec![("DOLAPIKEY".to_string(), credentials.api_key.clone())]);
        Self {
            fetcher,
            root: credentials.api_root(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// One page of `resource` narrowed by `sqlfilter`. A 404 means no
    /// match and yields an empty page; other failures are returned.
    pub async fn search(
        &self,
        resource: &str,
        sqlfilter: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Value>, Arc<TransportError>> {
        let url = self.url(&format!(
            "{}?page={}&limit={}&sqlfilters={}",
            resource,
            page,
            page_size,
            percent_encode(sqlfilter)
        ));
        match self.fetcher.get(&url, resource).await {
            Fetched::Resolved(value) => Ok(page_items(&value)),
            Fetched::Failed(e) if e.is_not_found() => Ok(Vec::new()),
            Fetched::Failed(e) => Err(e),
        }
    }

    /// Uncached call, for writes and reads that must observe them.
    pub async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
        self.fetcher.send(request).await
    }
}

/// Rows of a collection response: a bare array, `{ "data": [...] }`, or a
/// single object.
pub fn page_items(response: &Value) -> Vec<Value> {
    match response {
        Value::Array(items) => items.clone(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![response.clone()],
        },
        _ => Vec::new(),
    }
}

/// `(t.field:like:'%value%')` predicates joined with ` AND `.
pub fn sql_filters(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(field, value)| format!("(t.{}:like:'%{}%')", field, value))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// A listing request parsed from the node configuration.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub operation: Operation,
    pub fields: Vec<String>,
    pub id: Option<String>,
    pub sqlfilters: String,
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub lookahead: usize,
    pub sort: Option<SortRule>,
}

impl ListQuery {
    pub fn from_config(operation: Operation, config: &Value) -> Self {
        let id = config
            .get("id")
            .and_then(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let status = config
            .get("status")
            .and_then(|v| v.as_str())
            .filter(|s| operation.accepts_status() && !s.is_empty())
            .map(str::to_string);

        Self {
            operation,
            fields: field_list(config),
            id,
            sqlfilters: sql_filters(&filter_pairs(config)),
            status,
            limit: requested_limit(config, DEFAULT_LIMIT),
            lookahead: config
                .get("lookahead")
                .and_then(|v| v.as_u64())
                .map(|n| n.max(1) as usize)
                .unwrap_or(1),
            sort: SortRule::from_config(config),
        }
    }

    fn page_url(&self, client: &DolibarrClient, index: usize, size: usize) -> String {
        let mut url = client.url(&format!(
            "{}?page={}&limit={}",
            self.operation.resource(),
            index,
            size
        ));
        if let Some(status) = &self.status {
            url.push_str(&format!("&status={}", percent_encode(status)));
        }
        if !self.sqlfilters.is_empty() {
            url.push_str(&format!("&sqlfilters={}", percent_encode(&self.sqlfilters)));
        }
        url
    }

    pub async fn run(&self, client: &DolibarrClient) -> Result<Vec<Record>> {
        let resource = self.operation.resource();
        let rows = match &self.id {
            Some(id) => {
                let url = client.url(&format!("{}/{}", resource, id));
                let fetched = client.fetcher().get(&url, resource).await;
                if let Some(e) = fetched.error() {
                    return Err(anyhow!("Failed to fetch {} {}: {}", resource, id, e));
                }
                vec![fetched.into_value()]
            }
            None => {
                let mut options = CollectOptions::new(LIST_PAGE_SIZE, self.limit);
                options.lookahead = self.lookahead;
                let fetch_page = |page: PageRequest| {
                    let url = self.page_url(client, page.index, page.size);
                    async move {
                        match client.fetcher().get(&url, resource).await {
                            Fetched::Resolved(value) => page_items(&value),
                            // Failed pages count as empty.
                            Fetched::Failed(_) => Vec::new(),
                        }
                    }
                };
                if options.lookahead > 1 {
                    collect_pages_parallel(&options, fetch_page).await
                } else {
                    collect_pages(&options, fetch_page).await
                }
            }
        };
        info!(operation = self.operation.name(), rows = rows.len(), "Dolibarr rows collected");

        Ok(finalize(rows, &self.fields, self.sort.as_ref()))
    }
}

pub struct DolibarrNode;

#[async_trait]
impl Node for DolibarrNode {
    fn node_type(&self) -> &str {
        "dolibarr"
    }

    fn description(&self) -> &str {
        "List Dolibarr invoices, products, orders and thirdparties, or create supplier orders"
    }

    async fn execute(
        &self,
        config: &Value,
        items: Vec<Record>,
        ctx: &NodeContext,
    ) -> Result<Vec<Record>> {
        let credentials: DolibarrCredentials = ctx.credentials("dolibarr")?;
        let operation: Operation = config
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("getCustomerInvoices")
            .parse()?;
        let client = DolibarrClient::new(Arc::clone(&ctx.transport), &ctx.settings, &credentials);

        match operation {
            Operation::PostSupplierOrders => {
                run_items(operation.name(), items, ctx.continue_on_fail, |_, item| {
                    let client = &client;
                    async move {
                        let record =
                            supplier_order::create_supplier_order(client, config, &item).await?;
                        Ok(vec![record])
                    }
                })
                .await
            }
            _ => {
                let query = ListQuery::from_config(operation, config);
                run_items(operation.name(), items, ctx.continue_on_fail, |_, _| {
                    query.run(&client)
                })
                .await
            }
        }
    }
}

/// Numeric id out of a Dolibarr response field.
pub(crate) fn response_id(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => map.get("id").and_then(as_id),
        other => as_id(other),
    }
}
