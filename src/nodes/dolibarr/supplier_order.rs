//! `postSupplierOrders`: resolve the supplier, turn the item into order
//! lines, create the order and report its id.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context as _, Result, anyhow};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{DolibarrClient, Operation, response_id};
use crate::engine::types::Record;
use crate::fetch::ApiRequest;
use crate::nodes::NodeError;
use crate::records::{as_id, scalar_text};

const SEARCH_PAGE_SIZE: usize = 100;

static NUMBERED_PRODUCT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^product(\d+)_").ok());

/// A product as described by the caller, before lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductInput {
    pub desc: String,
    pub qty: Value,
    pub product_type: Value,
    pub tva_tx: Value,
    pub subprice: Value,
    pub fk_product: Option<Value>,
}

impl ProductInput {
    pub fn is_valid(&self) -> bool {
        !self.desc.trim().is_empty() || self.fk_product.is_some()
    }
}

/// One line of the order payload; carries either a product id or a
/// free-text description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    pub qty: Value,
    pub product_type: Value,
    pub tva_tx: Value,
    pub subprice: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fk_product: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// First truthy value among `keys`.
fn pick(source: &Record, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|k| source.get(*k))
        .find(|v| is_truthy(v))
        .cloned()
}

fn pick_or(source: &Record, keys: &[&str], default: Value) -> Value {
    pick(source, keys).unwrap_or(default)
}

fn pick_text(source: &Record, keys: &[&str]) -> String {
    pick(source, keys)
        .map(|v| scalar_text(&v).trim().to_string())
        .unwrap_or_default()
}

fn product_from(source: &Record, desc_keys: &[&str], id_keys: &[&str]) -> ProductInput {
    ProductInput {
        desc: pick_text(source, desc_keys),
        qty: pick_or(source, &["qty", "quantity"], json!(1)),
        product_type: pick_or(source, &["product_type"], json!(0)),
        tva_tx: pick_or(source, &["tva_tx", "tax_rate"], json!(20)),
        subprice: pick_or(source, &["subprice", "unit_price", "price", "pu_ht"], json!(0)),
        fk_product: pick(source, id_keys),
    }
}

/// Products carried by `productN_*` fields, in numeric order of N.
fn numbered_products(item: &Record) -> Vec<ProductInput> {
    let Some(pattern) = NUMBERED_PRODUCT.as_ref() else {
        return Vec::new();
    };
    let numbers: BTreeSet<u32> = item
        .keys()
        .filter_map(|k| pattern.captures(k).and_then(|c| c[1].parse().ok()))
        .collect();

    numbers
        .into_iter()
        .map(|n| {
            let key = |suffix: &str| format!("product{}_{}", n, suffix);
            let field = |suffixes: &[&str]| -> Option<Value> {
                suffixes
                    .iter()
                    .filter_map(|s| item.get(&key(s)))
                    .find(|v| is_truthy(v))
                    .cloned()
            };
            ProductInput {
                desc: field(&["name", "desc"])
                    .map(|v| scalar_text(&v).trim().to_string())
                    .unwrap_or_default(),
                qty: field(&["qty", "quantity"]).unwrap_or(json!(1)),
                product_type: field(&["type"]).unwrap_or(json!(0)),
                tva_tx: field(&["tva", "tax"]).unwrap_or(json!(20)),
                subprice: field(&["price", "subprice"]).unwrap_or(json!(0)),
                fk_product: field(&["id", "fk_product"]),
            }
        })
        .filter(ProductInput::is_valid)
        .collect()
}

fn products_from_data(data: &Value) -> Result<Vec<ProductInput>, NodeError> {
    let parsed = match data {
        Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .map_err(|e| NodeError::InvalidInput(format!("Failed to parse productsData: {}", e)))?,
        other => other.clone(),
    };
    let rows = match parsed {
        Value::Array(rows) => rows,
        Value::Object(_) => vec![parsed],
        _ => Vec::new(),
    };
    Ok(rows
        .iter()
        .filter_map(Value::as_object)
        .map(|row| {
            product_from(
                row,
                &["desc", "libelle", "product_label"],
                &["fk_product"],
            )
        })
        .collect())
}

/// Products described by an input item, falling back to `products_data`.
///
/// Looks at, in order: a `products` array, single-product fields
/// (`product_name`/`description`/`desc`), numbered `productN_*` fields.
pub fn extract_products(
    item: &Record,
    products_data: Option<&Value>,
) -> Result<Vec<ProductInput>, NodeError> {
    let from_item = if let Some(Value::Array(rows)) = item.get("products") {
        rows.iter()
            .filter_map(Value::as_object)
            .map(|row| {
                product_from(
                    row,
                    &["desc", "product_name", "description"],
                    &["fk_product", "product_id"],
                )
            })
            .collect()
    } else if pick(item, &["product_name", "description", "desc"]).is_some() {
        vec![product_from(
            item,
            &["product_name", "description", "desc"],
            &["fk_product", "product_id"],
        )]
    } else {
        numbered_products(item)
    };

    if !from_item.is_empty() {
        return Ok(from_item);
    }
    match products_data {
        Some(data) => products_from_data(data),
        None => Ok(Vec::new()),
    }
}

fn display_name(row: &Value) -> String {
    let name = row
        .get("name")
        .or_else(|| row.get("nom"))
        .map(scalar_text)
        .unwrap_or_default();
    let id = row.get("id").map(scalar_text).unwrap_or_default();
    format!("{} (ID: {})", name, id)
}

/// Supplier id for a numeric id or an exact (case-insensitive) name.
pub async fn resolve_supplier(client: &DolibarrClient, supplier: &str) -> Result<i64> {
    let supplier = supplier.trim();
    if supplier.is_empty() {
        return Err(NodeError::MissingInput("Nom Fournisseur").into());
    }
    if supplier.chars().all(|c| c.is_ascii_digit()) {
        return supplier
            .parse()
            .map_err(|e| anyhow!("invalid supplier id '{}': {}", supplier, e));
    }

    let wanted = supplier.to_lowercase();
    let filter = format!("(t.nom:like:'{}%')", supplier);
    let mut page = 0;
    loop {
        let rows = client
            .search("thirdparties", &filter, page, SEARCH_PAGE_SIZE)
            .await
            .map_err(|e| anyhow!("Failed to find supplier: {}", e))?;

        let matches: Vec<&Value> = rows
            .iter()
            .filter(|row| {
                row.get("name")
                    .or_else(|| row.get("nom"))
                    .map(|n| scalar_text(n).to_lowercase() == wanted)
                    .unwrap_or(false)
            })
            .collect();

        match matches.as_slice() {
            [] if rows.len() < SEARCH_PAGE_SIZE => {
                return Err(NodeError::NotFound {
                    entity: "Supplier",
                    query: supplier.to_string(),
                }
                .into());
            }
            [] => page += 1,
            [only] => {
                return only
                    .get("id")
                    .and_then(as_id)
                    .ok_or_else(|| anyhow!("Supplier \"{}\" has no usable id", supplier));
            }
            many => {
                return Err(NodeError::Ambiguous {
                    entity: "suppliers",
                    query: supplier.to_string(),
                    candidates: many.iter().map(|row| display_name(row)).collect(),
                }
                .into());
            }
        }
    }
}

/// Product id whose label contains `desc`; `None` when nothing matches.
pub async fn find_product(client: &DolibarrClient, desc: &str) -> Result<Option<i64>> {
    let wanted = desc.to_lowercase();
    let filter = format!("(t.label:like:'%{}%')", desc);
    let mut page = 0;
    loop {
        let rows = client
            .search("products", &filter, page, SEARCH_PAGE_SIZE)
            .await
            .map_err(|e| anyhow!("Failed to find product: {}", e))?;

        let matches: Vec<&Value> = rows
            .iter()
            .filter(|row| {
                row.get("label")
                    .map(|l| scalar_text(l).to_lowercase().contains(&wanted))
                    .unwrap_or(false)
            })
            .collect();

        match matches.as_slice() {
            [] if rows.len() < SEARCH_PAGE_SIZE => return Ok(None),
            [] => page += 1,
            [only] => return Ok(only.get("id").and_then(as_id)),
            many => {
                return Err(NodeError::Ambiguous {
                    entity: "products",
                    query: desc.to_string(),
                    candidates: many
                        .iter()
                        .map(|row| {
                            format!(
                                "{} (ID: {})",
                                row.get("label").map(scalar_text).unwrap_or_default(),
                                row.get("id").map(scalar_text).unwrap_or_default()
                            )
                        })
                        .collect(),
                }
                .into());
            }
        }
    }
}

/// Order line for a product; a failed or inconclusive lookup keeps the
/// description as free text.
async fn order_line(client: &DolibarrClient, product: ProductInput) -> OrderLine {
    let mut line = OrderLine {
        qty: product.qty,
        product_type: product.product_type,
        tva_tx: product.tva_tx,
        subprice: product.subprice,
        fk_product: None,
        desc: None,
    };
    if let Some(fk) = product.fk_product {
        line.fk_product = Some(fk);
        return line;
    }

    let desc = product.desc.trim().to_string();
    match find_product(client, &desc).await {
        Ok(Some(id)) => line.fk_product = Some(json!(id)),
        Ok(None) => line.desc = Some(desc),
        Err(e) => {
            warn!(desc = %desc, error = %format!("{:#}", e), "Product lookup failed, using description");
            line.desc = Some(desc);
        }
    }
    line
}

/// Node parameter, falling back to the same-named field of the item.
fn param<'a>(config: &'a Value, item: &'a Record, name: &str) -> Option<&'a Value> {
    config
        .get(name)
        .filter(|v| !v.is_null())
        .or_else(|| item.get(name))
}

/// Id of the order just created: from the response, else the newest order
/// with the same supplier reference and supplier.
async fn created_order_id(
    client: &DolibarrClient,
    response: &Value,
    ref_supplier: &str,
    socid: i64,
) -> Option<i64> {
    if let Some(id) = response_id(response) {
        return Some(id);
    }
    let orders = match client
        .send(ApiRequest::get(client.url("supplierorders")))
        .await
    {
        Ok(orders) => super::page_items(&orders),
        Err(e) => {
            warn!(error = %e, "Failed to list orders to find the created order id");
            return None;
        }
    };
    orders
        .iter()
        .filter(|o| {
            o.get("ref_supplier").map(scalar_text).as_deref() == Some(ref_supplier)
                && o.get("socid").and_then(as_id) == Some(socid)
        })
        .filter_map(|o| o.get("id").and_then(as_id))
        .max()
}

/// Handle one input item of `postSupplierOrders`.
pub async fn create_supplier_order(
    client: &DolibarrClient,
    config: &Value,
    item: &Record,
) -> Result<Record> {
    let operation = Operation::PostSupplierOrders;
    let supplier_name = param(config, item, "nomFournisseurs")
        .map(scalar_text)
        .unwrap_or_default();
    let ref_supplier = param(config, item, "ref_supplier")
        .map(scalar_text)
        .unwrap_or_default();

    let socid = resolve_supplier(client, &supplier_name).await?;
    debug!(supplier = %supplier_name, socid, "Supplier resolved");

    let products = extract_products(item, param(config, item, "productsData"))?;
    let provided = products.len();
    let valid: Vec<ProductInput> = products.into_iter().filter(ProductInput::is_valid).collect();

    if valid.is_empty() {
        info!(supplier = %supplier_name, provided, "No valid products, order skipped");
        return Ok(into_record(json!({
            "success": true,
            "message": "No valid products found to create supplier order. Operation skipped.",
            "supplier": { "name": supplier_name, "id": socid },
            "products_provided": provided,
            "valid_products": 0,
            "operation": operation.name(),
            "resource": operation.resource(),
            "skipped": true,
        })));
    }

    let mut lines = Vec::with_capacity(valid.len());
    for product in valid {
        lines.push(order_line(client, product).await);
    }

    let body = json!({
        "ref": "auto",
        "ref_supplier": ref_supplier,
        "socid": socid,
        "lines": lines,
    });
    let response = client
        .send(ApiRequest::post(client.url("supplierorders"), body))
        .await
        .context("Failed to create supplier order")?;

    let order_id = created_order_id(client, &response, &ref_supplier, socid).await;
    info!(socid, order_id = ?order_id, lines = lines.len(), "Supplier order created");

    let order_ref = response
        .get("ref")
        .map(scalar_text)
        .unwrap_or_else(|| "auto".to_string());
    Ok(into_record(json!({
        "success": true,
        "message": format!("Supplier order created successfully with {} product(s)", lines.len()),
        "supplier": { "name": supplier_name, "id": socid },
        "order": {
            "id": order_id,
            "ref": order_ref,
            "ref_supplier": ref_supplier,
            "socid": socid,
            "lines": lines,
            "products_count": lines.len(),
        },
        "operation": operation.name(),
        "resource": operation.resource(),
    })))
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
