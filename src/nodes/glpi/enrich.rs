use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::debug;

use super::relations::{Component, LOOKUPS, Lookup, PLUGIN_FIELDS_RESOURCE, RELATIONSHIPS};
use crate::engine::types::Record;
use crate::fetch::{Fetched, Fetcher};
use crate::records::as_id;

static EMPTY: LazyLock<Value> = LazyLock::new(|| Value::Object(Record::new()));

/// Everything fetched around one asset.
#[derive(Debug, Clone, Default)]
pub struct LinkedData {
    pub lookups: BTreeMap<Lookup, Fetched>,
    /// Rows of the `Infocom` relation (financial info).
    pub infocom: Vec<Value>,
    /// Device detail records, one per attached instance, in relation order.
    pub components: BTreeMap<Component, Vec<Value>>,
    pub processor_manufacturer: Option<Fetched>,
    /// The Fields-plugin row whose `items_id` is this asset.
    pub plugin_fields: Option<Value>,
}

impl LinkedData {
    /// Resolved lookup record, or an empty object when absent or failed.
    pub fn lookup(&self, lookup: Lookup) -> &Value {
        self.lookups.get(&lookup).map(Fetched::value).unwrap_or(&EMPTY)
    }

    pub fn component_details(&self, component: Component) -> &[Value] {
        self.components
            .get(&component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Lookups whose fetch failed; their output fields stay absent.
    pub fn failed_lookups(&self) -> Vec<Lookup> {
        self.lookups
            .iter()
            .filter(|(_, f)| f.is_failed())
            .map(|(l, _)| *l)
            .collect()
    }
}

/// Walks the relation graph of one asset through a shared [`Fetcher`].
pub struct Enricher<'a> {
    fetcher: &'a Fetcher,
    api_url: &'a str,
    resource: &'a str,
}

impl<'a> Enricher<'a> {
    pub fn new(fetcher: &'a Fetcher, api_url: &'a str, resource: &'a str) -> Self {
        Self {
            fetcher,
            api_url,
            resource,
        }
    }

    fn url(&self, resource: &str, id: i64) -> String {
        format!("{}/{}/{}", self.api_url, resource, id)
    }

    pub async fn resolve(&self, asset: &Value) -> LinkedData {
        let Some(asset_id) = asset.get("id").and_then(as_id) else {
            return LinkedData::default();
        };
        let mut pointers: Record = asset.as_object().cloned().unwrap_or_default();

        // Relation rows, financial info and plugin fields do not depend on
        // each other.
        let relation_calls = join_all(RELATIONSHIPS.iter().map(|descriptor| async move {
            let url = format!(
                "{}/{}/{}/{}",
                self.api_url, self.resource, asset_id, descriptor.relation
            );
            (descriptor, self.fetcher.get(&url, descriptor.relation).await)
        }));
        let infocom_url = format!("{}/{}/{}/Infocom", self.api_url, self.resource, asset_id);
        let plugin_url = format!("{}/{}?range=0-9999", self.api_url, PLUGIN_FIELDS_RESOURCE);
        let (relations, infocom, plugin_rows) = tokio::join!(
            relation_calls,
            self.fetcher.get(&infocom_url, "Infocom"),
            self.fetcher.get(&plugin_url, "PluginFields"),
        );

        let mut instances: BTreeMap<Component, Vec<i64>> = BTreeMap::new();
        for (descriptor, fetched) in relations {
            let rows = fetched.items();
            if let Some(first) = rows.first() {
                if let Some(pointer) = first.get(descriptor.foreign_id_field) {
                    pointers.insert(descriptor.foreign_id_field.to_string(), pointer.clone());
                }
                let ids = rows
                    .iter()
                    .filter_map(|row| row.get(descriptor.foreign_id_field).and_then(as_id))
                    .collect();
                instances.insert(descriptor.component, ids);
            } else if let Some(fallback) = asset
                .get(descriptor.fallback_field)
                .filter(|v| !v.is_null())
            {
                pointers.insert(descriptor.foreign_id_field.to_string(), fallback.clone());
            }
        }

        // Every distinct URL is fetched once, however many pointers share it.
        let mut pending: BTreeMap<String, &'static str> = BTreeMap::new();
        let mut lookup_urls = Vec::new();
        for lookup in LOOKUPS {
            let Some(id) = pointers.get(lookup.id_field()).and_then(as_id) else {
                continue;
            };
            if id <= 0 {
                continue;
            }
            let url = self.url(lookup.resource(), id);
            pending.entry(url.clone()).or_insert(lookup.resource());
            lookup_urls.push((lookup, url));
        }
        for (component, ids) in &instances {
            let resource = component.descriptor().device_resource;
            for id in ids {
                pending.entry(self.url(resource, *id)).or_insert(resource);
            }
        }

        debug!(asset = asset_id, urls = pending.len(), "Resolving linked records");
        let fetched: HashMap<String, Fetched> = join_all(pending.into_iter().map(
            |(url, entity)| async move {
                let result = self.fetcher.get(&url, entity).await;
                (url, result)
            },
        ))
        .await
        .into_iter()
        .collect();

        let lookups: BTreeMap<Lookup, Fetched> = lookup_urls
            .into_iter()
            .filter_map(|(lookup, url)| fetched.get(&url).map(|f| (lookup, f.clone())))
            .collect();

        let components = instances
            .into_iter()
            .map(|(component, ids)| {
                let resource = component.descriptor().device_resource;
                let details = ids
                    .into_iter()
                    .filter_map(|id| fetched.get(&self.url(resource, id)))
                    .filter(|f| !f.is_failed() && f.value().is_object())
                    .map(|f| f.value().clone())
                    .collect();
                (component, details)
            })
            .collect();

        let processor_manufacturer = match lookups
            .get(&Lookup::Device(Component::Processor))
            .and_then(|p| p.value().get("manufacturers_id"))
            .and_then(as_id)
        {
            Some(id) if id > 0 => {
                let url = self.url("Manufacturer", id);
                Some(match fetched.get(&url) {
                    Some(known) => known.clone(),
                    None => self.fetcher.get(&url, "ProcessorManufacturer").await,
                })
            }
            _ => None,
        };

        let plugin_fields = plugin_rows
            .items()
            .iter()
            .find(|row| row.get("items_id").and_then(as_id) == Some(asset_id))
            .cloned();

        LinkedData {
            lookups,
            infocom: infocom.items().to_vec(),
            components,
            processor_manufacturer,
            plugin_fields,
        }
    }
}
