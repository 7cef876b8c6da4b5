use std::collections::BTreeSet;
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::fetch::Fetcher;
use crate::nodes::NodeError;
use crate::records::{as_id, percent_encode, scalar_text};

/// Fields an asset list can be filtered on. Both the French display label
/// and the API name are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFilterField {
    Name,
    Serial,
    Location,
    State,
    Model,
    Manufacturer,
    Type,
}

/// How a filter value turns into matching asset ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// Server-side `searchText[<field>]` on the asset list.
    Search(&'static str),
    /// Match names in a dropdown table, then assets whose foreign key
    /// points at one of the matches.
    Lookup {
        table: &'static str,
        foreign_key: &'static str,
    },
}

impl FromStr for AssetFilterField {
    type Err = NodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim() {
            "Nom" | "name" => Ok(Self::Name),
            "Numéro de série" | "serial" => Ok(Self::Serial),
            "Emplacement" | "Location" => Ok(Self::Location),
            "Statut" | "State" => Ok(Self::State),
            "Modèle" | "ComputerModel" => Ok(Self::Model),
            "Fabricant" | "Manufacturer" => Ok(Self::Manufacturer),
            "Type de produit" | "ComputerType" => Ok(Self::Type),
            other => Err(NodeError::InvalidInput(format!(
                "unsupported GLPI filter field '{}'",
                other
            ))),
        }
    }
}

impl AssetFilterField {
    pub fn strategy(self) -> FilterStrategy {
        match self {
            Self::Name => FilterStrategy::Search("name"),
            Self::Serial => FilterStrategy::Search("serial"),
            Self::Location => FilterStrategy::Lookup {
                table: "Location",
                foreign_key: "locations_id",
            },
            Self::State => FilterStrategy::Lookup {
                table: "State",
                foreign_key: "states_id",
            },
            Self::Model => FilterStrategy::Lookup {
                table: "ComputerModel",
                foreign_key: "computermodels_id",
            },
            Self::Manufacturer => FilterStrategy::Lookup {
                table: "Manufacturer",
                foreign_key: "manufacturers_id",
            },
            Self::Type => FilterStrategy::Lookup {
                table: "ComputerType",
                foreign_key: "computertypes_id",
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFilter {
    pub field: AssetFilterField,
    pub value: String,
}

impl AssetFilter {
    /// Validate every `(field, value)` pair up front.
    pub fn parse_all(pairs: &[(String, String)]) -> Result<Vec<Self>, NodeError> {
        pairs
            .iter()
            .map(|(field, value)| {
                Ok(Self {
                    field: field.parse()?,
                    value: value.clone(),
                })
            })
            .collect()
    }
}

fn ids_of(rows: &[Value]) -> BTreeSet<i64> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(as_id))
        .collect()
}

async fn matching_ids(
    fetcher: &Fetcher,
    api_url: &str,
    resource: &str,
    filter: &AssetFilter,
) -> BTreeSet<i64> {
    match filter.field.strategy() {
        FilterStrategy::Search(field) => {
            let url = format!(
                "{}/{}?searchText[{}]={}&range=0-9999",
                api_url,
                resource,
                field,
                percent_encode(&filter.value)
            );
            ids_of(fetcher.get(&url, "FilteredAssets").await.items())
        }
        FilterStrategy::Lookup { table, foreign_key } => {
            let table_url = format!("{}/{}?expand_dropdowns=true&range=0-9999", api_url, table);
            let wanted = filter.value.to_lowercase();
            let table_ids: BTreeSet<i64> = fetcher
                .get(&table_url, table)
                .await
                .items()
                .iter()
                .filter(|row| {
                    row.get("name")
                        .map(|n| scalar_text(n).to_lowercase() == wanted)
                        .unwrap_or(false)
                })
                .filter_map(|row| row.get("id").and_then(as_id))
                .collect();
            if table_ids.is_empty() {
                return BTreeSet::new();
            }

            let assets_url = format!("{}/{}?range=0-9999", api_url, resource);
            fetcher
                .get(&assets_url, "AllAssets")
                .await
                .items()
                .iter()
                .filter(|asset| {
                    asset
                        .get(foreign_key)
                        .and_then(as_id)
                        .is_some_and(|fk| table_ids.contains(&fk))
                })
                .filter_map(|asset| asset.get("id").and_then(as_id))
                .collect()
        }
    }
}

/// Ids matching every filter (AND across filters), ascending.
pub async fn candidate_ids(
    fetcher: &Fetcher,
    api_url: &str,
    resource: &str,
    filters: &[AssetFilter],
) -> BTreeSet<i64> {
    let mut candidates: Option<BTreeSet<i64>> = None;
    for filter in filters {
        let matches = matching_ids(fetcher, api_url, resource, filter).await;
        debug!(field = ?filter.field, value = %filter.value, matches = matches.len(), "Filter resolved");
        let narrowed = match candidates {
            None => matches,
            Some(current) => current.intersection(&matches).copied().collect(),
        };
        if narrowed.is_empty() {
            return narrowed;
        }
        candidates = Some(narrowed);
    }
    candidates.unwrap_or_default()
}
