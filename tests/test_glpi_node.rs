mod common;

use std::sync::Arc;

use common::MockTransport;
use common::fixtures::{GLPI_API, asset, glpi_backend, glpi_credentials, with_asset};
use ironlink::engine::types::NodeContext;
use ironlink::fetch::Method;
use ironlink::nodes::NodeRegistry;
use serde_json::{Value, json};

fn url(path: &str) -> String {
    format!("{}/{}", GLPI_API, path)
}

fn context(mock: &Arc<MockTransport>) -> NodeContext {
    NodeContext::new(mock.clone()).with_credentials("glpi", glpi_credentials())
}

fn three_assets() -> MockTransport {
    let mock = glpi_backend().get(
        &url("Computer?expand_dropdowns=true&range=0-49"),
        json!([
            { "id": 1, "name": "PC-1", "locations_id": "Lyon" },
            { "id": 2, "name": "PC-2", "locations_id": "Lyon" },
            { "id": 3, "name": "PC-3", "locations_id": "Paris" }
        ]),
    );
    (1..=3).fold(mock, with_asset)
}

#[tokio::test]
async fn return_all_with_allowlist() {
    let mock = Arc::new(three_assets());
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let config = json!({ "return_all": true, "fields": ["ID", "Nom"] });
    let records = node.execute(&config, Vec::new(), &context(&mock)).await.unwrap();

    assert_eq!(records.len(), 3);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["ID", "Nom"]);
        assert_eq!(record["ID"], json!(i as i64 + 1));
    }
    assert_eq!(mock.count(Method::Get, &url("killSession")), 1);
}

#[tokio::test]
async fn session_headers_are_sent() {
    let mock = Arc::new(three_assets());
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    node.execute(&json!({ "id": 2 }), Vec::new(), &context(&mock))
        .await
        .unwrap();

    let calls = mock.calls();
    let init = &calls[0];
    assert_eq!(init.url, url("initSession"));
    assert_eq!(init.header_value("App-Token"), Some("app-123"));
    assert_eq!(init.header_value("Authorization"), Some("user_token user-456"));

    let detail = calls
        .iter()
        .find(|c| c.url == url("Computer/2"))
        .unwrap();
    assert_eq!(detail.header_value("session-token"), Some("sess-1"));
    assert_eq!(detail.header_value("app-token"), Some("app-123"));
}

#[tokio::test]
async fn by_id_returns_single_enriched_record() {
    let mock = Arc::new(three_assets());
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let records = node
        .execute(&json!({ "id": "3" }), Vec::new(), &context(&mock))
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["Nom"], "PC-3");
    assert_eq!(record["Emplacement"], "Lyon");
    // Plugin row belongs to asset 1 only.
    assert!(record.get("Webcam").is_none());
    // The asset list is never paged in by-id mode.
    assert_eq!(mock.count(Method::Get, &url("Computer?*")), 0);
}

#[tokio::test]
async fn missing_asset_fails_and_still_closes_session() {
    let mock = Arc::new(glpi_backend());
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let err = node
        .execute(&json!({ "id": 99 }), Vec::new(), &context(&mock))
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("No data found for ID 99"));
    assert_eq!(mock.count(Method::Get, &url("killSession")), 1);
}

#[tokio::test]
async fn missing_session_token_is_an_error() {
    let mock = Arc::new(MockTransport::new().get(&url("initSession"), json!({})));
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let err = node
        .execute(&json!({}), Vec::new(), &context(&mock))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no session token returned"));
}

#[tokio::test]
async fn unknown_filter_is_rejected_before_any_request() {
    let mock = Arc::new(three_assets());
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let config = json!({ "filters": [{ "field": "Couleur", "value": "bleu" }] });
    let err = node
        .execute(&config, Vec::new(), &context(&mock))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Couleur"));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn filters_are_intersected() {
    let mock = three_assets()
        .get(
            &url("Location?expand_dropdowns=true&range=0-9999"),
            json!([{ "id": 50, "name": "Lyon" }, { "id": 51, "name": "Paris" }]),
        )
        .get(
            &url("Computer?range=0-9999"),
            json!([
                { "id": 1, "locations_id": 50 },
                { "id": 2, "locations_id": 51 },
                { "id": 3, "locations_id": 50 }
            ]),
        )
        .get(
            &url("Computer?searchText[name]=PC-3&range=0-9999"),
            json!([{ "id": 3 }]),
        );
    let mock = Arc::new(mock);
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let by_location = node
        .execute(
            &json!({ "filters": [{ "field": "Emplacement", "value": "lyon" }] }),
            Vec::new(),
            &context(&mock),
        )
        .await
        .unwrap();
    let ids: Vec<Value> = by_location.iter().map(|r| r["ID"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(3)]);

    let both = node
        .execute(
            &json!({ "filters": [
                { "field": "Location", "value": "Lyon" },
                { "field": "Nom", "value": "PC-3" }
            ] }),
            Vec::new(),
            &context(&mock),
        )
        .await
        .unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0]["ID"], 3);
}

#[tokio::test]
async fn unmatched_lookup_yields_nothing() {
    let mock = Arc::new(three_assets().get(
        &url("State?expand_dropdowns=true&range=0-9999"),
        json!([{ "id": 30, "name": "En service" }]),
    ));
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let records = node
        .execute(
            &json!({ "filters": [{ "field": "Statut", "value": "Rebut" }] }),
            Vec::new(),
            &context(&mock),
        )
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(mock.count(Method::Get, &url("Computer?range=0-9999")), 0);
}

#[tokio::test]
async fn limit_and_sort_apply() {
    let mock = Arc::new(three_assets());
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let records = node
        .execute(
            &json!({ "limit": 2, "sort": { "field": "ID", "direction": "desc" } }),
            Vec::new(),
            &context(&mock),
        )
        .await
        .unwrap();
    let ids: Vec<Value> = records.iter().map(|r| r["ID"].clone()).collect();
    assert_eq!(ids, vec![json!(2), json!(1)]);
    // Only the first two assets are enriched.
    assert_eq!(mock.count(Method::Get, &url("Computer/3")), 0);
}

#[tokio::test]
async fn empty_values_are_pruned() {
    let mut sparse = asset(1);
    sparse["serial"] = json!("");
    let mock = Arc::new(
        glpi_backend()
            .get(&url("Computer/1"), sparse)
            .get(&url("Computer/1/Infocom"), json!([])),
    );
    let node = NodeRegistry::with_builtins().get("glpi").unwrap();

    let records = node
        .execute(&json!({ "id": 1 }), Vec::new(), &context(&mock))
        .await
        .unwrap();
    let record = &records[0];
    assert!(record.get("Numéro de série").is_none());
    assert!(record.get("Bon de livraison").is_none());
    assert!(record.get("Carte graphique").is_none());
    assert_eq!(record["Fabricant"], "Dell");
}
