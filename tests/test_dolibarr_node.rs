mod common;

use std::sync::Arc;

use common::fixtures::{DOLIBARR_API, dolibarr_credentials};
use common::{MockTransport, Reply};
use ironlink::engine::types::{NodeContext, Record};
use ironlink::fetch::Method;
use ironlink::nodes::NodeRegistry;
use ironlink::nodes::dolibarr::supplier_order::extract_products;
use ironlink::nodes::dolibarr::{Operation, page_items, sql_filters};
use serde_json::{Value, json};

fn url(path: &str) -> String {
    format!("{}/{}", DOLIBARR_API, path)
}

fn context(mock: &Arc<MockTransport>) -> NodeContext {
    NodeContext::new(mock.clone()).with_credentials("dolibarr", dolibarr_credentials())
}

fn item(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn posted_orders(mock: &MockTransport) -> Vec<Value> {
    mock.calls()
        .into_iter()
        .filter(|c| c.method == Method::Post && c.url == url("supplierorders"))
        .filter_map(|c| c.body)
        .collect()
}

// --- Supplier orders ---

#[tokio::test]
async fn order_with_known_products_skips_lookup() {
    let mock = Arc::new(
        MockTransport::new()
            .get(
                &format!("{}*", url("thirdparties?page=0")),
                json!([{ "id": 5, "name": "Acme" }, { "id": 6, "name": "Acme Industries" }]),
            )
            .post(&url("supplierorders"), json!(77)),
    );
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({
        "operation": "postSupplierOrders",
        "nomFournisseurs": "Acme",
        "ref_supplier": "CMD-2024-01",
        "productsData": "[{\"fk_product\": 11, \"qty\": 2, \"subprice\": 10.5}, {\"fk_product\": 12, \"qty\": 1, \"subprice\": 99}]"
    });
    let records = node.execute(&config, Vec::new(), &context(&mock)).await.unwrap();

    let posted = posted_orders(&mock);
    assert_eq!(posted.len(), 1);
    let body = &posted[0];
    assert_eq!(body["ref"], "auto");
    assert_eq!(body["socid"], 5);
    assert_eq!(body["ref_supplier"], "CMD-2024-01");
    let lines = body["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["fk_product"], 11);
    assert_eq!(lines[0]["qty"], 2);
    assert_eq!(lines[1]["fk_product"], 12);
    assert!(lines.iter().all(|l| l.get("desc").is_none()));
    assert_eq!(mock.count(Method::Get, &format!("{}*", url("products"))), 0);

    let record = &records[0];
    assert_eq!(record["success"], true);
    assert_eq!(record["order"]["id"], 77);
    assert_eq!(record["order"]["products_count"], 2);
    assert_eq!(record["supplier"]["id"], 5);
    assert_eq!(
        record["message"],
        "Supplier order created successfully with 2 product(s)"
    );
}

#[tokio::test]
async fn ambiguous_supplier_fails_without_posting() {
    let mock = Arc::new(
        MockTransport::new()
            .get(
                &format!("{}*", url("thirdparties?page=0")),
                json!([{ "id": 5, "name": "Acme" }, { "id": 8, "nom": "ACME" }]),
            )
            .post(&url("supplierorders"), json!(1)),
    );
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({
        "operation": "postSupplierOrders",
        "nomFournisseurs": "Acme",
        "productsData": [{ "fk_product": 11 }]
    });
    let err = node
        .execute(&config, Vec::new(), &context(&mock))
        .await
        .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("Multiple suppliers found"), "{}", message);
    assert!(message.contains("Acme (ID: 5)"));
    assert!(message.contains("ACME (ID: 8)"));
    assert_eq!(mock.count(Method::Post, &url("supplierorders")), 0);
}

#[tokio::test]
async fn unknown_supplier_is_not_found() {
    let mock = Arc::new(
        MockTransport::new()
            .get_replies(&format!("{}*", url("thirdparties")), vec![Reply::Status(404)]),
    );
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({ "operation": "postSupplierOrders", "nomFournisseurs": "Ghost" });
    let err = node
        .execute(&config, Vec::new(), &context(&mock))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Supplier \"Ghost\" not found"));
}

#[tokio::test]
async fn supplier_name_is_required() {
    let mock = Arc::new(MockTransport::new());
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let err = node
        .execute(&json!({ "operation": "postSupplierOrders" }), Vec::new(), &context(&mock))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Nom Fournisseur is required"));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn products_are_looked_up_by_description() {
    let mock = Arc::new(
        MockTransport::new()
            .get(
                &format!("{}*", url("products?page=0&limit=100&sqlfilters=%28t.label%3Alike%3A%27%25Clavier")),
                json!([{ "id": 31, "label": "Clavier USB Logitech" }]),
            )
            .get_replies(
                &format!("{}*", url("products?page=0&limit=100&sqlfilters=%28t.label%3Alike%3A%27%25Souris")),
                vec![Reply::Status(500)],
            )
            .post(&url("supplierorders"), json!({ "id": 12, "ref": "CF2401-0012" })),
    );
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({ "operation": "postSupplierOrders", "nomFournisseurs": "42" });
    let input = item(json!({
        "products": [
            { "desc": "Clavier USB", "qty": 3, "unit_price": 25 },
            { "description": "Souris sans fil", "qty": 1 }
        ]
    }));
    let records = node
        .execute(&config, vec![input], &context(&mock))
        .await
        .unwrap();

    let body = &posted_orders(&mock)[0];
    assert_eq!(body["socid"], 42);
    let lines = body["lines"].as_array().unwrap();
    assert_eq!(lines[0]["fk_product"], 31);
    assert_eq!(lines[0]["subprice"], 25);
    assert!(lines[0].get("desc").is_none());
    assert_eq!(lines[1]["desc"], "Souris sans fil");
    assert!(lines[1].get("fk_product").is_none());
    assert_eq!(lines[1]["tva_tx"], 20);

    assert_eq!(records[0]["order"]["id"], 12);
    assert_eq!(records[0]["order"]["ref"], "CF2401-0012");
}

#[tokio::test]
async fn created_id_is_recovered_from_order_list() {
    let mock = Arc::new(
        MockTransport::new()
            .post(&url("supplierorders"), json!({}))
            .get(
                &url("supplierorders"),
                json!([
                    { "id": 3, "ref_supplier": "R-9", "socid": "7" },
                    { "id": 4, "ref_supplier": "R-9", "socid": 7 },
                    { "id": 10, "ref_supplier": "R-1", "socid": 7 }
                ]),
            ),
    );
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let input = item(json!({
        "nomFournisseurs": "7",
        "ref_supplier": "R-9",
        "product_name": "Licence Office",
        "product_id": 55
    }));
    let records = node
        .execute(&json!({ "operation": "postSupplierOrders" }), vec![input], &context(&mock))
        .await
        .unwrap();

    assert_eq!(records[0]["order"]["id"], 4);
    assert!(records[0].get("createOrderResponse").is_none());
}

#[tokio::test]
async fn no_valid_products_skips_order() {
    let mock = Arc::new(MockTransport::new());
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({
        "operation": "postSupplierOrders",
        "nomFournisseurs": "5",
        "productsData": "[{\"qty\": 2}]"
    });
    let records = node.execute(&config, Vec::new(), &context(&mock)).await.unwrap();

    let record = &records[0];
    assert_eq!(record["skipped"], true);
    assert_eq!(record["products_provided"], 1);
    assert_eq!(record["valid_products"], 0);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn continue_on_fail_records_item_errors() {
    let mock = Arc::new(MockTransport::new().post(&url("supplierorders"), json!(90)));
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let items = vec![
        item(json!({ "product_name": "Ecran" })),
        item(json!({ "nomFournisseurs": "5", "desc": "Ecran 24", "fk_product": 3 })),
    ];
    let ctx = context(&mock).continue_on_fail(true);
    let records = node
        .execute(&json!({ "operation": "postSupplierOrders" }), items, &ctx)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["success"], false);
    assert_eq!(records[0]["operation"], "postSupplierOrders");
    assert!(records[0]["error"].as_str().unwrap().contains("Nom Fournisseur"));
    assert_eq!(records[1]["order"]["id"], 90);
}

#[test]
fn products_from_numbered_fields_in_numeric_order() {
    let source = item(json!({
        "product10_name": "Dock",
        "product2_name": "Câble HDMI",
        "product2_qty": 4,
        "product3_qty": 1
    }));
    let products = extract_products(&source, None).unwrap();
    let names: Vec<&str> = products.iter().map(|p| p.desc.as_str()).collect();
    assert_eq!(names, vec!["Câble HDMI", "Dock"]);
    assert_eq!(products[0].qty, json!(4));
}

#[test]
fn malformed_products_data_is_rejected() {
    let err = extract_products(&Record::new(), Some(&json!("[{oops"))).unwrap_err();
    assert!(err.to_string().contains("Failed to parse productsData"));
}

// --- Listings ---

#[test]
fn operations_and_filters() {
    let op: Operation = "getSupplierInvoices".parse().unwrap();
    assert_eq!(op.resource(), "supplierinvoices");
    assert!("deleteEverything".parse::<Operation>().is_err());

    assert_eq!(
        sql_filters(&[("ref".into(), "FA24".into()), ("status".into(), "1".into())]),
        "(t.ref:like:'%FA24%') AND (t.status:like:'%1%')"
    );
    assert_eq!(page_items(&json!({ "data": [1, 2] })), vec![json!(1), json!(2)]);
    assert_eq!(page_items(&json!({ "id": 1 })), vec![json!({ "id": 1 })]);
    assert!(page_items(&json!("nope")).is_empty());
}

#[tokio::test]
async fn invoices_are_filtered_and_shaped() {
    let mock = Arc::new(MockTransport::new().get(
        &url("invoices?page=0&limit=500&status=paid&sqlfilters=%28t.ref%3Alike%3A%27%25FA24%25%27%29"),
        json!([
            { "id": 2, "ref": "FA2402", "total_ttc": 50, "note": "" },
            { "id": 1, "ref": "FA2401", "total_ttc": 120, "note": null }
        ]),
    ));
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({
        "operation": "getCustomerInvoices",
        "status": "paid",
        "filters": [{ "field": "ref", "value": "FA24" }],
        "sort": { "field": "total_ttc", "direction": "desc" },
        "fields": ["ref", "total_ttc", "note"]
    });
    let records = node.execute(&config, Vec::new(), &context(&mock)).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["ref"], "FA2401");
    assert_eq!(records[0].keys().collect::<Vec<_>>(), vec!["ref", "total_ttc"]);
    assert_eq!(
        mock.calls()[0].header_value("DOLAPIKEY"),
        Some("secret")
    );
}

#[tokio::test]
async fn lookahead_pages_in_parallel() {
    let first: Vec<Value> = (1..=500).map(|i| json!({ "id": i })).collect();
    let mock = Arc::new(
        MockTransport::new()
            .get(&url("thirdparties?page=0&limit=500"), Value::Array(first))
            .get(
                &url("thirdparties?page=1&limit=500"),
                json!([{ "id": 501 }, { "id": 502 }]),
            ),
    );
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let config = json!({ "operation": "getThirdparties", "return_all": true, "lookahead": 3 });
    let records = node.execute(&config, Vec::new(), &context(&mock)).await.unwrap();

    assert_eq!(records.len(), 502);
    assert_eq!(records[501]["id"], 502);
    assert_eq!(mock.count(Method::Get, &url("thirdparties?page=2&limit=500")), 1);
}

#[tokio::test]
async fn list_by_id_failure_is_an_error() {
    let mock = Arc::new(MockTransport::new());
    let node = NodeRegistry::with_builtins().get("dolibarr").unwrap();

    let err = node
        .execute(
            &json!({ "operation": "getProducts", "id": 404 }),
            Vec::new(),
            &context(&mock),
        )
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to fetch products 404"));
}
