//! Canned GLPI and Dolibarr backends, and document attachments.

use base64::Engine;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use serde_json::{Value, json};

use super::MockTransport;

pub const GLPI_API: &str = "http://glpi/apirest.php";
pub const DOLIBARR_API: &str = "http://erp/api/index.php";

pub fn glpi_credentials() -> Value {
    json!({ "base_url": "http://glpi/", "app_token": "app-123", "user_token": "user-456" })
}

pub fn dolibarr_credentials() -> Value {
    json!({ "base_url": "http://erp", "api_key": "secret" })
}

fn glpi(path: &str) -> String {
    format!("{}/{}", GLPI_API, path)
}

pub fn asset(id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("PC-{}", id),
        "serial": format!("SN{:04}", id),
        "computermodels_id": 10,
        "computertypes_id": 20,
        "states_id": 30,
        "manufacturers_id": 40,
        "locations_id": 50,
    })
}

/// Session endpoints plus the dropdown and device records every asset
/// shares.
pub fn glpi_backend() -> MockTransport {
    MockTransport::new()
        .get(&glpi("initSession"), json!({ "session_token": "sess-1" }))
        .get(&glpi("killSession"), json!({}))
        .get(&glpi("ComputerModel/10"), json!({ "id": 10, "name": "OptiPlex 7090" }))
        .get(&glpi("ComputerType/20"), json!({ "id": 20, "name": "Desktop" }))
        .get(&glpi("State/30"), json!({ "id": 30, "name": "En service" }))
        .get(&glpi("Manufacturer/40"), json!({ "id": 40, "name": "Dell" }))
        .get(&glpi("Location/50"), json!({ "id": 50, "name": "Lyon" }))
        .get(&glpi("DeviceGraphicCard/7"), json!({ "id": 7, "designation": "Intel UHD 630" }))
        .get(
            &glpi("DeviceProcessor/8"),
            json!({ "id": 8, "designation": "Intel Core i5 2.4GHz", "frequence": 2400, "manufacturers_id": 40 }),
        )
        .get(&glpi("DeviceMemory/9"), json!({ "id": 9, "designation": "DDR4 8 Go" }))
        .get(
            &glpi("PluginFieldsComputerFichetest?range=0-9999"),
            json!([
                {
                    "id": 900,
                    "items_id": 1,
                    "webcamfield": 1,
                    "wififield": "802.11ac",
                    "bluetoothfield": 0,
                    "clavierfield": "FR",
                    "plugin_fields_langueclavierfielddropdowns_id": 1,
                    "tailledelcranfield": "15.6",
                    "rsolutionmaximalecranfield": "1920x1080",
                    "nombreportsusbtwozerofield": 2,
                    "nombreportsusbthreezerofield": "2",
                    "nombreportsusbcfield": 1,
                    "lecteuroptiquefield": "Non",
                    "portsriefield": "0"
                }
            ]),
        )
}

/// Detail, component relations and financial info for one asset.
pub fn with_asset(mock: MockTransport, id: i64) -> MockTransport {
    mock.get(&glpi(&format!("Computer/{}", id)), asset(id))
        .get(
            &glpi(&format!("Computer/{}/Item_DeviceGraphicCard", id)),
            json!([{ "id": 1, "devicegraphiccards_id": 7 }]),
        )
        .get(
            &glpi(&format!("Computer/{}/Item_DeviceProcessor", id)),
            json!([
                { "id": 2, "deviceprocessors_id": 8 },
                { "id": 3, "deviceprocessors_id": 8 }
            ]),
        )
        .get(
            &glpi(&format!("Computer/{}/Item_DeviceMemory", id)),
            json!([
                { "id": 4, "devicememories_id": 9 },
                { "id": 5, "devicememories_id": 9 }
            ]),
        )
        .get(
            &glpi(&format!("Computer/{}/Infocom", id)),
            json!([{ "value": "850.00", "delivery_number": format!("BL-{}", id) }]),
        )
}

/// A PDF with one text line per entry, one inner slice per page.
pub fn pdf(pages: &[&[&str]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let mut operations = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let y = 760 - 20 * i as i64;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![72.into(), y.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// A `binary.<key>` entry; `file_name` is left out when empty.
pub fn attachment(file_name: &str, mime_type: &str, bytes: &[u8]) -> Value {
    let mut entry = json!({
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        "mimeType": mime_type,
    });
    if !file_name.is_empty() {
        entry["fileName"] = json!(file_name);
    }
    entry
}
