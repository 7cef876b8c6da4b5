use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use super::enrich::LinkedData;
use super::relations::{Component, Lookup};
use crate::records::{as_id, safe_text, scalar_text};

static FREQUENCY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+\.?\d*)\s*(GHz|MHz)").ok());

/// Fold an asset and its linked records into the flat output record.
pub fn fold(asset: &Value, linked: &LinkedData) -> Value {
    let infocom = linked.infocom.first().cloned().unwrap_or(Value::Null);
    let processors = linked.component_details(Component::Processor);

    let mut record = json!({
        "ID": asset.get("id").cloned().unwrap_or(Value::Null),
        "Nom": asset.get("name").cloned().unwrap_or(Value::Null),
        "Numéro de série": asset.get("serial").cloned().unwrap_or(Value::Null),
        "Modèle": safe_text(linked.lookup(Lookup::Model), "name"),
        "Type de produit": safe_text(linked.lookup(Lookup::Type), "name"),
        "Fabricant": safe_text(linked.lookup(Lookup::Manufacturer), "name"),
        "Statut": safe_text(linked.lookup(Lookup::State), "name"),
        "Emplacement": safe_text(linked.lookup(Lookup::Location), "name"),
        "value": safe_text(&infocom, "value"),
        "Bon de livraison": safe_text(&infocom, "delivery_number"),
        "Carte graphique": designation_summary(linked.component_details(Component::GraphicCard)),
        "Type RAM": designation_summary(linked.component_details(Component::Memory)),
        "Type Processeur": designation_summary(processors),
        "Marque Processeur": linked
            .processor_manufacturer
            .as_ref()
            .map(|m| safe_text(m.value(), "name"))
            .unwrap_or_default(),
        "Vitesse Processeur": processor_speed(processors),
    });

    if let (Some(fields), Value::Object(map)) = (&linked.plugin_fields, &mut record) {
        for (key, value) in plugin_columns(fields) {
            map.insert(key.to_string(), Value::String(value));
        }
    }
    record
}

/// `designation` of each instance, identical ones collapsed as `name (xN)`,
/// one per line in first-seen order.
pub fn designation_summary(details: &[Value]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for detail in details {
        let designation = safe_text(detail, "designation");
        if designation.is_empty() {
            continue;
        }
        match counts.iter_mut().find(|(d, _)| *d == designation) {
            Some((_, n)) => *n += 1,
            None => counts.push((designation, 1)),
        }
    }
    counts
        .into_iter()
        .map(|(d, n)| if n > 1 { format!("{} (x{})", d, n) } else { d })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowest valid clock frequency across processors.
///
/// Uses the `frequence` field, else a number followed by GHz/MHz in the
/// designation. Values above 20 are MHz, the rest GHz. Empty when nothing
/// usable is found.
pub fn processor_speed(details: &[Value]) -> String {
    let lowest = details
        .iter()
        .filter_map(|detail| {
            safe_text(detail, "frequence")
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| *f > 0.0)
                .or_else(|| {
                    FREQUENCY
                        .as_ref()?
                        .captures(&safe_text(detail, "designation"))
                        .and_then(|c| c[1].parse::<f64>().ok())
                        .filter(|f| *f > 0.0)
                })
        })
        .fold(None, |min: Option<f64>, f| Some(min.map_or(f, |m| m.min(f))));

    match lowest {
        Some(f) if f > 20.0 => format!("{}MHz", f),
        Some(f) => format!("{}GHz", f),
        None => String::new(),
    }
}

fn yes_no(fields: &Value, key: &str) -> String {
    let flagged = fields.get(key).map(scalar_text).unwrap_or_default();
    if flagged.contains('1') { "Oui" } else { "Non" }.to_string()
}

fn keyboard_layout(fields: &Value) -> &'static str {
    match fields
        .get("plugin_fields_langueclavierfielddropdowns_id")
        .and_then(as_id)
    {
        Some(1) => "Azerty FR",
        Some(2) => "Autre",
        Some(3) => "Qwerty",
        _ => "Langage Clavier non spécifié",
    }
}

/// Output columns derived from the Fields-plugin row.
pub fn plugin_columns(fields: &Value) -> Vec<(&'static str, String)> {
    let keyboard = format!(
        "{}\n{}",
        safe_text(fields, "clavierfield"),
        keyboard_layout(fields)
    );
    let screen = safe_text(fields, "tailledelcranfield")
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| *s > 0.0)
        .map(|s| format!("{}''", s))
        .unwrap_or_default();

    vec![
        ("Webcam", yes_no(fields, "webcamfield")),
        ("WiFi", safe_text(fields, "wififield")),
        ("Bluetooth", yes_no(fields, "bluetoothfield")),
        ("Langue Clavier", keyboard.trim().to_string()),
        ("Taille écran", screen),
        (
            "Résolution maximale - écran",
            safe_text(fields, "rsolutionmaximalecranfield"),
        ),
        ("USB 2.0", safe_text(fields, "nombreportsusbtwozerofield")),
        ("USB 3.0", safe_text(fields, "nombreportsusbthreezerofield")),
        ("USB Type-C", safe_text(fields, "nombreportsusbcfield")),
        ("Lecteur Optique", safe_text(fields, "lecteuroptiquefield")),
        ("Port Série", yes_no(fields, "portsriefield")),
    ]
}
