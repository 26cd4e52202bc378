use serde_json::{Map, Value};

use crate::models::{Status, UNKNOWN_LABEL};

/// Keys the prompt asks the model to return.
pub const REQUIRED_KEYS: &[&str] = &[
    "cargo",
    "empresa",
    "localidade",
    "tipo_trabalho",
    "senioridade",
    "requisitos_principais",
    "tecnologias",
    "salario",
    "link_candidatura",
    "data_publicacao",
    "score_0_100",
    "motivo_curto",
];

/// Pairs of (canonical, alias). The alias only fills an absent canonical key.
const ALIASES: &[(&str, &str)] = &[
    ("cargo", "titulo_vaga"),
    ("localidade", "local"),
    ("tipo_trabalho", "modelo"),
];

/// Reconcile aliases and backfill defaults. Total: non-objects give an empty map.
pub fn normalize(result: Value) -> Map<String, Value> {
    let Value::Object(mut map) = result else {
        return Map::new();
    };

    for (canonical, alias) in ALIASES {
        if !map.contains_key(*canonical) {
            if let Some(value) = map.get(*alias).cloned() {
                map.insert(canonical.to_string(), value);
            }
        }
    }

    for key in ["tipo_trabalho", "senioridade"] {
        map.entry(key)
            .or_insert_with(|| Value::String(UNKNOWN_LABEL.to_string()));
    }

    for key in ["requisitos_principais", "tecnologias"] {
        let entry = map.entry(key).or_insert(Value::Null);
        if entry.is_null() {
            *entry = Value::Array(Vec::new());
        }
    }

    for key in ["empresa", "salario", "link_candidatura", "data_publicacao"] {
        map.entry(key).or_insert(Value::Null);
    }
    map.entry("score_0_100").or_insert(Value::from(0));
    map.entry("motivo_curto")
        .or_insert_with(|| Value::String(String::new()));

    map
}

/// Required keys absent from the payload as the model sent it.
pub fn missing_required_keys(raw: &Map<String, Value>) -> Vec<&'static str> {
    REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !raw.contains_key(*key))
        .collect()
}

/// Typed view over a normalized payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub work_mode: String,
    pub seniority: String,
    pub salary: Option<String>,
    pub application_link: Option<String>,
    pub posting_date: Option<String>,
    pub score: u8,
    pub reason: String,
    pub requirements: Vec<String>,
    pub technologies: Vec<String>,
    /// Only set when the payload names a known status label.
    pub status: Option<Status>,
}

impl Extraction {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let field = |key: &str| payload.get(key).unwrap_or(&Value::Null);

        Self {
            title: optional_text(field("cargo")),
            company: optional_text(field("empresa")),
            location: optional_text(field("localidade")),
            work_mode: optional_text(field("tipo_trabalho"))
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            seniority: optional_text(field("senioridade"))
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            salary: optional_text(field("salario")),
            application_link: optional_text(field("link_candidatura")),
            posting_date: optional_text(field("data_publicacao")),
            score: coerce_score(field("score_0_100")),
            reason: optional_text(field("motivo_curto")).unwrap_or_default(),
            requirements: text_list(field("requisitos_principais")),
            technologies: text_list(field("tecnologias")),
            status: field("status").as_str().and_then(Status::from_label),
        }
    }
}

fn optional_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integers, floats (truncated) and numeric strings in [0, 100]; anything else is 0.
pub fn coerce_score(value: &Value) -> u8 {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if (0.0..=100.0).contains(&n) => n.trunc() as u8,
        _ => 0,
    }
}

fn text_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(optional_text).collect(),
        other => optional_text(other).into_iter().collect(),
    }
}
