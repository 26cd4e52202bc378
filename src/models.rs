use serde::{Deserialize, Serialize};
use std::fmt;

/// Default for work mode and seniority when nothing usable was extracted.
pub const UNKNOWN_LABEL: &str = "desconhecido";

/// Reason written when a listing's content hash matches the stored one.
pub const NO_CHANGE_REASON: &str = "Sem mudanças (hash igual).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Gupy,
    Linkedin,
    Indeed,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Gupy => "gupy",
            Platform::Linkedin => "linkedin",
            Platform::Indeed => "indeed",
            Platform::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "gupy" => Platform::Gupy,
            "linkedin" => Platform::Linkedin,
            "indeed" => Platform::Indeed,
            _ => Platform::Unknown,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing status. Labels are kept in the language of the source postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ativa,
    Removida,
    Duvidosa,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ativa => "ativa",
            Status::Removida => "removida",
            Status::Duvidosa => "duvidosa",
        }
    }

    /// Case-insensitive parse; anything outside the three labels is rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "ativa" => Some(Status::Ativa),
            "removida" => Some(Status::Removida),
            "duvidosa" => Some(Status::Duvidosa),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub platform: Platform,
    pub external_id: String,
    pub url: String,
    pub url_normalized: String,
    pub content_fingerprint: String,
    pub last_seen: String,
    pub created_at: String, // set on first insert only
    pub status: Status,
    pub company: Option<String>,
    pub title: Option<String>,
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
    pub raw_model_output: serde_json::Value,
}

/// The subset of a stored listing needed to decide whether to skip the model.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFingerprint {
    pub content_fingerprint: String,
    pub last_seen: String,
    pub url_normalized: String,
}
