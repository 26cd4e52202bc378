use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_FILE: &str = "processed_urls.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub last_run: String,
    pub url_original: String,
}

/// Fingerprints of already-extracted pages, keyed by normalized URL.
///
/// Consulted after the store lookup. The file is rewritten whole on every save.
#[derive(Debug)]
pub struct FingerprintCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl FingerprintCache {
    /// A missing file is an empty cache; so is an unreadable one, with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Ignoring malformed fingerprint cache: {e}");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::load(data_dir.join(CACHE_FILE))
    }

    pub fn matches(&self, url_normalized: &str, hash: &str) -> bool {
        self.entries
            .get(url_normalized)
            .is_some_and(|entry| entry.hash == hash)
    }

    pub fn record(&mut self, url_normalized: &str, hash: &str, url_original: &str, now: &str) {
        self.entries.insert(
            url_normalized.to_string(),
            CacheEntry {
                hash: hash.to_string(),
                last_run: now.to_string(),
                url_original: url_original.to_string(),
            },
        );
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write cache {}", self.path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
