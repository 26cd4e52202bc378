use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::cache::FingerprintCache;
use crate::classify::classify;
use crate::db::Database;
use crate::fetch::{FetchError, PageOrigin, PageSource};
use crate::llm::{extract_listing, GenerationOptions, ModelProvider};
use crate::models::{ListingRecord, Status};
use crate::normalize::{missing_required_keys, normalize, Extraction};
use crate::reduce::{reduce, DEFAULT_MAX_CHARS};
use crate::urls::{detect_platform, extract_company_slug, extract_job_id, normalize_url};

#[derive(Debug, Error)]
#[error("model extraction failed")]
struct ModelUnavailable;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_chars: usize,
    pub generation: GenerationOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            generation: GenerationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Extracted { degraded: bool },
    /// Stored fingerprint matched; only `last_seen` was refreshed.
    Unchanged,
    /// Auxiliary cache matched; nothing was written.
    CacheHit,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub extracted: usize,
    pub degraded: usize,
    pub unchanged: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

pub struct Pipeline<'a, S: PageSource, M: ModelProvider> {
    source: S,
    model: M,
    db: &'a Database,
    cache: FingerprintCache,
    prompt_template: String,
    options: PipelineOptions,
}

impl<'a, S: PageSource, M: ModelProvider> Pipeline<'a, S, M> {
    pub fn new(
        source: S,
        model: M,
        db: &'a Database,
        cache: FingerprintCache,
        prompt_template: String,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            model,
            db,
            cache,
            prompt_template,
            options,
        }
    }

    /// Process every URL in order. One failing URL never stops the batch.
    pub fn run(&mut self, urls: &[String]) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let total = urls.len();

        for (i, url) in urls.iter().enumerate() {
            tracing::info!("[{}/{}] {}", i + 1, total, url);

            match self.process_url(url) {
                Ok(Outcome::Extracted { degraded }) => {
                    summary.extracted += 1;
                    if degraded {
                        summary.degraded += 1;
                        tracing::warn!(url = %url, "Stored degraded extraction");
                    } else {
                        tracing::info!(url = %url, "Extracted and stored");
                    }
                }
                Ok(Outcome::Unchanged) => {
                    summary.unchanged += 1;
                    tracing::info!(url = %url, "Unchanged since last run, model skipped");
                }
                Ok(Outcome::CacheHit) => {
                    summary.cache_hits += 1;
                    tracing::info!(url = %url, "Fingerprint cache hit, model skipped");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(url = %url, kind = failure_kind(&e), "Failed: {e:#}");
                }
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            extracted = summary.extracted,
            degraded = summary.degraded,
            unchanged = summary.unchanged,
            cache_hits = summary.cache_hits,
            failed = summary.failed,
            elapsed_secs = summary.elapsed.as_secs(),
            "Run finished"
        );
        summary
    }

    pub fn process_url(&mut self, url: &str) -> Result<Outcome> {
        let url_normalized = normalize_url(url);
        let platform = detect_platform(&url_normalized);
        let external_id = extract_job_id(&url_normalized);
        let listing_key = if external_id.is_empty() {
            url_normalized.clone()
        } else {
            external_id
        };

        let fetch_started = Instant::now();
        let page = self.source.fetch_text(&url_normalized)?;
        let scrape_ms = fetch_started.elapsed().as_millis() as u64;

        let status_pre = match page.origin {
            PageOrigin::Blocked(status) => {
                tracing::warn!(status, "Page blocked, defaulting to duvidosa");
                Status::Duvidosa
            }
            PageOrigin::ReaderProxy | PageOrigin::Direct => classify(&page.text),
        };
        let reduced = reduce(&page.text, self.options.max_chars);
        let raw_chars = page.text.chars().count();
        let reduced_chars = reduced.chars().count();
        let delta = reduced_chars as i64 - raw_chars as i64;
        tracing::info!(
            platform = %platform,
            id = %listing_key,
            scrape_ms,
            raw_chars,
            reduced_chars,
            delta,
            status_pre = %status_pre,
            "Page fetched"
        );

        let fingerprint = content_fingerprint(&page.text);
        let now = now_iso();

        if let Some(stored) = self.db.get_listing(platform, &listing_key)? {
            if stored.content_fingerprint == fingerprint {
                tracing::debug!(
                    previous_seen = %stored.last_seen,
                    previous_url = %stored.url_normalized,
                    "Stored fingerprint matches"
                );
                self.db
                    .touch_unchanged(platform, &listing_key, url, &url_normalized, &now)?;
                return Ok(Outcome::Unchanged);
            }
        }

        if self.cache.matches(&url_normalized, &fingerprint) {
            return Ok(Outcome::CacheHit);
        }

        let model_started = Instant::now();
        let output = extract_listing(
            &self.model,
            &self.options.generation,
            &self.prompt_template,
            &reduced,
            &url_normalized,
        )
        .map_err(|e| e.context(ModelUnavailable))?;
        let degraded = output.is_degraded();
        tracing::info!(
            model = self.model.model_name(),
            model_ms = model_started.elapsed().as_millis() as u64,
            degraded,
            "Model finished"
        );

        let mut payload = output.into_payload(&url_normalized);
        let missing = missing_required_keys(&payload);
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Model output is missing expected keys");
        }
        payload.insert("url".to_string(), Value::from(url_normalized.as_str()));
        payload
            .entry("data_coleta")
            .or_insert_with(|| Value::from(now.as_str()));
        payload
            .entry("status")
            .or_insert_with(|| Value::from(status_pre.as_str()));
        payload.insert(
            "_company_slug".to_string(),
            Value::from(extract_company_slug(&url_normalized)),
        );

        let normalized = normalize(Value::Object(payload));
        let extraction = Extraction::from_payload(&normalized);

        let record = ListingRecord {
            platform,
            external_id: listing_key,
            url: url.to_string(),
            url_normalized: url_normalized.clone(),
            content_fingerprint: fingerprint.clone(),
            last_seen: now.clone(),
            created_at: now.clone(),
            status: extraction.status.unwrap_or(status_pre),
            company: extraction.company,
            title: extraction.title,
            location: extraction.location,
            work_mode: extraction.work_mode,
            seniority: extraction.seniority,
            salary: extraction.salary,
            application_link: extraction.application_link,
            posting_date: extraction.posting_date,
            score: extraction.score,
            reason: extraction.reason,
            requirements: extraction.requirements,
            technologies: extraction.technologies,
            raw_model_output: Value::Object(normalized),
        };
        self.db.upsert_listing(&record)?;

        self.cache.record(&url_normalized, &fingerprint, url, &now);
        self.cache.save()?;

        Ok(Outcome::Extracted { degraded })
    }
}

fn failure_kind(err: &anyhow::Error) -> &'static str {
    if let Some(fetch) = err.downcast_ref::<FetchError>() {
        fetch.kind()
    } else if err.downcast_ref::<ModelUnavailable>().is_some() {
        "model"
    } else if err.downcast_ref::<rusqlite::Error>().is_some() {
        "store"
    } else {
        "other"
    }
}

/// SHA-256 of the exact fetched text, hex encoded.
pub fn content_fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
