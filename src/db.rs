use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::models::{ListingRecord, Platform, Status, StoredFingerprint, NO_CHANGE_REASON};

pub const DB_FILE: &str = "jobs.db";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let path = data_dir.join(DB_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!(journal_mode = %mode, path = %path.display(), "Database opened");
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Platform data dir, or `./cache` when the platform has none.
    pub fn default_data_dir() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobscan") {
            proj_dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from("cache")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                external_id TEXT NOT NULL,
                url TEXT NOT NULL,
                url_normalized TEXT NOT NULL,
                content_fingerprint TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'duvidosa' CHECK (status IN ('ativa', 'removida', 'duvidosa')),
                company TEXT,
                title TEXT,
                location TEXT,
                work_mode TEXT NOT NULL DEFAULT 'desconhecido',
                seniority TEXT NOT NULL DEFAULT 'desconhecido',
                salary TEXT,
                application_link TEXT,
                posting_date TEXT,
                score INTEGER NOT NULL DEFAULT 0 CHECK (score BETWEEN 0 AND 100),
                reason TEXT NOT NULL DEFAULT '',
                requirements_json TEXT NOT NULL DEFAULT '[]',
                technologies_json TEXT NOT NULL DEFAULT '[]',
                raw_model_output TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                UNIQUE (platform, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_url_normalized ON jobs(url_normalized);
            CREATE INDEX IF NOT EXISTS idx_jobs_last_seen ON jobs(last_seen);
            "#,
        )?;
        Ok(())
    }

    // --- Listing operations ---

    pub fn get_listing(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<StoredFingerprint>> {
        self.conn
            .query_row(
                "SELECT content_fingerprint, last_seen, url_normalized
                 FROM jobs WHERE platform = ?1 AND external_id = ?2",
                params![platform.as_str(), external_id],
                |row| {
                    Ok(StoredFingerprint {
                        content_fingerprint: row.get(0)?,
                        last_seen: row.get(1)?,
                        url_normalized: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to look up listing")
    }

    /// Insert or update by (platform, external_id). `created_at` is only written on insert.
    pub fn upsert_listing(&self, record: &ListingRecord) -> Result<()> {
        let requirements = serde_json::to_string(&record.requirements)?;
        let technologies = serde_json::to_string(&record.technologies)?;
        let raw = serde_json::to_string(&record.raw_model_output)?;

        self.conn
            .execute(
                "INSERT INTO jobs (
                    platform, external_id, url, url_normalized, content_fingerprint, status,
                    company, title, location, work_mode, seniority, salary, application_link,
                    posting_date, score, reason, requirements_json, technologies_json,
                    raw_model_output, created_at, last_seen
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                 ON CONFLICT (platform, external_id) DO UPDATE SET
                    url = excluded.url,
                    url_normalized = excluded.url_normalized,
                    content_fingerprint = excluded.content_fingerprint,
                    status = excluded.status,
                    company = excluded.company,
                    title = excluded.title,
                    location = excluded.location,
                    work_mode = excluded.work_mode,
                    seniority = excluded.seniority,
                    salary = excluded.salary,
                    application_link = excluded.application_link,
                    posting_date = excluded.posting_date,
                    score = excluded.score,
                    reason = excluded.reason,
                    requirements_json = excluded.requirements_json,
                    technologies_json = excluded.technologies_json,
                    raw_model_output = excluded.raw_model_output,
                    last_seen = excluded.last_seen",
                params![
                    record.platform.as_str(),
                    record.external_id,
                    record.url,
                    record.url_normalized,
                    record.content_fingerprint,
                    record.status.as_str(),
                    record.company,
                    record.title,
                    record.location,
                    record.work_mode,
                    record.seniority,
                    record.salary,
                    record.application_link,
                    record.posting_date,
                    record.score,
                    record.reason,
                    requirements,
                    technologies,
                    raw,
                    record.created_at,
                    record.last_seen,
                ],
            )
            .with_context(|| format!("Failed to upsert listing {}", record.url_normalized))?;
        Ok(())
    }

    /// Refresh a listing whose content did not change: bump `last_seen`, zero
    /// the score and write the fixed reason. Extracted fields are left alone.
    pub fn touch_unchanged(
        &self,
        platform: Platform,
        external_id: &str,
        url: &str,
        url_normalized: &str,
        last_seen: &str,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE jobs SET last_seen = ?1, score = 0, reason = ?2, url = ?3, url_normalized = ?4
             WHERE platform = ?5 AND external_id = ?6",
            params![
                last_seen,
                NO_CHANGE_REASON,
                url,
                url_normalized,
                platform.as_str(),
                external_id
            ],
        )?;
        Ok(updated > 0)
    }

    /// Every stored listing, most recently seen first.
    pub fn list_listings(&self) -> Result<Vec<ListingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT platform, external_id, url, url_normalized, content_fingerprint, last_seen,
                    created_at, status, company, title, location, work_mode, seniority, salary,
                    application_link, posting_date, score, reason, requirements_json,
                    technologies_json, raw_model_output
             FROM jobs ORDER BY last_seen DESC, id DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_listing)?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list listings")
    }

    fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<ListingRecord> {
        let platform: String = row.get(0)?;
        let status: String = row.get(7)?;
        let score: i64 = row.get(16)?;
        let requirements: String = row.get(18)?;
        let technologies: String = row.get(19)?;
        let raw: String = row.get(20)?;

        Ok(ListingRecord {
            platform: Platform::from_label(&platform),
            external_id: row.get(1)?,
            url: row.get(2)?,
            url_normalized: row.get(3)?,
            content_fingerprint: row.get(4)?,
            last_seen: row.get(5)?,
            created_at: row.get(6)?,
            status: Status::from_label(&status).unwrap_or(Status::Duvidosa),
            company: row.get(8)?,
            title: row.get(9)?,
            location: row.get(10)?,
            work_mode: row.get(11)?,
            seniority: row.get(12)?,
            salary: row.get(13)?,
            application_link: row.get(14)?,
            posting_date: row.get(15)?,
            score: u8::try_from(score).unwrap_or(0),
            reason: row.get(17)?,
            requirements: serde_json::from_str(&requirements).unwrap_or_default(),
            technologies: serde_json::from_str(&technologies).unwrap_or_default(),
            raw_model_output: serde_json::from_str(&raw).unwrap_or_default(),
        })
    }
}
