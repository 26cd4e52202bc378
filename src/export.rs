use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::models::{ListingRecord, Status};

pub const ALL_CSV: &str = "vagas_output_all.csv";
pub const FILTERED_CSV: &str = "vagas_output_jr_pleno_ativas.csv";

const FILTER_SENIORITIES: &[&str] = &["junior", "pleno", "mid"];
/// Spreadsheet tools need the BOM to detect UTF-8.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    platform: &'a str,
    job_id: &'a str,
    url: &'a str,
    url_norm: &'a str,
    status: &'a str,
    empresa: Option<&'a str>,
    cargo: Option<&'a str>,
    localidade: Option<&'a str>,
    tipo_trabalho: &'a str,
    senioridade: &'a str,
    salario: Option<&'a str>,
    link_candidatura: Option<&'a str>,
    data_publicacao: Option<&'a str>,
    score_0_100: u8,
    motivo_curto: &'a str,
    requisitos: String,
    tecnologias: String,
    content_hash: &'a str,
    created_at: &'a str,
    last_seen: &'a str,
}

impl<'a> From<&'a ListingRecord> for ExportRow<'a> {
    fn from(listing: &'a ListingRecord) -> Self {
        Self {
            platform: listing.platform.as_str(),
            job_id: &listing.external_id,
            url: &listing.url,
            url_norm: &listing.url_normalized,
            status: listing.status.as_str(),
            empresa: listing.company.as_deref(),
            cargo: listing.title.as_deref(),
            localidade: listing.location.as_deref(),
            tipo_trabalho: &listing.work_mode,
            senioridade: &listing.seniority,
            salario: listing.salary.as_deref(),
            link_candidatura: listing.application_link.as_deref(),
            data_publicacao: listing.posting_date.as_deref(),
            score_0_100: listing.score,
            motivo_curto: &listing.reason,
            requisitos: listing.requirements.join(" | "),
            tecnologias: listing.technologies.join(", "),
            content_hash: &listing.content_fingerprint,
            created_at: &listing.created_at,
            last_seen: &listing.last_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub all_path: PathBuf,
    pub all_rows: usize,
    pub filtered_path: PathBuf,
    pub filtered_rows: usize,
}

fn is_junior_or_mid_active(listing: &ListingRecord) -> bool {
    let seniority = listing.seniority.trim().to_lowercase();
    listing.status == Status::Ativa && FILTER_SENIORITIES.contains(&seniority.as_str())
}

/// Write both CSV views of the store into `output_dir`. `None` when the store is empty.
pub fn export_listings(db: &Database, output_dir: &Path) -> Result<Option<ExportSummary>> {
    let listings = db.list_listings()?;
    if listings.is_empty() {
        tracing::info!("No stored listings, nothing to export");
        return Ok(None);
    }

    let mut seen = HashSet::new();
    let unique: Vec<&ListingRecord> = listings
        .iter()
        .filter(|l| seen.insert((l.platform, l.external_id.as_str())))
        .collect();
    let filtered: Vec<&ListingRecord> = unique
        .iter()
        .copied()
        .filter(|l| is_junior_or_mid_active(l))
        .collect();

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let all_path = output_dir.join(ALL_CSV);
    let filtered_path = output_dir.join(FILTERED_CSV);
    write_csv(&all_path, &unique)?;
    write_csv(&filtered_path, &filtered)?;

    tracing::info!(path = %all_path.display(), rows = unique.len(), "Exported all listings");
    tracing::info!(
        path = %filtered_path.display(),
        rows = filtered.len(),
        "Exported active junior/mid listings"
    );

    Ok(Some(ExportSummary {
        all_path,
        all_rows: unique.len(),
        filtered_path,
        filtered_rows: filtered.len(),
    }))
}

fn write_csv(path: &Path, listings: &[&ListingRecord]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(UTF8_BOM)?;

    // An empty view still gets a header row.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!listings.is_empty())
        .from_writer(file);
    if listings.is_empty() {
        writer.write_record(HEADER)?;
    }
    for listing in listings {
        writer.serialize(ExportRow::from(*listing))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

const HEADER: &[&str] = &[
    "platform",
    "job_id",
    "url",
    "url_norm",
    "status",
    "empresa",
    "cargo",
    "localidade",
    "tipo_trabalho",
    "senioridade",
    "salario",
    "link_candidatura",
    "data_publicacao",
    "score_0_100",
    "motivo_curto",
    "requisitos",
    "tecnologias",
    "content_hash",
    "created_at",
    "last_seen",
];
