use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::models::Platform;

static JOBS_PATH_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/jobs/(\d+)").expect("valid jobs path regex"));
static LONG_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{6,})").expect("valid number regex"));

/// Canonical form used for dedupe: trimmed, no fragment, no trailing slash
/// (unless only the scheme root would remain). The rest of the text is kept
/// exactly as written.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split_once('#').map_or(trimmed, |(head, _)| head);
    let root_len = without_fragment.find("://").map_or(0, |i| i + 3);

    // Repeated slashes are trimmed too so the result is a fixed point.
    let mut normalized = without_fragment.to_string();
    while normalized.ends_with('/') && normalized.len() > root_len {
        normalized.pop();
    }

    normalized
}

/// Lowercased host of a URL, or an empty string if it has none.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .unwrap_or_default()
}

pub fn detect_platform(url: &str) -> Platform {
    let host = host_of(url);
    if host.contains("gupy.io") {
        Platform::Gupy
    } else if host.contains("linkedin.com") {
        Platform::Linkedin
    } else if host.contains("indeed.") {
        Platform::Indeed
    } else {
        Platform::Unknown
    }
}

/// Stable identifier from the URL path.
///
/// `https://empresa.gupy.io/jobs/10803174` yields `10803174`. Otherwise the
/// first run of 6+ digits, then the last path segment, then the bare host.
/// Empty when the URL cannot be parsed at all.
pub fn extract_job_id(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let path = parsed.path().to_lowercase();

    if let Some(caps) = JOBS_PATH_ID.captures(&path) {
        return caps[1].to_string();
    }

    if let Some(caps) = LONG_NUMBER.captures(&path) {
        return caps[1].to_string();
    }

    if let Some(segment) = path.split('/').filter(|s| !s.is_empty()).last() {
        return segment.to_string();
    }

    parsed.host_str().map(str::to_lowercase).unwrap_or_default()
}

/// `empresa.gupy.io` -> `empresa`; any other host is returned as is.
pub fn extract_company_slug(url: &str) -> String {
    let host = host_of(url);
    match host.strip_suffix(".gupy.io") {
        Some(slug) => slug.to_string(),
        None => host,
    }
}
