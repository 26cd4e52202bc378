use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use rand::seq::SliceRandom;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Node};
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::DomainRateLimiter;
use crate::urls::normalize_url;

pub const DEFAULT_READER_PROXY: &str = "https://r.jina.ai/";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/121.0.0.0 Safari/537.36",
];

const READER_MIN_CHARS: usize = 400;
const MIN_TEXT_CHARS: usize = 200;
const BLOCKED_EXCERPT_CHARS: usize = 2000;
const MAX_ATTEMPTS: u32 = 4;
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page removed (HTTP {0})")]
    PageRemoved(u16),
    #[error("access blocked (HTTP {status})")]
    Blocked { status: u16, excerpt: String },
    #[error("text too short after HTML parse ({0} chars)")]
    TooShort(usize),
    #[error("transient network failure: {0}")]
    Transient(#[source] reqwest::Error),
    #[error("HTTP error {0}")]
    Http(u16),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl FetchError {
    /// Short stable label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::PageRemoved(_) => "page_removed",
            FetchError::Blocked { .. } => "blocked",
            FetchError::TooShort(_) => "too_short",
            FetchError::Transient(_) => "transient",
            FetchError::Http(_) => "http",
            FetchError::Request(_) => "request",
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            FetchError::Transient(err)
        } else {
            FetchError::Request(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrigin {
    ReaderProxy,
    Direct,
    /// Served a 401/403; the text is a truncated diagnostic body.
    Blocked(u16),
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub text: String,
    pub origin: PageOrigin,
}

/// Anything that can turn a listing URL into page text.
pub trait PageSource {
    fn fetch_text(&mut self, url: &str) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Prefix for the reader proxy; `None` skips straight to the direct GET.
    pub reader_proxy: Option<String>,
    pub min_interval: Duration,
    pub jitter: Duration,
    pub request_timeout: Duration,
    /// First backoff pause after a transient failure; doubles on each retry.
    pub retry_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            reader_proxy: Some(DEFAULT_READER_PROXY.to_string()),
            min_interval: Duration::from_millis(1200),
            jitter: Duration::from_millis(400),
            request_timeout: Duration::from_secs(25),
            retry_base: Duration::from_secs(1),
        }
    }
}

pub struct TextFetcher {
    client: Client,
    limiter: DomainRateLimiter,
    reader_proxy: Option<String>,
    retry_base: Duration,
}

impl TextFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            limiter: DomainRateLimiter::new(settings.min_interval, settings.jitter),
            reader_proxy: settings.reader_proxy.filter(|p| !p.trim().is_empty()),
            retry_base: settings.retry_base,
        })
    }

    fn try_reader_proxy(&mut self, url: &str) -> Option<String> {
        let proxy = self.reader_proxy.as_deref()?;
        let reader_url = format!("{proxy}{url}");

        self.limiter.wait(&reader_url);
        let response = self
            .client
            .get(&reader_url)
            .header(USER_AGENT, pick_user_agent())
            .send();

        match response {
            Ok(resp) if resp.status().as_u16() == 200 => match resp.text() {
                Ok(text) if text.chars().count() > READER_MIN_CHARS => Some(text),
                Ok(text) => {
                    let chars = text.chars().count();
                    tracing::debug!(url, chars, "Reader proxy text too short");
                    None
                }
                Err(e) => {
                    tracing::debug!(url, "Reader proxy body failed: {e}");
                    None
                }
            },
            Ok(resp) => {
                tracing::debug!(url, status = resp.status().as_u16(), "Reader proxy declined");
                None
            }
            Err(e) => {
                tracing::debug!(url, "Reader proxy unreachable: {e}");
                None
            }
        }
    }

    fn send_direct(&self, url: &str) -> Result<(u16, String), FetchError> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, pick_user_agent())
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "pt-BR,pt;q=0.9,en;q=0.8")
            .send()
            .map_err(FetchError::from_reqwest)?;

        let status = resp.status().as_u16();
        let body = resp.text().map_err(FetchError::from_reqwest)?;
        Ok((status, body))
    }

    /// Direct GET through the rate limiter, retrying transient failures.
    fn get_with_retry(&mut self, url: &str) -> Result<(u16, String), FetchError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_base)
            .with_multiplier(2.0)
            .with_randomization_factor(0.25)
            .with_max_interval(Duration::from_secs(20))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        backoff::retry(policy, || {
            attempt += 1;
            self.limiter.wait(url);
            match self.send_direct(url) {
                Ok(response) => Ok(response),
                Err(err @ FetchError::Transient(_)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(url, attempt, "Transient fetch failure, retrying: {err}");
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .map_err(|e| match e {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

impl PageSource for TextFetcher {
    fn fetch_text(&mut self, url: &str) -> Result<FetchedPage, FetchError> {
        let url = normalize_url(url);

        if let Some(text) = self.try_reader_proxy(&url) {
            return Ok(FetchedPage {
                text,
                origin: PageOrigin::ReaderProxy,
            });
        }

        let (status, body) = self.get_with_retry(&url)?;
        match interpret_response(&url, status, &body) {
            Err(FetchError::Blocked { status, excerpt }) => {
                tracing::warn!(url = %url, status, "Access blocked, keeping diagnostic text");
                Ok(FetchedPage {
                    text: excerpt,
                    origin: PageOrigin::Blocked(status),
                })
            }
            other => other,
        }
    }
}

/// Map a direct response onto page text or a fetch error.
pub fn interpret_response(url: &str, status: u16, body: &str) -> Result<FetchedPage, FetchError> {
    match status {
        404 | 410 => Err(FetchError::PageRemoved(status)),
        401 | 403 => {
            let head: String = body.chars().take(BLOCKED_EXCERPT_CHARS).collect();
            Err(FetchError::Blocked {
                status,
                excerpt: format!("HTTP {status} - possível bloqueio ao acessar: {url}\n\n{head}"),
            })
        }
        200..=299 => {
            let text = html_to_text(body);
            let chars = text.chars().count();
            if chars < MIN_TEXT_CHARS {
                return Err(FetchError::TooShort(chars));
            }
            Ok(FetchedPage {
                text,
                origin: PageOrigin::Direct,
            })
        }
        _ => Err(FetchError::Http(status)),
    }
}

/// Visible text of an HTML document, one text node per line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(el) => SKIPPED_ELEMENTS.contains(&el.name()),
            _ => false,
        });
        if hidden {
            continue;
        }
        let line = text.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    lines.join("\n")
}

pub fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Local HTTP server answering every request from `route`, recording paths.
    struct CannedServer {
        base: String,
        paths: Arc<Mutex<Vec<String>>>,
    }

    impl CannedServer {
        fn start(route: fn(&str) -> (u16, String)) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let paths = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&paths);

            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { continue };
                    let Some(path) = read_request_path(&stream) else { continue };
                    let (status, body) = route(&path);
                    seen.lock().unwrap().push(path);
                    let response = format!(
                        "HTTP/1.1 {status} Canned\r\n\
                         Content-Type: text/html; charset=utf-8\r\n\
                         Content-Length: {}\r\n\
                         Connection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let mut stream = stream;
                    let _ = stream.write_all(response.as_bytes());
                }
            });

            Self { base, paths }
        }

        fn paths(&self) -> Vec<String> {
            self.paths.lock().unwrap().clone()
        }
    }

    fn read_request_path(stream: &TcpStream) -> Option<String> {
        let mut reader = BufReader::new(stream.try_clone().ok()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).ok()?;
        let mut header = String::new();
        loop {
            header.clear();
            match reader.read_line(&mut header) {
                Ok(n) if n > 2 => continue,
                _ => break,
            }
        }
        request_line.split_whitespace().nth(1).map(str::to_string)
    }

    fn local_settings(reader_proxy: Option<String>) -> FetchSettings {
        FetchSettings {
            reader_proxy,
            min_interval: Duration::ZERO,
            jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            retry_base: Duration::from_millis(5),
        }
    }

    fn fetcher_for(server: &CannedServer) -> TextFetcher {
        let proxy = format!("{}/reader/", server.base);
        TextFetcher::new(local_settings(Some(proxy))).unwrap()
    }

    fn reader_text() -> String {
        "Vaga de engenharia extraída pelo leitor.\n".repeat(20)
    }

    fn is_reader(path: &str) -> bool {
        path.starts_with("/reader/")
    }

    fn long_html() -> String {
        let paragraphs: String = (0..20)
            .map(|i| {
                format!("<p>Requisito número {i}: experiência com Rust e sistemas distribuídos.</p>")
            })
            .collect();
        format!(
            "<html><head><title>Vaga</title><style>p {{ color: red; }}</style></head>\
             <body><script>var tracking = 1;</script><noscript>ative o javascript</noscript>\
             <h1>Engenheiro de Software</h1>{paragraphs}</body></html>"
        )
    }

    #[test]
    fn test_html_to_text_drops_script_style_noscript() {
        let text = html_to_text(&long_html());
        assert!(text.contains("Engenheiro de Software"));
        assert!(text.contains("Requisito número 3"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("javascript"));
    }

    #[test]
    fn test_html_to_text_preserves_line_breaks() {
        let text = html_to_text("<div><p>  primeira  </p><p>segunda</p></div>");
        assert_eq!(text, "primeira\nsegunda");
    }

    #[test]
    fn test_interpret_response_page_removed() {
        let err = interpret_response("https://acme.gupy.io/jobs/1", 404, "").unwrap_err();
        assert!(matches!(err, FetchError::PageRemoved(404)));
        assert_eq!(err.kind(), "page_removed");

        let err = interpret_response("https://acme.gupy.io/jobs/1", 410, "gone").unwrap_err();
        assert!(matches!(err, FetchError::PageRemoved(410)));
    }

    #[test]
    fn test_interpret_response_blocked_keeps_truncated_body() {
        let body = "x".repeat(5000);
        let err =
            interpret_response("https://www.linkedin.com/jobs/view/1", 403, &body).unwrap_err();
        match err {
            FetchError::Blocked { status, excerpt } => {
                assert_eq!(status, 403);
                assert!(excerpt.starts_with("HTTP 403"));
                assert!(excerpt.contains("https://www.linkedin.com/jobs/view/1"));
                assert_eq!(excerpt.chars().filter(|c| *c == 'x').count(), 2000);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_interpret_response_too_short() {
        let err = interpret_response("https://example.com/job", 200, "<p>oi</p>").unwrap_err();
        assert!(matches!(err, FetchError::TooShort(2)));
    }

    #[test]
    fn test_interpret_response_other_status_is_http_error() {
        let err = interpret_response("https://example.com/job", 500, "").unwrap_err();
        assert!(matches!(err, FetchError::Http(500)));
        let err = interpret_response("https://example.com/job", 302, "").unwrap_err();
        assert!(matches!(err, FetchError::Http(302)));
    }

    #[test]
    fn test_interpret_response_success() {
        let page = interpret_response("https://example.com/job", 200, &long_html()).unwrap();
        assert_eq!(page.origin, PageOrigin::Direct);
        assert!(page.text.chars().count() >= 200);
    }

    #[test]
    fn test_pick_user_agent_is_from_pool() {
        for _ in 0..10 {
            assert!(USER_AGENTS.contains(&pick_user_agent()));
        }
    }

    #[test]
    fn test_reader_proxy_text_is_preferred() {
        let server = CannedServer::start(|path| {
            if is_reader(path) {
                (200, reader_text())
            } else {
                (200, long_html())
            }
        });
        let mut fetcher = fetcher_for(&server);

        let page = fetcher.fetch_text(&format!("{}/jobs/1/#apply", server.base)).unwrap();
        assert_eq!(page.origin, PageOrigin::ReaderProxy);
        assert_eq!(page.text, reader_text());

        let paths = server.paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0], format!("/reader/{}/jobs/1", server.base));
    }

    #[test]
    fn test_short_reader_text_falls_back_to_direct() {
        let server = CannedServer::start(|path| {
            if is_reader(path) {
                (200, "Texto curto.".to_string())
            } else {
                (200, long_html())
            }
        });
        let mut fetcher = fetcher_for(&server);

        let page = fetcher.fetch_text(&format!("{}/jobs/2", server.base)).unwrap();
        assert_eq!(page.origin, PageOrigin::Direct);
        assert!(page.text.contains("Engenheiro de Software"));
        assert_eq!(
            server.paths(),
            vec![format!("/reader/{}/jobs/2", server.base), "/jobs/2".to_string()]
        );
    }

    #[test]
    fn test_reader_error_status_falls_back_to_direct() {
        let server = CannedServer::start(|path| {
            if is_reader(path) {
                (502, reader_text())
            } else {
                (200, long_html())
            }
        });
        let mut fetcher = fetcher_for(&server);

        let page = fetcher.fetch_text(&format!("{}/jobs/3", server.base)).unwrap();
        assert_eq!(page.origin, PageOrigin::Direct);
    }

    #[test]
    fn test_direct_fetch_without_reader_proxy() {
        let server = CannedServer::start(|_| (200, long_html()));
        let mut fetcher = TextFetcher::new(local_settings(None)).unwrap();

        let page = fetcher.fetch_text(&format!("{}/jobs/4", server.base)).unwrap();
        assert_eq!(page.origin, PageOrigin::Direct);
        assert_eq!(server.paths(), vec!["/jobs/4".to_string()]);
    }

    #[test]
    fn test_http_status_errors_are_not_retried() {
        let server = CannedServer::start(|path| {
            if is_reader(path) {
                (404, String::new())
            } else {
                (503, String::new())
            }
        });
        let mut fetcher = fetcher_for(&server);

        let err = fetcher.fetch_text(&format!("{}/jobs/5", server.base)).unwrap_err();
        assert!(matches!(err, FetchError::Http(503)));
        let direct_hits = server.paths().iter().filter(|p| !is_reader(p)).count();
        assert_eq!(direct_hits, 1);
    }

    #[test]
    fn test_removed_page_is_reported_after_one_direct_hit() {
        let server = CannedServer::start(|_| (404, String::new()));
        let mut fetcher = fetcher_for(&server);

        let err = fetcher.fetch_text(&format!("{}/jobs/6", server.base)).unwrap_err();
        assert!(matches!(err, FetchError::PageRemoved(404)));
        assert_eq!(server.paths().len(), 2);
    }

    #[test]
    fn test_blocked_direct_response_becomes_diagnostic_page() {
        let server = CannedServer::start(|path| {
            if is_reader(path) {
                (500, String::new())
            } else {
                (403, "Acesso negado pelo firewall".to_string())
            }
        });
        let mut fetcher = fetcher_for(&server);

        let page = fetcher.fetch_text(&format!("{}/jobs/7", server.base)).unwrap();
        assert_eq!(page.origin, PageOrigin::Blocked(403));
        assert!(page.text.starts_with("HTTP 403"));
        assert!(page.text.contains("Acesso negado pelo firewall"));
    }

    #[test]
    fn test_transient_failures_stop_after_max_attempts() {
        // Accepts connections but never answers, so every attempt times out.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        let settings = FetchSettings {
            request_timeout: Duration::from_millis(150),
            ..local_settings(None)
        };
        let mut fetcher = TextFetcher::new(settings).unwrap();

        let err = fetcher.fetch_text(&format!("{base}/jobs/8")).unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)), "unexpected error: {err}");
        assert_eq!(err.kind(), "transient");
        assert_eq!(accepted.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    }

    #[test]
    #[ignore] // Requires network access
    fn test_fetch_text_live() {
        let mut fetcher = TextFetcher::new(FetchSettings::default()).expect("client");
        match fetcher.fetch_text("https://example.com/") {
            Ok(page) => assert!(!page.text.is_empty()),
            Err(e) => assert!(matches!(e, FetchError::TooShort(_)), "unexpected error: {e}"),
        }
    }
}
