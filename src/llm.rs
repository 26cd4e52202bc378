use anyhow::{anyhow, Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::UNKNOWN_LABEL;

pub const DEFAULT_MODEL: &str = "qwen2.5:7b";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const STOP_SEQUENCES: &[&str] = &["\n\n", "```"];
const RAW_AUDIT_LIMIT: usize = 4000;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\$|\{([_A-Za-z][_A-Za-z0-9]*)\}|([_A-Za-z][_A-Za-z0-9]*))")
        .expect("valid placeholder regex")
});

// --- Provider trait ---

/// A local generation endpoint that answers with newline-delimited JSON.
pub trait ModelProvider {
    fn open_stream(&self, request: &GenerateRequest) -> Result<Box<dyn BufRead>>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_predict: u32,
    pub heartbeat: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_predict: 450,
            heartbeat: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    stop: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
    options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(model: &str, prompt: String, options: &GenerationOptions) -> Self {
        Self {
            model: model.to_string(),
            prompt,
            stream: true,
            format: "json".to_string(),
            options: GenerateOptions {
                temperature: options.temperature,
                num_predict: options.num_predict,
                stop: STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

// --- Ollama provider ---

#[derive(Debug)]
pub struct OllamaProvider {
    base_url: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OllamaProvider {
    /// `timeout` bounds the whole generation; connecting is capped at 10s.
    pub fn new(base_url: &str, model_id: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("Failed to build Ollama HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            client,
        })
    }
}

impl ModelProvider for OllamaProvider {
    fn open_stream(&self, request: &GenerateRequest) -> Result<Box<dyn BufRead>> {
        let endpoint = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .json(request)
            .send()
            .with_context(|| format!("Failed to send request to Ollama at {endpoint}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Ollama request failed with status {}: {}",
                status,
                error_text
            ));
        }

        Ok(Box::new(BufReader::new(response)))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Model output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// The stream closed without a single text fragment.
    EmptyStream,
    /// Text arrived but no JSON object could be recovered from it.
    Unparseable,
}

impl Degradation {
    pub fn reason(&self) -> &'static str {
        match self {
            Degradation::EmptyStream => "Ollama não retornou chunks (resposta vazia).",
            Degradation::Unparseable => "LLM retornou texto não-JSON.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Structured(Map<String, Value>),
    Degraded { kind: Degradation, raw: String },
}

impl ModelOutput {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ModelOutput::Degraded { .. })
    }

    /// The payload handed to normalization. Degraded output becomes a
    /// well-formed record with safe defaults and the raw text for audit.
    pub fn into_payload(self, url: &str) -> Map<String, Value> {
        match self {
            ModelOutput::Structured(map) => map,
            ModelOutput::Degraded { kind, raw } => {
                let payload = json!({
                    "cargo": null,
                    "empresa": null,
                    "localidade": null,
                    "tipo_trabalho": UNKNOWN_LABEL,
                    "senioridade": UNKNOWN_LABEL,
                    "requisitos_principais": [],
                    "tecnologias": [],
                    "salario": null,
                    "link_candidatura": null,
                    "data_publicacao": null,
                    "score_0_100": 0,
                    "motivo_curto": kind.reason(),
                    "_raw_llm": raw,
                    "url": url,
                });
                match payload {
                    Value::Object(map) => map,
                    _ => Map::new(),
                }
            }
        }
    }
}

// --- Extraction ---

/// Safe `$name` / `${name}` substitution. Unknown names stay verbatim, `$$` is `$`.
pub fn render_prompt(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }
            let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
            vars.iter()
                .find(|(key, _)| Some(*key) == name)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

/// Ask the model for a structured record of `reduced_text`.
///
/// Transport failures are errors; anything the model sends back, including
/// nothing at all, yields a [`ModelOutput`].
pub fn extract_listing(
    provider: &dyn ModelProvider,
    options: &GenerationOptions,
    prompt_template: &str,
    reduced_text: &str,
    url: &str,
) -> Result<ModelOutput> {
    let prompt = render_prompt(prompt_template, &[("texto", reduced_text), ("url", url)]);
    let request = GenerateRequest::new(provider.model_name(), prompt, options);

    tracing::info!(
        model = provider.model_name(),
        prompt_chars = request.prompt().chars().count(),
        "Model generation started"
    );
    let stream = provider.open_stream(&request)?;
    let read = read_stream(stream, options.heartbeat)?;
    tracing::debug!(
        fragments = read.fragments.len(),
        heartbeats = read.heartbeats,
        "Model generation finished"
    );

    Ok(interpret_fragments(&read.fragments))
}

struct StreamRead {
    fragments: Vec<String>,
    heartbeats: usize,
}

/// Drain the stream while a side thread logs a heartbeat every `heartbeat`.
fn read_stream(reader: Box<dyn BufRead>, heartbeat: Duration) -> Result<StreamRead> {
    let received = AtomicUsize::new(0);
    let started = Instant::now();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let received = &received;
        let ticker = scope.spawn(move || {
            let mut ticks = 0;
            while let Err(mpsc::RecvTimeoutError::Timeout) = stop_rx.recv_timeout(heartbeat) {
                ticks += 1;
                tracing::info!(
                    elapsed_secs = started.elapsed().as_secs(),
                    chars_received = received.load(Ordering::Relaxed),
                    "Model still generating"
                );
            }
            ticks
        });

        let result = assemble_fragments(reader, received);
        drop(stop_tx);
        let heartbeats = ticker.join().unwrap_or(0);
        result.map(|fragments| StreamRead {
            fragments,
            heartbeats,
        })
    })
}

/// Collect text fragments in arrival order, up to the first `done` message.
/// Lines that are not valid chunks are skipped.
fn assemble_fragments<R: BufRead>(mut reader: R, received: &AtomicUsize) -> Result<Vec<String>> {
    let mut fragments = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .context("Model stream interrupted")?;
        if read == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let chunk: StreamChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Skipping malformed stream line: {e}");
                continue;
            }
        };

        if let Some(error) = chunk.error {
            return Err(anyhow!("Ollama reported an error: {error}"));
        }

        if let Some(fragment) = chunk.response.filter(|f| !f.is_empty()) {
            received.fetch_add(fragment.chars().count(), Ordering::Relaxed);
            fragments.push(fragment);
        }

        if chunk.done {
            break;
        }
    }

    Ok(fragments)
}

/// Whole-text parse first, then the first-`{`-to-last-`}` substring.
///
/// The substring fallback cannot tell braces inside string values from
/// structure, so trailing chatter containing `}` defeats it.
pub fn interpret_fragments(fragments: &[String]) -> ModelOutput {
    if fragments.is_empty() {
        return ModelOutput::Degraded {
            kind: Degradation::EmptyStream,
            raw: String::new(),
        };
    }

    let joined = fragments.concat();
    let raw = joined.trim();

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return ModelOutput::Structured(map);
    }

    if let Some(map) = parse_braced_substring(raw) {
        tracing::debug!("Recovered JSON object from surrounding text");
        return ModelOutput::Structured(map);
    }

    ModelOutput::Degraded {
        kind: Degradation::Unparseable,
        raw: raw.chars().take(RAW_AUDIT_LIMIT).collect(),
    }
}

fn parse_braced_substring(text: &str) -> Option<Map<String, Value>> {
    let text = text.replace("```json", "").replace("```", "");
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
