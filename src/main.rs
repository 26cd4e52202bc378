mod cache;
mod classify;
mod config;
mod db;
mod export;
mod fetch;
mod llm;
mod models;
mod normalize;
mod pipeline;
mod ratelimit;
mod reduce;
mod urls;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use cache::FingerprintCache;
use config::{load_prompt, RunConfig, DEFAULT_CONFIG_PATH, DEFAULT_PROMPT_PATH};
use db::Database;
use fetch::TextFetcher;
use llm::{GenerationOptions, OllamaProvider, DEFAULT_BASE_URL, DEFAULT_MODEL};
use pipeline::{Pipeline, PipelineOptions};

#[derive(Parser)]
#[command(name = "jobscan")]
#[command(about = "Job listing ingestion - fetch, extract with a local model, and track changes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for the database and fingerprint cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory for CSV exports
    #[arg(long, global = true, default_value = "output")]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Process every configured listing URL, then export
    Run(RunArgs),

    /// Export stored listings to CSV
    Export,
}

#[derive(Args)]
struct RunArgs {
    /// JSON file with `urls_vagas`
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Prompt template with $texto and $url placeholders
    #[arg(short, long, default_value = DEFAULT_PROMPT_PATH)]
    prompt: PathBuf,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args)]
struct ModelArgs {
    /// Ollama model name
    #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    ollama_url: String,

    /// Generation timeout in seconds
    #[arg(long, env = "OLLAMA_TIMEOUT", default_value = "900")]
    timeout: u64,

    /// Maximum tokens to generate
    #[arg(long, env = "OLLAMA_NUM_PREDICT", default_value = "450")]
    num_predict: u32,

    /// Sampling temperature
    #[arg(long, env = "OLLAMA_TEMPERATURE", default_value = "0.2")]
    temperature: f32,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobscan=info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(Database::default_data_dir);

    match cli.command {
        Commands::Init => {
            let db = Database::open(&data_dir)?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Run(args) => {
            run_pipeline(&data_dir, &cli.output, args)?;
        }

        Commands::Export => {
            let db = Database::open(&data_dir)?;
            db.init()?;
            run_export(&db, &cli.output)?;
        }
    }

    Ok(())
}

fn run_pipeline(data_dir: &Path, output: &Path, args: RunArgs) -> Result<()> {
    let config = RunConfig::load(&args.config)?;
    if config.urls.is_empty() {
        println!("No URLs found in {} (urls_vagas).", args.config.display());
        return Ok(());
    }
    let prompt = load_prompt(&args.prompt)?;

    let db = Database::open(data_dir)?;
    db.init()?;
    let cache = FingerprintCache::in_dir(data_dir);

    let fetcher = TextFetcher::new(config.fetch_settings())?;
    let model = OllamaProvider::new(
        &args.model.ollama_url,
        &args.model.model,
        Duration::from_secs(args.model.timeout),
    )?;

    tracing::info!(
        urls = config.urls.len(),
        model = %args.model.model,
        ollama_url = %args.model.ollama_url,
        database = %db.path().display(),
        cached_fingerprints = cache.len(),
        "Starting run"
    );
    if cache.is_empty() {
        tracing::debug!("Fingerprint cache is empty, relying on stored listings only");
    }

    let options = PipelineOptions {
        max_chars: config.max_chars(),
        generation: GenerationOptions {
            temperature: args.model.temperature,
            num_predict: args.model.num_predict,
            ..Default::default()
        },
    };

    let summary = Pipeline::new(fetcher, model, &db, cache, prompt, options).run(&config.urls);

    println!(
        "Processed {} URLs in {}s: {} extracted ({} degraded), {} unchanged, {} cache hits, {} failed.",
        config.urls.len(),
        summary.elapsed.as_secs(),
        summary.extracted,
        summary.degraded,
        summary.unchanged,
        summary.cache_hits,
        summary.failed,
    );

    run_export(&db, output)
}

fn run_export(db: &Database, output: &Path) -> Result<()> {
    match export::export_listings(db, output)? {
        Some(summary) => {
            println!("Exported all: {} (rows={})", summary.all_path.display(), summary.all_rows);
            println!(
                "Exported filtered: {} (rows={})",
                summary.filtered_path.display(),
                summary.filtered_rows
            );
        }
        None => println!("No listings stored yet."),
    }
    Ok(())
}
