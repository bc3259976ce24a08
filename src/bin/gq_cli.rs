//! One-shot CLI for the governed query engine.
//!
//! Loads a pattern library, reads a request JSON, runs the pipeline once
//! against a fixed authorization grant, and prints the rendered outcome.
//!
//! ```text
//! gq_cli --library patterns.yaml --request request.json --authorized AR,AP
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use governed_query::{
    Engine, EngineConfig, EngineResult, Module, PatternStore, ReportRequestSpec, StaticAuthority,
};

#[derive(Parser, Debug)]
#[command(name = "gq_cli", about = "Governed query composition engine — one-shot run")]
struct Cli {
    /// Pattern library YAML file.
    #[arg(long)]
    library: PathBuf,

    /// Request JSON file ({report_type, entities, params}).
    #[arg(long)]
    request: PathBuf,

    /// Comma-separated module grant for this run, e.g. "AR,AP".
    #[arg(long, default_value = "")]
    authorized: String,

    /// Override the authorization timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let store = PatternStore::load_from_path(&cli.library)
        .with_context(|| format!("loading pattern library {}", cli.library.display()))?;

    let request_json = std::fs::read_to_string(&cli.request)
        .with_context(|| format!("reading request {}", cli.request.display()))?;
    let spec: ReportRequestSpec =
        serde_json::from_str(&request_json).context("parsing request JSON")?;
    let request = spec.into_request();

    let granted = cli
        .authorized
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(Module::new);
    let authority = Arc::new(StaticAuthority::new(granted));

    let mut config = EngineConfig::from_env();
    if let Some(ms) = cli.timeout_ms {
        config.authority_timeout = std::time::Duration::from_millis(ms);
    }

    let engine = Engine::new(Arc::new(store), authority, config);
    let result = engine.generate(&request).await;

    let banner = match &result {
        EngineResult::Artifact(_) => "composed".green().bold(),
        EngineResult::Refusal(_) => "refused".red().bold(),
        EngineResult::ClarificationNeeded(_) => "clarification needed".yellow().bold(),
    };
    eprintln!("[{banner}] request {}", request.request_id);
    print!("{}", result.render());

    Ok(())
}
