//! Kestrel host binary.
//!
//! Subcommands: `serve` (default) starts the HTTP server, `index` checks a
//! corpus index produced by the external ingesters, `status` prints the
//! loaded configuration. Exit codes: 0 success, 1 configuration error, 2
//! runtime error at startup, 3 generation/embedding service unreachable in
//! strict mode.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kestrel::cache::Cache;
use kestrel::config::{KestrelConfig, DEFAULT_CONFIG_PATH};
use kestrel::evidence::EvidenceStore;
use kestrel::memory::CollaborationMemory;
use kestrel::run::RunEngine;
use kestrel::server::{self, AppState};
use kestrel::workers::WorkerRegistry;
use kestrel_llm::{GenerationProvider, OllamaProvider};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Local OSINT analysis platform")]
struct Cli {
    /// Path to the configuration document.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (default).
    Serve {
        /// Fail startup when the generation service is unreachable.
        #[arg(long)]
        strict: bool,
    },
    /// Verify one corpus index (rebuilding is delegated to the ingesters).
    Index {
        #[arg(long)]
        corpus: String,
    },
    /// Print the loaded configuration and exit.
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KESTREL_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match KestrelConfig::load_or_default(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve { strict: false }) {
        Command::Serve { strict } => serve(config, strict).await,
        Command::Index { corpus } => index(config, &corpus),
        Command::Status => status(config),
    }
}

async fn serve(config: Arc<KestrelConfig>, strict: bool) -> ExitCode {
    let provider: Arc<dyn GenerationProvider> =
        Arc::new(OllamaProvider::new(Some(&config.generation.base_url)));

    if strict {
        if let Err(e) = provider.health_check().await {
            error!("generation service unreachable in strict mode: {}", e);
            return ExitCode::from(3);
        }
    }

    let cache = Arc::new(Cache::new(
        config.cache_dir(),
        Duration::from_secs(config.cache.websearch_ttl_secs),
    ));
    let store = Arc::new(EvidenceStore::open(&config, provider.clone(), cache.clone()));
    let registry = Arc::new(WorkerRegistry::from_config(
        &config,
        provider.clone(),
        cache.clone(),
    ));
    let memory = match CollaborationMemory::open(&config.memory_log_path()) {
        Ok(memory) => Arc::new(memory),
        Err(e) => {
            error!("failed to open collaboration log: {}", e);
            return ExitCode::from(2);
        }
    };

    let engine = Arc::new(RunEngine::new(
        config, provider, cache, store, registry, memory,
    ));

    match server::serve(AppState { engine }).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed to start: {}", e);
            ExitCode::from(2)
        }
    }
}

fn index(config: Arc<KestrelConfig>, corpus_id: &str) -> ExitCode {
    let Some(corpus) = config.corpora.iter().find(|c| c.id == corpus_id) else {
        error!("corpus '{}' is not configured", corpus_id);
        return ExitCode::from(1);
    };
    let dir = config.corpus_index_dir(corpus);
    match kestrel::evidence::index::CorpusIndex::load(&dir, corpus_id) {
        Ok(index) => {
            info!(
                "corpus '{}' ready: {} documents, dimension {}",
                corpus_id,
                index.len(),
                index.dimension()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(
                "corpus '{}' is not usable ({}); rebuild it with the ingester and retry",
                corpus_id, e
            );
            ExitCode::from(2)
        }
    }
}

fn status(config: Arc<KestrelConfig>) -> ExitCode {
    println!("kestrel {}", env!("CARGO_PKG_VERSION"));
    println!("data_dir: {}", config.data_dir.display());
    println!("server: {}", config.server.bind);
    println!("generation: {} (default model {})",
        config.generation.base_url, config.generation.default_model);
    println!("corpora:");
    for corpus in &config.corpora {
        println!(
            "  {} (weight {:.2}, tags: {})",
            corpus.id,
            corpus.reliability_weight,
            corpus.tags.join(", ")
        );
    }
    println!("workers:");
    for worker in &config.workers {
        println!(
            "  {} -> {} (evidence: {}, timeout: {}ms)",
            worker.id, worker.model, worker.requires_evidence, worker.timeout_ms
        );
    }
    ExitCode::SUCCESS
}
