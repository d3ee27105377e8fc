use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use semindex_indexer::{EngineConfig, IndexOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;

mod http_api;

pub use http_api::router;

#[derive(Parser, Debug)]
#[command(name = "semindex")]
#[command(about = "Semantic indexing and retrieval service for medical documents", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML configuration file; SEMINDEX_* variables override its values
    #[arg(short, long, env = "SEMINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Address to serve the HTTP API on
    #[arg(long, env = "SEMINDEX_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ONNX Runtime logs every session detail at info
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Warn);
    }
    builder.target(env_logger::Target::Stderr).init();
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.print_config {
        let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    let persist_interval = config.indexing.persist_interval();
    let orchestrator = Arc::new(
        IndexOrchestrator::open(config)
            .await
            .context("Failed to open index")?,
    );
    if let Some(interval) = persist_interval {
        orchestrator.spawn_persistence_task(interval);
    }

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    let local_addr = listener.local_addr()?;
    log::info!("Serving semindex API on http://{local_addr}");

    axum::serve(listener, router(Arc::clone(&orchestrator)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Shutting down; saving index");
    orchestrator
        .shutdown()
        .await
        .context("Final index save failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
