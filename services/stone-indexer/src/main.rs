mod cli;
mod config;
mod loop_;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Config;
use loop_::IndexerLoop;
use stone_chain::{RpcChainAdapter, RpcChainAdapterConfig};
use stone_pipeline::{IndexerError, PushBus};
use stone_store::PgProjectionStore;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let store = Arc::new(PgProjectionStore::new(config.database_url.clone()));

    match cli.command() {
        Command::Migrate => match store.run_migrations().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(error = %err, "migration failed");
                ExitCode::from(1)
            }
        },
        Command::Run => run(config, store).await,
    }
}

async fn run(config: Config, store: Arc<PgProjectionStore>) -> ExitCode {
    let chain = Arc::new(RpcChainAdapter::new(RpcChainAdapterConfig {
        base_url: config.rpc_endpoint.clone(),
        ..RpcChainAdapterConfig::default()
    }));
    let push = PushBus::default();

    let indexer_loop = IndexerLoop::new(
        chain,
        store,
        push,
        config.factory_address.clone(),
        config.chain_id.clone(),
        config.start_block_height,
        config.batch_size,
        Duration::from_millis(config.poll_interval_ms),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut shutdown_watcher = shutdown_rx.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("shutdown signal received, finishing the in-flight block");
        let _ = shutdown_tx.send(true);
    });

    // The grace period only bounds the wait *after* shutdown is requested —
    // it must not cut off a healthy, long-running indexer.
    let grace_period = Duration::from_secs(30);
    let run_fut = indexer_loop.run(shutdown_rx);
    tokio::pin!(run_fut);

    let result = tokio::select! {
        result = &mut run_fut => result,
        _ = shutdown_watcher.changed() => match tokio::time::timeout(grace_period, &mut run_fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("shutdown grace period exceeded, forcing exit");
                return ExitCode::from(1);
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_code_for(&err),
    }
}

fn exit_code_for(err: &IndexerError) -> ExitCode {
    tracing::error!(error = %err, "indexer loop stopped");
    match err {
        IndexerError::FatalConfig(_) => ExitCode::from(1),
        IndexerError::InvariantViolation(_) => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
