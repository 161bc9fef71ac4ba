use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gitstat_core::{CmdGit, FileCache, GitOps, PlainSealer, SecretSealer};
use gitstat_host::{
    config::Config,
    server,
    service::{RepoService, StatsService},
    AppState,
};
use gitstat_lib::Store;
use gitstat_store::SqliteStore;
use gitstat_worker::{default_handlers, TaskQueue, WorkerPool};

#[derive(Debug, Parser)]
#[command(name = "gitstat-host", about = "Repository statistics service", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CONFIG_PATH", default_value = "configs/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (config, config_missing) = if cli.config.exists() {
        (Config::load(&cli.config)?, false)
    } else {
        (Config::default_with_env(), true)
    };

    let _log_guard = gitstat_host::log::init_tracing(&config.log);
    if config_missing {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }
    info!("starting gitstat server");

    ensure_directories(&config)?;

    if config.storage.kind != "sqlite" {
        anyhow::bail!("unsupported storage type: {}", config.storage.kind);
    }
    let store: Arc<dyn Store> =
        Arc::new(SqliteStore::open(std::path::Path::new(&config.storage.sqlite.path))?);
    info!(path = %config.storage.sqlite.path, "database initialized");

    let git: Arc<dyn GitOps> = Arc::new(CmdGit::new(config.git.command_path.clone()));
    if git.is_available().await {
        info!("git command available");
    } else {
        warn!("git command not available, some features may not work");
    }

    let sealer: Arc<dyn SecretSealer> = Arc::new(PlainSealer);
    let cache = Arc::new(FileCache::new(
        Arc::clone(&store),
        config.workspace.stats_dir.clone(),
    ));

    let queue = Arc::new(TaskQueue::new(
        config.worker.queue_buffer,
        Arc::clone(&store),
    ));
    let handlers = default_handlers(
        Arc::clone(&store),
        Arc::clone(&git),
        Arc::clone(&cache),
        Arc::clone(&sealer),
    );
    let pool = Arc::new(WorkerPool::new(
        config.worker.total_workers(),
        Arc::clone(&queue),
        Arc::clone(&store),
        handlers,
    ));
    pool.start();
    info!(workers = config.worker.total_workers(), "worker pool started");

    let shutdown = CancellationToken::new();

    let state = AppState {
        repos: Arc::new(RepoService::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&git),
            Arc::clone(&sealer),
            config.workspace.cache_dir.clone(),
            shutdown.clone(),
        )),
        stats: Arc::new(StatsService::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&git),
            shutdown.clone(),
        )),
        store: Arc::clone(&store),
    };

    let server_handle = tokio::spawn(server::serve(
        state,
        config.bind_addr(),
        shutdown.clone(),
    ));

    wait_for_signal().await;
    info!("shutting down server...");
    shutdown.cancel();

    // HTTP drain is bounded; pool shutdown is unbounded but monitored.
    match tokio::time::timeout(Duration::from_secs(30), server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!(%err, "server exited with error"),
        Ok(Err(err)) => error!(%err, "server task panicked"),
        Err(_) => error!("server forced to shutdown after 30s"),
    }

    pool.stop().await;
    info!("server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn ensure_directories(config: &Config) -> anyhow::Result<()> {
    for dir in [
        &config.workspace.base_dir,
        &config.workspace.cache_dir,
        &config.workspace.stats_dir,
    ] {
        std::fs::create_dir_all(dir)
            .map_err(|err| anyhow::anyhow!("failed to create directory {dir}: {err}"))?;
    }
    Ok(())
}
