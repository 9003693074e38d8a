// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fmd` — the Foreman scheduler daemon.
//!
//! Usage: `fmd [config.toml]`. Startup is all-or-nothing: a bad config,
//! missing priority classes, or an unbindable listener aborts the process.

use fm_adapters::{EventSink, InMemoryCoordination, InMemoryRepository, JobRepository};
use fm_core::SystemClock;
use fm_daemon::{Config, ConfigError, ExecutorApi, LeaderConfig, TracingSink};
use fm_jobdb::JobDb;
use fm_scheduler::{
    CoordinatedLeader, CycleDriver, ExecutorRegistry, FirstFit, LeaderController, Publisher,
    StandaloneLeader,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("cannot wait for shutdown signal: {0}")]
    Signal(std::io::Error),
}

fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("foreman.toml"));
    match run(config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fmd: {e}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(config_path: PathBuf) -> Result<(), DaemonError> {
    let config = Config::load(&config_path)?;
    let _log_guard = init_logging(&config)?;
    info!(config = %config_path.display(), "fmd starting");

    let shutdown = CancellationToken::new();
    let mut workers = Vec::new();

    let db = Arc::new(JobDb::new(config.priority_classes.clone()));
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryRepository::new());
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink::new());
    let registry = Arc::new(ExecutorRegistry::new(config.max_contexts_per_executor));
    let publisher = Arc::new(Publisher::new(sink.clone()));

    let leader: Arc<dyn LeaderController> = match &config.leader {
        LeaderConfig::Standalone => Arc::new(StandaloneLeader::new()),
        LeaderConfig::ClusterCoordinated { holder, lease_refresh_ms } => {
            let holder = holder
                .clone()
                .or_else(|| std::env::var("HOSTNAME").ok())
                .unwrap_or_else(|| "fmd".to_string());
            let coordinated = Arc::new(CoordinatedLeader::new(holder));
            workers.push(tokio::spawn(coordinated.clone().run(
                Arc::new(InMemoryCoordination::new()),
                Duration::from_millis(*lease_refresh_ms),
                shutdown.clone(),
            )));
            coordinated
        }
    };

    workers.push(tokio::spawn(publisher.clone().run_markers(
        leader.clone(),
        config.event_partitions,
        Duration::from_millis(config.partition_marker_period_ms),
        shutdown.clone(),
    )));

    let driver = CycleDriver::new(
        db.clone(),
        repo.clone(),
        publisher,
        leader.clone(),
        registry.clone(),
        Arc::new(FirstFit::new()),
        SystemClock,
        config.cycle_config(),
        config.node_id_label.clone(),
    );
    workers.push(tokio::spawn(driver.run(shutdown.clone())));

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr: config.listen_addr.clone(), source })?;
    let api = Arc::new(ExecutorApi::new(db, repo, registry, leader, sink, SystemClock));
    workers.push(tokio::spawn(api.serve(listener, shutdown.clone())));

    info!(%addr, "executor api listening");
    tokio::signal::ctrl_c().await.map_err(DaemonError::Signal)?;
    info!("shutdown signal received, draining");
    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

fn init_logging(config: &Config) -> Result<LogGuard, DaemonError> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| ConfigError::Invalid(format!("bad log_filter: {e}")))?;
    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fmd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}
