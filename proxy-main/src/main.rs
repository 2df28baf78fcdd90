// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Sharding proxy entry point

use async_trait::async_trait;
use clap::Parser;
use proxy_catalog::Catalog;
use proxy_common::Config;
use proxy_mysql::resultset::QueryResult;
use proxy_mysql::BindVariable;
use proxy_server::{BackendDispatcher, CancelFlag, ProxyServer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "conf/proxy.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Acknowledges every command without touching a backend. The deployment
/// wires a pooled MySQL client here; this keeps the binary runnable for
/// protocol and routing work.
struct AckDispatcher;

#[async_trait]
impl BackendDispatcher for AckDispatcher {
    async fn dispatch(
        &self,
        data_source: &str,
        sql: &str,
        _binds: &[BindVariable],
        cancel: &CancelFlag,
    ) -> proxy_common::Result<QueryResult> {
        cancel.check()?;
        info!(%data_source, %sql, "dispatch");
        Ok(QueryResult::Ok {
            affected_rows: 0,
            last_insert_id: 0,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("starting sharding proxy");
    info!("version: {}", proxy_common::version::VERSION);

    let config = load_config(&args.config);
    config.validate()?;
    info!(port = config.query_port, "configuration loaded");

    let catalog = Arc::new(Catalog::from_config(&config)?);
    let server = Arc::new(ProxyServer::new(
        config,
        catalog,
        Arc::new(AckDispatcher),
    ));

    let run_server = server.clone();
    tokio::spawn(async move {
        if let Err(e) = run_server.run().await {
            tracing::error!(error = %e, "server terminated");
        }
    });

    wait_for_shutdown().await;
    info!(
        bytes_written = server.write_flow(),
        "shutting down sharding proxy"
    );
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(path: &PathBuf) -> Config {
    if path.exists() {
        match Config::from_file(path) {
            Ok(config) => return config,
            Err(e) => warn!(error = %e, "failed to load config, using defaults"),
        }
    } else {
        warn!(?path, "config file not found, using defaults");
    }
    Config::default()
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
