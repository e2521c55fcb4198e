/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tonic::transport::Server;
use tracing::{error, info, warn};

use lifering::broker::service::BrokerServiceImpl;
use lifering::broker::Broker;
use lifering::config::BrokerConfig;
use lifering::proto::lifering_v1::broker_service_server::BrokerServiceServer;

// ── CLI argument definition ───────────────────────────────────────────────────

/// LifeRing broker: partitions the world and drives the worker ring.
///
/// Example:
///   lifering-broker -p 8030 -c broker.yaml -w 127.0.0.1:8031 -w 127.0.0.1:8032
#[derive(Debug, Parser)]
#[command(
    name = "lifering-broker",
    about = "LifeRing broker – distributed Game of Life coordinator",
    long_about = None,
)]
struct Cli {
    /// Port for the BrokerService gRPC server.
    #[arg(short = 'p', long = "port", default_value_t = 8030)]
    port: u16,

    /// Path to the YAML broker configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Worker node address (host:port).  Repeatable; overrides `workers`
    /// from the configuration file.
    #[arg(short = 'w', long = "worker")]
    workers: Vec<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(port = cli.port, config = ?cli.config, workers = ?cli.workers, "LifeRing broker starting up...");

    if let Err(e) = run(cli).await {
        error!("Broker failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ── Load configuration ────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => BrokerConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using defaults");
            BrokerConfig::default()
        }
    };
    if !cli.workers.is_empty() {
        config.workers = cli.workers;
    }
    info!(workers = ?config.workers, "Default worker pool");

    let max_message_bytes = config.max_message_bytes;
    let broker = Arc::new(Broker::with_grpc(config));
    let shutdown = broker.shutdown_token();

    // ── Serve ─────────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("0.0.0.0:{}", cli.port)
        .parse()
        .context("Invalid listen address")?;
    let service = BrokerServiceServer::new(BrokerServiceImpl::new(Arc::clone(&broker)))
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes);

    info!(%addr, "BrokerService listening");

    let stop = {
        let broker = Arc::clone(&broker);
        async move {
            tokio::select! {
                _ = shutdown.cancelled() => info!("Shutdown requested by client"),
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received");
                    broker.shutdown().await;
                }
            }
        }
    };

    Server::builder()
        .add_service(service)
        .serve_with_shutdown(addr, stop)
        .await
        .with_context(|| format!("BrokerService on {addr} failed"))?;

    info!("LifeRing broker stopped");
    Ok(())
}
