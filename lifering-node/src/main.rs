/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tonic::transport::Server;
use tracing::{error, info};

use lifering::node::service::NodeServiceImpl;
use lifering::node::WorkerNode;
use lifering::proto::lifering_v1::node_service_server::NodeServiceServer;

/// LifeRing worker node: computes one row band per run.
///
/// Example:
///   lifering-node --port 8031
#[derive(Debug, Parser)]
#[command(
    name = "lifering-node",
    about = "LifeRing worker node – hosts one partition of the world",
    long_about = None,
)]
struct Cli {
    /// Port for the NodeService gRPC server.
    #[arg(short = 'p', long = "port", default_value_t = 8031)]
    port: u16,

    /// gRPC encode/decode limit in bytes.
    #[arg(long = "max-message-bytes", default_value_t = 64 * 1024 * 1024)]
    max_message_bytes: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Worker node failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", cli.port)
        .parse()
        .context("Invalid listen address")?;

    let node = Arc::new(WorkerNode::new());
    let shutdown = node.shutdown_token();
    let service = NodeServiceServer::new(NodeServiceImpl::new(Arc::clone(&node)))
        .max_decoding_message_size(cli.max_message_bytes)
        .max_encoding_message_size(cli.max_message_bytes);

    info!(%addr, max_message_bytes = cli.max_message_bytes, "NodeService listening");

    let stop = async move {
        tokio::select! {
            _ = shutdown.cancelled() => info!("Shutdown requested by broker"),
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                node.shutdown();
            }
        }
    };

    Server::builder()
        .add_service(service)
        .serve_with_shutdown(addr, stop)
        .await
        .with_context(|| format!("NodeService on {addr} failed"))?;

    info!("Worker node stopped");
    Ok(())
}
