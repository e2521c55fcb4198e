/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! driver-sim – manual client for the LifeRing broker.
//!
//! ```text
//! driver-sim ──CompleteTurn──────────► broker ──► worker ring
//!            ◄─GetWorldPerTurn (loop)─
//!            ◄─AliveCellGetter (2 s)──
//!            ──PauseAndResume────────►   (--pause-at)
//!            ──GetWorld──────────────►   (--save)
//!            ──Shutdown──────────────►   (--shutdown)
//! ```
//!
//! Example:
//!   driver-sim --pattern glider --height 16 --width 16 --turns 100 \
//!              -w 127.0.0.1:8031 -w 127.0.0.1:8032 --pause-at 20 --save out.txt

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info, warn};

use lifering::control::Command;
use lifering::proto::lifering_v1 as pb;
use lifering::proto::lifering_v1::broker_service_client::BrokerServiceClient;
use lifering::wire::{grid_from_proto, grid_to_proto};
use lifering::world::WorldGrid;

// ── Patterns ──────────────────────────────────────────────────────────────────

const PATTERNS: &[(&str, &str)] = &[
    ("glider", ".#.\n..#\n###\n"),
    ("blinker", "###\n"),
    ("block", "##\n##\n"),
    ("r-pentomino", ".##\n##.\n.#.\n"),
    ("dead", ".\n"),
];

/// Place `pattern` at row 1, column 1 of an all-dead `height`×`width` world.
fn seed_world(pattern: &WorldGrid, height: usize, width: usize) -> Result<WorldGrid> {
    if pattern.height() + 1 > height || pattern.width() + 1 > width {
        bail!(
            "pattern of {}x{} does not fit a {}x{} world",
            pattern.height(),
            pattern.width(),
            height,
            width
        );
    }
    let mut world = WorldGrid::new(height, width);
    for pos in pattern.alive_cells() {
        world.set(pos.row + 1, pos.col + 1, lifering::world::Cell::Alive);
    }
    Ok(world)
}

fn named_pattern(name: &str) -> Result<WorldGrid> {
    let (_, text) = PATTERNS
        .iter()
        .find(|(n, _)| *n == name)
        .with_context(|| {
            let known: Vec<_> = PATTERNS.iter().map(|(n, _)| *n).collect();
            format!("unknown pattern '{name}' (known: {})", known.join(", "))
        })?;
    Ok(text.parse()?)
}

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "driver-sim", about = "LifeRing client/driver simulator")]
struct Cli {
    /// Broker address (host:port).
    #[arg(short = 'b', long, default_value = "127.0.0.1:8030")]
    broker: String,

    /// Built-in pattern: glider, blinker, block, r-pentomino, dead.
    #[arg(long, default_value = "glider", conflicts_with = "input")]
    pattern: String,

    /// Text world file ('#' alive, '.' dead); its size is used as-is.
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    #[arg(long, default_value_t = 16)]
    height: usize,

    #[arg(long, default_value_t = 16)]
    width: usize,

    #[arg(short = 't', long, default_value_t = 100)]
    turns: u32,

    /// Worker address (repeatable).  None → broker's configured pool.
    #[arg(short = 'w', long = "worker")]
    workers: Vec<String>,

    /// Pause once this generation's telemetry has been received.
    #[arg(long)]
    pause_at: Option<u32>,

    /// How long to stay paused.
    #[arg(long, default_value_t = 3000)]
    pause_ms: u64,

    /// Save the final world (GetWorld) to this text file.
    #[arg(short = 's', long)]
    save: Option<PathBuf>,

    /// Send Shutdown to the broker when done.
    #[arg(long)]
    shutdown: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("driver-sim failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let world = match &cli.input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read world file: {}", path.display()))?;
            text.parse::<WorldGrid>()
                .with_context(|| format!("Malformed world file: {}", path.display()))?
        }
        None => seed_world(&named_pattern(&cli.pattern)?, cli.height, cli.width)?,
    };
    info!(
        height = world.height(),
        width = world.width(),
        alive = world.alive_count(),
        turns = cli.turns,
        "Initial world ready"
    );

    let channel = Endpoint::from_shared(format!("http://{}", cli.broker))
        .context("Invalid broker address")?
        .connect()
        .await
        .with_context(|| format!("Cannot connect to broker at {}", cli.broker))?;
    let client = BrokerServiceClient::new(channel)
        .max_decoding_message_size(usize::MAX)
        .max_encoding_message_size(usize::MAX);

    // ── Start the run ─────────────────────────────────────────────────────────
    let request = pb::RunRequest {
        turns: cli.turns,
        world: Some(grid_to_proto(&world)),
        workers: cli.workers.clone(),
    };
    let mut run = {
        let mut client = client.clone();
        tokio::spawn(async move { client.complete_turn(request).await })
    };
    let ticker = tokio::spawn(alive_ticker(client.clone()));

    // ── Consume telemetry until the run ends ──────────────────────────────────
    let mut telemetry = client.clone();
    let mut last: Option<pb::TelemetryRecord> = None;
    let outcome = loop {
        if last.as_ref().map_or(0, |r| r.turn) >= cli.turns {
            break (&mut run).await;
        }
        tokio::select! {
            record = telemetry.get_world_per_turn(pb::Empty {}) => {
                let record = record.context("GetWorldPerTurn failed")?.into_inner();
                debug!(turn = record.turn, alive = record.alive, flipped = record.flipped.len(), "Generation");
                if cli.pause_at == Some(record.turn) {
                    pause_for(&client, Duration::from_millis(cli.pause_ms)).await?;
                }
                last = Some(record);
            }
            finished = &mut run => break finished,
        }
    };
    ticker.abort();

    let response = outcome
        .context("CompleteTurn task panicked")?
        .context("CompleteTurn failed")?
        .into_inner();
    let final_world = grid_from_proto(response.world.as_ref().context("RunResponse carries no world")?)?;

    info!(
        turn = response.turn,
        alive = final_world.alive_count(),
        "Run complete"
    );
    if let Some(record) = &last {
        if record.turn == response.turn && record.alive != final_world.alive_count() {
            warn!(
                telemetry = record.alive,
                final_world = final_world.alive_count(),
                "Last telemetry record disagrees with the final world"
            );
        }
    }

    // ── Save / shutdown ───────────────────────────────────────────────────────
    if let Some(path) = &cli.save {
        save_world(&client, path).await?;
    }
    if cli.shutdown {
        client
            .clone()
            .shutdown(pb::Empty {})
            .await
            .context("Shutdown failed")?;
        info!("Broker shutdown requested");
    }
    Ok(())
}

/// Report the broker's alive count every two seconds.
async fn alive_ticker(mut client: BrokerServiceClient<Channel>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match client.alive_cell_getter(pb::Empty {}).await {
            Ok(r) => {
                let r = r.into_inner();
                info!(turn = r.turn, alive = r.alive, "Alive cells");
            }
            Err(status) => warn!(%status, "AliveCellGetter failed"),
        }
    }
}

async fn pause_for(client: &BrokerServiceClient<Channel>, pause: Duration) -> Result<()> {
    let mut client = client.clone();
    let ack = client
        .pause_and_resume(pb::PauseRequest {
            command: Command::Pause.to_proto(),
        })
        .await
        .context("Pause failed")?
        .into_inner();
    info!(turn = ack.turn, "Paused");

    tokio::time::sleep(pause).await;

    let ack = client
        .pause_and_resume(pb::PauseRequest {
            command: Command::Resume.to_proto(),
        })
        .await
        .context("Resume failed")?
        .into_inner();
    info!(turn = ack.turn, "Continuing");
    Ok(())
}

async fn save_world(client: &BrokerServiceClient<Channel>, path: &Path) -> Result<()> {
    let response = client
        .clone()
        .get_world(pb::Empty {})
        .await
        .context("GetWorld failed")?
        .into_inner();
    let world = grid_from_proto(response.world.as_ref().context("WorldResponse carries no world")?)?;
    std::fs::write(path, world.to_string())
        .with_context(|| format!("Cannot write {}", path.display()))?;
    info!(turn = response.turn, path = %path.display(), "World saved");
    Ok(())
}
