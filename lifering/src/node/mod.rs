/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Worker node: owns one row band and advances it generation by generation.
//!
//! ```text
//! Idle ──ProcessSlice──► Computing(1) ─publish─► [gate] ─halo(2)─► Computing(2) … ─► Done
//!                              ▲                                        │
//!                              └────────────── halo(g+1) ◄──────────────┘
//! ```
//!
//! Per generation `g` the loop:
//! 1. takes the halo pair for `g` (the pair for `g = 1` arrives with the
//!    assignment),
//! 2. computes the next band from `[top] + band + [bottom]`,
//! 3. commits `(g, band)` under the node lock so [`WorkerNode::snapshot`]
//!    never sees a half-applied generation,
//! 4. publishes flipped cells, alive count and exported halo rows, waiting
//!    until the broker has drained all three,
//! 5. evaluates the pause gate exactly once before asking for halo `g + 1`.
//!
//! All per-node state lives in one [`WorkerNode`] value; nothing is global,
//! so several nodes can share a process (as the in-process tests do).

pub mod error;
pub mod service;

pub use error::NodeError;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{Command, RunGate};
use crate::halo::HaloPair;
use crate::handoff::Handoff;
use crate::partition::Partition;
use crate::world::rules::{flipped_cells, step_band};
use crate::world::{CellPos, GridError, WorldGrid};

// ── Public data types ─────────────────────────────────────────────────────────

/// Everything a node needs to run its partition to completion.
#[derive(Debug, Clone)]
pub struct SliceAssignment {
    pub partition: Partition,
    pub turns: u32,
    /// Rows `partition.start..partition.end` of the initial world.
    pub band: WorldGrid,
    /// Import halo for generation 1, read from the raw initial world.
    pub initial_halo: HaloPair,
}

/// Read-only view of the last fully-committed generation.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub turn: u32,
    pub partition: Option<Partition>,
    pub band: Arc<WorldGrid>,
}

/// Acknowledgement of a pause/resume command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseAck {
    pub turn: u32,
    pub paused: bool,
}

struct Committed {
    turn: u32,
    partition: Option<Partition>,
    band: Arc<WorldGrid>,
}

// ── WorkerNode ────────────────────────────────────────────────────────────────

pub struct WorkerNode {
    committed: RwLock<Committed>,
    /// Partition index of the slice currently running, if any.
    active: Mutex<Option<usize>>,

    flipped: Handoff<Vec<CellPos>>,
    alive: Handoff<u64>,
    halo_out: Handoff<HaloPair>,
    halo_in: Handoff<HaloPair>,

    gate: RunGate,
    shutdown: CancellationToken,
}

impl WorkerNode {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Committed {
                turn: 0,
                partition: None,
                band: Arc::new(WorldGrid::new(0, 0)),
            }),
            active: Mutex::new(None),
            flipped: Handoff::new("flipped-cells"),
            alive: Handoff::new("alive-count"),
            halo_out: Handoff::new("halo-export"),
            halo_in: Handoff::new("halo-import"),
            gate: RunGate::new(),
            shutdown: CancellationToken::new(),
        }
    }

    // ── Slice lifecycle ───────────────────────────────────────────────────────

    /// Assign a partition and run it for `turns` generations.
    ///
    /// Returns the final band.  The committed state stays readable through
    /// [`snapshot`](Self::snapshot) after this returns.
    ///
    /// # Errors
    /// * [`NodeError::Busy`] – another slice is running on this node.
    /// * [`NodeError::BandShape`] / [`NodeError::Grid`] – malformed assignment.
    /// * [`NodeError::Handoff`] – the broker broke the one-collection-per-
    ///   generation protocol, or the node was shut down mid-run.
    pub async fn process_slice(&self, assignment: SliceAssignment) -> Result<WorldGrid, NodeError> {
        if self.shutdown.is_cancelled() {
            return Err(NodeError::ShuttingDown);
        }
        let SliceAssignment {
            partition,
            turns,
            band,
            initial_halo,
        } = assignment;

        band.ensure_not_empty()?;
        if band.height() != partition.len() {
            return Err(NodeError::BandShape {
                index: partition.index,
                expected: partition.len(),
                rows: band.height(),
            });
        }
        check_halo_width(&initial_halo, band.width())?;

        let _active = self.claim(partition.index)?;
        let mut band = Arc::new(band);
        self.assign_partition(partition, Arc::clone(&band));

        info!(
            partition = partition.index,
            start = partition.start,
            end = partition.end,
            width = band.width(),
            turns,
            "Slice assigned"
        );

        if turns > 0 {
            self.halo_in.deliver(1, initial_halo)?;
        }

        for turn in 1..=turns {
            let halo = self.halo_in.take(turn).await.map_err(|e| self.interrupted(e))?;

            let next = step_band(&band, &halo.top, &halo.bottom)?;
            let flipped = flipped_cells(&band, &next, partition.start);
            let alive = next.alive_count();
            let export = HaloPair::export(&next);
            let next = Arc::new(next);

            self.commit(turn, Arc::clone(&next));
            band = next;

            debug!(
                partition = partition.index,
                turn,
                alive,
                flipped = flipped.len(),
                "Generation committed"
            );

            tokio::try_join!(
                self.flipped.publish(turn, flipped),
                self.alive.publish(turn, alive),
                self.halo_out.publish(turn, export),
            )
            .map_err(|e| self.interrupted(e))?;

            if turn < turns {
                self.pass_gate(partition.index, turn).await?;
            }
        }

        info!(partition = partition.index, turns, alive = band.alive_count(), "Slice complete");
        Ok(band.as_ref().clone())
    }

    /// Mark the node busy for the lifetime of the returned guard.
    fn claim(&self, index: usize) -> Result<ActiveSlice<'_>, NodeError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = *active {
            return Err(NodeError::Busy { index: running });
        }
        *active = Some(index);
        Ok(ActiveSlice { node: self })
    }

    /// AssignPartition: reset generation to 0 and clear every handoff.
    fn assign_partition(&self, partition: Partition, band: Arc<WorldGrid>) {
        {
            let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
            committed.turn = 0;
            committed.partition = Some(partition);
            committed.band = band;
        }
        self.flipped.reset();
        self.alive.reset();
        self.halo_out.reset();
        self.halo_in.reset();
        self.gate.reset();
    }

    fn commit(&self, turn: u32, band: Arc<WorldGrid>) {
        let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        committed.turn = turn;
        committed.band = band;
    }

    /// The single per-generation pause check.
    async fn pass_gate(&self, partition: usize, turn: u32) -> Result<(), NodeError> {
        if self.gate.is_paused() {
            info!(partition, turn, "Paused at generation boundary");
        }
        tokio::select! {
            _ = self.gate.pass(turn + 1) => Ok(()),
            _ = self.shutdown.cancelled() => Err(NodeError::ShuttingDown),
        }
    }

    fn interrupted(&self, err: crate::handoff::HandoffError) -> NodeError {
        if self.shutdown.is_cancelled() {
            NodeError::ShuttingDown
        } else {
            NodeError::Handoff(err)
        }
    }

    // ── Artifact collection (broker side of the handoffs) ─────────────────────

    /// Flipped cells of generation `turn`, absolute coordinates.
    pub async fn flipped_cells(&self, turn: u32) -> Result<Vec<CellPos>, NodeError> {
        Ok(self.flipped.take(turn).await?)
    }

    /// `(turn, alive count)` of generation `turn`.
    pub async fn turn_and_alive(&self, turn: u32) -> Result<(u32, u64), NodeError> {
        let alive = self.alive.take(turn).await?;
        Ok((turn, alive))
    }

    /// First and last rows of the band computed in generation `turn`.
    pub async fn halo_export(&self, turn: u32) -> Result<HaloPair, NodeError> {
        Ok(self.halo_out.take(turn).await?)
    }

    /// Deliver the import halo consumed by generation `turn`.  Never blocks.
    pub fn deliver_halo(&self, turn: u32, halo: HaloPair) -> Result<(), NodeError> {
        let width = self.snapshot().band.width();
        check_halo_width(&halo, width)?;
        self.halo_in.deliver(turn, halo)?;
        Ok(())
    }

    // ── Control & queries ─────────────────────────────────────────────────────

    pub fn pause_and_resume(&self, command: Command) -> PauseAck {
        let previous = self.gate.apply(command);
        let turn = self.snapshot().turn;
        if previous != command.target_state() {
            info!(?command, turn, "Run state changed");
        }
        PauseAck {
            turn,
            paused: self.gate.is_paused(),
        }
    }

    /// Current committed band.  Never blocks on the generation loop.
    pub fn snapshot(&self) -> NodeSnapshot {
        let committed = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        NodeSnapshot {
            turn: committed.turn,
            partition: committed.partition,
            band: Arc::clone(&committed.band),
        }
    }

    /// Stop the generation loop and wake every blocked collector.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        warn!("Worker node shutting down");
        self.shutdown.cancel();
        self.flipped.close();
        self.alive.close();
        self.halo_out.close();
        self.halo_in.close();
    }

    /// Token cancelled by [`shutdown`](Self::shutdown); used to stop the
    /// gRPC server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Default for WorkerNode {
    fn default() -> Self {
        Self::new()
    }
}

fn check_halo_width(halo: &HaloPair, width: usize) -> Result<(), GridError> {
    if halo.top.len() != width || halo.bottom.len() != width {
        return Err(GridError::HaloWidth {
            expected: width,
            top: halo.top.len(),
            bottom: halo.bottom.len(),
        });
    }
    Ok(())
}

/// Clears the node's busy marker when the slice ends, however it ends.
struct ActiveSlice<'a> {
    node: &'a WorkerNode,
}

impl Drop for ActiveSlice<'_> {
    fn drop(&mut self) {
        *self
            .node
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
