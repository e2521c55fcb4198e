/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-generation telemetry fan-in from the generation loop to the client.
//!
//! A bounded channel of `depth` records.  With backpressure on (the default)
//! the generation loop waits for the client to make room, so at `depth = 1`
//! the loop can run at most one generation ahead of the consumer.  With
//! backpressure off, records the consumer has no room for are dropped.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::error::BrokerError;
use crate::world::CellPos;

/// Everything that changed in one generation, merged across partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub turn: u32,
    pub alive: u64,
    /// Absolute coordinates, ordered by partition index.
    pub flipped: Vec<CellPos>,
}

pub struct TelemetryFanIn {
    tx: mpsc::Sender<TelemetryRecord>,
    rx: Mutex<mpsc::Receiver<TelemetryRecord>>,
    backpressure: bool,
}

impl TelemetryFanIn {
    /// `depth` is clamped to at least one slot.
    pub fn new(depth: usize, backpressure: bool) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            backpressure,
        }
    }

    /// Hand a record to the consumer side.
    ///
    /// # Errors
    /// [`BrokerError::Cancelled`] if `cancel` fires while waiting for room.
    pub async fn deposit(
        &self,
        record: TelemetryRecord,
        cancel: &CancellationToken,
    ) -> Result<(), BrokerError> {
        if self.backpressure {
            return tokio::select! {
                sent = self.tx.send(record) => sent.map_err(|_| BrokerError::ShuttingDown),
                _ = cancel.cancelled() => Err(BrokerError::Cancelled),
            };
        }
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                debug!(turn = record.turn, "Telemetry consumer lagging, record dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BrokerError::ShuttingDown),
        }
    }

    /// Wait for the next record.  Concurrent callers are served one at a time.
    pub async fn next(&self) -> Result<TelemetryRecord, BrokerError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(BrokerError::ShuttingDown)
    }

    /// Discard records left over from a previous run.
    pub fn drain(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            // A consumer is parked in `next`, so the queue is already empty.
            return 0;
        };
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded stale telemetry");
        }
        dropped
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
