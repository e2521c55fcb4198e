/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error types for the broker and its links to worker nodes.
//!
//! | `BrokerError` variant | gRPC status |
//! |---|---|
//! | `InvalidWorld` / `Partition` / `InvalidCommand` | `InvalidArgument` |
//! | `Connect` | `Unavailable` |
//! | `Link` | `Aborted` |
//! | `CollectTimeout` | `DeadlineExceeded` |
//! | `Protocol` | `Internal` |
//! | `RunInProgress` / `NoActiveRun` | `FailedPrecondition` |
//! | `Cancelled` | `Cancelled` |
//! | `ShuttingDown` | `Unavailable` |

use std::time::Duration;

use thiserror::Error;
use tonic::Status;

use crate::node::NodeError;
use crate::partition::PartitionError;
use crate::world::GridError;

// ── LinkError ─────────────────────────────────────────────────────────────────

/// Failure of a single call on a broker → node link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot connect to worker {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("worker {addr} failed {call}: {status}")]
    Rpc {
        addr: String,
        call: &'static str,
        status: Status,
    },

    #[error("worker {addr} sent malformed data: {source}")]
    Decode {
        addr: String,
        #[source]
        source: GridError,
    },

    /// In-process link: the node itself returned an error.
    #[error("worker {addr}: {source}")]
    Node {
        addr: String,
        #[source]
        source: NodeError,
    },
}

// ── BrokerError ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid world: {0}")]
    InvalidWorld(#[from] GridError),

    #[error("cannot partition world: {0}")]
    Partition(#[from] PartitionError),

    #[error("unknown pause/resume command value {0}")]
    InvalidCommand(i32),

    /// Setup failure: a worker could not be dialled.  Fatal for the run.
    #[error("setup failed: {0}")]
    Connect(#[source] LinkError),

    /// Mid-run failure of the link serving `partition`.
    #[error("partition {partition}: {source}")]
    Link {
        partition: usize,
        #[source]
        source: LinkError,
    },

    #[error("partition {partition} did not deliver generation {turn} within {timeout:?}")]
    CollectTimeout {
        partition: usize,
        turn: u32,
        timeout: Duration,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("a simulation is already running")]
    RunInProgress,

    #[error("no simulation is running")]
    NoActiveRun,

    #[error("simulation cancelled")]
    Cancelled,

    #[error("broker is shutting down")]
    ShuttingDown,
}

impl From<BrokerError> for Status {
    fn from(err: BrokerError) -> Self {
        let msg = err.to_string();
        match err {
            BrokerError::InvalidWorld(_)
            | BrokerError::Partition(_)
            | BrokerError::InvalidCommand(_) => Status::invalid_argument(msg),
            BrokerError::Connect(_) | BrokerError::ShuttingDown => Status::unavailable(msg),
            BrokerError::Link { .. } => Status::aborted(msg),
            BrokerError::CollectTimeout { .. } => Status::deadline_exceeded(msg),
            BrokerError::Protocol(_) => Status::internal(msg),
            BrokerError::RunInProgress | BrokerError::NoActiveRun => {
                Status::failed_precondition(msg)
            }
            BrokerError::Cancelled => Status::cancelled(msg),
        }
    }
}
