/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error type for the worker node.
//!
//! Every variant maps onto a `tonic::Status` code so the broker can tell
//! caller mistakes from protocol violations:
//!
//! | Variant | gRPC status |
//! |---|---|
//! | `Busy` | `FailedPrecondition` |
//! | `BandShape` / `Grid` | `InvalidArgument` |
//! | `Handoff` (mismatch, already taken, occupied) | `FailedPrecondition` |
//! | `Handoff` (closed) | `Aborted` |
//! | `ShuttingDown` | `Unavailable` |

use thiserror::Error;
use tonic::Status;

use crate::handoff::HandoffError;
use crate::world::GridError;

#[derive(Debug, Error)]
pub enum NodeError {
    /// `ProcessSlice` arrived while another slice is still running.
    #[error("node is already processing partition {index}")]
    Busy { index: usize },

    /// The band does not match the partition it was sent with.
    #[error("band has {rows} row(s) but partition {index} spans {expected} row(s)")]
    BandShape {
        index: usize,
        expected: usize,
        rows: usize,
    },

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error("node is shutting down")]
    ShuttingDown,
}

impl From<NodeError> for Status {
    fn from(err: NodeError) -> Self {
        let msg = err.to_string();
        match err {
            NodeError::Busy { .. } => Status::failed_precondition(msg),
            NodeError::BandShape { .. } | NodeError::Grid(_) => Status::invalid_argument(msg),
            NodeError::Handoff(HandoffError::Closed { .. }) => Status::aborted(msg),
            NodeError::Handoff(_) => Status::failed_precondition(msg),
            NodeError::ShuttingDown => Status::unavailable(msg),
        }
    }
}
