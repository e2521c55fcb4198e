/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Halo rows and the ring exchange between partitions.
//!
//! ```text
//!            ┌──────────────┐
//!  top halo ►│  band i-1    │── bottom export ──┐
//!            └──────────────┘                   │
//!            ┌──────────────┐                   ▼
//!            │  band i      │◄── top halo of i = bottom export of i-1
//!            └──────────────┘◄── bottom halo of i = top export of i+1
//!            ┌──────────────┐                   ▲
//!            │  band i+1    │── top export ─────┘
//!            └──────────────┘
//! ```
//!
//! Ring positions wrap (`i-1` and `i+1` are taken modulo N), matching the
//! world's vertical wraparound.  With a single partition the node receives
//! its own opposite edges.

use crate::partition::Partition;
use crate::world::{Cell, WorldGrid};

/// Two boundary rows travelling between the broker and one node.
///
/// As an *import* `top` is the row above the band and `bottom` the row below
/// it.  As an *export* `top` is the band's first row and `bottom` its last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaloPair {
    pub top: Vec<Cell>,
    pub bottom: Vec<Cell>,
}

impl HaloPair {
    /// Export the first and last rows of a freshly computed band.
    pub fn export(band: &WorldGrid) -> Self {
        Self {
            top: band.first_row().to_vec(),
            bottom: band.last_row().to_vec(),
        }
    }

    pub fn width(&self) -> usize {
        self.top.len()
    }
}

/// Halo pairs for generation 1, read straight out of the initial world.
///
/// Partition `p` gets row `p.start - 1` (wrapping to the last row) as its
/// top halo and row `p.end` (wrapping to row 0) as its bottom halo.
pub fn initial_halos(world: &WorldGrid, partitions: &[Partition]) -> Vec<HaloPair> {
    let height = world.height();
    partitions
        .iter()
        .map(|p| HaloPair {
            top: world.row((p.start + height - 1) % height).to_vec(),
            bottom: world.row(p.end % height).to_vec(),
        })
        .collect()
}

/// Compute every node's next import from every node's export.
///
/// `exports[i]` must be node `i`'s export for the generation just finished;
/// the result's element `i` is node `i`'s import for the next generation.
pub fn ring_exchange(exports: &[HaloPair]) -> Vec<HaloPair> {
    let n = exports.len();
    (0..n)
        .map(|i| HaloPair {
            top: exports[(i + n - 1) % n].bottom.clone(),
            bottom: exports[(i + 1) % n].top.clone(),
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
