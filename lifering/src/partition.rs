/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Row-band partitioning of the world across the worker ring.
//!
//! Every band is `height / workers` rows tall except the last, which also
//! absorbs the remainder `height % workers`.  The split is deterministic,
//! exhaustive and non-overlapping; it never changes during a run.

use std::ops::Range;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors that can occur while splitting the world into bands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The worker list was empty.
    NoWorkers,

    /// More workers than rows: at least one band would be empty and could not
    /// export halo rows.
    TooManyWorkers { height: usize, workers: usize },
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionError::NoWorkers => write!(f, "no workers to partition the world across"),
            PartitionError::TooManyWorkers { height, workers } => write!(
                f,
                "cannot split {height} row(s) across {workers} workers (at most one worker per row)"
            ),
        }
    }
}

impl std::error::Error for PartitionError {}

// ── Partition ─────────────────────────────────────────────────────────────────

/// Half-open row range `[start, end)` owned by ring position `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Partition {
    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `height` rows across `workers` ring positions.
///
/// # Errors
/// * [`PartitionError::NoWorkers`] – `workers == 0`.
/// * [`PartitionError::TooManyWorkers`] – `workers > height`.
pub fn partition_rows(height: usize, workers: usize) -> Result<Vec<Partition>, PartitionError> {
    if workers == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if workers > height {
        return Err(PartitionError::TooManyWorkers { height, workers });
    }

    let band = height / workers;
    Ok((0..workers)
        .map(|index| {
            let start = band * index;
            let end = if index + 1 == workers {
                height
            } else {
                start + band
            };
            Partition { index, start, end }
        })
        .collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(height: usize, parts: &[Partition]) {
        assert_eq!(parts.first().map(|p| p.start), Some(0));
        assert_eq!(parts.last().map(|p| p.end), Some(height));
        for (i, pair) in parts.windows(2).enumerate() {
            assert_eq!(pair[0].end, pair[1].start, "gap/overlap after band {i}");
        }
        for (i, p) in parts.iter().enumerate() {
            assert_eq!(p.index, i);
            assert!(!p.is_empty());
        }
        assert_eq!(parts.iter().map(Partition::len).sum::<usize>(), height);
    }

    #[test]
    fn even_split() {
        let parts = partition_rows(16, 4).unwrap();
        assert!(parts.iter().all(|p| p.len() == 4));
        assert_tiles(16, &parts);
    }

    #[test]
    fn last_band_absorbs_remainder() {
        let parts = partition_rows(10, 4).unwrap();
        let lens: Vec<_> = parts.iter().map(Partition::len).collect();
        assert_eq!(lens, vec![2, 2, 2, 4]);
        assert_tiles(10, &parts);
    }

    #[test]
    fn single_worker_owns_everything() {
        let parts = partition_rows(7, 1).unwrap();
        assert_eq!(parts, vec![Partition { index: 0, start: 0, end: 7 }]);
    }

    #[test]
    fn bands_tile_for_every_height_and_worker_count() {
        for height in 1..=40 {
            for workers in 1..=height.min(12) {
                let parts = partition_rows(height, workers).unwrap();
                assert_eq!(parts.len(), workers);
                assert_tiles(height, &parts);
            }
        }
    }

    #[test]
    fn zero_workers_is_an_error() {
        assert_eq!(partition_rows(8, 0), Err(PartitionError::NoWorkers));
    }

    #[test]
    fn more_workers_than_rows_is_an_error() {
        assert_eq!(
            partition_rows(3, 4),
            Err(PartitionError::TooManyWorkers {
                height: 3,
                workers: 4
            })
        );
    }
}
