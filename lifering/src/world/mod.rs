/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Toroidal cell matrix shared by the broker and the worker nodes.
//!
//! [`WorldGrid`] is used both for the full H×W world and for a single
//! row band owned by one worker (a band is simply a grid whose height is the
//! partition length).  Adjacency wrapping is applied by the update rule in
//! [`rules`], not by the storage type.
//!
//! # Wire format
//! Rows cross the gRPC boundary as `bytes`, one byte per cell:
//!
//! | Byte | Cell |
//! |---|---|
//! | `0x00` | [`Cell::Dead`] |
//! | `0xFF` | [`Cell::Alive`] |
//!
//! Any other byte is rejected with [`GridError::InvalidCellByte`] instead of
//! being silently coerced.

pub mod rules;

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use thiserror::Error;

// ── Cell ──────────────────────────────────────────────────────────────────────

/// Binary cell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Cell {
    #[default]
    Dead,
    Alive,
}

impl Cell {
    /// Wire byte for a live cell.
    pub const ALIVE_BYTE: u8 = 0xFF;
    /// Wire byte for a dead cell.
    pub const DEAD_BYTE: u8 = 0x00;

    pub fn is_alive(self) -> bool {
        matches!(self, Cell::Alive)
    }

    /// Parse one wire byte.  Returns `None` for anything but `0x00` / `0xFF`.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            Self::ALIVE_BYTE => Some(Cell::Alive),
            Self::DEAD_BYTE => Some(Cell::Dead),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Cell::Alive => Self::ALIVE_BYTE,
            Cell::Dead => Self::DEAD_BYTE,
        }
    }

    /// The opposite state.
    pub fn flipped(self) -> Self {
        match self {
            Cell::Alive => Cell::Dead,
            Cell::Dead => Cell::Alive,
        }
    }
}

// ── CellPos ───────────────────────────────────────────────────────────────────

/// Absolute `(row, col)` coordinate in the full world.
///
/// Used for flipped-cell telemetry; on the wire it becomes `Cell { x: col,
/// y: row }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellPos {
    pub row: usize,
    pub col: usize,
}

impl CellPos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Malformed grid input.
///
/// Produced when decoding rows from the wire, parsing text patterns, applying
/// telemetry flips, or stepping a band with mis-sized halo rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("cell ({row}, {col}) has invalid wire byte {byte:#04x} (expected 0x00 or 0xff)")]
    InvalidCellByte { row: usize, col: usize, byte: u8 },

    #[error("invalid character {ch:?} on line {line} (use '#' for alive, '.' for dead)")]
    InvalidChar { line: usize, ch: char },

    #[error("cell ({row}, {col}) is outside the {height}x{width} grid")]
    CellOutOfRange {
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },

    #[error("grid declares {declared} row(s) but carries {found}")]
    HeightMismatch { declared: usize, found: usize },

    #[error("grid must have at least one row and one column (got {height}x{width})")]
    Empty { height: usize, width: usize },

    #[error("halo rows have widths {top}/{bottom}, expected {expected}")]
    HaloWidth {
        expected: usize,
        top: usize,
        bottom: usize,
    },
}

// ── WorldGrid ─────────────────────────────────────────────────────────────────

/// H×W matrix of [`Cell`]s stored row-major in one contiguous buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldGrid {
    height: usize,
    width: usize,
    cells: Vec<Cell>,
}

impl WorldGrid {
    /// An all-dead grid.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            cells: vec![Cell::Dead; height * width],
        }
    }

    /// Build a grid from owned rows.  Every row must have the width of the
    /// first one.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Result<Self, GridError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut cells = Vec::with_capacity(height * width);
        for (row, r) in rows.into_iter().enumerate() {
            if r.len() != width {
                return Err(GridError::RaggedRow {
                    row,
                    expected: width,
                    found: r.len(),
                });
            }
            cells.extend(r);
        }
        Ok(Self {
            height,
            width,
            cells,
        })
    }

    /// Decode wire rows.  `width` is checked against every row so a ragged
    /// or truncated message is rejected rather than reshaped.
    ///
    /// Capacity follows the bytes actually received, never the declared width.
    pub fn from_wire_rows(rows: &[Vec<u8>], width: usize) -> Result<Self, GridError> {
        let mut cells = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for (row, bytes) in rows.iter().enumerate() {
            cells.extend(row_from_wire(bytes, row, width)?);
        }
        Ok(Self {
            height: rows.len(),
            width,
            cells,
        })
    }

    pub fn to_wire_rows(&self) -> Vec<Vec<u8>> {
        self.rows().map(row_to_wire).collect()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `true` when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Fails with [`GridError::Empty`] unless both dimensions are non-zero.
    pub fn ensure_not_empty(&self) -> Result<(), GridError> {
        if self.is_empty() {
            return Err(GridError::Empty {
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }

    /// # Panics
    /// Panics if `(row, col)` is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Cell {
        assert!(row < self.height && col < self.width, "cell out of bounds");
        self.cells[row * self.width + col]
    }

    /// # Panics
    /// Panics if `(row, col)` is out of bounds.
    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        assert!(row < self.height && col < self.width, "cell out of bounds");
        self.cells[row * self.width + col] = cell;
    }

    /// # Panics
    /// Panics if `row >= height`.
    pub fn row(&self, row: usize) -> &[Cell] {
        let start = row * self.width;
        &self.cells[start..start + self.width]
    }

    pub fn first_row(&self) -> &[Cell] {
        self.row(0)
    }

    pub fn last_row(&self) -> &[Cell] {
        self.row(self.height.saturating_sub(1))
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> + '_ {
        (0..self.height).map(move |r| self.row(r))
    }

    pub fn alive_count(&self) -> u64 {
        self.cells.iter().filter(|c| c.is_alive()).count() as u64
    }

    /// Coordinates of every live cell, row-major.
    pub fn alive_cells(&self) -> Vec<CellPos> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_alive())
            .map(|(i, _)| CellPos::new(i / self.width, i % self.width))
            .collect()
    }

    /// Copy rows `rows.start..rows.end` into a new band.
    ///
    /// # Panics
    /// Panics if the range extends past the last row.
    pub fn band(&self, rows: Range<usize>) -> WorldGrid {
        let cells = self.cells[rows.start * self.width..rows.end * self.width].to_vec();
        WorldGrid {
            height: rows.len(),
            width: self.width,
            cells,
        }
    }

    /// Stack bands top to bottom into one grid.  All bands must share a width.
    pub fn from_bands(bands: Vec<WorldGrid>) -> Result<Self, GridError> {
        let width = bands.first().map_or(0, |b| b.width);
        let mut height = 0;
        let mut cells = Vec::with_capacity(bands.iter().map(|b| b.cells.len()).sum());
        for band in bands {
            if band.width != width {
                return Err(GridError::RaggedRow {
                    row: height,
                    expected: width,
                    found: band.width,
                });
            }
            height += band.height;
            cells.extend(band.cells);
        }
        Ok(Self {
            height,
            width,
            cells,
        })
    }

    /// Toggle every listed cell.  Used by the broker to roll its committed
    /// world forward by one generation's merged telemetry.
    pub fn apply_flips(&mut self, flips: &[CellPos]) -> Result<(), GridError> {
        for pos in flips {
            if pos.row >= self.height || pos.col >= self.width {
                return Err(GridError::CellOutOfRange {
                    row: pos.row,
                    col: pos.col,
                    height: self.height,
                    width: self.width,
                });
            }
            let idx = pos.row * self.width + pos.col;
            self.cells[idx] = self.cells[idx].flipped();
        }
        Ok(())
    }
}

/// Decode one wire row.  `row` is only used for error reporting.
pub fn row_from_wire(bytes: &[u8], row: usize, width: usize) -> Result<Vec<Cell>, GridError> {
    if bytes.len() != width {
        return Err(GridError::RaggedRow {
            row,
            expected: width,
            found: bytes.len(),
        });
    }
    bytes
        .iter()
        .enumerate()
        .map(|(col, &byte)| {
            Cell::from_wire(byte).ok_or(GridError::InvalidCellByte { row, col, byte })
        })
        .collect()
}

pub fn row_to_wire(row: &[Cell]) -> Vec<u8> {
    row.iter().map(|c| c.to_wire()).collect()
}

// ── Text form ─────────────────────────────────────────────────────────────────

/// Plain-text pattern: one line per row, `#` (or `O`, `*`) alive, `.` dead.
/// Blank lines and surrounding whitespace are ignored.
impl FromStr for WorldGrid {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rows = s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(line, l)| {
                l.chars()
                    .map(|ch| match ch {
                        '#' | 'O' | '*' => Ok(Cell::Alive),
                        '.' => Ok(Cell::Dead),
                        _ => Err(GridError::InvalidChar { line, ch }),
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        WorldGrid::from_rows(rows)
    }
}

impl fmt::Display for WorldGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            for cell in row {
                f.write_str(if cell.is_alive() { "#" } else { "." })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
