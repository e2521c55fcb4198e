/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Conversions between domain types and the generated proto messages.
//!
//! Decoding always validates: widths are checked against the declared grid
//! width and cell bytes must be `0x00` / `0xFF`.

use crate::halo::HaloPair;
use crate::proto::lifering_v1 as pb;
use crate::world::{row_from_wire, row_to_wire, CellPos, GridError, WorldGrid};

pub fn grid_to_proto(world: &WorldGrid) -> pb::Grid {
    pb::Grid {
        height: world.height() as u32,
        width: world.width() as u32,
        rows: world.to_wire_rows(),
    }
}

/// Decode a full grid, checking the declared height against the row count.
pub fn grid_from_proto(grid: &pb::Grid) -> Result<WorldGrid, GridError> {
    let world = WorldGrid::from_wire_rows(&grid.rows, grid.width as usize)?;
    if world.height() != grid.height as usize {
        return Err(GridError::HeightMismatch {
            declared: grid.height as usize,
            found: world.height(),
        });
    }
    Ok(world)
}

pub fn halo_to_proto(halo: &HaloPair) -> pb::HaloPair {
    pb::HaloPair {
        top: row_to_wire(&halo.top),
        bottom: row_to_wire(&halo.bottom),
    }
}

/// Decode a halo pair.  A missing message is treated as an empty pair so the
/// width check reports it.
pub fn halo_from_proto(halo: Option<&pb::HaloPair>, width: usize) -> Result<HaloPair, GridError> {
    let (top, bottom) = halo.map_or((&[][..], &[][..]), |h| (&h.top[..], &h.bottom[..]));
    if top.len() != width || bottom.len() != width {
        return Err(GridError::HaloWidth {
            expected: width,
            top: top.len(),
            bottom: bottom.len(),
        });
    }
    Ok(HaloPair {
        top: row_from_wire(top, 0, width)?,
        bottom: row_from_wire(bottom, 0, width)?,
    })
}

pub fn cells_to_proto(cells: &[CellPos]) -> Vec<pb::Cell> {
    cells
        .iter()
        .map(|p| pb::Cell {
            x: p.col as u32,
            y: p.row as u32,
        })
        .collect()
}

pub fn cells_from_proto(cells: &[pb::Cell]) -> Vec<CellPos> {
    cells
        .iter()
        .map(|c| CellPos::new(c.y as usize, c.x as usize))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
