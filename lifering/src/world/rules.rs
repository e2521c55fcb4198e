/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Conway update rule applied to a band framed by two halo rows.
//!
//! A band is conceptually augmented to `[top] + band + [bottom]`.  Vertical
//! neighbours come from that augmented stack (so the band itself never wraps
//! vertically), horizontal neighbours wrap modulo the width.

use super::{Cell, CellPos, GridError, WorldGrid};

/// B3/S23: a live cell survives with 2 or 3 live neighbours, a dead cell is
/// born with exactly 3, everything else is dead next generation.
pub fn next_state(cell: Cell, neighbours: u8) -> Cell {
    match (cell, neighbours) {
        (Cell::Alive, 2) | (Cell::Alive, 3) => Cell::Alive,
        (Cell::Dead, 3) => Cell::Alive,
        _ => Cell::Dead,
    }
}

/// Advance `band` one generation.
///
/// `top` is the row directly above the band's first row and `bottom` the row
/// directly below its last row, both already resolved against the torus.
pub fn step_band(band: &WorldGrid, top: &[Cell], bottom: &[Cell]) -> Result<WorldGrid, GridError> {
    band.ensure_not_empty()?;
    let width = band.width();
    if top.len() != width || bottom.len() != width {
        return Err(GridError::HaloWidth {
            expected: width,
            top: top.len(),
            bottom: bottom.len(),
        });
    }

    let height = band.height();
    let mut next = WorldGrid::new(height, width);
    for r in 0..height {
        let above = if r == 0 { top } else { band.row(r - 1) };
        let below = if r + 1 == height { bottom } else { band.row(r + 1) };
        let here = band.row(r);

        for c in 0..width {
            let left = (c + width - 1) % width;
            let right = (c + 1) % width;
            let neighbours = [
                above[left],
                above[c],
                above[right],
                here[left],
                here[right],
                below[left],
                below[c],
                below[right],
            ]
            .iter()
            .filter(|n| n.is_alive())
            .count() as u8;
            next.set(r, c, next_state(here[c], neighbours));
        }
    }
    Ok(next)
}

/// Advance a whole torus one generation on a single thread.
///
/// Equivalent to a one-partition ring: the halo above row 0 is the last row
/// and the halo below the last row is row 0.
pub fn step_world(world: &WorldGrid) -> Result<WorldGrid, GridError> {
    world.ensure_not_empty()?;
    step_band(world, world.last_row(), world.first_row())
}

/// Cells whose state differs between `before` and `after`, offset by
/// `row_offset` so coordinates are absolute in the full world.
pub fn flipped_cells(before: &WorldGrid, after: &WorldGrid, row_offset: usize) -> Vec<CellPos> {
    before
        .rows()
        .zip(after.rows())
        .enumerate()
        .flat_map(|(r, (old, new))| {
            old.iter()
                .zip(new)
                .enumerate()
                .filter(|(_, (a, b))| a != b)
                .map(move |(c, _)| CellPos::new(row_offset + r, c))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(text: &str) -> WorldGrid {
        text.parse().unwrap()
    }

    #[test]
    fn rule_table() {
        for n in 0..=8u8 {
            let survives = next_state(Cell::Alive, n) == Cell::Alive;
            assert_eq!(survives, n == 2 || n == 3, "live cell with {n} neighbours");
            let born = next_state(Cell::Dead, n) == Cell::Alive;
            assert_eq!(born, n == 3, "dead cell with {n} neighbours");
        }
    }

    #[test]
    fn all_dead_stays_dead() {
        let world = WorldGrid::new(6, 6);
        assert_eq!(step_world(&world).unwrap(), world);
    }

    #[test]
    fn blinker_oscillates_with_period_two() {
        let horizontal = grid(".....\n.....\n.###.\n.....\n.....\n");
        let vertical = grid(".....\n..#..\n..#..\n..#..\n.....\n");
        assert_eq!(step_world(&horizontal).unwrap(), vertical);
        assert_eq!(step_world(&vertical).unwrap(), horizontal);
    }

    #[test]
    fn block_is_still_life() {
        let block = grid("....\n.##.\n.##.\n....\n");
        assert_eq!(step_world(&block).unwrap(), block);
    }

    #[test]
    fn columns_wrap_horizontally() {
        // Horizontal blinker on row 2 covering cols 4, 0, 1.
        let world = grid(".....\n.....\n##..#\n.....\n.....\n");
        let next = step_world(&world).unwrap();
        assert_eq!(next, grid(".....\n#....\n#....\n#....\n.....\n"));
    }

    #[test]
    fn rows_wrap_through_halos() {
        // Vertical blinker crossing the top/bottom edge: rows 4, 0, 1.
        let world = grid("..#..\n..#..\n.....\n.....\n..#..\n");
        let next = step_world(&world).unwrap();
        assert_eq!(next, grid(".###.\n.....\n.....\n.....\n.....\n"));
    }

    #[test]
    fn band_step_matches_world_step_for_interior_rows() {
        let world = grid("......\n.#....\n..#...\n###...\n......\n......\n");
        let full = step_world(&world).unwrap();

        let band = world.band(2..4);
        let next = step_band(&band, world.row(1), world.row(4)).unwrap();
        assert_eq!(next, full.band(2..4));
    }

    #[test]
    fn single_row_band_uses_both_halos() {
        let world = grid("...\n###\n...\n");
        let band = world.band(1..2);
        let next = step_band(&band, world.row(0), world.row(2)).unwrap();
        // Every cell in the middle row sees its two horizontal neighbours
        // plus nothing above or below; on a width-3 torus each has 2.
        assert_eq!(next.alive_count(), 3);
    }

    #[test]
    fn halo_width_mismatch_is_rejected() {
        let band = WorldGrid::new(2, 4);
        let err = step_band(&band, &[Cell::Dead; 3], &[Cell::Dead; 4]).unwrap_err();
        assert_eq!(
            err,
            GridError::HaloWidth {
                expected: 4,
                top: 3,
                bottom: 4
            }
        );
    }

    #[test]
    fn flipped_cells_are_offset_to_absolute_rows() {
        let before = grid("#..\n...\n");
        let after = grid("...\n.#.\n");
        let flips = flipped_cells(&before, &after, 10);
        assert_eq!(flips, vec![CellPos::new(10, 0), CellPos::new(11, 1)]);
    }
}
