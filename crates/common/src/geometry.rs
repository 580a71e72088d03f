//! Fixed map grid shared by the world gateway and the partition engine.
//!
//! A map spans `MAX_GRID_CELLS x MAX_GRID_CELLS` grid cells of
//! `GRID_CELL_SIZE` world units, centred on the world origin.

use serde::{Deserialize, Serialize};

pub const MAX_GRID_CELLS: u32 = 64;
pub const GRID_CELL_SIZE: f32 = 533.333_3;
pub const MAP_HALF_EXTENT: f32 = GRID_CELL_SIZE * (MAX_GRID_CELLS as f32) / 2.0;

/// One cell of the map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub x: u32,
    pub y: u32,
}

impl GridCell {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Row-major id used by spawn enumeration.
    pub fn grid_id(self) -> u32 {
        self.y * MAX_GRID_CELLS + self.x
    }

    /// Every cell of the map, row by row.
    pub fn all() -> impl Iterator<Item = GridCell> {
        (0..MAX_GRID_CELLS).flat_map(|y| (0..MAX_GRID_CELLS).map(move |x| GridCell::new(x, y)))
    }

    /// Cell containing a world position, or `None` outside the map.
    pub fn containing(x: f32, y: f32) -> Option<GridCell> {
        let gx = grid_coord(x)?;
        let gy = grid_coord(y)?;
        Some(GridCell::new(gx, gy))
    }
}

/// Grid coordinate of a single world axis value, `None` outside the map.
pub fn grid_coord(value: f32) -> Option<u32> {
    if !value.is_finite() {
        return None;
    }
    let shifted = (value + MAP_HALF_EXTENT) / GRID_CELL_SIZE;
    if shifted < 0.0 || shifted >= MAX_GRID_CELLS as f32 {
        return None;
    }
    Some(shifted.floor() as u32)
}

/// World coordinate of the low edge of a grid coordinate.
pub fn grid_origin(coord: u32) -> f32 {
    coord as f32 * GRID_CELL_SIZE - MAP_HALF_EXTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_sits_on_grid_centre() {
        assert_eq!(grid_coord(0.0), Some(MAX_GRID_CELLS / 2));
        assert_eq!(grid_coord(-1.0), Some(MAX_GRID_CELLS / 2 - 1));
    }

    #[test]
    fn outside_map_has_no_cell() {
        assert_eq!(grid_coord(MAP_HALF_EXTENT + 1.0), None);
        assert_eq!(grid_coord(-MAP_HALF_EXTENT - 1.0), None);
        assert_eq!(grid_coord(f32::NAN), None);
        assert!(GridCell::containing(0.0, 1.0e9).is_none());
    }

    #[test]
    fn grid_id_is_row_major() {
        assert_eq!(GridCell::new(3, 2).grid_id(), 2 * 64 + 3);
        assert_eq!(GridCell::all().count(), 64 * 64);
    }

    #[test]
    fn grid_origin_inverts_coord() {
        let edge = grid_origin(40);
        assert_eq!(grid_coord(edge + 1.0), Some(40));
    }
}
