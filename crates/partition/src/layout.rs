use serde::Serialize;
use strata_common::PartitionId;
use strata_common::geometry::{GRID_CELL_SIZE, MAX_GRID_CELLS, grid_coord, grid_origin};

/// Rectangular division of the map grid into `count` partitions.
///
/// `cols = floor(sqrt(count))`, `rows = ceil(count / cols)`; each partition
/// covers `cell_width x cell_height` grid cells. Partition ids run row-major
/// from 1, and indices past `count` fold into the last partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionLayout {
    pub rows: u32,
    pub cols: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub count: u32,
}

impl PartitionLayout {
    pub fn for_count(count: u32) -> Self {
        let count = count.max(1);
        let cols = ((count as f64).sqrt().floor() as u32).max(1);
        let rows = count.div_ceil(cols);
        Self {
            rows,
            cols,
            cell_width: MAX_GRID_CELLS.div_ceil(cols),
            cell_height: MAX_GRID_CELLS.div_ceil(rows),
            count,
        }
    }

    fn col_row(&self, gx: u32, gy: u32) -> (u32, u32) {
        let col = (gx / self.cell_width).min(self.cols - 1);
        let row = (gy / self.cell_height).min(self.rows - 1);
        (col, row)
    }

    /// Partition owning a grid coordinate.
    pub fn partition_for_grid(&self, gx: u32, gy: u32) -> PartitionId {
        if self.count <= 1 {
            return PartitionId::FIRST;
        }
        let (col, row) = self.col_row(gx, gy);
        let index = (row * self.cols + col).min(self.count - 1);
        PartitionId(index + 1)
    }

    /// Partition owning a world position. Positions off the map clamp to the
    /// nearest edge partition.
    pub fn partition_for_position(&self, x: f32, y: f32) -> PartitionId {
        self.partition_for_grid(clamped_coord(x), clamped_coord(y))
    }

    /// Whether a position lies within `overlap` world units of an edge of
    /// its partition cell. Positions outside the map always count.
    pub fn is_near_boundary(&self, x: f32, y: f32, overlap: f32) -> bool {
        let (Some(gx), Some(gy)) = (grid_coord(x), grid_coord(y)) else {
            return true;
        };
        let (col, row) = self.col_row(gx, gy);
        let x_lo = grid_origin(col * self.cell_width);
        let x_hi = grid_origin(((col + 1) * self.cell_width).min(MAX_GRID_CELLS));
        let y_lo = grid_origin(row * self.cell_height);
        let y_hi = grid_origin(((row + 1) * self.cell_height).min(MAX_GRID_CELLS));
        let margin = (x - x_lo).min(x_hi - x).min(y - y_lo).min(y_hi - y);
        margin <= overlap
    }

    /// The up to eight partitions touching `partition`.
    pub fn adjacent(&self, partition: PartitionId) -> Vec<PartitionId> {
        let mut result = Vec::new();
        if self.count <= 1 || partition.0 == 0 || partition.0 > self.count {
            return result;
        }
        let index = partition.0 - 1;
        let row = (index / self.cols) as i64;
        let col = (index % self.cols) as i64;
        for dr in -1..=1i64 {
            for dc in -1..=1i64 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let (r, c) = (row + dr, col + dc);
                if r < 0 || c < 0 || r >= self.rows as i64 || c >= self.cols as i64 {
                    continue;
                }
                let neighbour = r as u32 * self.cols + c as u32;
                if neighbour < self.count {
                    result.push(PartitionId(neighbour + 1));
                }
            }
        }
        result
    }

    /// World-space width of one partition cell.
    pub fn cell_world_width(&self) -> f32 {
        self.cell_width as f32 * GRID_CELL_SIZE
    }

    pub fn cell_world_height(&self) -> f32 {
        self.cell_height as f32 * GRID_CELL_SIZE
    }
}

fn clamped_coord(value: f32) -> u32 {
    if let Some(c) = grid_coord(value) {
        return c;
    }
    if value > 0.0 { MAX_GRID_CELLS - 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_shapes() {
        let l = PartitionLayout::for_count(4);
        assert_eq!((l.cols, l.rows, l.cell_width, l.cell_height), (2, 2, 32, 32));
        let l = PartitionLayout::for_count(3);
        assert_eq!((l.cols, l.rows, l.cell_width, l.cell_height), (1, 3, 64, 22));
        let l = PartitionLayout::for_count(5);
        assert_eq!((l.cols, l.rows), (2, 3));
        let l = PartitionLayout::for_count(0);
        assert_eq!(l.count, 1);
    }

    #[test]
    fn quadrants_resolve_in_row_major_order() {
        let l = PartitionLayout::for_count(4);
        assert_eq!(l.partition_for_position(-100.0, -100.0), PartitionId(1));
        assert_eq!(l.partition_for_position(100.0, -100.0), PartitionId(2));
        assert_eq!(l.partition_for_position(-100.0, 100.0), PartitionId(3));
        assert_eq!(l.partition_for_position(100.0, 100.0), PartitionId(4));
    }

    #[test]
    fn single_partition_is_always_first() {
        let l = PartitionLayout::for_count(1);
        assert_eq!(l.partition_for_position(5_000.0, -5_000.0), PartitionId::FIRST);
        assert!(l.adjacent(PartitionId(1)).is_empty());
    }

    #[test]
    fn off_map_positions_clamp() {
        let l = PartitionLayout::for_count(4);
        assert_eq!(l.partition_for_position(-1.0e7, -1.0e7), PartitionId(1));
        assert_eq!(l.partition_for_position(1.0e7, 1.0e7), PartitionId(4));
    }

    #[test]
    fn surplus_index_folds_into_last_partition() {
        let l = PartitionLayout::for_count(5);
        assert_eq!(l.partition_for_grid(63, 63), PartitionId(5));
        assert_eq!(l.partition_for_grid(0, 63), PartitionId(5));
    }

    #[test]
    fn boundary_margin_is_inclusive() {
        let l = PartitionLayout::for_count(4);
        assert!(l.is_near_boundary(-40.0, -4_000.0, 40.0));
        assert!(l.is_near_boundary(40.0, -4_000.0, 40.0));
        assert!(!l.is_near_boundary(-41.0, -4_000.0, 40.0));
        assert!(!l.is_near_boundary(-4_000.0, -4_000.0, 40.0));
    }

    #[test]
    fn off_map_is_boundary() {
        let l = PartitionLayout::for_count(4);
        assert!(l.is_near_boundary(1.0e6, 0.0, 40.0));
        assert!(l.is_near_boundary(f32::NAN, 0.0, 40.0));
    }

    #[test]
    fn adjacency_in_a_three_by_three() {
        let l = PartitionLayout::for_count(9);
        let mut centre = l.adjacent(PartitionId(5));
        centre.sort();
        assert_eq!(centre.len(), 8);
        assert!(!centre.contains(&PartitionId(5)));
        let corner = l.adjacent(PartitionId(1));
        assert_eq!(corner, vec![PartitionId(2), PartitionId(4), PartitionId(5)]);
        assert!(l.adjacent(PartitionId(10)).is_empty());
    }
}
