use super::intersect::Aabb;
use itertools::Itertools;
use nalgebra::Point3;
use std::collections::HashMap;

pub type CellKey = [i64; 3];

/// A sparse uniform grid mapping cubic cells to item indices.
///
/// Points occupy exactly one cell; boxes are registered in every cell they overlap.
#[derive(Debug, Clone)]
pub struct UniformGrid {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<usize>>,
}

impl UniformGrid {
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            1.0
        };
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn key(&self, p: &Point3<f64>) -> CellKey {
        [
            (p.x / self.cell_size).floor() as i64,
            (p.y / self.cell_size).floor() as i64,
            (p.z / self.cell_size).floor() as i64,
        ]
    }

    pub fn insert_point(&mut self, item: usize, p: &Point3<f64>) {
        let key = self.key(p);
        self.cells.entry(key).or_default().push(item);
    }

    pub fn insert_box(&mut self, item: usize, aabb: &Aabb) {
        let lo = self.key(&aabb.min);
        let hi = self.key(&aabb.max);
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    self.cells.entry([x, y, z]).or_default().push(item);
                }
            }
        }
    }

    /// Items registered in any cell overlapping `aabb`, sorted and without duplicates.
    pub fn query_box(&self, aabb: &Aabb) -> Vec<usize> {
        if aabb.is_empty() {
            return Vec::new();
        }
        let lo = self.key(&aabb.min);
        let hi = self.key(&aabb.max);
        let span = |axis: usize| (hi[axis] - lo[axis] + 1).max(0) as u128;
        let cell_count = span(0) * span(1) * span(2);

        let in_range = |k: &CellKey| (0..3).all(|axis| k[axis] >= lo[axis] && k[axis] <= hi[axis]);

        if cell_count > self.cells.len() as u128 {
            self.cells
                .iter()
                .filter(|(k, _)| in_range(*k))
                .flat_map(|(_, items)| items.iter().copied())
                .sorted_unstable()
                .dedup()
                .collect()
        } else {
            let mut found = Vec::new();
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        if let Some(items) = self.cells.get(&[x, y, z]) {
                            found.extend_from_slice(items);
                        }
                    }
                }
            }
            found.into_iter().sorted_unstable().dedup().collect()
        }
    }

    /// Items in the cells along the +x row starting at `p`'s cell and ending at `x_max`.
    pub fn query_row_x(&self, p: &Point3<f64>, x_max: f64) -> Vec<usize> {
        let start = self.key(p);
        let end = (x_max / self.cell_size).floor() as i64;
        (start[0]..=end.max(start[0]))
            .filter_map(|x| self.cells.get(&[x, start[1], start[2]]))
            .flat_map(|items| items.iter().copied())
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Visits every item in the 27 cells surrounding `p`'s cell.
    ///
    /// Finds every point within `cell_size` of `p` when the grid holds points.
    pub fn for_each_near(&self, p: &Point3<f64>, mut visit: impl FnMut(usize)) {
        let [cx, cy, cz] = self.key(p);
        for x in cx - 1..=cx + 1 {
            for y in cy - 1..=cy + 1 {
                for z in cz - 1..=cz + 1 {
                    if let Some(items) = self.cells.get(&[x, y, z]) {
                        items.iter().for_each(|&i| visit(i));
                    }
                }
            }
        }
    }
}
