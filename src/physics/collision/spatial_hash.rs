//! Uniform grid spatial hash used to find pairs of possibly intersecting capsules.

use crate::math::Vec3;

use itertools::iproduct;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Multipliers for hashing the three integer cell coordinates.
const HASH_PRIMES: [u64; 3] = [73856093, 19349663, 83492791];

/// A uniform grid over points, stored sparsely in a hash map.
///
/// Distinct cells can hash to the same key. This only produces extra candidates,
/// which narrow phase rejects, never missed ones.
#[derive(Debug)]
pub struct SpatialHash {
    cell_size: f64,
    /// Integer cell of every inserted point, in insertion order.
    cells: Vec<[i64; 3]>,
    buckets: HashMap<u64, Vec<usize>>,
}

impl SpatialHash {
    /// Insert every point into a grid with the given cell size.
    /// Points are identified by their index in the slice.
    pub fn new(cell_size: f64, points: &[Vec3]) -> Self {
        let inv_size = 1.0 / cell_size;
        let cell = |p: &Vec3| cell_of(*p, inv_size);
        #[cfg(feature = "parallel")]
        let cells: Vec<[i64; 3]> = points.par_iter().map(cell).collect();
        #[cfg(not(feature = "parallel"))]
        let cells: Vec<[i64; 3]> = points.iter().map(cell).collect();

        let mut buckets: HashMap<u64, Vec<usize>> = HashMap::with_capacity(cells.len());
        for (idx, c) in cells.iter().enumerate() {
            buckets.entry(hash_cell(*c)).or_default().push(idx);
        }

        Self {
            cell_size,
            cells,
            buckets,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of occupied buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Indices greater than `idx` found in the cell of point `idx` and its 26 neighbors,
    /// sorted and without duplicates.
    pub fn partners(&self, idx: usize) -> Vec<usize> {
        let [x, y, z] = self.cells[idx];
        let mut found: Vec<usize> = iproduct!(-1..=1, -1..=1, -1..=1)
            .filter_map(|(dx, dy, dz)| self.buckets.get(&hash_cell([x + dx, y + dy, z + dz])))
            .flatten()
            .copied()
            .filter(|&other| other > idx)
            .collect();
        // neighboring cells can share a bucket
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Every candidate pair `(i, j)` with `i < j`, each exactly once,
    /// ordered by `i` and then `j`.
    pub fn candidate_pairs(&self) -> Vec<(usize, usize)> {
        let pairs_of = |i: usize| -> Vec<(usize, usize)> {
            self.partners(i).into_iter().map(|j| (i, j)).collect()
        };
        #[cfg(feature = "parallel")]
        let pairs = (0..self.cells.len()).into_par_iter().flat_map(pairs_of).collect();
        #[cfg(not(feature = "parallel"))]
        let pairs = (0..self.cells.len()).flat_map(pairs_of).collect();
        pairs
    }
}

/// Integer cell coordinates of a point.
#[inline]
pub fn cell_of(point: Vec3, inv_cell_size: f64) -> [i64; 3] {
    [
        (point.x * inv_cell_size).floor() as i64,
        (point.y * inv_cell_size).floor() as i64,
        (point.z * inv_cell_size).floor() as i64,
    ]
}

/// Hash of integer cell coordinates, XORing each coordinate multiplied by a large odd constant.
#[inline]
pub fn hash_cell(cell: [i64; 3]) -> u64 {
    (cell[0] as u64).wrapping_mul(HASH_PRIMES[0])
        ^ (cell[1] as u64).wrapping_mul(HASH_PRIMES[1])
        ^ (cell[2] as u64).wrapping_mul(HASH_PRIMES[2])
}
