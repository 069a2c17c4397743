use std::collections::HashMap;

use kornia_3d::Scalar;

use super::{check_buildable, squared_distance, Neighbor, SpatialIndex};
use crate::error::IcpError;

/// Rings walked without finding a point before switching to a linear scan.
const MAX_RING_WALK: i64 = 8;

/// Fraction of a cell subtracted from the ring distance bound to absorb rounding in `floor`.
const RING_BOUND_SLACK: f64 = 0.01;

type CellKey = [i64; 3];

/// Exact nearest neighbour search over a hashed uniform grid.
///
/// Points are bucketed by cell. A query walks the cells in rings of growing Chebyshev
/// distance around its own cell and stops once the distance bound of the next ring exceeds the
/// best candidate, so results are exact. Ties resolve to the lowest point index.
pub struct VoxelGridIndex<T> {
    points: Vec<[T; 3]>,
    cell_size: T,
    cells: HashMap<CellKey, Vec<u32>>,
    min_cell: CellKey,
    max_cell: CellKey,
}

impl<T: Scalar> VoxelGridIndex<T> {
    /// Build the index over `points` with cubic cells of side `cell_size`.
    ///
    /// # Errors
    ///
    /// Returns [`IcpError::InvalidInput`] if `points` is empty or `cell_size` is not a positive
    /// finite number.
    pub fn build(points: &[[T; 3]], cell_size: T) -> Result<Self, IcpError> {
        check_buildable(points)?;
        if !(cell_size.is_finite() && cell_size > T::zero()) {
            return Err(IcpError::InvalidInput(format!(
                "grid cell size must be positive and finite, got {cell_size}"
            )));
        }

        let mut index = Self {
            points: points.to_vec(),
            cell_size,
            cells: HashMap::new(),
            min_cell: [i64::MAX; 3],
            max_cell: [i64::MIN; 3],
        };

        for (i, p) in points.iter().enumerate() {
            let key = index.cell_of(p);
            for a in 0..3 {
                index.min_cell[a] = index.min_cell[a].min(key[a]);
                index.max_cell[a] = index.max_cell[a].max(key[a]);
            }
            index.cells.entry(key).or_default().push(i as u32);
        }

        log::debug!(
            "voxel grid over {} points: {} occupied cells of size {}",
            points.len(),
            index.cells.len(),
            cell_size
        );

        Ok(index)
    }

    /// Build the index choosing a cell size from the bounding box of the points.
    pub fn build_auto(points: &[[T; 3]]) -> Result<Self, IcpError> {
        check_buildable(points)?;
        let mut extent = T::zero();
        for a in 0..3 {
            let (lo, hi) = points.iter().fold((points[0][a], points[0][a]), |(lo, hi), p| {
                (lo.min(p[a]), hi.max(p[a]))
            });
            extent = extent.max(hi - lo);
        }
        let per_axis = T::cast_f64((points.len() as f64).cbrt().max(1.0));
        let cell_size = if extent > T::zero() {
            extent / per_axis
        } else {
            T::one()
        };
        Self::build(points, cell_size)
    }

    /// Side length of the cells.
    pub fn cell_size(&self) -> T {
        self.cell_size
    }

    #[inline]
    fn cell_of(&self, p: &[T; 3]) -> CellKey {
        // float to int casts saturate
        p.map(|v| (v / self.cell_size).floor().into_f64() as i64)
    }

    fn visit_cell(&self, key: &CellKey, visit: &mut impl FnMut(usize)) {
        if let Some(indices) = self.cells.get(key) {
            for &i in indices {
                visit(i as usize);
            }
        }
    }

    /// Visit the occupied cells at Chebyshev distance exactly `ring` from `center`.
    fn visit_ring(&self, center: CellKey, ring: i64, mut visit: impl FnMut(usize)) {
        let lo = |a: usize| center[a].saturating_sub(ring).max(self.min_cell[a]);
        let hi = |a: usize| center[a].saturating_add(ring).min(self.max_cell[a]);
        let on_shell = |v: i64, a: usize| v.saturating_sub(center[a]).saturating_abs() == ring;

        for x in lo(0)..=hi(0) {
            for y in lo(1)..=hi(1) {
                if on_shell(x, 0) || on_shell(y, 1) {
                    for z in lo(2)..=hi(2) {
                        self.visit_cell(&[x, y, z], &mut visit);
                    }
                } else {
                    // only the two caps of the shell along z
                    for z in [center[2].saturating_sub(ring), center[2].saturating_add(ring)] {
                        if z >= self.min_cell[2] && z <= self.max_cell[2] {
                            self.visit_cell(&[x, y, z], &mut visit);
                        }
                    }
                }
            }
        }
    }

    fn linear_scan(&self, query: &[T; 3]) -> Option<Neighbor<T>> {
        let mut best: Option<Neighbor<T>> = None;
        for (index, p) in self.points.iter().enumerate() {
            let candidate = Neighbor {
                index,
                squared_distance: squared_distance(query, p),
            };
            if candidate.is_closer_than(&best) {
                best = Some(candidate);
            }
        }
        best
    }

    fn search(&self, query: &[T; 3], max_squared_distance: Option<T>) -> Option<Neighbor<T>> {
        if self.points.is_empty() {
            return None;
        }

        let center = self.cell_of(query);

        // rings below `first` do not touch the occupied box, rings above `last` are all outside
        let mut first = 0i64;
        let mut last = 0i64;
        for a in 0..3 {
            let below = self.min_cell[a].saturating_sub(center[a]);
            let above = center[a].saturating_sub(self.max_cell[a]);
            first = first.max(below).max(above);
            let far = center[a]
                .saturating_sub(self.min_cell[a])
                .saturating_abs()
                .max(self.max_cell[a].saturating_sub(center[a]).saturating_abs());
            last = last.max(far);
        }

        let slack = T::cast_f64(RING_BOUND_SLACK);
        let mut best: Option<Neighbor<T>> = None;

        let mut ring = first;
        while ring <= last {
            if best.is_none() && ring - first >= MAX_RING_WALK {
                best = self.linear_scan(query);
                break;
            }

            if ring > 0 {
                // every point in this ring or beyond is at least this far from the query
                let gap = (T::cast_f64((ring - 1) as f64) - slack).max(T::zero()) * self.cell_size;
                let gap_sq = gap * gap;
                if best.is_some_and(|b| b.squared_distance < gap_sq) {
                    break;
                }
                if max_squared_distance.is_some_and(|m| m < gap_sq) {
                    break;
                }
            }

            self.visit_ring(center, ring, |index| {
                let candidate = Neighbor {
                    index,
                    squared_distance: squared_distance(query, &self.points[index]),
                };
                if candidate.is_closer_than(&best) {
                    best = Some(candidate);
                }
            });

            ring += 1;
        }

        match max_squared_distance {
            Some(m) => best.filter(|b| b.squared_distance <= m),
            None => best,
        }
    }
}

impl<T: Scalar> SpatialIndex<T> for VoxelGridIndex<T> {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn nearest(&self, query: &[T; 3]) -> Option<Neighbor<T>> {
        self.search(query, None)
    }

    fn nearest_within(&self, query: &[T; 3], max_distance: T) -> Option<Neighbor<T>> {
        self.search(query, Some(max_distance * max_distance))
    }
}
