//! Grid geometry and horizontal domain decomposition
//!
//! The vertical axis is never split: every subdomain owns complete columns,
//! so column-wise work (sedimentation, vertical gradients) needs no halo.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{ForcingError, Result};

/// Minimum number of vertical levels (central differences need an interior level)
pub const MIN_LEVELS: usize = 3;

/// Global grid dimensions and spacings
///
/// Two-dimensional (x-z) runs use `ny == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Cells in x
    pub nx: usize,
    /// Cells in y (1 for 2D slab runs)
    pub ny: usize,
    /// Vertical levels
    pub nz: usize,
    /// Horizontal spacing in x (m)
    pub dx: f64,
    /// Horizontal spacing in y (m)
    pub dy: f64,
    /// Vertical spacing (m)
    pub dz: f64,
}

impl Grid {
    /// Create a grid, rejecting unusable sizes or spacings
    ///
    /// # Errors
    ///
    /// [`ForcingError::InvalidGrid`] if `nz < 3`, any horizontal count is zero,
    /// or any spacing is not finite and positive.
    pub fn new(nx: usize, ny: usize, nz: usize, dx: f64, dy: f64, dz: f64) -> Result<Self> {
        if nz < MIN_LEVELS {
            return Err(ForcingError::InvalidGrid(format!(
                "nz must be at least {MIN_LEVELS}, got {nz}"
            )));
        }
        if nx == 0 || ny == 0 {
            return Err(ForcingError::InvalidGrid(format!(
                "horizontal size must be positive, got {nx}x{ny}"
            )));
        }
        for (name, value) in [("dx", dx), ("dy", dy), ("dz", dz)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ForcingError::InvalidGrid(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(Self {
            nx,
            ny,
            nz,
            dx,
            dy,
            dz,
        })
    }

    /// Grid spanning a physical box with nodes on both ends of each axis
    ///
    /// Spacing follows `extent / (n - 1)`; a 2D run passes `ny == 1` and the
    /// y extent is ignored.
    ///
    /// # Errors
    ///
    /// Same as [`Grid::new`]; additionally rejects `nx < 2`.
    pub fn from_extent(extent: [f64; 3], nx: usize, ny: usize, nz: usize) -> Result<Self> {
        if nx < 2 {
            return Err(ForcingError::InvalidGrid(format!(
                "nx must be at least 2 to derive dx, got {nx}"
            )));
        }
        let spacing = |length: f64, n: usize| length / (n.max(2) - 1) as f64;
        let dy = if ny == 1 {
            spacing(extent[0], nx)
        } else {
            spacing(extent[1], ny)
        };
        Self::new(
            nx,
            ny,
            nz,
            spacing(extent[0], nx),
            dy,
            spacing(extent[2], nz),
        )
    }

    /// Height of level `k` (m)
    #[inline]
    pub fn height(&self, k: usize) -> f64 {
        k as f64 * self.dz
    }

    /// True for three-dimensional runs
    pub fn is_3d(&self) -> bool {
        self.ny > 1
    }

    /// Whole domain as a single subdomain
    pub fn whole(&self) -> Subdomain {
        Subdomain {
            rank: 0,
            i: 0..self.nx,
            j: 0..self.ny,
            nz: self.nz,
        }
    }

    /// Split the domain into `workers` slabs along x
    ///
    /// Remainder cells go to the lowest ranks so slab widths differ by at most one.
    ///
    /// # Errors
    ///
    /// [`ForcingError::InvalidParameter`] if `workers` is zero or exceeds `nx`.
    pub fn decompose(&self, workers: usize) -> Result<Vec<Subdomain>> {
        if workers == 0 || workers > self.nx {
            return Err(ForcingError::invalid(
                "workers",
                format!("must be in 1..={}, got {workers}", self.nx),
            ));
        }
        let base = self.nx / workers;
        let extra = self.nx % workers;
        let mut start = 0;
        Ok((0..workers)
            .map(|rank| {
                let width = base + usize::from(rank < extra);
                let sub = Subdomain {
                    rank,
                    i: start..start + width,
                    j: 0..self.ny,
                    nz: self.nz,
                };
                start += width;
                sub
            })
            .collect())
    }
}

/// Index ranges of one worker's share of the domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdomain {
    /// Worker rank owning this subdomain
    pub rank: usize,
    /// Global x index range
    pub i: Range<usize>,
    /// Global y index range
    pub j: Range<usize>,
    /// Vertical levels (always the full column)
    pub nz: usize,
}

impl Subdomain {
    /// Local extent in x
    pub fn ni(&self) -> usize {
        self.i.len()
    }

    /// Local extent in y
    pub fn nj(&self) -> usize {
        self.j.len()
    }

    /// Number of vertical columns owned
    pub fn n_columns(&self) -> usize {
        self.ni() * self.nj()
    }

    /// Number of cells owned
    pub fn n_cells(&self) -> usize {
        self.n_columns() * self.nz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_few_levels() {
        let err = Grid::new(4, 1, 2, 10.0, 10.0, 10.0).unwrap_err();
        assert!(matches!(err, ForcingError::InvalidGrid(_)));
    }

    #[test]
    fn rejects_zero_spacing() {
        assert!(Grid::new(4, 1, 10, 10.0, 10.0, 0.0).is_err());
        assert!(Grid::new(4, 1, 10, f64::NAN, 10.0, 5.0).is_err());
    }

    #[test]
    fn extent_spacing_matches_node_count() {
        let grid = Grid::from_extent([3360.0, 3360.0, 1500.0], 129, 1, 301).unwrap();
        assert!((grid.dx - 26.25).abs() < 1e-12);
        assert!((grid.dz - 5.0).abs() < 1e-12);
        assert!(!grid.is_3d());
    }

    #[test]
    fn decomposition_covers_domain() {
        let grid = Grid::new(10, 3, 5, 1.0, 1.0, 1.0).unwrap();
        let subs = grid.decompose(3).unwrap();
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].i, 0..4);
        assert_eq!(subs[1].i, 4..7);
        assert_eq!(subs[2].i, 7..10);
        let columns: usize = subs.iter().map(Subdomain::n_columns).sum();
        assert_eq!(columns, 30);
        assert!(grid.decompose(11).is_err());
    }
}
