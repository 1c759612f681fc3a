//! Exponential height-decay factors for distributing surface fluxes
//!
//! A prescribed surface flux `F_s` becomes a volume tendency `F_s · f(z)`,
//! with `f(z) ≈ exp(−z/z0)/z0`. The discrete factor is built from exact
//! integrals of the continuous one over each cell:
//!
//! ```text
//! f(0)    · dz = 1 − e^{−dz/(2 z0)}                       (half cell at the surface)
//! f(k)    · dz = e^{−(k−½)dz/z0} − e^{−(k+½)dz/z0}         (interior cells)
//! f(nz−1) · dz = e^{−(nz−1.5)dz/z0}                       (top cell takes the tail)
//! ```
//!
//! The sum telescopes, so `Σ f(k) · dz = 1` and the surface flux is conserved
//! exactly.

use crate::error::{ForcingError, Result};
use crate::grid::MIN_LEVELS;

/// Height-decay factor for `nz` levels spaced `dz` with e-folding height `z0` (1/m)
///
/// # Errors
///
/// [`ForcingError::InvalidParameter`] for a non-positive `z0`, `dz`, or `nz < 3`.
pub fn height_decay_factor(nz: usize, dz: f64, z0: f64) -> Result<Vec<f64>> {
    if nz < MIN_LEVELS {
        return Err(ForcingError::invalid("nz", format!("must be >= {MIN_LEVELS}, got {nz}")));
    }
    if !(dz.is_finite() && dz > 0.0) {
        return Err(ForcingError::invalid("dz", format!("must be positive, got {dz}")));
    }
    if !(z0.is_finite() && z0 > 0.0) {
        return Err(ForcingError::invalid("z0", format!("must be positive, got {z0}")));
    }

    let h = dz / z0;
    // 1 − e^{−h}, accurate for small h
    let cell_fraction = -(-h).exp_m1();

    let mut factor = Vec::with_capacity(nz);
    factor.push(-(-0.5 * h).exp_m1() / dz);
    for k in 1..nz - 1 {
        let lower_edge = (k as f64 - 0.5) * h;
        factor.push((-lower_edge).exp() * cell_fraction / dz);
    }
    factor.push((-(nz as f64 - 1.5) * h).exp() / dz);
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn integrates_to_one() {
        for &(nz, dz, z0) in &[(3, 10.0, 25.0), (301, 5.0, 25.0), (50, 20.0, 1.0), (10, 1.0, 1e4)] {
            let f = height_decay_factor(nz, dz, z0).unwrap();
            let integral: f64 = f.iter().sum::<f64>() * dz;
            assert_relative_eq!(integral, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn interior_matches_continuous_decay() {
        let (dz, z0) = (1.0, 50.0);
        let f = height_decay_factor(100, dz, z0).unwrap();
        for k in 1..20 {
            let continuous = (-(k as f64) * dz / z0).exp() / z0;
            assert_relative_eq!(f[k], continuous, max_relative = 1e-4);
        }
    }

    #[test]
    fn decays_monotonically() {
        let f = height_decay_factor(40, 5.0, 25.0).unwrap();
        // first and last cells carry the half-cell and tail corrections
        assert!(f[1..f.len() - 1].windows(2).all(|w| w[1] <= w[0]));
        assert!(f.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(height_decay_factor(2, 5.0, 25.0).is_err());
        assert!(height_decay_factor(10, 0.0, 25.0).is_err());
        assert!(height_decay_factor(10, 5.0, -1.0).is_err());
    }
}
