//! Large-scale subsidence
//!
//! ```text
//! F = −w_LS(z) · ∂q/∂z
//! ```
//!
//! With `w_LS ≤ 0` the forward difference is the upwind one; the top level
//! falls back to a backward difference.

use rayon::prelude::*;

use super::vertical_derivative;
use crate::fields::FieldArray;
use crate::params::RuntimeParams;

/// Subsidence tendency of `field`
pub fn subsidence(params: &RuntimeParams<'_>, field: &FieldArray, out: &mut FieldArray) {
    let nz = params.grid.nz;
    let dz = params.grid.dz;
    let w_ls = params.profiles.w_ls;

    out.par_columns_mut()
        .zip(field.as_slice().par_chunks(nz))
        .for_each(|(tendency, column)| {
            for k in 0..nz {
                tendency[k] = -w_ls[k] * vertical_derivative(column, k, dz);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::MicrophysicsScheme;
    use crate::forcing::test_support::{params, store, DZ};
    use crate::params::ProcessToggles;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_field_is_unaffected() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let field = FieldArray::with_value(&p.grid.whole(), 290.0);
        let mut out = FieldArray::with_value(&p.grid.whole(), 1.0);
        subsidence(&p, &field, &mut out);
        assert!(out.as_slice().iter().all(|&f| f == 0.0));
    }

    #[test]
    fn sinking_air_brings_down_warmer_air() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        // θ increasing with height, 0.01 K/m
        let field = FieldArray::from_fn(&p.grid.whole(), |_, _, k| 290.0 + 0.01 * k as f64 * DZ);
        let mut out = FieldArray::new(&p.grid.whole());
        subsidence(&p, &field, &mut out);
        assert_eq!(out.get(0, 0, 0), 0.0);
        for k in 1..p.grid.nz {
            let expected = 3.75e-6 * k as f64 * DZ * 0.01;
            assert_relative_eq!(out.get(2, 0, k), expected, max_relative = 1e-9);
        }
    }
}
