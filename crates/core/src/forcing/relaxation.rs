//! Nudging of the horizontal-mean θ and rv toward the environment
//!
//! ```text
//! F = −relax_coeff(z) / τ · (⟨q⟩(z) − q_e(z))
//! ```
//!
//! `⟨q⟩` is the mean over the whole horizontal domain, reduced across workers
//! by the caller.

use rayon::prelude::*;

use crate::fields::FieldArray;
use crate::params::RuntimeParams;

/// Per-level relaxation rate `relax_coeff(z) / τ` (1/s)
pub fn nudging_rate(params: &RuntimeParams<'_>) -> Vec<f64> {
    params
        .profiles
        .relax_coeff
        .iter()
        .map(|coeff| coeff / params.tau_rlx)
        .collect()
}

/// Explicit nudging tendency of a field with per-level mean `mean` toward `environment`
pub fn nudging(params: &RuntimeParams<'_>, mean: &[f64], environment: &[f64], out: &mut FieldArray) {
    let rate = nudging_rate(params);
    let tendency: Vec<f64> = (0..params.grid.nz)
        .map(|k| -rate[k] * (mean[k] - environment[k]))
        .collect();
    out.par_columns_mut()
        .for_each(|column| column.copy_from_slice(&tendency));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::MicrophysicsScheme;
    use crate::forcing::test_support::{params, store};
    use crate::params::{ProcessToggles, TAU_RELAX};
    use approx::assert_relative_eq;

    #[test]
    fn mean_relaxes_toward_environment() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let env = vec![8e-3; p.grid.nz];
        // columns 9e-3, 10e-3, 11e-3: mean 1e-2
        let field = FieldArray::from_fn(&p.grid.whole(), |i, _, _| 9e-3 + 1e-3 * i as f64);
        let mut out = FieldArray::new(&p.grid.whole());
        nudging(&p, &field.horizontal_mean(), &env, &mut out);
        for &f in out.as_slice() {
            assert_relative_eq!(f, -2e-3 / TAU_RELAX, max_relative = 1e-9);
        }
    }

    #[test]
    fn zero_coefficient_disables_nudging() {
        let mut store = store();
        let nz = store.nz();
        store
            .set(crate::profiles::ProfileKind::RelaxCoeff, &vec![0.0; nz])
            .unwrap();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        assert!(nudging_rate(&p).iter().all(|&r| r == 0.0));
    }
}
