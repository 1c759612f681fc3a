//! Longwave radiative heating of stratocumulus
//!
//! # Physics Implementation
//!
//! The net upward longwave flux at height z of the DYCOMS-II intercomparison:
//!
//! ```text
//! F(z) = F_0 · e^{−Q(z, ∞)} + F_1 · e^{−Q(0, z)}
//!      + ρ_i c_p D [¼ (z − z_i)^{4/3} + z_i (z − z_i)^{1/3}]     (z > z_i only)
//!
//! Q(a, b) = κ ∫_a^b ρ r_l dz
//! ```
//!
//! `z_i` is the lowest level whose total water `rv + r_l` drops below `q_i`.
//! The flux is evaluated at the bottom interface of every cell (and at the top
//! of the last one), and the heating rate is its negative forward divergence
//! converted to a θ tendency:
//!
//! ```text
//! ∂θ/∂t = −(F(k+1) − F(k)) / dz / (Π(p_e) · c_p(rv) · ρ)
//! ```
//!
//! # References
//!
//! - Stevens et al. (2005), "Evaluation of large-eddy simulations via
//!   observations of nocturnal marine stratocumulus", Mon. Wea. Rev. 133

use rayon::prelude::*;

use crate::error::Result;
use crate::fields::{Field, FieldArray, ModelState};
use crate::params::{ForceParameters, RuntimeParams};
use crate::thermo::{exner, moist_heat_capacity, C_PD};

/// θ tendency from longwave radiation (K/s)
///
/// Liquid water is the cloud-water field when the scheme carries one,
/// otherwise the environmental liquid-water profile.
///
/// # Errors
///
/// [`crate::ForcingError::MissingField`] if the state has no vapor field.
pub fn radiative_heating(
    params: &RuntimeParams<'_>,
    state: &ModelState,
    out: &mut FieldArray,
) -> Result<()> {
    let rv = state.get(Field::Rv)?;
    let rc = state.try_get(Field::Rc);
    let nz = params.grid.nz;
    let dz = params.grid.dz;
    let force = params.force;
    let profiles = params.profiles;

    out.par_columns_mut()
        .zip(rv.as_slice().par_chunks(nz))
        .enumerate()
        .for_each(|(c, (heating, vapor))| {
            let liquid = match rc {
                Some(rc) => rc.column(c),
                None => profiles.rl_e,
            };
            let flux = net_upward_flux(&force, profiles.rhod, vapor, liquid, dz);
            for k in 0..nz {
                let divergence = (flux[k + 1] - flux[k]) / dz;
                heating[k] = -divergence
                    / (exner(profiles.p_e[k]) * moist_heat_capacity(vapor[k]) * profiles.rhod[k]);
            }
        });
    Ok(())
}

/// Net upward flux at the `nz + 1` cell interfaces of one column (W/m²)
fn net_upward_flux(
    force: &ForceParameters,
    rhod: &[f64],
    vapor: &[f64],
    liquid: &[f64],
    dz: f64,
) -> Vec<f64> {
    let nz = vapor.len();

    // optical depth of each cell
    let depth: Vec<f64> = (0..nz)
        .map(|k| force.heating_kappa * rhod[k] * liquid[k] * dz)
        .collect();
    let total_depth: f64 = depth.iter().sum();

    let inversion = (0..nz)
        .find(|&k| vapor[k] + liquid[k] < force.q_i)
        .map(|k| k as f64 * dz);

    let mut below = 0.0;
    let mut flux = Vec::with_capacity(nz + 1);
    for k in 0..=nz {
        let above = total_depth - below;
        let z = k as f64 * dz;
        let mut f = force.f_0 * (-above).exp() + force.f_1 * (-below).exp();
        if let Some(z_i) = inversion {
            if z > z_i {
                let dzi = z - z_i;
                f += force.rho_i
                    * C_PD
                    * force.divergence
                    * (0.25 * dzi.powf(4.0 / 3.0) + z_i * dzi.cbrt());
            }
        }
        flux.push(f);
        if k < nz {
            below += depth[k];
        }
    }
    flux
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::MicrophysicsScheme;
    use crate::forcing::test_support::{params, state, store, DZ, NZ};
    use crate::params::ProcessToggles;

    #[test]
    fn clear_sky_without_inversion_is_flux_free() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let mut state = state(MicrophysicsScheme::None);
        // moist everywhere: no inversion, no liquid
        state.get_mut(Field::Rv).unwrap().fill(1e-2);
        let mut out = FieldArray::new(state.subdomain());
        radiative_heating(&p, &state, &mut out).unwrap();
        assert!(out.as_slice().iter().all(|h| h.abs() < 1e-15));
    }

    #[test]
    fn cloud_top_cools() {
        let force = ForceParameters::default();
        let rhod = vec![1.2; NZ + 1];
        let vapor = vec![8e-3, 8e-3, 8e-3, 8e-3, 1e-3, 1e-3];
        let liquid = vec![0.0, 0.0, 5e-4, 5e-4, 0.0, 0.0];
        let flux = net_upward_flux(&force, &rhod, &vapor, &liquid, DZ);
        assert_eq!(flux.len(), NZ + 1);
        // divergence of upward flux at the cloud top cell means cooling
        assert!(flux[4] > flux[3]);
        // above the inversion the subsidence-warming term grows with height
        assert!(flux[6] > flux[5]);
    }

    #[test]
    fn cloud_water_field_drives_heating() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::Bulk1m, ProcessToggles::default());
        let mut state = state(MicrophysicsScheme::Bulk1m);
        state.get_mut(Field::Rv).unwrap().fill(9e-3);
        let sub = state.subdomain().clone();
        *state.get_mut(Field::Rc).unwrap() =
            FieldArray::from_fn(&sub, |_, _, k| if (2..4).contains(&k) { 4e-4 } else { 0.0 });
        let mut out = FieldArray::new(&sub);
        radiative_heating(&p, &state, &mut out).unwrap();
        // cloud-top cell loses heat
        assert!(out.get(0, 0, 3) < 0.0);
        assert!(out.as_slice().iter().all(|h| h.is_finite()));
    }
}
