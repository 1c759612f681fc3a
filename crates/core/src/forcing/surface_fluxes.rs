//! Prescribed surface fluxes distributed over the lowest levels
//!
//! A surface flux enters the column through the height-decay factors, whose
//! discrete integral is one, so the column-integrated tendency equals the
//! prescribed surface value.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fields::{Field, FieldArray, ModelState};
use crate::params::RuntimeParams;
use crate::thermo::{exner, moist_heat_capacity, L_TRI};

/// Wind speeds below this are treated as calm (m/s)
const CALM_WIND: f64 = 1e-8;

/// Surface sensible and latent heat fluxes (W/m²)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceFlux {
    pub sensible: f64,
    pub latent: f64,
}

/// Time schedule of the prescribed surface heat fluxes
///
/// Fixed-flux cases set the flux once at timestep 0 and keep it. The schedule
/// yields the constants at timestep 0 and whenever it was re-armed, and
/// nothing otherwise; the caller keeps the last value it received.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceFluxSchedule {
    flux: SurfaceFlux,
    armed: bool,
}

impl SurfaceFluxSchedule {
    /// Schedule for a constant surface flux
    #[must_use]
    pub fn constant(sensible: f64, latent: f64) -> Self {
        Self {
            flux: SurfaceFlux { sensible, latent },
            armed: false,
        }
    }

    /// Flux to apply from `timestep` on, if it changes
    pub fn update(&mut self, timestep: u64) -> Option<SurfaceFlux> {
        if timestep == 0 || self.armed {
            self.armed = false;
            Some(self.flux)
        } else {
            None
        }
    }

    /// Yield the flux again at the next update
    pub fn rearm(&mut self) {
        self.armed = true;
    }

    /// Configured flux values
    pub fn flux(&self) -> SurfaceFlux {
        self.flux
    }
}

/// θ tendency from the surface sensible heat flux (K/s)
///
/// ```text
/// F = F_sens · hgt_fctr_sclr(z) / (ρ · c_p(rv) · Π(p_e))
/// ```
///
/// # Errors
///
/// [`crate::ForcingError::MissingField`] if the state has no vapor field.
pub fn sensible_flux(
    params: &RuntimeParams<'_>,
    flux: SurfaceFlux,
    state: &ModelState,
    out: &mut FieldArray,
) -> Result<()> {
    let rv = state.get(Field::Rv)?;
    let nz = params.grid.nz;
    let profiles = params.profiles;

    out.par_columns_mut()
        .zip(rv.as_slice().par_chunks(nz))
        .for_each(|(tendency, vapor)| {
            for k in 0..nz {
                tendency[k] = flux.sensible * profiles.hgt_fctr_sclr[k]
                    / (profiles.rhod[k] * moist_heat_capacity(vapor[k]) * exner(profiles.p_e[k]));
            }
        });
    Ok(())
}

/// rv tendency from the surface latent heat flux (1/s)
///
/// ```text
/// F = F_lat · hgt_fctr_sclr(z) / (ρ · L)
/// ```
pub fn latent_flux(params: &RuntimeParams<'_>, flux: SurfaceFlux, out: &mut FieldArray) {
    let nz = params.grid.nz;
    let profiles = params.profiles;
    out.par_columns_mut().for_each(|tendency| {
        for k in 0..nz {
            tendency[k] = flux.latent * profiles.hgt_fctr_sclr[k] / (profiles.rhod[k] * L_TRI);
        }
    });
}

/// Tendency of a horizontal velocity component from surface drag (m/s²)
///
/// ```text
/// F_u = −u*² · u_g / |U_g| · hgt_fctr_vctr(z)
/// ```
///
/// `U_g` is the ground-relative wind of the lowest level of the column, i.e.
/// the model wind plus the mean-wind translation.
///
/// # Errors
///
/// [`crate::ForcingError::MissingField`] if `component` is not a carried
/// horizontal velocity.
pub fn momentum_flux(
    params: &RuntimeParams<'_>,
    state: &ModelState,
    component: Field,
    out: &mut FieldArray,
) -> Result<()> {
    let u = state.get(Field::U)?;
    let v = state.try_get(Field::V);
    // fail early for a component the state does not carry
    state.get(component)?;

    let [u_mean, v_mean] = params.force.mean_wind;
    let drag = params.force.u_fric * params.force.u_fric;
    let hgt_fctr = params.profiles.hgt_fctr_vctr;
    let nz = params.grid.nz;

    out.par_columns_mut().enumerate().for_each(|(c, tendency)| {
        let u_ground = u.column(c)[0] + u_mean;
        let v_ground = v.map_or(0.0, |v| v.column(c)[0]) + v_mean;
        let speed = u_ground.hypot(v_ground);
        let along = if component == Field::V {
            v_ground
        } else {
            u_ground
        };
        let scale = if speed > CALM_WIND {
            -drag * along / speed
        } else {
            0.0
        };
        for k in 0..nz {
            tendency[k] = scale * hgt_fctr[k];
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::MicrophysicsScheme;
    use crate::forcing::test_support::{params, state, store, DZ};
    use crate::params::ProcessToggles;
    use approx::assert_relative_eq;

    #[test]
    fn schedule_yields_at_start_and_when_rearmed() {
        let mut schedule = SurfaceFluxSchedule::constant(16.0, 93.0);
        assert_eq!(
            schedule.update(0),
            Some(SurfaceFlux {
                sensible: 16.0,
                latent: 93.0
            })
        );
        assert_eq!(schedule.update(1), None);
        assert_eq!(schedule.update(7), None);
        schedule.rearm();
        assert_eq!(schedule.update(8).map(|f| f.latent), Some(93.0));
        assert_eq!(schedule.update(9), None);
    }

    #[test]
    fn latent_flux_integrates_to_surface_value() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let mut out = FieldArray::new(&p.grid.whole());
        let flux = SurfaceFlux {
            sensible: 0.0,
            latent: 93.0,
        };
        latent_flux(&p, flux, &mut out);
        // Σ ρ L F dz = F_lat · Σ hgt dz
        let column = out.column(0);
        let integral: f64 = (0..column.len())
            .map(|k| column[k] * p.profiles.rhod[k] * L_TRI * DZ)
            .sum();
        let hgt: f64 = p.profiles.hgt_fctr_sclr.iter().sum::<f64>() * DZ;
        assert_relative_eq!(integral, 93.0 * hgt, max_relative = 1e-12);
    }

    #[test]
    fn sensible_flux_warms_lowest_level_most() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let mut state = state(MicrophysicsScheme::None);
        state.get_mut(Field::Rv).unwrap().fill(8e-3);
        let mut out = FieldArray::new(state.subdomain());
        let flux = SurfaceFlux {
            sensible: 16.0,
            latent: 0.0,
        };
        sensible_flux(&p, flux, &state, &mut out).unwrap();
        let column = out.column(1);
        assert!(column[0] > 0.0);
        assert!(column.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn drag_opposes_the_wind() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let mut state = state(MicrophysicsScheme::None);
        state.get_mut(Field::U).unwrap().fill(7.0);
        let mut out = FieldArray::new(state.subdomain());
        momentum_flux(&p, &state, Field::U, &mut out).unwrap();
        // 2D: the whole wind is along x, so F = −u*² · hgt
        let expected = -0.25 * 0.25 * p.profiles.hgt_fctr_vctr[0];
        assert_relative_eq!(out.get(0, 0, 0), expected, max_relative = 1e-12);

        // no V field in 2D
        assert!(momentum_flux(&p, &state, Field::V, &mut out).is_err());
    }

    #[test]
    fn calm_column_has_no_drag() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let state = state(MicrophysicsScheme::None);
        let mut out = FieldArray::with_value(state.subdomain(), 1.0);
        momentum_flux(&p, &state, Field::U, &mut out).unwrap();
        assert!(out.as_slice().iter().all(|&f| f == 0.0));
    }
}
