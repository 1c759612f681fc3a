//! Column-wise sedimentation and the surface precipitation accumulator
//!
//! Microphysics packages supply a [`ColumnwiseFlux`] routine that, for one
//! vertical column, fills the sedimentation rate of rain mass (and number) and
//! returns the mass that left the column through its bottom. The integrator
//! runs it over every column of the subdomain, merges the rates into the rain
//! tendencies, and collects the removed mass in a [`LiquidPuddle`].

use rayon::prelude::*;
use tracing::debug;

use crate::composer::Tendencies;
use crate::error::{nancheck, ForcingError, Result};
use crate::fields::{Field, FieldArray, MicrophysicsScheme, ModelState};
use crate::forcing::Process;
use crate::grid::Subdomain;
use crate::hooks::SyncPoint;
use crate::profiles::ProfileKind;

/// Read-only inputs of one column
#[derive(Debug, Clone, Copy)]
pub struct ColumnState<'c> {
    /// Dry air density (kg/m³)
    pub rhod: &'c [f64],
    /// Rain water mixing ratio (kg/kg)
    pub rain_mass: &'c [f64],
    /// Rain drop number (1/kg), two-moment schemes only
    pub rain_number: Option<&'c [f64]>,
}

/// Output rates of one column, overwritten by the flux routine
#[derive(Debug)]
pub struct ColumnRates<'c> {
    /// Rate of change of rain mass (1/s)
    pub rain_mass: &'c mut [f64],
    /// Rate of change of rain number (1/kg/s)
    pub rain_number: Option<&'c mut [f64]>,
}

/// Column sedimentation contract of a microphysics package
pub trait ColumnwiseFlux: Send + Sync {
    /// Fill `rates` for one column and return the mass removed through its bottom
    ///
    /// The return value is positive when water leaves the domain.
    fn column_flux(&self, rates: ColumnRates<'_>, column: ColumnState<'_>, dt: f64, dz: f64) -> f64;
}

/// Upwind sedimentation at a fixed terminal velocity
///
/// ```text
/// flux(k) = ρ(k) · v_t · q(k)                    (downward, through the bottom of cell k)
/// ∂q/∂t(k) = (flux(k+1) − flux(k)) / (ρ(k) · dz)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantFallSpeed {
    /// Terminal velocity of rain mass (m/s, positive downward)
    pub mass_velocity: f64,
    /// Terminal velocity of rain number (m/s, positive downward)
    pub number_velocity: f64,
}

impl Default for ConstantFallSpeed {
    fn default() -> Self {
        Self {
            mass_velocity: 4.0,
            number_velocity: 2.0,
        }
    }
}

impl ConstantFallSpeed {
    fn sediment(rhod: &[f64], q: &[f64], velocity: f64, dz: f64, rate: &mut [f64]) -> f64 {
        let nz = q.len();
        let flux = |k: usize| rhod[k] * velocity * q[k];
        for k in 0..nz {
            let inflow = if k + 1 < nz { flux(k + 1) } else { 0.0 };
            rate[k] = (inflow - flux(k)) / (rhod[k] * dz);
        }
        flux(0)
    }
}

impl ColumnwiseFlux for ConstantFallSpeed {
    fn column_flux(&self, rates: ColumnRates<'_>, column: ColumnState<'_>, dt: f64, dz: f64) -> f64 {
        let bottom = Self::sediment(column.rhod, column.rain_mass, self.mass_velocity, dz, rates.rain_mass);
        if let (Some(rate), Some(number)) = (rates.rain_number, column.rain_number) {
            Self::sediment(column.rhod, number, self.number_velocity, dz, rate);
        }
        bottom * dt
    }
}

/// Cumulative mass removed by sedimentation since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiquidPuddle {
    mass: f64,
}

impl LiquidPuddle {
    /// Add `mass` to the accumulator
    pub fn add(&mut self, mass: f64) {
        self.mass += mass;
    }

    /// Accumulated mass
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Return the accumulated mass and reset to zero
    pub fn take(&mut self) -> f64 {
        std::mem::take(&mut self.mass)
    }
}

/// Runs a [`ColumnwiseFlux`] over every column, once per timestep
#[derive(Debug)]
pub struct ColumnPrecipitationIntegrator<F> {
    flux: F,
    mass_rate: FieldArray,
    number_rate: Option<FieldArray>,
    rhod: Vec<f64>,
    puddle: LiquidPuddle,
    last_run: Option<u64>,
    last_merge: Option<(u64, usize)>,
}

impl<F: ColumnwiseFlux> ColumnPrecipitationIntegrator<F> {
    /// Integrator over `sub` with column density `rhod`
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingProfile`] if `rhod` has fewer than `nz` levels.
    pub fn new(flux: F, sub: &Subdomain, scheme: MicrophysicsScheme, rhod: &[f64]) -> Result<Self> {
        let rhod = rhod.get(..sub.nz).ok_or(ForcingError::MissingProfile {
            profile: ProfileKind::Rhod,
            required_by: "column precipitation",
        })?;
        Ok(Self {
            flux,
            mass_rate: FieldArray::new(sub),
            number_rate: scheme.has_rain_number().then(|| FieldArray::new(sub)),
            rhod: rhod.to_vec(),
            puddle: LiquidPuddle::default(),
            last_run: None,
            last_merge: None,
        })
    }

    /// Sedimentation rate of rain mass from the last run
    pub fn mass_rate(&self) -> &FieldArray {
        &self.mass_rate
    }

    /// Sedimentation rate of rain number from the last run
    pub fn number_rate(&self) -> Option<&FieldArray> {
        self.number_rate.as_ref()
    }

    /// Per-worker puddle
    pub fn puddle(&self) -> &LiquidPuddle {
        &self.puddle
    }

    /// Mutable per-worker puddle, drained by the logging hook
    pub fn puddle_mut(&mut self) -> &mut LiquidPuddle {
        &mut self.puddle
    }

    /// Integrate all columns and merge the rates into `rhs`
    ///
    /// The columns are integrated only at sub-stage 0, and at most once per
    /// timestep. Every sub-stage of that timestep merges the stored rates into
    /// its freshly composed `rhs`, so the integrator applies the full step
    /// while the puddle collects the removed mass once. A repeated call for
    /// the same sub-stage merges nothing. Returns whether the columns were
    /// integrated.
    ///
    /// All workers pass `sync` before the column loop, and again after it
    /// when the loop ran.
    ///
    /// # Errors
    ///
    /// [`crate::ForcingError::MissingField`] if the state lacks rain fields;
    /// [`crate::ForcingError::NonFinite`] if the merged tendency is not finite.
    #[allow(clippy::too_many_arguments)]
    pub fn integrate(
        &mut self,
        state: &ModelState,
        rhs: &mut Tendencies,
        timestep: u64,
        stage: usize,
        dt: f64,
        dz: f64,
        sync: &dyn SyncPoint,
    ) -> Result<bool> {
        sync.wait();
        if self.last_merge == Some((timestep, stage)) {
            return Ok(false);
        }
        if stage != 0 || self.last_run == Some(timestep) {
            if self.last_run == Some(timestep) {
                self.merge(state, rhs)?;
                self.last_merge = Some((timestep, stage));
            }
            return Ok(false);
        }

        let rr = state.get(Field::Rr)?;
        let nz = self.rhod.len();
        let rhod = self.rhod.as_slice();
        let flux = &self.flux;

        let removed: f64 = match (&mut self.number_rate, state.try_get(Field::Nr)) {
            (Some(number_rate), Some(nr)) => self
                .mass_rate
                .par_columns_mut()
                .zip(number_rate.par_columns_mut())
                .zip(rr.as_slice().par_chunks(nz))
                .zip(nr.as_slice().par_chunks(nz))
                .map(|(((mass_rate, number_rate), rain_mass), rain_number)| {
                    flux.column_flux(
                        ColumnRates {
                            rain_mass: mass_rate,
                            rain_number: Some(number_rate),
                        },
                        ColumnState {
                            rhod,
                            rain_mass,
                            rain_number: Some(rain_number),
                        },
                        dt,
                        dz,
                    )
                })
                .sum(),
            _ => self
                .mass_rate
                .par_columns_mut()
                .zip(rr.as_slice().par_chunks(nz))
                .map(|(mass_rate, rain_mass)| {
                    flux.column_flux(
                        ColumnRates {
                            rain_mass: mass_rate,
                            rain_number: None,
                        },
                        ColumnState {
                            rhod,
                            rain_mass,
                            rain_number: None,
                        },
                        dt,
                        dz,
                    )
                })
                .sum(),
        };

        self.puddle.add(removed);
        self.last_run = Some(timestep);
        debug!(timestep, removed, puddle = self.puddle.mass(), "columns sedimented");
        let merged = self.merge(state, rhs);
        self.last_merge = Some((timestep, stage));
        sync.wait();
        merged.map(|()| true)
    }

    /// Add the stored rates to the rain tendencies
    fn merge(&self, state: &ModelState, rhs: &mut Tendencies) -> Result<()> {
        let rr_rhs = rhs.get_mut(Field::Rr)?;
        rr_rhs.alpha.add_assign(&self.mass_rate);
        nancheck(rr_rhs.alpha.as_slice(), "rr", Process::Precipitation.label())?;
        if let Some(number_rate) = &self.number_rate {
            if state.contains(Field::Nr) {
                let nr_rhs = rhs.get_mut(Field::Nr)?;
                nr_rhs.alpha.add_assign(number_rate);
                nancheck(nr_rhs.alpha.as_slice(), "nr", Process::Precipitation.label())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::hooks::NoSync;
    use approx::assert_relative_eq;

    fn setup(scheme: MicrophysicsScheme) -> (ModelState, Tendencies, Vec<f64>) {
        let grid = Grid::new(4, 1, 5, 10.0, 10.0, 10.0).unwrap();
        let mut state = ModelState::new(&grid.whole(), scheme, false);
        state.get_mut(Field::Rr).unwrap().fill(1e-4);
        if scheme.has_rain_number() {
            state.get_mut(Field::Nr).unwrap().fill(1e5);
        }
        let rhs = Tendencies::new(&state);
        (state, rhs, vec![1.1; 6])
    }

    #[test]
    fn fall_speed_conserves_mass_in_the_column() {
        let rhod = [1.2, 1.1, 1.0, 0.9];
        let q = [1e-4, 2e-4, 3e-4, 1e-4];
        let mut rate = [0.0; 4];
        let dz = 50.0;
        let bottom = ConstantFallSpeed::sediment(&rhod, &q, 5.0, dz, &mut rate);
        // column change equals what leaves through the bottom
        let change: f64 = (0..4).map(|k| rate[k] * rhod[k] * dz).sum();
        assert_relative_eq!(change, -bottom, max_relative = 1e-12);
        assert_relative_eq!(bottom, 1.2 * 5.0 * 1e-4);
    }

    #[test]
    fn runs_once_per_timestep_at_first_stage_only() {
        let (state, mut rhs, rhod) = setup(MicrophysicsScheme::Bulk1m);
        let mut integrator = ColumnPrecipitationIntegrator::new(
            ConstantFallSpeed::default(),
            state.subdomain(),
            MicrophysicsScheme::Bulk1m,
            &rhod,
        )
        .unwrap();
        assert!(integrator
            .integrate(&state, &mut rhs, 0, 0, 1.0, 10.0, &NoSync)
            .unwrap());
        let merged = rhs.get(Field::Rr).unwrap().alpha.clone();
        let puddle = integrator.puddle().mass();
        assert!(puddle > 0.0);

        // a second call in the same stage changes nothing
        assert!(!integrator
            .integrate(&state, &mut rhs, 0, 0, 1.0, 10.0, &NoSync)
            .unwrap());
        assert_eq!(rhs.get(Field::Rr).unwrap().alpha, merged);

        // the next stage gets the same rates on a fresh rhs without a rerun
        rhs.get_mut(Field::Rr).unwrap().clear();
        assert!(!integrator
            .integrate(&state, &mut rhs, 0, 1, 1.0, 10.0, &NoSync)
            .unwrap());
        assert_eq!(rhs.get(Field::Rr).unwrap().alpha, merged);
        assert_eq!(integrator.puddle().mass(), puddle);

        // next timestep runs again
        assert!(integrator
            .integrate(&state, &mut rhs, 1, 0, 1.0, 10.0, &NoSync)
            .unwrap());
        assert_relative_eq!(integrator.puddle().mass(), 2.0 * puddle);
    }

    #[test]
    fn removed_column_mass_matches_the_puddle() {
        let grid = Grid::new(1, 1, 5, 10.0, 10.0, 10.0).unwrap();
        let mut state = ModelState::new(&grid.whole(), MicrophysicsScheme::Bulk1m, false);
        state.get_mut(Field::Rr).unwrap().fill(1e-4);
        let rhod = [1.2, 1.15, 1.1, 1.05, 1.0];
        let (dt, dz) = (2.0, 10.0);
        let column_mass = |state: &ModelState| -> f64 {
            let rr = state.get(Field::Rr).unwrap();
            rr.column(0).iter().zip(&rhod).map(|(q, r)| q * r * dz).sum()
        };
        let before = column_mass(&state);

        let mut integrator = ColumnPrecipitationIntegrator::new(
            ConstantFallSpeed::default(),
            state.subdomain(),
            MicrophysicsScheme::Bulk1m,
            &rhod,
        )
        .unwrap();
        let mut rhs = Tendencies::new(&state);
        // two half-step updates, rhs recomposed in between
        for stage in 0..2 {
            rhs.get_mut(Field::Rr).unwrap().clear();
            integrator
                .integrate(&state, &mut rhs, 0, stage, dt, dz, &NoSync)
                .unwrap();
            let alpha = rhs.get(Field::Rr).unwrap().alpha.clone();
            for (q, a) in state
                .get_mut(Field::Rr)
                .unwrap()
                .as_mut_slice()
                .iter_mut()
                .zip(alpha.as_slice())
            {
                *q += 0.5 * dt * a;
            }
        }

        let lost = before - column_mass(&state);
        assert!(lost > 0.0);
        assert_relative_eq!(lost, integrator.puddle().mass(), max_relative = 1e-12);
    }

    #[test]
    fn short_density_profile_is_a_configuration_error() {
        let grid = Grid::new(4, 1, 5, 10.0, 10.0, 10.0).unwrap();
        let err = ColumnPrecipitationIntegrator::new(
            ConstantFallSpeed::default(),
            &grid.whole(),
            MicrophysicsScheme::Bulk1m,
            &[1.1; 3],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ForcingError::MissingProfile {
                profile: ProfileKind::Rhod,
                ..
            }
        ));
    }

    #[test]
    fn two_moment_sediments_number_too() {
        let (state, mut rhs, rhod) = setup(MicrophysicsScheme::Bulk2m);
        let mut integrator = ColumnPrecipitationIntegrator::new(
            ConstantFallSpeed::default(),
            state.subdomain(),
            MicrophysicsScheme::Bulk2m,
            &rhod,
        )
        .unwrap();
        integrator
            .integrate(&state, &mut rhs, 0, 0, 1.0, 10.0, &NoSync)
            .unwrap();
        let nr = &rhs.get(Field::Nr).unwrap().alpha;
        // uniform number: only the top level loses drops
        assert!(nr.get(0, 0, 4) < 0.0);
        assert!(integrator.number_rate().is_some());
    }

    #[test]
    fn puddle_take_resets() {
        let mut puddle = LiquidPuddle::default();
        puddle.add(0.5);
        puddle.add(0.25);
        assert_eq!(puddle.take(), 0.75);
        assert_eq!(puddle.mass(), 0.0);
    }
}
