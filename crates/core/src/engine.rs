//! Per-worker forcing engine
//!
//! The dynamical core owns the state and the time loop; it calls the engine
//! at four points of every run:
//!
//! ```text
//! before_loop()                          once
//! for timestep in 0..nt {
//!     before_step(timestep, state)
//!     for stage in 0..2 {
//!         update_rhs(state, rhs, stage)  // (alpha, beta) for every field
//!         ... integrator applies rhs ...
//!     }
//!     after_step(timestep)
//! }
//! ```
//!
//! Every worker runs its own engine over its own subdomain. The engines meet
//! only at the shared [`SyncPoint`], [`LevelSums`] and [`PuddleLog`].

use tracing::{debug, info};

use crate::composer::{SourceTermComposer, Tendencies};
use crate::error::{ForcingError, Result};
use crate::fields::{Field, ModelState};
use crate::forcing::{SurfaceFlux, SurfaceFluxSchedule};
use crate::hooks::{HorizontalMeans, LevelSums, PuddleLog, SyncPoint, TimeSteppingHooks};
use crate::params::RuntimeParams;
use crate::precipitation::{ColumnPrecipitationIntegrator, ColumnwiseFlux, ConstantFallSpeed, LiquidPuddle};

/// Forcing engine of one worker
pub struct ForcingEngine<'a, F = ConstantFallSpeed> {
    params: RuntimeParams<'a>,
    composer: SourceTermComposer,
    precipitation: Option<ColumnPrecipitationIntegrator<F>>,
    hooks: TimeSteppingHooks,
    schedule: SurfaceFluxSchedule,
    surface: SurfaceFlux,
    last_surface_update: Option<u64>,
    timestep: u64,
    means: HorizontalMeans<'a>,
    idle_puddle: LiquidPuddle,
    sync: &'a dyn SyncPoint,
    log: &'a PuddleLog,
}

impl<'a, F: ColumnwiseFlux> ForcingEngine<'a, F> {
    /// Engine for the subdomain of `state`
    ///
    /// `microphysics` supplies the column sedimentation routine; pass `None`
    /// to run without precipitation. `sync`, `sums` and `log` are shared by
    /// all workers of the run; `sums` must be sized for the same worker count
    /// as `sync`.
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingField`] if a field with its source switch on is
    /// not carried by `state`, a 3D run lacks `v`, or sedimentation is
    /// requested for a scheme without rain. [`ForcingError::MissingProfile`]
    /// if the reference density is shorter than the column.
    pub fn new(
        params: RuntimeParams<'a>,
        state: &ModelState,
        schedule: SurfaceFluxSchedule,
        microphysics: Option<F>,
        sync: &'a dyn SyncPoint,
        sums: &'a LevelSums,
        log: &'a PuddleLog,
    ) -> Result<Self> {
        for field in [Field::Th, Field::Rv, Field::U, Field::W] {
            if !state.contains(field) {
                return Err(ForcingError::MissingField {
                    field,
                    context: "required by every run",
                });
            }
        }
        if params.grid.is_3d() && !state.contains(Field::V) {
            return Err(ForcingError::MissingField {
                field: Field::V,
                context: "required by 3D runs",
            });
        }
        for &field in params.scheme.hydrometeors() {
            if !state.contains(field) {
                return Err(ForcingError::MissingField {
                    field,
                    context: "carried by the microphysics scheme",
                });
            }
        }

        let precipitation = match microphysics {
            Some(flux) if params.scheme.has_rain() => Some(ColumnPrecipitationIntegrator::new(
                flux,
                state.subdomain(),
                params.scheme,
                params.profiles.rhod,
            )?),
            Some(_) => {
                return Err(ForcingError::MissingField {
                    field: Field::Rr,
                    context: "sedimentation needs a scheme with rain",
                })
            }
            None => None,
        };

        let rank = state.subdomain().rank;
        if rank == 0 {
            info!(
                scheme = ?params.scheme,
                precipitation = precipitation.is_some(),
                columns = state.subdomain().n_columns(),
                "Forcing engine ready"
            );
        }

        Ok(Self {
            composer: SourceTermComposer::new(&params, state),
            hooks: TimeSteppingHooks::new(rank, params.spinup),
            params,
            precipitation,
            schedule,
            surface: SurfaceFlux::default(),
            last_surface_update: None,
            timestep: 0,
            means: if sums.workers() > 1 {
                HorizontalMeans::shared(sums, sync)
            } else {
                HorizontalMeans::local()
            },
            idle_puddle: LiquidPuddle::default(),
            sync,
            log,
        })
    }

    /// Validated runtime parameters
    pub fn params(&self) -> &RuntimeParams<'a> {
        &self.params
    }

    /// Composer, for inspecting field modes
    pub fn composer(&self) -> &SourceTermComposer {
        &self.composer
    }

    /// Column integrator, when precipitation is on
    pub fn precipitation(&self) -> Option<&ColumnPrecipitationIntegrator<F>> {
        self.precipitation.as_ref()
    }

    /// Whether rain formation is active (off during spinup)
    pub fn rain_enabled(&self) -> bool {
        self.hooks.spinup().rain_enabled()
    }

    /// Surface heat flux currently applied
    pub fn surface_flux(&self) -> SurfaceFlux {
        self.surface
    }

    /// Timestep at which the surface flux was last set by the schedule
    pub fn last_surface_update(&self) -> Option<u64> {
        self.last_surface_update
    }

    /// Re-apply the scheduled surface flux at the next step
    pub fn rearm_surface_fluxes(&mut self) {
        self.schedule.rearm();
    }

    /// Hook run once before the time loop
    pub fn before_loop(&mut self) {
        self.hooks.before_loop();
    }

    /// Hook run at the start of `timestep`
    ///
    /// # Errors
    ///
    /// [`ForcingError::Negative`] if the vapor field holds a negative value.
    pub fn before_step(&mut self, timestep: u64, state: &ModelState) -> Result<()> {
        self.timestep = timestep;
        self.hooks.before_step(timestep, state)?;
        if let Some(flux) = self.schedule.update(timestep) {
            self.surface = flux;
            self.last_surface_update = Some(timestep);
            debug!(timestep, sensible = flux.sensible, latent = flux.latent, "surface flux set");
        }
        Ok(())
    }

    /// Fill `rhs` with the coefficients of every field at sub-stage `stage`
    ///
    /// Collective: nudging means and precipitation wait on the shared
    /// [`SyncPoint`]. An error returned here leaves the other workers blocked
    /// at their next wait, so a multi-worker driver must abort the whole run
    /// rather than let one worker bail out.
    ///
    /// # Errors
    ///
    /// Numerical errors from the composer or the column integrator.
    pub fn update_rhs(&mut self, state: &ModelState, rhs: &mut Tendencies, stage: usize) -> Result<()> {
        self.composer
            .compose_all(&self.params, state, self.surface, stage, &mut self.means, rhs)?;
        if let Some(precipitation) = &mut self.precipitation {
            precipitation.integrate(
                state,
                rhs,
                self.timestep,
                stage,
                self.params.dt,
                self.params.grid.dz,
                self.sync,
            )?;
        }
        Ok(())
    }

    /// Hook run at the end of `timestep`: log the precipitated mass
    pub fn after_step(&mut self, timestep: u64) {
        let puddle = match &mut self.precipitation {
            Some(precipitation) => precipitation.puddle_mut(),
            None => &mut self.idle_puddle,
        };
        self.hooks.after_step(timestep, puddle, self.log, self.sync);
    }
}

impl<F> std::fmt::Debug for ForcingEngine<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForcingEngine")
            .field("rank", &self.hooks.rank())
            .field("timestep", &self.timestep)
            .field("surface", &self.surface)
            .field("precipitation", &self.precipitation.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::MicrophysicsScheme;
    use crate::forcing::test_support::{params, store};
    use crate::hooks::{LevelSums, NoSync};
    use crate::params::ProcessToggles;
    use crate::precipitation::{ColumnRates, ColumnState};

    struct FixedRemoval(f64);

    impl ColumnwiseFlux for FixedRemoval {
        fn column_flux(&self, rates: ColumnRates<'_>, _column: ColumnState<'_>, _dt: f64, _dz: f64) -> f64 {
            rates.rain_mass.fill(0.0);
            self.0
        }
    }

    #[test]
    fn sedimentation_needs_rain() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::None, ProcessToggles::default());
        let state = crate::forcing::test_support::state(MicrophysicsScheme::None);
        let log = PuddleLog::new();
        let sums = LevelSums::new(1);
        let err = ForcingEngine::new(
            p,
            &state,
            SurfaceFluxSchedule::constant(16.0, 93.0),
            Some(FixedRemoval(1.0)),
            &NoSync,
            &sums,
            &log,
        )
        .unwrap_err();
        assert!(matches!(err, ForcingError::MissingField { field: Field::Rr, .. }));
    }

    #[test]
    fn puddle_collects_every_column_once_per_step() {
        let store = store();
        let p = params(&store, MicrophysicsScheme::Bulk1m, ProcessToggles::none());
        let mut state = crate::forcing::test_support::state(MicrophysicsScheme::Bulk1m);
        state.get_mut(Field::Rv).unwrap().fill(8e-3);
        let log = PuddleLog::new();
        let sums = LevelSums::new(1);
        let mut engine = ForcingEngine::new(
            p,
            &state,
            SurfaceFluxSchedule::constant(0.0, 0.0),
            Some(FixedRemoval(0.25)),
            &NoSync,
            &sums,
            &log,
        )
        .unwrap();
        let mut rhs = Tendencies::new(&state);
        engine.before_loop();
        engine.before_step(0, &state).unwrap();
        engine.update_rhs(&state, &mut rhs, 0).unwrap();
        engine.update_rhs(&state, &mut rhs, 1).unwrap();
        engine.after_step(0);
        let columns = state.subdomain().n_columns() as f64;
        assert_eq!(log.records(), vec![(0, 0.25 * columns)]);
    }
}
