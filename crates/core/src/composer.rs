//! Source-term composition into semi-implicit coefficients
//!
//! For every prognostic field the time integrator consumes
//!
//! ```text
//! dq/dt = alpha + beta · q
//! ```
//!
//! The composer evaluates the enabled forcing processes against the current
//! state and folds them into `alpha` (and `beta` for fields carrying an
//! implicit term). After each contribution the partial sum is scanned: any
//! non-finite value, or a non-negative field that the accumulated tendency
//! would drive below zero within one step, aborts the run.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{nancheck, ForcingError, Result};
use crate::fields::{Field, FieldArray, ModelState};
use crate::forcing::{self, Process, SurfaceFlux};
use crate::grid::Subdomain;
use crate::hooks::HorizontalMeans;
use crate::params::RuntimeParams;

/// How a field's coefficients are produced, fixed at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    /// Source switch off: `alpha = beta = 0`
    Disabled,
    /// Sum of explicit tendencies in `alpha`, `beta = 0`
    Explicit,
    /// Explicit tendencies plus an implicit nudging term in `beta`
    ExplicitImplicit,
}

impl FieldMode {
    /// Mode of `field` under `params`
    pub fn select(params: &RuntimeParams<'_>, field: Field) -> Self {
        if !params.enabled(field) {
            FieldMode::Disabled
        } else if matches!(field, Field::Th | Field::Rv)
            && params.processes.relax_th_rv
            && params.processes.implicit_relaxation
        {
            FieldMode::ExplicitImplicit
        } else {
            FieldMode::Explicit
        }
    }
}

/// The `(alpha, beta)` pair of one field
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    /// Explicit tendency
    pub alpha: FieldArray,
    /// Coefficient of the implicit linear term
    pub beta: FieldArray,
}

impl Coefficients {
    /// Zero coefficients over `sub`
    #[must_use]
    pub fn new(sub: &Subdomain) -> Self {
        Self {
            alpha: FieldArray::new(sub),
            beta: FieldArray::new(sub),
        }
    }

    /// Reset both coefficients to zero
    pub fn clear(&mut self) {
        self.alpha.fill(0.0);
        self.beta.fill(0.0);
    }

    /// Tendency `alpha + beta · q` at flat index `idx`
    #[inline]
    pub fn tendency(&self, q: f64, idx: usize) -> f64 {
        self.alpha.as_slice()[idx] + self.beta.as_slice()[idx] * q
    }
}

/// Per-field coefficients handed to the time integrator
#[derive(Debug, Clone)]
pub struct Tendencies {
    coefficients: FxHashMap<Field, Coefficients>,
}

impl Tendencies {
    /// Zero coefficients for every field carried by `state`
    #[must_use]
    pub fn new(state: &ModelState) -> Self {
        let coefficients = state
            .fields()
            .into_iter()
            .map(|field| (field, Coefficients::new(state.subdomain())))
            .collect();
        Self { coefficients }
    }

    /// Coefficients of `field`
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingField`] if the field is not carried.
    pub fn get(&self, field: Field) -> Result<&Coefficients> {
        self.coefficients.get(&field).ok_or(ForcingError::MissingField {
            field,
            context: "tendency lookup",
        })
    }

    /// Mutable coefficients of `field`
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingField`] if the field is not carried.
    pub fn get_mut(&mut self, field: Field) -> Result<&mut Coefficients> {
        self.coefficients
            .get_mut(&field)
            .ok_or(ForcingError::MissingField {
                field,
                context: "tendency lookup",
            })
    }
}

/// Combines forcing processes into per-field coefficients
#[derive(Debug, Clone)]
pub struct SourceTermComposer {
    modes: FxHashMap<Field, FieldMode>,
    scratch: FieldArray,
}

impl SourceTermComposer {
    /// Select the mode of every field carried by `state`
    #[must_use]
    pub fn new(params: &RuntimeParams<'_>, state: &ModelState) -> Self {
        let modes = state
            .fields()
            .into_iter()
            .map(|field| (field, FieldMode::select(params, field)))
            .collect();
        Self {
            modes,
            scratch: FieldArray::new(state.subdomain()),
        }
    }

    /// Mode of `field`; fields not carried are disabled
    pub fn mode(&self, field: Field) -> FieldMode {
        self.modes
            .get(&field)
            .copied()
            .unwrap_or(FieldMode::Disabled)
    }

    /// Compose the coefficients of every carried field
    ///
    /// Explicit nudging reduces horizontal means through `means`, so with a
    /// shared reduction every worker has to make the same calls.
    ///
    /// # Errors
    ///
    /// Numerical errors from the post-contribution scans.
    pub fn compose_all(
        &mut self,
        params: &RuntimeParams<'_>,
        state: &ModelState,
        surface: SurfaceFlux,
        stage: usize,
        means: &mut HorizontalMeans<'_>,
        rhs: &mut Tendencies,
    ) -> Result<()> {
        for field in state.fields() {
            self.compose(params, state, surface, field, stage, means, rhs.get_mut(field)?)?;
        }
        Ok(())
    }

    /// Compose the coefficients of `field` at integrator sub-stage `stage`
    ///
    /// # Errors
    ///
    /// [`ForcingError::NonFinite`] or [`ForcingError::Negative`] naming the
    /// field and the process after which the anomaly appeared.
    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        &mut self,
        params: &RuntimeParams<'_>,
        state: &ModelState,
        surface: SurfaceFlux,
        field: Field,
        stage: usize,
        means: &mut HorizontalMeans<'_>,
        out: &mut Coefficients,
    ) -> Result<()> {
        out.clear();
        let mode = self.mode(field);
        if mode == FieldMode::Disabled {
            return Ok(());
        }
        let p = params.processes;
        let q = state.get(field)?;

        match field {
            Field::Th => {
                if p.radiation {
                    forcing::radiative_heating(params, state, &mut self.scratch)?;
                    self.fold(params, field, q, Process::Radiation, 1.0, out)?;
                }
                if p.friction {
                    forcing::sensible_flux(params, surface, state, &mut self.scratch)?;
                    self.fold(params, field, q, Process::SensibleFlux, 1.0, out)?;
                }
                self.scalar_large_scale(params, field, q, params.profiles.th_ls, out)?;
                self.relax(params, field, q, params.profiles.th_e, mode, means, out)?;
            }
            Field::Rv => {
                if p.friction {
                    forcing::latent_flux(params, surface, &mut self.scratch);
                    self.fold(params, field, q, Process::LatentFlux, 1.0, out)?;
                }
                self.scalar_large_scale(params, field, q, params.profiles.rv_ls, out)?;
                self.relax(params, field, q, params.profiles.rv_e, mode, means, out)?;
            }
            Field::U | Field::V => {
                if p.friction {
                    forcing::momentum_flux(params, state, field, &mut self.scratch)?;
                    self.fold(params, field, q, Process::MomentumFlux, 1.0, out)?;
                }
                if p.vel_subsidence {
                    forcing::subsidence(params, q, &mut self.scratch);
                    self.fold(params, field, q, Process::Subsidence, 1.0, out)?;
                }
                if p.coriolis {
                    forcing::coriolis(params, state, field, &mut self.scratch)?;
                    self.fold(params, field, q, Process::Coriolis, 1.0, out)?;
                }
            }
            Field::W => {
                // applied trapezoidally: half at each of the two evaluation points
                forcing::buoyancy(params, state, &mut self.scratch)?;
                self.fold(params, field, q, Process::Buoyancy, 0.5, out)?;
                // explicit, so only at the first sub-stage
                if stage == 0 && p.vel_subsidence {
                    forcing::subsidence(params, q, &mut self.scratch);
                    self.fold(params, field, q, Process::Subsidence, 1.0, out)?;
                }
            }
            Field::Rc | Field::Rr | Field::Nc | Field::Nr => {
                if p.subsidence {
                    forcing::subsidence(params, q, &mut self.scratch);
                    self.fold(params, field, q, Process::Subsidence, 1.0, out)?;
                }
            }
        }
        trace!(field = field.name(), stage, ?mode, "coefficients composed");
        Ok(())
    }

    /// Subsidence and large-scale advection shared by θ and rv
    fn scalar_large_scale(
        &mut self,
        params: &RuntimeParams<'_>,
        field: Field,
        q: &FieldArray,
        profile: &[f64],
        out: &mut Coefficients,
    ) -> Result<()> {
        if params.processes.subsidence {
            forcing::subsidence(params, q, &mut self.scratch);
            self.fold(params, field, q, Process::Subsidence, 1.0, out)?;
        }
        if params.processes.large_scale {
            forcing::large_scale_advection(profile, &mut self.scratch);
            self.fold(params, field, q, Process::LargeScale, 1.0, out)?;
        }
        Ok(())
    }

    /// Nudging, explicit or implicit depending on `mode`
    #[allow(clippy::too_many_arguments)]
    fn relax(
        &mut self,
        params: &RuntimeParams<'_>,
        field: Field,
        q: &FieldArray,
        environment: &[f64],
        mode: FieldMode,
        means: &mut HorizontalMeans<'_>,
        out: &mut Coefficients,
    ) -> Result<()> {
        if !params.processes.relax_th_rv {
            return Ok(());
        }
        if mode == FieldMode::ExplicitImplicit {
            let rate = forcing::nudging_rate(params);
            let nz = params.grid.nz;
            for (alpha, beta) in out
                .alpha
                .as_mut_slice()
                .chunks_mut(nz)
                .zip(out.beta.as_mut_slice().chunks_mut(nz))
            {
                for k in 0..nz {
                    alpha[k] += rate[k] * environment[k];
                    beta[k] = -rate[k];
                }
            }
            return self.check(params, field, q, Process::Nudging, out);
        }
        let mean = means.mean(q);
        forcing::nudging(params, &mean, environment, &mut self.scratch);
        self.fold(params, field, q, Process::Nudging, 1.0, out)
    }

    /// Add `weight · scratch` to alpha and scan the result
    fn fold(
        &self,
        params: &RuntimeParams<'_>,
        field: Field,
        q: &FieldArray,
        process: Process,
        weight: f64,
        out: &mut Coefficients,
    ) -> Result<()> {
        nancheck(self.scratch.as_slice(), field.name(), process.label())?;
        for (a, f) in out
            .alpha
            .as_mut_slice()
            .iter_mut()
            .zip(self.scratch.as_slice())
        {
            *a += weight * f;
        }
        self.check(params, field, q, process, out)
    }

    /// Post-contribution scan of the accumulated coefficients
    fn check(
        &self,
        params: &RuntimeParams<'_>,
        field: Field,
        q: &FieldArray,
        process: Process,
        out: &Coefficients,
    ) -> Result<()> {
        nancheck(out.alpha.as_slice(), field.name(), process.label())?;
        nancheck(out.beta.as_slice(), field.name(), process.label())?;
        if !field.is_non_negative() {
            return Ok(());
        }
        let dt = params.dt;
        for (idx, &value) in q.as_slice().iter().enumerate() {
            let tendency = out.tendency(value, idx);
            let predicted = value + dt * tendency;
            if tendency < 0.0 && predicted < 0.0 {
                return Err(ForcingError::Negative {
                    quantity: field.name().to_owned(),
                    stage: process.label(),
                    index: idx,
                    value: predicted,
                });
            }
        }
        Ok(())
    }
}
