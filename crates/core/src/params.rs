//! Run configuration: user parameters, force constants, and validated runtime parameters
//!
//! [`UserParams`] and [`ForceParameters`] are plain serde structs filled by the
//! case-setup layer. [`RuntimeParams`] is built from them once, before the
//! first step, and borrows the profile arrays for the rest of the run.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ForcingError, Result};
use crate::fields::{Field, MicrophysicsScheme};
use crate::grid::Grid;
use crate::profiles::{ProfileKind, ProfileViews};

/// Relaxation time scale of the θ and rv nudging (s)
pub const TAU_RELAX: f64 = 300.0;

/// Physical constants appearing in the forcings
///
/// Defaults are the DYCOMS-II RF02 values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParameters {
    /// Total water threshold marking the inversion (kg/kg)
    pub q_i: f64,
    /// Longwave absorption coefficient κ (m²/kg)
    pub heating_kappa: f64,
    /// Cloud-top longwave flux divergence scale (W/m²)
    pub f_0: f64,
    /// Cloud-base longwave warming scale (W/m²)
    pub f_1: f64,
    /// Density just below the inversion (kg/m³)
    pub rho_i: f64,
    /// Large-scale horizontal divergence D (1/s)
    pub divergence: f64,
    /// Surface sensible heat flux (W/m²)
    pub f_sens: f64,
    /// Surface latent heat flux (W/m²)
    pub f_lat: f64,
    /// Friction velocity u* (m/s)
    pub u_fric: f64,
    /// Coriolis parameter f (1/s)
    pub coriolis: f64,
    /// Galilean translation of the model frame, `[U, V]` (m/s)
    pub mean_wind: [f64; 2],
}

impl Default for ForceParameters {
    fn default() -> Self {
        Self {
            q_i: 8e-3,
            heating_kappa: 85.0,
            f_0: 70.0,
            f_1: 22.0,
            rho_i: 1.12,
            divergence: 3.75e-6,
            f_sens: 16.0,
            f_lat: 93.0,
            u_fric: 0.25,
            coriolis: 0.0,
            mean_wind: [0.0, 0.0],
        }
    }
}

/// Per-field source switches
///
/// A field whose switch is off evolves by advection only (`alpha = beta = 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SourceSwitches {
    pub th: bool,
    pub rv: bool,
    pub uv: bool,
    pub w: bool,
    pub rc: bool,
    pub rr: bool,
    pub nc: bool,
    pub nr: bool,
}

impl Default for SourceSwitches {
    fn default() -> Self {
        Self::for_scheme(MicrophysicsScheme::None)
    }
}

impl SourceSwitches {
    /// Every switch off
    pub fn none() -> Self {
        Self {
            th: false,
            rv: false,
            uv: false,
            w: false,
            rc: false,
            rr: false,
            nc: false,
            nr: false,
        }
    }

    /// Dynamics switches on, hydrometeor switches on for the fields `scheme` carries
    pub fn for_scheme(scheme: MicrophysicsScheme) -> Self {
        let carried = scheme.hydrometeors();
        Self {
            th: true,
            rv: true,
            uv: true,
            w: true,
            rc: carried.contains(&Field::Rc),
            rr: carried.contains(&Field::Rr),
            nc: carried.contains(&Field::Nc),
            nr: carried.contains(&Field::Nr),
        }
    }

    /// Switch governing `field`
    pub fn enabled(&self, field: Field) -> bool {
        match field {
            Field::Th => self.th,
            Field::Rv => self.rv,
            Field::U | Field::V => self.uv,
            Field::W => self.w,
            Field::Rc => self.rc,
            Field::Rr => self.rr,
            Field::Nc => self.nc,
            Field::Nr => self.nr,
        }
    }
}

/// Which forcing processes take part in the composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProcessToggles {
    /// Longwave radiative heating of θ
    pub radiation: bool,
    /// Subsidence of scalars
    pub subsidence: bool,
    /// Subsidence of velocity components
    pub vel_subsidence: bool,
    /// Surface fluxes of heat, moisture and momentum
    pub friction: bool,
    /// Include liquid water loading in buoyancy
    pub buoyancy_wet: bool,
    /// Coriolis acceleration toward the geostrophic wind
    pub coriolis: bool,
    /// Nudging of horizontal-mean θ and rv toward the environment
    pub relax_th_rv: bool,
    /// Prescribed large-scale horizontal advection of θ and rv
    pub large_scale: bool,
    /// Carry the nudging term implicitly (`beta = −rate`) instead of in alpha
    pub implicit_relaxation: bool,
}

impl Default for ProcessToggles {
    fn default() -> Self {
        Self {
            radiation: true,
            subsidence: true,
            vel_subsidence: false,
            friction: true,
            buoyancy_wet: true,
            coriolis: false,
            relax_th_rv: true,
            large_scale: false,
            implicit_relaxation: false,
        }
    }
}

impl ProcessToggles {
    /// Every process off
    pub fn none() -> Self {
        Self {
            radiation: false,
            subsidence: false,
            vel_subsidence: false,
            friction: false,
            buoyancy_wet: false,
            coriolis: false,
            relax_th_rv: false,
            large_scale: false,
            implicit_relaxation: false,
        }
    }
}

/// Parameters supplied by the user / case setup before the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserParams {
    /// Number of timesteps
    pub nt: u64,
    /// Timestep (s)
    pub dt: f64,
    /// Timesteps with rain formation disabled
    pub spinup: u64,
    /// Seed of the initial-condition perturbation
    pub rng_seed: u64,
    /// e-folding height of surface scalar fluxes (m)
    pub z_rlx_sclr: f64,
    /// Microphysics flavour
    pub microphysics: MicrophysicsScheme,
    /// Per-field source switches
    pub switches: SourceSwitches,
}

impl Default for UserParams {
    fn default() -> Self {
        Self {
            nt: 100,
            dt: 1.0,
            spinup: 0,
            rng_seed: 44,
            z_rlx_sclr: 25.0,
            microphysics: MicrophysicsScheme::None,
            switches: SourceSwitches::default(),
        }
    }
}

/// Validated parameters of a run, borrowing the profile store
#[derive(Debug, Clone, Copy)]
pub struct RuntimeParams<'a> {
    /// Timestep (s)
    pub dt: f64,
    /// Timesteps with rain formation disabled
    pub spinup: u64,
    /// Global grid
    pub grid: Grid,
    /// Microphysics flavour
    pub scheme: MicrophysicsScheme,
    /// Per-field source switches
    pub switches: SourceSwitches,
    /// Active forcing processes
    pub processes: ProcessToggles,
    /// Physical constants
    pub force: ForceParameters,
    /// Nudging time scale (s)
    pub tau_rlx: f64,
    /// Profile arrays
    pub profiles: ProfileViews<'a>,
}

impl<'a> RuntimeParams<'a> {
    /// Validate user parameters against the grid and populated profiles
    ///
    /// # Errors
    ///
    /// Configuration errors: non-positive `dt`, a grid / profile size mismatch,
    /// a hydrometeor switch for a field the scheme lacks, or an enabled
    /// process whose profiles were never populated.
    pub fn new(
        user: &UserParams,
        processes: ProcessToggles,
        grid: Grid,
        force: ForceParameters,
        profiles: ProfileViews<'a>,
    ) -> Result<Self> {
        if !(user.dt.is_finite() && user.dt > 0.0) {
            return Err(ForcingError::invalid(
                "dt",
                format!("must be positive, got {}", user.dt),
            ));
        }
        if profiles.nz() != grid.nz {
            return Err(ForcingError::InvalidGrid(format!(
                "profiles have {} levels, grid has {}",
                profiles.nz(),
                grid.nz
            )));
        }
        let params = Self {
            dt: user.dt,
            spinup: user.spinup,
            grid,
            scheme: user.microphysics,
            switches: user.switches,
            processes,
            force,
            tau_rlx: TAU_RELAX,
            profiles,
        };
        params.check_switches()?;
        params.check_profiles()?;
        info!(
            dt = params.dt,
            spinup = params.spinup,
            nz = grid.nz,
            scheme = ?params.scheme,
            "Runtime parameters validated"
        );
        Ok(params)
    }

    /// Whether the source switch of `field` is on
    pub fn enabled(&self, field: Field) -> bool {
        self.switches.enabled(field)
    }

    fn check_switches(&self) -> Result<()> {
        let carried = self.scheme.hydrometeors();
        for field in [Field::Rc, Field::Rr, Field::Nc, Field::Nr] {
            if self.enabled(field) && !carried.contains(&field) {
                return Err(ForcingError::MissingField {
                    field,
                    context: "source switch enabled for a field the scheme does not carry",
                });
            }
        }
        Ok(())
    }

    fn check_profiles(&self) -> Result<()> {
        use ProfileKind as P;
        let p = &self.processes;
        let views = &self.profiles;

        if self.enabled(Field::Th) {
            if p.radiation {
                views.require(&[P::PE, P::Rhod], "radiation")?;
                if !self.scheme.hydrometeors().contains(&Field::Rc) {
                    views.require(&[P::RlE], "radiation without a cloud water field")?;
                }
            }
            if p.friction {
                views.require(&[P::HgtFctrSclr, P::PE, P::Rhod], "sensible surface flux")?;
            }
            if p.subsidence {
                views.require(&[P::WLs], "subsidence")?;
            }
            if p.large_scale {
                views.require(&[P::ThLs], "large-scale th advection")?;
            }
            if p.relax_th_rv {
                views.require(&[P::ThE, P::RelaxCoeff], "th nudging")?;
            }
        }
        if self.enabled(Field::Rv) {
            if p.friction {
                views.require(&[P::HgtFctrSclr, P::Rhod], "latent surface flux")?;
            }
            if p.subsidence {
                views.require(&[P::WLs], "subsidence")?;
            }
            if p.large_scale {
                views.require(&[P::RvLs], "large-scale rv advection")?;
            }
            if p.relax_th_rv {
                views.require(&[P::RvE, P::RelaxCoeff], "rv nudging")?;
            }
        }
        if self.enabled(Field::U) {
            if p.friction {
                views.require(&[P::HgtFctrVctr], "surface momentum flux")?;
            }
            if p.vel_subsidence {
                views.require(&[P::WLs], "velocity subsidence")?;
            }
            if p.coriolis {
                views.require(&[P::UGeo, P::VGeo], "coriolis")?;
            }
        }
        if self.enabled(Field::W) {
            views.require(&[P::ThE, P::RvE, P::ThRef], "buoyancy")?;
            if p.vel_subsidence {
                views.require(&[P::WLs], "velocity subsidence")?;
            }
        }
        if p.subsidence
            && [Field::Rc, Field::Rr, Field::Nc, Field::Nr]
                .iter()
                .any(|&f| self.enabled(f))
        {
            views.require(&[P::WLs], "hydrometeor subsidence")?;
        }
        if self.scheme.has_rain() {
            views.require(&[P::Rhod], "column precipitation")?;
        }
        Ok(())
    }
}
