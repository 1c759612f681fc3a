//! LES Forcing Core Library
//!
//! Source-term composition for a large-eddy simulation of the cloudy
//! atmospheric boundary layer. For every prognostic field the engine builds
//! the semi-implicit coefficients `(alpha, beta)` of
//!
//! ```text
//! dq/dt = alpha + beta · q
//! ```
//!
//! from the active forcings, and hands them to the host model's integrator.
//!
//! ## Layout
//!
//! - [`profiles`]: hydrostatic environmental and reference profiles
//! - [`forcing`]: the individual forcing processes
//! - [`composer`]: per-field assembly of the coefficients
//! - [`precipitation`]: column sedimentation and the surface puddle
//! - [`hooks`]: time-loop hooks, spinup gating, precipitation logging
//! - [`cases`]: case setups (DYCOMS-II RF01 / RF02)
//! - [`engine`]: the per-worker façade tying it all together

pub mod cases;
pub mod composer;
pub mod engine;
pub mod error;
pub mod fields;
pub mod forcing;
pub mod grid;
pub mod hooks;
pub mod params;
pub mod precipitation;
pub mod profiles;
pub mod thermo;

pub use cases::{CaseKind, CaseSetup, Dycoms, ResearchFlight};
pub use composer::{Coefficients, FieldMode, SourceTermComposer, Tendencies};
pub use engine::ForcingEngine;
pub use error::{ForcingError, Result};
pub use fields::{Field, FieldArray, MicrophysicsScheme, ModelState};
pub use forcing::{Process, SurfaceFlux, SurfaceFluxSchedule};
pub use grid::{Grid, Subdomain};
pub use hooks::{
    HorizontalMeans, LevelSums, NoSync, PuddleLog, SpinupState, SyncPoint, TimeSteppingHooks,
    PUDDLE_LOG_FILE,
};
pub use params::{ForceParameters, ProcessToggles, RuntimeParams, SourceSwitches, UserParams};
pub use precipitation::{
    ColumnPrecipitationIntegrator, ColumnRates, ColumnState, ColumnwiseFlux, ConstantFallSpeed,
    LiquidPuddle,
};
pub use profiles::{
    EnvironmentalProfileSolver, EnvironmentalProfiles, ProfileKind, ProfileSolverConfig,
    ProfileStore, ProfileViews, Sounding,
};
