//! Named simulation scenarios
//!
//! A case supplies everything scenario-specific: the sounding, winds, domain
//! size, force constants, surface-flux schedule, profiles, and the initial
//! condition. [`CaseSetup`] has no default methods, so every case spells out
//! the full set.

mod dycoms;

pub use dycoms::{Dycoms, ResearchFlight};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForcingError, Result};
use crate::fields::ModelState;
use crate::forcing::SurfaceFluxSchedule;
use crate::grid::Grid;
use crate::params::{ForceParameters, ProcessToggles, UserParams};
use crate::profiles::{EnvironmentalProfiles, ProfileStore, ProfileViews, Sounding};

/// Scenario-specific setup
pub trait CaseSetup: Sounding {
    /// Human-readable case name
    fn name(&self) -> &'static str;

    /// Domain size `[X, Y, Z]` (m)
    fn domain_extent(&self) -> [f64; 3];

    /// Physical constants of the forcings
    fn force_parameters(&self) -> ForceParameters;

    /// Forcing processes the case switches on
    fn processes(&self) -> ProcessToggles;

    /// Surface heat flux schedule
    fn surface_fluxes(&self) -> SurfaceFluxSchedule;

    /// Initial horizontal wind `[u, v]` at height `z` (m/s)
    fn wind(&self, z: f64) -> [f64; 2];

    /// Fill `store` with every profile the case needs
    ///
    /// # Errors
    ///
    /// Configuration or numerical errors from the profile solver.
    fn set_profiles(
        &self,
        grid: &Grid,
        user: &UserParams,
        store: &mut ProfileStore,
    ) -> Result<EnvironmentalProfiles>;

    /// Write the initial state of one subdomain
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingField`] if `state` lacks a prognostic field.
    fn initial_condition(
        &self,
        grid: &Grid,
        user: &UserParams,
        profiles: ProfileViews<'_>,
        state: &mut ModelState,
    ) -> Result<()>;
}

/// The closed set of available cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseKind {
    /// DYCOMS-II nocturnal stratocumulus
    Dycoms(ResearchFlight),
}

impl CaseKind {
    /// Instantiate the case
    pub fn build(self) -> Box<dyn CaseSetup> {
        match self {
            CaseKind::Dycoms(flight) => Box::new(Dycoms::new(flight)),
        }
    }
}

impl fmt::Display for CaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseKind::Dycoms(ResearchFlight::Rf01) => f.write_str("dycoms-rf01"),
            CaseKind::Dycoms(ResearchFlight::Rf02) => f.write_str("dycoms-rf02"),
        }
    }
}

impl FromStr for CaseKind {
    type Err = ForcingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dycoms-rf01" | "dycoms_rf01" => Ok(CaseKind::Dycoms(ResearchFlight::Rf01)),
            "dycoms-rf02" | "dycoms_rf02" | "dycoms" => Ok(CaseKind::Dycoms(ResearchFlight::Rf02)),
            other => Err(ForcingError::invalid(
                "case",
                format!("unknown case '{other}', expected dycoms-rf01 or dycoms-rf02"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_names_round_trip() {
        for kind in [
            CaseKind::Dycoms(ResearchFlight::Rf01),
            CaseKind::Dycoms(ResearchFlight::Rf02),
        ] {
            assert_eq!(kind.to_string().parse::<CaseKind>().unwrap(), kind);
        }
        assert!("bomex".parse::<CaseKind>().is_err());
    }

    #[test]
    fn build_dispatches_to_the_flight() {
        let rf01 = CaseKind::Dycoms(ResearchFlight::Rf01).build();
        let rf02 = CaseKind::Dycoms(ResearchFlight::Rf02).build();
        assert_eq!(rf01.domain_extent()[0], 3360.0);
        assert_eq!(rf02.domain_extent()[0], 6400.0);
        assert_eq!(rf02.surface_fluxes().flux().latent, 93.0);
    }
}
