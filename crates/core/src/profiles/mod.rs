//! Vertical profiles: storage, borrowed views, and the environmental solver
//!
//! Profiles are one-dimensional arrays indexed by vertical level. They are
//! created once at setup, filled by [`EnvironmentalProfileSolver`] and the
//! case setup, and handed to the stepping code as [`ProfileViews`] whose
//! lifetime is bounded by the owning [`ProfileStore`].

mod height_factor;
mod solver;
mod store;

pub use height_factor::height_decay_factor;
pub use solver::{
    average_stability, reference_state, EnvironmentalProfileSolver, EnvironmentalProfiles,
    ProfileSolverConfig, Sounding, UniformSounding,
};
pub use store::{ProfileStore, ProfileViews};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Named vertical profile variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileKind {
    /// Environmental potential temperature (K)
    ThE,
    /// Environmental pressure (Pa)
    PE,
    /// Environmental vapor mixing ratio (kg/kg)
    RvE,
    /// Environmental liquid water mixing ratio (kg/kg)
    RlE,
    /// Reference potential temperature of the anelastic base state (K)
    ThRef,
    /// Reference density (kg/m³), one extra level on top
    Rhod,
    /// Large-scale subsidence velocity (m/s)
    WLs,
    /// Height-decay factor for surface momentum flux (1/m)
    HgtFctrVctr,
    /// Height-decay factor for surface scalar fluxes (1/m)
    HgtFctrSclr,
    /// Large-scale horizontal advection tendency of θ (K/s)
    ThLs,
    /// Large-scale horizontal advection tendency of rv (1/s)
    RvLs,
    /// Geostrophic wind, x component (m/s)
    UGeo,
    /// Geostrophic wind, y component (m/s)
    VGeo,
    /// Subgrid-scale mixing length (m)
    MixLen,
    /// Dimensionless nudging weight
    RelaxCoeff,
}

impl ProfileKind {
    /// Every profile variant
    pub const ALL: [ProfileKind; 15] = [
        ProfileKind::ThE,
        ProfileKind::PE,
        ProfileKind::RvE,
        ProfileKind::RlE,
        ProfileKind::ThRef,
        ProfileKind::Rhod,
        ProfileKind::WLs,
        ProfileKind::HgtFctrVctr,
        ProfileKind::HgtFctrSclr,
        ProfileKind::ThLs,
        ProfileKind::RvLs,
        ProfileKind::UGeo,
        ProfileKind::VGeo,
        ProfileKind::MixLen,
        ProfileKind::RelaxCoeff,
    ];

    /// Number of levels for a grid with `nz` levels
    pub fn len(self, nz: usize) -> usize {
        match self {
            ProfileKind::Rhod => nz + 1,
            _ => nz,
        }
    }

    /// Profiles that large-scale update hooks may rewrite during a run
    pub fn is_large_scale(self) -> bool {
        matches!(
            self,
            ProfileKind::ThLs | ProfileKind::RvLs | ProfileKind::UGeo | ProfileKind::VGeo
        )
    }
}

/// A 1D array indexed by vertical level
#[derive(Debug, Clone, PartialEq)]
pub struct VerticalProfile {
    values: DVector<f64>,
}

impl VerticalProfile {
    /// Zero profile with `len` levels
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            values: DVector::zeros(len),
        }
    }

    /// Profile copied from a slice
    #[must_use]
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            values: DVector::from_column_slice(values),
        }
    }

    /// Contiguous view of the values
    pub fn as_slice(&self) -> &[f64] {
        self.values.as_slice()
    }
}
