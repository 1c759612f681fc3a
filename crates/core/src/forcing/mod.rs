//! Forcing processes
//!
//! Each process is a pure mapping from part of the model state, the runtime
//! parameters and the profile views to a tendency over the local subdomain.
//! Every function overwrites its output array; folding the result into the
//! `(alpha, beta)` pair is the composer's job.
//!
//! All loops run over vertical columns with rayon (`par_chunks_mut(nz)`), so a
//! process touches only its own column and needs no synchronisation.

pub mod buoyancy;
pub mod coriolis;
pub mod large_scale;
pub mod radiation;
pub mod relaxation;
pub mod subsidence;
pub mod surface_fluxes;

pub use buoyancy::buoyancy;
pub use coriolis::coriolis;
pub use large_scale::large_scale_advection;
pub use radiation::radiative_heating;
pub use relaxation::{nudging, nudging_rate};
pub use subsidence::subsidence;
pub use surface_fluxes::{latent_flux, momentum_flux, sensible_flux, SurfaceFlux, SurfaceFluxSchedule};

use std::fmt;

/// Identifies a forcing process in logs and numerical error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Process {
    Radiation,
    SensibleFlux,
    LatentFlux,
    MomentumFlux,
    Subsidence,
    LargeScale,
    Nudging,
    Buoyancy,
    Coriolis,
    Precipitation,
}

impl Process {
    /// Stage label used in diagnostics
    pub fn label(self) -> &'static str {
        match self {
            Process::Radiation => "radiation",
            Process::SensibleFlux => "sensible surface flux",
            Process::LatentFlux => "latent surface flux",
            Process::MomentumFlux => "momentum surface flux",
            Process::Subsidence => "subsidence",
            Process::LargeScale => "large-scale advection",
            Process::Nudging => "nudging",
            Process::Buoyancy => "buoyancy",
            Process::Coriolis => "coriolis",
            Process::Precipitation => "precipitation",
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One-sided vertical derivative of a column: forward below the top, backward at it
#[inline]
pub(crate) fn vertical_derivative(column: &[f64], k: usize, dz: f64) -> f64 {
    let top = column.len() - 1;
    if k < top {
        (column[k + 1] - column[k]) / dz
    } else {
        (column[k] - column[k - 1]) / dz
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Small fully-populated setups shared by the process tests

    use crate::fields::{MicrophysicsScheme, ModelState};
    use crate::grid::Grid;
    use crate::params::{ForceParameters, ProcessToggles, RuntimeParams, SourceSwitches, UserParams};
    use crate::profiles::{ProfileKind, ProfileStore};

    pub const NZ: usize = 6;
    pub const DZ: f64 = 10.0;

    pub fn grid() -> Grid {
        Grid::new(3, 1, NZ, 20.0, 20.0, DZ).unwrap()
    }

    /// Store with every profile populated with plausible boundary-layer values
    pub fn store() -> ProfileStore {
        let mut store = ProfileStore::new(NZ);
        let level = |f: fn(f64) -> f64| (0..NZ).map(|k| f(k as f64 * DZ)).collect::<Vec<_>>();
        store.set(ProfileKind::ThE, &level(|z| 290.0 + 0.01 * z)).unwrap();
        store.set(ProfileKind::PE, &level(|z| 100_000.0 - 11.5 * z)).unwrap();
        store.set(ProfileKind::RvE, &level(|_| 8e-3)).unwrap();
        store.set(ProfileKind::RlE, &level(|_| 0.0)).unwrap();
        store.set(ProfileKind::ThRef, &level(|_| 290.0)).unwrap();
        store
            .set(ProfileKind::Rhod, &(0..=NZ).map(|k| 1.2 - 1e-4 * k as f64).collect::<Vec<_>>())
            .unwrap();
        store.set(ProfileKind::WLs, &level(|z| -3.75e-6 * z)).unwrap();
        store.set(ProfileKind::HgtFctrVctr, &level(|z| (-z / 25.0).exp() / 25.0)).unwrap();
        store.set(ProfileKind::HgtFctrSclr, &level(|z| (-z / 25.0).exp() / 25.0)).unwrap();
        store.set(ProfileKind::ThLs, &level(|_| -1e-5)).unwrap();
        store.set(ProfileKind::RvLs, &level(|_| 2e-9)).unwrap();
        store.set(ProfileKind::UGeo, &level(|_| 5.0)).unwrap();
        store.set(ProfileKind::VGeo, &level(|_| -2.0)).unwrap();
        store.set(ProfileKind::MixLen, &level(|z| z.max(1.0))).unwrap();
        store.set(ProfileKind::RelaxCoeff, &level(|_| 1.0)).unwrap();
        store
    }

    pub fn params<'a>(
        store: &'a ProfileStore,
        scheme: MicrophysicsScheme,
        processes: ProcessToggles,
    ) -> RuntimeParams<'a> {
        let user = UserParams {
            microphysics: scheme,
            switches: SourceSwitches::for_scheme(scheme),
            ..UserParams::default()
        };
        RuntimeParams::new(&user, processes, grid(), ForceParameters::default(), store.views())
            .unwrap()
    }

    pub fn state(scheme: MicrophysicsScheme) -> ModelState {
        ModelState::new(&grid().whole(), scheme, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_is_backward_at_the_top() {
        let column = [0.0, 1.0, 3.0, 6.0];
        assert_eq!(vertical_derivative(&column, 0, 1.0), 1.0);
        assert_eq!(vertical_derivative(&column, 2, 1.0), 3.0);
        assert_eq!(vertical_derivative(&column, 3, 1.0), 3.0);
    }
}
