//! DYCOMS-II nocturnal marine stratocumulus (research flights RF01 and RF02)
//!
//! # References
//!
//! - Stevens et al. (2005), Mon. Wea. Rev. 133, 1443-1462 (RF01)
//! - Ackerman et al. (2009), Mon. Wea. Rev. 137, 1083-1110 (RF02)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::CaseSetup;
use crate::error::Result;
use crate::fields::{Field, FieldArray, ModelState};
use crate::forcing::SurfaceFluxSchedule;
use crate::grid::Grid;
use crate::params::{ForceParameters, ProcessToggles, UserParams};
use crate::profiles::{
    EnvironmentalProfileSolver, EnvironmentalProfiles, ProfileKind, ProfileSolverConfig,
    ProfileStore, ProfileViews, Sounding,
};

/// DYCOMS-II case constants
pub mod constants {
    /// Surface pressure (Pa)
    pub const SURFACE_PRESSURE: f64 = 101_780.0;
    /// Domain depth (m)
    pub const DEPTH: f64 = 1500.0;
    /// Base of the sponge layer (m)
    pub const Z_ABS: f64 = 1250.0;
    /// e-folding height of the surface momentum flux (m)
    pub const Z_RLX_VCTR: f64 = 25.0;
    /// Amplitude of the random initial θ perturbation (K)
    pub const TH_PERTURBATION: f64 = 0.1;
    /// Upper bound of the SGS mixing length (m)
    pub const MAX_MIX_LEN: f64 = 70.0;
}

use constants::{DEPTH, MAX_MIX_LEN, SURFACE_PRESSURE, TH_PERTURBATION, Z_ABS, Z_RLX_VCTR};

/// DYCOMS-II research flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResearchFlight {
    /// Non-drizzling stratocumulus, dry free troposphere
    Rf01,
    /// Drizzling stratocumulus
    Rf02,
}

/// DYCOMS-II case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dycoms {
    flight: ResearchFlight,
}

impl Dycoms {
    #[must_use]
    pub fn new(flight: ResearchFlight) -> Self {
        Self { flight }
    }

    pub fn flight(&self) -> ResearchFlight {
        self.flight
    }

    /// Initial inversion height (m)
    pub fn inversion_height(&self) -> f64 {
        match self.flight {
            ResearchFlight::Rf01 => 840.0,
            ResearchFlight::Rf02 => 795.0,
        }
    }

    fn horizontal_extent(&self) -> f64 {
        match self.flight {
            ResearchFlight::Rf01 => 3360.0,
            ResearchFlight::Rf02 => 6400.0,
        }
    }

    /// Sponge-layer weight: `sin²` ramp from 0 at `Z_ABS` to 1 at the domain top
    fn relax_coeff(z: f64) -> f64 {
        if z < Z_ABS {
            0.0
        } else {
            let phase = std::f64::consts::FRAC_PI_2 * (z - Z_ABS) / (DEPTH - Z_ABS);
            phase.sin().powi(2)
        }
    }

    /// Random θ perturbation over the global grid, periodic in the horizontal
    ///
    /// Drawn globally so every worker sees the same field regardless of the
    /// decomposition.
    fn perturbation(grid: &Grid, seed: u64) -> Vec<f64> {
        let (nx, ny, nz) = (grid.nx, grid.ny, grid.nz);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut field: Vec<f64> = (0..nx * ny * nz)
            .map(|_| rng.random_range(-TH_PERTURBATION..TH_PERTURBATION))
            .collect();
        let idx = |i: usize, j: usize, k: usize| (i * ny + j) * nz + k;

        // last index duplicates the first on a cyclic grid
        for j in 0..ny {
            for k in 0..nz {
                field[idx(nx - 1, j, k)] = field[idx(0, j, k)];
            }
        }
        if ny > 1 {
            for i in 0..nx {
                for k in 0..nz {
                    field[idx(i, ny - 1, k)] = field[idx(i, 0, k)];
                }
            }
        }
        field
    }
}

impl Sounding for Dycoms {
    fn theta_l(&self, z: f64) -> f64 {
        let z_i = self.inversion_height();
        match self.flight {
            ResearchFlight::Rf01 if z < z_i => 289.0,
            ResearchFlight::Rf01 => 297.5,
            ResearchFlight::Rf02 if z < z_i => 288.3,
            ResearchFlight::Rf02 => 295.0 + (z - z_i).cbrt(),
        }
    }

    fn total_water(&self, z: f64) -> f64 {
        let z_i = self.inversion_height();
        match self.flight {
            ResearchFlight::Rf01 if z < z_i => 9.5e-3,
            ResearchFlight::Rf01 => 1.5e-3,
            ResearchFlight::Rf02 if z < z_i => 9.45e-3,
            ResearchFlight::Rf02 => (5.0 - 3.0 * (1.0 - ((z_i - z) / 500.0).exp())) * 1e-3,
        }
    }
}

impl CaseSetup for Dycoms {
    fn name(&self) -> &'static str {
        match self.flight {
            ResearchFlight::Rf01 => "DYCOMS-II RF01",
            ResearchFlight::Rf02 => "DYCOMS-II RF02",
        }
    }

    fn domain_extent(&self) -> [f64; 3] {
        let x = self.horizontal_extent();
        [x, x, DEPTH]
    }

    fn force_parameters(&self) -> ForceParameters {
        let flux = self.surface_fluxes().flux();
        ForceParameters {
            f_sens: flux.sensible,
            f_lat: flux.latent,
            ..ForceParameters::default()
        }
    }

    fn processes(&self) -> ProcessToggles {
        ProcessToggles {
            radiation: true,
            subsidence: true,
            friction: true,
            buoyancy_wet: true,
            ..ProcessToggles::default()
        }
    }

    fn surface_fluxes(&self) -> SurfaceFluxSchedule {
        match self.flight {
            ResearchFlight::Rf01 => SurfaceFluxSchedule::constant(15.0, 115.0),
            ResearchFlight::Rf02 => SurfaceFluxSchedule::constant(16.0, 93.0),
        }
    }

    fn wind(&self, z: f64) -> [f64; 2] {
        match self.flight {
            ResearchFlight::Rf01 => [7.0, -5.5],
            ResearchFlight::Rf02 => [3.0 + 4.3 * z / 1000.0, -9.0 + 5.6 * z / 1000.0],
        }
    }

    fn set_profiles(
        &self,
        grid: &Grid,
        user: &UserParams,
        store: &mut ProfileStore,
    ) -> Result<EnvironmentalProfiles> {
        let solver = EnvironmentalProfileSolver::new(ProfileSolverConfig {
            nz: grid.nz,
            dz: grid.dz,
            surface_pressure: SURFACE_PRESSURE,
            divergence: self.force_parameters().divergence,
            z0_momentum: Z_RLX_VCTR,
            z0_scalar: user.z_rlx_sclr,
        })?;
        let env = solver.solve(self)?;
        store.apply_environment(&env)?;

        let heights: Vec<f64> = (0..grid.nz).map(|k| grid.height(k)).collect();
        let mix_len: Vec<f64> = heights
            .iter()
            .map(|&z| z.max(0.5 * grid.dz).min(MAX_MIX_LEN))
            .collect();
        let relax: Vec<f64> = heights.iter().map(|&z| Self::relax_coeff(z)).collect();
        let u_geo: Vec<f64> = heights.iter().map(|&z| self.wind(z)[0]).collect();
        let v_geo: Vec<f64> = heights.iter().map(|&z| self.wind(z)[1]).collect();
        store.set(ProfileKind::MixLen, &mix_len)?;
        store.set(ProfileKind::RelaxCoeff, &relax)?;
        store.set(ProfileKind::UGeo, &u_geo)?;
        store.set(ProfileKind::VGeo, &v_geo)?;

        info!(
            case = self.name(),
            nz = grid.nz,
            dz = grid.dz,
            lwp_g_m2 = env.liquid_water_path * 1e3,
            "Case profiles set"
        );
        Ok(env)
    }

    fn initial_condition(
        &self,
        grid: &Grid,
        user: &UserParams,
        _profiles: ProfileViews<'_>,
        state: &mut ModelState,
    ) -> Result<()> {
        let sub = state.subdomain().clone();
        let perturbation = Self::perturbation(grid, user.rng_seed);
        let (ny, nz) = (grid.ny, grid.nz);

        let th = FieldArray::from_fn(&sub, |i, j, k| {
            let (gi, gj) = (sub.i.start + i, sub.j.start + j);
            self.theta_l(grid.height(k)) + perturbation[(gi * ny + gj) * nz + k]
        });
        let rv = FieldArray::from_fn(&sub, |_, _, k| self.total_water(grid.height(k)));
        let u = FieldArray::from_fn(&sub, |_, _, k| self.wind(grid.height(k))[0]);

        *state.get_mut(Field::Th)? = th;
        *state.get_mut(Field::Rv)? = rv;
        *state.get_mut(Field::U)? = u;
        state.get_mut(Field::W)?.fill(0.0);
        if grid.is_3d() {
            let v = FieldArray::from_fn(&sub, |_, _, k| self.wind(grid.height(k))[1]);
            *state.get_mut(Field::V)? = v;
        }
        for field in [Field::Rc, Field::Rr, Field::Nc, Field::Nr] {
            if state.contains(field) {
                state.get_mut(field)?.fill(0.0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::MicrophysicsScheme;

    #[test]
    fn soundings_jump_at_the_inversion() {
        let rf01 = Dycoms::new(ResearchFlight::Rf01);
        assert_eq!(rf01.theta_l(839.0), 289.0);
        assert_eq!(rf01.theta_l(841.0), 297.5);
        assert_eq!(rf01.total_water(0.0), 9.5e-3);

        let rf02 = Dycoms::new(ResearchFlight::Rf02);
        assert!((rf02.theta_l(795.0 + 8.0) - 297.0).abs() < 1e-12);
        // rt continuous from 5 g/kg just above the inversion toward 2 g/kg aloft
        assert!((rf02.total_water(795.0) - 5e-3).abs() < 1e-12);
        assert!(rf02.total_water(1500.0) < 3e-3);
    }

    #[test]
    fn relax_coeff_ramps_in_the_sponge() {
        assert_eq!(Dycoms::relax_coeff(1000.0), 0.0);
        assert_eq!(Dycoms::relax_coeff(Z_ABS), 0.0);
        assert!((Dycoms::relax_coeff(DEPTH) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn perturbation_is_bounded_and_cyclic() {
        let grid = Grid::new(8, 4, 5, 10.0, 10.0, 10.0).unwrap();
        let p = Dycoms::perturbation(&grid, 44);
        assert!(p.iter().all(|v| v.abs() <= TH_PERTURBATION));
        let idx = |i: usize, j: usize, k: usize| (i * 4 + j) * 5 + k;
        for k in 0..5 {
            assert_eq!(p[idx(7, 1, k)], p[idx(0, 1, k)]);
            assert_eq!(p[idx(3, 3, k)], p[idx(3, 0, k)]);
        }
        assert_eq!(p, Dycoms::perturbation(&grid, 44));
    }

    #[test]
    fn initial_condition_matches_across_decompositions() {
        let case = Dycoms::new(ResearchFlight::Rf02);
        let grid = Grid::from_extent(case.domain_extent(), 6, 1, 31).unwrap();
        let user = UserParams::default();
        let mut store = ProfileStore::new(grid.nz);
        case.set_profiles(&grid, &user, &mut store).unwrap();

        let mut whole = ModelState::new(&grid.whole(), MicrophysicsScheme::Bulk1m, false);
        case.initial_condition(&grid, &user, store.views(), &mut whole)
            .unwrap();
        let subs = grid.decompose(2).unwrap();
        let mut right = ModelState::new(&subs[1], MicrophysicsScheme::Bulk1m, false);
        case.initial_condition(&grid, &user, store.views(), &mut right)
            .unwrap();

        let offset = subs[1].i.start;
        for k in 0..grid.nz {
            assert_eq!(
                right.get(Field::Th).unwrap().get(0, 0, k),
                whole.get(Field::Th).unwrap().get(offset, 0, k)
            );
        }
        assert_eq!(whole.get(Field::U).unwrap().get(0, 0, 0), 3.0);
    }
}
