//! Environmental profile solver
//!
//! Derives the initial and reference vertical state from a sounding of
//! liquid-water potential temperature θl(z) and total water rt(z).
//!
//! # Algorithm
//!
//! Integrating upward from the surface, each level is:
//!
//! 1. given a hydrostatic pressure from the moist density one level below,
//! 2. checked for supersaturation with a Tetens-type closure,
//! 3. adjusted by a single linearised condensation step
//!
//! ```text
//! δ = (rt − q_s) / (1 + q_s · L²/(c_pd R_v T²) · p/(p − e_s)),   δ ← max(δ, 0)
//! rv = rt − δ,   θ = θl + L/c_pd · Π⁻¹ · δ
//! ```
//!
//! Negative δ is clamped: already-condensed water is never evaporated in this
//! one-shot adjustment.
//!
//! The reference state is the analytic solution of a column with constant
//! stability `s = ⟨∂ ln θ / ∂z⟩`:
//!
//! ```text
//! θ_ref(z) = θ(0) (1 + 0.608 rv(0)) e^{s z}
//! ρ_ref(z) = ρ_s e^{−s z} [1 − g/(c_pd θ(0)) · (1 − e^{−s z})/s]^{c_pd/R_d − 1}
//! ```

use tracing::{debug, info};

use super::height_decay_factor;
use crate::error::{nancheck, ForcingError, Result};
use crate::grid::MIN_LEVELS;
use crate::thermo::{
    exner, kappa, moist_density, saturation_vapor_pressure, C_PD, GRAVITY, L_TRI, R_D, R_V,
    VIRTUAL_COEFF,
};

/// A prescribed height-dependent thermodynamic state
pub trait Sounding: Send + Sync {
    /// Liquid-water potential temperature at height `z` (K)
    fn theta_l(&self, z: f64) -> f64;

    /// Total water mixing ratio at height `z` (kg/kg)
    fn total_water(&self, z: f64) -> f64;
}

/// Height-independent sounding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformSounding {
    /// Liquid-water potential temperature (K)
    pub theta_l: f64,
    /// Total water mixing ratio (kg/kg)
    pub total_water: f64,
}

impl Sounding for UniformSounding {
    fn theta_l(&self, _z: f64) -> f64 {
        self.theta_l
    }

    fn total_water(&self, _z: f64) -> f64 {
        self.total_water
    }
}

/// Inputs of the profile solver other than the sounding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSolverConfig {
    /// Number of vertical levels
    pub nz: usize,
    /// Vertical spacing (m)
    pub dz: f64,
    /// Surface pressure (Pa)
    pub surface_pressure: f64,
    /// Large-scale horizontal divergence (1/s)
    pub divergence: f64,
    /// e-folding height of the surface momentum flux (m)
    pub z0_momentum: f64,
    /// e-folding height of the surface scalar fluxes (m)
    pub z0_scalar: f64,
}

impl ProfileSolverConfig {
    fn validate(&self) -> Result<()> {
        if self.nz < MIN_LEVELS {
            return Err(ForcingError::InvalidGrid(format!(
                "profile solver needs nz >= {MIN_LEVELS}, got {}",
                self.nz
            )));
        }
        if !(self.dz.is_finite() && self.dz > 0.0) {
            return Err(ForcingError::InvalidGrid(format!(
                "dz must be positive, got {}",
                self.dz
            )));
        }
        if !(self.surface_pressure.is_finite() && self.surface_pressure > 0.0) {
            return Err(ForcingError::invalid(
                "surface_pressure",
                format!("must be positive, got {}", self.surface_pressure),
            ));
        }
        if !self.divergence.is_finite() {
            return Err(ForcingError::invalid("divergence", "must be finite"));
        }
        Ok(())
    }
}

/// Everything the solver derives from a sounding
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentalProfiles {
    /// Temperature (K)
    pub temperature: Vec<f64>,
    /// Hydrostatic pressure (Pa)
    pub pressure: Vec<f64>,
    /// Vapor mixing ratio after adjustment (kg/kg)
    pub vapor: Vec<f64>,
    /// Potential temperature after adjustment (K)
    pub theta: Vec<f64>,
    /// Condensation excess δ, equal to the diagnosed liquid water (kg/kg)
    pub liquid: Vec<f64>,
    /// Moist air density of the adjusted column (kg/m³)
    pub moist_density: Vec<f64>,
    /// Reference potential temperature (K)
    pub theta_ref: Vec<f64>,
    /// Reference density, `nz + 1` levels (kg/m³)
    pub rhod: Vec<f64>,
    /// Subsidence velocity (m/s)
    pub w_ls: Vec<f64>,
    /// Momentum flux height-decay factor (1/m)
    pub hgt_fctr_vctr: Vec<f64>,
    /// Scalar flux height-decay factor (1/m)
    pub hgt_fctr_sclr: Vec<f64>,
    /// Average stability ⟨∂ ln θ / ∂z⟩ (1/m)
    pub stability: f64,
    /// Liquid water path of the adjusted column (kg/m²)
    pub liquid_water_path: f64,
}

/// Moist-adjustment solver for the initial and reference state
#[derive(Debug, Clone)]
pub struct EnvironmentalProfileSolver {
    config: ProfileSolverConfig,
}

impl EnvironmentalProfileSolver {
    /// Create a solver, validating the grid and surface pressure
    ///
    /// # Errors
    ///
    /// Configuration errors for `nz < 3`, non-positive `dz` or surface pressure.
    pub fn new(config: ProfileSolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Solver configuration
    pub fn config(&self) -> &ProfileSolverConfig {
        &self.config
    }

    /// Derive all environmental profiles from `sounding`
    ///
    /// # Errors
    ///
    /// [`ForcingError::InvalidParameter`] if the sounding yields a non-positive
    /// θl or negative rt; [`ForcingError::NonFinite`] if any derived profile is
    /// not finite.
    pub fn solve(&self, sounding: &dyn Sounding) -> Result<EnvironmentalProfiles> {
        let ProfileSolverConfig {
            nz,
            dz,
            surface_pressure: p0,
            ..
        } = self.config;

        let theta_l: Vec<f64> = (0..nz).map(|k| sounding.theta_l(k as f64 * dz)).collect();
        let total_water: Vec<f64> = (0..nz)
            .map(|k| sounding.total_water(k as f64 * dz))
            .collect();
        if let Some(k) = theta_l.iter().position(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(ForcingError::invalid(
                "sounding.theta_l",
                format!("must be positive at level {k}, got {}", theta_l[k]),
            ));
        }
        if let Some(k) = total_water.iter().position(|r| !(r.is_finite() && *r >= 0.0)) {
            return Err(ForcingError::invalid(
                "sounding.total_water",
                format!("must be non-negative at level {k}, got {}", total_water[k]),
            ));
        }

        let mut temperature = vec![0.0; nz];
        let mut pressure = vec![0.0; nz];
        let mut vapor = vec![0.0; nz];
        let mut theta = vec![0.0; nz];
        let mut liquid = vec![0.0; nz];
        let mut density = vec![0.0; nz];

        // surface level straight from the sounding
        pressure[0] = p0;
        theta[0] = theta_l[0];
        vapor[0] = total_water[0];
        temperature[0] = theta_l[0] * exner(p0);
        density[0] = moist_density(p0, temperature[0], vapor[0]);

        let latent_over_cp = L_TRI / C_PD;
        let latent_over_rv = L_TRI / R_V;
        let mut lwp = 0.0;

        for k in 1..nz {
            let rho_below = moist_density(pressure[k - 1], temperature[k - 1], vapor[k - 1]);
            let p = pressure[k - 1] - rho_below * GRAVITY * dz;
            pressure[k] = p;

            let inv_exner = 1.0 / exner(p);
            // temperature of the unadjusted parcel
            let t_guess = theta_l[k] / inv_exner;
            let es = saturation_vapor_pressure(t_guess);
            let qvs = R_D / R_V * es / (p - es);

            // Clausius-Clapeyron curvature of the linearised adjustment
            let cf1 = latent_over_cp * latent_over_rv / (t_guess * t_guess) * p / (p - es);
            let delta = ((total_water[k] - qvs) / (1.0 + qvs * cf1)).max(0.0);

            vapor[k] = total_water[k] - delta;
            theta[k] = theta_l[k] + latent_over_cp * inv_exner * delta;
            liquid[k] = delta;
            temperature[k] = theta[k] * exner(p);
            density[k] = moist_density(p, temperature[k], vapor[k]);
            lwp += delta * density[k] * dz;

            debug!(
                level = k,
                temperature = temperature[k],
                delta,
                "environmental profile level"
            );
        }

        let stability = average_stability(&theta, dz);
        let (theta_ref, rhod) =
            reference_state(theta[0], vapor[0], p0, stability, dz, nz)?;

        let w_ls = (0..nz)
            .map(|k| -self.config.divergence * k as f64 * dz)
            .collect();
        let hgt_fctr_vctr = height_decay_factor(nz, dz, self.config.z0_momentum)?;
        let hgt_fctr_sclr = height_decay_factor(nz, dz, self.config.z0_scalar)?;

        for (values, name) in [
            (&pressure, "p_e"),
            (&theta, "th_e"),
            (&vapor, "rv_e"),
            (&temperature, "T_e"),
        ] {
            nancheck(values, name, "environmental profile")?;
        }

        info!(
            stability,
            lwp_g_m2 = lwp * 1e3,
            p_top = pressure[nz - 1],
            "Environmental profiles derived"
        );

        Ok(EnvironmentalProfiles {
            temperature,
            pressure,
            vapor,
            theta,
            liquid,
            moist_density: density,
            theta_ref,
            rhod,
            w_ls,
            hgt_fctr_vctr,
            hgt_fctr_sclr,
            stability,
            liquid_water_path: lwp,
        })
    }
}

/// Mean of `∂ ln θ / ∂z` over interior levels, by central differences (1/m)
pub fn average_stability(theta: &[f64], dz: f64) -> f64 {
    let nz = theta.len();
    if nz < MIN_LEVELS {
        return 0.0;
    }
    let sum: f64 = (1..nz - 1)
        .map(|k| (theta[k + 1] - theta[k - 1]) / theta[k])
        .sum();
    sum / (nz - 2) as f64 / (2.0 * dz)
}

/// `(1 − e^{−s z}) / s`, continuous through `s = 0`
fn decay_length(stability: f64, z: f64) -> f64 {
    if stability == 0.0 {
        z
    } else {
        -(-stability * z).exp_m1() / stability
    }
}

/// Analytic reference θ (`nz` levels) and density (`nz + 1` levels)
///
/// # Errors
///
/// [`ForcingError::NonFinite`] if the polytropic base turns non-positive within
/// the column, which happens only for strongly unstable or very deep columns.
pub fn reference_state(
    theta0: f64,
    rv0: f64,
    p0: f64,
    stability: f64,
    dz: f64,
    nz: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let virtual_factor = 1.0 + VIRTUAL_COEFF * rv0;
    let theta_ref: Vec<f64> = (0..nz)
        .map(|k| theta0 * virtual_factor * (stability * k as f64 * dz).exp())
        .collect();

    let t_surf = theta0 * exner(p0);
    let rho_surf = p0 / (t_surf * virtual_factor) / R_D;
    let cs = GRAVITY / (C_PD * theta0);
    let exponent = 1.0 / kappa() - 1.0;

    let rhod: Vec<f64> = (0..=nz)
        .map(|k| {
            let z = k as f64 * dz;
            let base = 1.0 - cs * decay_length(stability, z);
            if base <= 0.0 {
                f64::NAN
            } else {
                rho_surf * (-stability * z).exp() * base.powf(exponent)
            }
        })
        .collect();

    nancheck(&theta_ref, "th_ref", "reference state")?;
    nancheck(&rhod, "rhod", "reference state")?;
    Ok((theta_ref, rhod))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(nz: usize, dz: f64) -> ProfileSolverConfig {
        ProfileSolverConfig {
            nz,
            dz,
            surface_pressure: 101_780.0,
            divergence: 3.75e-6,
            z0_momentum: 25.0,
            z0_scalar: 25.0,
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(EnvironmentalProfileSolver::new(config(2, 10.0)).is_err());
        assert!(EnvironmentalProfileSolver::new(config(10, 0.0)).is_err());
        let mut cfg = config(10, 10.0);
        cfg.surface_pressure = 0.0;
        assert!(EnvironmentalProfileSolver::new(cfg).is_err());
    }

    #[test]
    fn surface_level_is_not_adjusted() {
        let sounding = UniformSounding {
            theta_l: 290.0,
            total_water: 0.05,
        };
        let solver = EnvironmentalProfileSolver::new(config(10, 10.0)).unwrap();
        let env = solver.solve(&sounding).unwrap();
        assert_eq!(env.vapor[0], 0.05);
        assert_eq!(env.theta[0], 290.0);
        assert_eq!(env.liquid[0], 0.0);
        // supersaturated above the surface: condensation warms the column
        assert!(env.liquid[1] > 0.0);
        assert!(env.theta[1] > 290.0);
    }

    #[test]
    fn subsidence_is_linear_in_height() {
        let solver = EnvironmentalProfileSolver::new(config(5, 100.0)).unwrap();
        let env = solver
            .solve(&UniformSounding {
                theta_l: 288.0,
                total_water: 5e-3,
            })
            .unwrap();
        assert_eq!(env.w_ls[0], 0.0);
        assert_relative_eq!(env.w_ls[4], -3.75e-6 * 400.0, epsilon = 1e-15);
        assert_eq!(env.rhod.len(), 6);
    }

    #[test]
    fn average_stability_of_exponential_theta() {
        let s = 3e-5;
        let dz = 10.0;
        let theta: Vec<f64> = (0..20).map(|k| 290.0 * (s * k as f64 * dz).exp()).collect();
        assert_relative_eq!(average_stability(&theta, dz), s, max_relative = 1e-4);
    }

    #[test]
    fn neutral_reference_state_is_finite() {
        let (th_ref, rhod) = reference_state(288.0, 0.0, 100_000.0, 0.0, 10.0, 50).unwrap();
        assert!(th_ref.iter().all(|&t| (t - 288.0).abs() < 1e-12));
        assert!(rhod.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn rejects_negative_total_water() {
        struct Broken;
        impl Sounding for Broken {
            fn theta_l(&self, _z: f64) -> f64 {
                290.0
            }
            fn total_water(&self, z: f64) -> f64 {
                if z > 50.0 {
                    -1e-3
                } else {
                    1e-3
                }
            }
        }
        let solver = EnvironmentalProfileSolver::new(config(10, 10.0)).unwrap();
        assert!(solver.solve(&Broken).is_err());
    }
}
