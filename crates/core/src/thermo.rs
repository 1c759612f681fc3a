//! Moist-air thermodynamic constants and closures
//!
//! All quantities are SI. Mixing ratios are kg per kg of dry air.
//!
//! # References
//!
//! - Stevens, B. et al. (2005). "Evaluation of large-eddy simulations via observations of
//!   nocturnal marine stratocumulus." Monthly Weather Review, 133, 1443-1462.
//! - Emanuel, K.A. (1994). "Atmospheric Convection", Oxford University Press.

/// Gravitational acceleration (m/s²)
pub const GRAVITY: f64 = 9.81;

/// Specific gas constant of dry air (J/(kg·K))
pub const R_D: f64 = 287.1;

/// Specific gas constant of water vapor (J/(kg·K))
pub const R_V: f64 = 461.0;

/// Specific heat of dry air at constant pressure (J/(kg·K))
pub const C_PD: f64 = 1005.0;

/// Specific heat of water vapor at constant pressure (J/(kg·K))
pub const C_PV: f64 = 1850.0;

/// Latent heat of vaporization at the triple point (J/kg)
pub const L_TRI: f64 = 2.5e6;

/// Reference pressure of the potential temperature definition (Pa)
pub const P_1000: f64 = 100_000.0;

/// Triple-point temperature used by the Tetens-type closure (K)
pub const T_TRI: f64 = 273.17;

/// Saturation vapor pressure at [`T_TRI`] (Pa)
pub const E_TRI: f64 = 611.0;

/// Virtual temperature coefficient used for moist density estimates
pub const VIRTUAL_COEFF_DENSITY: f64 = 0.61;

/// Virtual temperature coefficient used for reference state and buoyancy
pub const VIRTUAL_COEFF: f64 = 0.608;

/// Ratio `R_d / c_pd` (Poisson exponent)
#[inline]
pub fn kappa() -> f64 {
    R_D / C_PD
}

/// Exner function `Π = (p / p_1000)^(R_d / c_pd)`
#[inline]
pub fn exner(pressure: f64) -> f64 {
    (pressure / P_1000).powf(kappa())
}

/// Specific heat of moist air per unit mass of dry air
#[inline]
pub fn moist_heat_capacity(rv: f64) -> f64 {
    C_PD + rv * C_PV
}

/// Density of moist air from the ideal-gas law with a virtual temperature correction
#[inline]
pub fn moist_density(pressure: f64, temperature: f64, rv: f64) -> f64 {
    pressure / (R_D * temperature * (1.0 + VIRTUAL_COEFF_DENSITY * rv))
}

/// Saturation vapor pressure from the Tetens-type closure (Pa)
///
/// ```text
/// e_s = e_tri · exp(b − b · T_tri / T),   b = L / (R_v · T_tri)
/// ```
#[inline]
pub fn saturation_vapor_pressure(temperature: f64) -> f64 {
    let b = L_TRI / R_V / T_TRI;
    E_TRI * (b - b * T_TRI / temperature).exp()
}

/// Saturation mixing ratio over a flat water surface
#[inline]
pub fn saturation_mixing_ratio(pressure: f64, temperature: f64) -> f64 {
    let es = saturation_vapor_pressure(temperature);
    R_D / R_V * es / (pressure - es)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exner_is_one_at_reference_pressure() {
        assert_relative_eq!(exner(P_1000), 1.0, epsilon = 1e-12);
        assert!(exner(90_000.0) < 1.0);
    }

    #[test]
    fn tetens_closure_hits_triple_point() {
        assert_relative_eq!(saturation_vapor_pressure(T_TRI), E_TRI, epsilon = 1e-9);
        // ~17 hPa near 15 °C
        let es = saturation_vapor_pressure(288.15);
        assert!(es > 1500.0 && es < 1900.0, "e_s(15C) = {es}");
    }

    #[test]
    fn saturation_mixing_ratio_grows_with_temperature() {
        let cold = saturation_mixing_ratio(100_000.0, 280.0);
        let warm = saturation_mixing_ratio(100_000.0, 295.0);
        assert!(warm > cold);
        assert!(cold > 0.0);
    }
}
