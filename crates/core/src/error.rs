//! Error types for the forcing engine
//!
//! Every failure in this crate is fatal for the simulation run: configuration
//! errors are raised before the first step, numerical errors name the
//! quantity and the pipeline stage where the anomaly was first seen.

use thiserror::Error;

use crate::fields::Field;
use crate::profiles::ProfileKind;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ForcingError>;

/// Fatal errors raised by setup validation and per-step post-condition scans
#[derive(Debug, Error)]
pub enum ForcingError {
    /// Grid dimensions or spacings are unusable
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    /// A scalar setup parameter is out of its valid range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A forcing switch is on but the profile it reads was never populated
    #[error("Profile {profile:?} required by '{required_by}' was never populated")]
    MissingProfile {
        profile: ProfileKind,
        required_by: &'static str,
    },

    /// A field was requested that the configured microphysics scheme does not carry
    #[error("Field {field:?} is not part of the model state ({context})")]
    MissingField {
        field: Field,
        context: &'static str,
    },

    /// NaN or infinity found after evaluating a forcing contribution
    #[error("Non-finite value in {quantity} at stage '{stage}' (cell {index})")]
    NonFinite {
        quantity: String,
        stage: &'static str,
        index: usize,
    },

    /// A quantity that must stay non-negative would go negative
    #[error("Negative value {value:e} in {quantity} at stage '{stage}' (cell {index})")]
    Negative {
        quantity: String,
        stage: &'static str,
        index: usize,
        value: f64,
    },

    /// Failure writing the precipitation log
    #[error("Failed to write puddle log: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl ForcingError {
    /// Shorthand for [`ForcingError::InvalidParameter`]
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors detected by post-condition scans during stepping
    #[must_use]
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::NonFinite { .. } | Self::Negative { .. })
    }
}

/// Fail on the first non-finite value in `values`
///
/// # Errors
///
/// Returns [`ForcingError::NonFinite`] naming `quantity` and `stage`.
pub fn nancheck(values: &[f64], quantity: &str, stage: &'static str) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ForcingError::NonFinite {
            quantity: quantity.to_owned(),
            stage,
            index,
        }),
        None => Ok(()),
    }
}

/// Fail on the first negative value in `values`
///
/// # Errors
///
/// Returns [`ForcingError::Negative`] naming `quantity` and `stage`.
pub fn negcheck(values: &[f64], quantity: &str, stage: &'static str) -> Result<()> {
    match values.iter().position(|&v| v < 0.0) {
        Some(index) => Err(ForcingError::Negative {
            quantity: quantity.to_owned(),
            stage,
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}
