//! Coriolis acceleration relative to the geostrophic wind
//!
//! ```text
//! F_u =  f · (v + V_mean − v_geo)
//! F_v = −f · (u + U_mean − u_geo)
//! ```
//!
//! `(U_mean, V_mean)` undoes the Galilean translation of the model frame.

use rayon::prelude::*;

use crate::error::{ForcingError, Result};
use crate::fields::{Field, FieldArray, ModelState};
use crate::params::RuntimeParams;

/// Coriolis tendency of the horizontal velocity `component` (m/s²)
///
/// In 2D runs the missing `v` counts as zero.
///
/// # Errors
///
/// [`ForcingError::MissingField`] if `component` is not a carried horizontal
/// velocity.
pub fn coriolis(
    params: &RuntimeParams<'_>,
    state: &ModelState,
    component: Field,
    out: &mut FieldArray,
) -> Result<()> {
    let f = params.force.coriolis;
    let [u_mean, v_mean] = params.force.mean_wind;
    let profiles = params.profiles;
    let nz = params.grid.nz;

    match component {
        Field::U => {
            let v = state.try_get(Field::V);
            out.par_columns_mut().enumerate().for_each(|(c, tendency)| {
                for k in 0..nz {
                    let v_here = v.map_or(0.0, |v| v.column(c)[k]);
                    tendency[k] = f * (v_here + v_mean - profiles.v_geo[k]);
                }
            });
        }
        Field::V => {
            state.get(Field::V)?;
            let u = state.get(Field::U)?;
            out.par_columns_mut()
                .zip(u.as_slice().par_chunks(nz))
                .for_each(|(tendency, u)| {
                    for k in 0..nz {
                        tendency[k] = -f * (u[k] + u_mean - profiles.u_geo[k]);
                    }
                });
        }
        field => {
            return Err(ForcingError::MissingField {
                field,
                context: "coriolis acts on horizontal velocity only",
            })
        }
    }
    Ok(())
}
