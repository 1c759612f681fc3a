//! Buoyancy acceleration of the vertical velocity
//!
//! ```text
//! F = g · [(θ − θ_e)/θ_ref + 0.608 · (rv − rv_e) − r_l]
//! ```
//!
//! The liquid loading `r_l` (cloud plus rain water) enters only in the wet
//! variant and only when the scheme carries liquid fields.

use rayon::prelude::*;

use crate::error::Result;
use crate::fields::{Field, FieldArray, ModelState};
use crate::params::RuntimeParams;
use crate::thermo::{GRAVITY, VIRTUAL_COEFF};

/// Buoyancy tendency of `w` (m/s²)
///
/// # Errors
///
/// [`crate::ForcingError::MissingField`] if the state has no θ or vapor field.
pub fn buoyancy(params: &RuntimeParams<'_>, state: &ModelState, out: &mut FieldArray) -> Result<()> {
    let th = state.get(Field::Th)?;
    let rv = state.get(Field::Rv)?;
    let (rc, rr) = if params.processes.buoyancy_wet {
        (state.try_get(Field::Rc), state.try_get(Field::Rr))
    } else {
        (None, None)
    };
    let nz = params.grid.nz;
    let profiles = params.profiles;

    out.par_columns_mut().enumerate().for_each(|(c, tendency)| {
        let theta = th.column(c);
        let vapor = rv.column(c);
        let cloud = rc.map(|f| f.column(c));
        let rain = rr.map(|f| f.column(c));
        for k in 0..nz {
            let liquid = cloud.map_or(0.0, |r| r[k]) + rain.map_or(0.0, |r| r[k]);
            tendency[k] = GRAVITY
                * ((theta[k] - profiles.th_e[k]) / profiles.th_ref[k]
                    + VIRTUAL_COEFF * (vapor[k] - profiles.rv_e[k])
                    - liquid);
        }
    });
    Ok(())
}
