//! Owning profile store and the borrowed views handed to the stepping code

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::{EnvironmentalProfiles, ProfileKind, VerticalProfile};
use crate::error::{ForcingError, Result};

/// Owner of every vertical profile of a run
///
/// All profiles exist from construction (zero-filled) but count as populated
/// only once written. Forcing switches that read an unpopulated profile are
/// rejected when runtime parameters are validated.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    nz: usize,
    profiles: FxHashMap<ProfileKind, VerticalProfile>,
    populated: FxHashSet<ProfileKind>,
}

impl ProfileStore {
    /// Zero-filled store for `nz` levels
    #[must_use]
    pub fn new(nz: usize) -> Self {
        let profiles = ProfileKind::ALL
            .iter()
            .map(|&kind| (kind, VerticalProfile::zeros(kind.len(nz))))
            .collect();
        Self {
            nz,
            profiles,
            populated: FxHashSet::default(),
        }
    }

    /// Vertical levels
    pub fn nz(&self) -> usize {
        self.nz
    }

    fn write(&mut self, kind: ProfileKind, values: &[f64]) -> Result<()> {
        let expected = kind.len(self.nz);
        if values.len() != expected {
            return Err(ForcingError::invalid(
                "profile length",
                format!("{kind:?} needs {expected} levels, got {}", values.len()),
            ));
        }
        self.profiles
            .insert(kind, VerticalProfile::from_slice(values));
        self.populated.insert(kind);
        Ok(())
    }

    /// Ingest the output of the environmental profile solver
    ///
    /// # Errors
    ///
    /// [`ForcingError::InvalidParameter`] if the solver ran on a different grid.
    pub fn apply_environment(&mut self, env: &EnvironmentalProfiles) -> Result<()> {
        self.write(ProfileKind::ThE, &env.theta)?;
        self.write(ProfileKind::PE, &env.pressure)?;
        self.write(ProfileKind::RvE, &env.vapor)?;
        self.write(ProfileKind::RlE, &env.liquid)?;
        self.write(ProfileKind::ThRef, &env.theta_ref)?;
        self.write(ProfileKind::Rhod, &env.rhod)?;
        self.write(ProfileKind::WLs, &env.w_ls)?;
        self.write(ProfileKind::HgtFctrVctr, &env.hgt_fctr_vctr)?;
        self.write(ProfileKind::HgtFctrSclr, &env.hgt_fctr_sclr)?;
        debug!(nz = self.nz, "environmental profiles stored");
        Ok(())
    }

    /// Populate a profile during case setup
    ///
    /// # Errors
    ///
    /// [`ForcingError::InvalidParameter`] on a length mismatch.
    pub fn set(&mut self, kind: ProfileKind, values: &[f64]) -> Result<()> {
        self.write(kind, values)
    }

    /// Rewrite a large-scale profile between steps
    ///
    /// Only the large-scale tendencies and geostrophic wind may change once a
    /// run has started; the borrow checker guarantees no [`ProfileViews`] are
    /// alive while this runs.
    ///
    /// # Errors
    ///
    /// [`ForcingError::InvalidParameter`] for a profile that is fixed after setup
    /// or on a length mismatch.
    pub fn update_large_scale(&mut self, kind: ProfileKind, values: &[f64]) -> Result<()> {
        if !kind.is_large_scale() {
            return Err(ForcingError::invalid(
                "profile",
                format!("{kind:?} is fixed after setup"),
            ));
        }
        self.write(kind, values)
    }

    /// Whether `kind` has been written
    pub fn is_populated(&self, kind: ProfileKind) -> bool {
        self.populated.contains(&kind)
    }

    /// Values of `kind`
    pub fn get(&self, kind: ProfileKind) -> &[f64] {
        match self.profiles.get(&kind) {
            Some(profile) => profile.as_slice(),
            None => &[],
        }
    }

    /// Borrowed views of every profile
    pub fn views(&self) -> ProfileViews<'_> {
        ProfileViews {
            th_e: self.get(ProfileKind::ThE),
            p_e: self.get(ProfileKind::PE),
            rv_e: self.get(ProfileKind::RvE),
            rl_e: self.get(ProfileKind::RlE),
            th_ref: self.get(ProfileKind::ThRef),
            rhod: self.get(ProfileKind::Rhod),
            w_ls: self.get(ProfileKind::WLs),
            hgt_fctr_vctr: self.get(ProfileKind::HgtFctrVctr),
            hgt_fctr_sclr: self.get(ProfileKind::HgtFctrSclr),
            th_ls: self.get(ProfileKind::ThLs),
            rv_ls: self.get(ProfileKind::RvLs),
            u_geo: self.get(ProfileKind::UGeo),
            v_geo: self.get(ProfileKind::VGeo),
            mix_len: self.get(ProfileKind::MixLen),
            relax_coeff: self.get(ProfileKind::RelaxCoeff),
            store: self,
        }
    }
}

/// Non-owning views of the profile arrays
///
/// The lifetime ties every view to the [`ProfileStore`] it was taken from.
#[derive(Debug, Clone, Copy)]
pub struct ProfileViews<'a> {
    /// Environmental potential temperature
    pub th_e: &'a [f64],
    /// Environmental pressure
    pub p_e: &'a [f64],
    /// Environmental vapor
    pub rv_e: &'a [f64],
    /// Environmental liquid water
    pub rl_e: &'a [f64],
    /// Reference potential temperature
    pub th_ref: &'a [f64],
    /// Reference density (`nz + 1` levels)
    pub rhod: &'a [f64],
    /// Subsidence velocity
    pub w_ls: &'a [f64],
    /// Momentum flux decay factor
    pub hgt_fctr_vctr: &'a [f64],
    /// Scalar flux decay factor
    pub hgt_fctr_sclr: &'a [f64],
    /// Large-scale θ tendency
    pub th_ls: &'a [f64],
    /// Large-scale rv tendency
    pub rv_ls: &'a [f64],
    /// Geostrophic wind, x
    pub u_geo: &'a [f64],
    /// Geostrophic wind, y
    pub v_geo: &'a [f64],
    /// SGS mixing length
    pub mix_len: &'a [f64],
    /// Nudging weight
    pub relax_coeff: &'a [f64],
    store: &'a ProfileStore,
}

impl ProfileViews<'_> {
    /// Fail unless every profile in `kinds` has been populated
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingProfile`] naming the first missing profile.
    pub fn require(&self, kinds: &[ProfileKind], required_by: &'static str) -> Result<()> {
        match kinds.iter().find(|&&kind| !self.store.is_populated(kind)) {
            Some(&profile) => Err(ForcingError::MissingProfile {
                profile,
                required_by,
            }),
            None => Ok(()),
        }
    }

    /// Vertical levels
    pub fn nz(&self) -> usize {
        self.store.nz
    }
}
