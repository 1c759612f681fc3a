//! Prognostic fields and subdomain-sized field storage
//!
//! Arrays are stored column-contiguous: the vertical index runs fastest, so
//! `data[(i * nj + j) * nz + k]` holds cell `(i, j, k)` and every vertical
//! column is a contiguous slice of length `nz`. Column-parallel loops are then
//! plain `par_chunks_mut(nz)`.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ForcingError, Result};
use crate::grid::Subdomain;

/// Prognostic variables known to the forcing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// Potential temperature (K)
    Th,
    /// Water vapor mixing ratio (kg/kg)
    Rv,
    /// Velocity in x (m/s)
    U,
    /// Velocity in y (m/s)
    V,
    /// Vertical velocity (m/s)
    W,
    /// Cloud water mixing ratio (kg/kg)
    Rc,
    /// Rain water mixing ratio (kg/kg)
    Rr,
    /// Cloud droplet number (1/kg)
    Nc,
    /// Rain drop number (1/kg)
    Nr,
}

impl Field {
    /// Short name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Field::Th => "th",
            Field::Rv => "rv",
            Field::U => "u",
            Field::V => "v",
            Field::W => "w",
            Field::Rc => "rc",
            Field::Rr => "rr",
            Field::Nc => "nc",
            Field::Nr => "nr",
        }
    }

    /// Mixing ratios and number concentrations cannot be negative
    pub fn is_non_negative(self) -> bool {
        matches!(
            self,
            Field::Rv | Field::Rc | Field::Rr | Field::Nc | Field::Nr
        )
    }

    /// Horizontal velocity components
    pub fn is_horizontal_velocity(self) -> bool {
        matches!(self, Field::U | Field::V)
    }
}

/// Bulk microphysics flavour, deciding which hydrometeor fields exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MicrophysicsScheme {
    /// Dry dynamics with vapor only
    #[default]
    None,
    /// Single-moment bulk scheme: cloud and rain mass
    Bulk1m,
    /// Double-moment bulk scheme: cloud and rain mass and number
    Bulk2m,
}

impl MicrophysicsScheme {
    /// Hydrometeor fields carried by this scheme
    pub fn hydrometeors(self) -> &'static [Field] {
        match self {
            MicrophysicsScheme::None => &[],
            MicrophysicsScheme::Bulk1m => &[Field::Rc, Field::Rr],
            MicrophysicsScheme::Bulk2m => &[Field::Rc, Field::Nc, Field::Rr, Field::Nr],
        }
    }

    /// Whether the scheme sediments a rain number field alongside rain mass
    pub fn has_rain_number(self) -> bool {
        matches!(self, MicrophysicsScheme::Bulk2m)
    }

    /// Whether the scheme has rain at all
    pub fn has_rain(self) -> bool {
        !matches!(self, MicrophysicsScheme::None)
    }
}

/// Subdomain-sized 3D array in column-contiguous order
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    data: Vec<f64>,
    ni: usize,
    nj: usize,
    nz: usize,
}

impl FieldArray {
    /// Zero-filled array covering `sub`
    #[must_use]
    pub fn new(sub: &Subdomain) -> Self {
        Self::with_value(sub, 0.0)
    }

    /// Array covering `sub` filled with `value`
    #[must_use]
    pub fn with_value(sub: &Subdomain, value: f64) -> Self {
        Self {
            data: vec![value; sub.n_cells()],
            ni: sub.ni(),
            nj: sub.nj(),
            nz: sub.nz,
        }
    }

    /// Array whose cell `(i, j, k)` (local indices) is `f(i, j, k)`
    #[must_use]
    pub fn from_fn(sub: &Subdomain, mut f: impl FnMut(usize, usize, usize) -> f64) -> Self {
        let mut array = Self::new(sub);
        for i in 0..array.ni {
            for j in 0..array.nj {
                for k in 0..array.nz {
                    let idx = array.index(i, j, k);
                    array.data[idx] = f(i, j, k);
                }
            }
        }
        array
    }

    /// Array whose every column equals `profile` (length `nz`)
    #[must_use]
    pub fn from_profile(sub: &Subdomain, profile: &[f64]) -> Self {
        Self::from_fn(sub, |_, _, k| profile[k])
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.nj + j) * self.nz + k
    }

    /// Vertical levels per column
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// Number of columns
    pub fn n_columns(&self) -> usize {
        self.ni * self.nj
    }

    /// Flat view of all cells
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat view of all cells
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Value at local cell `(i, j, k)`
    ///
    /// # Panics
    ///
    /// Panics if the indices are outside the subdomain
    #[must_use]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        assert!(
            i < self.ni && j < self.nj && k < self.nz,
            "Coordinates out of bounds"
        );
        self.data[self.index(i, j, k)]
    }

    /// Set local cell `(i, j, k)`
    ///
    /// # Panics
    ///
    /// Panics if the indices are outside the subdomain
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        assert!(
            i < self.ni && j < self.nj && k < self.nz,
            "Coordinates out of bounds"
        );
        let idx = self.index(i, j, k);
        self.data[idx] = value;
    }

    /// Fill every cell with `value`
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Column `c` (columns are numbered `i * nj + j`)
    #[must_use]
    pub fn column(&self, c: usize) -> &[f64] {
        &self.data[c * self.nz..(c + 1) * self.nz]
    }

    /// Iterator over vertical columns
    pub fn columns(&self) -> std::slice::Chunks<'_, f64> {
        self.data.chunks(self.nz)
    }

    /// Parallel mutable iterator over vertical columns
    pub fn par_columns_mut(&mut self) -> rayon::slice::ChunksMut<'_, f64> {
        self.data.par_chunks_mut(self.nz)
    }

    /// Add `other` cell by cell
    pub fn add_assign(&mut self, other: &FieldArray) {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a += b);
    }

    /// Mean over all columns at each level
    #[must_use]
    pub fn horizontal_mean(&self) -> Vec<f64> {
        let mut mean = vec![0.0; self.nz];
        for column in self.columns() {
            for (m, v) in mean.iter_mut().zip(column) {
                *m += v;
            }
        }
        let n = self.n_columns().max(1) as f64;
        mean.iter_mut().for_each(|m| *m /= n);
        mean
    }
}

/// Prognostic state of one subdomain, keyed by [`Field`]
#[derive(Debug, Clone)]
pub struct ModelState {
    subdomain: Subdomain,
    fields: FxHashMap<Field, FieldArray>,
}

impl ModelState {
    /// Zero state carrying the thermodynamic, velocity and hydrometeor fields
    ///
    /// `V` exists only when `three_d` is set.
    #[must_use]
    pub fn new(subdomain: &Subdomain, scheme: MicrophysicsScheme, three_d: bool) -> Self {
        let mut fields = FxHashMap::default();
        let mut carried = vec![Field::Th, Field::Rv, Field::U, Field::W];
        if three_d {
            carried.push(Field::V);
        }
        carried.extend_from_slice(scheme.hydrometeors());
        for field in carried {
            fields.insert(field, FieldArray::new(subdomain));
        }
        Self {
            subdomain: subdomain.clone(),
            fields,
        }
    }

    /// Subdomain this state covers
    pub fn subdomain(&self) -> &Subdomain {
        &self.subdomain
    }

    /// Whether `field` is carried
    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Carried fields in a stable order
    pub fn fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self.fields.keys().copied().collect();
        fields.sort_unstable();
        fields
    }

    /// Borrow a field
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingField`] if the field is not carried.
    pub fn get(&self, field: Field) -> Result<&FieldArray> {
        self.fields.get(&field).ok_or(ForcingError::MissingField {
            field,
            context: "state lookup",
        })
    }

    /// Borrow a field mutably
    ///
    /// # Errors
    ///
    /// [`ForcingError::MissingField`] if the field is not carried.
    pub fn get_mut(&mut self, field: Field) -> Result<&mut FieldArray> {
        self.fields.get_mut(&field).ok_or(ForcingError::MissingField {
            field,
            context: "state lookup",
        })
    }

    /// Borrow a field if present
    pub fn try_get(&self, field: Field) -> Option<&FieldArray> {
        self.fields.get(&field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    fn sub() -> Subdomain {
        Grid::new(3, 2, 4, 1.0, 1.0, 1.0).unwrap().whole()
    }

    #[test]
    fn test_field_creation() {
        let field = FieldArray::new(&sub());
        assert_eq!(field.n_columns(), 6);
        assert_eq!(field.as_slice().len(), 24);
        assert!(field.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_field_get_set_column_major() {
        let mut field = FieldArray::new(&sub());
        field.set(1, 1, 2, 42.0);
        assert_eq!(field.get(1, 1, 2), 42.0);
        // column 1 * nj + 1 = 3, level 2
        assert_eq!(field.column(3)[2], 42.0);
        assert_eq!(field.as_slice()[3 * 4 + 2], 42.0);
    }

    #[test]
    #[should_panic(expected = "Coordinates out of bounds")]
    fn test_field_bounds_check() {
        let field = FieldArray::new(&sub());
        let _ = field.get(0, 0, 4);
    }

    #[test]
    fn test_horizontal_mean() {
        let field = FieldArray::from_fn(&sub(), |i, _, k| (i + k) as f64);
        let mean = field.horizontal_mean();
        // mean over i in 0..3 of (i + k) = 1 + k
        for (k, m) in mean.iter().enumerate() {
            assert!((m - (1.0 + k as f64)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_state_fields_follow_scheme() {
        let state = ModelState::new(&sub(), MicrophysicsScheme::Bulk2m, false);
        assert!(state.contains(Field::Nr));
        assert!(!state.contains(Field::V));
        assert!(state.get(Field::V).is_err());

        let state = ModelState::new(&sub(), MicrophysicsScheme::None, true);
        assert!(state.contains(Field::V));
        assert!(!state.contains(Field::Rr));
    }
}
