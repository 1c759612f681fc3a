//! Prescribed large-scale horizontal advection

use rayon::prelude::*;

use crate::fields::FieldArray;

/// Copy the height-dependent tendency `profile` into every column
pub fn large_scale_advection(profile: &[f64], out: &mut FieldArray) {
    out.par_columns_mut()
        .for_each(|tendency| tendency.copy_from_slice(profile));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    #[test]
    fn every_column_gets_the_profile() {
        let sub = Grid::new(2, 2, 3, 1.0, 1.0, 1.0).unwrap().whole();
        let mut out = FieldArray::new(&sub);
        large_scale_advection(&[1.0, 2.0, 3.0], &mut out);
        assert!(out.columns().all(|c| c == [1.0, 2.0, 3.0]));
    }
}
