//! Combined MRI + PET features for patients measured by both modalities.

use super::{FeatureError, FeatureSet, Modality};
use crate::tables::Rid;
use ahash::AHashMap;
use std::collections::BTreeSet;

fn row_index(set: &FeatureSet) -> AHashMap<Rid, usize> {
    set.rids.iter().enumerate().map(|(i, &rid)| (rid, i)).collect()
}

/// Joins two single-modality sets on patient id. Rows are the patients in
/// both sets, ordered by id; MRI columns come first. A patient labelled
/// differently by the two sets aborts with [`FeatureError::LabelMismatch`].
pub fn concatenate(mri: &FeatureSet, pet: &FeatureSet) -> Result<FeatureSet, FeatureError> {
    let mri_rows = row_index(mri);
    let pet_rows = row_index(pet);
    let common: BTreeSet<Rid> = mri_rows
        .keys()
        .filter(|rid| pet_rows.contains_key(*rid))
        .copied()
        .collect();
    log::info!(
        "CONCAT: {} patients in both MRI ({}) and PET ({})",
        common.len(),
        mri.len(),
        pet.len()
    );

    let width = mri.x.ncols() + pet.x.ncols();
    let mut values = Vec::with_capacity(common.len() * width);
    let mut y = Vec::with_capacity(common.len());
    for &rid in &common {
        let (m, p) = (mri_rows[&rid], pet_rows[&rid]);
        if mri.y[m] != pet.y[p] {
            return Err(FeatureError::LabelMismatch {
                rid,
                mri: mri.y[m],
                pet: pet.y[p],
            });
        }
        values.extend(mri.x.row(m).iter().copied());
        values.extend(pet.x.row(p).iter().copied());
        y.push(pet.y[p]);
    }

    let columns = mri.columns.iter().chain(&pet.columns).cloned().collect();
    FeatureSet::from_rows(
        Modality::Concat,
        columns,
        values,
        y,
        common.into_iter().collect(),
    )
}
