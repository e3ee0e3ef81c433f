//! # Feature Generation Module
//!
//! Builds one fixed-width feature row per labelled patient from the imaging
//! tables. Every generator takes the patient's baseline scan for its
//! modality, labels patients through the diagnostic context and returns a
//! [`FeatureSet`] whose rows, labels and patient ids share one index.
//!
//! - PET: regional FDG statistics pivoted wide (statistic-major, then region).
//! - MRI: fully observed FreeSurfer measures divided by intracranial volume.
//! - Concatenation: MRI columns followed by PET columns for patients in both.

use crate::labels::DxClass;
use crate::tables::{DataDictionary, Rid};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub mod concat;
pub mod mri;
pub mod pet;

pub use concat::concatenate;
pub use mri::{MriConfig, generate_mri};
pub use pet::{PetConfig, generate_pet};

/// Imaging source of a feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Pet,
    Mri,
    Concat,
}

impl Modality {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pet => "PET",
            Self::Mri => "MRI",
            Self::Concat => "CONCAT",
        }
    }

    /// Lowercase name used in configuration files.
    pub fn key(self) -> &'static str {
        match self {
            Self::Pet => "pet",
            Self::Mri => "mri",
            Self::Concat => "concat",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do when a patient has more baseline rows than expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtraRowPolicy {
    /// Abort the run with [`FeatureError::BaselineRowCount`].
    Reject,
    /// Keep the leading rows in table order and log a warning.
    KeepFirst,
}

/// Errors raised while generating feature sets.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error(
        "{modality}: expected {expected} baseline row(s) for RID={rid}, but found {found}."
    )]
    BaselineRowCount {
        modality: Modality,
        rid: Rid,
        expected: usize,
        found: usize,
    },
    #[error("{modality}: RID={rid} has no value for '{column}' at the baseline visit.")]
    MissingValue {
        modality: Modality,
        rid: Rid,
        column: String,
    },
    #[error(
        "{modality}: RID={rid} has baseline regions that differ from the other patients'."
    )]
    InconsistentRegions { modality: Modality, rid: Rid },
    #[error("MRI: RID={rid} has a missing or zero normalizer '{column}'.")]
    MissingNormalizer { rid: Rid, column: String },
    #[error("MRI: normalizer column '{0}' is not one of the table's measure columns.")]
    UnknownNormalizer(String),
    #[error(
        "Patient RID={rid} is labelled {mri} by the MRI features but {pet} by the PET features."
    )]
    LabelMismatch { rid: Rid, mri: DxClass, pet: DxClass },
    #[error("{0}: no labelled patient has a usable baseline scan.")]
    NoSamples(Modality),
    #[error("Failed to assemble the feature matrix: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Failed to write the feature manifest: {0}")]
    Manifest(#[from] csv::Error),
}

/// One feature column and the table field it is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumn {
    pub name: String,
    /// Source table, for data dictionary lookups.
    pub table: String,
    /// Source field within `table`.
    pub field: String,
}

/// Parallel feature rows, labels and patient ids for one modality.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub modality: Modality,
    pub columns: Vec<FeatureColumn>,
    pub x: Array2<f64>,
    pub y: Vec<DxClass>,
    pub rids: Vec<Rid>,
}

impl FeatureSet {
    /// Assembles a set from row-major values. Empty input is
    /// [`FeatureError::NoSamples`].
    pub(crate) fn from_rows(
        modality: Modality,
        columns: Vec<FeatureColumn>,
        values: Vec<f64>,
        y: Vec<DxClass>,
        rids: Vec<Rid>,
    ) -> Result<Self, FeatureError> {
        if rids.is_empty() {
            return Err(FeatureError::NoSamples(modality));
        }
        let x = Array2::from_shape_vec((rids.len(), columns.len()), values)?;
        log::info!(
            "{modality}: {} patients x {} features",
            x.nrows(),
            x.ncols()
        );
        Ok(Self {
            modality,
            columns,
            x,
            y,
            rids,
        })
    }

    pub fn len(&self) -> usize {
        self.rids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rids.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    /// Number of patients per class, in class order.
    pub fn class_counts(&self) -> Vec<(DxClass, usize)> {
        [DxClass::Nl, DxClass::Mci, DxClass::Ad]
            .into_iter()
            .map(|class| (class, self.y.iter().filter(|&&y| y == class).count()))
            .filter(|&(_, count)| count > 0)
            .collect()
    }

    /// Writes one TSV row per feature column with its data dictionary
    /// description.
    pub fn write_manifest(
        &self,
        dictionary: &DataDictionary,
        path: &Path,
    ) -> Result<(), FeatureError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        writer.write_record(["index", "column", "table", "field", "description"])?;
        for (i, column) in self.columns.iter().enumerate() {
            let description = dictionary.describe(&column.table, &column.field);
            writer.write_record([
                i.to_string().as_str(),
                column.name.as_str(),
                column.table.as_str(),
                column.field.as_str(),
                description.unwrap_or("NA"),
            ])?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::DictionaryEntry;

    fn column(name: &str) -> FeatureColumn {
        FeatureColumn {
            name: name.to_string(),
            table: "UCSFFSX".to_string(),
            field: name.to_string(),
        }
    }

    #[test]
    fn empty_rows_are_no_samples() {
        let result =
            FeatureSet::from_rows(Modality::Mri, vec![column("ST10CV")], vec![], vec![], vec![]);
        assert!(matches!(result, Err(FeatureError::NoSamples(Modality::Mri))));
    }

    #[test]
    fn rows_and_labels_share_an_index() {
        let set = FeatureSet::from_rows(
            Modality::Mri,
            vec![column("ST10CV"), column("ST11SV")],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![DxClass::Nl, DxClass::Ad],
            vec![10, 20],
        )
        .unwrap();
        assert_eq!(set.x.nrows(), set.len());
        assert_eq!(set.y.len(), set.len());
        assert_eq!(set.x[[1, 0]], 3.0);
        assert_eq!(set.class_counts(), vec![(DxClass::Nl, 1), (DxClass::Ad, 1)]);
    }

    #[test]
    fn manifest_describes_columns() {
        let set = FeatureSet::from_rows(
            Modality::Mri,
            vec![column("ST10CV"), column("ST11SV")],
            vec![1.0, 2.0],
            vec![DxClass::Mci],
            vec![7],
        )
        .unwrap();
        let dictionary = DataDictionary::new(vec![DictionaryEntry {
            field: "ST10CV".to_string(),
            table: Some("UCSFFSX".to_string()),
            text: Some("Volume (WM Parcellation) of IntraCranial".to_string()),
        }]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.tsv");
        set.write_manifest(&dictionary, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "0\tST10CV\tUCSFFSX\tST10CV\tVolume (WM Parcellation) of IntraCranial"
        );
        assert_eq!(lines[2], "1\tST11SV\tUCSFFSX\tST11SV\tNA");
    }
}
