//! # Table Loading Module
//!
//! This module is the exclusive entry point for the study's flat tables.
//! It reads comma-separated exports with `polars` and converts every frame
//! into explicitly typed records before anything downstream sees it.
//!
//! - Typed Records: Column names are resolved once, here. The rest of the
//!   crate works on `DxSummaryRecord`, `ArmRecord`, `RegistryRecord`,
//!   `PetReading` and `MriScan` values and never looks a column up by name.
//! - Lenient Values, Strict Keys: coded fields and measurements may be blank
//!   (they become `None`), but the participant id (`RID`) and the visit keys
//!   must be populated on every row.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod clinical;
pub mod imaging;

pub use clinical::{
    ArmRecord, DataDictionary, DictionaryEntry, DxSummaryRecord, RegistryRecord, load_arm,
    load_data_dictionary, load_dx_summary, load_registry,
};
pub use imaging::{MriScan, MriTable, PET_STATISTICS, PetReading, load_mri, load_pet};

/// Participant roster identifier, the study-wide patient key.
pub type Rid = i64;

/// A comprehensive error type for table loading failures.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error while reading '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "The required column '{column}' was not found in table '{table}'. Please check spelling and case."
    )]
    ColumnNotFound { table: String, column: String },
    #[error("Table '{table}' has {count} row(s) with no value in key column '{column}'.")]
    MissingKey {
        table: String,
        column: String,
        count: usize,
    },
}

/// Rows that belong to a single participant.
pub trait PatientKeyed {
    fn rid(&self) -> Rid;
}

/// Rows that belong to a single participant visit.
pub trait VisitKeyed: PatientKeyed {
    /// Study phase of the visit, when the source table records one.
    fn phase(&self) -> Option<&str>;
    fn viscode(&self) -> &str;
    fn viscode2(&self) -> Option<&str>;
}

impl PatientKeyed for Rid {
    fn rid(&self) -> Rid {
        *self
    }
}

impl<T: PatientKeyed + ?Sized> PatientKeyed for &T {
    fn rid(&self) -> Rid {
        (**self).rid()
    }
}

impl<T: VisitKeyed + ?Sized> VisitKeyed for &T {
    fn phase(&self) -> Option<&str> {
        (**self).phase()
    }
    fn viscode(&self) -> &str {
        (**self).viscode()
    }
    fn viscode2(&self) -> Option<&str> {
        (**self).viscode2()
    }
}

/// Locations of the clinical and imaging tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePaths {
    pub diagnostic_summary: PathBuf,
    pub arm: PathBuf,
    pub registry: PathBuf,
    pub data_dictionary: PathBuf,
    pub pet: PathBuf,
    pub mri: PathBuf,
}

impl Default for TablePaths {
    fn default() -> Self {
        Self {
            diagnostic_summary: PathBuf::from("DXSUM_PDXCONV_ADNIALL.csv"),
            arm: PathBuf::from("ARM.csv"),
            registry: PathBuf::from("REGISTRY.csv"),
            data_dictionary: PathBuf::from("DATADIC.csv"),
            pet: PathBuf::from("UCBERKELEYFDG.csv"),
            mri: PathBuf::from("UCSFFSX.csv"),
        }
    }
}

/// The clinical tables needed to derive diagnostic labels.
#[derive(Debug, Clone, Default)]
pub struct StudyTables {
    pub dx_summary: Vec<DxSummaryRecord>,
    pub arm: Vec<ArmRecord>,
    pub registry: Vec<RegistryRecord>,
    pub dictionary: DataDictionary,
}

impl StudyTables {
    pub fn load(paths: &TablePaths) -> Result<Self, TableError> {
        let dx_summary = load_dx_summary(&paths.diagnostic_summary)?;
        let arm = load_arm(&paths.arm)?;
        let registry = load_registry(&paths.registry)?;
        let dictionary = load_data_dictionary(&paths.data_dictionary)?;
        log::info!(
            "Loaded clinical tables: {} diagnostic rows, {} arm rows, {} registry rows, {} dictionary entries",
            dx_summary.len(),
            arm.len(),
            registry.len(),
            dictionary.len()
        );
        Ok(Self {
            dx_summary,
            arm,
            registry,
            dictionary,
        })
    }
}

/// A loaded frame together with the table name used in error messages.
pub(crate) struct Frame {
    table: String,
    df: DataFrame,
}

impl Frame {
    pub(crate) fn read(path: &Path, table: &str) -> Result<Self, TableError> {
        log::debug!("Reading table '{table}' from '{}'", path.display());
        let file = File::open(path).map_err(|source| TableError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        // Sparse coded columns are blank for most rows, so infer over the whole file.
        let df = CsvReader::new(file)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None),
            )
            .finish()?;
        Ok(Self {
            table: table.to_string(),
            df,
        })
    }

    pub(crate) fn height(&self) -> usize {
        self.df.height()
    }

    pub(crate) fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub(crate) fn has_column(&self, name: &str) -> bool {
        self.df
            .get_column_names()
            .into_iter()
            .any(|column| column.as_str() == name)
    }

    fn series(&self, name: &str) -> Result<&Series, TableError> {
        if !self.has_column(name) {
            return Err(TableError::ColumnNotFound {
                table: self.table.clone(),
                column: name.to_string(),
            });
        }
        Ok(self.df.column(name)?.as_materialized_series())
    }

    /// Text values with surrounding whitespace removed; blanks become `None`.
    pub(crate) fn strings(&self, name: &str) -> Result<Vec<Option<String>>, TableError> {
        let casted = self.series(name)?.cast(&DataType::String)?;
        let values = casted
            .str()?
            .into_iter()
            .map(|value| {
                value
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
            })
            .collect();
        Ok(values)
    }

    /// Like [`Frame::strings`], but an absent column yields all `None`.
    pub(crate) fn optional_strings(&self, name: &str) -> Result<Vec<Option<String>>, TableError> {
        if self.has_column(name) {
            self.strings(name)
        } else {
            Ok(vec![None; self.height()])
        }
    }

    pub(crate) fn required_strings(&self, name: &str) -> Result<Vec<String>, TableError> {
        let values = self.strings(name)?;
        let missing = values.iter().filter(|value| value.is_none()).count();
        if missing > 0 {
            return Err(TableError::MissingKey {
                table: self.table.clone(),
                column: name.to_string(),
                count: missing,
            });
        }
        Ok(values.into_iter().flatten().collect())
    }

    /// Numeric values; blanks, text and non-finite entries become `None`.
    pub(crate) fn floats(&self, name: &str) -> Result<Vec<Option<f64>>, TableError> {
        let casted = self.series(name)?.cast(&DataType::Float64)?;
        let values = casted
            .f64()?
            .into_iter()
            .map(|value| value.filter(|v| v.is_finite()))
            .collect();
        Ok(values)
    }

    /// Integer codes. Exports sometimes write codes as `2.0`; anything with a
    /// fractional part is not a code and becomes `None`.
    pub(crate) fn codes(&self, name: &str) -> Result<Vec<Option<i64>>, TableError> {
        Ok(self
            .floats(name)?
            .into_iter()
            .map(|value| value.filter(|v| v.fract() == 0.0).map(|v| v as i64))
            .collect())
    }

    pub(crate) fn rids(&self) -> Result<Vec<Rid>, TableError> {
        let codes = self.codes("RID")?;
        let missing = codes.iter().filter(|value| value.is_none()).count();
        if missing > 0 {
            return Err(TableError::MissingKey {
                table: self.table.clone(),
                column: "RID".to_string(),
                count: missing,
            });
        }
        Ok(codes.into_iter().flatten().collect())
    }

    pub(crate) fn dates(&self, name: &str) -> Result<Vec<Option<NaiveDate>>, TableError> {
        Ok(self
            .strings(name)?
            .into_iter()
            .map(|value| value.and_then(|text| parse_exam_date(&text)))
            .collect())
    }
}

/// Parses the two date layouts found in study exports.
pub fn parse_exam_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%m/%d/%Y"))
        .ok()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    /// Writes `content` to a temporary CSV file.
    pub(crate) fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }
}
