//! Run configuration, read from and written to TOML.
//!
//! Every section and field has a default, so a configuration file only
//! needs to name what differs from the defaults.

use crate::classify::{EvaluationConfig, SvmConfig};
use crate::features::{Modality, MriConfig, PetConfig};
use crate::tables::TablePaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Which modalities an `evaluate` run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub pet: bool,
    pub mri: bool,
    pub concat: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pet: true,
            mri: false,
            concat: false,
        }
    }
}

impl RunConfig {
    pub fn modalities(&self) -> Vec<Modality> {
        [
            (self.pet, Modality::Pet),
            (self.mri, Modality::Mri),
            (self.concat, Modality::Concat),
        ]
        .into_iter()
        .filter_map(|(enabled, modality)| enabled.then_some(modality))
        .collect()
    }

    /// Whether the MRI feature set is needed, directly or for concatenation.
    pub fn needs_mri(&self) -> bool {
        self.mri || self.concat
    }

    pub fn needs_pet(&self) -> bool {
        self.pet || self.concat
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Study phase whose baseline visits define the cohort. Empty means
    /// every phase.
    pub phase: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            phase: "ADNI1".to_string(),
        }
    }
}

impl LabelConfig {
    pub fn phase(&self) -> Option<&str> {
        let phase = self.phase.trim();
        (!phase.is_empty()).then_some(phase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Write a feature manifest for every evaluated modality.
    pub manifests: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("results"),
            manifests: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tables: TablePaths,
    pub run: RunConfig,
    pub labels: LabelConfig,
    pub pet: PetConfig,
    pub mri: MriConfig,
    pub evaluation: EvaluationConfig,
    pub svm: SvmConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Saves the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Penalty;
    use crate::features::ExtraRowPolicy;
    use crate::labels::DxClass;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_reference_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.run.modalities(), vec![Modality::Pet]);
        assert_eq!(config.labels.phase(), Some("ADNI1"));
        assert_eq!(config.evaluation.repetitions, 50);
        assert_eq!(config.evaluation.folds, 5);
        assert_eq!(config.evaluation.classes, [DxClass::Mci, DxClass::Ad]);
        assert_eq!(config.svm.c, 0.006);
        assert_eq!(config.svm.penalty, Penalty::L2);
        assert_eq!(config.svm.tolerance, 1e-5);
        assert_eq!(config.pet.baseline_visit, "bl");
        assert_eq!(config.mri.baseline_visit, "sc");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
            [run]
            mri = true
            concat = true

            [labels]
            phase = ""

            [evaluation]
            classes = ["nl", "ad"]
            seed = 42

            [svm]
            penalty = "l1"

            [svm.c_overrides]
            mri = 0.01

            [mri]
            extra_rows = "reject"
        "#;
        let config: PipelineConfig = toml::from_str(text).unwrap();
        assert_eq!(
            config.run.modalities(),
            vec![Modality::Pet, Modality::Mri, Modality::Concat]
        );
        assert_eq!(config.labels.phase(), None);
        assert_eq!(config.evaluation.classes, [DxClass::Nl, DxClass::Ad]);
        assert_eq!(config.evaluation.seed, Some(42));
        assert_eq!(config.evaluation.repetitions, 50);
        assert_eq!(config.svm.penalty, Penalty::L1);
        assert_eq!(config.svm.c_for(Modality::Mri), 0.01);
        assert_eq!(config.svm.c_for(Modality::Pet), 0.006);
        assert_eq!(config.mri.extra_rows, ExtraRowPolicy::Reject);
        assert_eq!(config.mri.normalizer, "ST10CV");
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("adnidx.toml");
        let mut config = PipelineConfig::default();
        config.evaluation.seed = Some(7);
        config.run.concat = true;
        config.svm.c_overrides.insert("pet".to_string(), 0.5);
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[run\npet = yes").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
