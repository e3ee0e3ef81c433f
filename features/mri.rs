//! FreeSurfer MRI features: head-size normalized volumes from the screening
//! scan.

use super::{ExtraRowPolicy, FeatureColumn, FeatureError, FeatureSet, Modality};
use crate::labels::{DxContext, get_baseline_classes};
use crate::tables::{MriScan, MriTable, Rid};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MriConfig {
    /// Visit code of the baseline scan.
    pub baseline_visit: String,
    /// Table name used for data dictionary lookups.
    pub table: String,
    pub extra_rows: ExtraRowPolicy,
    /// Measure every feature is divided by (intracranial volume).
    pub normalizer: String,
    /// Required `STATUS` of a usable scan.
    pub status: String,
    /// Required `OVERALLQC` of a usable scan.
    pub quality: String,
}

impl Default for MriConfig {
    fn default() -> Self {
        Self {
            baseline_visit: "sc".to_string(),
            table: "UCSFFSX".to_string(),
            extra_rows: ExtraRowPolicy::KeepFirst,
            normalizer: "ST10CV".to_string(),
            status: "complete".to_string(),
            quality: "Pass".to_string(),
        }
    }
}

/// One row per labelled patient with a usable baseline scan. Columns are the
/// measures observed in every usable scan, in table order, each divided by
/// the patient's normalizer.
pub fn generate_mri(
    ctx: &DxContext,
    table: &MriTable,
    phase: Option<&str>,
    config: &MriConfig,
) -> Result<FeatureSet, FeatureError> {
    let usable: Vec<&MriScan> = table
        .scans
        .iter()
        .filter(|scan| {
            scan.status.as_deref() == Some(config.status.as_str())
                && scan.overall_qc.as_deref() == Some(config.quality.as_str())
        })
        .collect();
    log::info!(
        "MRI: {} of {} scans passed status and quality control",
        usable.len(),
        table.scans.len()
    );

    let normalizer = table
        .column_index(&config.normalizer)
        .ok_or_else(|| FeatureError::UnknownNormalizer(config.normalizer.clone()))?;
    let observed: Vec<usize> = (0..table.measure_columns.len())
        .filter(|&i| usable.iter().all(|scan| scan.measures[i].is_some()))
        .collect();
    log::debug!(
        "MRI: {} of {} measure columns are fully observed",
        observed.len(),
        table.measure_columns.len()
    );

    let labels = get_baseline_classes(ctx, &usable, phase);

    let mut baseline: AHashMap<Rid, Vec<&MriScan>> = AHashMap::new();
    for scan in usable
        .iter()
        .copied()
        .filter(|scan| scan.viscode == config.baseline_visit)
    {
        baseline.entry(scan.rid).or_default().push(scan);
    }

    let mut values = Vec::with_capacity(labels.len() * observed.len());
    let mut y = Vec::new();
    let mut rids = Vec::new();

    for (&rid, label) in &labels.labels {
        let Some(scans) = baseline.get(&rid) else {
            log::debug!("MRI: RID={rid} has no usable baseline scan");
            continue;
        };
        if scans.len() > 1 {
            match config.extra_rows {
                ExtraRowPolicy::KeepFirst => log::warn!(
                    "MRI: RID={rid} has {} baseline scans, keeping the first",
                    scans.len()
                ),
                ExtraRowPolicy::Reject => {
                    return Err(FeatureError::BaselineRowCount {
                        modality: Modality::Mri,
                        rid,
                        expected: 1,
                        found: scans.len(),
                    });
                }
            }
        }
        let scan = scans[0];

        let icv = scan.measures[normalizer]
            .filter(|&icv| icv != 0.0)
            .ok_or_else(|| FeatureError::MissingNormalizer {
                rid,
                column: config.normalizer.clone(),
            })?;
        for &i in &observed {
            let value = scan.measures[i].ok_or_else(|| FeatureError::MissingValue {
                modality: Modality::Mri,
                rid,
                column: table.measure_columns[i].clone(),
            })?;
            values.push(value / icv);
        }
        y.push(label.class());
        rids.push(rid);
    }

    let columns = observed
        .iter()
        .map(|&i| FeatureColumn {
            name: table.measure_columns[i].clone(),
            table: config.table.clone(),
            field: table.measure_columns[i].clone(),
        })
        .collect();

    FeatureSet::from_rows(Modality::Mri, columns, values, y, rids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::DxClass;
    use crate::tables::{ArmRecord, DxSummaryRecord, RegistryRecord};
    use approx::assert_relative_eq;

    /// Patients 1 (MCI) and 2 (AD) with conducted ADNI1 baselines.
    fn context() -> DxContext {
        let mut dx = Vec::new();
        let mut arms = Vec::new();
        let mut registry = Vec::new();
        for (rid, current) in [(1, 2), (2, 3)] {
            let mut record = DxSummaryRecord::visit(rid, "ADNI1", "bl", Some("bl"));
            record.dxconv = Some(0);
            record.dxcurren = Some(current);
            dx.push(record);
            arms.push(ArmRecord {
                rid,
                phase: "ADNI1".to_string(),
                arm: Some(2),
                enrolled: Some(1),
            });
            registry.push(RegistryRecord::conducted_visit(
                rid,
                "ADNI1",
                "bl",
                Some("bl"),
                None,
            ));
        }
        DxContext::from_parts(&dx, &arms, &registry).unwrap()
    }

    fn scan(rid: Rid, viscode: &str, qc: &str, measures: [Option<f64>; 3]) -> MriScan {
        MriScan {
            rid,
            phase: Some("ADNI1".to_string()),
            viscode: viscode.to_string(),
            viscode2: Some("bl".to_string()),
            status: Some("complete".to_string()),
            overall_qc: Some(qc.to_string()),
            measures: measures.to_vec(),
        }
    }

    fn table(scans: Vec<MriScan>) -> MriTable {
        MriTable {
            measure_columns: vec![
                "ST10CV".to_string(),
                "ST11SV".to_string(),
                "ST12SV".to_string(),
            ],
            scans,
        }
    }

    #[test]
    fn normalizes_fully_observed_measures() {
        let ctx = context();
        let table = table(vec![
            scan(1, "sc", "Pass", [Some(1000.0), Some(50.0), Some(3.0)]),
            scan(2, "sc", "Pass", [Some(2000.0), Some(40.0), None]),
            // Failed QC: its blanks do not count against the columns.
            scan(2, "m06", "Fail", [None, None, None]),
        ]);
        let set = generate_mri(&ctx, &table, Some("ADNI1"), &MriConfig::default()).unwrap();

        assert_eq!(set.rids, vec![1, 2]);
        assert_eq!(set.y, vec![DxClass::Mci, DxClass::Ad]);
        let names: Vec<&str> = set.column_names().collect();
        assert_eq!(names, vec!["ST10CV", "ST11SV"]);
        assert_relative_eq!(set.x[[0, 0]], 1.0);
        assert_relative_eq!(set.x[[0, 1]], 0.05);
        assert_relative_eq!(set.x[[1, 1]], 0.02);
    }

    #[test]
    fn extra_scans_keep_first_by_default() {
        let ctx = context();
        let table = table(vec![
            scan(1, "sc", "Pass", [Some(1000.0), Some(50.0), Some(3.0)]),
            scan(1, "sc", "Pass", [Some(500.0), Some(50.0), Some(3.0)]),
        ]);
        let set = generate_mri(&ctx, &table, None, &MriConfig::default()).unwrap();
        assert_eq!(set.len(), 1);
        assert_relative_eq!(set.x[[0, 1]], 0.05);

        let strict = MriConfig {
            extra_rows: ExtraRowPolicy::Reject,
            ..MriConfig::default()
        };
        assert!(matches!(
            generate_mri(&ctx, &table, None, &strict),
            Err(FeatureError::BaselineRowCount {
                modality: Modality::Mri,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn zero_normalizer_is_an_error() {
        let ctx = context();
        let table = table(vec![scan(1, "sc", "Pass", [Some(0.0), Some(50.0), Some(3.0)])]);
        match generate_mri(&ctx, &table, None, &MriConfig::default()) {
            Err(FeatureError::MissingNormalizer { rid, column }) => {
                assert_eq!(rid, 1);
                assert_eq!(column, "ST10CV");
            }
            other => panic!("Expected MissingNormalizer error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_normalizer_is_an_error() {
        let ctx = context();
        let table = table(vec![scan(1, "sc", "Pass", [Some(1.0), Some(2.0), Some(3.0)])]);
        let config = MriConfig {
            normalizer: "ST999".to_string(),
            ..MriConfig::default()
        };
        assert!(matches!(
            generate_mri(&ctx, &table, None, &config),
            Err(FeatureError::UnknownNormalizer(_))
        ));
    }
}
