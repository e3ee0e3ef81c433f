//! FDG-PET features: regional statistics of the baseline scan.

use super::{ExtraRowPolicy, FeatureColumn, FeatureError, FeatureSet, Modality};
use crate::labels::{DxContext, get_baseline_classes};
use crate::tables::{PET_STATISTICS, PetReading, Rid};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PetConfig {
    /// Visit code of the baseline scan.
    pub baseline_visit: String,
    /// Table name used for data dictionary lookups.
    pub table: String,
    /// Regions of interest measured per scan.
    pub expected_regions: usize,
    pub extra_rows: ExtraRowPolicy,
}

impl Default for PetConfig {
    fn default() -> Self {
        Self {
            baseline_visit: "bl".to_string(),
            table: "UCBERKELEYFDG".to_string(),
            expected_regions: 5,
            extra_rows: ExtraRowPolicy::Reject,
        }
    }
}

fn baseline_rows<'a>(
    rid: Rid,
    rows: &'a [&'a PetReading],
    config: &PetConfig,
) -> Result<&'a [&'a PetReading], FeatureError> {
    let expected = config.expected_regions;
    let found = rows.len();
    if found == expected {
        return Ok(rows);
    }
    if found > expected && config.extra_rows == ExtraRowPolicy::KeepFirst {
        log::warn!(
            "PET: RID={rid} has {found} baseline rows, keeping the first {expected}"
        );
        return Ok(&rows[..expected]);
    }
    Err(FeatureError::BaselineRowCount {
        modality: Modality::Pet,
        rid,
        expected,
        found,
    })
}

/// One row per labelled patient with a baseline scan. Columns are
/// `STAT:REGION`, statistic-major, regions in ascending order.
pub fn generate_pet(
    ctx: &DxContext,
    readings: &[PetReading],
    phase: Option<&str>,
    config: &PetConfig,
) -> Result<FeatureSet, FeatureError> {
    let labels = get_baseline_classes(ctx, readings, phase);

    let mut baseline: AHashMap<Rid, Vec<&PetReading>> = AHashMap::new();
    for reading in readings
        .iter()
        .filter(|reading| reading.viscode == config.baseline_visit)
    {
        baseline.entry(reading.rid).or_default().push(reading);
    }

    let mut regions: Option<Vec<String>> = None;
    let mut values = Vec::new();
    let mut y = Vec::new();
    let mut rids = Vec::new();

    for (&rid, label) in &labels.labels {
        let Some(rows) = baseline.get(&rid) else {
            log::debug!("PET: RID={rid} has no baseline scan");
            continue;
        };
        let mut by_region: Vec<(String, &PetReading)> = baseline_rows(rid, rows, config)?
            .iter()
            .map(|reading| (reading.region(), *reading))
            .collect();
        by_region.sort_by(|a, b| a.0.cmp(&b.0));

        let patient_regions: Vec<String> =
            by_region.iter().map(|(region, _)| region.clone()).collect();
        let repeated = patient_regions.windows(2).any(|pair| pair[0] == pair[1]);
        let expected_regions = regions.get_or_insert_with(|| patient_regions.clone());
        if repeated || *expected_regions != patient_regions {
            return Err(FeatureError::InconsistentRegions {
                modality: Modality::Pet,
                rid,
            });
        }

        for (s, stat) in PET_STATISTICS.iter().enumerate() {
            for (region, reading) in &by_region {
                let value = reading.stats[s].ok_or_else(|| FeatureError::MissingValue {
                    modality: Modality::Pet,
                    rid,
                    column: format!("{stat}:{region}"),
                })?;
                values.push(value);
            }
        }
        y.push(label.class());
        rids.push(rid);
    }

    let regions = regions.unwrap_or_default();
    let columns = PET_STATISTICS
        .iter()
        .flat_map(|stat| {
            regions.iter().map(move |region| FeatureColumn {
                name: format!("{stat}:{region}"),
                table: config.table.clone(),
                field: stat.to_string(),
            })
        })
        .collect();

    FeatureSet::from_rows(Modality::Pet, columns, values, y, rids)
}
