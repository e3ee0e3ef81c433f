//! Visit coverage: which scheduled visits each patient of a measurement
//! table actually has.

use super::context::DxContext;
use crate::tables::{Rid, VisitKeyed};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Unscheduled, screening-failure and non-visit codes are not tracked.
fn is_tracked_visit(code: &str) -> bool {
    code != "f" && code != "nv" && !code.starts_with('v')
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientCoverage {
    pub rid: Rid,
    /// Phase of the patient's baseline visit, if the registry has one.
    pub phase: Option<String>,
    /// Distinct visits present in the measurement table.
    pub visit_count: usize,
    /// One flag per entry of [`VisitCoverage::visit_codes`].
    pub present: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitCoverage {
    pub visit_codes: Vec<String>,
    pub patients: Vec<PatientCoverage>,
}

/// Tabulates visit coverage for every patient in `dataset` whose registry
/// history includes a baseline or screening visit.
pub fn visit_coverage<R: VisitKeyed>(ctx: &DxContext, dataset: &[R]) -> VisitCoverage {
    let visit_codes: Vec<String> = dataset
        .iter()
        .flat_map(|row| std::iter::once(Some(row.viscode())).chain(std::iter::once(row.viscode2())))
        .flatten()
        .filter(|code| is_tracked_visit(code))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rows_by_patient: BTreeMap<Rid, Vec<&R>> = BTreeMap::new();
    for row in dataset {
        rows_by_patient.entry(row.rid()).or_default().push(row);
    }

    let mut patients = Vec::with_capacity(rows_by_patient.len());
    for (rid, rows) in rows_by_patient {
        let has_entry_visit = ctx
            .patient_visits(rid)
            .any(|visit| matches!(visit.viscode2.as_deref(), Some("bl") | Some("sc")));
        if !has_entry_visit {
            continue;
        }
        let phase = ctx
            .patient_visits(rid)
            .find(|visit| visit.viscode2.as_deref() == Some("bl"))
            .map(|visit| visit.phase.clone());

        // A blank secondary code still counts once as a visit of its own.
        let use_primary = rows.iter().all(|row| row.viscode2().is_none());
        let visits: BTreeSet<Option<&str>> = rows
            .iter()
            .map(|row| {
                if use_primary {
                    Some(row.viscode())
                } else {
                    row.viscode2()
                }
            })
            .collect();

        patients.push(PatientCoverage {
            rid,
            phase,
            visit_count: visits.len(),
            present: visit_codes
                .iter()
                .map(|code| visits.contains(&Some(code.as_str())))
                .collect(),
        });
    }

    log::info!("Visit coverage: {} patients", patients.len());
    VisitCoverage {
        visit_codes,
        patients,
    }
}

impl VisitCoverage {
    /// Writes the coverage table as TSV: RID, Phase, Count, then one column
    /// per visit code.
    pub fn write_tsv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let mut header = vec!["RID".to_string(), "Phase".to_string(), "Count".to_string()];
        header.extend(self.visit_codes.iter().cloned());
        writer.write_record(&header)?;
        for patient in &self.patients {
            let mut record = vec![
                patient.rid.to_string(),
                patient.phase.clone().unwrap_or_else(|| "NA".to_string()),
                patient.visit_count.to_string(),
            ];
            record.extend(
                patient
                    .present
                    .iter()
                    .map(|&present| if present { "True" } else { "False" }.to_string()),
            );
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
