//! The joined diagnostic context and the label queries built on it.

use super::baseline::{
    ACCEPTED_ENROLLMENT, BaselineClass, DiagnosticLabel, DxClass, classify_baseline,
};
use super::codes::{ChangeCode, normalize_visits};
use super::{BASELINE_VISIT, LabelError};
use crate::tables::{
    ArmRecord, DxSummaryRecord, PatientKeyed, RegistryRecord, Rid, StudyTables, VisitKeyed,
};
use ahash::{AHashMap, AHashSet};
use chrono::{Datelike, NaiveDate};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// One visit after the diagnosis ⋈ arm ⋈ registry join.
#[derive(Debug, Clone, PartialEq)]
pub struct DxVisit {
    pub rid: Rid,
    pub phase: String,
    pub viscode: String,
    pub viscode2: Option<String>,
    pub change: Option<ChangeCode>,
    pub arm: Option<i64>,
    pub enrolled: Option<i64>,
    /// Exam date from the registry.
    pub exam_date: Option<NaiveDate>,
    pub conducted: Option<i64>,
    pub status: Option<i64>,
    pub pt_status: Option<i64>,
    pub visit_type: Option<i64>,
}

impl DxVisit {
    fn is_baseline(&self) -> bool {
        self.viscode2.as_deref() == Some(BASELINE_VISIT)
    }
}

/// Immutable diagnostic context, built once per run.
#[derive(Debug, Clone, Default)]
pub struct DxContext {
    visits: Vec<DxVisit>,
    by_patient: AHashMap<Rid, Vec<usize>>,
    baseline: BTreeMap<Rid, BaselineClass>,
}

type RegistryKey<'a> = (Rid, &'a str, &'a str, Option<&'a str>);

impl DxContext {
    pub fn build(tables: &StudyTables) -> Result<Self, LabelError> {
        Self::from_parts(&tables.dx_summary, &tables.arm, &tables.registry)
    }

    pub fn from_parts(
        dx_summary: &[DxSummaryRecord],
        arm: &[ArmRecord],
        registry: &[RegistryRecord],
    ) -> Result<Self, LabelError> {
        let normalized = normalize_visits(dx_summary);

        let mut arm_index: AHashMap<(Rid, &str), &ArmRecord> = AHashMap::with_capacity(arm.len());
        for record in arm {
            if arm_index.insert((record.rid, record.phase.as_str()), record).is_some() {
                return Err(LabelError::DuplicateKey {
                    table: "arm",
                    key: format!("RID={}, Phase={}", record.rid, record.phase),
                });
            }
        }

        // Diagnosis ⋈ arm on (RID, Phase).
        let with_arm: Vec<_> = normalized
            .iter()
            .filter_map(|visit| {
                arm_index
                    .get(&(visit.rid, visit.phase.as_str()))
                    .map(|arm| (visit, *arm))
            })
            .collect();
        log::debug!(
            "{} of {} diagnostic visits have an arm assignment",
            with_arm.len(),
            normalized.len()
        );

        let mut baseline: BTreeMap<Rid, BaselineClass> = BTreeMap::new();
        for (visit, arm) in &with_arm {
            let enrolled = arm
                .enrolled
                .is_some_and(|status| ACCEPTED_ENROLLMENT.contains(&status));
            if visit.viscode2.as_deref() != Some(BASELINE_VISIT) || !enrolled {
                continue;
            }
            let Some(change) = visit.change else {
                continue;
            };
            let class = classify_baseline(change, arm.arm);
            match baseline.entry(visit.rid) {
                Entry::Vacant(slot) => {
                    slot.insert(class);
                }
                Entry::Occupied(slot) if *slot.get() != class => {
                    return Err(LabelError::ConflictingBaseline {
                        rid: visit.rid,
                        first: *slot.get(),
                        second: class,
                    });
                }
                Entry::Occupied(_) => {}
            }
        }

        let mut registry_index: AHashMap<RegistryKey<'_>, &RegistryRecord> =
            AHashMap::with_capacity(registry.len());
        for record in registry {
            let key = (
                record.rid,
                record.phase.as_str(),
                record.viscode.as_str(),
                record.viscode2.as_deref(),
            );
            if registry_index.insert(key, record).is_some() {
                return Err(LabelError::DuplicateKey {
                    table: "registry",
                    key: format!(
                        "RID={}, Phase={}, VISCODE={}, VISCODE2={}",
                        record.rid,
                        record.phase,
                        record.viscode,
                        record.viscode2.as_deref().unwrap_or("")
                    ),
                });
            }
        }

        // ... ⋈ registry on (RID, Phase, VISCODE, VISCODE2).
        let visits: Vec<DxVisit> = with_arm
            .iter()
            .filter_map(|(visit, arm)| {
                let key = (
                    visit.rid,
                    visit.phase.as_str(),
                    visit.viscode.as_str(),
                    visit.viscode2.as_deref(),
                );
                registry_index.get(&key).map(|reg| DxVisit {
                    rid: visit.rid,
                    phase: visit.phase.clone(),
                    viscode: visit.viscode.clone(),
                    viscode2: visit.viscode2.clone(),
                    change: visit.change,
                    arm: arm.arm,
                    enrolled: arm.enrolled,
                    exam_date: reg.exam_date,
                    conducted: reg.conducted,
                    status: reg.status,
                    pt_status: reg.pt_status,
                    visit_type: reg.visit_type,
                })
            })
            .collect();

        let mut by_patient: AHashMap<Rid, Vec<usize>> = AHashMap::new();
        for (i, visit) in visits.iter().enumerate() {
            by_patient.entry(visit.rid).or_default().push(i);
        }

        log::info!(
            "Diagnostic context: {} joined visits, {} patients, {} with a baseline class",
            visits.len(),
            by_patient.len(),
            baseline.len()
        );

        Ok(Self {
            visits,
            by_patient,
            baseline,
        })
    }

    pub fn visits(&self) -> &[DxVisit] {
        &self.visits
    }

    /// All joined visits of one patient, in table order.
    pub fn patient_visits(&self, rid: Rid) -> impl Iterator<Item = &DxVisit> + '_ {
        self.by_patient
            .get(&rid)
            .into_iter()
            .flatten()
            .map(move |&i| &self.visits[i])
    }

    pub fn baseline_class(&self, rid: Rid) -> Option<BaselineClass> {
        self.baseline.get(&rid).copied()
    }

    pub fn change_history(&self, rid: Rid) -> impl Iterator<Item = ChangeCode> + '_ {
        self.patient_visits(rid).filter_map(|visit| visit.change)
    }

    /// Patient-level label; `None` when the patient has no baseline class.
    pub fn label(&self, rid: Rid) -> Option<DiagnosticLabel> {
        self.baseline_class(rid)
            .map(|class| DiagnosticLabel::derive(class, self.change_history(rid)))
    }

    /// Whole months from the baseline exam to the first conversion, or -1.
    pub fn months_to_conversion(&self, rid: Rid) -> i32 {
        let baseline_date = self
            .patient_visits(rid)
            .filter(|visit| visit.is_baseline())
            .find_map(|visit| visit.exam_date);
        let conversion_date = self
            .patient_visits(rid)
            .filter(|visit| visit.change.is_some_and(ChangeCode::is_conversion))
            .filter_map(|visit| visit.exam_date)
            .min();
        match (baseline_date, conversion_date) {
            (Some(start), Some(end)) => months_between(start, end),
            _ => -1,
        }
    }

    /// The joined visit matching a dataset row. The phase takes part in the
    /// match only when the row records one.
    pub fn find_visit(&self, rid: Rid, phase: Option<&str>, viscode: &str) -> Option<&DxVisit> {
        self.patient_visits(rid).find(|visit| {
            visit.viscode == viscode && phase.is_none_or(|phase| visit.phase == phase)
        })
    }

    /// Every patient with a baseline class, ordered by id.
    pub fn patients(&self) -> impl Iterator<Item = PatientSummary> + '_ {
        self.baseline.iter().map(|(&rid, &baseline)| PatientSummary {
            rid,
            baseline,
            label: DiagnosticLabel::derive(baseline, self.change_history(rid)),
            months_to_conversion: self.months_to_conversion(rid),
        })
    }
}

/// Calendar months from `start` to `end`, counting only completed months.
fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let mut months =
        (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32);
    if end.day() < start.day() {
        months -= 1;
    }
    months.max(0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientSummary {
    pub rid: Rid,
    pub baseline: BaselineClass,
    pub label: DiagnosticLabel,
    pub months_to_conversion: i32,
}

/// Result of [`get_baseline_classes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineLabels {
    pub labels: BTreeMap<Rid, DiagnosticLabel>,
    /// Eligible patients skipped because they have no baseline class.
    pub missing: Vec<Rid>,
}

impl BaselineLabels {
    pub fn get(&self, rid: Rid) -> Option<DiagnosticLabel> {
        self.labels.get(&rid).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Labels every patient of `dataset` who had a conducted baseline visit
/// (in `phase`, when given).
///
/// Patients without a baseline class are logged, listed in
/// [`BaselineLabels::missing`] and skipped.
pub fn get_baseline_classes<R: PatientKeyed>(
    ctx: &DxContext,
    dataset: &[R],
    phase: Option<&str>,
) -> BaselineLabels {
    let wanted: AHashSet<Rid> = dataset.iter().map(PatientKeyed::rid).collect();
    let eligible: BTreeSet<Rid> = ctx
        .visits()
        .iter()
        .filter(|visit| {
            phase.is_none_or(|phase| visit.phase == phase)
                && visit.viscode == BASELINE_VISIT
                && visit.conducted == Some(1)
                && wanted.contains(&visit.rid)
        })
        .map(|visit| visit.rid)
        .collect();

    let mut result = BaselineLabels::default();
    for rid in eligible {
        match ctx.label(rid) {
            Some(label) => {
                result.labels.insert(rid, label);
            }
            None => {
                log::warn!("No diagnostic info. for RID={rid}");
                result.missing.push(rid);
            }
        }
    }
    log::info!(
        "Labelled {} patients ({} skipped without a baseline class)",
        result.labels.len(),
        result.missing.len()
    );
    result
}

/// A dataset row with its diagnostic annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct DxAnnotation<'a, R> {
    pub row: &'a R,
    pub change: Option<ChangeCode>,
    pub baseline: Option<BaselineClass>,
    pub class: Option<DxClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedDxAnnotation<'a, R> {
    pub dx: DxAnnotation<'a, R>,
    /// Whole months to the first conversion, -1 if none was observed.
    pub months_to_conversion: i32,
}

/// Annotates each row with its visit's change code and the patient's
/// baseline and three-way class. Rows with no matching visit keep `None`.
pub fn get_dx<'a, R: VisitKeyed>(ctx: &DxContext, dataset: &'a [R]) -> Vec<DxAnnotation<'a, R>> {
    dataset
        .iter()
        .map(|row| {
            let baseline = ctx.baseline_class(row.rid());
            DxAnnotation {
                row,
                change: ctx
                    .find_visit(row.rid(), row.phase(), row.viscode())
                    .and_then(|visit| visit.change),
                baseline,
                class: baseline.map(BaselineClass::collapse),
            }
        })
        .collect()
}

/// [`get_dx`] plus months to conversion for each row's patient.
pub fn get_dx_with_time<'a, R: VisitKeyed>(
    ctx: &DxContext,
    dataset: &'a [R],
) -> Vec<TimedDxAnnotation<'a, R>> {
    let mut months_cache: AHashMap<Rid, i32> = AHashMap::new();
    get_dx(ctx, dataset)
        .into_iter()
        .map(|dx| {
            let rid = dx.row.rid();
            let months_to_conversion = *months_cache
                .entry(rid)
                .or_insert_with(|| ctx.months_to_conversion(rid));
            TimedDxAnnotation {
                dx,
                months_to_conversion,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::MciCourse;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn dx(rid: Rid, viscode: &str, dxconv: i64, field: i64) -> DxSummaryRecord {
        let mut record = DxSummaryRecord::visit(rid, "ADNI1", viscode, Some(viscode));
        record.dxconv = Some(dxconv);
        match dxconv {
            0 => record.dxcurren = Some(field),
            1 => record.dxcontyp = Some(field),
            _ => record.dxrev = Some(field),
        }
        record
    }

    fn arm(rid: Rid, arm: i64) -> ArmRecord {
        ArmRecord {
            rid,
            phase: "ADNI1".to_string(),
            arm: Some(arm),
            enrolled: Some(1),
        }
    }

    fn reg(rid: Rid, viscode: &str, exam_date: Option<NaiveDate>) -> RegistryRecord {
        RegistryRecord::conducted_visit(rid, "ADNI1", viscode, Some(viscode), exam_date)
    }

    /// Patient 1: stable NL. Patient 2: MCI converting at m24.
    /// Patient 3: SMC arm. Patient 4: baseline without a resolvable code.
    fn fixture() -> DxContext {
        let dx_summary = vec![
            dx(1, "bl", 0, 1),
            dx(1, "m12", 0, 1),
            dx(2, "bl", 0, 2),
            dx(2, "m12", 0, 2),
            dx(2, "m24", 1, 3),
            dx(3, "bl", 0, 1),
            DxSummaryRecord::visit(4, "ADNI1", "bl", Some("bl")),
        ];
        let arms = vec![arm(1, 1), arm(2, 2), arm(3, 11), arm(4, 1)];
        let registry = vec![
            reg(1, "bl", date(2005, 9, 8)),
            reg(1, "m12", date(2006, 9, 12)),
            reg(2, "bl", date(2005, 10, 15)),
            reg(2, "m12", date(2006, 10, 20)),
            reg(2, "m24", date(2007, 10, 1)),
            reg(3, "bl", date(2011, 1, 5)),
            reg(4, "bl", date(2006, 2, 2)),
        ];
        DxContext::from_parts(&dx_summary, &arms, &registry).unwrap()
    }

    #[test]
    fn baseline_classes_follow_arm() {
        let ctx = fixture();
        assert_eq!(ctx.baseline_class(1), Some(BaselineClass::Normal));
        assert_eq!(ctx.baseline_class(2), Some(BaselineClass::Lmci));
        assert_eq!(ctx.baseline_class(3), Some(BaselineClass::Smc));
        assert_eq!(ctx.baseline_class(4), None);
    }

    #[test]
    fn get_baseline_classes_labels_and_skips() {
        let ctx = fixture();
        let dataset: Vec<Rid> = vec![1, 2, 2, 3, 4, 99];
        let result = get_baseline_classes(&ctx, &dataset, Some("ADNI1"));

        assert_eq!(result.get(1), Some(DiagnosticLabel::Nl));
        assert_eq!(
            result.get(2),
            Some(DiagnosticLabel::Mci(Some(MciCourse::Converter)))
        );
        assert_eq!(result.get(2).unwrap().to_string(), "MCI-C");
        assert_eq!(result.get(3), Some(DiagnosticLabel::Nl));
        assert_eq!(result.len(), 3);
        assert_eq!(result.missing, vec![4]);
    }

    #[test]
    fn get_baseline_classes_restricts_phase_and_dataset() {
        let ctx = fixture();
        let dataset: Vec<Rid> = vec![1, 2];
        assert!(get_baseline_classes(&ctx, &dataset, Some("ADNI2")).is_empty());
        assert_eq!(get_baseline_classes(&ctx, &dataset, None).len(), 2);
    }

    #[test]
    fn unconducted_baseline_is_not_eligible() {
        let dx_summary = vec![dx(7, "bl", 0, 3)];
        let arms = vec![arm(7, 1)];
        let mut record = reg(7, "bl", date(2006, 1, 1));
        record.conducted = Some(0);
        let ctx = DxContext::from_parts(&dx_summary, &arms, &[record]).unwrap();

        assert_eq!(ctx.baseline_class(7), Some(BaselineClass::Ad));
        assert!(get_baseline_classes(&ctx, &[7 as Rid], None).is_empty());
    }

    #[test]
    fn labelling_is_deterministic() {
        let dataset: Vec<Rid> = vec![4, 3, 2, 1];
        let first = get_baseline_classes(&fixture(), &dataset, None);
        let second = get_baseline_classes(&fixture(), &dataset, None);
        assert_eq!(first, second);
    }

    #[test]
    fn months_to_conversion_counts_whole_months() {
        let ctx = fixture();
        // 2005-10-15 to 2007-10-01: 23 completed months.
        assert_eq!(ctx.months_to_conversion(2), 23);
        assert_eq!(ctx.months_to_conversion(1), -1);
        assert_eq!(ctx.months_to_conversion(42), -1);
    }

    #[test]
    fn get_dx_with_time_annotates_rows() {
        let ctx = fixture();
        let rows = vec![
            DxSummaryRecord::visit(2, "ADNI1", "m24", Some("m24")),
            DxSummaryRecord::visit(1, "ADNI1", "m12", Some("m12")),
            DxSummaryRecord::visit(5, "ADNI1", "bl", Some("bl")),
        ];
        let annotated = get_dx_with_time(&ctx, &rows);

        assert_eq!(annotated.len(), 3);
        assert_eq!(annotated[0].dx.change, Some(ChangeCode::MciToAd));
        assert_eq!(annotated[0].dx.baseline, Some(BaselineClass::Lmci));
        assert_eq!(annotated[0].dx.class, Some(DxClass::Mci));
        assert_eq!(annotated[0].months_to_conversion, 23);
        assert_eq!(annotated[1].dx.change, Some(ChangeCode::NlToNl));
        assert_eq!(annotated[1].months_to_conversion, -1);
        assert_eq!(annotated[2].dx.change, None);
        assert_eq!(annotated[2].dx.class, None);
    }

    #[test]
    fn duplicate_arm_key_is_rejected() {
        let arms = vec![arm(1, 1), arm(1, 2)];
        match DxContext::from_parts(&[dx(1, "bl", 0, 1)], &arms, &[]) {
            Err(LabelError::DuplicateKey { table, .. }) => assert_eq!(table, "arm"),
            other => panic!("Expected DuplicateKey error, got {:?}", other),
        }
    }

    #[test]
    fn conflicting_baselines_are_rejected() {
        let dx_summary = vec![dx(1, "bl", 0, 1), {
            let mut other = dx(1, "bl", 0, 3);
            other.phase = "ADNIGO".to_string();
            other
        }];
        let arms = vec![arm(1, 1), {
            let mut other = arm(1, 1);
            other.phase = "ADNIGO".to_string();
            other
        }];
        match DxContext::from_parts(&dx_summary, &arms, &[]) {
            Err(LabelError::ConflictingBaseline { rid, .. }) => assert_eq!(rid, 1),
            other => panic!("Expected ConflictingBaseline error, got {:?}", other),
        }
    }

    #[test]
    fn patients_lists_labelled_patients_in_order() {
        let ctx = fixture();
        let summaries: Vec<PatientSummary> = ctx.patients().collect();
        let rids: Vec<Rid> = summaries.iter().map(|s| s.rid).collect();
        assert_eq!(rids, vec![1, 2, 3]);
        assert_eq!(summaries[1].months_to_conversion, 23);
        assert_eq!(summaries[2].baseline, BaselineClass::Smc);
    }

    #[test]
    fn months_between_handles_day_of_month() {
        let start = NaiveDate::from_ymd_opt(2006, 1, 31).unwrap();
        assert_eq!(
            months_between(start, NaiveDate::from_ymd_opt(2006, 2, 28).unwrap()),
            0
        );
        assert_eq!(
            months_between(start, NaiveDate::from_ymd_opt(2007, 1, 31).unwrap()),
            12
        );
    }
}
