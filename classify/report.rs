//! Tab-separated reports of evaluation results and patient labels.

use super::evaluate::PerformanceSummary;
use super::validation::ValidationCurve;
use crate::labels::PatientSummary;
use std::path::Path;

fn tsv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, csv::Error> {
    csv::WriterBuilder::new().delimiter(b'\t').from_path(path)
}

fn format_value(value: f64) -> String {
    format!("{value:.6}")
}

/// One row per repetition with the fold-averaged train and test scores,
/// then a final `mean` row averaged over repetitions.
pub fn write_summary(summary: &PerformanceSummary, path: &Path) -> Result<(), csv::Error> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "repetition",
        "seed",
        "train_accuracy_mean",
        "train_accuracy_std",
        "test_accuracy_mean",
        "test_accuracy_std",
        "train_auc_mean",
        "test_auc_mean",
    ])?;
    for repetition in &summary.repetitions {
        let train = repetition.train_accuracy();
        let test = repetition.test_accuracy();
        writer.write_record([
            (repetition.repetition + 1).to_string(),
            repetition.seed.to_string(),
            format_value(train.mean),
            format_value(train.std),
            format_value(test.mean),
            format_value(test.std),
            format_value(repetition.train_auc().mean),
            format_value(repetition.test_auc().mean),
        ])?;
    }
    let train = summary.train_accuracy();
    let test = summary.test_accuracy();
    writer.write_record([
        "mean".to_string(),
        summary.base_seed.to_string(),
        format_value(train.mean),
        format_value(train.std),
        format_value(test.mean),
        format_value(test.std),
        format_value(summary.train_auc().mean),
        format_value(summary.test_auc().mean),
    ])?;
    writer.flush()?;
    Ok(())
}

pub fn write_validation_curve(curve: &ValidationCurve, path: &Path) -> Result<(), csv::Error> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["c", "train_mean", "train_std", "test_mean", "test_std"])?;
    for (i, c) in curve.c_values.iter().enumerate() {
        writer.write_record([
            format!("{c:e}"),
            format_value(curve.train_mean[i]),
            format_value(curve.train_std[i]),
            format_value(curve.test_mean[i]),
            format_value(curve.test_std[i]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per labelled patient. Months to conversion is -1 when the
/// patient never converts or the dates are unknown.
pub fn write_patient_labels(patients: &[PatientSummary], path: &Path) -> Result<(), csv::Error> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["RID", "baseline", "label", "class", "months_to_conversion"])?;
    for patient in patients {
        writer.write_record([
            patient.rid.to_string(),
            patient.baseline.to_string(),
            patient.label.to_string(),
            patient.label.class().code().to_string(),
            patient.months_to_conversion.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
