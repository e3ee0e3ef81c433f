//! # Cross-Validated Evaluation Module
//!
//! Estimates how well a linear SVM separates two diagnostic classes. The
//! samples of the two classes are shuffled once, then every repetition draws
//! a fresh stratified k-fold partition. Within a fold the scaler and the
//! label binarizer are fitted on the training split only and applied to the
//! training and test splits separately, so nothing about the test split
//! leaks into the fit.
//!
//! Repetitions are independent: each one owns an RNG seeded from the base
//! seed and its index, which lets `rayon` run them in parallel with results
//! identical to a serial run.

use crate::features::Modality;
use crate::labels::DxClass;
use thiserror::Error;

pub mod evaluate;
pub mod folds;
pub mod metrics;
pub mod preprocess;
pub mod report;
pub mod svm;
pub mod validation;

pub use evaluate::{
    EvaluationConfig, FoldMetrics, MeanStd, PerformanceSummary, RepetitionResult, classify,
};
pub use folds::{Fold, stratified_folds};
pub use metrics::{RocCurve, accuracy, roc_auc, roc_curve};
pub use preprocess::{LabelBinarizer, StandardScaler};
pub use svm::{LinearSvm, Penalty, SvmConfig};
pub use validation::{ParamGrid, ValidationCurve};

/// Errors raised by the evaluator and its building blocks.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Feature matrix has {rows} rows but {labels} labels were given.")]
    DimensionMismatch { rows: usize, labels: usize },
    #[error("The two classes to compare must differ, but both are '{0}'.")]
    IdenticalClasses(DxClass),
    #[error("{modality}: no samples of class '{class}' to evaluate.")]
    MissingClass { modality: Modality, class: DxClass },
    #[error(
        "Class '{class}' has {count} sample(s), fewer than the {folds} folds requested. Every fold needs a sample of each class."
    )]
    InsufficientSamples {
        class: String,
        count: usize,
        folds: usize,
    },
    #[error("At least 2 folds are required, but {0} were requested.")]
    TooFewFolds(usize),
    #[error("At least one repetition is required.")]
    NoRepetitions,
    #[error("Label binarization needs exactly 2 classes in the training split, found {0}.")]
    NotBinary(usize),
    #[error("Label '{0}' was not seen when the binarizer was fitted.")]
    UnseenLabel(DxClass),
    #[error("ROC analysis needs both positive and negative samples.")]
    SingleClassScores,
    #[error("ROC analysis needs finite scores, but a score is NaN or infinite.")]
    NonFiniteScores,
    #[error("Cannot fit a model to an empty training split.")]
    EmptyTrainingSet,
    #[error("Failed to write report: {0}")]
    Report(#[from] csv::Error),
}
