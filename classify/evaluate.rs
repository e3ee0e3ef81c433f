//! The repeated cross-validation loop.

use super::EvaluationError;
use super::folds::{check_class_counts, stratified_folds};
use super::metrics::{accuracy, roc_auc};
use super::preprocess::{LabelBinarizer, StandardScaler};
use super::svm::{LinearSvm, SvmConfig};
use super::validation::{FoldCurve, ParamGrid, ValidationCurve, average_folds, fold_curve};
use crate::features::Modality;
use crate::labels::DxClass;
use crate::progress::EvaluationProgress;
use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// The two classes to separate. The one with the higher code is the
    /// positive class.
    pub classes: [DxClass; 2],
    pub repetitions: usize,
    pub folds: usize,
    /// Base seed; drawn at random and logged when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Also sweep `C` over `c_grid` inside every outer training split.
    pub validation_curve: bool,
    pub c_grid: ParamGrid,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            classes: [DxClass::Mci, DxClass::Ad],
            repetitions: 50,
            folds: 5,
            seed: None,
            validation_curve: false,
            c_grid: ParamGrid::default(),
        }
    }
}

/// Population mean and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

impl MeanStd {
    pub fn of<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldMetrics {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_auc: f64,
    pub test_auc: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionResult {
    /// Zero-based repetition index.
    pub repetition: usize,
    pub seed: u64,
    pub folds: Vec<FoldMetrics>,
    /// Validation scores averaged over outer folds, when requested.
    pub validation: Option<FoldCurve>,
}

impl RepetitionResult {
    pub fn train_accuracy(&self) -> MeanStd {
        MeanStd::of(self.folds.iter().map(|f| f.train_accuracy))
    }

    pub fn test_accuracy(&self) -> MeanStd {
        MeanStd::of(self.folds.iter().map(|f| f.test_accuracy))
    }

    pub fn train_auc(&self) -> MeanStd {
        MeanStd::of(self.folds.iter().map(|f| f.train_auc))
    }

    pub fn test_auc(&self) -> MeanStd {
        MeanStd::of(self.folds.iter().map(|f| f.test_auc))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub modality: Modality,
    /// Negative then positive class.
    pub classes: [DxClass; 2],
    pub negative_count: usize,
    pub positive_count: usize,
    pub c: f64,
    pub base_seed: u64,
    pub repetitions: Vec<RepetitionResult>,
    pub validation: Option<ValidationCurve>,
}

impl PerformanceSummary {
    pub fn train_accuracy(&self) -> MeanStd {
        MeanStd::of(self.repetitions.iter().map(|r| r.train_accuracy().mean))
    }

    pub fn test_accuracy(&self) -> MeanStd {
        MeanStd::of(self.repetitions.iter().map(|r| r.test_accuracy().mean))
    }

    pub fn train_auc(&self) -> MeanStd {
        MeanStd::of(self.repetitions.iter().map(|r| r.train_auc().mean))
    }

    pub fn test_auc(&self) -> MeanStd {
        MeanStd::of(self.repetitions.iter().map(|r| r.test_auc().mean))
    }
}

/// Everything a repetition reads. Shared by reference across the pool.
struct RepetitionPlan<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [DxClass],
    c: f64,
    folds: usize,
    svm: &'a SvmConfig,
    grid: &'a [f64],
}

impl RepetitionPlan<'_> {
    fn run(&self, repetition: usize, seed: u64) -> Result<RepetitionResult, EvaluationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let folds = stratified_folds(self.y, self.folds, Some(&mut rng))?;

        let mut metrics = Vec::with_capacity(folds.len());
        let mut curves = Vec::new();
        for (k, fold) in folds.iter().enumerate() {
            let x_train = self.x.select(Axis(0), &fold.train);
            let x_test = self.x.select(Axis(0), &fold.test);
            let y_train: Vec<DxClass> = fold.train.iter().map(|&i| self.y[i]).collect();
            let y_test: Vec<DxClass> = fold.test.iter().map(|&i| self.y[i]).collect();

            let scaler = StandardScaler::fit(x_train.view())?;
            let x_train = scaler.transform(x_train.view());
            let x_test = scaler.transform(x_test.view());
            let binarizer = LabelBinarizer::fit(&y_train)?;
            let y_train = binarizer.transform(&y_train)?;
            let y_test = binarizer.transform(&y_test)?;

            let model = LinearSvm::fit(x_train.view(), &y_train, self.c, self.svm)?;
            let fold_metrics = FoldMetrics {
                train_accuracy: accuracy(&model.predict(x_train.view()), &y_train),
                test_accuracy: accuracy(&model.predict(x_test.view()), &y_test),
                train_auc: roc_auc(&model.decision_function(x_train.view()).to_vec(), &y_train)?,
                test_auc: roc_auc(&model.decision_function(x_test.view()).to_vec(), &y_test)?,
            };
            log::debug!(
                "repetition {} fold {}: train acc {:.3}, test acc {:.3}, test AUC {:.3}",
                repetition + 1,
                k + 1,
                fold_metrics.train_accuracy,
                fold_metrics.test_accuracy,
                fold_metrics.test_auc
            );
            metrics.push(fold_metrics);

            if !self.grid.is_empty() {
                curves.push(fold_curve(
                    x_train.view(),
                    &y_train,
                    self.grid,
                    self.folds,
                    self.svm,
                )?);
            }
        }

        Ok(RepetitionResult {
            repetition,
            seed,
            folds: metrics,
            validation: average_folds(&curves),
        })
    }
}

/// Evaluates a linear SVM separating `config.classes` in `(x, y)` by
/// repeated stratified cross-validation.
///
/// Samples of other classes are dropped and the rest shuffled. Every class
/// must have at least `config.folds` samples.
pub fn classify(
    x: ArrayView2<f64>,
    y: &[DxClass],
    modality: Modality,
    config: &EvaluationConfig,
    svm: &SvmConfig,
    progress: &dyn EvaluationProgress,
) -> Result<PerformanceSummary, EvaluationError> {
    if x.nrows() != y.len() {
        return Err(EvaluationError::DimensionMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    let [first, second] = config.classes;
    if first == second {
        return Err(EvaluationError::IdenticalClasses(first));
    }
    if config.repetitions == 0 {
        return Err(EvaluationError::NoRepetitions);
    }
    if config.folds < 2 {
        return Err(EvaluationError::TooFewFolds(config.folds));
    }

    let positions = |class: DxClass| -> Vec<usize> {
        y.iter()
            .enumerate()
            .filter(|&(_, &label)| label == class)
            .map(|(i, _)| i)
            .collect()
    };
    let (negative, positive) = (first.min(second), first.max(second));
    let negatives = positions(negative);
    let positives = positions(positive);
    log::info!(
        "{modality}: {} {negative} (negative) and {} {positive} (positive) samples",
        negatives.len(),
        positives.len()
    );
    for (class, found) in [(negative, &negatives), (positive, &positives)] {
        if found.is_empty() {
            return Err(EvaluationError::MissingClass { modality, class });
        }
    }

    let base_seed = config.seed.unwrap_or_else(|| rand::rng().random());
    log::info!("{modality}: base seed {base_seed}");

    let (negative_count, positive_count) = (negatives.len(), positives.len());
    let mut wanted = negatives;
    wanted.extend(positives);
    wanted.shuffle(&mut StdRng::seed_from_u64(base_seed));
    let x = x.select(Axis(0), &wanted);
    let y: Vec<DxClass> = wanted.iter().map(|&i| y[i]).collect();
    check_class_counts(&y, config.folds)?;

    let c = svm.c_for(modality);
    let grid = if config.validation_curve {
        config.c_grid.values()
    } else {
        Vec::new()
    };
    let plan = RepetitionPlan {
        x: x.view(),
        y: &y,
        c,
        folds: config.folds,
        svm,
        grid: &grid,
    };

    log::info!(
        "{modality}: {} repetitions of {}-fold cross-validation, C={c}",
        config.repetitions,
        config.folds
    );
    progress.on_start(modality, config.repetitions);
    let repetitions = (0..config.repetitions)
        .into_par_iter()
        .map(|repetition| {
            let seed = base_seed.wrapping_add(repetition as u64 + 1);
            let result = plan.run(repetition, seed);
            progress.on_repetition_finished(modality, repetition);
            result
        })
        .collect::<Result<Vec<_>, _>>()?;
    progress.on_finish(modality);

    let validation = config.validation_curve.then(|| {
        let curves: Vec<FoldCurve> = repetitions
            .iter()
            .filter_map(|r| r.validation.clone())
            .collect();
        ValidationCurve::from_repetitions(grid.clone(), &curves)
    });

    let summary = PerformanceSummary {
        modality,
        classes: [negative, positive],
        negative_count,
        positive_count,
        c,
        base_seed,
        repetitions,
        validation,
    };
    let test = summary.test_accuracy();
    log::info!(
        "{modality}: test accuracy {:.3} ± {:.3}, test AUC {:.3}",
        test.mean,
        test.std,
        summary.test_auc().mean
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn balanced(n: usize, separation: f64, seed: u64) -> (Array2<f64>, Vec<DxClass>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::zeros((n, 3));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let class = if i < n / 2 { DxClass::Mci } else { DxClass::Ad };
            let shift = if class == DxClass::Ad { separation } else { 0.0 };
            for j in 0..3 {
                x[[i, j]] = rng.random_range(-1.0..1.0) + if j == 0 { shift } else { 0.0 };
            }
            y.push(class);
        }
        (x, y)
    }

    fn config(repetitions: usize, seed: u64) -> EvaluationConfig {
        EvaluationConfig {
            repetitions,
            seed: Some(seed),
            ..EvaluationConfig::default()
        }
    }

    #[test]
    fn balanced_hundred_five_folds_one_repetition() {
        let (x, y) = balanced(100, 1.5, 5);
        let summary = classify(
            x.view(),
            &y,
            Modality::Pet,
            &config(1, 99),
            &SvmConfig::default(),
            &NoopProgress,
        )
        .unwrap();

        assert_eq!(summary.repetitions.len(), 1);
        assert_eq!(summary.repetitions[0].folds.len(), 5);
        assert_eq!(summary.classes, [DxClass::Mci, DxClass::Ad]);
        assert_eq!((summary.negative_count, summary.positive_count), (50, 50));
        for fold in &summary.repetitions[0].folds {
            for value in [
                fold.train_accuracy,
                fold.test_accuracy,
                fold.train_auc,
                fold.test_auc,
            ] {
                assert!((0.0..=1.0).contains(&value));
            }
        }
        assert!(summary.test_auc().mean > 0.7);
    }

    #[test]
    fn identical_features_give_chance_auc() {
        let x = Array2::from_elem((100, 4), 1.0);
        let y: Vec<DxClass> = (0..100)
            .map(|i| if i % 2 == 0 { DxClass::Mci } else { DxClass::Ad })
            .collect();
        let summary = classify(
            x.view(),
            &y,
            Modality::Mri,
            &config(1, 3),
            &SvmConfig::default(),
            &NoopProgress,
        )
        .unwrap();
        for fold in &summary.repetitions[0].folds {
            assert_eq!(fold.test_auc, 0.5);
            assert_eq!(fold.train_auc, 0.5);
        }
    }

    #[test]
    fn other_classes_are_filtered_out() {
        let (x, mut y) = balanced(40, 2.0, 1);
        y[0] = DxClass::Nl;
        y[1] = DxClass::Nl;
        let summary = classify(
            x.view(),
            &y,
            Modality::Pet,
            &config(2, 8),
            &SvmConfig::default(),
            &NoopProgress,
        )
        .unwrap();
        assert_eq!(summary.negative_count + summary.positive_count, 38);
    }

    #[test]
    fn missing_class_is_an_error() {
        let (x, _) = balanced(20, 1.0, 2);
        let y = vec![DxClass::Mci; 20];
        assert!(matches!(
            classify(
                x.view(),
                &y,
                Modality::Pet,
                &config(1, 1),
                &SvmConfig::default(),
                &NoopProgress
            ),
            Err(EvaluationError::MissingClass {
                class: DxClass::Ad,
                ..
            })
        ));
    }

    #[test]
    fn small_class_is_rejected_before_fitting() {
        let (x, mut y) = balanced(20, 1.0, 2);
        for label in y.iter_mut().skip(13) {
            *label = DxClass::Nl;
        }
        // 10 MCI, 3 AD.
        match classify(
            x.view(),
            &y,
            Modality::Pet,
            &config(1, 1),
            &SvmConfig::default(),
            &NoopProgress,
        ) {
            Err(EvaluationError::InsufficientSamples { class, count, .. }) => {
                assert_eq!(class, "AD");
                assert_eq!(count, 3);
            }
            other => panic!("Expected InsufficientSamples error, got {:?}", other),
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let (x, y) = balanced(60, 1.0, 4);
        let run = || {
            classify(
                x.view(),
                &y,
                Modality::Pet,
                &config(6, 2024),
                &SvmConfig::default(),
                &NoopProgress,
            )
            .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.repetitions, second.repetitions);
        // Each repetition draws its own partition.
        assert_ne!(first.repetitions[0].seed, first.repetitions[1].seed);
    }

    #[test]
    fn progress_sees_every_repetition() {
        struct Counter(AtomicUsize);
        impl EvaluationProgress for Counter {
            fn on_repetition_finished(&self, _: Modality, _: usize) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let (x, y) = balanced(30, 1.0, 6);
        let counter = Counter(AtomicUsize::new(0));
        classify(
            x.view(),
            &y,
            Modality::Concat,
            &config(4, 10),
            &SvmConfig::default(),
            &counter,
        )
        .unwrap();
        assert_eq!(counter.0.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn validation_curve_has_one_point_per_grid_value() {
        let (x, y) = balanced(40, 2.0, 9);
        let config = EvaluationConfig {
            repetitions: 2,
            seed: Some(5),
            validation_curve: true,
            c_grid: ParamGrid {
                start: -2.0,
                stop: 0.0,
                points: 3,
                base: 10.0,
            },
            ..EvaluationConfig::default()
        };
        let summary = classify(
            x.view(),
            &y,
            Modality::Pet,
            &config,
            &SvmConfig::default(),
            &NoopProgress,
        )
        .unwrap();
        let curve = summary.validation.unwrap();
        assert_eq!(curve.c_values.len(), 3);
        assert_eq!(curve.test_mean.len(), 3);
        assert!(curve.test_mean.iter().all(|auc| (0.0..=1.0).contains(auc)));
    }
}
