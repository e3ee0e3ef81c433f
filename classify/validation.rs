//! Validation curve over the SVM regularization strength.

use super::EvaluationError;
use super::folds::stratified_folds;
use super::metrics::roc_auc;
use super::svm::{LinearSvm, SvmConfig};
use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Log-spaced grid of `C` values: `base^start ..= base^stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub start: f64,
    pub stop: f64,
    pub points: usize,
    pub base: f64,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            start: -5.0,
            stop: 3.0,
            points: 300,
            base: 10.0,
        }
    }
}

impl ParamGrid {
    pub fn values(&self) -> Vec<f64> {
        match self.points {
            0 => Vec::new(),
            1 => vec![self.base.powf(self.start)],
            n => {
                let step = (self.stop - self.start) / (n - 1) as f64;
                (0..n)
                    .map(|i| self.base.powf(self.start + step * i as f64))
                    .collect()
            }
        }
    }
}

/// Train and held-out ROC AUC per grid value, averaged over inner folds.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldCurve {
    pub train: Vec<f64>,
    pub test: Vec<f64>,
}

/// Scores every `C` of `grid` with unshuffled stratified inner folds over
/// one (already scaled) training split.
pub fn fold_curve(
    x: ArrayView2<f64>,
    y: &[bool],
    grid: &[f64],
    folds: usize,
    config: &SvmConfig,
) -> Result<FoldCurve, EvaluationError> {
    let inner = stratified_folds::<_, StdRng>(y, folds, None)?;
    let mut train = vec![0.0; grid.len()];
    let mut test = vec![0.0; grid.len()];

    for fold in &inner {
        let x_train = x.select(Axis(0), &fold.train);
        let x_test = x.select(Axis(0), &fold.test);
        let y_train: Vec<bool> = fold.train.iter().map(|&i| y[i]).collect();
        let y_test: Vec<bool> = fold.test.iter().map(|&i| y[i]).collect();

        for (g, &c) in grid.iter().enumerate() {
            let model = LinearSvm::fit(x_train.view(), &y_train, c, config)?;
            let train_scores = model.decision_function(x_train.view());
            let test_scores = model.decision_function(x_test.view());
            train[g] += roc_auc(&train_scores.to_vec(), &y_train)?;
            test[g] += roc_auc(&test_scores.to_vec(), &y_test)?;
        }
    }

    let n = inner.len() as f64;
    train.iter_mut().for_each(|v| *v /= n);
    test.iter_mut().for_each(|v| *v /= n);
    Ok(FoldCurve { train, test })
}

/// Mean and standard deviation of the train and held-out scores per `C`,
/// across repetitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationCurve {
    pub c_values: Vec<f64>,
    pub train_mean: Vec<f64>,
    pub train_std: Vec<f64>,
    pub test_mean: Vec<f64>,
    pub test_std: Vec<f64>,
}

fn column_stats(rows: &[&[f64]], width: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    (0..width)
        .map(|j| {
            let mean = rows.iter().map(|row| row[j]).sum::<f64>() / n;
            let var = rows.iter().map(|row| (row[j] - mean).powi(2)).sum::<f64>() / n;
            (mean, var.sqrt())
        })
        .unzip()
}

impl ValidationCurve {
    /// Aggregates one outer-fold-averaged curve per repetition.
    pub fn from_repetitions(c_values: Vec<f64>, repetitions: &[FoldCurve]) -> Self {
        let width = c_values.len();
        let train: Vec<&[f64]> = repetitions.iter().map(|r| r.train.as_slice()).collect();
        let test: Vec<&[f64]> = repetitions.iter().map(|r| r.test.as_slice()).collect();
        let (train_mean, train_std) = column_stats(&train, width);
        let (test_mean, test_std) = column_stats(&test, width);
        Self {
            c_values,
            train_mean,
            train_std,
            test_mean,
            test_std,
        }
    }

    /// Grid value with the best mean held-out score.
    pub fn best_c(&self) -> Option<f64> {
        self.test_mean
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.c_values[i])
    }
}

/// Averages per-outer-fold curves into one curve for the repetition.
pub(crate) fn average_folds(curves: &[FoldCurve]) -> Option<FoldCurve> {
    let first = curves.first()?;
    let n = curves.len() as f64;
    let mut train = vec![0.0; first.train.len()];
    let mut test = vec![0.0; first.test.len()];
    for curve in curves {
        train.iter_mut().zip(&curve.train).for_each(|(acc, v)| *acc += v / n);
        test.iter_mut().zip(&curve.test).for_each(|(acc, v)| *acc += v / n);
    }
    Some(FoldCurve { train, test })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn grid_is_log_spaced() {
        let grid = ParamGrid {
            start: -2.0,
            stop: 2.0,
            points: 5,
            base: 10.0,
        };
        let values = grid.values();
        assert_eq!(values.len(), 5);
        assert_relative_eq!(values[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(values[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(values[4], 100.0, epsilon = 1e-9);
        assert_eq!(ParamGrid::default().values().len(), 300);
    }

    #[test]
    fn curve_scores_separable_data_highly() {
        let n = 30;
        let mut x = Array2::zeros((n, 1));
        let y: Vec<bool> = (0..n).map(|i| i % 2 == 0).collect();
        for i in 0..n {
            let offset = 1.0 + i as f64 * 0.01;
            x[[i, 0]] = if y[i] { offset } else { -offset };
        }
        let curve = fold_curve(x.view(), &y, &[0.01, 1.0], 3, &SvmConfig::default()).unwrap();
        assert_eq!(curve.test.len(), 2);
        for auc in curve.test.iter().chain(&curve.train) {
            assert_relative_eq!(*auc, 1.0);
        }
    }

    #[test]
    fn repetitions_aggregate_per_grid_value() {
        let curves = vec![
            FoldCurve {
                train: vec![1.0, 0.8],
                test: vec![0.6, 0.7],
            },
            FoldCurve {
                train: vec![1.0, 0.6],
                test: vec![0.8, 0.5],
            },
        ];
        let averaged = average_folds(&curves).unwrap();
        assert_relative_eq!(averaged.train[1], 0.7, epsilon = 1e-12);

        let curve = ValidationCurve::from_repetitions(vec![0.1, 1.0], &curves);
        assert_relative_eq!(curve.test_mean[0], 0.7, epsilon = 1e-12);
        assert_relative_eq!(curve.test_std[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(curve.train_std[0], 0.0, epsilon = 1e-12);
        assert_eq!(curve.best_c(), Some(0.1));
    }
}
