//! Linear support vector machine with hinge loss.
//!
//! The default L2-penalized problem
//!
//! ```text
//! min_w  ½‖w‖² + C Σᵢ max(0, 1 − yᵢ wᵀxᵢ)
//! ```
//!
//! is solved in the dual by coordinate descent over the box `0 ≤ αᵢ ≤ C`.
//! The intercept is learned as the weight of a constant augmented feature
//! and is therefore regularized along with the other weights.
//!
//! The L1-penalized variant `‖w‖₁ + C Σᵢ hinge` has no smooth dual and is
//! solved in the primal by proximal subgradient descent with soft
//! thresholding; the intercept is left unpenalized there.

use super::EvaluationError;
use crate::features::Modality;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of the augmented bias feature.
const BIAS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    L1,
    L2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    /// Regularization strength `C`.
    pub c: f64,
    /// Per-modality replacements for `c`, keyed by `pet`, `mri` or `concat`.
    pub c_overrides: BTreeMap<String, f64>,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub penalty: Penalty,
    pub fit_intercept: bool,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            c: 0.006,
            c_overrides: BTreeMap::new(),
            tolerance: 1e-5,
            max_iterations: 1000,
            penalty: Penalty::L2,
            fit_intercept: true,
        }
    }
}

impl SvmConfig {
    pub fn c_for(&self, modality: Modality) -> f64 {
        self.c_overrides
            .get(modality.key())
            .copied()
            .unwrap_or(self.c)
    }
}

/// A fitted linear decision function `wᵀx + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSvm {
    weights: Array1<f64>,
    intercept: f64,
    iterations: usize,
}

impl LinearSvm {
    /// Fits the model to `x` with binary targets `y` (`true` is the positive
    /// class).
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[bool],
        c: f64,
        config: &SvmConfig,
    ) -> Result<Self, EvaluationError> {
        if x.nrows() != y.len() {
            return Err(EvaluationError::DimensionMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(EvaluationError::EmptyTrainingSet);
        }
        if !(y.iter().any(|&label| label) && y.iter().any(|&label| !label)) {
            return Err(EvaluationError::NotBinary(1));
        }
        let model = match config.penalty {
            Penalty::L2 => fit_dual(x, y, c, config),
            Penalty::L1 => fit_proximal(x, y, c, config),
        };
        if model.iterations >= config.max_iterations {
            log::debug!(
                "SVM reached the iteration cap ({}) before converging",
                config.max_iterations
            );
        }
        Ok(model)
    }

    pub fn decision_function(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.dot(&self.weights) + self.intercept
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<bool> {
        self.decision_function(x)
            .iter()
            .map(|&score| score > 0.0)
            .collect()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Passes over the data the solver made.
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn sign(label: bool) -> f64 {
    if label { 1.0 } else { -1.0 }
}

/// Dual coordinate descent for the L2-penalized hinge loss.
fn fit_dual(x: ArrayView2<f64>, y: &[bool], c: f64, config: &SvmConfig) -> LinearSvm {
    let (n, p) = x.dim();
    let bias = if config.fit_intercept { BIAS } else { 0.0 };
    let signs: Vec<f64> = y.iter().map(|&label| sign(label)).collect();
    let diagonal: Vec<f64> = x
        .rows()
        .into_iter()
        .map(|row| row.dot(&row) + bias * bias)
        .collect();

    let mut alpha = vec![0.0; n];
    let mut w = Array1::<f64>::zeros(p);
    let mut b = 0.0;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        let mut pg_max = f64::NEG_INFINITY;
        let mut pg_min = f64::INFINITY;

        for i in 0..n {
            if diagonal[i] <= 0.0 {
                continue;
            }
            let row = x.row(i);
            let gradient = signs[i] * (row.dot(&w) + b * bias) - 1.0;
            let projected = if alpha[i] <= 0.0 {
                gradient.min(0.0)
            } else if alpha[i] >= c {
                gradient.max(0.0)
            } else {
                gradient
            };
            pg_max = pg_max.max(projected);
            pg_min = pg_min.min(projected);

            if projected.abs() > 1e-12 {
                let previous = alpha[i];
                alpha[i] = (alpha[i] - gradient / diagonal[i]).clamp(0.0, c);
                let step = (alpha[i] - previous) * signs[i];
                w.scaled_add(step, &row);
                b += step * bias;
            }
        }

        if pg_max - pg_min <= config.tolerance {
            break;
        }
    }

    LinearSvm {
        weights: w,
        intercept: b * bias,
        iterations,
    }
}

fn primal_objective(
    x: ArrayView2<f64>,
    signs: &[f64],
    w: &Array1<f64>,
    b: f64,
    c: f64,
) -> f64 {
    let hinge: f64 = x
        .dot(w)
        .iter()
        .zip(signs)
        .map(|(&score, &s)| (1.0 - s * (score + b)).max(0.0))
        .sum();
    w.iter().map(|v| v.abs()).sum::<f64>() + c * hinge
}

/// Proximal subgradient descent for the L1-penalized hinge loss. Keeps the
/// best iterate seen, since subgradient steps are not monotone.
fn fit_proximal(x: ArrayView2<f64>, y: &[bool], c: f64, config: &SvmConfig) -> LinearSvm {
    let (n, p) = x.dim();
    let signs: Vec<f64> = y.iter().map(|&label| sign(label)).collect();
    let scale = c * n as f64 * x.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));

    let mut w = Array1::<f64>::zeros(p);
    let mut b = 0.0;
    let mut best = (w.clone(), b, primal_objective(x, &signs, &w, b, c));
    let mut previous = best.2;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        let scores = x.dot(&w);
        let mut grad_w = Array1::<f64>::zeros(p);
        let mut grad_b = 0.0;
        for i in 0..n {
            if signs[i] * (scores[i] + b) < 1.0 {
                grad_w.scaled_add(-c * signs[i], &x.row(i));
                grad_b -= c * signs[i];
            }
        }

        let step = 1.0 / (scale * (iterations as f64).sqrt());
        w.scaled_add(-step, &grad_w);
        w.mapv_inplace(|v| v.signum() * (v.abs() - step).max(0.0));
        if config.fit_intercept {
            b -= step * grad_b;
        }

        let objective = primal_objective(x, &signs, &w, b, c);
        if objective < best.2 {
            best = (w.clone(), b, objective);
        }
        if (previous - objective).abs() <= config.tolerance * previous.abs().max(1.0) {
            break;
        }
        previous = objective;
    }

    LinearSvm {
        weights: best.0,
        intercept: best.1,
        iterations,
    }
}
