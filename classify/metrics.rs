//! Classification accuracy and ROC analysis.

use super::EvaluationError;

/// Fraction of predictions equal to the truth. Empty input scores 0.
pub fn accuracy(predicted: &[bool], truth: &[bool]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = predicted
        .iter()
        .zip(truth)
        .filter(|(p, t)| p == t)
        .count();
    correct as f64 / truth.len() as f64
}

/// Receiver operating characteristic: one point per distinct score, from
/// the strictest threshold down.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
    /// Area under the curve by the trapezoid rule.
    pub auc: f64,
}

/// Builds the ROC curve of `scores` against binary `labels`, `true` being
/// the positive class. Tied scores move the curve in a single step, so a
/// constant score gives the diagonal and an AUC of 0.5.
pub fn roc_curve(scores: &[f64], labels: &[bool]) -> Result<RocCurve, EvaluationError> {
    if scores.len() != labels.len() {
        return Err(EvaluationError::DimensionMismatch {
            rows: scores.len(),
            labels: labels.len(),
        });
    }
    if scores.iter().any(|score| !score.is_finite()) {
        return Err(EvaluationError::NonFiniteScores);
    }
    let positives = labels.iter().filter(|&&label| label).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(EvaluationError::SingleClassScores);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    let (mut tp, mut fp) = (0usize, 0usize);

    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        fpr.push(fp as f64 / negatives as f64);
        tpr.push(tp as f64 / positives as f64);
        thresholds.push(threshold);
    }

    let auc = fpr
        .windows(2)
        .zip(tpr.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
        .sum();

    Ok(RocCurve {
        fpr,
        tpr,
        thresholds,
        auc,
    })
}

pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Result<f64, EvaluationError> {
    Ok(roc_curve(scores, labels)?.auc)
}
