//! Per-fold preprocessing: feature standardization and label binarization.

use super::EvaluationError;
use crate::labels::DxClass;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::collections::BTreeSet;

/// Column-wise z-scoring with parameters learned from one split.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Learns column means and population standard deviations. Constant
    /// columns keep a scale of 1 so they are centred but not divided.
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, EvaluationError> {
        if x.nrows() == 0 {
            return Err(EvaluationError::EmptyTrainingSet);
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or(EvaluationError::EmptyTrainingSet)?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > 0.0 && std.is_finite() { std } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

/// Maps two diagnostic classes onto negative/positive. The class with the
/// higher code is the positive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelBinarizer {
    negative: DxClass,
    positive: DxClass,
}

impl LabelBinarizer {
    pub fn fit(y: &[DxClass]) -> Result<Self, EvaluationError> {
        let classes: BTreeSet<DxClass> = y.iter().copied().collect();
        let mut ordered = classes.iter().copied();
        match (ordered.next(), ordered.next(), ordered.next()) {
            (Some(negative), Some(positive), None) => Ok(Self { negative, positive }),
            _ => Err(EvaluationError::NotBinary(classes.len())),
        }
    }

    pub fn transform(&self, y: &[DxClass]) -> Result<Vec<bool>, EvaluationError> {
        y.iter()
            .map(|&class| {
                if class == self.positive {
                    Ok(true)
                } else if class == self.negative {
                    Ok(false)
                } else {
                    Err(EvaluationError::UnseenLabel(class))
                }
            })
            .collect()
    }

    pub fn positive(&self) -> DxClass {
        self.positive
    }

    pub fn negative(&self) -> DxClass {
        self.negative
    }
}
