//! Stratified k-fold partitioning.

use super::EvaluationError;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Row indices of one train/test split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Fails unless every class has at least `k` samples, so that every test
/// fold holds a sample of each class.
pub fn check_class_counts<T>(labels: &[T], k: usize) -> Result<(), EvaluationError>
where
    T: Ord + Copy + Display,
{
    if k < 2 {
        return Err(EvaluationError::TooFewFolds(k));
    }
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_default() += 1;
    }
    match counts.into_iter().find(|&(_, count)| count < k) {
        Some((class, count)) => Err(EvaluationError::InsufficientSamples {
            class: class.to_string(),
            count,
            folds: k,
        }),
        None => Ok(()),
    }
}

/// Partitions sample indices into `k` folds that preserve class
/// proportions. Each class is shuffled with `rng` when one is given, then
/// dealt round-robin; the deal continues across classes so fold sizes differ
/// by at most one.
pub fn stratified_folds<T, R>(
    labels: &[T],
    k: usize,
    rng: Option<&mut R>,
) -> Result<Vec<Fold>, EvaluationError>
where
    T: Ord + Copy + Display,
    R: Rng + ?Sized,
{
    check_class_counts(labels, k)?;

    let mut by_class: BTreeMap<T, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }
    if let Some(rng) = rng {
        for group in by_class.values_mut() {
            group.shuffle(rng);
        }
    }

    let mut tests: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (dealt, index) in by_class.into_values().flatten().enumerate() {
        tests[dealt % k].push(index);
    }

    Ok((0..k)
        .map(|i| Fold {
            train: tests
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .flat_map(|(_, fold)| fold.iter().copied())
                .collect(),
            test: tests[i].clone(),
        })
        .collect())
}
