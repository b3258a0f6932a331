use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::stats;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Metrics {
    pub train_r2: f64,
    pub test_r2: f64,
    pub train_rmse: f64,
    pub test_rmse: f64,
    pub train_mae: f64,
    pub test_mae: f64,
    pub cv_r2_mean: f64,
    pub cv_r2_std: f64,
}

/// Coefficient of determination. A constant target scores 1 when it is
/// predicted exactly and 0 otherwise.
pub(crate) fn r2(actual: &[f64], predicted: &[f64]) -> f64 {
    let Some(mean) = stats::mean(actual) else {
        return 0.0;
    };
    let residual: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let total: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

    if total == 0.0 {
        if residual == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - residual / total
    }
}

pub(crate) fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let squared: Vec<_> = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .collect();
    stats::mean(&squared).unwrap_or(0.0).sqrt()
}

pub(crate) fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    let absolute: Vec<_> = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .collect();
    stats::mean(&absolute).unwrap_or(0.0)
}

/// Splits `0..n` into `k` contiguous folds; the first `n % k` folds hold
/// one extra row.
pub(crate) fn folds(n: usize, k: usize) -> Vec<Range<usize>> {
    if k == 0 {
        return vec![];
    }

    let (base, extra) = (n / k, n % k);
    let mut start = 0;
    (0..k)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let fold = start..start + len;
            start += len;
            fold
        })
        .collect()
}
