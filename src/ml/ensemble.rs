use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tree::RegressionTree;
use crate::stats;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Hyperparameters {
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Only used by gradient boosting.
    pub learning_rate: f64,
    pub random_state: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Algorithm {
    GradientBoosting,
    RandomForest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub(crate) enum Ensemble {
    GradientBoosting {
        init: f64,
        learning_rate: f64,
        trees: Vec<RegressionTree>,
    },
    RandomForest {
        trees: Vec<RegressionTree>,
    },
}

impl Ensemble {
    /// Fits the ensemble and returns it with its normalized feature
    /// importances.
    pub fn fit(
        algorithm: Algorithm,
        x: &[Vec<f64>],
        y: &[f64],
        params: &Hyperparameters,
    ) -> (Self, Vec<f64>) {
        match algorithm {
            Algorithm::GradientBoosting => Self::fit_gradient_boosting(x, y, params),
            Algorithm::RandomForest => Self::fit_random_forest(x, y, params),
        }
    }

    fn fit_gradient_boosting(x: &[Vec<f64>], y: &[f64], params: &Hyperparameters) -> (Self, Vec<f64>) {
        let init = stats::mean(y).unwrap_or(0.0);
        let all: Vec<_> = (0..y.len()).collect();
        let mut predicted = vec![init; y.len()];
        let mut importance = Importance::new(x);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals: Vec<_> = y.iter().zip(&predicted).map(|(y, p)| y - p).collect();
            let (tree, gains) = RegressionTree::fit(x, &residuals, &all, params.max_depth);

            for (p, row) in predicted.iter_mut().zip(x) {
                *p += params.learning_rate * tree.predict(row);
            }
            importance.add(&gains);
            trees.push(tree);
        }

        let ensemble = Self::GradientBoosting {
            init,
            learning_rate: params.learning_rate,
            trees,
        };
        (ensemble, importance.finish())
    }

    fn fit_random_forest(x: &[Vec<f64>], y: &[f64], params: &Hyperparameters) -> (Self, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(params.random_state);
        let mut importance = Importance::new(x);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let sample: Vec<_> = (0..y.len()).map(|_| rng.gen_range(0..y.len())).collect();
            let (tree, gains) = RegressionTree::fit(x, y, &sample, params.max_depth);

            importance.add(&gains);
            trees.push(tree);
        }

        (Self::RandomForest { trees }, importance.finish())
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Self::GradientBoosting {
                init,
                learning_rate,
                trees,
            } => init + learning_rate * trees.iter().map(|t| t.predict(row)).sum::<f64>(),

            Self::RandomForest { trees } => {
                if trees.is_empty() {
                    return 0.0;
                }
                trees.iter().map(|t| t.predict(row)).sum::<f64>() / trees.len() as f64
            }
        }
    }
}

/// Averages each tree's normalized impurity reduction.
struct Importance {
    totals: Vec<f64>,
}

impl Importance {
    fn new(x: &[Vec<f64>]) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        Self {
            totals: vec![0.0; n_features],
        }
    }

    fn add(&mut self, gains: &[f64]) {
        let sum: f64 = gains.iter().sum();
        if sum <= 0.0 {
            return;
        }
        for (t, g) in self.totals.iter_mut().zip(gains) {
            *t += g / sum;
        }
    }

    fn finish(mut self) -> Vec<f64> {
        let sum: f64 = self.totals.iter().sum();
        if sum > 0.0 {
            for t in &mut self.totals {
                *t /= sum;
            }
        }
        self.totals
    }
}
