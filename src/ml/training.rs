use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use snafu::prelude::*;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ensemble::{Ensemble, Hyperparameters},
    features::{CostFeatures, DurationFeatures, FeatureRow, Preprocessor, Raw},
    metrics::{self, Metrics},
    model::TrainedModel,
    ModelKind,
};
use crate::{db::ChargingSession, stats};

pub(crate) const MIN_TRAINING_ROWS: usize = 10;
pub(crate) const DEFAULT_TEST_FRACTION: f64 = 0.2;
const CV_FOLDS: usize = 5;
const OUTLIER_Z_SCORE: f64 = 3.0;

/// How long finished tasks stay queryable.
const TASK_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct TrainingOptions {
    pub test_fraction: f64,
    pub hyperparameters: Hyperparameters,
}

impl TrainingOptions {
    pub fn for_kind(kind: ModelKind) -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            hyperparameters: kind.default_hyperparameters(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub(crate) enum TrainingError {
    #[snafu(display(
        "At least {MIN_TRAINING_ROWS} usable sessions are needed to train, but only {rows} are available"
    ))]
    NotEnoughData { rows: usize },
}

type TrainingResult<T, E = TrainingError> = std::result::Result<T, E>;

struct Dataset<'a> {
    raw: Vec<Vec<Raw>>,
    targets: Vec<f64>,
    schema: &'a [(&'a str, super::features::FeatureKind)],
}

fn duration_dataset(sessions: &[ChargingSession]) -> Dataset<'static> {
    let raw = sessions
        .iter()
        .map(|s| DurationFeatures::from_session(s).raw())
        .collect();
    let targets = sessions.iter().map(|s| s.charging_duration_hours).collect();

    Dataset {
        raw,
        targets,
        schema: DurationFeatures::SCHEMA,
    }
}

fn cost_dataset(sessions: &[ChargingSession]) -> Dataset<'static> {
    let costs: Vec<_> = sessions.iter().map(|s| s.charging_cost_usd.0).collect();

    let kept: Vec<_> = match (stats::mean(&costs), stats::std_dev(&costs, 1)) {
        (Some(mean), Some(sd)) if sd > 0.0 => sessions
            .iter()
            .filter(|s| ((s.charging_cost_usd.0 - mean) / sd).abs() < OUTLIER_Z_SCORE)
            .collect(),
        _ => sessions.iter().collect(),
    };

    let dropped = sessions.len() - kept.len();
    if dropped > 0 {
        debug!(dropped, "Removed cost outliers before training");
    }

    Dataset {
        raw: kept
            .iter()
            .map(|s| CostFeatures::from_session(s).raw())
            .collect(),
        targets: kept.iter().map(|s| s.charging_cost_usd.0).collect(),
        schema: CostFeatures::SCHEMA,
    }
}

/// Splits `0..n` into shuffled train and test indices.
fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<_> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    let n_test = n_test.max(1).min(n.saturating_sub(1));
    let train = order.split_off(n_test);
    (train, order)
}

fn select<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

pub(crate) fn version_at(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Fits a model of `kind` on `sessions`. This is CPU bound and should not
/// run on the async executor.
pub(crate) fn train(
    kind: ModelKind,
    sessions: &[ChargingSession],
    options: &TrainingOptions,
    trained_at: DateTime<Utc>,
) -> TrainingResult<TrainedModel> {
    let dataset = match kind {
        ModelKind::DurationPrediction => duration_dataset(sessions),
        ModelKind::CostOptimization => cost_dataset(sessions),
    };

    let rows = dataset.targets.len();
    ensure!(
        rows >= MIN_TRAINING_ROWS,
        training_error::NotEnoughDataSnafu { rows }
    );

    let params = &options.hyperparameters;
    let algorithm = kind.algorithm();
    let (preprocessor, x) = Preprocessor::fit(dataset.schema, &dataset.raw);
    let y = dataset.targets;

    let (train_idx, test_idx) = train_test_split(rows, options.test_fraction, params.random_state);
    let (x_train, y_train) = (select(&x, &train_idx), select(&y, &train_idx));
    let (x_test, y_test) = (select(&x, &test_idx), select(&y, &test_idx));

    let (ensemble, importance) = Ensemble::fit(algorithm, &x_train, &y_train, params);
    let predict_all = |model: &Ensemble, x: &[Vec<f64>]| -> Vec<f64> {
        x.iter().map(|row| model.predict(row)).collect()
    };
    let train_pred = predict_all(&ensemble, &x_train);
    let test_pred = predict_all(&ensemble, &x_test);

    let cv_scores: Vec<_> = metrics::folds(rows, CV_FOLDS)
        .into_iter()
        .map(|fold| {
            let outside: Vec<_> = (0..rows).filter(|i| !fold.contains(i)).collect();
            let (model, _) = Ensemble::fit(algorithm, &select(&x, &outside), &select(&y, &outside), params);
            metrics::r2(&y[fold.clone()], &predict_all(&model, &x[fold]))
        })
        .collect();

    let metrics = Metrics {
        train_r2: metrics::r2(&y_train, &train_pred),
        test_r2: metrics::r2(&y_test, &test_pred),
        train_rmse: metrics::rmse(&y_train, &train_pred),
        test_rmse: metrics::rmse(&y_test, &test_pred),
        train_mae: metrics::mae(&y_train, &train_pred),
        test_mae: metrics::mae(&y_test, &test_pred),
        cv_r2_mean: stats::mean(&cv_scores).unwrap_or(0.0),
        cv_r2_std: stats::std_dev(&cv_scores, 0).unwrap_or(0.0),
    };

    let feature_importance = preprocessor
        .feature_names()
        .map(str::to_owned)
        .zip(importance)
        .collect();

    info!(
        model = kind.name(),
        rows,
        test_r2 = metrics.test_r2,
        "Finished training"
    );

    Ok(TrainedModel {
        kind,
        version: version_at(trained_at),
        trained_at,
        training_data_size: rows,
        hyperparameters: *params,
        metrics,
        feature_importance,
        preprocessor,
        ensemble,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TrainingSummary {
    pub model_name: ModelKind,
    pub version: String,
    pub metrics: Metrics,
    pub training_data_size: usize,
    pub model_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub(crate) enum TrainingState {
    Pending,
    InProgress { progress: u8, status: &'static str },
    Completed { progress: u8, result: TrainingSummary },
    Failed { error: String },
}

impl TrainingState {
    fn is_finished(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TrainingTask {
    pub task_id: Uuid,
    pub model_name: ModelKind,
    #[serde(flatten)]
    pub state: TrainingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Background training jobs, by task id.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrainingTasks(Arc<Mutex<BTreeMap<Uuid, TrainingTask>>>);

impl TrainingTasks {
    pub fn create(&self, kind: ModelKind, now: DateTime<Utc>) -> Uuid {
        let task_id = Uuid::new_v4();
        let task = TrainingTask {
            task_id,
            model_name: kind,
            state: TrainingState::Pending,
            created_at: now,
            updated_at: now,
        };

        let cutoff = now - Duration::hours(TASK_RETENTION_HOURS);
        let mut tasks = self.0.lock();
        tasks.retain(|_, t| !(t.state.is_finished() && t.updated_at < cutoff));
        tasks.insert(task_id, task);

        task_id
    }

    pub fn update(&self, task_id: Uuid, state: TrainingState, now: DateTime<Utc>) {
        if let Some(task) = self.0.lock().get_mut(&task_id) {
            task.state = state;
            task.updated_at = now;
        }
    }

    pub fn get(&self, task_id: Uuid) -> Option<TrainingTask> {
        self.0.lock().get(&task_id).cloned()
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        db::{KilowattHours, Usd},
        quality::test::session,
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
    }

    /// Sessions whose duration is energy needed over a fixed 10 kW and
    /// whose cost is $0.25 per kWh.
    fn sessions(n: i64) -> Vec<ChargingSession> {
        (0..n)
            .map(|i| {
                let mut s = session(i, start() + Duration::hours(i * 5));
                let soc_end = 30.0 + (i % 7) as f64 * 10.0;
                let energy = 75.0 * (soc_end - 20.0) / 100.0;
                s.state_of_charge_end_percent = soc_end;
                s.energy_consumed_kwh = Some(KilowattHours(energy));
                s.charging_duration_hours = energy / 10.0;
                s.charging_cost_usd = Usd(energy * 0.25);
                s
            })
            .collect()
    }

    fn quick(kind: ModelKind) -> TrainingOptions {
        let mut options = TrainingOptions::for_kind(kind);
        options.hyperparameters.n_estimators = 20;
        options
    }

    #[test]
    fn too_few_rows_are_rejected() {
        let err = train(
            ModelKind::DurationPrediction,
            &sessions(9),
            &quick(ModelKind::DurationPrediction),
            start(),
        )
        .unwrap_err();

        assert!(matches!(err, TrainingError::NotEnoughData { rows: 9 }));
    }

    #[test]
    fn duration_models_learn_the_relationship() {
        let data = sessions(60);
        let model = train(
            ModelKind::DurationPrediction,
            &data,
            &quick(ModelKind::DurationPrediction),
            start(),
        )
        .unwrap();

        assert_eq!(model.version, "20240301_060000");
        assert_eq!(model.training_data_size, 60);
        assert!(model.metrics.train_r2 > 0.9, "{:?}", model.metrics);

        let total: f64 = model.feature_importance.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(model.feature_importance.len(), DurationFeatures::SCHEMA.len());

        let raw = DurationFeatures::from_session(&data[3]).raw();
        let error = (model.predict(&raw) - data[3].charging_duration_hours).abs();
        assert!(error < 0.5, "error was {error}");
    }

    #[test]
    fn cost_models_drop_outliers() {
        let mut data = sessions(60);
        data[0].charging_cost_usd = Usd(10_000.0);

        let model = train(
            ModelKind::CostOptimization,
            &data,
            &quick(ModelKind::CostOptimization),
            start(),
        )
        .unwrap();

        assert_eq!(model.training_data_size, 59);
    }

    #[test]
    fn constant_costs_keep_every_row() {
        let mut data = sessions(12);
        for s in &mut data {
            s.charging_cost_usd = Usd(5.0);
        }

        let model = train(
            ModelKind::CostOptimization,
            &data,
            &quick(ModelKind::CostOptimization),
            start(),
        )
        .unwrap();

        assert_eq!(model.training_data_size, 12);
        assert_eq!(model.metrics.test_r2, 1.0);
    }

    #[test]
    fn splits_are_seeded() {
        let (train_a, test_a) = train_test_split(50, 0.2, 42);
        let (train_b, test_b) = train_test_split(50, 0.2, 42);

        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 10);

        let mut all: Vec<_> = train_a.into_iter().chain(test_a).collect();
        all.sort();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn tasks_move_through_states() {
        let tasks = TrainingTasks::default();
        let id = tasks.create(ModelKind::CostOptimization, start());

        assert_eq!(tasks.get(id).map(|t| t.state), Some(TrainingState::Pending));

        let status = "Training model...";
        tasks.update(id, TrainingState::InProgress { progress: 50, status }, start());
        assert_eq!(
            tasks.get(id).map(|t| t.state),
            Some(TrainingState::InProgress { progress: 50, status })
        );

        assert!(tasks.get(Uuid::nil()).is_none());
    }

    #[test]
    fn old_finished_tasks_are_forgotten() {
        let tasks = TrainingTasks::default();
        let old = tasks.create(ModelKind::CostOptimization, start());
        let running = tasks.create(ModelKind::DurationPrediction, start());
        tasks.update(old, TrainingState::Failed { error: "boom".into() }, start());

        tasks.create(ModelKind::CostOptimization, start() + Duration::days(2));

        assert!(tasks.get(old).is_none());
        assert!(tasks.get(running).is_some());
    }
}
