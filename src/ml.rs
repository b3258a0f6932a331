use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{fs, task};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    categories::{self, ChargerType, TimeOfDay, UserType},
    db::{Db, DbError, MlModel, NewMlModel, NewPrediction, SessionFilter},
    TimeSource,
};

mod ensemble;
mod features;
mod metrics;
mod model;
mod training;
mod tree;

use ensemble::{Algorithm, Hyperparameters};
use features::{CostFeatures, DurationFeatures, FeatureRow};
use model::{LoadedModel, ModelFileError, ModelStore, TrainedModel};
use training::{TrainingError, TrainingOptions, TrainingState, TrainingSummary, TrainingTasks};

pub(crate) use training::TrainingTask;

/// The confidence reported when a model has no usable test score.
const DEFAULT_PERFORMANCE_SCORE: f64 = 0.0;

/// A rough guess shown to clients that start a training run.
const ESTIMATED_TRAINING_MINUTES: i64 = 5;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ModelKind {
    DurationPrediction,
    CostOptimization,
}

impl ModelKind {
    pub const ALL: [Self; 2] = [Self::DurationPrediction, Self::CostOptimization];

    pub fn name(self) -> &'static str {
        match self {
            Self::DurationPrediction => "duration_prediction",
            Self::CostOptimization => "cost_optimization",
        }
    }

    fn algorithm(self) -> Algorithm {
        match self {
            Self::DurationPrediction => Algorithm::GradientBoosting,
            Self::CostOptimization => Algorithm::RandomForest,
        }
    }

    fn model_type(self) -> &'static str {
        match self.algorithm() {
            Algorithm::GradientBoosting => "gradient_boosting",
            Algorithm::RandomForest => "random_forest",
        }
    }

    fn prediction_type(self) -> &'static str {
        match self {
            Self::DurationPrediction => "duration",
            Self::CostOptimization => "cost",
        }
    }

    fn default_hyperparameters(self) -> Hyperparameters {
        match self {
            Self::DurationPrediction => Hyperparameters {
                n_estimators: 100,
                max_depth: 6,
                learning_rate: 0.1,
                random_state: 42,
            },
            Self::CostOptimization => Hyperparameters {
                n_estimators: 100,
                max_depth: 10,
                learning_rate: 0.1,
                random_state: 42,
            },
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .context(UnknownModelSnafu { name: s })
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum InvalidRequest {
    #[snafu(display("{field} must be a finite number"))]
    NotFinite { field: &'static str },

    #[snafu(display("{field} must be greater than 0"))]
    NotPositive { field: &'static str },

    #[snafu(display("{field} must be at least 0"))]
    Negative { field: &'static str },

    #[snafu(display("{field} must be between 0 and 100"))]
    Percent { field: &'static str },

    #[snafu(display("Target state of charge must be greater than starting state of charge"))]
    TargetNotAboveStart,

    #[snafu(display("{day:?} is not a day of the week"))]
    UnknownDay { day: String },

    #[snafu(display("validation_split must be between 0.1 and 0.5"))]
    ValidationSplit,

    #[snafu(display("{field} must be between {min} and {max}"))]
    Hyperparameter {
        field: &'static str,
        min: f64,
        max: f64,
    },
}

fn finite(field: &'static str, v: f64) -> Result<f64, InvalidRequest> {
    ensure!(v.is_finite(), NotFiniteSnafu { field });
    Ok(v)
}

fn positive(field: &'static str, v: f64) -> Result<f64, InvalidRequest> {
    ensure!(finite(field, v)? > 0.0, NotPositiveSnafu { field });
    Ok(v)
}

fn percent(field: &'static str, v: f64) -> Result<f64, InvalidRequest> {
    ensure!((0.0..=100.0).contains(&finite(field, v)?), PercentSnafu { field });
    Ok(v)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DurationPredictionRequest {
    pub vehicle_model: String,
    pub battery_capacity_kwh: f64,
    pub state_of_charge_start_percent: f64,
    pub state_of_charge_target_percent: f64,
    pub charger_type: ChargerType,
    pub temperature_celsius: f64,
    pub vehicle_age_years: f64,
    #[serde(default)]
    pub charging_start_time: Option<DateTime<Utc>>,
}

impl DurationPredictionRequest {
    fn validate(&self) -> Result<(), InvalidRequest> {
        positive("battery_capacity_kwh", self.battery_capacity_kwh)?;
        let start = percent("state_of_charge_start_percent", self.state_of_charge_start_percent)?;
        let target = percent("state_of_charge_target_percent", self.state_of_charge_target_percent)?;
        ensure!(target > start, TargetNotAboveStartSnafu);
        finite("temperature_celsius", self.temperature_celsius)?;
        let age = finite("vehicle_age_years", self.vehicle_age_years)?;
        ensure!(age >= 0.0, NegativeSnafu { field: "vehicle_age_years" });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct DurationPrediction {
    pub predicted_duration_hours: f64,
    pub confidence_score: f64,
    pub estimated_energy_kwh: f64,
    pub factors_analysis: BTreeMap<String, f64>,
    pub model_version: String,
}

fn default_temperature() -> f64 {
    20.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CostPredictionRequest {
    pub location: String,
    pub charger_type: ChargerType,
    pub energy_needed_kwh: f64,
    pub time_of_day: TimeOfDay,
    pub day_of_week: String,
    pub user_type: UserType,
    #[serde(default)]
    pub duration_hours: Option<f64>,
    #[serde(default = "default_temperature")]
    pub temperature_celsius: f64,
}

impl CostPredictionRequest {
    const DEFAULT_DURATION_HOURS: f64 = 1.0;

    fn validate(&self) -> Result<chrono::Weekday, InvalidRequest> {
        positive("energy_needed_kwh", self.energy_needed_kwh)?;
        if let Some(hours) = self.duration_hours {
            positive("duration_hours", hours)?;
        }
        finite("temperature_celsius", self.temperature_celsius)?;
        categories::weekday_from_name(&self.day_of_week).context(UnknownDaySnafu {
            day: &self.day_of_week,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CostPrediction {
    pub predicted_cost_usd: f64,
    pub cost_per_kwh: f64,
    pub confidence_score: f64,
    pub cost_breakdown: BTreeMap<String, f64>,
    pub optimization_suggestions: Vec<String>,
    pub model_version: String,
}

fn cost_suggestions(request: &CostPredictionRequest) -> Vec<String> {
    let mut suggestions = vec![];

    if matches!(request.time_of_day, TimeOfDay::Evening | TimeOfDay::Afternoon) {
        suggestions.push(
            "Consider charging during off-peak hours (late night/early morning) for lower rates"
                .to_owned(),
        );
    }

    if request.charger_type == ChargerType::DcFast {
        suggestions.push(
            "DC fast charging is convenient but more expensive. Use Level 2 charging when time permits"
                .to_owned(),
        );
    }

    suggestions
        .push("Compare prices at nearby charging stations before starting your session".to_owned());

    if request.user_type == UserType::Commuter {
        suggestions.push(
            "Consider workplace charging or home charging for daily commuting needs".to_owned(),
        );
    }

    suggestions
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Health {
    Healthy,
    Degraded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ModelStatus {
    pub model_name: String,
    pub model_type: String,
    pub version: String,
    pub is_active: bool,
    pub training_date: DateTime<Utc>,
    pub performance_score: Option<f64>,
    pub training_data_size: Option<i32>,
    pub status: Health,
}

fn parse_metrics(record: &MlModel) -> Option<serde_json::Result<BTreeMap<String, f64>>> {
    record.performance_metrics.as_deref().map(serde_json::from_str)
}

fn health(record: &MlModel, file_exists: bool, threshold: f64) -> (Health, Option<f64>) {
    if !file_exists {
        return (Health::Failed, None);
    }

    match parse_metrics(record) {
        None => (Health::Healthy, None),
        Some(Err(_)) => (Health::Unknown, None),
        Some(Ok(metrics)) => {
            let test_r2 = metrics
                .get("test_r2")
                .copied()
                .unwrap_or(DEFAULT_PERFORMANCE_SCORE);
            let health = if test_r2 < threshold {
                Health::Degraded
            } else {
                Health::Healthy
            };
            (health, Some(test_r2))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TrainingRecord {
    pub version: String,
    pub training_date: DateTime<Utc>,
    pub training_data_size: Option<i32>,
    pub is_active: bool,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ModelPerformance {
    pub model_name: String,
    pub version: String,
    pub metrics: BTreeMap<String, f64>,
    pub validation_score: f64,
    pub test_score: Option<f64>,
    pub feature_importance: BTreeMap<String, f64>,
    pub training_history: Vec<TrainingRecord>,
    pub last_evaluation_date: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct HyperparameterOverrides {
    pub n_estimators: Option<usize>,
    pub max_depth: Option<usize>,
    pub learning_rate: Option<f64>,
    pub random_state: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct TrainingRequest {
    pub data_start_date: Option<DateTime<Utc>>,
    pub data_end_date: Option<DateTime<Utc>>,
    pub hyperparameters: Option<HyperparameterOverrides>,
    pub validation_split: Option<f64>,
}

impl TrainingRequest {
    fn options(&self, kind: ModelKind) -> Result<TrainingOptions, InvalidRequest> {
        let mut options = TrainingOptions::for_kind(kind);

        if let Some(split) = self.validation_split {
            ensure!((0.1..=0.5).contains(&split), ValidationSplitSnafu);
            options.test_fraction = split;
        }

        let Some(overrides) = self.hyperparameters else {
            return Ok(options);
        };
        let params = &mut options.hyperparameters;

        let in_range = |field, v: f64, min: f64, max: f64| -> Result<(), InvalidRequest> {
            ensure!((min..=max).contains(&v), HyperparameterSnafu { field, min, max });
            Ok(())
        };

        if let Some(n) = overrides.n_estimators {
            in_range("n_estimators", n as f64, 1.0, 1000.0)?;
            params.n_estimators = n;
        }
        if let Some(depth) = overrides.max_depth {
            in_range("max_depth", depth as f64, 1.0, 32.0)?;
            params.max_depth = depth;
        }
        if let Some(rate) = overrides.learning_rate {
            in_range("learning_rate", rate, f64::MIN_POSITIVE, 1.0)?;
            params.learning_rate = rate;
        }
        if let Some(seed) = overrides.random_state {
            params.random_state = seed;
        }

        Ok(options)
    }

    fn filter(&self) -> SessionFilter {
        SessionFilter {
            start: self.data_start_date,
            end: self.data_end_date,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TrainingTicket {
    pub task_id: Uuid,
    pub model_name: ModelKind,
    pub status: &'static str,
    pub message: String,
    pub estimated_completion_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum RetrainOutcome {
    Skipped { last_trained: DateTime<Utc> },
    Started { task_id: Uuid },
}

#[derive(Debug, Clone)]
pub(crate) struct ModelSettings {
    pub model_path: PathBuf,
    pub performance_threshold: f64,
    pub retrain_interval: Duration,
}

/// Training, loading and serving the prediction models.
#[derive(Debug, Clone)]
pub(crate) struct Models {
    db: Db,
    store: ModelStore,
    tasks: TrainingTasks,
    settings: Arc<ModelSettings>,
}

impl Models {
    pub fn new(db: Db, settings: ModelSettings) -> Self {
        Self {
            db,
            store: Default::default(),
            tasks: Default::default(),
            settings: Arc::new(settings),
        }
    }

    async fn loaded(&self, kind: ModelKind) -> Result<LoadedModel> {
        if let Some(loaded) = self.store.get(kind) {
            return Ok(loaded);
        }

        let record = self
            .db
            .active_model(kind.name())
            .await
            .context(DatabaseSnafu)?
            .context(ModelUnavailableSnafu { kind })?;

        let model = TrainedModel::load(Path::new(&record.file_path))
            .await
            .context(LoadSnafu { kind })?;

        let loaded = LoadedModel {
            id: record.id,
            model: Arc::new(model),
        };
        self.store.insert(kind, loaded.clone());
        info!(model = kind.name(), version = %record.version, "Loaded model");

        Ok(loaded)
    }

    async fn record(
        &self,
        loaded: &LoadedModel,
        input: &impl Serialize,
        output: &impl Serialize,
        confidence: f64,
    ) -> Result<()> {
        let prediction = NewPrediction {
            model_id: loaded.id,
            prediction_type: loaded.model.kind.prediction_type().to_owned(),
            input_features: serde_json::to_string(input).context(EncodeSnafu)?,
            prediction_result: serde_json::to_string(output).context(EncodeSnafu)?,
            confidence_score: Some(confidence),
        };
        self.db
            .record_prediction(prediction)
            .await
            .context(DatabaseSnafu)
    }

    pub async fn predict_duration(
        &self,
        request: DurationPredictionRequest,
        now: DateTime<Utc>,
    ) -> Result<DurationPrediction> {
        request.validate().context(InvalidSnafu)?;
        let loaded = self.loaded(ModelKind::DurationPrediction).await?;
        let model = &loaded.model;

        let start = request.charging_start_time.unwrap_or(now);
        let features = DurationFeatures {
            vehicle_model: &request.vehicle_model,
            battery_capacity_kwh: request.battery_capacity_kwh,
            state_of_charge_start_percent: request.state_of_charge_start_percent,
            state_of_charge_end_percent: request.state_of_charge_target_percent,
            charger_type: request.charger_type.as_str(),
            temperature_celsius: request.temperature_celsius,
            vehicle_age_years: request.vehicle_age_years,
            time_of_day: TimeOfDay::of(start).as_str(),
            hour: Some(start.hour()),
            day_of_week_num: Some(start.weekday().num_days_from_monday()),
        };

        let prediction = DurationPrediction {
            predicted_duration_hours: model.predict(&features.raw()).max(0.0),
            confidence_score: model.confidence(),
            estimated_energy_kwh: features.energy_needed_kwh(),
            factors_analysis: model.feature_importance.clone(),
            model_version: model.version.clone(),
        };

        self.record(&loaded, &request, &prediction, prediction.confidence_score)
            .await?;

        Ok(prediction)
    }

    pub async fn predict_cost(&self, request: CostPredictionRequest) -> Result<CostPrediction> {
        let day = request.validate().context(InvalidSnafu)?;
        let loaded = self.loaded(ModelKind::CostOptimization).await?;
        let model = &loaded.model;

        let features = CostFeatures {
            location: &request.location,
            charger_type: request.charger_type.as_str(),
            time_of_day: request.time_of_day.as_str(),
            day_of_week: categories::weekday_name(day),
            user_type: request.user_type.as_str(),
            energy_consumed_kwh: Some(request.energy_needed_kwh),
            charging_duration_hours: request
                .duration_hours
                .unwrap_or(CostPredictionRequest::DEFAULT_DURATION_HOURS),
            temperature_celsius: request.temperature_celsius,
            hour: Some(request.time_of_day.typical_hour()),
            is_weekend: Some(categories::is_weekend(day)),
        };

        let predicted_cost_usd = model.predict(&features.raw()).max(0.0);
        let prediction = CostPrediction {
            predicted_cost_usd,
            cost_per_kwh: predicted_cost_usd / request.energy_needed_kwh,
            confidence_score: model.confidence(),
            cost_breakdown: model.feature_importance.clone(),
            optimization_suggestions: cost_suggestions(&request),
            model_version: model.version.clone(),
        };

        self.record(&loaded, &request, &prediction, prediction.confidence_score)
            .await?;

        Ok(prediction)
    }

    pub async fn status(&self) -> Result<Vec<ModelStatus>> {
        let records = self.db.list_models().await.context(DatabaseSnafu)?;

        let mut statuses = Vec::with_capacity(records.len());
        for record in records {
            let file_exists = fs::try_exists(&record.file_path).await.unwrap_or(false);
            let (status, performance_score) =
                health(&record, file_exists, self.settings.performance_threshold);

            statuses.push(ModelStatus {
                model_name: record.model_name,
                model_type: record.model_type,
                version: record.version,
                is_active: record.is_active,
                training_date: record.training_date,
                performance_score,
                training_data_size: record.training_data_size,
                status,
            });
        }

        Ok(statuses)
    }

    pub async fn performance(&self, kind: ModelKind) -> Result<ModelPerformance> {
        let record = self
            .db
            .active_model(kind.name())
            .await
            .context(DatabaseSnafu)?
            .context(NoActiveModelSnafu { kind })?;

        let history = self
            .db
            .model_history(kind.name())
            .await
            .context(DatabaseSnafu)?;

        let feature_importance = match self.loaded(kind).await {
            Ok(loaded) => loaded.model.feature_importance.clone(),
            Err(e) => {
                warn!(model = kind.name(), "Feature importance is unavailable: {e}");
                BTreeMap::new()
            }
        };

        let metrics = parse_metrics(&record)
            .and_then(|m| m.ok())
            .unwrap_or_default();

        let training_history = history
            .into_iter()
            .map(|r| TrainingRecord {
                metrics: parse_metrics(&r).and_then(|m| m.ok()).unwrap_or_default(),
                version: r.version,
                training_date: r.training_date,
                training_data_size: r.training_data_size,
                is_active: r.is_active,
            })
            .collect();

        Ok(ModelPerformance {
            model_name: record.model_name,
            version: record.version,
            validation_score: metrics.get("cv_r2_mean").copied().unwrap_or(0.0),
            test_score: metrics.get("test_r2").copied(),
            metrics,
            feature_importance,
            training_history,
            last_evaluation_date: record.training_date,
        })
    }

    pub fn start_training<T>(
        &self,
        kind: ModelKind,
        request: &TrainingRequest,
        time: T,
    ) -> Result<TrainingTicket>
    where
        T: TimeSource + Send + Sync + 'static,
    {
        let options = request.options(kind).context(InvalidSnafu)?;
        let filter = request.filter();
        let now = time.now();
        let task_id = self.tasks.create(kind, now);

        info!(model = kind.name(), %task_id, "Starting training");
        task::spawn(self.clone().run_training(task_id, kind, filter, options, time));

        Ok(TrainingTicket {
            task_id,
            model_name: kind,
            status: "started",
            message: format!("Training started for {kind}"),
            estimated_completion_time: now + Duration::minutes(ESTIMATED_TRAINING_MINUTES),
        })
    }

    pub fn training_status(&self, task_id: Uuid) -> Option<TrainingTask> {
        self.tasks.get(task_id)
    }

    async fn run_training(
        self,
        task_id: Uuid,
        kind: ModelKind,
        filter: SessionFilter,
        options: TrainingOptions,
        time: impl TimeSource,
    ) {
        let state = match self.train_and_save(task_id, kind, filter, options, &time).await {
            Ok(result) => TrainingState::Completed {
                progress: 100,
                result,
            },
            Err(e) => {
                let error = crate::error_messages(&e).join(": ");
                warn!(model = kind.name(), %task_id, "Training failed: {error}");
                TrainingState::Failed { error }
            }
        };

        self.tasks.update(task_id, state, time.now());
    }

    async fn train_and_save(
        &self,
        task_id: Uuid,
        kind: ModelKind,
        filter: SessionFilter,
        options: TrainingOptions,
        time: &impl TimeSource,
    ) -> Result<TrainingSummary> {
        let progress = |progress, status| {
            let state = TrainingState::InProgress { progress, status };
            self.tasks.update(task_id, state, time.now());
        };

        progress(10, "Loading data...");
        let sessions = self.db.sessions(filter).await.context(DatabaseSnafu)?;

        progress(30, "Preparing model...");
        let trained_at = time.now();

        progress(50, "Training model...");
        let model = task::spawn_blocking(move || training::train(kind, &sessions, &options, trained_at))
            .await
            .context(TrainingPanickedSnafu)?
            .context(TrainingSnafu)?;

        progress(80, "Saving model...");
        let path = TrainedModel::file_path(&self.settings.model_path, kind, &model.version);
        model.save(&path).await.context(SaveSnafu)?;

        let metrics = serde_json::to_string(&model.metrics).context(EncodeSnafu)?;
        let file_path = path.to_string_lossy().into_owned();
        let record = self
            .db
            .save_model(NewMlModel {
                model_name: kind.name().to_owned(),
                model_type: kind.model_type().to_owned(),
                version: model.version.clone(),
                file_path: file_path.clone(),
                training_data_size: i32::try_from(model.training_data_size).ok(),
                training_date: model.trained_at,
                performance_metrics: Some(metrics),
                is_active: true,
            })
            .await
            .context(DatabaseSnafu)?;

        self.store.insert(
            kind,
            LoadedModel {
                id: record.id,
                model: Arc::new(model.clone()),
            },
        );

        Ok(TrainingSummary {
            model_name: kind,
            version: model.version,
            metrics: model.metrics,
            training_data_size: model.training_data_size,
            model_file: file_path,
        })
    }

    /// Starts training for every model that has not been trained within
    /// the retrain interval, or for all of them when `force` is set.
    pub async fn retrain_all<T>(&self, force: bool, time: T) -> Result<BTreeMap<ModelKind, RetrainOutcome>>
    where
        T: TimeSource + Clone + Send + Sync + 'static,
    {
        let now = time.now();
        let mut outcomes = BTreeMap::new();

        for kind in ModelKind::ALL {
            if !force {
                let history = self
                    .db
                    .model_history(kind.name())
                    .await
                    .context(DatabaseSnafu)?;
                let last_trained = history.iter().map(|r| r.training_date).max();

                if let Some(last_trained) = last_trained {
                    if now - last_trained < self.settings.retrain_interval {
                        info!(model = kind.name(), "Skipping retraining, the model is recent");
                        outcomes.insert(kind, RetrainOutcome::Skipped { last_trained });
                        continue;
                    }
                }
            }

            let ticket = self.start_training(kind, &TrainingRequest::default(), time.clone())?;
            outcomes.insert(
                kind,
                RetrainOutcome::Started {
                    task_id: ticket.task_id,
                },
            );
        }

        Ok(outcomes)
    }

    /// Deletes every version of the model, along with its files.
    pub async fn delete(&self, kind: ModelKind) -> Result<usize> {
        let deleted = self
            .db
            .delete_models(kind.name())
            .await
            .context(DatabaseSnafu)?;
        self.store.evict(kind);

        ensure!(!deleted.is_empty(), NoModelSnafu { kind });

        for record in &deleted {
            if let Err(e) = fs::remove_file(&record.file_path).await {
                warn!(file = %record.file_path, "Could not remove the model file: {e}");
            }
        }

        Ok(deleted.len())
    }

    /// Makes `version`, or the most recently trained version, the active one.
    pub async fn activate(&self, kind: ModelKind, version: Option<String>) -> Result<MlModel> {
        let activated = self
            .db
            .activate_model(kind.name(), version.clone())
            .await
            .context(DatabaseSnafu)?;
        self.store.evict(kind);

        match (activated, version) {
            (Some(record), _) => Ok(record),
            (None, Some(version)) => VersionNotFoundSnafu { kind, version }.fail(),
            (None, None) => NoModelSnafu { kind }.fail(),
        }
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum Error {
    #[snafu(display("Unknown model {name:?}; expected duration_prediction or cost_optimization"))]
    UnknownModel { name: String },

    #[snafu(display("The request is invalid"))]
    Invalid { source: InvalidRequest },

    #[snafu(display("The {kind} model is not available; train it first"))]
    ModelUnavailable { kind: ModelKind },

    #[snafu(display("The {kind} model could not be loaded"))]
    Load {
        source: ModelFileError,
        kind: ModelKind,
    },

    #[snafu(display("There is no active {kind} model"))]
    NoActiveModel { kind: ModelKind },

    #[snafu(display("There is no {kind} model"))]
    NoModel { kind: ModelKind },

    #[snafu(display("There is no {kind} model with version {version}"))]
    VersionNotFound { kind: ModelKind, version: String },

    #[snafu(display("Training could not complete"))]
    Training { source: TrainingError },

    #[snafu(display("The training task panicked"))]
    TrainingPanicked { source: task::JoinError },

    #[snafu(display("The trained model could not be saved"))]
    Save { source: ModelFileError },

    #[snafu(display("Could not encode the prediction"))]
    Encode { source: serde_json::Error },

    #[snafu(display("A database operation failed"))]
    Database { source: DbError },
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
