use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use super::{error_response, message, Json, Message, Path, Query};
use crate::{
    cache::{Key, Namespace, ResponseCache, Ttl},
    ml::{
        self, CostPrediction, CostPredictionRequest, DurationPrediction,
        DurationPredictionRequest, ModelKind, Models, RetrainOutcome, TrainingRequest,
        TrainingTask, TrainingTicket,
    },
    AppState, SystemTime, TimeSource,
};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/predict/duration", post(predict_duration))
        .route("/predict/cost", post(predict_cost))
        .route("/models/status", get(status))
        .route("/models/retrain-all", post(retrain_all))
        .route("/models/:name", delete(delete_model))
        .route("/models/:name/performance", get(performance))
        .route("/models/:name/train", post(train))
        .route("/models/:name/train/:task_id", get(training_status))
        .route("/models/:name/activate", post(activate))
}

async fn predict_duration(
    State(models): State<Models>,
    State(time): State<SystemTime>,
    Json(request): Json<DurationPredictionRequest>,
) -> Result<Json<DurationPrediction>> {
    let prediction = models.predict_duration(request, time.now()).await?;
    Ok(Json(prediction))
}

async fn predict_cost(
    State(models): State<Models>,
    Json(request): Json<CostPredictionRequest>,
) -> Result<Json<CostPrediction>> {
    let prediction = models.predict_cost(request).await?;
    Ok(Json(prediction))
}

async fn status(
    State(models): State<Models>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
) -> Result<Json<serde_json::Value>> {
    let key = Key::new(Namespace::Models, "status", &());

    let value = cache
        .fetch(key, Ttl::Short, time.now(), || async {
            Ok::<_, Error>(models.status().await?)
        })
        .await?;

    Ok(Json(value))
}

async fn performance(
    State(models): State<Models>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let kind = name.parse::<ModelKind>()?;
    let key = Key::new(Namespace::Models, "performance", &kind);

    let value = cache
        .fetch(key, Ttl::Medium, time.now(), || async {
            Ok::<_, Error>(models.performance(kind).await?)
        })
        .await?;

    Ok(Json(value))
}

async fn train(
    State(models): State<Models>,
    State(time): State<SystemTime>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<TrainingTicket>> {
    let kind = name.parse::<ModelKind>()?;

    // An empty body trains with the defaults
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TrainingRequest::default()
    } else {
        serde_json::from_slice(&body).context(TrainingRequestSnafu)?
    };

    let ticket = models.start_training(kind, &request, time)?;
    Ok(Json(ticket))
}

async fn training_status(
    State(models): State<Models>,
    Path((name, task_id)): Path<(String, Uuid)>,
) -> Result<Json<TrainingTask>> {
    let kind = name.parse::<ModelKind>()?;

    let task = models
        .training_status(task_id)
        .filter(|t| t.model_name == kind)
        .context(TaskNotFoundSnafu { task_id })?;

    Ok(Json(task))
}

#[derive(Debug, Default, Deserialize)]
struct RetrainQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct Retraining {
    message: &'static str,
    models: BTreeMap<ModelKind, RetrainOutcome>,
}

async fn retrain_all(
    State(models): State<Models>,
    State(time): State<SystemTime>,
    Query(query): Query<RetrainQuery>,
) -> Result<Json<Retraining>> {
    let outcomes = models.retrain_all(query.force, time).await?;

    Ok(Json(Retraining {
        message: "Retraining started in the background",
        models: outcomes,
    }))
}

async fn delete_model(
    State(models): State<Models>,
    Path(name): Path<String>,
) -> Result<Json<Message>> {
    let kind = name.parse::<ModelKind>()?;
    let removed = models.delete(kind).await?;
    info!(model = kind.name(), removed, "Deleted model");

    Ok(message(format!("Model {kind} deleted successfully")))
}

#[derive(Debug, Default, Deserialize)]
struct ActivateQuery {
    version: Option<String>,
}

async fn activate(
    State(models): State<Models>,
    Path(name): Path<String>,
    Query(query): Query<ActivateQuery>,
) -> Result<Json<Message>> {
    let kind = name.parse::<ModelKind>()?;
    let record = models.activate(kind, query.version).await?;
    info!(model = kind.name(), version = %record.version, "Activated model");

    Ok(message(format!(
        "Model {kind} version {} activated",
        record.version
    )))
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(transparent)]
    Model { source: ml::Error },

    #[snafu(display("Training task {task_id} was not found"))]
    TaskNotFound { task_id: Uuid },

    #[snafu(display("The training request is not valid JSON"))]
    TrainingRequest { source: serde_json::Error },

    #[snafu(context(false), display("Could not encode the response"))]
    Encode { source: serde_json::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    fn status(&self) -> StatusCode {
        use ml::Error as M;

        match self {
            Self::Model { source } => match source {
                M::UnknownModel { .. } | M::Invalid { .. } => StatusCode::BAD_REQUEST,
                M::NoActiveModel { .. } | M::NoModel { .. } | M::VersionNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                M::ModelUnavailable { .. } | M::Load { .. } => StatusCode::SERVICE_UNAVAILABLE,
                M::Training { .. }
                | M::TrainingPanicked { .. }
                | M::Save { .. }
                | M::Encode { .. }
                | M::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            Self::TrainingRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Encode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_response(self.status(), &self)
    }
}

#[cfg(test)]
mod test {
    use axum::{body::Body, http::Request};

    use super::*;
    use crate::api::test::{app, get, post_json, send, state};

    #[tokio::test]
    async fn unknown_models_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::delete("/api/v1/ml/models/demand_forecast")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Unknown model \"demand_forecast\""));
    }

    #[tokio::test]
    async fn invalid_predictions_are_rejected_before_loading_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let request = serde_json::json!({
            "vehicle_model": "Nissan Leaf",
            "battery_capacity_kwh": 40.0,
            "state_of_charge_start_percent": 80.0,
            "state_of_charge_target_percent": 20.0,
            "charger_type": "Level 2",
            "temperature_celsius": 10.0,
            "vehicle_age_years": 3.0,
        });

        let (status, body) = send(
            app(state(dir.path())),
            post_json("/api/v1/ml/predict/duration", request),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "The request is invalid");
        assert_eq!(
            body["causes"][0],
            "Target state of charge must be greater than starting state of charge"
        );
    }

    #[tokio::test]
    async fn unknown_training_tasks_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!(
            "/api/v1/ml/models/duration_prediction/train/{}",
            Uuid::new_v4()
        );

        let (status, _) = send(app(state(dir.path())), get(&uri)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn training_tasks_are_tracked_per_model() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let request = Request::post("/api/v1/ml/models/cost_optimization/train")
            .body(Body::empty())
            .unwrap();
        let (status, ticket) = send(app(state.clone()), request).await;
        assert_eq!(status, StatusCode::OK, "{ticket}");
        assert_eq!(ticket["status"], "started");
        assert_eq!(ticket["model_name"], "cost_optimization");

        let task_id = ticket["task_id"].as_str().unwrap();

        let uri = format!("/api/v1/ml/models/cost_optimization/train/{task_id}");
        let (status, task) = send(app(state.clone()), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(task["task_id"], task_id);

        let uri = format!("/api/v1/ml/models/duration_prediction/train/{task_id}");
        let (status, _) = send(app(state), get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn training_options_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let request = post_json(
            "/api/v1/ml/models/duration_prediction/train",
            serde_json::json!({ "validation_split": 0.9 }),
        );

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["causes"][0], "validation_split must be between 0.1 and 0.5");
    }

    #[tokio::test]
    async fn garbled_training_requests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/api/v1/ml/models/duration_prediction/train")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "The training request is not valid JSON");
    }
}
