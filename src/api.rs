use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use snafu::prelude::*;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
    ServiceBuilderExt as _,
};
use tracing::{info_span, warn};

use crate::{db::Db, ingest, AppState, Config};

mod analytics;
mod data;
#[cfg(feature = "fake-data")]
mod fake;
mod ml;

pub(crate) use data::store_csv;

const X_REQUEST_ID_NAME: &str = "x-request-id";
const API_PREFIX: &str = "/api/v1";

pub(crate) fn router(config: &Config) -> Router<AppState> {
    let v1 = Router::new()
        .nest("/data", data::router(config))
        .nest("/analytics", analytics::router())
        .nest("/ml", ml::router())
        .merge(data::entity_router());

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(MethodUriAndRequest)
                .on_response(DefaultOnResponse::new()),
        )
        .propagate_x_request_id()
        .layer(cors(&config.cors_origins))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest(API_PREFIX, v1)
        .layer(middleware)
}

/// Browsers may call from the configured origins, or from anywhere when
/// none are configured.
fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring unusable CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[derive(Debug, Copy, Clone)]
struct MethodUriAndRequest;

impl<B> MakeSpan<B> for MethodUriAndRequest {
    fn make_span(&mut self, request: &hyper::Request<B>) -> tracing::Span {
        let span = info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = tracing::field::Empty,
        );

        if let Some(id) = request.headers().get(X_REQUEST_ID_NAME) {
            if let Ok(id) = id.to_str() {
                span.record("request_id", id);
            }
        }

        span
    }
}

#[derive(Debug, Serialize)]
struct Index {
    message: &'static str,
    version: &'static str,
    api: &'static str,
}

async fn index() -> Json<Index> {
    Json(Index {
        message: "EV Charging Analytics API",
        version: env!("CARGO_PKG_VERSION"),
        api: API_PREFIX,
    })
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health(State(db): State<Db>) -> (StatusCode, Json<Health>) {
    match db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Health {
                status: "healthy",
                database: "connected",
                error: None,
            }),
        ),
        Err(e) => {
            let error = crate::error_messages(&e).join(": ");
            warn!("Health check failed: {error}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Health {
                    status: "unhealthy",
                    database: "disconnected",
                    error: Some(error),
                }),
            )
        }
    }
}

/// `axum::Json`, with rejections reported like every other error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(Rejection))]
pub(crate) struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Rejection))]
pub(crate) struct Query<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Rejection))]
pub(crate) struct Path<T>(pub T);

#[derive(Debug, Snafu)]
pub(crate) enum Rejection {
    #[snafu(context(false), display("The request body is not usable"))]
    Body { source: JsonRejection },

    #[snafu(context(false), display("The query string is not usable"))]
    QueryString { source: QueryRejection },

    #[snafu(context(false), display("The request path is not usable"))]
    PathSegment { source: PathRejection },
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Body { source } => source.status(),
            Self::QueryString { source } => source.status(),
            Self::PathSegment { source } => source.status(),
        };
        error_response(status, &self)
    }
}

#[derive(Debug, Serialize)]
struct Message {
    message: String,
}

fn message(message: impl Into<String>) -> Json<Message> {
    Json(Message {
        message: message.into(),
    })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    causes: Vec<String>,
}

/// Renders the error chain as `{"detail": ..., "causes": [...]}`.
fn error_response(status: StatusCode, error: &dyn std::error::Error) -> Response {
    let mut messages = crate::error_messages(error).into_iter();
    let detail = messages
        .next()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Error").to_owned());
    let causes: Vec<_> = messages.collect();

    warn!(status = status.as_u16(), causes = ?causes, "Request failed: {detail}");

    (status, Json(ErrorBody { detail, causes })).into_response()
}

/// Accepts the same date and time spellings as CSV uploads.
fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    ingest::parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("{raw:?} is not a valid date")))
}

#[cfg(test)]
mod test {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use std::{path::Path, sync::Arc};
    use tower::ServiceExt as _;

    use super::*;
    use crate::{
        cache::ResponseCache,
        ml::{ModelSettings, Models},
        SystemTime,
    };

    pub(crate) fn state(dir: &Path) -> AppState {
        let config = Arc::new(Config {
            database_url: "postgres://localhost/unused".into(),
            address: "127.0.0.1:0".parse().unwrap(),
            model_path: dir.join("models"),
            data_path: dir.join("data"),
            retrain_interval: chrono::Duration::hours(24),
            performance_threshold: 0.8,
            cors_origins: vec![],
            max_upload_bytes: 1024 * 1024,
        });
        let db = Db::disconnected();
        let models = Models::new(
            db.clone(),
            ModelSettings {
                model_path: config.model_path.clone(),
                performance_threshold: config.performance_threshold,
                retrain_interval: config.retrain_interval,
            },
        );

        AppState {
            config,
            db,
            time: SystemTime,
            cache: ResponseCache::default(),
            models,
        }
    }

    pub(crate) fn app(state: AppState) -> Router {
        router(&state.config.clone()).with_state(state)
    }

    pub(crate) async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub(crate) fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    pub(crate) fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn index_describes_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(state(dir.path())), get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api"], "/api/v1");
    }

    #[tokio::test]
    async fn health_reports_an_unreachable_database() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(state(dir.path())), get("/health")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert!(body["error"].as_str().unwrap().contains("database task"));
    }

    #[tokio::test]
    async fn server_errors_carry_their_causes() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(state(dir.path())), get("/api/v1/stations")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "The database task is not running");
        assert!(body["causes"].is_array());
    }

    #[tokio::test]
    async fn request_ids_are_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/")
            .header(X_REQUEST_ID_NAME, "abc-123")
            .body(Body::empty())
            .unwrap();

        let response = app(state(dir.path())).oneshot(request).await.unwrap();

        assert_eq!(response.headers()[X_REQUEST_ID_NAME], "abc-123");
    }

    #[tokio::test]
    async fn request_ids_are_generated() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(state(dir.path())).oneshot(get("/")).await.unwrap();

        assert!(response.headers().contains_key(X_REQUEST_ID_NAME));
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(state(dir.path()))
            .oneshot(get("/api/v1/nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn is_json(response: &Response) -> bool {
        response.headers()["content-type"] == "application/json"
    }

    #[tokio::test]
    async fn unusable_query_strings_use_the_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(state(dir.path()))
            .oneshot(get("/api/v1/analytics/overview?start_date=nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(is_json(&response));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["detail"], "The query string is not usable");
        let causes = body["causes"].to_string();
        assert!(causes.contains("\\\"nope\\\" is not a valid date"), "{causes}");
    }

    #[tokio::test]
    async fn unusable_json_bodies_use_the_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/api/v1/ml/predict/cost")
            .header("content-type", "application/json")
            .body(Body::from("{\"location\": "))
            .unwrap();

        let response = app(state(dir.path())).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(is_json(&response));
    }

    #[tokio::test]
    async fn bodies_of_the_wrong_shape_use_the_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(state(dir.path())),
            post_json("/api/v1/data/sessions", serde_json::json!({ "user_id": 7 })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], "The request body is not usable");
    }

    #[tokio::test]
    async fn unusable_path_segments_use_the_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(state(dir.path())),
            get("/api/v1/ml/models/cost_optimization/train/not-a-uuid"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "The request path is not usable");
    }

    #[test]
    fn timestamps_accept_several_spellings() {
        #[derive(Deserialize)]
        struct Q {
            #[serde(default, deserialize_with = "optional_timestamp")]
            at: Option<DateTime<Utc>>,
        }

        let q: Q = serde_json::from_str(r#"{"at": "2024-03-01"}"#).unwrap();
        assert_eq!(q.at.unwrap().to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let q: Q = serde_json::from_str("{}").unwrap();
        assert_eq!(q.at, None);

        assert!(serde_json::from_str::<Q>(r#"{"at": "yesterday"}"#).is_err());
    }
}
