use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::info;

use super::{error_response, optional_timestamp, Json, Query};
use crate::{
    analytics,
    cache::{Key, Namespace, ResponseCache, Ttl},
    db::{Db, DbError, SessionFilter},
    AppState, SystemTime, TimeSource,
};

/// How far back the analytics look when no start date is given.
const DEFAULT_PERIOD_DAYS: i64 = 30;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/overview", get(overview))
        .route("/patterns", get(patterns))
        .route("/costs", get(costs))
        .route("/refresh-cache", post(refresh_cache))
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Period {
    fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let end = end.unwrap_or(now);
        let start = start.unwrap_or(end - Duration::days(DEFAULT_PERIOD_DAYS));
        ensure!(start <= end, PeriodSnafu { start, end });

        Ok(Self { start, end })
    }

    fn filter(self) -> SessionFilter {
        SessionFilter {
            start: Some(self.start),
            end: Some(self.end),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OverviewQuery {
    #[serde(default, deserialize_with = "optional_timestamp")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    end_date: Option<DateTime<Utc>>,
    location: Option<String>,
}

async fn overview(
    State(db): State<Db>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
    Query(query): Query<OverviewQuery>,
) -> Result<Json<serde_json::Value>> {
    let now = time.now();
    let period = Period::new(query.start_date, query.end_date, now)?;
    let key = Key::new(Namespace::Analytics, "overview", &query);

    let value = cache
        .fetch(key, Ttl::Short, now, || async {
            let filter = SessionFilter {
                location: query.location.clone(),
                ..period.filter()
            };
            let sessions = db.sessions(filter).await?;
            Ok::<_, Error>(analytics::overview(&sessions, period.start, period.end))
        })
        .await?;

    Ok(Json(value))
}

#[derive(Debug, Serialize, Deserialize)]
struct PatternsQuery {
    #[serde(default, deserialize_with = "optional_timestamp")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    end_date: Option<DateTime<Utc>>,
    user_type: Option<String>,
    vehicle_model: Option<String>,
}

async fn patterns(
    State(db): State<Db>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
    Query(query): Query<PatternsQuery>,
) -> Result<Json<serde_json::Value>> {
    let now = time.now();
    let period = Period::new(query.start_date, query.end_date, now)?;
    let key = Key::new(Namespace::Analytics, "patterns", &query);

    let value = cache
        .fetch(key, Ttl::Medium, now, || async {
            let filter = SessionFilter {
                user_type: query.user_type.clone(),
                vehicle_model: query.vehicle_model.clone(),
                ..period.filter()
            };
            let sessions = db.sessions(filter).await?;
            Ok::<_, Error>(analytics::patterns(&sessions))
        })
        .await?;

    Ok(Json(value))
}

#[derive(Debug, Serialize, Deserialize)]
struct CostsQuery {
    #[serde(default, deserialize_with = "optional_timestamp")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    end_date: Option<DateTime<Utc>>,
    location: Option<String>,
    charger_type: Option<String>,
}

async fn costs(
    State(db): State<Db>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
    Query(query): Query<CostsQuery>,
) -> Result<Json<serde_json::Value>> {
    let now = time.now();
    let period = Period::new(query.start_date, query.end_date, now)?;
    let key = Key::new(Namespace::Analytics, "costs", &query);

    let value = cache
        .fetch(key, Ttl::Medium, now, || async {
            let filter = SessionFilter {
                location: query.location.clone(),
                charger_type: query.charger_type.clone(),
                ..period.filter()
            };
            let sessions = db.sessions(filter).await?;
            Ok::<_, Error>(analytics::costs(&sessions))
        })
        .await?;

    Ok(Json(value))
}

#[derive(Debug, Serialize)]
struct Refreshed {
    message: String,
    entries_removed: usize,
}

async fn refresh_cache(State(cache): State<ResponseCache>) -> Json<Refreshed> {
    let entries_removed = cache.invalidate(Namespace::Analytics);
    info!(entries_removed, "Analytics cache refreshed");

    Json(Refreshed {
        message: format!("Refreshed {entries_removed} cache entries"),
        entries_removed,
    })
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("start_date {start} is after end_date {end}"))]
    Period {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[snafu(transparent)]
    Database { source: DbError },

    #[snafu(context(false), display("Could not encode the response"))]
    Encode { source: serde_json::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Period { .. } => StatusCode::BAD_REQUEST,
            Self::Database { .. } | Self::Encode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self)
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::api::test::{app, get, send, state};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn periods_default_to_the_last_month() {
        let period = Period::new(None, None, at(31)).unwrap();
        assert_eq!(period.start, at(1));
        assert_eq!(period.end, at(31));

        let period = Period::new(None, Some(at(31)), at(2)).unwrap();
        assert_eq!(period.start, at(1));

        assert!(matches!(
            Period::new(Some(at(10)), Some(at(9)), at(31)),
            Err(Error::Period { .. })
        ));
    }

    #[tokio::test]
    async fn backwards_periods_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uri = "/api/v1/analytics/overview?start_date=2024-05-10&end_date=2024-05-01";

        let (status, body) = send(app(state(dir.path())), get(uri)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("is after end_date"));
    }

    #[tokio::test]
    async fn refreshing_drops_only_analytics_entries() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let now = state.time.now();
        for (namespace, name) in [
            (Namespace::Analytics, "overview"),
            (Namespace::Analytics, "costs"),
            (Namespace::Data, "statistics"),
        ] {
            state
                .cache
                .insert(Key::new(namespace, name, &()), 1.into(), Ttl::Long, now);
        }
        let cache = state.cache.clone();

        let request = axum::http::Request::post("/api/v1/analytics/refresh-cache")
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, body) = send(app(state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries_removed"], 2);
        assert!(cache
            .get(&Key::new(Namespace::Data, "statistics", &()), now)
            .is_some());
    }

    #[tokio::test]
    async fn analytics_need_the_database() {
        let dir = tempfile::tempdir().unwrap();

        let (status, _) = send(app(state(dir.path())), get("/api/v1/analytics/costs")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
