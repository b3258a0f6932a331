use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

use super::{error_response, message, optional_timestamp, Json, Message, Path, Query};
use crate::{
    cache::{Key, Namespace, ResponseCache, Ttl},
    db::{
        ChargingSession, ChargingStation, Db, DbError, NewChargingSession, SessionFilter,
        SessionId, UploadCounts, User, Vehicle,
    },
    export::{self, DataExport, ExportFormat},
    ingest::{self, RowFailure, Strictness, Table, ValidationReport},
    quality, AppState, Config, SystemTime, TimeSource,
};

const FILE_FIELD: &str = "file";
const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

pub(super) fn router(config: &Config) -> Router<AppState> {
    let downloads = ServeDir::new(export::exports_dir(&config.data_path));

    #[allow(unused_mut)]
    let mut router = Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/upload", post(upload))
        .route("/validate", post(validate))
        .route("/export", get(export_sessions))
        .route("/statistics", get(statistics))
        .route("/quality-report", get(quality_report))
        .nest_service("/download", downloads);

    #[cfg(feature = "fake-data")]
    {
        router = router.route("/seed", post(super::fake::seed));
    }

    router
}

/// The entities derived from uploaded sessions.
pub(super) fn entity_router() -> Router<AppState> {
    Router::new()
        .route("/stations", get(stations))
        .route("/vehicles", get(vehicles))
        .route("/users", get(users))
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
struct SessionsQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_page_size")]
    limit: i64,
    #[serde(default, deserialize_with = "optional_timestamp")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    end_date: Option<DateTime<Utc>>,
    location: Option<String>,
    user_type: Option<String>,
    vehicle_model: Option<String>,
}

async fn list_sessions(
    State(db): State<Db>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<ChargingSession>>> {
    ensure!(query.skip >= 0, NegativeSkipSnafu { skip: query.skip });
    ensure!(
        (1..=MAX_PAGE_SIZE).contains(&query.limit),
        PageSizeSnafu { limit: query.limit }
    );

    let filter = SessionFilter {
        start: query.start_date,
        end: query.end_date,
        location: query.location,
        user_type: query.user_type,
        vehicle_model: query.vehicle_model,
        charger_type: None,
    };

    let sessions = db.list_sessions(filter, query.skip, query.limit).await?;
    Ok(Json(sessions))
}

async fn create_session(
    State(db): State<Db>,
    Json(session): Json<NewChargingSession>,
) -> Result<Json<ChargingSession>> {
    ingest::check_session(&session, Strictness::Create).context(InvalidSessionSnafu)?;

    let session = db.create_session(session).await?;
    info!(id = session.id.0, user_id = %session.user_id, "Created charging session");

    Ok(Json(session))
}

async fn delete_session(State(db): State<Db>, Path(id): Path<i64>) -> Result<Json<Message>> {
    let deleted = db.delete_session(SessionId(id)).await?;
    ensure!(deleted, SessionNotFoundSnafu { id });

    Ok(message("Charging session deleted successfully"))
}

struct CsvFile {
    filename: String,
    contents: Bytes,
}

/// Pulls the CSV out of the `file` field of a multipart form.
async fn csv_file(multipart: &mut Multipart) -> Result<CsvFile> {
    while let Some(field) = multipart.next_field().await.context(MultipartSnafu)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_owned();
        ensure!(
            filename.to_ascii_lowercase().ends_with(".csv"),
            NotCsvSnafu { filename: &filename }
        );
        let contents = field.bytes().await.context(MultipartSnafu)?;

        return Ok(CsvFile { filename, contents });
    }

    MissingFileSnafu.fail()
}

#[derive(Debug)]
pub(crate) struct StoredCsv {
    pub records_processed: usize,
    pub counts: UploadCounts,
    pub failures: Vec<RowFailure>,
}

impl StoredCsv {
    fn records_failed(&self) -> usize {
        self.counts.failed + self.failures.len()
    }
}

/// Converts and stores every usable row of a CSV file.
pub(crate) async fn store_csv(db: &Db, contents: &[u8]) -> Result<StoredCsv> {
    let table = Table::parse(contents).context(ParseSnafu)?;

    let missing = table.missing_columns(&ingest::REQUIRED_UPLOAD_COLUMNS);
    ensure!(missing.is_empty(), MissingColumnsSnafu { columns: missing });

    let ingest::Converted { sessions, failures } = ingest::convert(&table);
    let counts = db.upload_sessions(sessions).await?;

    Ok(StoredCsv {
        records_processed: table.n_rows(),
        counts,
        failures,
    })
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    filename: String,
    records_processed: usize,
    records_created: usize,
    records_updated: usize,
    records_failed: usize,
    message: String,
    errors: Option<Vec<String>>,
}

async fn upload(State(db): State<Db>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let file = csv_file(&mut multipart).await?;
    let stored = store_csv(&db, &file.contents).await?;

    let records_failed = stored.records_failed();
    info!(
        filename = %file.filename,
        created = stored.counts.created,
        updated = stored.counts.updated,
        failed = records_failed,
        "CSV uploaded",
    );

    let message = if records_failed == 0 {
        "Data uploaded successfully".to_owned()
    } else {
        format!("Data uploaded with {records_failed} failed records")
    };
    let errors = (!stored.failures.is_empty())
        .then(|| stored.failures.iter().map(ToString::to_string).collect());

    Ok(Json(UploadResponse {
        filename: file.filename,
        records_processed: stored.records_processed,
        records_created: stored.counts.created,
        records_updated: stored.counts.updated,
        records_failed,
        message,
        errors,
    }))
}

async fn validate(mut multipart: Multipart) -> Result<Json<ValidationReport>> {
    let file = csv_file(&mut multipart).await?;
    let table = Table::parse(&file.contents).context(ParseSnafu)?;

    Ok(Json(ingest::validate(&file.filename, &table)))
}

fn default_export_format() -> String {
    "csv".into()
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default = "default_export_format")]
    format: String,
    #[serde(default, deserialize_with = "optional_timestamp")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    end_date: Option<DateTime<Utc>>,
    location: Option<String>,
}

async fn export_sessions(
    State(db): State<Db>,
    State(config): State<Arc<Config>>,
    State(time): State<SystemTime>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<DataExport>> {
    let format = query.format.parse::<ExportFormat>()?;

    let filter = SessionFilter {
        start: query.start_date,
        end: query.end_date,
        location: query.location,
        ..Default::default()
    };
    let sessions = db.sessions(filter).await?;

    let export = export::export(&config.data_path, format, &sessions, time.now()).await?;
    info!(filename = %export.filename, records = export.record_count, "Exported sessions");

    Ok(Json(export))
}

async fn statistics(
    State(db): State<Db>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
) -> Result<Json<serde_json::Value>> {
    let now = time.now();
    let key = Key::new(Namespace::Data, "statistics", &());

    let value = cache
        .fetch(key, Ttl::Medium, now, || async {
            let sessions = db.sessions(SessionFilter::default()).await?;
            Ok::<_, Error>(quality::statistics(&sessions, now))
        })
        .await?;

    Ok(Json(value))
}

async fn quality_report(
    State(db): State<Db>,
    State(cache): State<ResponseCache>,
    State(time): State<SystemTime>,
) -> Result<Json<serde_json::Value>> {
    let now = time.now();
    let key = Key::new(Namespace::Data, "quality-report", &());

    let value = cache
        .fetch(key, Ttl::Long, now, || async {
            let sessions = db.sessions(SessionFilter::default()).await?;
            Ok::<_, Error>(quality::quality_report(&sessions, now))
        })
        .await?;

    Ok(Json(value))
}

async fn stations(State(db): State<Db>) -> Result<Json<Vec<ChargingStation>>> {
    Ok(Json(db.list_stations().await?))
}

async fn vehicles(State(db): State<Db>) -> Result<Json<Vec<Vehicle>>> {
    Ok(Json(db.list_vehicles().await?))
}

async fn users(State(db): State<Db>) -> Result<Json<Vec<User>>> {
    Ok(Json(db.list_users().await?))
}

#[derive(Debug, Snafu)]
pub(crate) enum Error {
    #[snafu(display("skip must not be negative (got {skip})"))]
    NegativeSkip { skip: i64 },

    #[snafu(display("limit must be between 1 and {MAX_PAGE_SIZE} (got {limit})"))]
    PageSize { limit: i64 },

    #[snafu(display("The charging session is invalid"))]
    InvalidSession { source: ingest::InvalidSession },

    #[snafu(display("Charging session {id} was not found"))]
    SessionNotFound { id: i64 },

    #[snafu(display("Could not read the uploaded form"))]
    Multipart { source: MultipartError },

    #[snafu(display("The form has no {FILE_FIELD:?} field"))]
    MissingFile,

    #[snafu(display("Only CSV files are supported (got {filename:?})"))]
    NotCsv { filename: String },

    #[snafu(display("The file is not a readable CSV file"))]
    Parse { source: ingest::ParseError },

    #[snafu(display("Missing required columns: {}", columns.join(", ")))]
    MissingColumns { columns: Vec<&'static str> },

    #[snafu(transparent)]
    Export { source: export::Error },

    #[snafu(transparent)]
    Database { source: DbError },

    #[snafu(context(false), display("Could not encode the response"))]
    Encode { source: serde_json::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Self::NegativeSkip { .. }
            | Self::PageSize { .. }
            | Self::InvalidSession { .. }
            | Self::Multipart { .. }
            | Self::MissingFile
            | Self::NotCsv { .. }
            | Self::Parse { .. }
            | Self::MissingColumns { .. }
            | Self::Export {
                source: export::Error::UnsupportedFormat { .. },
            } => StatusCode::BAD_REQUEST,

            Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,

            Self::Export { .. } | Self::Database { .. } | Self::Encode { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
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

    const BOUNDARY: &str = "X-TEST-BOUNDARY";

    fn multipart(uri: &str, filename: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/csv\r\n\
             \r\n\
             {contents}\r\n\
             --{BOUNDARY}--\r\n"
        );

        Request::post(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    const GOOD_CSV: &str = "\
User ID,Vehicle Model,Battery Capacity (kWh),Charging Station ID,Charging Station Location,Charging Start Time,Charging End Time,Charging Cost (USD)
User_1,Tesla Model 3,75,Station_1,Houston,2024-01-01 08:00:00,2024-01-01 09:30:00,12.5
User_2,Nissan Leaf,40,Station_2,Chicago,2024-01-02 18:00:00,2024-01-02 19:00:00,-3";

    #[tokio::test]
    async fn csv_files_are_validated_without_storing_them() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart("/api/v1/data/validate", "sessions.csv", GOOD_CSV);

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["is_valid"], true);
        assert_eq!(body["total_rows"], 2);
        assert_eq!(
            body["warnings"][0],
            "Negative values found in charging_cost_usd"
        );
    }

    #[tokio::test]
    async fn validation_reports_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart("/api/v1/data/validate", "s.csv", "user_id,vehicle_model\nU,M");

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_valid"], false);
        assert!(body["validation_errors"][0]
            .as_str()
            .unwrap()
            .starts_with("Missing required columns"));
    }

    #[tokio::test]
    async fn only_csv_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart("/api/v1/data/upload", "sessions.xlsx", GOOD_CSV);

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("Only CSV files"));
    }

    #[tokio::test]
    async fn uploads_need_the_storage_columns() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart("/api/v1/data/upload", "sessions.csv", GOOD_CSV);

        let (status, body) = send(app(state(dir.path())), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing required columns: charging_duration_hours");
    }

    #[tokio::test]
    async fn page_sizes_are_bounded() {
        let dir = tempfile::tempdir().unwrap();

        let (status, body) =
            send(app(state(dir.path())), get("/api/v1/data/sessions?limit=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "limit must be between 1 and 1000 (got 0)");

        let (status, _) =
            send(app(state(dir.path())), get("/api/v1/data/sessions?skip=-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn created_sessions_are_validated_first() {
        let dir = tempfile::tempdir().unwrap();
        let session = serde_json::json!({
            "user_id": "User_1",
            "vehicle_model": "Tesla Model 3",
            "battery_capacity_kwh": 75.0,
            "charging_station_id": "Station_1",
            "charging_station_location": "Houston",
            "charging_start_time": "2024-01-01T08:00:00Z",
            "charging_end_time": "2024-01-01T09:00:00Z",
            "energy_consumed_kwh": 30.0,
            "charging_duration_hours": 1.0,
            "charging_rate_kw": 30.0,
            "charging_cost_usd": 10.0,
            "time_of_day": "Morning",
            "day_of_week": "Monday",
            "state_of_charge_start_percent": 60.0,
            "state_of_charge_end_percent": 20.0,
            "distance_driven_km": 100.0,
            "temperature_celsius": 20.0,
            "vehicle_age_years": 2.0,
            "charger_type": "Level 2",
            "user_type": "Commuter",
        });

        let (status, body) = send(
            app(state(dir.path())),
            post_json("/api/v1/data/sessions", session),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "The charging session is invalid");
        assert_eq!(
            body["causes"][0],
            "state_of_charge_end_percent must be greater than state_of_charge_start_percent"
        );
    }

    #[tokio::test]
    async fn unknown_export_formats_are_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let (status, body) = send(
            app(state(dir.path())),
            get("/api/v1/data/export?format=parquet"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("parquet"));
    }

    #[tokio::test]
    async fn exported_files_can_be_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let exports = export::exports_dir(&state.config.data_path);
        std::fs::create_dir_all(&exports).unwrap();
        std::fs::write(exports.join("charging_data_1.csv"), "id\n1\n").unwrap();

        let response = tower::ServiceExt::oneshot(
            app(state),
            get("/api/v1/data/download/charging_data_1.csv"),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn statistics_are_served_from_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let cached = serde_json::json!({ "total_sessions": 3 });
        state.cache.insert(
            Key::new(Namespace::Data, "statistics", &()),
            cached.clone(),
            Ttl::Medium,
            state.time.now(),
        );

        let (status, body) = send(app(state), get("/api/v1/data/statistics")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, cached);
    }
}
