#![deny(rust_2018_idioms)]
#![warn(unused_crate_dependencies)]
#![warn(clippy::items_after_statements)]

use chrono::{DateTime, Utc};
use futures::Stream;
use snafu::prelude::*;
use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{net::TcpListener, select, sync::broadcast, task};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cache::ResponseCache,
    db::{Db, DbError},
    ml::{ModelSettings, Models},
};

const LOG_ENV_NAME: &str = "EV_ANALYTICS_LOG";
const SAMPLE_DATA_FILE: &str = "sample_data.csv";

mod analytics;
mod api;
mod cache;
mod categories;
mod db;
mod export;
mod ingest;
mod ml;
mod quality;
mod stats;

#[derive(Debug, Clone, axum::extract::FromRef)]
pub(crate) struct AppState {
    config: Arc<Config>,
    db: Db,
    time: SystemTime,
    cache: ResponseCache,
    models: Models,
}

#[derive(Debug, Clone)]
pub(crate) enum Event {
    SessionsChanged,

    ModelChanged { name: Arc<str> },
}

#[derive(Debug, Clone)]
pub(crate) struct EventBus(broadcast::Sender<Event>);

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(4);
        Self(tx)
    }
}

impl EventBus {
    pub fn listen(&self) -> impl Stream<Item = Result<Event, BroadcastStreamRecvError>> {
        BroadcastStream::new(self.0.subscribe())
    }

    pub fn sessions_changed(&self) {
        self.0.send(Event::SessionsChanged).ok(/* Don't care if no listener */);
    }

    pub fn model_changed(&self, name: impl Into<Arc<str>>) {
        let name = name.into();
        let evt = Event::ModelChanged { name };
        self.0.send(evt).ok(/* Don't care if no listener */);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_env(LOG_ENV_NAME);
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn database_url_from_env() -> Option<String> {
    if let Ok(url) = env::var("DATABASE_URL") {
        return Some(url);
    }

    (|| {
        let host = env::var("DATABASE_HOST").ok()?;
        let user = env::var("DATABASE_USER").ok()?;
        let password_file = env::var("DATABASE_PASSWORD_FILE").ok()?;
        let password = fs::read_to_string(password_file).ok()?;
        let password = password.trim();
        let dbname = env::var("DATABASE_DBNAME").ok()?;

        let url = format!("host='{host}' user='{user}' password='{password}' dbname='{dbname}'");
        Some(url)
    })()
}

/// Reads an optional variable, parsing it when present.
fn env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub(crate) struct Config {
    database_url: String,
    address: SocketAddr,
    model_path: PathBuf,
    data_path: PathBuf,
    retrain_interval: chrono::Duration,
    performance_threshold: f64,
    cors_origins: Vec<String>,
    max_upload_bytes: usize,
}

impl Config {
    const DEFAULT_ADDRESS: SocketAddr =
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8000);
    const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

    fn from_env() -> Result<Self, ConfigError> {
        let database_url = database_url_from_env().context(DatabaseUrlSnafu)?;
        let address = env_or("EV_ANALYTICS_ADDRESS", Self::DEFAULT_ADDRESS)?;
        let model_path = env_or("EV_ANALYTICS_MODEL_PATH", PathBuf::from("./models"))?;
        let data_path = env_or("EV_ANALYTICS_DATA_PATH", PathBuf::from("./data"))?;
        let retrain_hours = env_or("EV_ANALYTICS_RETRAIN_INTERVAL_HOURS", 24_i64)?;
        let performance_threshold = env_or("EV_ANALYTICS_MODEL_PERFORMANCE_THRESHOLD", 0.8)?;
        let max_upload_bytes =
            env_or("EV_ANALYTICS_MAX_UPLOAD_BYTES", Self::DEFAULT_MAX_UPLOAD_BYTES)?;

        let cors_origins = env::var("EV_ANALYTICS_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            address,
            model_path,
            data_path,
            retrain_interval: chrono::Duration::hours(retrain_hours),
            performance_threshold,
            cors_origins,
            max_upload_bytes,
        })
    }

    fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            model_path: self.model_path.clone(),
            performance_threshold: self.performance_threshold,
            retrain_interval: self.retrain_interval,
        }
    }
}

#[derive(Debug, Snafu)]
enum ConfigError {
    #[snafu(display("DATABASE_URL (or DATABASE_HOST, DATABASE_USER, DATABASE_PASSWORD_FILE and DATABASE_DBNAME) must be set"))]
    DatabaseUrl,

    #[snafu(display("{name} has the unusable value {value:?}: {reason}"))]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// The messages of an error and its sources, skipping empty ones.
pub(crate) fn error_messages(e: &dyn std::error::Error) -> Vec<String> {
    snafu::CleanedErrorText::new(e)
        .filter_map(|(_e, msg, _cleaned)| {
            if msg.trim().is_empty() {
                None
            } else {
                Some(msg)
            }
        })
        .collect()
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(Config::from_env().context(ConfigSnafu)?);

    let token = CancellationToken::new();
    let event_bus = EventBus::default();

    let signal_task = tokio::spawn(signal_task(token.clone()));

    let (db, task) = db::Db::new(&config.database_url, event_bus.clone(), token.clone())
        .context(DatabaseConnectSnafu)?;
    let db_task = task::spawn_blocking(|| task.run());

    let cache = ResponseCache::default();
    let cache_task = tokio::spawn(cache::task(cache.clone(), event_bus, token.clone()));

    load_sample_data(&db, &config.data_path).await;

    let state = AppState {
        config: config.clone(),
        models: Models::new(db.clone(), config.model_settings()),
        db,
        time: SystemTime,
        cache,
    };

    let server = webserver(state, token.clone());

    select! {
        () = token.cancelled() => {},
        res = signal_task => res.context(SignalTaskSnafu)?.context(SignalsSnafu)?,
        res = server => res.context(WebserverSnafu)?,
        res = db_task => res.context(DatabaseTaskSnafu)?,
        res = cache_task => res.context(CacheTaskSnafu)?,
    }

    Ok(())
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("The configuration is incomplete"))]
    Config { source: ConfigError },

    #[snafu(display("Could not connect to the database"))]
    DatabaseConnect { source: DbError },

    #[snafu(display("Could not listen for shutdown signals"))]
    Signals { source: std::io::Error },

    #[snafu(display("The signal task failed"))]
    SignalTask { source: task::JoinError },

    #[snafu(display("Could not run the webserver"))]
    Webserver { source: std::io::Error },

    #[snafu(display("The database task failed"))]
    DatabaseTask { source: task::JoinError },

    #[snafu(display("The cache task failed"))]
    CacheTask { source: task::JoinError },
}

/// Seeds an empty database from `{data_path}/sample_data.csv`, when there
/// is one.
async fn load_sample_data(db: &Db, data_path: &Path) {
    let path = data_path.join(SAMPLE_DATA_FILE);

    let count = match db.session_count().await {
        Ok(count) => count,
        Err(e) => {
            warn!("Could not count the stored sessions: {}", error_messages(&e).join(": "));
            return;
        }
    };
    if count > 0 {
        return;
    }

    let contents = match tokio::fs::read(&path).await {
        Ok(contents) => contents,
        Err(e) => {
            info!(path = %path.display(), "No sample data loaded: {e}");
            return;
        }
    };

    match api::store_csv(db, &contents).await {
        Ok(stored) => info!(
            path = %path.display(),
            rows = stored.records_processed,
            created = stored.counts.created,
            failed = stored.counts.failed + stored.failures.len(),
            "Loaded sample data",
        ),
        Err(e) => warn!(
            path = %path.display(),
            "Could not load sample data: {}",
            error_messages(&e).join(": "),
        ),
    }
}

async fn signal_task(token: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::*;

    let mut int_signals = signal(SignalKind::interrupt())?;
    let mut term_signals = signal(SignalKind::terminate())?;

    select! {
        _ = int_signals.recv() => {},
        _ = term_signals.recv() => {},
    };

    info!("Signal received, shutting down...");
    token.cancel();

    select! {
        _ = int_signals.recv() => {},
        _ = term_signals.recv() => {},
    };

    info!("Second signal received, aborting...");
    std::process::abort();
}

async fn webserver(state: AppState, token: CancellationToken) -> std::io::Result<()> {
    let address = state.config.address;
    let app = api::router(&state.config).with_state(state);

    let listener = TcpListener::bind(address).await?;
    info!("System listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

pub(crate) trait TimeSource {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Utc> {
        chrono::Utc::now()
    }
}
