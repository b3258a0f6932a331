use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_newtype::DieselNewType;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
};
use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, instrument, Span};

use crate::EventBus;

mod queries;
mod schema;

use queries::{QueryError, QueryResult};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug)]
enum DbCommand {
    Ping {
        tx: oneshot::Sender<QueryResult<()>>,
    },

    ListSessions {
        filter: SessionFilter,
        skip: i64,
        limit: i64,
        tx: oneshot::Sender<QueryResult<Vec<ChargingSession>>>,
    },

    Sessions {
        filter: SessionFilter,
        tx: oneshot::Sender<QueryResult<Vec<ChargingSession>>>,
    },

    SessionCount {
        tx: oneshot::Sender<QueryResult<i64>>,
    },

    CreateSession {
        session: NewChargingSession,
        tx: oneshot::Sender<QueryResult<ChargingSession>>,
    },

    DeleteSession {
        id: SessionId,
        tx: oneshot::Sender<QueryResult<bool>>,
    },

    UploadSessions {
        sessions: Vec<NewChargingSession>,
        tx: oneshot::Sender<QueryResult<UploadCounts>>,
    },

    ListStations {
        tx: oneshot::Sender<QueryResult<Vec<ChargingStation>>>,
    },

    ListVehicles {
        tx: oneshot::Sender<QueryResult<Vec<Vehicle>>>,
    },

    ListUsers {
        tx: oneshot::Sender<QueryResult<Vec<User>>>,
    },

    SaveModel {
        model: NewMlModel,
        tx: oneshot::Sender<QueryResult<MlModel>>,
    },

    ActiveModel {
        name: String,
        tx: oneshot::Sender<QueryResult<Option<MlModel>>>,
    },

    ListModels {
        tx: oneshot::Sender<QueryResult<Vec<MlModel>>>,
    },

    ModelHistory {
        name: String,
        tx: oneshot::Sender<QueryResult<Vec<MlModel>>>,
    },

    DeleteModels {
        name: String,
        tx: oneshot::Sender<QueryResult<Vec<MlModel>>>,
    },

    ActivateModel {
        name: String,
        version: Option<String>,
        tx: oneshot::Sender<QueryResult<Option<MlModel>>>,
    },

    RecordPrediction {
        prediction: NewPrediction,
        tx: oneshot::Sender<QueryResult<()>>,
    },
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    DieselNewType,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DieselNewType, Serialize)]
#[serde(transparent)]
pub struct ModelId(pub i64);

#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::Sum,
    PartialOrd,
    PartialEq,
    DieselNewType,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct KilowattHours(pub f64);

impl KilowattHours {
    pub const ZERO: Self = KilowattHours(0.0);
}

impl fmt::Display for KilowattHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kWh", self.0)
    }
}

#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::Sum,
    PartialOrd,
    PartialEq,
    DieselNewType,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Usd(pub f64);

impl Usd {
    pub const ZERO: Self = Usd(0.0);
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Selectable, Queryable, Serialize)]
#[diesel(table_name = schema::charging_sessions)]
pub struct ChargingSession {
    pub id: SessionId,
    pub user_id: String,
    pub vehicle_model: String,
    pub battery_capacity_kwh: KilowattHours,
    pub charging_station_id: String,
    pub charging_station_location: String,
    pub charging_start_time: DateTime<Utc>,
    pub charging_end_time: DateTime<Utc>,
    pub energy_consumed_kwh: Option<KilowattHours>,
    pub charging_duration_hours: f64,
    pub charging_rate_kw: Option<f64>,
    pub charging_cost_usd: Usd,
    pub time_of_day: String,
    pub day_of_week: String,
    pub state_of_charge_start_percent: f64,
    pub state_of_charge_end_percent: f64,
    pub distance_driven_km: Option<f64>,
    pub temperature_celsius: f64,
    pub vehicle_age_years: f64,
    pub charger_type: String,
    pub user_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A session that has not been stored yet, as produced by a single
/// create request, a CSV upload or the synthetic generator.
#[derive(Debug, Clone, PartialEq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = schema::charging_sessions)]
#[diesel(treat_none_as_null = true)]
pub struct NewChargingSession {
    pub user_id: String,
    pub vehicle_model: String,
    pub battery_capacity_kwh: KilowattHours,
    pub charging_station_id: String,
    pub charging_station_location: String,
    pub charging_start_time: DateTime<Utc>,
    pub charging_end_time: DateTime<Utc>,
    #[serde(default)]
    pub energy_consumed_kwh: Option<KilowattHours>,
    pub charging_duration_hours: f64,
    #[serde(default)]
    pub charging_rate_kw: Option<f64>,
    pub charging_cost_usd: Usd,
    pub time_of_day: String,
    pub day_of_week: String,
    pub state_of_charge_start_percent: f64,
    pub state_of_charge_end_percent: f64,
    #[serde(default)]
    pub distance_driven_km: Option<f64>,
    pub temperature_celsius: f64,
    pub vehicle_age_years: f64,
    pub charger_type: String,
    pub user_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Case-insensitive substring match.
    pub location: Option<String>,
    pub user_type: Option<String>,
    /// Case-insensitive substring match.
    pub vehicle_model: Option<String>,
    pub charger_type: Option<String>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadCounts {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Selectable, Queryable, Serialize)]
#[diesel(table_name = schema::charging_stations)]
pub struct ChargingStation {
    pub id: i64,
    pub station_id: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub charger_types: Option<String>,
    pub max_power_kw: Option<f64>,
    pub num_connectors: Option<i32>,
    pub operator: Option<String>,
    pub pricing_model: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::charging_stations)]
struct NewChargingStation {
    station_id: String,
    location: String,
    charger_types: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Selectable, Queryable, Serialize)]
#[diesel(table_name = schema::vehicles)]
pub struct Vehicle {
    pub id: i64,
    pub model: String,
    pub manufacturer: Option<String>,
    pub battery_capacity_kwh: KilowattHours,
    pub max_charging_rate_kw: Option<f64>,
    pub range_km: Option<f64>,
    pub efficiency_kwh_per_100km: Option<f64>,
    pub vehicle_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::vehicles)]
struct NewVehicle {
    model: String,
    manufacturer: Option<String>,
    battery_capacity_kwh: KilowattHours,
}

#[derive(Debug, Clone, PartialEq, Selectable, Queryable, Serialize)]
#[diesel(table_name = schema::users)]
pub struct User {
    pub id: i64,
    pub user_id: String,
    pub user_type: String,
    pub registration_date: Option<DateTime<Utc>>,
    pub preferred_charging_locations: Option<String>,
    pub avg_daily_distance_km: Option<f64>,
    pub home_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::users)]
struct NewUser {
    user_id: String,
    user_type: String,
    home_location: Option<String>,
}

/// Stations, vehicles and users referenced by a batch of sessions.
#[derive(Debug, Default, PartialEq)]
struct RelatedEntities {
    stations: Vec<NewChargingStation>,
    vehicles: Vec<NewVehicle>,
    users: Vec<NewUser>,
}

impl RelatedEntities {
    fn from_sessions(sessions: &[NewChargingSession]) -> Self {
        let mut stations = BTreeMap::new();
        let mut charger_types = BTreeMap::<_, Vec<&str>>::new();
        let mut vehicles = BTreeMap::new();
        let mut users = BTreeMap::new();

        for s in sessions {
            stations
                .entry(&*s.charging_station_id)
                .or_insert(&*s.charging_station_location);

            let types = charger_types.entry(&*s.charging_station_id).or_default();
            if !types.contains(&&*s.charger_type) {
                types.push(&s.charger_type);
            }

            vehicles
                .entry((&*s.vehicle_model, s.battery_capacity_kwh.0.to_bits()))
                .or_insert(s.battery_capacity_kwh);

            // The first session seen for a user decides their home location
            users
                .entry(&*s.user_id)
                .or_insert((&*s.user_type, &*s.charging_station_location));
        }

        let stations = stations
            .into_iter()
            .map(|(station_id, location)| {
                let charger_types = charger_types
                    .get(station_id)
                    .filter(|t| !t.is_empty())
                    .map(|t| t.join(","));
                NewChargingStation {
                    station_id: station_id.into(),
                    location: location.into(),
                    charger_types,
                }
            })
            .collect();

        let vehicles = vehicles
            .into_iter()
            .map(|((model, _), battery_capacity_kwh)| NewVehicle {
                model: model.into(),
                manufacturer: Some(manufacturer_of(model).into()),
                battery_capacity_kwh,
            })
            .collect();

        let users = users
            .into_iter()
            .map(|(user_id, (user_type, home_location))| NewUser {
                user_id: user_id.into(),
                user_type: user_type.into(),
                home_location: Some(home_location.into()),
            })
            .collect();

        Self {
            stations,
            vehicles,
            users,
        }
    }
}

fn manufacturer_of(model: &str) -> &str {
    let mut words = model.split_whitespace();
    match (words.next(), words.next()) {
        (Some(first), Some(_)) => first,
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Selectable, Queryable, Serialize)]
#[diesel(table_name = schema::ml_models)]
pub struct MlModel {
    pub id: ModelId,
    pub model_name: String,
    pub model_type: String,
    pub version: String,
    pub file_path: String,
    pub training_data_size: Option<i32>,
    pub training_date: DateTime<Utc>,
    pub performance_metrics: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::ml_models)]
pub struct NewMlModel {
    pub model_name: String,
    pub model_type: String,
    pub version: String,
    pub file_path: String,
    pub training_data_size: Option<i32>,
    pub training_date: DateTime<Utc>,
    pub performance_metrics: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::predictions)]
pub struct NewPrediction {
    pub model_id: ModelId,
    pub prediction_type: String,
    pub input_features: String,
    pub prediction_result: String,
    pub confidence_score: Option<f64>,
}

pub(crate) fn init(database_url: &str) -> DbResult<PgConnection> {
    let mut db = PgConnection::establish(database_url).context(ConnectSnafu)?;
    apply_migrations(&mut db)?;
    Ok(db)
}

fn apply_migrations(db: &mut PgConnection) -> DbResult<()> {
    let migrations = db
        .pending_migrations(MIGRATIONS)
        .context(MigrationListSnafu)?;

    for migration in migrations {
        info!("Starting migration {}", migration.name());
        db.run_migration(&migration).context(MigrationRunSnafu)?;
    }

    Ok(())
}

type ChannelData = (Span, DbCommand);

#[derive(Debug, Clone)]
pub struct Db(mpsc::Sender<ChannelData>);

impl Db {
    pub(crate) fn new(
        database_url: &str,
        event_bus: EventBus,
        token: CancellationToken,
    ) -> DbResult<(Self, Task)> {
        let db = init(database_url)?;

        let (tx, rx) = mpsc::channel(16);

        let this = Self(tx);
        let task = Task {
            rx,
            db,
            event_bus,
            token,
        };

        Ok((this, task))
    }

    /// A handle whose task has already gone away; every command fails.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self(tx)
    }

    pub(crate) async fn ping(&self) -> DbResult<()> {
        self.send(|tx| DbCommand::Ping { tx })
            .await?
            .context(PingSnafu)
    }

    pub(crate) async fn list_sessions(
        &self,
        filter: SessionFilter,
        skip: i64,
        limit: i64,
    ) -> DbResult<Vec<ChargingSession>> {
        self.send(|tx| DbCommand::ListSessions {
            filter,
            skip,
            limit,
            tx,
        })
        .await?
        .context(ListSessionsSnafu)
    }

    /// Every session matching the filter, oldest first.
    pub(crate) async fn sessions(&self, filter: SessionFilter) -> DbResult<Vec<ChargingSession>> {
        self.send(|tx| DbCommand::Sessions { filter, tx })
            .await?
            .context(SessionsSnafu)
    }

    pub(crate) async fn session_count(&self) -> DbResult<i64> {
        self.send(|tx| DbCommand::SessionCount { tx })
            .await?
            .context(SessionCountSnafu)
    }

    pub(crate) async fn create_session(
        &self,
        session: NewChargingSession,
    ) -> DbResult<ChargingSession> {
        self.send(|tx| DbCommand::CreateSession { session, tx })
            .await?
            .context(CreateSessionSnafu)
    }

    pub(crate) async fn delete_session(&self, id: SessionId) -> DbResult<bool> {
        self.send(|tx| DbCommand::DeleteSession { id, tx })
            .await?
            .context(DeleteSessionSnafu)
    }

    pub(crate) async fn upload_sessions(
        &self,
        sessions: Vec<NewChargingSession>,
    ) -> DbResult<UploadCounts> {
        self.send(|tx| DbCommand::UploadSessions { sessions, tx })
            .await?
            .context(UploadSessionsSnafu)
    }

    pub(crate) async fn list_stations(&self) -> DbResult<Vec<ChargingStation>> {
        self.send(|tx| DbCommand::ListStations { tx })
            .await?
            .context(ListStationsSnafu)
    }

    pub(crate) async fn list_vehicles(&self) -> DbResult<Vec<Vehicle>> {
        self.send(|tx| DbCommand::ListVehicles { tx })
            .await?
            .context(ListVehiclesSnafu)
    }

    pub(crate) async fn list_users(&self) -> DbResult<Vec<User>> {
        self.send(|tx| DbCommand::ListUsers { tx })
            .await?
            .context(ListUsersSnafu)
    }

    /// Stores the model as the only active version of its name.
    pub(crate) async fn save_model(&self, model: NewMlModel) -> DbResult<MlModel> {
        self.send(|tx| DbCommand::SaveModel { model, tx })
            .await?
            .context(SaveModelSnafu)
    }

    pub(crate) async fn active_model(&self, name: impl Into<String>) -> DbResult<Option<MlModel>> {
        let name = name.into();
        self.send(|tx| DbCommand::ActiveModel { name, tx })
            .await?
            .context(ActiveModelSnafu)
    }

    pub(crate) async fn list_models(&self) -> DbResult<Vec<MlModel>> {
        self.send(|tx| DbCommand::ListModels { tx })
            .await?
            .context(ListModelsSnafu)
    }

    pub(crate) async fn model_history(&self, name: impl Into<String>) -> DbResult<Vec<MlModel>> {
        let name = name.into();
        self.send(|tx| DbCommand::ModelHistory { name, tx })
            .await?
            .context(ModelHistorySnafu)
    }

    /// Returns the deleted records so their files can be removed.
    pub(crate) async fn delete_models(&self, name: impl Into<String>) -> DbResult<Vec<MlModel>> {
        let name = name.into();
        self.send(|tx| DbCommand::DeleteModels { name, tx })
            .await?
            .context(DeleteModelsSnafu)
    }

    pub(crate) async fn activate_model(
        &self,
        name: impl Into<String>,
        version: Option<String>,
    ) -> DbResult<Option<MlModel>> {
        let name = name.into();
        self.send(|tx| DbCommand::ActivateModel { name, version, tx })
            .await?
            .context(ActivateModelSnafu)
    }

    pub(crate) async fn record_prediction(&self, prediction: NewPrediction) -> DbResult<()> {
        self.send(|tx| DbCommand::RecordPrediction { prediction, tx })
            .await?
            .context(RecordPredictionSnafu)
    }

    async fn send<T>(&self, f: impl FnOnce(oneshot::Sender<T>) -> DbCommand) -> DbResult<T> {
        let (tx, rx) = oneshot::channel();
        let command = f(tx);
        let span = info_span!("database");
        self.0
            .send((span, command))
            .await
            .send_context(SendToTaskSnafu)?;
        rx.await.context(ReceiveFromTaskSnafu)
    }
}

trait SendContext<T, E> {
    fn send_context<C>(self, ctx: C) -> Result<(), E>
    where
        C: snafu::IntoError<E, Source = mpsc::error::SendError<()>>,
        E: snafu::Error + snafu::ErrorCompat;
}

impl<T, E> SendContext<T, E> for Result<(), mpsc::error::SendError<T>> {
    fn send_context<C>(self, ctx: C) -> Result<(), E>
    where
        C: snafu::IntoError<E, Source = mpsc::error::SendError<()>>,
        E: snafu::Error + snafu::ErrorCompat,
    {
        self.map_err(|_| mpsc::error::SendError(())).context(ctx)
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum DbError {
    #[snafu(display("Could not connect to database"))]
    Connect {
        source: diesel::result::ConnectionError,
    },

    #[snafu(display("Could not determine migration status"))]
    MigrationList {
        source: Box<dyn snafu::Error + Send + Sync>,
    },

    #[snafu(display("Could not run migrations"))]
    MigrationRun {
        source: Box<dyn snafu::Error + Send + Sync>,
    },

    #[snafu(display("Could not reach the database"))]
    Ping { source: QueryError },

    #[snafu(display("Could not list charging sessions"))]
    ListSessions { source: QueryError },

    #[snafu(display("Could not load charging sessions"))]
    Sessions { source: QueryError },

    #[snafu(display("Could not count charging sessions"))]
    SessionCount { source: QueryError },

    #[snafu(display("Could not create the charging session"))]
    CreateSession { source: QueryError },

    #[snafu(display("Could not delete the charging session"))]
    DeleteSession { source: QueryError },

    #[snafu(display("Could not store the uploaded sessions"))]
    UploadSessions { source: QueryError },

    ListStations { source: QueryError },

    ListVehicles { source: QueryError },

    ListUsers { source: QueryError },

    #[snafu(display("Could not save the model metadata"))]
    SaveModel { source: QueryError },

    ActiveModel { source: QueryError },

    ListModels { source: QueryError },

    ModelHistory { source: QueryError },

    DeleteModels { source: QueryError },

    ActivateModel { source: QueryError },

    RecordPrediction { source: QueryError },

    #[snafu(display("The database task is not running"))]
    SendToTask {
        source: mpsc::error::SendError<()>,
    },

    #[snafu(display("The database task did not reply"))]
    ReceiveFromTask {
        source: oneshot::error::RecvError,
    },
}

pub(crate) type DbResult<T, E = DbError> = std::result::Result<T, E>;

pub struct Task {
    rx: mpsc::Receiver<ChannelData>,
    db: PgConnection,
    event_bus: EventBus,
    token: CancellationToken,
}

impl Task {
    #[instrument(skip_all)]
    pub fn run(mut self) {
        let Self {
            rx,
            db,
            event_bus,
            token,
        } = &mut self;

        info!("starting task");

        let mut next_command = move || {
            futures::executor::block_on(async {
                select! {
                    () = token.cancelled() => None,
                    cmd = rx.recv() => cmd,
                }
            })
        };

        while let Some((span, cmd)) = next_command() {
            let _span = span.enter();

            match cmd {
                DbCommand::Ping { tx } => {
                    let r = queries::ping(db);
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ListSessions {
                    filter,
                    skip,
                    limit,
                    tx,
                } => {
                    let sessions = db
                        .build_transaction()
                        .read_only()
                        .run(|db| queries::list_sessions(db, &filter, skip, limit));
                    tx.send(sessions).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::Sessions { filter, tx } => {
                    let sessions = db
                        .build_transaction()
                        .read_only()
                        .run(|db| queries::sessions(db, &filter));
                    tx.send(sessions).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::SessionCount { tx } => {
                    let count = db.transaction(queries::session_count);
                    tx.send(count).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::CreateSession { session, tx } => {
                    let r = db.transaction(|db| queries::create_session(db, &session));
                    if r.is_ok() {
                        event_bus.sessions_changed();
                    }
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::DeleteSession { id, tx } => {
                    let r = db.transaction(|db| queries::delete_session(db, id));
                    if matches!(r, Ok(true)) {
                        event_bus.sessions_changed();
                    }
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::UploadSessions { sessions, tx } => {
                    let r = db.transaction(|db| queries::upload_sessions(db, &sessions));
                    if let Ok(counts) = &r {
                        if counts.created + counts.updated > 0 {
                            event_bus.sessions_changed();
                        }
                    }
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ListStations { tx } => {
                    let r = db.transaction(queries::list_stations);
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ListVehicles { tx } => {
                    let r = db.transaction(queries::list_vehicles);
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ListUsers { tx } => {
                    let r = db.transaction(queries::list_users);
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::SaveModel { model, tx } => {
                    let r = db.transaction(|db| queries::save_model(db, &model));
                    if r.is_ok() {
                        event_bus.model_changed(&*model.model_name);
                    }
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ActiveModel { name, tx } => {
                    let r = db.transaction(|db| queries::active_model(db, &name));
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ListModels { tx } => {
                    let r = db.transaction(queries::list_models);
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ModelHistory { name, tx } => {
                    let r = db.transaction(|db| queries::model_history(db, &name));
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::DeleteModels { name, tx } => {
                    let r = db.transaction(|db| queries::delete_models(db, &name));
                    if matches!(&r, Ok(deleted) if !deleted.is_empty()) {
                        event_bus.model_changed(&*name);
                    }
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::ActivateModel { name, version, tx } => {
                    let r = db.transaction(|db| {
                        queries::activate_model(db, &name, version.as_deref())
                    });
                    if matches!(r, Ok(Some(_))) {
                        event_bus.model_changed(&*name);
                    }
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }

                DbCommand::RecordPrediction { prediction, tx } => {
                    let r = db.transaction(|db| queries::record_prediction(db, &prediction));
                    tx.send(r).ok(/* Don't care if receiver is gone */);
                }
            }
        }

        info!("stopping task");
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn session(user_id: &str, model: &str, station: &str, location: &str) -> NewChargingSession {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        NewChargingSession {
            user_id: user_id.into(),
            vehicle_model: model.into(),
            battery_capacity_kwh: KilowattHours(75.0),
            charging_station_id: station.into(),
            charging_station_location: location.into(),
            charging_start_time: start,
            charging_end_time: start + chrono::Duration::hours(1),
            energy_consumed_kwh: Some(KilowattHours(30.0)),
            charging_duration_hours: 1.0,
            charging_rate_kw: Some(30.0),
            charging_cost_usd: Usd(12.0),
            time_of_day: "Morning".into(),
            day_of_week: "Monday".into(),
            state_of_charge_start_percent: 20.0,
            state_of_charge_end_percent: 60.0,
            distance_driven_km: None,
            temperature_celsius: 18.0,
            vehicle_age_years: 2.0,
            charger_type: "Level 2".into(),
            user_type: "Commuter".into(),
        }
    }

    #[test]
    fn manufacturer_is_first_word_of_multi_word_models() {
        assert_eq!(manufacturer_of("Tesla Model 3"), "Tesla");
        assert_eq!(manufacturer_of("Nissan Leaf"), "Nissan");
        assert_eq!(manufacturer_of("Bolt"), "Unknown");
        assert_eq!(manufacturer_of(""), "Unknown");
    }

    #[test]
    fn related_entities_are_deduplicated() {
        let mut other_charger = session("User_1", "Tesla Model 3", "Station_1", "Houston");
        other_charger.charger_type = "DC Fast Charger".into();

        let sessions = [
            session("User_1", "Tesla Model 3", "Station_1", "Houston"),
            other_charger,
            session("User_2", "Nissan Leaf", "Station_2", "Chicago"),
            session("User_2", "Nissan Leaf", "Station_1", "Houston"),
        ];

        let related = RelatedEntities::from_sessions(&sessions);

        assert_eq!(related.stations.len(), 2);
        assert_eq!(
            related.stations[0].charger_types.as_deref(),
            Some("Level 2,DC Fast Charger"),
        );
        assert_eq!(related.vehicles.len(), 2);
        assert_eq!(related.vehicles[0].manufacturer.as_deref(), Some("Nissan"));
        assert_eq!(related.users.len(), 2);
        assert_eq!(related.users[1].home_location.as_deref(), Some("Chicago"));
    }

    #[test]
    fn quantities_sum_and_display() {
        let total: KilowattHours = [KilowattHours(1.5), KilowattHours(2.25)].into_iter().sum();
        assert_eq!(total, KilowattHours(3.75));
        assert_eq!(total.to_string(), "3.75 kWh");

        let cost = Usd(4.0) + Usd(0.5);
        assert_eq!(cost.to_string(), "$4.50");
    }

    #[tokio::test]
    async fn disconnected_handle_reports_send_failure() {
        let db = Db::disconnected();
        let err = db.ping().await.unwrap_err();
        assert!(matches!(err, DbError::SendToTask { .. }), "{err:?}");
    }
}
