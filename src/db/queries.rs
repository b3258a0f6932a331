use diesel::{pg::Pg, prelude::*};
use snafu::prelude::*;
use tracing::{debug, warn};

use super::{
    schema, ChargingSession, ChargingStation, MlModel, NewChargingSession, NewMlModel,
    NewPrediction, RelatedEntities, SessionFilter, SessionId, UploadCounts, User, Vehicle,
};

#[derive(Debug, Snafu)]
pub enum QueryError {
    #[snafu(context(false))]
    Diesel { source: diesel::result::Error },
}

pub type QueryResult<T, E = QueryError> = std::result::Result<T, E>;

pub fn ping(db: &mut PgConnection) -> QueryResult<()> {
    diesel::sql_query("SELECT 1").execute(db)?;
    Ok(())
}

fn filtered(filter: &SessionFilter) -> schema::charging_sessions::BoxedQuery<'static, Pg> {
    use schema::charging_sessions::dsl::*;

    let mut query = charging_sessions.into_boxed();

    if let Some(start) = filter.start {
        query = query.filter(charging_start_time.ge(start));
    }
    if let Some(end) = filter.end {
        query = query.filter(charging_start_time.le(end));
    }
    if let Some(location) = &filter.location {
        query = query.filter(charging_station_location.ilike(contains_pattern(location)));
    }
    if let Some(kind) = &filter.user_type {
        query = query.filter(user_type.eq(kind.clone()));
    }
    if let Some(model) = &filter.vehicle_model {
        query = query.filter(vehicle_model.ilike(contains_pattern(model)));
    }
    if let Some(kind) = &filter.charger_type {
        query = query.filter(charger_type.eq(kind.clone()));
    }

    query
}

fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub fn list_sessions(
    db: &mut PgConnection,
    filter: &SessionFilter,
    skip: i64,
    limit: i64,
) -> QueryResult<Vec<ChargingSession>> {
    use schema::charging_sessions::dsl::*;

    let sessions = filtered(filter)
        .order((charging_start_time.desc(), id.desc()))
        .offset(skip)
        .limit(limit)
        .select(ChargingSession::as_select())
        .load(db)?;

    Ok(sessions)
}

pub fn sessions(db: &mut PgConnection, filter: &SessionFilter) -> QueryResult<Vec<ChargingSession>> {
    use schema::charging_sessions::dsl::*;

    let sessions = filtered(filter)
        .order((charging_start_time.asc(), id.asc()))
        .select(ChargingSession::as_select())
        .load(db)?;

    Ok(sessions)
}

pub fn session_count(db: &mut PgConnection) -> QueryResult<i64> {
    use schema::charging_sessions::dsl::*;

    Ok(charging_sessions.count().get_result(db)?)
}

pub fn create_session(
    db: &mut PgConnection,
    session: &NewChargingSession,
) -> QueryResult<ChargingSession> {
    use schema::charging_sessions::dsl::*;

    let created = diesel::insert_into(charging_sessions)
        .values(session)
        .returning(ChargingSession::as_returning())
        .get_result(db)?;

    insert_related(db, &RelatedEntities::from_sessions(std::slice::from_ref(session)))?;

    Ok(created)
}

pub fn delete_session(db: &mut PgConnection, session_id: SessionId) -> QueryResult<bool> {
    use schema::charging_sessions::dsl::*;

    let n_deleted = diesel::delete(charging_sessions.find(session_id)).execute(db)?;
    Ok(n_deleted > 0)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Upserted {
    Created,
    Updated,
}

/// Sessions are keyed by their user and start time; a matching row is
/// overwritten. Each row runs in its own savepoint so one bad row does not
/// abort the whole batch.
pub fn upload_sessions(
    db: &mut PgConnection,
    sessions: &[NewChargingSession],
) -> QueryResult<UploadCounts> {
    let mut counts = UploadCounts::default();

    for (i, session) in sessions.iter().enumerate() {
        match db.transaction(|db| upsert_session(db, session)) {
            Ok(Upserted::Created) => counts.created += 1,
            Ok(Upserted::Updated) => counts.updated += 1,
            Err(e) => {
                warn!(row = i, user_id = %session.user_id, "Could not store session: {e}");
                counts.failed += 1;
            }
        }
    }

    insert_related(db, &RelatedEntities::from_sessions(sessions))?;

    debug!(?counts, "Upload stored");
    Ok(counts)
}

fn upsert_session(db: &mut PgConnection, session: &NewChargingSession) -> QueryResult<Upserted> {
    use schema::charging_sessions::dsl::*;

    let existing = charging_sessions
        .filter(user_id.eq(&session.user_id))
        .filter(charging_start_time.eq(session.charging_start_time))
        .select(id)
        .first::<SessionId>(db)
        .optional()?;

    match existing {
        Some(existing) => {
            diesel::update(charging_sessions.find(existing))
                .set(session)
                .execute(db)?;
            Ok(Upserted::Updated)
        }
        None => {
            diesel::insert_into(charging_sessions)
                .values(session)
                .execute(db)?;
            Ok(Upserted::Created)
        }
    }
}

fn insert_related(db: &mut PgConnection, related: &RelatedEntities) -> QueryResult<()> {
    use schema::{charging_stations, users, vehicles};

    if !related.stations.is_empty() {
        diesel::insert_into(charging_stations::table)
            .values(&related.stations)
            .on_conflict(charging_stations::station_id)
            .do_nothing()
            .execute(db)?;
    }

    if !related.vehicles.is_empty() {
        diesel::insert_into(vehicles::table)
            .values(&related.vehicles)
            .on_conflict((vehicles::model, vehicles::battery_capacity_kwh))
            .do_nothing()
            .execute(db)?;
    }

    if !related.users.is_empty() {
        diesel::insert_into(users::table)
            .values(&related.users)
            .on_conflict(users::user_id)
            .do_nothing()
            .execute(db)?;
    }

    Ok(())
}

pub fn list_stations(db: &mut PgConnection) -> QueryResult<Vec<ChargingStation>> {
    use schema::charging_stations::dsl::*;

    Ok(charging_stations
        .order(station_id)
        .select(ChargingStation::as_select())
        .load(db)?)
}

pub fn list_vehicles(db: &mut PgConnection) -> QueryResult<Vec<Vehicle>> {
    use schema::vehicles::dsl::*;

    Ok(vehicles
        .order((model, battery_capacity_kwh))
        .select(Vehicle::as_select())
        .load(db)?)
}

pub fn list_users(db: &mut PgConnection) -> QueryResult<Vec<User>> {
    use schema::users::dsl::*;

    Ok(users.order(user_id).select(User::as_select()).load(db)?)
}

pub fn save_model(db: &mut PgConnection, model: &NewMlModel) -> QueryResult<MlModel> {
    use schema::ml_models::dsl::*;

    if model.is_active {
        diesel::update(ml_models.filter(model_name.eq(&model.model_name)))
            .set(is_active.eq(false))
            .execute(db)?;
    }

    Ok(diesel::insert_into(ml_models)
        .values(model)
        .returning(MlModel::as_returning())
        .get_result(db)?)
}

pub fn active_model(db: &mut PgConnection, name: &str) -> QueryResult<Option<MlModel>> {
    use schema::ml_models::dsl::*;

    Ok(ml_models
        .filter(model_name.eq(name))
        .filter(is_active.eq(true))
        .order(training_date.desc())
        .select(MlModel::as_select())
        .first(db)
        .optional()?)
}

pub fn list_models(db: &mut PgConnection) -> QueryResult<Vec<MlModel>> {
    use schema::ml_models::dsl::*;

    Ok(ml_models
        .order((model_name, training_date.desc()))
        .select(MlModel::as_select())
        .load(db)?)
}

pub fn model_history(db: &mut PgConnection, name: &str) -> QueryResult<Vec<MlModel>> {
    use schema::ml_models::dsl::*;

    Ok(ml_models
        .filter(model_name.eq(name))
        .order(training_date.desc())
        .select(MlModel::as_select())
        .load(db)?)
}

pub fn delete_models(db: &mut PgConnection, name: &str) -> QueryResult<Vec<MlModel>> {
    use schema::ml_models::dsl::*;

    Ok(diesel::delete(ml_models.filter(model_name.eq(name)))
        .returning(MlModel::as_returning())
        .get_results(db)?)
}

/// Makes one version the only active one. Nothing changes when the
/// requested version does not exist.
pub fn activate_model(
    db: &mut PgConnection,
    name: &str,
    wanted_version: Option<&str>,
) -> QueryResult<Option<MlModel>> {
    use schema::ml_models::dsl::*;

    let mut target = ml_models.filter(model_name.eq(name)).into_boxed();
    if let Some(wanted_version) = wanted_version {
        target = target.filter(version.eq(wanted_version.to_owned()));
    }

    let target_id = target
        .order(training_date.desc())
        .select(id)
        .first::<super::ModelId>(db)
        .optional()?;

    let Some(target_id) = target_id else {
        return Ok(None);
    };

    diesel::update(ml_models.filter(model_name.eq(name)))
        .set(is_active.eq(false))
        .execute(db)?;

    Ok(Some(
        diesel::update(ml_models.find(target_id))
            .set(is_active.eq(true))
            .returning(MlModel::as_returning())
            .get_result(db)?,
    ))
}

pub fn record_prediction(db: &mut PgConnection, prediction: &NewPrediction) -> QueryResult<()> {
    use schema::predictions::dsl::*;

    diesel::insert_into(predictions)
        .values(prediction)
        .execute(db)?;

    Ok(())
}
