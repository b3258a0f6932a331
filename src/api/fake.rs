use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use snafu::prelude::*;
use tracing::info;

use super::{error_response, Json, Query};
use crate::{
    categories::{self, ChargerType, TimeOfDay, UserType},
    db::{Db, DbError, KilowattHours, NewChargingSession, UploadCounts, Usd},
    SystemTime, TimeSource,
};

const MAX_SESSIONS: usize = 10_000;
const HISTORY_DAYS: i64 = 90;

const LOCATIONS: [&str; 5] = ["Los Angeles", "San Francisco", "Houston", "New York", "Chicago"];

const VEHICLES: [(&str, f64); 5] = [
    ("Tesla Model 3", 75.0),
    ("Nissan Leaf", 40.0),
    ("Chevy Bolt", 66.0),
    ("BMW i3", 42.2),
    ("Hyundai Kona", 64.0),
];

fn pick<T: Copy>(rng: &mut impl Rng, items: &[T]) -> T {
    items[rng.gen_range(0..items.len())]
}

/// One plausible charge ending before `now`.
fn session(rng: &mut impl Rng, now: DateTime<Utc>) -> NewChargingSession {
    let (vehicle_model, capacity) = pick(rng, &VEHICLES);
    let charger_type = pick(rng, &ChargerType::ALL);
    let user_type = pick(rng, &UserType::ALL);

    let soc_start = rng.gen_range(5.0..60.0_f64).round();
    let soc_end = rng.gen_range(soc_start + 10.0..=100.0_f64).round();
    let energy = capacity * (soc_end - soc_start) / 100.0;

    let rate = charger_type.nominal_power_kw() * rng.gen_range(0.7..1.0);
    let duration_hours = energy / rate;

    let base_price = rng.gen_range(0.12..0.25);
    let price = match charger_type {
        ChargerType::DcFast => base_price + 0.2,
        ChargerType::Level1 | ChargerType::Level2 => base_price,
    };

    let minutes_ago = rng.gen_range(0..HISTORY_DAYS * 24 * 60);
    let start = now - Duration::days(3) - Duration::minutes(minutes_ago);
    let end = start + Duration::seconds((duration_hours * 3600.0).ceil() as i64);

    NewChargingSession {
        user_id: format!("User_{}", rng.gen_range(1..=500)),
        vehicle_model: vehicle_model.to_owned(),
        battery_capacity_kwh: KilowattHours(capacity),
        charging_station_id: format!("Station_{}", rng.gen_range(1..=200)),
        charging_station_location: pick(rng, &LOCATIONS).to_owned(),
        charging_start_time: start,
        charging_end_time: end,
        energy_consumed_kwh: Some(KilowattHours(energy)),
        charging_duration_hours: duration_hours,
        charging_rate_kw: Some(rate),
        charging_cost_usd: Usd(energy * price),
        time_of_day: TimeOfDay::of(start).to_string(),
        day_of_week: categories::day_name_of(start).to_owned(),
        state_of_charge_start_percent: soc_start,
        state_of_charge_end_percent: soc_end,
        distance_driven_km: Some(rng.gen_range(10.0..400.0)),
        temperature_celsius: rng.gen_range(-10.0..35.0),
        vehicle_age_years: rng.gen_range(0.0..10.0_f64).round(),
        charger_type: charger_type.to_string(),
        user_type: user_type.to_string(),
    }
}

fn default_count() -> usize {
    500
}

#[derive(Debug, Deserialize)]
pub(super) struct SeedQuery {
    #[serde(default = "default_count")]
    count: usize,
    seed: Option<u64>,
}

pub(super) async fn seed(
    State(db): State<Db>,
    State(time): State<SystemTime>,
    Query(query): Query<SeedQuery>,
) -> Result<Json<UploadCounts>> {
    ensure!(
        (1..=MAX_SESSIONS).contains(&query.count),
        CountSnafu { count: query.count }
    );

    let mut rng = match query.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let now = time.now();
    let sessions = (0..query.count).map(|_| session(&mut rng, now)).collect();

    let counts = db.upload_sessions(sessions).await.context(StoreSnafu)?;
    info!(?counts, "Seeded fake sessions");

    Ok(Json(counts))
}

#[derive(Debug, Snafu)]
pub(super) enum Error {
    #[snafu(display("count must be between 1 and {MAX_SESSIONS} (got {count})"))]
    Count { count: usize },

    #[snafu(display("Could not store the fake sessions"))]
    Store { source: DbError },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Count { .. } => StatusCode::BAD_REQUEST,
            Self::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ingest::{self, Strictness};

    #[test]
    fn fake_sessions_pass_validation() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();

        for _ in 0..500 {
            let s = session(&mut rng, now);
            ingest::check_session(&s, Strictness::Create).unwrap();
            assert!(s.charging_end_time < now);
            assert!(s.state_of_charge_end_percent <= 100.0);
        }
    }

    #[test]
    fn seeds_are_reproducible() {
        let now = Utc::now();
        let a = session(&mut StdRng::seed_from_u64(1), now);
        let b = session(&mut StdRng::seed_from_u64(1), now);

        assert_eq!(a, b);
    }
}
