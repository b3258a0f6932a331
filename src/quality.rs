use chrono::{DateTime, Utc};
use itertools::Itertools as _;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    db::{ChargingSession, KilowattHours, Usd},
    stats,
};

const NOT_AVAILABLE: &str = "N/A";

const COMPLETENESS_THRESHOLD: f64 = 95.0;
const FRESHNESS_THRESHOLD_DAYS: f64 = 7.0;
const MISSING_DATA_LIMIT_PERCENT: f64 = 5.0;
const OUTLIER_Z_LIMIT: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStatistics {
    pub total_sessions: usize,
    pub total_users: usize,
    pub total_stations: usize,
    pub total_energy_kwh: KilowattHours,
    pub total_cost_usd: Usd,
    pub date_range_start: DateTime<Utc>,
    pub date_range_end: DateTime<Utc>,
    pub avg_session_duration_hours: f64,
    pub avg_session_cost_usd: f64,
    pub most_popular_location: String,
    pub most_popular_vehicle_model: String,
}

pub fn statistics(sessions: &[ChargingSession], now: DateTime<Utc>) -> DataStatistics {
    let total_users = sessions.iter().map(|s| &s.user_id).collect::<BTreeSet<_>>().len();
    let total_stations = sessions
        .iter()
        .map(|s| &s.charging_station_id)
        .collect::<BTreeSet<_>>()
        .len();

    let total_energy_kwh = sessions.iter().filter_map(|s| s.energy_consumed_kwh).sum();
    let total_cost_usd = sessions.iter().map(|s| s.charging_cost_usd).sum();

    let durations: Vec<_> = sessions.iter().map(|s| s.charging_duration_hours).collect();
    let costs: Vec<_> = sessions.iter().map(|s| s.charging_cost_usd.0).collect();

    let (date_range_start, date_range_end) = match sessions
        .iter()
        .map(|s| s.charging_start_time)
        .minmax()
        .into_option()
    {
        Some(range) => range,
        None => (now, now),
    };

    DataStatistics {
        total_sessions: sessions.len(),
        total_users,
        total_stations,
        total_energy_kwh,
        total_cost_usd,
        date_range_start,
        date_range_end,
        avg_session_duration_hours: stats::mean(&durations).unwrap_or(0.0),
        avg_session_cost_usd: stats::mean(&costs).unwrap_or(0.0),
        most_popular_location: most_common(sessions.iter().map(|s| &*s.charging_station_location)),
        most_popular_vehicle_model: most_common(sessions.iter().map(|s| &*s.vehicle_model)),
    }
}

/// The most frequent value; ties go to the alphabetically first one.
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let counts = values.fold(BTreeMap::<_, usize>::new(), |mut acc, v| {
        *acc.entry(v).or_default() += 1;
        acc
    });

    counts
        .into_iter()
        .max_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| b_name.cmp(a_name)))
        .map_or_else(|| NOT_AVAILABLE.to_owned(), |(name, _)| name.to_owned())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Good,
    Warning,
    Critical,
}

impl MetricStatus {
    fn from_score(score: f64) -> Self {
        if score >= 100.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetric {
    pub metric_name: &'static str,
    pub value: f64,
    pub threshold: f64,
    /// How well the value meets its threshold, 0 to 100.
    pub score: f64,
    pub status: MetricStatus,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub overall_score: f64,
    pub metrics: Vec<QualityMetric>,
    pub missing_data_summary: BTreeMap<&'static str, f64>,
    pub outlier_summary: BTreeMap<&'static str, usize>,
    pub duplicate_records: usize,
    pub data_freshness_days: f64,
    pub recommendations: Vec<String>,
}

pub fn quality_report(sessions: &[ChargingSession], now: DateTime<Utc>) -> DataQualityReport {
    if sessions.is_empty() {
        return DataQualityReport {
            overall_score: 0.0,
            metrics: vec![],
            missing_data_summary: BTreeMap::new(),
            outlier_summary: BTreeMap::new(),
            duplicate_records: 0,
            data_freshness_days: 0.0,
            recommendations: vec!["No data available for quality assessment".to_owned()],
        };
    }

    let total = sessions.len() as f64;
    let missing_percent = |is_missing: fn(&ChargingSession) -> bool| {
        sessions.iter().filter(|s| is_missing(s)).count() as f64 / total * 100.0
    };

    let missing_data_summary = BTreeMap::from([
        (
            "energy_consumed_kwh",
            missing_percent(|s| s.energy_consumed_kwh.is_none()),
        ),
        (
            "charging_rate_kw",
            missing_percent(|s| s.charging_rate_kw.is_none()),
        ),
        (
            "distance_driven_km",
            missing_percent(|s| s.distance_driven_km.is_none()),
        ),
    ]);
    let avg_missing = missing_data_summary.values().sum::<f64>() / missing_data_summary.len() as f64;

    let duplicate_records = sessions
        .iter()
        .counts_by(|s| (&s.user_id, s.charging_start_time))
        .into_values()
        .filter(|&n| n > 1)
        .count();

    let data_freshness_days = sessions
        .iter()
        .map(|s| s.created_at)
        .max()
        .map_or(0.0, |latest| (now - latest).num_days().max(0) as f64);

    let outlier_summary = outlier_summary(sessions);

    let completeness = 100.0 - avg_missing;
    let completeness_score = (completeness / COMPLETENESS_THRESHOLD * 100.0).min(100.0);
    let duplicate_score = (100.0 * (1.0 - duplicate_records as f64 / total)).max(0.0);
    let freshness_score = if data_freshness_days <= FRESHNESS_THRESHOLD_DAYS {
        100.0
    } else {
        FRESHNESS_THRESHOLD_DAYS / data_freshness_days * 100.0
    };

    let metric = |metric_name, value, threshold, score: f64, description| QualityMetric {
        metric_name,
        value,
        threshold,
        score,
        status: MetricStatus::from_score(score),
        description,
    };

    let metrics = vec![
        metric(
            "Data Completeness",
            completeness,
            COMPLETENESS_THRESHOLD,
            completeness_score,
            "Percentage of complete values in optional fields",
        ),
        metric(
            "Duplicate Records",
            duplicate_records as f64,
            0.0,
            if duplicate_records == 0 { 100.0 } else { duplicate_score.min(99.0) },
            "Number of user and start time combinations recorded more than once",
        ),
        metric(
            "Data Freshness",
            data_freshness_days,
            FRESHNESS_THRESHOLD_DAYS,
            freshness_score,
            "Days since last data update",
        ),
    ];

    let overall_score = metrics.iter().map(|m| m.score).sum::<f64>() / metrics.len() as f64;

    let mut recommendations = vec![];
    if avg_missing > MISSING_DATA_LIMIT_PERCENT {
        recommendations.push("Consider improving data collection for optional fields".to_owned());
    }
    if duplicate_records > 0 {
        recommendations.push("Remove duplicate records to improve data quality".to_owned());
    }
    if data_freshness_days > FRESHNESS_THRESHOLD_DAYS {
        recommendations.push("Update data more frequently to maintain freshness".to_owned());
    }
    let n_outliers: usize = outlier_summary.values().sum();
    if n_outliers > 0 {
        recommendations.push(format!(
            "Review {n_outliers} outlier values flagged in numeric columns"
        ));
    }

    DataQualityReport {
        overall_score,
        metrics,
        missing_data_summary,
        outlier_summary,
        duplicate_records,
        data_freshness_days,
        recommendations,
    }
}

fn outlier_summary(sessions: &[ChargingSession]) -> BTreeMap<&'static str, usize> {
    type Extract = fn(&ChargingSession) -> Option<f64>;

    let columns: [(&'static str, Extract); 8] = [
        ("battery_capacity_kwh", |s| Some(s.battery_capacity_kwh.0)),
        ("energy_consumed_kwh", |s| s.energy_consumed_kwh.map(|e| e.0)),
        ("charging_duration_hours", |s| Some(s.charging_duration_hours)),
        ("charging_rate_kw", |s| s.charging_rate_kw),
        ("charging_cost_usd", |s| Some(s.charging_cost_usd.0)),
        ("distance_driven_km", |s| s.distance_driven_km),
        ("temperature_celsius", |s| Some(s.temperature_celsius)),
        ("vehicle_age_years", |s| Some(s.vehicle_age_years)),
    ];

    columns
        .into_iter()
        .map(|(name, extract)| {
            let values: Vec<_> = sessions.iter().filter_map(extract).collect();
            (name, stats::count_outliers(&values, OUTLIER_Z_LIMIT))
        })
        .collect()
}
