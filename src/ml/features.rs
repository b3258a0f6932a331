//! Turning sessions and prediction requests into numeric feature rows.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::{categories, db::ChargingSession, stats};

/// Code reserved for categories that were not seen during training.
const UNKNOWN: &str = "unknown";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FeatureKind {
    Numeric,
    Categorical,
}

use FeatureKind::*;

/// A feature value before encoding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Raw {
    Number(Option<f64>),
    Category(String),
}

impl From<f64> for Raw {
    fn from(v: f64) -> Self {
        Self::Number(Some(v))
    }
}

impl From<Option<f64>> for Raw {
    fn from(v: Option<f64>) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for Raw {
    fn from(v: &str) -> Self {
        Self::Category(v.to_owned())
    }
}

pub(crate) trait FeatureRow {
    const SCHEMA: &'static [(&'static str, FeatureKind)];

    fn raw(&self) -> Vec<Raw>;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DurationFeatures<'a> {
    pub vehicle_model: &'a str,
    pub battery_capacity_kwh: f64,
    pub state_of_charge_start_percent: f64,
    pub state_of_charge_end_percent: f64,
    pub charger_type: &'a str,
    pub temperature_celsius: f64,
    pub vehicle_age_years: f64,
    pub time_of_day: &'a str,
    pub hour: Option<u32>,
    pub day_of_week_num: Option<u32>,
}

impl<'a> DurationFeatures<'a> {
    pub fn from_session(s: &'a ChargingSession) -> Self {
        Self {
            vehicle_model: &s.vehicle_model,
            battery_capacity_kwh: s.battery_capacity_kwh.0,
            state_of_charge_start_percent: s.state_of_charge_start_percent,
            state_of_charge_end_percent: s.state_of_charge_end_percent,
            charger_type: &s.charger_type,
            temperature_celsius: s.temperature_celsius,
            vehicle_age_years: s.vehicle_age_years,
            time_of_day: &s.time_of_day,
            hour: Some(s.charging_start_time.hour()),
            day_of_week_num: Some(s.charging_start_time.weekday().num_days_from_monday()),
        }
    }

    pub fn energy_needed_kwh(&self) -> f64 {
        self.battery_capacity_kwh
            * (self.state_of_charge_end_percent - self.state_of_charge_start_percent)
            / 100.0
    }
}

impl FeatureRow for DurationFeatures<'_> {
    const SCHEMA: &'static [(&'static str, FeatureKind)] = &[
        ("vehicle_model", Categorical),
        ("battery_capacity_kwh", Numeric),
        ("state_of_charge_start_percent", Numeric),
        ("state_of_charge_end_percent", Numeric),
        ("energy_needed_kwh", Numeric),
        ("charger_type", Categorical),
        ("temperature_celsius", Numeric),
        ("vehicle_age_years", Numeric),
        ("time_of_day", Categorical),
        ("hour", Numeric),
        ("day_of_week_num", Numeric),
    ];

    fn raw(&self) -> Vec<Raw> {
        vec![
            self.vehicle_model.into(),
            self.battery_capacity_kwh.into(),
            self.state_of_charge_start_percent.into(),
            self.state_of_charge_end_percent.into(),
            self.energy_needed_kwh().into(),
            self.charger_type.into(),
            self.temperature_celsius.into(),
            self.vehicle_age_years.into(),
            self.time_of_day.into(),
            self.hour.map(f64::from).into(),
            self.day_of_week_num.map(f64::from).into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CostFeatures<'a> {
    pub location: &'a str,
    pub charger_type: &'a str,
    pub time_of_day: &'a str,
    pub day_of_week: &'a str,
    pub user_type: &'a str,
    pub energy_consumed_kwh: Option<f64>,
    pub charging_duration_hours: f64,
    pub temperature_celsius: f64,
    pub hour: Option<u32>,
    pub is_weekend: Option<bool>,
}

impl<'a> CostFeatures<'a> {
    pub fn from_session(s: &'a ChargingSession) -> Self {
        let start = s.charging_start_time;
        Self {
            location: &s.charging_station_location,
            charger_type: &s.charger_type,
            time_of_day: &s.time_of_day,
            day_of_week: &s.day_of_week,
            user_type: &s.user_type,
            energy_consumed_kwh: s.energy_consumed_kwh.map(|e| e.0),
            charging_duration_hours: s.charging_duration_hours,
            temperature_celsius: s.temperature_celsius,
            hour: Some(start.hour()),
            is_weekend: Some(categories::is_weekend(start.weekday())),
        }
    }
}

impl FeatureRow for CostFeatures<'_> {
    const SCHEMA: &'static [(&'static str, FeatureKind)] = &[
        ("charging_station_location", Categorical),
        ("charger_type", Categorical),
        ("time_of_day", Categorical),
        ("day_of_week", Categorical),
        ("user_type", Categorical),
        ("energy_consumed_kwh", Numeric),
        ("charging_duration_hours", Numeric),
        ("temperature_celsius", Numeric),
        ("hour", Numeric),
        ("is_weekend", Numeric),
    ];

    fn raw(&self) -> Vec<Raw> {
        vec![
            self.location.into(),
            self.charger_type.into(),
            self.time_of_day.into(),
            self.day_of_week.into(),
            self.user_type.into(),
            self.energy_consumed_kwh.into(),
            self.charging_duration_hours.into(),
            self.temperature_celsius.into(),
            self.hour.map(f64::from).into(),
            self.is_weekend.map(|w| if w { 1.0 } else { 0.0 }).into(),
        ]
    }
}

/// Maps the sorted set of training categories onto consecutive codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut classes: Vec<_> = values.into_iter().map(str::to_owned).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    fn encode(&self, value: &str) -> f64 {
        let code = self
            .classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .unwrap_or(self.unknown_code());
        code as f64
    }

    fn unknown_code(&self) -> usize {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(UNKNOWN))
            .unwrap_or(self.classes.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
enum Encoding {
    Numeric { median: f64 },
    Categorical { encoder: LabelEncoder },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Column {
    name: String,
    #[serde(flatten)]
    encoding: Encoding,
    mean: f64,
    scale: f64,
}

impl Column {
    fn encode(&self, raw: &Raw) -> f64 {
        match (&self.encoding, raw) {
            (Encoding::Numeric { median }, Raw::Number(v)) => {
                v.filter(|v| v.is_finite()).unwrap_or(*median)
            }
            (Encoding::Numeric { median }, Raw::Category(_)) => *median,
            (Encoding::Categorical { encoder }, Raw::Category(c)) => encoder.encode(c),
            (Encoding::Categorical { encoder }, Raw::Number(_)) => {
                encoder.unknown_code() as f64
            }
        }
    }

    fn transform(&self, raw: &Raw) -> f64 {
        (self.encode(raw) - self.mean) / self.scale
    }
}

/// Encodes categories, imputes missing numbers with the training median
/// and standardizes every column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Preprocessor {
    columns: Vec<Column>,
}

impl Preprocessor {
    /// Learns the encoding from `rows` and returns them transformed.
    pub fn fit(schema: &[(&str, FeatureKind)], rows: &[Vec<Raw>]) -> (Self, Vec<Vec<f64>>) {
        let mut columns = Vec::with_capacity(schema.len());

        for (j, &(name, kind)) in schema.iter().enumerate() {
            let cells = rows.iter().filter_map(|r| r.get(j));

            let encoding = match kind {
                Numeric => {
                    let present: Vec<_> = cells
                        .filter_map(|c| match c {
                            Raw::Number(v) => v.filter(|v| v.is_finite()),
                            Raw::Category(_) => None,
                        })
                        .collect();
                    let median = stats::median(&present).unwrap_or(0.0);
                    Encoding::Numeric { median }
                }
                Categorical => {
                    let encoder = LabelEncoder::fit(cells.filter_map(|c| match c {
                        Raw::Category(c) => Some(c.as_str()),
                        Raw::Number(_) => None,
                    }));
                    Encoding::Categorical { encoder }
                }
            };

            let mut column = Column {
                name: name.to_owned(),
                encoding,
                mean: 0.0,
                scale: 1.0,
            };

            let encoded: Vec<_> = rows
                .iter()
                .filter_map(|r| r.get(j))
                .map(|c| column.encode(c))
                .collect();
            column.mean = stats::mean(&encoded).unwrap_or(0.0);
            column.scale = match stats::std_dev(&encoded, 0) {
                Some(sd) if sd > 0.0 => sd,
                _ => 1.0,
            };

            columns.push(column);
        }

        let this = Self { columns };
        let transformed = rows.iter().map(|r| this.transform(r)).collect();
        (this, transformed)
    }

    pub fn transform(&self, row: &[Raw]) -> Vec<f64> {
        let missing = Raw::Number(None);
        self.columns
            .iter()
            .enumerate()
            .map(|(j, c)| c.transform(row.get(j).unwrap_or(&missing)))
            .collect()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::quality::test::session;

    #[test]
    fn unseen_categories_get_the_reserved_code() {
        let encoder = LabelEncoder::fit(["Level 2", "DC Fast Charger", "Level 2"]);

        assert_eq!(encoder.encode("DC Fast Charger"), 0.0);
        assert_eq!(encoder.encode("Level 2"), 1.0);
        assert_eq!(encoder.encode("Level 3"), 2.0);
    }

    #[test]
    fn a_trained_unknown_class_is_reused() {
        let encoder = LabelEncoder::fit(["b", "unknown", "a"]);

        assert_eq!(encoder.encode("zzz"), encoder.encode("unknown"));
    }

    #[test]
    fn missing_numbers_use_the_training_median() {
        let schema = [("x", Numeric)];
        let rows = vec![
            vec![Raw::from(1.0)],
            vec![Raw::from(2.0)],
            vec![Raw::from(9.0)],
            vec![Raw::Number(None)],
        ];
        let (pre, transformed) = Preprocessor::fit(&schema, &rows);

        // 1, 2, 9, 2 has mean 3.5 and population std 3.2015621187164243
        assert_eq!(transformed[3], transformed[1]);
        assert_eq!(pre.transform(&[Raw::Number(None)]), transformed[1]);

        let mean: f64 = transformed.iter().map(|r| r[0]).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
    }

    #[test]
    fn constant_columns_are_not_divided_by_zero() {
        let schema = [("x", Numeric), ("kind", Categorical)];
        let rows = vec![
            vec![Raw::from(5.0), Raw::from("a")],
            vec![Raw::from(5.0), Raw::from("a")],
        ];
        let (pre, transformed) = Preprocessor::fit(&schema, &rows);

        assert_eq!(transformed, [[0.0, 0.0], [0.0, 0.0]]);
        assert_eq!(pre.transform(&[Raw::from(6.0), Raw::from("b")]), [1.0, 1.0]);
        assert_eq!(pre.feature_names().collect::<Vec<_>>(), ["x", "kind"]);
    }

    #[test]
    fn duration_features_follow_the_schema() {
        // A Wednesday
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 18, 30, 0).unwrap();
        let s = session(1, start);
        let features = DurationFeatures::from_session(&s);
        let raw = features.raw();

        assert_eq!(raw.len(), DurationFeatures::SCHEMA.len());
        assert_eq!(features.energy_needed_kwh(), 30.0);
        assert_eq!(raw[9], Raw::from(18.0));
        assert_eq!(raw[10], Raw::from(2.0));
    }

    #[test]
    fn cost_features_follow_the_schema() {
        // A Saturday
        let start = Utc.with_ymd_and_hms(2024, 1, 6, 9, 0, 0).unwrap();
        let mut s = session(1, start);
        s.energy_consumed_kwh = None;
        let raw = CostFeatures::from_session(&s).raw();

        assert_eq!(raw.len(), CostFeatures::SCHEMA.len());
        assert_eq!(raw[0], Raw::from("Houston"));
        assert_eq!(raw[5], Raw::Number(None));
        assert_eq!(raw[9], Raw::from(1.0));
    }
}
