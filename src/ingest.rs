use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use snafu::prelude::*;
use std::{collections::BTreeMap, fmt};

use crate::{
    categories::{self, day_name_of, TimeOfDay},
    db::{KilowattHours, NewChargingSession, Usd},
};

/// Columns a file must have to pass validation.
pub const REQUIRED_VALIDATION_COLUMNS: [&str; 7] = [
    "user_id",
    "vehicle_model",
    "battery_capacity_kwh",
    "charging_station_id",
    "charging_station_location",
    "charging_start_time",
    "charging_end_time",
];

/// Columns a file must have to be stored.
pub const REQUIRED_UPLOAD_COLUMNS: [&str; 9] = [
    "user_id",
    "vehicle_model",
    "battery_capacity_kwh",
    "charging_station_id",
    "charging_station_location",
    "charging_start_time",
    "charging_end_time",
    "charging_duration_hours",
    "charging_cost_usd",
];

const NUMERIC_COLUMNS: [&str; 10] = [
    "battery_capacity_kwh",
    "energy_consumed_kwh",
    "charging_duration_hours",
    "charging_rate_kw",
    "charging_cost_usd",
    "state_of_charge_start_percent",
    "state_of_charge_end_percent",
    "distance_driven_km",
    "temperature_celsius",
    "vehicle_age_years",
];

const NON_NEGATIVE_COLUMNS: [&str; 3] = [
    "battery_capacity_kwh",
    "charging_duration_hours",
    "charging_cost_usd",
];

const PERCENT_COLUMNS: [&str; 2] = [
    "state_of_charge_start_percent",
    "state_of_charge_end_percent",
];

const TIMESTAMP_COLUMNS: [&str; 2] = ["charging_start_time", "charging_end_time"];

/// Headers used by the public EV charging dataset, mapped onto our column names.
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("User ID", "user_id"),
    ("Vehicle Model", "vehicle_model"),
    ("Battery Capacity (kWh)", "battery_capacity_kwh"),
    ("Charging Station ID", "charging_station_id"),
    ("Charging Station Location", "charging_station_location"),
    ("Charging Start Time", "charging_start_time"),
    ("Charging End Time", "charging_end_time"),
    ("Energy Consumed (kWh)", "energy_consumed_kwh"),
    ("Charging Duration (hours)", "charging_duration_hours"),
    ("Charging Rate (kW)", "charging_rate_kw"),
    ("Charging Cost (USD)", "charging_cost_usd"),
    ("Time of Day", "time_of_day"),
    ("Day of Week", "day_of_week"),
    ("State of Charge (Start %)", "state_of_charge_start_percent"),
    ("State of Charge (End %)", "state_of_charge_end_percent"),
    ("Distance Driven (km)", "distance_driven_km"),
    ("Distance Driven (since last charge) (km)", "distance_driven_km"),
    ("Temperature (Celsius)", "temperature_celsius"),
    ("Temperature (°C)", "temperature_celsius"),
    ("Vehicle Age (years)", "vehicle_age_years"),
    ("Charger Type", "charger_type"),
    ("User Type", "user_type"),
];

/// Cell contents treated as missing, as most spreadsheet exports write them.
const MISSING_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "#N/A",
    "<NA>",
];

pub fn canonical_column(header: &str) -> String {
    let header = header.trim();
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(header))
        .map_or_else(|| header.to_owned(), |(_, name)| (*name).to_owned())
}

/// A parsed CSV file. Headers are normalized to canonical column names and
/// missing cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        use parse_error::*;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let columns: Vec<_> = reader
            .headers()
            .context(CsvSnafu)?
            .iter()
            .map(canonical_column)
            .collect();

        ensure!(
            columns.iter().any(|c| !c.is_empty()),
            NoHeaderSnafu
        );

        for (i, column) in columns.iter().enumerate() {
            ensure!(
                !columns[..i].contains(column),
                DuplicateColumnSnafu { column }
            );
        }

        let rows = reader
            .records()
            .map(|record| {
                let record = record.context(CsvSnafu)?;
                Ok(record.iter().map(cell).collect())
            })
            .collect::<Result<_, ParseError>>()?;

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = Option<&str>> + '_> {
        let idx = self.index_of(name)?;
        Some(self.rows.iter().map(move |r| r[idx].as_deref()))
    }

    pub fn missing_columns<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|c| !self.has_column(c))
            .collect()
    }

    fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|cells| Row { table: self, cells })
    }
}

fn cell(raw: &str) -> Option<String> {
    if MISSING_MARKERS.contains(&raw) {
        None
    } else {
        Some(raw.to_owned())
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum ParseError {
    #[snafu(display("Could not read the CSV data"))]
    Csv { source: csv::Error },

    #[snafu(display("The file has no header row"))]
    NoHeader,

    #[snafu(display("Column {column} appears more than once"))]
    DuplicateColumn { column: String },
}

struct Row<'a> {
    table: &'a Table,
    cells: &'a [Option<String>],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        let idx = self.table.index_of(column)?;
        self.cells[idx].as_deref()
    }

    fn text(&self, column: &'static str) -> Result<String, RowError> {
        self.get(column)
            .map(Into::into)
            .context(row_error::MissingSnafu { column })
    }

    fn number(&self, column: &'static str) -> Result<f64, RowError> {
        self.optional_number(column)?
            .context(row_error::MissingSnafu { column })
    }

    fn optional_number(&self, column: &'static str) -> Result<Option<f64>, RowError> {
        self.get(column)
            .map(|v| parse_number(v).context(row_error::NumberSnafu { column, value: v }))
            .transpose()
    }

    /// Absent and zero readings both mean "not recorded".
    fn recorded_number(&self, column: &'static str) -> Result<Option<f64>, RowError> {
        Ok(self.optional_number(column)?.filter(|&v| v != 0.0))
    }

    fn timestamp(&self, column: &'static str) -> Result<DateTime<Utc>, RowError> {
        let value = self.get(column).context(row_error::MissingSnafu { column })?;
        parse_timestamp(value).context(row_error::TimestampSnafu { column, value })
    }
}

pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accepts RFC 3339 and the common naive layouts; naive values are UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: [&str; 5] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%m/%d/%Y %H:%M",
    ];

    let value = value.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Some(t.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// The dtype a dataframe library would infer for a column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    Object,
}

impl ColumnType {
    fn infer<'a>(cells: impl Iterator<Item = Option<&'a str>>) -> Self {
        let mut any_missing = false;
        let (mut all_int, mut all_float, mut all_bool) = (true, true, true);
        let mut any_present = false;

        for cell in cells {
            let Some(v) = cell else {
                any_missing = true;
                continue;
            };
            any_present = true;
            all_int &= v.parse::<i64>().is_ok();
            all_float &= v.parse::<f64>().is_ok();
            all_bool &= matches!(v, "True" | "False" | "true" | "false" | "TRUE" | "FALSE");
        }

        match () {
            _ if !any_present => Self::Float64,
            _ if all_int && !any_missing => Self::Int64,
            _ if all_float => Self::Float64,
            _ if all_bool && !any_missing => Self::Bool,
            _ => Self::Object,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub filename: String,
    pub total_rows: usize,
    pub total_columns: usize,
    pub columns: Vec<String>,
    pub missing_values: BTreeMap<String, usize>,
    pub data_types: BTreeMap<String, ColumnType>,
    pub validation_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub fn validate(filename: &str, table: &Table) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut missing_values = BTreeMap::new();
    let mut data_types = BTreeMap::new();
    for name in table.columns() {
        if let Some(cells) = table.column(name) {
            let cells: Vec<_> = cells.collect();
            missing_values.insert(name.clone(), cells.iter().filter(|c| c.is_none()).count());
            data_types.insert(name.clone(), ColumnType::infer(cells.into_iter()));
        }
    }

    let missing = table.missing_columns(&REQUIRED_VALIDATION_COLUMNS);
    if !missing.is_empty() {
        errors.push(format!("Missing required columns: {}", missing.join(", ")));
    }

    if table.n_rows() == 0 {
        warnings.push("File contains no data rows".to_owned());
    }

    for name in NUMERIC_COLUMNS {
        let Some(cells) = table.column(name) else {
            continue;
        };
        let values: Option<Vec<f64>> = cells.flatten().map(parse_number).collect();
        let Some(values) = values else {
            errors.push(format!("Non-numeric values found in {name}"));
            continue;
        };

        if NON_NEGATIVE_COLUMNS.contains(&name) && values.iter().any(|&v| v < 0.0) {
            warnings.push(format!("Negative values found in {name}"));
        }

        if PERCENT_COLUMNS.contains(&name) && values.iter().any(|v| !(0.0..=100.0).contains(v)) {
            warnings.push(format!("Values outside 0-100 found in {name}"));
        }
    }

    let mut timestamps = BTreeMap::new();
    for name in TIMESTAMP_COLUMNS {
        let Some(cells) = table.column(name) else {
            continue;
        };
        let parsed: Option<Vec<Option<DateTime<Utc>>>> = cells
            .map(|c| match c {
                Some(v) => parse_timestamp(v).map(Some),
                None => Some(None),
            })
            .collect();

        match parsed {
            Some(parsed) => {
                timestamps.insert(name, parsed);
            }
            None => errors.push(format!("Invalid date format in {name}")),
        }
    }

    if let (Some(starts), Some(ends)) = (
        timestamps.get("charging_start_time"),
        timestamps.get("charging_end_time"),
    ) {
        let backwards = starts
            .iter()
            .zip(ends)
            .filter(|(s, e)| matches!((s, e), (Some(s), Some(e)) if e <= s))
            .count();
        if backwards > 0 {
            warnings.push(format!(
                "{backwards} rows have a charging_end_time that is not after charging_start_time"
            ));
        }
    }

    let is_valid = errors.is_empty();

    ValidationReport {
        filename: filename.to_owned(),
        total_rows: table.n_rows(),
        total_columns: table.columns().len(),
        columns: table.columns().to_vec(),
        missing_values,
        data_types,
        validation_errors: errors,
        warnings,
        is_valid,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Strictness {
    /// Bulk data only has to be physically plausible.
    Upload,
    /// Single records must also describe a charge that added energy.
    Create,
}

pub fn check_session(s: &NewChargingSession, strictness: Strictness) -> Result<(), InvalidSession> {
    use invalid_session::*;

    for (field, value) in [
        ("user_id", &s.user_id),
        ("vehicle_model", &s.vehicle_model),
        ("charging_station_id", &s.charging_station_id),
        ("charging_station_location", &s.charging_station_location),
        ("time_of_day", &s.time_of_day),
        ("day_of_week", &s.day_of_week),
        ("charger_type", &s.charger_type),
        ("user_type", &s.user_type),
    ] {
        ensure!(!value.trim().is_empty(), BlankSnafu { field });
    }

    let positive = [
        ("battery_capacity_kwh", Some(s.battery_capacity_kwh.0)),
        ("charging_duration_hours", Some(s.charging_duration_hours)),
        ("charging_rate_kw", s.charging_rate_kw),
    ];
    for (field, value) in positive {
        if let Some(value) = value {
            ensure!(value > 0.0, NotPositiveSnafu { field, value });
        }
    }

    let non_negative = [
        ("energy_consumed_kwh", s.energy_consumed_kwh.map(|e| e.0)),
        ("charging_cost_usd", Some(s.charging_cost_usd.0)),
        ("distance_driven_km", s.distance_driven_km),
        ("vehicle_age_years", Some(s.vehicle_age_years)),
    ];
    for (field, value) in non_negative {
        if let Some(value) = value {
            ensure!(value >= 0.0, NegativeSnafu { field, value });
        }
    }

    for (field, value) in [
        ("state_of_charge_start_percent", s.state_of_charge_start_percent),
        ("state_of_charge_end_percent", s.state_of_charge_end_percent),
    ] {
        ensure!((0.0..=100.0).contains(&value), PercentSnafu { field, value });
    }

    ensure!(
        s.temperature_celsius.is_finite(),
        NotFiniteSnafu {
            field: "temperature_celsius"
        }
    );

    ensure!(s.charging_end_time > s.charging_start_time, EndBeforeStartSnafu);

    if strictness == Strictness::Create {
        ensure!(
            s.state_of_charge_end_percent > s.state_of_charge_start_percent,
            ChargeNotIncreasingSnafu
        );
    }

    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum InvalidSession {
    #[snafu(display("{field} must not be empty"))]
    Blank { field: &'static str },

    #[snafu(display("{field} must be greater than 0 (got {value})"))]
    NotPositive { field: &'static str, value: f64 },

    #[snafu(display("{field} must not be negative (got {value})"))]
    Negative { field: &'static str, value: f64 },

    #[snafu(display("{field} must be between 0 and 100 (got {value})"))]
    Percent { field: &'static str, value: f64 },

    #[snafu(display("{field} must be a finite number"))]
    NotFinite { field: &'static str },

    #[snafu(display("charging_end_time must be after charging_start_time"))]
    EndBeforeStart,

    #[snafu(display(
        "state_of_charge_end_percent must be greater than state_of_charge_start_percent"
    ))]
    ChargeNotIncreasing,
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum RowError {
    #[snafu(display("missing value for {column}"))]
    Missing { column: &'static str },

    #[snafu(display("{column} is not a number: {value:?}"))]
    Number { column: &'static str, value: String },

    #[snafu(display("{column} is not a valid date: {value:?}"))]
    Timestamp { column: &'static str, value: String },

    #[snafu(transparent)]
    Invalid { source: InvalidSession },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    /// 1-based position among the data rows.
    pub row: usize,
    pub reason: String,
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.reason)
    }
}

#[derive(Debug, Default)]
pub struct Converted {
    pub sessions: Vec<NewChargingSession>,
    pub failures: Vec<RowFailure>,
}

/// Turns every row into a new session; rows that cannot be converted are
/// reported instead of aborting the batch.
pub fn convert(table: &Table) -> Converted {
    let mut converted = Converted::default();

    for (i, row) in table.rows().enumerate() {
        match convert_row(&row) {
            Ok(session) => converted.sessions.push(session),
            Err(e) => converted.failures.push(RowFailure {
                row: i + 1,
                reason: e.to_string(),
            }),
        }
    }

    converted
}

fn convert_row(row: &Row<'_>) -> Result<NewChargingSession, RowError> {
    let charging_start_time = row.timestamp("charging_start_time")?;
    let charging_end_time = row.timestamp("charging_end_time")?;

    // Known spellings are normalized, anything else is kept as written
    let time_of_day = match row.get("time_of_day") {
        Some(t) => t
            .parse::<TimeOfDay>()
            .map_or_else(|_| t.to_owned(), |t| t.to_string()),
        None => TimeOfDay::of(charging_start_time).to_string(),
    };
    let day_of_week = match row.get("day_of_week") {
        Some(d) => categories::weekday_from_name(d)
            .map_or_else(|| d.to_owned(), |day| categories::weekday_name(day).to_owned()),
        None => day_name_of(charging_start_time).to_owned(),
    };

    let session = NewChargingSession {
        user_id: row.text("user_id")?,
        vehicle_model: row.text("vehicle_model")?,
        battery_capacity_kwh: KilowattHours(row.number("battery_capacity_kwh")?),
        charging_station_id: row.text("charging_station_id")?,
        charging_station_location: row.text("charging_station_location")?,
        charging_start_time,
        charging_end_time,
        energy_consumed_kwh: row.recorded_number("energy_consumed_kwh")?.map(KilowattHours),
        charging_duration_hours: row.number("charging_duration_hours")?,
        charging_rate_kw: row.recorded_number("charging_rate_kw")?,
        charging_cost_usd: Usd(row.number("charging_cost_usd")?),
        time_of_day,
        day_of_week,
        state_of_charge_start_percent: row.number("state_of_charge_start_percent")?,
        state_of_charge_end_percent: row.number("state_of_charge_end_percent")?,
        distance_driven_km: row.recorded_number("distance_driven_km")?,
        temperature_celsius: row.number("temperature_celsius")?,
        vehicle_age_years: row.number("vehicle_age_years")?,
        charger_type: row.text("charger_type")?,
        user_type: row.text("user_type")?,
    };

    check_session(&session, Strictness::Upload)?;

    Ok(session)
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    const HEADER: &str = "user_id,vehicle_model,battery_capacity_kwh,charging_station_id,\
charging_station_location,charging_start_time,charging_end_time,energy_consumed_kwh,\
charging_duration_hours,charging_rate_kw,charging_cost_usd,time_of_day,day_of_week,\
state_of_charge_start_percent,state_of_charge_end_percent,distance_driven_km,\
temperature_celsius,vehicle_age_years,charger_type,user_type";

    fn csv(rows: &[&str]) -> Vec<u8> {
        let mut s = String::from(HEADER);
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s.into_bytes()
    }

    const GOOD_ROW: &str = "User_1,Tesla Model 3,75,Station_1,Houston,2024-01-01 08:00:00,\
2024-01-01 09:30:00,40.5,1.5,27,13.2,Morning,Monday,20,75,120,18.5,2,Level 2,Commuter";

    #[test]
    fn well_formed_file_is_valid() {
        let table = Table::parse(&csv(&[GOOD_ROW, GOOD_ROW])).unwrap();
        let report = validate("sessions.csv", &table);

        assert!(report.is_valid, "{report:?}");
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.total_columns, 20);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.missing_values["energy_consumed_kwh"], 0);
        assert_eq!(report.data_types["battery_capacity_kwh"], ColumnType::Int64);
        assert_eq!(report.data_types["energy_consumed_kwh"], ColumnType::Float64);
        assert_eq!(report.data_types["user_id"], ColumnType::Object);
    }

    #[test]
    fn missing_required_columns_are_errors() {
        let table = Table::parse(b"user_id,vehicle_model\nu,m\n").unwrap();
        let report = validate("x.csv", &table);

        assert!(!report.is_valid);
        assert_eq!(
            report.validation_errors,
            [
                "Missing required columns: battery_capacity_kwh, charging_station_id, \
                 charging_station_location, charging_start_time, charging_end_time"
            ],
        );
    }

    #[test]
    fn negative_values_are_warnings_and_bad_dates_are_errors() {
        let negative = GOOD_ROW.replace(",13.2,", ",-1,");
        let bad_date = GOOD_ROW.replace("2024-01-01 08:00:00", "yesterday");
        let table = Table::parse(&csv(&[&negative, &bad_date])).unwrap();
        let report = validate("x.csv", &table);

        assert!(!report.is_valid);
        assert_eq!(
            report.validation_errors,
            ["Invalid date format in charging_start_time"],
        );
        assert!(report
            .warnings
            .contains(&"Negative values found in charging_cost_usd".to_owned()));
    }

    #[test]
    fn missing_cells_are_counted_and_change_the_inferred_type() {
        let missing = GOOD_ROW.replace(",75,Station_1", ",,Station_1");
        let table = Table::parse(&csv(&[GOOD_ROW, &missing])).unwrap();
        let report = validate("x.csv", &table);

        assert_eq!(report.missing_values["battery_capacity_kwh"], 1);
        assert_eq!(report.data_types["battery_capacity_kwh"], ColumnType::Float64);
    }

    #[test]
    fn column_types_follow_dataframe_conventions() {
        let infer = |cells: &[Option<&str>]| ColumnType::infer(cells.iter().copied());

        assert_eq!(infer(&[Some("1"), Some("2")]), ColumnType::Int64);
        assert_eq!(infer(&[Some("1"), None]), ColumnType::Float64);
        assert_eq!(infer(&[Some("1.5"), Some("2")]), ColumnType::Float64);
        assert_eq!(infer(&[None, None]), ColumnType::Float64);
        assert_eq!(infer(&[Some("True"), Some("False")]), ColumnType::Bool);
        assert_eq!(infer(&[Some("True"), None]), ColumnType::Object);
        assert_eq!(infer(&[Some("a"), Some("1")]), ColumnType::Object);
        assert_eq!(ColumnType::Float64.to_string(), "float64");
    }

    #[test]
    fn dataset_headers_are_normalized() {
        let data = "User ID,Battery Capacity (kWh),State of Charge (Start %),Temperature (°C),other\n\
                    u,60,10,5,x\n";
        let table = Table::parse(data.as_bytes()).unwrap();

        assert_eq!(
            table.columns(),
            [
                "user_id",
                "battery_capacity_kwh",
                "state_of_charge_start_percent",
                "temperature_celsius",
                "other"
            ],
        );
    }

    #[test]
    fn duplicate_and_ragged_files_are_rejected() {
        let err = Table::parse(b"user_id,User ID\na,b\n").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateColumn { .. }), "{err:?}");

        let err = Table::parse(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, ParseError::Csv { .. }), "{err:?}");
    }

    #[test]
    fn rows_convert_into_sessions() {
        let table = Table::parse(&csv(&[GOOD_ROW])).unwrap();
        let converted = convert(&table);

        assert!(converted.failures.is_empty(), "{:?}", converted.failures);
        let s = &converted.sessions[0];
        assert_eq!(s.user_id, "User_1");
        assert_eq!(s.battery_capacity_kwh, KilowattHours(75.0));
        assert_eq!(s.energy_consumed_kwh, Some(KilowattHours(40.5)));
        assert_eq!(
            s.charging_start_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(s.charging_cost_usd, Usd(13.2));
    }

    #[test]
    fn zero_optional_readings_are_not_recorded() {
        let row = GOOD_ROW.replace(",40.5,1.5,27,", ",0,1.5,,");
        let table = Table::parse(&csv(&[&row])).unwrap();
        let converted = convert(&table);

        let s = &converted.sessions[0];
        assert_eq!(s.energy_consumed_kwh, None);
        assert_eq!(s.charging_rate_kw, None);
    }

    #[test]
    fn time_of_day_and_weekday_are_derived_when_absent() {
        let data = "user_id,vehicle_model,battery_capacity_kwh,charging_station_id,\
charging_station_location,charging_start_time,charging_end_time,charging_duration_hours,\
charging_cost_usd,state_of_charge_start_percent,state_of_charge_end_percent,\
temperature_celsius,vehicle_age_years,charger_type,user_type\n\
u,Nissan Leaf,40,S1,Chicago,2024-01-06T19:15:00Z,2024-01-06T20:15:00Z,1,5,30,80,10,1,Level 2,Casual Driver\n";
        let table = Table::parse(data.as_bytes()).unwrap();
        let converted = convert(&table);

        let s = &converted.sessions[0];
        assert_eq!(s.time_of_day, "Evening");
        assert_eq!(s.day_of_week, "Saturday");
    }

    #[test]
    fn known_category_spellings_are_normalized() {
        let data = "user_id,vehicle_model,battery_capacity_kwh,charging_station_id,\
charging_station_location,charging_start_time,charging_end_time,charging_duration_hours,\
charging_cost_usd,time_of_day,day_of_week,state_of_charge_start_percent,\
state_of_charge_end_percent,temperature_celsius,vehicle_age_years,charger_type,user_type\n\
u,Nissan Leaf,40,S1,Chicago,2024-01-06T19:15:00Z,2024-01-06T20:15:00Z,1,5,evening,sunday,30,80,10,1,Level 2,Casual Driver\n\
u,Nissan Leaf,40,S1,Chicago,2024-01-06T19:15:00Z,2024-01-06T20:15:00Z,1,5,Dusk,Someday,30,80,10,1,Level 2,Casual Driver\n";
        let table = Table::parse(data.as_bytes()).unwrap();
        let converted = convert(&table);

        let s = &converted.sessions[0];
        assert_eq!(s.time_of_day, "Evening");
        assert_eq!(s.day_of_week, "Sunday");

        let s = &converted.sessions[1];
        assert_eq!(s.time_of_day, "Dusk");
        assert_eq!(s.day_of_week, "Someday");
    }

    #[test]
    fn bad_rows_are_reported_with_their_position() {
        let bad_soc = GOOD_ROW.replace(",20,75,", ",20,175,");
        let bad_number = GOOD_ROW.replace(",75,Station_1", ",lots,Station_1");
        let table = Table::parse(&csv(&[GOOD_ROW, &bad_soc, &bad_number])).unwrap();
        let converted = convert(&table);

        assert_eq!(converted.sessions.len(), 1);
        assert_eq!(converted.failures.len(), 2);
        assert_eq!(converted.failures[0].row, 2);
        assert!(converted.failures[0]
            .reason
            .contains("state_of_charge_end_percent must be between 0 and 100"));
        assert_eq!(
            converted.failures[1].to_string(),
            "row 3: battery_capacity_kwh is not a number: \"lots\"",
        );
    }

    #[test]
    fn creation_requires_charge_to_increase() {
        let table = Table::parse(&csv(&[GOOD_ROW])).unwrap();
        let mut session = convert(&table).sessions.remove(0);
        session.state_of_charge_end_percent = 10.0;

        assert!(check_session(&session, Strictness::Upload).is_ok());
        let err = check_session(&session, Strictness::Create).unwrap_err();
        assert!(matches!(err, InvalidSession::ChargeNotIncreasing), "{err:?}");
    }

    #[test]
    fn timestamps_accept_common_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();

        for v in [
            "2024-03-05 14:30:00",
            "2024-03-05T14:30:00",
            "2024-03-05T14:30:00Z",
            "2024-03-05T16:30:00+02:00",
            "2024-03-05 14:30",
            "03/05/2024 14:30",
        ] {
            assert_eq!(parse_timestamp(v), Some(expected), "{v}");
        }

        assert_eq!(
            parse_timestamp("2024-03-05"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
