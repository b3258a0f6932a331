use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use snafu::prelude::*;
use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::{fs, io::AsyncWriteExt as _};

use crate::db::ChargingSession;

pub(crate) const EXPORTS_DIR: &str = "exports";
pub(crate) const DOWNLOAD_PREFIX: &str = "/api/v1/data/download";

/// Exports started within the same second get numbered names, up to this
/// many.
const MAX_NAME_ATTEMPTS: usize = 100;

/// Column order of exported sessions; matches the fields of
/// [`ChargingSession`].
const EXPORT_COLUMNS: [&str; 23] = [
    "id",
    "user_id",
    "vehicle_model",
    "battery_capacity_kwh",
    "charging_station_id",
    "charging_station_location",
    "charging_start_time",
    "charging_end_time",
    "energy_consumed_kwh",
    "charging_duration_hours",
    "charging_rate_kw",
    "charging_cost_usd",
    "time_of_day",
    "day_of_week",
    "state_of_charge_start_percent",
    "state_of_charge_end_percent",
    "distance_driven_km",
    "temperature_celsius",
    "vehicle_age_years",
    "charger_type",
    "user_type",
    "created_at",
    "updated_at",
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => UnsupportedFormatSnafu { format: s }.fail(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct DataExport {
    pub filename: String,
    pub format: ExportFormat,
    pub record_count: usize,
    pub file_size_bytes: u64,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

fn render(format: ExportFormat, sessions: &[ChargingSession]) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => {
            let mut w = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(vec![]);
            w.write_record(EXPORT_COLUMNS).context(CsvSnafu)?;
            for s in sessions {
                w.serialize(s).context(CsvSnafu)?;
            }
            w.into_inner().map_err(|e| e.into_error()).context(FlushSnafu)
        }

        ExportFormat::Json => serde_json::to_vec(sessions).context(JsonSnafu),
    }
}

/// The end of the export day, after which clients should not rely on the
/// file.
fn expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    now.date_naive().and_time(end_of_day).and_utc()
}

/// Writes `sessions` below `data_path` and describes where to fetch them.
pub(crate) async fn export(
    data_path: &Path,
    format: ExportFormat,
    sessions: &[ChargingSession],
    now: DateTime<Utc>,
) -> Result<DataExport> {
    let stem = format!("charging_data_{}", now.format("%Y%m%d_%H%M%S"));
    let dir = exports_dir(data_path);

    let contents = render(format, sessions)?;

    fs::create_dir_all(&dir)
        .await
        .context(CreateDirSnafu { path: &dir })?;
    let (filename, path, mut file) = create_unique(&dir, &stem, format.extension()).await?;

    file.write_all(&contents)
        .await
        .context(WriteSnafu { path: &path })?;
    file.flush().await.context(WriteSnafu { path: &path })?;

    Ok(DataExport {
        download_url: format!("{DOWNLOAD_PREFIX}/{filename}"),
        filename,
        format,
        record_count: sessions.len(),
        file_size_bytes: contents.len() as u64,
        expires_at: expiry(now),
    })
}

/// Creates `{stem}.{extension}`, or `{stem}_2.{extension}` and so on when
/// an earlier export already took the name.
async fn create_unique(
    dir: &Path,
    stem: &str,
    extension: &str,
) -> Result<(String, PathBuf, fs::File)> {
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let filename = match attempt {
            1 => format!("{stem}.{extension}"),
            n => format!("{stem}_{n}.{extension}"),
        };
        let path = dir.join(&filename);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((filename, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(Error::Write { source, path }),
        }
    }

    NameTakenSnafu { stem }.fail()
}

pub(crate) fn exports_dir(data_path: &Path) -> PathBuf {
    data_path.join(EXPORTS_DIR)
}

#[derive(Debug, Snafu)]
pub(crate) enum Error {
    #[snafu(display("Unsupported format {format:?}; expected csv or json"))]
    UnsupportedFormat { format: String },

    #[snafu(display("Could not write a CSV record"))]
    Csv { source: csv::Error },

    #[snafu(display("Could not finish the CSV output"))]
    Flush { source: std::io::Error },

    #[snafu(display("Could not encode the sessions as JSON"))]
    Json { source: serde_json::Error },

    #[snafu(display("Could not create the export directory {}", path.display()))]
    CreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Could not write the export file {}", path.display()))]
    Write {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Too many exports named {stem} already exist"))]
    NameTaken { stem: String },
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
