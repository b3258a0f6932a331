use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub const ALL: [Self; 4] = [Self::Morning, Self::Afternoon, Self::Evening, Self::Night];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn of(instant: DateTime<Utc>) -> Self {
        Self::from_hour(instant.hour())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "Morning",
            Self::Afternoon => "Afternoon",
            Self::Evening => "Evening",
            Self::Night => "Night",
        }
    }

    /// A representative hour for this part of the day.
    pub fn typical_hour(self) -> u32 {
        match self {
            Self::Morning => 8,
            Self::Afternoon => 14,
            Self::Evening => 18,
            Self::Night => 23,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeOfDay {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.into()))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChargerType {
    #[serde(rename = "Level 1")]
    Level1,
    #[serde(rename = "Level 2")]
    Level2,
    #[serde(rename = "DC Fast Charger")]
    DcFast,
}

impl ChargerType {
    #[cfg(feature = "fake-data")]
    pub const ALL: [Self; 3] = [Self::Level1, Self::Level2, Self::DcFast];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Level1 => "Level 1",
            Self::Level2 => "Level 2",
            Self::DcFast => "DC Fast Charger",
        }
    }

    /// Nominal power delivered, in kW.
    #[cfg(feature = "fake-data")]
    pub fn nominal_power_kw(self) -> f64 {
        match self {
            Self::Level1 => 1.9,
            Self::Level2 => 7.2,
            Self::DcFast => 50.0,
        }
    }
}

impl fmt::Display for ChargerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UserType {
    Commuter,
    #[serde(rename = "Casual Driver")]
    CasualDriver,
    #[serde(rename = "Long-Distance Traveler")]
    LongDistanceTraveler,
}

impl UserType {
    #[cfg(feature = "fake-data")]
    pub const ALL: [Self; 3] = [
        Self::Commuter,
        Self::CasualDriver,
        Self::LongDistanceTraveler,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commuter => "Commuter",
            Self::CasualDriver => "Casual Driver",
            Self::LongDistanceTraveler => "Long-Distance Traveler",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown category {:?}", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    let name = name.trim();
    WEEKDAYS
        .into_iter()
        .find(|&d| weekday_name(d).eq_ignore_ascii_case(name))
}

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

pub fn day_name_of(instant: DateTime<Utc>) -> &'static str {
    weekday_name(instant.weekday())
}

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn hours_fall_into_parts_of_the_day() {
        assert_eq!(TimeOfDay::from_hour(4), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Night);

        for t in TimeOfDay::ALL {
            assert_eq!(TimeOfDay::from_hour(t.typical_hour()), t);
        }
    }

    #[test]
    fn categories_use_display_names_on_the_wire() {
        let json = serde_json::to_string(&ChargerType::DcFast).unwrap();
        assert_eq!(json, r#""DC Fast Charger""#);

        let parsed: UserType = serde_json::from_str(r#""Long-Distance Traveler""#).unwrap();
        assert_eq!(parsed, UserType::LongDistanceTraveler);

        assert!(serde_json::from_str::<ChargerType>(r#""Level 3""#).is_err());
        assert_eq!("evening".parse::<TimeOfDay>(), Ok(TimeOfDay::Evening));
    }

    #[test]
    fn weekday_names_round_trip() {
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        assert_eq!(day_name_of(saturday), "Saturday");
        assert!(is_weekend(saturday.weekday()));
        assert_eq!(weekday_from_name("monday"), Some(Weekday::Mon));
        assert_eq!(weekday_from_name("Funday"), None);
    }
}
