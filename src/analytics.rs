use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    categories::{self, MONTH_NAMES, WEEKDAYS},
    db::ChargingSession,
};

/// Sessions a location must see to count as fully utilized.
const FULL_UTILIZATION_SESSIONS: f64 = 1000.0;
const PEAK_HOUR_LIMIT: usize = 10;
const LOCATION_PATTERN_LIMIT: usize = 10;

const NO_SESSIONS: &str = "No sessions in the selected period";

#[derive(Debug, Default)]
struct Tally {
    sessions: usize,
    duration_hours: f64,
    cost_usd: f64,
    energy_kwh: f64,
    sessions_with_energy: usize,
    /// Cost of the sessions that recorded their energy.
    metered_cost_usd: f64,
}

impl Tally {
    fn add(&mut self, s: &ChargingSession) {
        self.sessions += 1;
        self.duration_hours += s.charging_duration_hours;
        self.cost_usd += s.charging_cost_usd.0;
        if let Some(energy) = s.energy_consumed_kwh {
            self.energy_kwh += energy.0;
            self.sessions_with_energy += 1;
            self.metered_cost_usd += s.charging_cost_usd.0;
        }
    }

    fn avg_duration(&self) -> f64 {
        ratio(self.duration_hours, self.sessions as f64)
    }

    fn avg_cost(&self) -> f64 {
        ratio(self.cost_usd, self.sessions as f64)
    }

    fn avg_energy(&self) -> f64 {
        ratio(self.energy_kwh, self.sessions_with_energy as f64)
    }

    fn cost_per_kwh(&self) -> Option<f64> {
        (self.energy_kwh > 0.0).then(|| self.metered_cost_usd / self.energy_kwh)
    }
}

fn ratio(total: f64, n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        total / n
    }
}

fn tally_by<K: Ord>(
    sessions: &[ChargingSession],
    key: impl Fn(&ChargingSession) -> K,
) -> BTreeMap<K, Tally> {
    let mut tallies = BTreeMap::<K, Tally>::new();
    for s in sessions {
        tallies.entry(key(s)).or_default().add(s);
    }
    tallies
}

fn total(sessions: &[ChargingSession]) -> Tally {
    let mut tally = Tally::default();
    for s in sessions {
        tally.add(s);
    }
    tally
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingMetrics {
    pub total_sessions: usize,
    pub total_energy_kwh: f64,
    pub total_cost_usd: f64,
    pub avg_duration_hours: f64,
    pub avg_cost_per_session: f64,
    pub avg_energy_per_session: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationMetrics {
    pub location: String,
    pub session_count: usize,
    pub total_energy_kwh: f64,
    pub avg_cost_usd: f64,
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub label: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakHour {
    pub hour: u32,
    pub session_count: usize,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsOverview {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub overall_metrics: ChargingMetrics,
    pub location_breakdown: Vec<LocationMetrics>,
    pub daily_trends: Vec<TimeSeriesPoint>,
    pub peak_hours: Vec<PeakHour>,
    pub user_type_distribution: BTreeMap<String, usize>,
    pub charger_type_usage: BTreeMap<String, usize>,
}

/// Summarizes sessions that already lie within `[period_start, period_end]`.
pub fn overview(
    sessions: &[ChargingSession],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> AnalyticsOverview {
    let overall = total(sessions);
    let overall_metrics = ChargingMetrics {
        total_sessions: overall.sessions,
        total_energy_kwh: overall.energy_kwh,
        total_cost_usd: overall.cost_usd,
        avg_duration_hours: overall.avg_duration(),
        avg_cost_per_session: overall.avg_cost(),
        avg_energy_per_session: overall.avg_energy(),
    };

    let mut location_breakdown: Vec<_> = tally_by(sessions, |s| s.charging_station_location.clone())
        .into_iter()
        .map(|(location, t)| LocationMetrics {
            location,
            session_count: t.sessions,
            total_energy_kwh: t.energy_kwh,
            avg_cost_usd: t.avg_cost(),
            utilization_rate: (t.sessions as f64 / FULL_UTILIZATION_SESSIONS).min(1.0),
        })
        .collect();
    location_breakdown.sort_by(|a, b| b.session_count.cmp(&a.session_count));

    let daily_trends = tally_by(sessions, |s| s.charging_start_time.date_naive())
        .into_iter()
        .map(|(date, t)| TimeSeriesPoint {
            timestamp: midnight(date),
            value: t.sessions as f64,
            label: Some("sessions"),
        })
        .collect();

    let mut peak_hours: Vec<_> = tally_by(sessions, |s| s.charging_start_time.hour())
        .into_iter()
        .map(|(hour, t)| PeakHour {
            hour,
            session_count: t.sessions,
            avg_cost: t.avg_cost(),
        })
        .collect();
    peak_hours.sort_by(|a, b| b.session_count.cmp(&a.session_count));
    peak_hours.truncate(PEAK_HOUR_LIMIT);

    AnalyticsOverview {
        period_start,
        period_end,
        overall_metrics,
        location_breakdown,
        daily_trends,
        peak_hours,
        user_type_distribution: counts(sessions, |s| &s.user_type),
        charger_type_usage: counts(sessions, |s| &s.charger_type),
    }
}

fn counts(
    sessions: &[ChargingSession],
    key: impl Fn(&ChargingSession) -> &String,
) -> BTreeMap<String, usize> {
    tally_by(sessions, |s| key(s).clone())
        .into_iter()
        .map(|(k, t)| (k, t.sessions))
        .collect()
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternData<T> {
    pub pattern_type: &'static str,
    pub data: Vec<T>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyPattern {
    pub hour: u32,
    pub session_count: usize,
    pub avg_duration: f64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPattern {
    pub day: String,
    pub session_count: usize,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalPattern {
    pub month: u32,
    pub month_name: &'static str,
    pub session_count: usize,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserBehaviorPattern {
    pub user_type: String,
    pub session_count: usize,
    pub avg_duration: f64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationPattern {
    pub location: String,
    pub session_count: usize,
    pub avg_duration: f64,
    pub unique_users: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingPatterns {
    pub hourly_patterns: PatternData<HourlyPattern>,
    pub daily_patterns: PatternData<DailyPattern>,
    pub seasonal_patterns: PatternData<SeasonalPattern>,
    pub user_behavior_patterns: PatternData<UserBehaviorPattern>,
    pub location_patterns: PatternData<LocationPattern>,
}

pub fn patterns(sessions: &[ChargingSession]) -> ChargingPatterns {
    ChargingPatterns {
        hourly_patterns: hourly_patterns(sessions),
        daily_patterns: daily_patterns(sessions),
        seasonal_patterns: seasonal_patterns(sessions),
        user_behavior_patterns: user_behavior_patterns(sessions),
        location_patterns: location_patterns(sessions),
    }
}

/// The entry with the largest key; ties go to the earliest entry.
fn largest_by<T, K: PartialOrd>(items: &[T], key: impl Fn(&T) -> K) -> Option<&T> {
    items.iter().fold(None, |best, item| match best {
        Some(b) if key(b) >= key(item) => Some(b),
        _ => Some(item),
    })
}

fn share(part: usize, whole: usize) -> f64 {
    ratio(part as f64 * 100.0, whole as f64)
}

fn hourly_patterns(sessions: &[ChargingSession]) -> PatternData<HourlyPattern> {
    let data: Vec<_> = tally_by(sessions, |s| s.charging_start_time.hour())
        .into_iter()
        .map(|(hour, t)| HourlyPattern {
            hour,
            session_count: t.sessions,
            avg_duration: t.avg_duration(),
            avg_cost: t.avg_cost(),
        })
        .collect();

    let within = |hours: std::ops::RangeInclusive<u32>| {
        data.iter()
            .filter(|d| hours.contains(&d.hour))
            .map(|d| d.session_count)
            .sum::<usize>()
    };
    let morning = share(within(6..=9), sessions.len());
    let evening = share(within(17..=20), sessions.len());

    let insights = match largest_by(&data, |d| d.session_count) {
        Some(peak) => vec![
            format!("Peak usage occurs at {}:00", peak.hour),
            format!("Morning hours (6-9 AM) account for {morning:.1}% of sessions"),
            format!("Evening hours (5-8 PM) account for {evening:.1}% of sessions"),
        ],
        None => vec![NO_SESSIONS.to_owned()],
    };

    PatternData {
        pattern_type: "hourly",
        data,
        insights,
    }
}

fn daily_patterns(sessions: &[ChargingSession]) -> PatternData<DailyPattern> {
    let tallies = tally_by(sessions, |s| s.charging_start_time.weekday().num_days_from_monday());

    let data: Vec<_> = tallies
        .iter()
        .map(|(&day, t)| DailyPattern {
            day: categories::weekday_name(WEEKDAYS[day as usize]).to_owned(),
            session_count: t.sessions,
            avg_duration: t.avg_duration(),
        })
        .collect();

    let mut insights = vec![];
    if let Some(busiest) = largest_by(&data, |d| d.session_count) {
        insights.push(format!("{} is the busiest charging day", busiest.day));

        let (mut weekday, mut weekend) = (Tally::default(), Tally::default());
        for s in sessions {
            if categories::is_weekend(s.charging_start_time.weekday()) {
                weekend.add(s);
            } else {
                weekday.add(s);
            }
        }
        let distinct_days = |weekend_days: bool| {
            sessions
                .iter()
                .map(|s| s.charging_start_time.date_naive())
                .filter(|d| categories::is_weekend(d.weekday()) == weekend_days)
                .collect::<BTreeSet<_>>()
                .len() as f64
        };

        insights.push(format!(
            "Weekdays average {:.1} sessions per day versus {:.1} on weekends",
            ratio(weekday.sessions as f64, distinct_days(false)),
            ratio(weekend.sessions as f64, distinct_days(true)),
        ));
        insights.push(format!(
            "Weekend sessions last {:.2} hours on average versus {:.2} on weekdays",
            weekend.avg_duration(),
            weekday.avg_duration(),
        ));
    } else {
        insights.push(NO_SESSIONS.to_owned());
    }

    PatternData {
        pattern_type: "daily",
        data,
        insights,
    }
}

fn seasonal_patterns(sessions: &[ChargingSession]) -> PatternData<SeasonalPattern> {
    let data: Vec<_> = tally_by(sessions, |s| s.charging_start_time.month())
        .into_iter()
        .map(|(month, t)| SeasonalPattern {
            month,
            month_name: MONTH_NAMES[month as usize - 1],
            session_count: t.sessions,
            avg_duration: t.avg_duration(),
        })
        .collect();

    let mut insights = vec![];
    if let Some(busiest) = largest_by(&data, |d| d.session_count) {
        insights.push(format!("{} has the most sessions", busiest.month_name));
    }
    if let Some(longest) = largest_by(&data, |d| d.avg_duration) {
        insights.push(format!(
            "{} has the longest average charging duration ({:.2} hours)",
            longest.month_name, longest.avg_duration,
        ));
    }
    if insights.is_empty() {
        insights.push(NO_SESSIONS.to_owned());
    }

    PatternData {
        pattern_type: "seasonal",
        data,
        insights,
    }
}

fn user_behavior_patterns(sessions: &[ChargingSession]) -> PatternData<UserBehaviorPattern> {
    let data: Vec<_> = tally_by(sessions, |s| s.user_type.clone())
        .into_iter()
        .map(|(user_type, t)| UserBehaviorPattern {
            user_type,
            session_count: t.sessions,
            avg_duration: t.avg_duration(),
            avg_cost: t.avg_cost(),
        })
        .collect();

    let mut insights = vec![];
    if let Some(d) = largest_by(&data, |d| d.session_count) {
        insights.push(format!(
            "{} users charge most often ({} sessions)",
            d.user_type, d.session_count
        ));
    }
    if let Some(d) = largest_by(&data, |d| d.avg_cost) {
        insights.push(format!(
            "{} sessions have the highest average cost (${:.2})",
            d.user_type, d.avg_cost
        ));
    }
    if let Some(d) = largest_by(&data, |d| d.avg_duration) {
        insights.push(format!(
            "{} sessions last longest on average ({:.2} hours)",
            d.user_type, d.avg_duration
        ));
    }
    if insights.is_empty() {
        insights.push(NO_SESSIONS.to_owned());
    }

    PatternData {
        pattern_type: "user_behavior",
        data,
        insights,
    }
}

fn location_patterns(sessions: &[ChargingSession]) -> PatternData<LocationPattern> {
    let mut users = BTreeMap::<&str, BTreeSet<&str>>::new();
    for s in sessions {
        users
            .entry(&s.charging_station_location)
            .or_default()
            .insert(&s.user_id);
    }

    let mut data: Vec<_> = tally_by(sessions, |s| s.charging_station_location.clone())
        .into_iter()
        .map(|(location, t)| {
            let unique_users = users.get(&*location).map_or(0, BTreeSet::len);
            LocationPattern {
                location,
                session_count: t.sessions,
                avg_duration: t.avg_duration(),
                unique_users,
            }
        })
        .collect();
    data.sort_by(|a, b| b.session_count.cmp(&a.session_count));
    data.truncate(LOCATION_PATTERN_LIMIT);

    let mut insights = vec![];
    if let Some(d) = data.first() {
        insights.push(format!(
            "{} is the busiest location with {} sessions",
            d.location, d.session_count
        ));
    }
    if let Some(d) = largest_by(&data, |d| d.unique_users) {
        insights.push(format!(
            "{} serves the most distinct users ({})",
            d.location, d.unique_users
        ));
    }
    if let Some(d) = largest_by(&data, |d| d.avg_duration) {
        insights.push(format!(
            "{} has the longest average session ({:.2} hours)",
            d.location, d.avg_duration
        ));
    }
    if insights.is_empty() {
        insights.push(NO_SESSIONS.to_owned());
    }

    PatternData {
        pattern_type: "location",
        data,
        insights,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub category: String,
    pub amount: f64,
    pub percentage: f64,
    pub sessions: usize,
    pub cost_per_kwh: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostAnalysis {
    pub total_cost: f64,
    pub avg_cost_per_kwh: f64,
    pub cost_by_location: Vec<CostBreakdown>,
    pub cost_by_charger_type: Vec<CostBreakdown>,
    pub cost_by_time_of_day: Vec<CostBreakdown>,
    pub cost_trends: Vec<TimeSeriesPoint>,
    pub cost_optimization_suggestions: Vec<String>,
}

pub fn costs(sessions: &[ChargingSession]) -> CostAnalysis {
    let overall = total(sessions);

    let cost_by_location = breakdown(sessions, overall.cost_usd, |s| &s.charging_station_location);
    let cost_by_charger_type = breakdown(sessions, overall.cost_usd, |s| &s.charger_type);
    let cost_by_time_of_day = breakdown(sessions, overall.cost_usd, |s| &s.time_of_day);

    let cost_trends = tally_by(sessions, |s| s.charging_start_time.date_naive())
        .into_iter()
        .map(|(date, t)| TimeSeriesPoint {
            timestamp: midnight(date),
            value: t.cost_usd,
            label: Some("cost_usd"),
        })
        .collect();

    let cost_optimization_suggestions =
        cost_suggestions(&cost_by_location, &cost_by_charger_type, &cost_by_time_of_day);

    CostAnalysis {
        total_cost: overall.cost_usd,
        avg_cost_per_kwh: overall.cost_per_kwh().unwrap_or(0.0),
        cost_by_location,
        cost_by_charger_type,
        cost_by_time_of_day,
        cost_trends,
        cost_optimization_suggestions,
    }
}

fn breakdown(
    sessions: &[ChargingSession],
    total_cost: f64,
    key: impl Fn(&ChargingSession) -> &String,
) -> Vec<CostBreakdown> {
    let mut rows: Vec<_> = tally_by(sessions, |s| key(s).clone())
        .into_iter()
        .map(|(category, t)| CostBreakdown {
            category,
            amount: t.cost_usd,
            percentage: ratio(t.cost_usd * 100.0, total_cost),
            sessions: t.sessions,
            cost_per_kwh: t.cost_per_kwh(),
        })
        .collect();
    rows.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    rows
}

/// The breakdown rows with the lowest and highest price per kWh.
fn price_extremes(rows: &[CostBreakdown]) -> Option<((&str, f64), (&str, f64))> {
    let mut priced = rows
        .iter()
        .filter_map(|r| Some((&*r.category, r.cost_per_kwh?)))
        .collect::<Vec<_>>();
    priced.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    match (priced.first(), priced.last()) {
        (Some(&cheap), Some(&dear)) if priced.len() > 1 && dear.1 > cheap.1 => Some((cheap, dear)),
        _ => None,
    }
}

fn cost_suggestions(
    by_location: &[CostBreakdown],
    by_charger_type: &[CostBreakdown],
    by_time_of_day: &[CostBreakdown],
) -> Vec<String> {
    let mut suggestions = vec![];

    if let Some(((cheap, cheap_price), (dear, dear_price))) = price_extremes(by_charger_type) {
        suggestions.push(format!(
            "{dear} sessions cost ${dear_price:.2}/kWh versus ${cheap_price:.2}/kWh on {cheap}; \
             use {cheap} charging when time allows"
        ));
    }

    if let Some(((cheap, cheap_price), (dear, dear_price))) = price_extremes(by_time_of_day) {
        suggestions.push(format!(
            "Charging in the {cheap} costs ${cheap_price:.2}/kWh, compared to \
             ${dear_price:.2}/kWh in the {dear}"
        ));
    }

    if let Some(((cheap, cheap_price), _)) = price_extremes(by_location) {
        suggestions.push(format!(
            "{cheap} offers the lowest average price at ${cheap_price:.2}/kWh"
        ));
    }

    if suggestions.is_empty() {
        suggestions.push("Not enough priced sessions to suggest cost optimizations".to_owned());
    }

    suggestions
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        db::{KilowattHours, Usd},
        quality::test::session,
    };

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        // January 2024 starts on a Monday
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn sample() -> Vec<ChargingSession> {
        let mut a = session(1, at(1, 8));
        let mut b = session(2, at(1, 18));
        let mut c = session(3, at(6, 18));
        let mut d = session(4, at(7, 9));

        a.charging_station_location = "Houston".into();
        b.charging_station_location = "Chicago".into();
        c.charging_station_location = "Chicago".into();
        d.charging_station_location = "Chicago".into();
        d.user_id = c.user_id.clone();

        b.charger_type = "DC Fast Charger".into();
        b.charging_cost_usd = Usd(30.0);
        b.time_of_day = "Evening".into();
        c.time_of_day = "Evening".into();
        c.charging_duration_hours = 3.0;
        d.energy_consumed_kwh = None;
        d.user_type = "Casual Driver".into();

        vec![a, b, c, d]
    }

    #[test]
    fn overview_aggregates_the_period() {
        let sessions = sample();
        let o = overview(&sessions, at(1, 0), at(8, 0));

        let m = &o.overall_metrics;
        assert_eq!(m.total_sessions, 4);
        assert_eq!(m.total_energy_kwh, 90.0);
        assert_eq!(m.total_cost_usd, 60.0);
        assert_eq!(m.avg_duration_hours, 1.5);
        assert_eq!(m.avg_cost_per_session, 15.0);
        assert_eq!(m.avg_energy_per_session, 30.0);

        assert_eq!(o.location_breakdown[0].location, "Chicago");
        assert_eq!(o.location_breakdown[0].session_count, 3);
        assert_eq!(o.location_breakdown[0].utilization_rate, 0.003);

        let days: Vec<_> = o.daily_trends.iter().map(|p| (p.timestamp, p.value)).collect();
        assert_eq!(days, [(at(1, 0), 2.0), (at(6, 0), 1.0), (at(7, 0), 1.0)]);

        assert_eq!(o.peak_hours[0].hour, 18);
        assert_eq!(o.peak_hours[0].session_count, 2);
        assert_eq!(o.peak_hours[0].avg_cost, 20.0);

        assert_eq!(o.user_type_distribution["Commuter"], 3);
        assert_eq!(o.charger_type_usage["DC Fast Charger"], 1);
    }

    #[test]
    fn empty_overview_is_all_zero() {
        let o = overview(&[], at(1, 0), at(2, 0));

        assert_eq!(o.overall_metrics.total_sessions, 0);
        assert_eq!(o.overall_metrics.avg_cost_per_session, 0.0);
        assert!(o.location_breakdown.is_empty());
        assert!(o.peak_hours.is_empty());
    }

    #[test]
    fn peak_hours_are_capped() {
        let sessions: Vec<_> = (0..24).map(|h| session(h.into(), at(2, h))).collect();
        let o = overview(&sessions, at(2, 0), at(3, 0));

        assert_eq!(o.peak_hours.len(), 10);
    }

    #[test]
    fn patterns_describe_the_data() {
        let p = patterns(&sample());

        let hours: Vec<_> = p.hourly_patterns.data.iter().map(|d| d.hour).collect();
        assert_eq!(hours, [8, 9, 18]);
        assert_eq!(p.hourly_patterns.insights[0], "Peak usage occurs at 18:00");
        assert_eq!(
            p.hourly_patterns.insights[1],
            "Morning hours (6-9 AM) account for 50.0% of sessions"
        );

        let days: Vec<_> = p.daily_patterns.data.iter().map(|d| &*d.day).collect();
        assert_eq!(days, ["Monday", "Saturday", "Sunday"]);
        assert_eq!(p.daily_patterns.insights[0], "Monday is the busiest charging day");
        assert_eq!(
            p.daily_patterns.insights[2],
            "Weekend sessions last 2.00 hours on average versus 1.00 on weekdays"
        );

        assert_eq!(p.seasonal_patterns.data[0].month_name, "January");

        let location = &p.location_patterns.data[0];
        assert_eq!(location.location, "Chicago");
        assert_eq!(location.unique_users, 2);
    }

    #[test]
    fn empty_patterns_say_so() {
        let p = patterns(&[]);

        assert_eq!(p.hourly_patterns.insights, [NO_SESSIONS]);
        assert_eq!(p.daily_patterns.insights, [NO_SESSIONS]);
        assert_eq!(p.location_patterns.insights, [NO_SESSIONS]);
    }

    #[test]
    fn costs_break_down_spending() {
        let c = costs(&sample());

        assert_eq!(c.total_cost, 60.0);
        // d has no energy recorded; its cost is left out of the per-kWh price
        assert_eq!(c.avg_cost_per_kwh, 50.0 / 90.0);

        let dc = &c.cost_by_charger_type[0];
        assert_eq!(dc.category, "DC Fast Charger");
        assert_eq!(dc.amount, 30.0);
        assert_eq!(dc.percentage, 50.0);
        assert_eq!(dc.cost_per_kwh, Some(1.0));

        assert_eq!(
            c.cost_optimization_suggestions[0],
            "DC Fast Charger sessions cost $1.00/kWh versus $0.33/kWh on Level 2; \
             use Level 2 charging when time allows"
        );
        assert_eq!(c.cost_trends[0].value, 40.0);
    }

    #[test]
    fn uniform_prices_have_no_suggestions() {
        let sessions = vec![session(1, at(1, 8)), session(2, at(2, 8))];
        let c = costs(&sessions);

        assert_eq!(
            c.cost_optimization_suggestions,
            ["Not enough priced sessions to suggest cost optimizations"]
        );
    }

    #[test]
    fn energy_totals_use_kilowatt_hours() {
        let mut s = session(1, at(1, 8));
        s.energy_consumed_kwh = Some(KilowattHours(12.5));
        let o = overview(&[s], at(1, 0), at(1, 0) + Duration::days(1));

        assert_eq!(o.overall_metrics.total_energy_kwh, 12.5);
    }
}
