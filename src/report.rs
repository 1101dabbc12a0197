//! Daily ride report generation.
//!
//! [`ReportGenerator::generate`] queries the [`RideStore`] for one
//! [`ReportWindow`], validates the rows, aggregates them into a
//! [`ReportSummary`] and renders a self-contained HTML document.
//!
//! An empty window is a valid report ("0 rides"); only an unreachable store
//! or rows that cannot be rendered are errors.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::ReportError;
use crate::models::{ReportArtifact, RideRecord};
use crate::store::RideStore;
use crate::window::ReportWindow;

/// Part of the (local) day a ride started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Night,
        TimeOfDay::Morning,
        TimeOfDay::Afternoon,
        TimeOfDay::Evening,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => TimeOfDay::Night,
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            _ => TimeOfDay::Evening,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Night => "Night (00:00-06:00)",
            TimeOfDay::Morning => "Morning (06:00-12:00)",
            TimeOfDay::Afternoon => "Afternoon (12:00-18:00)",
            TimeOfDay::Evening => "Evening (18:00-24:00)",
        }
    }
}

/// Aggregate statistics for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub ride_count: usize,
    pub total_duration_secs: i64,
    pub longest_ride_secs: i64,
    pub distinct_riders: usize,
    pub distinct_bikes: usize,
    /// Ride counts per time of day; every bucket is present.
    pub by_time_of_day: BTreeMap<TimeOfDay, usize>,
    /// Ride counts per rider gender; `"unknown"` when not recorded.
    pub by_gender: BTreeMap<String, usize>,
    pub mean_heart_rate: Option<f64>,
    pub mean_power: Option<f64>,
}

impl ReportSummary {
    pub fn average_duration_secs(&self) -> i64 {
        if self.ride_count == 0 {
            0
        } else {
            self.total_duration_secs / self.ride_count as i64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ride_count == 0
    }
}

/// Reads one window from the store and renders it.
pub struct ReportGenerator {
    store: Arc<dyn RideStore>,
    query_timeout: Duration,
}

impl ReportGenerator {
    pub fn new(store: Arc<dyn RideStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Produce the report artifact for `window`.
    ///
    /// # Errors
    ///
    /// - [`ReportError::InvalidWindow`] if `start >= end` (no query is made).
    /// - [`ReportError::DataStoreUnavailable`] if the store fails or the
    ///   query exceeds the configured timeout.
    /// - [`ReportError::Render`] if a row is malformed.
    pub async fn generate(&self, window: &ReportWindow) -> Result<ReportArtifact, ReportError> {
        if !window.is_well_formed() {
            return Err(ReportError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }

        let rides = tokio::time::timeout(
            self.query_timeout,
            self.store.rides_between(window.start, window.end),
        )
        .await
        .map_err(|_| {
            ReportError::DataStoreUnavailable(format!(
                "query timed out after {}s",
                self.query_timeout.as_secs_f64()
            ))
        })??;

        debug!(rides = rides.len(), window = %window, "fetched rides");

        let rides = validate(window, rides)?;
        let summary = summarize(window, &rides);
        let generated_at = Utc::now();
        let body = render(window, &summary, &rides, generated_at);

        Ok(ReportArtifact::new(body, *window, summary, generated_at))
    }
}

/// Reject rows that cannot be rendered, and put the rest in a stable order.
fn validate(window: &ReportWindow, mut rides: Vec<RideRecord>) -> Result<Vec<RideRecord>, ReportError> {
    let mut seen = HashSet::with_capacity(rides.len());
    let mut total = 0i64;
    for ride in &rides {
        if !seen.insert(ride.ride_id) {
            return Err(ReportError::Render(format!(
                "duplicate ride id {}",
                ride.ride_id
            )));
        }
        if ride.duration_secs < 0 {
            return Err(ReportError::Render(format!(
                "ride {} has negative duration {}s",
                ride.ride_id, ride.duration_secs
            )));
        }
        total = total.checked_add(ride.duration_secs).ok_or_else(|| {
            ReportError::Render(format!(
                "total ride duration overflows at ride {} ({}s)",
                ride.ride_id, ride.duration_secs
            ))
        })?;
        if !window.contains(ride.started_at) {
            return Err(ReportError::Render(format!(
                "ride {} started at {} outside the report window",
                ride.ride_id, ride.started_at
            )));
        }
        let metrics = [ride.avg_heart_rate, ride.avg_power];
        if metrics.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ReportError::Render(format!(
                "ride {} has a non-finite metric",
                ride.ride_id
            )));
        }
    }

    rides.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then(a.ride_id.cmp(&b.ride_id))
    });
    Ok(rides)
}

pub fn summarize(window: &ReportWindow, rides: &[RideRecord]) -> ReportSummary {
    let mut by_time_of_day: BTreeMap<TimeOfDay, usize> =
        TimeOfDay::ALL.iter().map(|t| (*t, 0)).collect();
    let mut by_gender: BTreeMap<String, usize> = BTreeMap::new();
    let mut riders = HashSet::new();
    let mut bikes = HashSet::new();
    let mut total = 0i64;
    let mut longest = 0i64;

    for ride in rides {
        total = total.saturating_add(ride.duration_secs);
        longest = longest.max(ride.duration_secs);
        riders.insert(ride.rider_id);
        bikes.insert(ride.bike_id);

        let hour = ride.started_at.with_timezone(&window.timezone).hour();
        *by_time_of_day.entry(TimeOfDay::from_hour(hour)).or_insert(0) += 1;

        let gender = ride
            .rider_gender
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or("unknown")
            .to_lowercase();
        *by_gender.entry(gender).or_insert(0) += 1;
    }

    ReportSummary {
        ride_count: rides.len(),
        total_duration_secs: total,
        longest_ride_secs: longest,
        distinct_riders: riders.len(),
        distinct_bikes: bikes.len(),
        by_time_of_day,
        by_gender,
        mean_heart_rate: mean(rides.iter().filter_map(|r| r.avg_heart_rate)),
        mean_power: mean(rides.iter().filter_map(|r| r.avg_power)),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// `3725` → `"1h 2m 5s"`.
pub fn format_duration(secs: i64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

pub fn ride_count_label(n: usize) -> String {
    if n == 1 {
        "1 ride".to_string()
    } else {
        format!("{} rides", n)
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_metric(v: Option<f64>) -> String {
    v.map(|v| format!("{:.1}", v))
        .unwrap_or_else(|| "-".to_string())
}

/// Render the report document. Writes into a `String` never fail, so the
/// `fmt::Result`s are discarded.
pub fn render(
    window: &ReportWindow,
    summary: &ReportSummary,
    rides: &[RideRecord],
    generated_at: DateTime<Utc>,
) -> String {
    let tz = window.timezone;
    let mut html = String::new();
    let title = format!("Daily ride report: {}", window.date);

    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>", title);
    let _ = writeln!(html, "<h1>{}</h1>", title);
    let _ = writeln!(
        html,
        "<p>Window: {} to {} ({})</p>",
        window.start.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
        window.end.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
        tz.name()
    );

    if summary.is_empty() {
        let _ = writeln!(html, "<h2>No activity</h2>");
        let _ = writeln!(
            html,
            "<p><strong>0 rides</strong> were recorded on {}.</p>",
            window.date
        );
    } else {
        let _ = writeln!(html, "<h2>Summary</h2>");
        let _ = writeln!(html, "<ul>");
        let _ = writeln!(
            html,
            "<li><strong>{}</strong></li>",
            ride_count_label(summary.ride_count)
        );
        let _ = writeln!(
            html,
            "<li>Total duration: {} ({}s)</li>",
            format_duration(summary.total_duration_secs),
            summary.total_duration_secs
        );
        let _ = writeln!(
            html,
            "<li>Average duration: {}</li>",
            format_duration(summary.average_duration_secs())
        );
        let _ = writeln!(
            html,
            "<li>Longest ride: {}</li>",
            format_duration(summary.longest_ride_secs)
        );
        let _ = writeln!(html, "<li>Riders: {}</li>", summary.distinct_riders);
        let _ = writeln!(html, "<li>Bikes: {}</li>", summary.distinct_bikes);
        let _ = writeln!(
            html,
            "<li>Mean heart rate: {}</li>",
            format_metric(summary.mean_heart_rate)
        );
        let _ = writeln!(
            html,
            "<li>Mean power: {}</li>",
            format_metric(summary.mean_power)
        );
        let _ = writeln!(html, "</ul>");

        let _ = writeln!(html, "<h2>By time of day</h2>");
        let _ = writeln!(html, "<table><tr><th>Period</th><th>Rides</th></tr>");
        for (period, count) in &summary.by_time_of_day {
            let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", period.label(), count);
        }
        let _ = writeln!(html, "</table>");

        let _ = writeln!(html, "<h2>By gender</h2>");
        let _ = writeln!(html, "<table><tr><th>Gender</th><th>Rides</th></tr>");
        for (gender, count) in &summary.by_gender {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td></tr>",
                escape_html(gender),
                count
            );
        }
        let _ = writeln!(html, "</table>");

        let _ = writeln!(html, "<h2>Rides</h2>");
        let _ = writeln!(
            html,
            "<table><tr><th>Ride</th><th>Start</th><th>Rider</th><th>Bike</th>\
             <th>Duration</th><th>Avg HR</th><th>Avg power</th></tr>"
        );
        for ride in rides {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                ride.ride_id,
                ride.started_at.with_timezone(&tz).format("%H:%M:%S"),
                ride.rider_id,
                ride.bike_id,
                format_duration(ride.duration_secs),
                format_metric(ride.avg_heart_rate),
                format_metric(ride.avg_power)
            );
        }
        let _ = writeln!(html, "</table>");
    }

    let _ = writeln!(
        html,
        "<p><small>Generated at {}</small></p>",
        generated_at.format("%Y-%m-%dT%H:%M:%SZ")
    );
    let _ = writeln!(html, "</body></html>");
    html
}
