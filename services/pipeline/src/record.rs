//! Strike records and ingestion counters shared by the ingest and API services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A strike recovered from a feed frame that passed validation.
///
/// This is the write-side shape: the store assigns `id` and `inserted_at`
/// when it becomes a [`StrikeRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStrike {
    /// Raw time value as sent upstream (seconds, milliseconds or microseconds)
    pub time: i64,
    /// UTC instant derived from `time`
    pub timestamp: DateTime<Utc>,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees, after decimal-point repair
    pub lon: f64,
    /// Altitude
    pub alt: Option<i32>,
    /// Polarity token
    pub pol: Option<String>,
    /// Opaque upstream value
    pub mds: Option<i32>,
    /// Opaque upstream value
    pub mcg: Option<i32>,
}

/// A persisted strike row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StrikeRecord {
    pub id: i64,
    pub strike_time: i64,
    pub strike_timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<i32>,
    pub polarity: Option<String>,
    pub mds: Option<i32>,
    pub mcg: Option<i32>,
    pub inserted_at: DateTime<Utc>,
}

/// Singleton ingestion counters row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IngestionStats {
    pub total_received: i64,
    pub total_stored: i64,
    pub total_failed: i64,
    pub last_strike_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionStats {
    /// Percentage of received frames that were stored, rounded to two decimals.
    ///
    /// Zero when nothing has been received yet.
    pub fn success_rate(&self) -> f64 {
        success_rate(self.total_received, self.total_stored)
    }
}

/// `stored / received * 100`, rounded to two decimals; `0.0` when `received` is 0.
pub fn success_rate(received: i64, stored: i64) -> f64 {
    if received <= 0 {
        return 0.0;
    }
    let rate = stored as f64 / received as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Increment applied atomically to the ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionDelta {
    pub received: i64,
    pub stored: i64,
    pub failed: i64,
}

impl IngestionDelta {
    /// One frame received and persisted.
    pub fn stored() -> Self {
        Self {
            received: 1,
            stored: 1,
            failed: 0,
        }
    }

    /// One frame received and dropped.
    pub fn failed() -> Self {
        Self {
            received: 1,
            stored: 0,
            failed: 1,
        }
    }
}

/// Aggregate over stored strikes in a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StrikeStats {
    pub total_strikes: i64,
    pub time_range_start: Option<DateTime<Utc>>,
    pub time_range_end: Option<DateTime<Utc>>,
    pub avg_latitude: Option<f64>,
    pub avg_longitude: Option<f64>,
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Inclusive time bounds; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }

    /// Window covering the last `minutes` up to now.
    pub fn last_minutes(minutes: i64) -> Self {
        Self {
            since: Some(Utc::now() - chrono::Duration::minutes(minutes)),
            until: None,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| instant >= since)
            && self.until.map_or(true, |until| instant <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_without_frames() {
        assert_eq!(success_rate(0, 0), 0.0);
    }

    #[test]
    fn test_success_rate_rounding() {
        assert_eq!(success_rate(10, 7), 70.0);
        assert_eq!(success_rate(3, 1), 33.33);
    }

    #[test]
    fn test_ingestion_stats_success_rate() {
        let stats = IngestionStats {
            total_received: 10,
            total_stored: 7,
            total_failed: 3,
            last_strike_time: None,
            updated_at: Utc::now(),
        };
        assert_eq!(stats.success_rate(), 70.0);
    }

    #[test]
    fn test_deltas() {
        assert_eq!(IngestionDelta::stored().received, 1);
        assert_eq!(IngestionDelta::stored().failed, 0);
        assert_eq!(IngestionDelta::failed().stored, 0);
        assert_eq!(IngestionDelta::failed().failed, 1);
    }

    #[test]
    fn test_time_window_bounds_are_inclusive() {
        let now = Utc::now();
        let window = TimeWindow::new(Some(now), Some(now));
        assert!(window.contains(now));
        assert!(!window.contains(now + chrono::Duration::seconds(1)));
        assert!(TimeWindow::default().contains(now));
    }
}
