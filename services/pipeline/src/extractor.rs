//! Tolerant field extraction from decoded frame text.
//!
//! Decoded frames resemble JSON but are routinely malformed, so each field is
//! located by its own pattern instead of a structural parse. The rules are a
//! table: field, pattern, and how the captured text is post-processed.

use crate::record::NewStrike;
use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::trace;

/// Why a decoded frame produced no candidate record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unparsable value for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

/// Fields the extractor knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Time,
    Lat,
    Lon,
    Alt,
    Pol,
    Mds,
    Mcg,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Time => "time",
            Field::Lat => "lat",
            Field::Lon => "lon",
            Field::Alt => "alt",
            Field::Pol => "pol",
            Field::Mds => "mds",
            Field::Mcg => "mcg",
        }
    }
}

/// Post-processing applied to a field's captured text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Unsigned integer, unit-normalized into an instant
    Timestamp,
    /// Plain float
    Float,
    /// Float passed through [`repair_longitude`]
    RepairedFloat,
    /// Float truncated to an integer
    Integer,
    /// Short text token
    Token,
}

/// One extraction rule.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: Field,
    pub pattern: &'static str,
    pub capture: Capture,
    pub required: bool,
}

/// Field rules, applied independently of each other.
pub const FIELD_RULES: [FieldRule; 7] = [
    FieldRule {
        field: Field::Time,
        pattern: r#"time[":\s]+(\d+)"#,
        capture: Capture::Timestamp,
        required: true,
    },
    FieldRule {
        field: Field::Lat,
        pattern: r#"lat"?[:\s]*([0-9.-]+)"#,
        capture: Capture::Float,
        required: true,
    },
    FieldRule {
        field: Field::Lon,
        pattern: r#"lon"?[:\s]*([0-9.-]+)"#,
        capture: Capture::RepairedFloat,
        required: true,
    },
    FieldRule {
        field: Field::Alt,
        pattern: r#""?alt?"?[:\s]*([0-9.-]+)"#,
        capture: Capture::Integer,
        required: false,
    },
    FieldRule {
        field: Field::Pol,
        pattern: r#"pol"?[:\s]*"?([^"\s,}]+)"?"#,
        capture: Capture::Token,
        required: false,
    },
    FieldRule {
        field: Field::Mds,
        pattern: r#"mds"?[:\s]*([0-9.-]+)"#,
        capture: Capture::Integer,
        required: false,
    },
    FieldRule {
        field: Field::Mcg,
        pattern: r#"mcg"?[:\s]*([0-9.-]+)"#,
        capture: Capture::Integer,
        required: false,
    },
];

/// Width of the polarity column; longer tokens are extraction noise.
pub const MAX_POLARITY_LEN: usize = 50;

/// Polarity captures equal to this are the next key name, not a value.
const POLARITY_COLLISION: &str = "mds";

/// Values above these magnitudes are microseconds / milliseconds.
const MICROS_THRESHOLD: i64 = 1_000_000_000_000_000;
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Compiled [`FIELD_RULES`].
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    rules: Vec<(FieldRule, Regex)>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor {
    pub fn new() -> Self {
        let rules = FIELD_RULES
            .iter()
            .map(|rule| {
                let regex = Regex::new(rule.pattern).expect("field rule patterns are valid");
                (*rule, regex)
            })
            .collect();

        Self { rules }
    }

    /// Extract a candidate record from decoded text.
    ///
    /// Rules run independently; a missing or unparsable required field fails
    /// the whole frame, an optional one is simply absent.
    pub fn extract(&self, text: &str) -> Result<NewStrike, ExtractionError> {
        let mut time = None;
        let mut lat = None;
        let mut lon = None;
        let mut alt = None;
        let mut pol = None;
        let mut mds = None;
        let mut mcg = None;

        for (rule, regex) in &self.rules {
            let raw = regex
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str());

            let value = match raw.map(|raw| apply(rule, raw)) {
                Some(Ok(value)) => Some(value),
                Some(Err(err)) if rule.required => return Err(err),
                None if rule.required => {
                    return Err(ExtractionError::MissingField(rule.field.name()))
                }
                _ => None,
            };

            match (rule.field, value) {
                (Field::Time, Some(Value::Timestamp(raw, instant))) => time = Some((raw, instant)),
                (Field::Lat, Some(Value::Float(v))) => lat = Some(v),
                (Field::Lon, Some(Value::Float(v))) => lon = Some(v),
                (Field::Alt, Some(Value::Integer(v))) => alt = Some(v),
                (Field::Pol, Some(Value::Token(v))) => pol = Some(v),
                (Field::Mds, Some(Value::Integer(v))) => mds = Some(v),
                (Field::Mcg, Some(Value::Integer(v))) => mcg = Some(v),
                _ => {}
            }
        }

        let (time, timestamp) = time.ok_or(ExtractionError::MissingField("time"))?;
        let strike = NewStrike {
            time,
            timestamp,
            lat: lat.ok_or(ExtractionError::MissingField("lat"))?,
            lon: lon.ok_or(ExtractionError::MissingField("lon"))?,
            alt,
            pol,
            mds,
            mcg,
        };

        trace!(?strike, "Fields extracted");
        Ok(strike)
    }
}

/// A captured value after post-processing.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Timestamp(i64, DateTime<Utc>),
    Float(f64),
    Integer(i32),
    Token(String),
}

fn apply(rule: &FieldRule, raw: &str) -> Result<Value, ExtractionError> {
    let invalid = || ExtractionError::InvalidNumber {
        field: rule.field.name(),
        value: raw.to_string(),
    };

    match rule.capture {
        Capture::Timestamp => {
            let value: i64 = raw.parse().map_err(|_| invalid())?;
            let instant =
                normalize_timestamp(value).ok_or(ExtractionError::TimestampOutOfRange(value))?;
            Ok(Value::Timestamp(value, instant))
        }
        Capture::Float => raw.parse().map(Value::Float).map_err(|_| invalid()),
        Capture::RepairedFloat => raw
            .parse()
            .map(|v| Value::Float(repair_longitude(v)))
            .map_err(|_| invalid()),
        Capture::Integer => {
            let value: f64 = raw.parse().map_err(|_| invalid())?;
            let truncated = value.trunc();
            if truncated.is_finite()
                && truncated >= i32::MIN as f64
                && truncated <= i32::MAX as f64
            {
                Ok(Value::Integer(truncated as i32))
            } else {
                Err(invalid())
            }
        }
        Capture::Token => {
            let token = raw.trim();
            if token.is_empty() || token == POLARITY_COLLISION || token.len() > MAX_POLARITY_LEN {
                Err(ExtractionError::MissingField(rule.field.name()))
            } else {
                Ok(Value::Token(token.to_string()))
            }
        }
    }
}

/// Interpret a raw time value by magnitude and convert it to UTC.
///
/// Above 10^15 the value is microseconds, above 10^12 milliseconds, otherwise
/// seconds. `None` if the instant is outside the representable range.
pub fn normalize_timestamp(raw: i64) -> Option<DateTime<Utc>> {
    if raw > MICROS_THRESHOLD {
        DateTime::from_timestamp_micros(raw)
    } else if raw > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

/// Reinsert a decimal point into a longitude that lost it upstream.
///
/// Best-effort heuristic, not guaranteed correct:
/// - `|v| <= 1000` is returned unchanged.
/// - Otherwise take the digits of the integer part of `|v|`. With 7 or 8
///   digits the point goes after the first two (`1604008` → `16.04008`).
/// - With any other digit count, try insertion positions from the left and
///   keep the first value `<= 180`, or the original magnitude if none fits.
///
/// The sign of `v` is reapplied to the result.
pub fn repair_longitude(value: f64) -> f64 {
    if value.abs() <= 1000.0 {
        return value;
    }

    let magnitude = value.abs();
    let digits = format!("{:.0}", magnitude.trunc());

    let corrected = match digits.len() {
        7 | 8 => with_point(&digits, 2).unwrap_or(magnitude),
        len => (1..len)
            .filter_map(|i| with_point(&digits, i))
            .find(|candidate| *candidate <= 180.0)
            .unwrap_or(magnitude),
    };

    if value < 0.0 {
        -corrected
    } else {
        corrected
    }
}

fn with_point(digits: &str, at: usize) -> Option<f64> {
    format!("{}.{}", &digits[..at], &digits[at..]).parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn extractor() -> FieldExtractor {
        FieldExtractor::new()
    }

    #[test]
    fn test_repair_seven_and_eight_digits() {
        assert_eq!(repair_longitude(1604008.0), 16.04008);
        assert_eq!(repair_longitude(-1613330.0), -16.1333);
        assert_eq!(repair_longitude(16040089.0), 16.040089);
    }

    #[test]
    fn test_repair_leaves_small_values() {
        assert_eq!(repair_longitude(45.2), 45.2);
        assert_eq!(repair_longitude(-179.9), -179.9);
        assert_eq!(repair_longitude(1000.0), 1000.0);
    }

    #[test]
    fn test_repair_other_lengths_scans_from_the_left() {
        // Known limitation: the first position always yields a single-digit
        // integer part, which may not be the true longitude.
        assert_eq!(repair_longitude(123456.0), 1.23456);
        assert_eq!(repair_longitude(-1234567890.0), -1.23456789);
    }

    #[test]
    fn test_repair_keeps_every_digit_of_huge_values() {
        assert_eq!(repair_longitude(1e20), 1.0);
        assert_eq!(repair_longitude(-1e20), -1.0);
    }

    #[test]
    fn test_repair_is_a_heuristic_for_three_digit_longitudes() {
        // 123.4567 that lost its point has 7 digits and is repaired as 12.34567.
        assert_eq!(repair_longitude(1234567.0), 12.34567);
    }

    #[test]
    fn test_timestamp_units_agree() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(normalize_timestamp(1_700_000_000), Some(expected));
        assert_eq!(normalize_timestamp(1_700_000_000_000), Some(expected));
        assert_eq!(normalize_timestamp(1_700_000_000_000_000), Some(expected));
    }

    #[test]
    fn test_timestamp_thresholds_are_exclusive() {
        // Exactly 10^12 is still read as seconds, tens of millennia ahead.
        let seconds = normalize_timestamp(1_000_000_000_000).unwrap();
        assert!(seconds.year() > 9999);

        let millis = normalize_timestamp(1_000_000_000_001).unwrap();
        assert_eq!(millis.year(), 2001);
    }

    #[test]
    fn test_extract_complete_frame() {
        let text = r#"{"time": 1700000000000000, "lat": 45.2, "lon": 1604008, "alt": 0, "pol": "neg", "mds": 12, "mcg": 3}"#;
        let strike = extractor().extract(text).unwrap();

        assert_eq!(strike.time, 1_700_000_000_000_000);
        assert_eq!(strike.timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(strike.lat, 45.2);
        assert_eq!(strike.lon, 16.04008);
        assert_eq!(strike.alt, Some(0));
        assert_eq!(strike.pol.as_deref(), Some("neg"));
        assert_eq!(strike.mds, Some(12));
        assert_eq!(strike.mcg, Some(3));
    }

    #[test]
    fn test_extract_unquoted_keys() {
        let text = "time:1700000000 lat: -33.5 lon: -70.6 mds: 7.9";
        let strike = extractor().extract(text).unwrap();

        assert_eq!(strike.lat, -33.5);
        assert_eq!(strike.lon, -70.6);
        assert_eq!(strike.mds, Some(7));
        assert_eq!(strike.alt, None);
        assert_eq!(strike.mcg, None);
    }

    #[test]
    fn test_missing_time_fails() {
        let err = extractor()
            .extract(r#"{"lat": 45.2, "lon": 16.0}"#)
            .unwrap_err();
        assert_eq!(err, ExtractionError::MissingField("time"));
    }

    #[test]
    fn test_missing_coordinates_fail() {
        assert_eq!(
            extractor().extract(r#"{"time": 1700000000, "lon": 16.0}"#),
            Err(ExtractionError::MissingField("lat"))
        );
        assert_eq!(
            extractor().extract(r#"{"time": 1700000000, "lat": 45.2}"#),
            Err(ExtractionError::MissingField("lon"))
        );
    }

    #[test]
    fn test_unparsable_latitude_fails() {
        let err = extractor()
            .extract(r#"{"time": 1700000000, "lat": 4.5.2, "lon": 16.0}"#)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidNumber { field: "lat", .. }));
    }

    #[test]
    fn test_polarity_collision_is_dropped() {
        let text = r#"time: 1700000000, lat: 45.2, lon: 16.0, pol: "mds": 4"#;
        let strike = extractor().extract(text).unwrap();
        assert_eq!(strike.pol, None);
        assert_eq!(strike.mds, Some(4));
    }

    #[test]
    fn test_unquoted_polarity_stops_at_separator() {
        let text = r#"time: 1700000000, lat: 45.2, lon: 16.0, pol: neg, mds: 4"#;
        let strike = extractor().extract(text).unwrap();
        assert_eq!(strike.pol.as_deref(), Some("neg"));

        let text = r#"{"time":1700000000,"lat":45.2,"lon":16.0,"pol":0,"mds":4}"#;
        let strike = extractor().extract(text).unwrap();
        assert_eq!(strike.pol.as_deref(), Some("0"));
        assert_eq!(strike.mds, Some(4));
    }

    #[test]
    fn test_unparsable_optional_fields_are_absent() {
        let text = r#"{"time": 1700000000, "lat": 45.2, "lon": 16.0, "mcg": -, "mds": 1.2.3}"#;
        let strike = extractor().extract(text).unwrap();
        assert_eq!(strike.mcg, None);
        assert_eq!(strike.mds, None);
    }

    #[test]
    fn test_every_rule_compiles() {
        let extractor = extractor();
        assert_eq!(extractor.rules.len(), FIELD_RULES.len());
    }
}
