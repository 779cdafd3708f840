//! Coordinate range checks on extracted candidates.

use crate::record::NewStrike;
use thiserror::Error;

pub const MAX_LATITUDE: f64 = 90.0;
pub const MAX_LONGITUDE: f64 = 180.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing coordinate: {0}")]
    MissingCoordinate(&'static str),

    #[error("Invalid coordinates: {lat}, {lon}")]
    OutOfRange { lat: f64, lon: f64 },
}

/// Accept a candidate whose coordinates are present and in range.
///
/// Bounds are inclusive: ±90 latitude and ±180 longitude pass.
pub fn validate(candidate: &NewStrike) -> Result<(), ValidationError> {
    if !candidate.lat.is_finite() {
        return Err(ValidationError::MissingCoordinate("lat"));
    }
    if !candidate.lon.is_finite() {
        return Err(ValidationError::MissingCoordinate("lon"));
    }
    if candidate.lat.abs() > MAX_LATITUDE || candidate.lon.abs() > MAX_LONGITUDE {
        return Err(ValidationError::OutOfRange {
            lat: candidate.lat,
            lon: candidate.lon,
        });
    }
    Ok(())
}
