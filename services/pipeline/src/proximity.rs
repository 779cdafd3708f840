//! Radius queries over stored strikes.
//!
//! A cheap planar bounding box narrows the candidates in the store, then the
//! exact haversine distance filters and orders them. The box is computed
//! without clamping at the poles or wrapping at the antimeridian.

use crate::record::{GeoPoint, StrikeRecord, TimeWindow};
use crate::store::{StoreError, StrikeSource};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, instrument};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate length of one degree of latitude
pub const KM_PER_DEGREE: f64 = 111.0;

/// Latitude/longitude rectangle, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box that contains every point within `radius_km` of `center`.
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let lat_delta = radius_km / KM_PER_DEGREE;
        let lon_delta = radius_km / (KM_PER_DEGREE * center.lat.to_radians().cos());

        Self {
            min_lat: center.lat - lat_delta,
            max_lat: center.lat + lat_delta,
            min_lon: center.lon - lon_delta,
            max_lon: center.lon + lon_delta,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Parameters of a radius query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    pub center: GeoPoint,
    pub radius_km: f64,
    pub window: TimeWindow,
    pub limit: usize,
}

/// A strike with its distance from the query center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyStrike {
    #[serde(flatten)]
    pub strike: StrikeRecord,
    /// Rounded to two decimals
    pub distance_km: f64,
}

/// Keep candidates within `radius_km` of `center`, nearest first, at most `limit`.
pub fn rank_by_distance(
    center: GeoPoint,
    radius_km: f64,
    candidates: Vec<StrikeRecord>,
    limit: usize,
) -> Vec<NearbyStrike> {
    let mut ranked: Vec<(f64, StrikeRecord)> = candidates
        .into_iter()
        .filter_map(|strike| {
            let distance = haversine_km(center, GeoPoint::new(strike.latitude, strike.longitude));
            (distance <= radius_km).then_some((distance, strike))
        })
        .collect();

    ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    ranked.truncate(limit);

    ranked
        .into_iter()
        .map(|(distance, strike)| NearbyStrike {
            strike,
            distance_km: (distance * 100.0).round() / 100.0,
        })
        .collect()
}

/// Run a radius query against `source`.
///
/// Twice `limit` candidates are fetched from the box so that points in its
/// corners, which fall outside the circle, do not starve the result.
#[instrument(skip(source))]
pub async fn find_nearby<S>(source: &S, query: &NearbyQuery) -> Result<Vec<NearbyStrike>, StoreError>
where
    S: StrikeSource + ?Sized,
{
    let bbox = BoundingBox::around(query.center, query.radius_km);
    let fetch = i64::try_from(query.limit.saturating_mul(2)).unwrap_or(i64::MAX);

    let candidates = source.strikes_in_box(&query.window, &bbox, fetch).await?;
    let candidate_count = candidates.len();

    let nearby = rank_by_distance(query.center, query.radius_km, candidates, query.limit);

    debug!(
        candidates = candidate_count,
        matched = nearby.len(),
        "Proximity query completed"
    );
    metrics::counter!("strikes.nearby.queries").increment(1);

    Ok(nearby)
}
