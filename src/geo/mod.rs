//! Geospatial primitives
//!
//! Points are stored as GeoJSON (`{type: "Point", coordinates: [lng, lat]}`)
//! so MongoDB can serve them from a `2dsphere` index. The same filters are
//! evaluated in memory by [`GeoFilter::contains`] for the in-memory store,
//! and translated to query operators by [`GeoFilter::to_within`] /
//! [`GeoFilter::to_near`] for MongoDB.
//!
//! Distances use the haversine formula on a sphere of radius 6371 km.

use bson::{doc, Document};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{CivicError, Result};

/// Mean Earth radius used for every distance in the crate
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// ============================================================================
// Points
// ============================================================================

/// A validated WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoJsonPoint", into = "GeoJsonPoint")]
pub struct GeoPoint {
    lng: f64,
    lat: f64,
}

impl GeoPoint {
    /// Build a point, rejecting out-of-range or non-finite coordinates
    pub fn from_lat_lng(lat: f64, lng: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CivicError::Validation(format!(
                "Latitude must be between -90 and 90, got {}",
                lat
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(CivicError::Validation(format!(
                "Longitude must be between -180 and 180, got {}",
                lng
            )));
        }
        Ok(Self { lng, lat })
    }

    /// Build a point from optional query parameters
    pub fn require(lat: Option<f64>, lng: Option<f64>) -> Result<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Self::from_lat_lng(lat, lng),
            _ => Err(CivicError::Validation(
                "Latitude and longitude are required".to_string(),
            )),
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Great-circle distance to another point in kilometers
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }

    /// GeoJSON representation for query operators
    pub fn to_geojson(&self) -> Document {
        doc! { "type": "Point", "coordinates": [self.lng, self.lat] }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lng)
    }
}

/// Wire form of a point
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<f64>,
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = CivicError;

    fn try_from(raw: GeoJsonPoint) -> Result<Self> {
        if raw.kind != "Point" {
            return Err(CivicError::Validation(format!(
                "Unsupported geometry type: {}",
                raw.kind
            )));
        }
        match raw.coordinates.as_slice() {
            [lng, lat] => GeoPoint::from_lat_lng(*lat, *lng),
            _ => Err(CivicError::Validation("Invalid coordinates".to_string())),
        }
    }
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(p: GeoPoint) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: vec![p.lng, p.lat],
        }
    }
}

// ============================================================================
// Distance
// ============================================================================

/// Haversine distance in kilometers between two lat/lng pairs
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Round kilometers to one decimal place for display
pub fn round_km(raw_km: f64) -> f64 {
    (raw_km * 10.0).round() / 10.0
}

// ============================================================================
// Filters
// ============================================================================

/// Circle around a center point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radius {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl Radius {
    pub fn new(center: GeoPoint, radius_km: f64) -> Result<Self> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(CivicError::Validation(format!(
                "Radius must be a positive number of kilometers, got {}",
                radius_km
            )));
        }
        Ok(Self { center, radius_km })
    }

    /// Parse the `lng,lat,radiusKm` form used by list queries
    pub fn parse_near(raw: &str) -> Result<Self> {
        let parts = parse_floats(raw, 3, "near")?;
        Self::new(GeoPoint::from_lat_lng(parts[1], parts[0])?, parts[2])
    }
}

/// Axis-aligned box in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Result<Self> {
        // Corner validation reuses the point range checks
        GeoPoint::from_lat_lng(min_lat, min_lng)?;
        GeoPoint::from_lat_lng(max_lat, max_lng)?;
        if min_lng > max_lng || min_lat > max_lat {
            return Err(CivicError::Validation(
                "Bounding box minimum corner must be south-west of the maximum corner".to_string(),
            ));
        }
        Ok(Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        })
    }

    /// Parse the `minLng,minLat,maxLng,maxLat` form used by list queries
    pub fn parse(raw: &str) -> Result<Self> {
        let p = parse_floats(raw, 4, "bbox")?;
        Self::new(p[0], p[1], p[2], p[3])
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        p.lng() >= self.min_lng
            && p.lng() <= self.max_lng
            && p.lat() >= self.min_lat
            && p.lat() <= self.max_lat
    }
}

/// Spatial restriction on a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoFilter {
    Radius(Radius),
    Within(BoundingBox),
}

impl GeoFilter {
    /// Pick the spatial filter for a query; radius wins when both are given
    pub fn select(radius: Option<Radius>, bbox: Option<BoundingBox>) -> Option<Self> {
        match (radius, bbox) {
            (Some(r), _) => Some(GeoFilter::Radius(r)),
            (None, Some(b)) => Some(GeoFilter::Within(b)),
            (None, None) => None,
        }
    }

    /// Center of a radius filter
    pub fn center(&self) -> Option<GeoPoint> {
        match self {
            GeoFilter::Radius(r) => Some(r.center),
            GeoFilter::Within(_) => None,
        }
    }

    /// In-memory membership test
    pub fn contains(&self, p: &GeoPoint) -> bool {
        match self {
            GeoFilter::Radius(r) => r.center.distance_km(p) <= r.radius_km,
            GeoFilter::Within(b) => b.contains(p),
        }
    }

    /// `$geoWithin` clause; usable with counts and explicit sorts
    pub fn to_within(&self) -> Document {
        match self {
            GeoFilter::Radius(r) => doc! {
                "$geoWithin": {
                    "$centerSphere": [
                        [r.center.lng(), r.center.lat()],
                        r.radius_km / EARTH_RADIUS_KM,
                    ]
                }
            },
            // Flat, edge-inclusive box, the same shape `BoundingBox::contains` tests
            GeoFilter::Within(b) => doc! {
                "$geoWithin": {
                    "$box": [[b.min_lng, b.min_lat], [b.max_lng, b.max_lat]]
                }
            },
        }
    }

    /// `$near` clause; results come back sorted by distance
    pub fn to_near(&self) -> Option<Document> {
        match self {
            GeoFilter::Radius(r) => Some(doc! {
                "$near": {
                    "$geometry": r.center.to_geojson(),
                    "$maxDistance": r.radius_km * 1000.0,
                }
            }),
            GeoFilter::Within(_) => None,
        }
    }
}

fn parse_floats(raw: &str, expected: usize, what: &str) -> Result<Vec<f64>> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CivicError::Validation(format!("Invalid {} value: {}", what, raw)))?;
    if values.len() != expected {
        return Err(CivicError::Validation(format!(
            "{} expects {} comma-separated numbers, got {}",
            what,
            expected,
            values.len()
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero_km() {
        let d = haversine_km(40.7128, -74.0060, 40.7128, -74.0060);
        assert_eq!(round_km(d), 0.0);
    }

    #[test]
    fn test_quarter_equator() {
        let d = haversine_km(0.0, 0.0, 0.0, 90.0);
        assert!((d - 10007.5).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_round_km_one_decimal() {
        assert_eq!(round_km(1.234), 1.2);
        assert_eq!(round_km(1.25), 1.3);
        assert_eq!(round_km(4.449), 4.4);
    }

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::from_lat_lng(91.0, 0.0).is_err());
        assert!(GeoPoint::from_lat_lng(0.0, -180.5).is_err());
        assert!(GeoPoint::from_lat_lng(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::from_lat_lng(-90.0, 180.0).is_ok());
        assert!(matches!(
            GeoPoint::require(Some(1.0), None),
            Err(CivicError::Validation(_))
        ));
    }

    #[test]
    fn test_point_serializes_as_geojson() {
        let p = GeoPoint::from_lat_lng(40.7128, -74.0060).unwrap();
        let json = serde_json::to_value(p).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], -74.0060);
        assert_eq!(json["coordinates"][1], 40.7128);

        let bad = serde_json::json!({"type": "Point", "coordinates": [200.0, 0.0]});
        assert!(serde_json::from_value::<GeoPoint>(bad).is_err());
    }

    #[test]
    fn test_radius_takes_precedence() {
        let center = GeoPoint::from_lat_lng(0.0, 0.0).unwrap();
        let radius = Radius::new(center, 5.0).unwrap();
        let bbox = BoundingBox::new(10.0, 10.0, 20.0, 20.0).unwrap();
        assert_eq!(
            GeoFilter::select(Some(radius), Some(bbox)),
            Some(GeoFilter::Radius(radius))
        );
        assert_eq!(GeoFilter::select(None, Some(bbox)), Some(GeoFilter::Within(bbox)));
    }

    #[test]
    fn test_parse_near_and_bbox() {
        let r = Radius::parse_near("-74.0060,40.7128,5").unwrap();
        assert_eq!(r.center.lat(), 40.7128);
        assert_eq!(r.radius_km, 5.0);
        assert!(Radius::parse_near("-74.0,40.7").is_err());
        assert!(Radius::parse_near("-74.0,40.7,0").is_err());

        let b = BoundingBox::parse("-74.1,40.6,-73.9,40.8").unwrap();
        assert!(b.contains(&GeoPoint::from_lat_lng(40.7128, -74.0060).unwrap()));
        assert!(!b.contains(&GeoPoint::from_lat_lng(41.0, -74.0060).unwrap()));
        assert!(BoundingBox::parse("-73.9,40.6,-74.1,40.8").is_err());
    }

    #[test]
    fn test_bbox_clause_is_flat_box() {
        let world = GeoFilter::Within(BoundingBox::new(-180.0, -90.0, 180.0, 90.0).unwrap());
        let clause = world.to_within();
        let corners = clause
            .get_document("$geoWithin")
            .unwrap()
            .get_array("$box")
            .unwrap();
        assert_eq!(corners.len(), 2);
        assert_eq!(corners[0], bson::bson!([-180.0, -90.0]));
        assert_eq!(corners[1], bson::bson!([180.0, 90.0]));
        assert!(world.contains(&GeoPoint::from_lat_lng(90.0, 180.0).unwrap()));
        assert!(world.to_near().is_none());
    }

    #[test]
    fn test_radius_contains() {
        let center = GeoPoint::from_lat_lng(40.7128, -74.0060).unwrap();
        let filter = GeoFilter::Radius(Radius::new(center, 5.0).unwrap());
        // ~3.3 km north
        assert!(filter.contains(&GeoPoint::from_lat_lng(40.7428, -74.0060).unwrap()));
        // ~11 km north
        assert!(!filter.contains(&GeoPoint::from_lat_lng(40.8128, -74.0060).unwrap()));
    }
}
