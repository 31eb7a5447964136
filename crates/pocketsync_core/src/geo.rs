//! Geo-spatial containment evaluation.
//!
//! Circle and polygon predicates are never pushed down into the storage
//! engine's native filter language; they are evaluated in application code
//! against candidate entities. Circles use great-circle (haversine)
//! distance; polygons use even-odd point-in-polygon containment on the
//! planar lat/lon path.

use crate::error::{CoreError, CoreResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A geographic coordinate.
///
/// The wire form is a two-element `[longitude, latitude]` array, matching
/// the backend's geolocation field encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Longitude in degrees.
    pub longitude: f64,
    /// Latitude in degrees.
    pub latitude: f64,
}

impl GeoPoint {
    /// Creates a geo point from longitude and latitude in degrees.
    #[must_use]
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Parses a geo point from a `[longitude, latitude]` JSON value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| CoreError::invalid_geo_point("expected a two-element array"))?;
        if items.len() != 2 {
            return Err(CoreError::invalid_geo_point(format!(
                "expected 2 ordinates, got {}",
                items.len()
            )));
        }
        let longitude = items[0]
            .as_f64()
            .ok_or_else(|| CoreError::invalid_geo_point("longitude is not a number"))?;
        let latitude = items[1]
            .as_f64()
            .ok_or_else(|| CoreError::invalid_geo_point("latitude is not a number"))?;
        Ok(Self::new(longitude, latitude))
    }

    /// Returns the `[longitude, latitude]` JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(vec![self.longitude.into(), self.latitude.into()])
    }
}

impl Serialize for GeoPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.longitude, self.latitude].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GeoPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ordinates = <[f64; 2]>::deserialize(deserializer)?;
        if !ordinates[0].is_finite() || !ordinates[1].is_finite() {
            return Err(D::Error::custom("geo ordinates must be finite"));
        }
        Ok(Self::new(ordinates[0], ordinates[1]))
    }
}

/// Great-circle distance between two points in meters, via the haversine
/// formula.
#[must_use]
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Even-odd point-in-polygon containment on the planar lat/lon path.
///
/// The ring is closed implicitly: a duplicated closing point is tolerated
/// but not required. Rings with fewer than three distinct points contain
/// nothing.
#[must_use]
pub fn point_in_polygon(point: GeoPoint, ring: &[GeoPoint]) -> bool {
    // Drop an explicit closing point; the edge walk below closes the ring.
    let ring = match ring.split_last() {
        Some((last, rest)) if ring.len() > 1 && *last == ring[0] => rest,
        _ => ring,
    };
    if ring.len() < 3 {
        return false;
    }

    let (x, y) = (point.longitude, point.latitude);
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i].longitude, ring[i].latitude);
        let (xj, yj) = (ring[j].longitude, ring[j].latitude);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn geo_point_wire_form() {
        let point: GeoPoint = serde_json::from_value(json!([-122.4194, 37.7749])).unwrap();
        assert_eq!(point.longitude, -122.4194);
        assert_eq!(point.latitude, 37.7749);

        let back = serde_json::to_value(point).unwrap();
        assert_eq!(back, json!([-122.4194, 37.7749]));
    }

    #[test]
    fn geo_point_rejects_malformed_values() {
        assert!(GeoPoint::from_value(&json!("not a point")).is_err());
        assert!(GeoPoint::from_value(&json!([1.0])).is_err());
        assert!(GeoPoint::from_value(&json!([1.0, "x"])).is_err());
    }

    #[test]
    fn haversine_known_distance() {
        // San Francisco to Los Angeles, roughly 559 km.
        let sf = GeoPoint::new(-122.4194, 37.7749);
        let la = GeoPoint::new(-118.2437, 34.0522);
        let d = haversine_distance(sf, la);
        assert!((d - 559_000.0).abs() < 5_000.0, "distance was {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint::new(13.4, 52.5);
        assert_eq!(haversine_distance(p, p), 0.0);
    }

    #[test]
    fn polygon_containment() {
        let ring = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(10.0, 0.0),
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(0.0, 10.0),
        ];
        assert!(point_in_polygon(GeoPoint::new(5.0, 5.0), &ring));
        assert!(!point_in_polygon(GeoPoint::new(15.0, 5.0), &ring));
        assert!(!point_in_polygon(GeoPoint::new(-0.1, 5.0), &ring));
    }

    #[test]
    fn polygon_closing_point_tolerated() {
        let open = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(4.0, 0.0),
            GeoPoint::new(2.0, 4.0),
        ];
        let closed = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(4.0, 0.0),
            GeoPoint::new(2.0, 4.0),
            GeoPoint::new(0.0, 0.0),
        ];
        let inside = GeoPoint::new(2.0, 1.0);
        assert_eq!(
            point_in_polygon(inside, &open),
            point_in_polygon(inside, &closed)
        );
        assert!(point_in_polygon(inside, &closed));
    }

    #[test]
    fn degenerate_ring_contains_nothing() {
        let ring = [GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(GeoPoint::new(0.5, 0.5), &ring));
    }
}
