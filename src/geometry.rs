//! Point of interest and export region geometry.
//!
//! The export region is derived locally: the point is buffered by a radius in metres and
//! reduced to its bounding box, so the region is a lat/lon rectangle rather than a disk.
use crate::error::ExportError;
use serde_json::{json, Value};

/// Radius of the sphere used for metre/degree conversion (WGS84 semi-major axis).
const EARTH_RADIUS_M: f64 = 6_378_137.0;

pub fn metres_per_degree() -> f64 {
    EARTH_RADIUS_M * std::f64::consts::PI / 180.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    latitude: f64,
    longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ExportError> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if !lat_ok || !lon_ok {
            return Err(ExportError::InvalidPoint {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// GeoJSON orders coordinates as [longitude, latitude].
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Point",
            "coordinates": [self.longitude, self.latitude],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Region {
    /// Bounding box of `point` buffered by `radius` metres.
    pub fn buffered_bounds(point: &Point, radius: f64) -> Result<Self, ExportError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "buffer radius must be a positive number of metres, got {radius}"
            )));
        }

        let d_lat = radius / metres_per_degree();
        let south = point.latitude - d_lat;
        let north = point.latitude + d_lat;

        // A buffer touching a pole covers every longitude
        if south <= -90.0 || north >= 90.0 {
            return Ok(Self {
                west: -180.0,
                south: south.max(-90.0),
                east: 180.0,
                north: north.min(90.0),
            });
        }

        // Longitudes stay within [-180, 180]; a box crossing the antimeridian is cut there
        let d_lon = d_lat / point.latitude.to_radians().cos();
        Ok(Self {
            west: (point.longitude - d_lon).max(-180.0),
            south,
            east: (point.longitude + d_lon).min(180.0),
            north,
        })
    }

    pub fn centre_latitude(&self) -> f64 {
        (self.south + self.north) / 2.0
    }

    /// East-west extent in metres, measured along the centre latitude.
    pub fn width_metres(&self) -> f64 {
        (self.east - self.west) * metres_per_degree() * self.centre_latitude().to_radians().cos()
    }

    /// North-south extent in metres.
    pub fn height_metres(&self) -> f64 {
        (self.north - self.south) * metres_per_degree()
    }

    /// Closed, counter-clockwise polygon ring.
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [self.west, self.south],
                [self.east, self.south],
                [self.east, self.north],
                [self.west, self.north],
                [self.west, self.south],
            ]],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Point(Point),
    Region(Region),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn test_point_within_bounds() {
        assert!(Point::new(44.6082, -122.9180).is_ok());
        assert!(Point::new(90.0, 180.0).is_ok());
        assert!(Point::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn test_point_out_of_bounds() {
        for (lat, lon) in [(90.5, 0.0), (-91.0, 0.0), (0.0, 180.1), (0.0, -200.0)] {
            let err = Point::new(lat, lon).unwrap_err();
            assert!(matches!(err, ExportError::InvalidPoint { .. }));
        }
        assert!(Point::new(f64::NAN, 0.0).is_err());
        assert!(Point::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_point_geojson_is_lon_lat() {
        let point = Point::new(44.6082, -122.9180).unwrap();
        assert_eq!(
            point.to_geojson(),
            json!({"type": "Point", "coordinates": [-122.9180, 44.6082]})
        );
    }

    #[test]
    fn test_buffered_bounds_extent_is_twice_radius() {
        let radius = 5000.0;
        for (lat, lon) in [(0.0, 0.0), (44.6082, -122.9180), (-33.9, 18.4), (60.0, 25.0)] {
            let point = Point::new(lat, lon).unwrap();
            let region = Region::buffered_bounds(&point, radius).unwrap();
            assert!(close(region.height_metres(), 2.0 * radius, 1e-6));
            // Width is exact at the point's own latitude
            let width = (region.east - region.west) * metres_per_degree() * lat.to_radians().cos();
            assert!(close(width, 2.0 * radius, 1e-6));
            assert!(close(region.width_metres(), 2.0 * radius, 1e-6));
        }
    }

    #[test]
    fn test_buffered_bounds_is_centred_on_point() {
        let point = Point::new(44.6082, -122.9180).unwrap();
        let region = Region::buffered_bounds(&point, 5000.0).unwrap();
        assert!(close((region.west + region.east) / 2.0, point.longitude(), 1e-9));
        assert!(close(region.centre_latitude(), point.latitude(), 1e-9));
        assert!(region.west < region.east);
        assert!(region.south < region.north);
    }

    #[test]
    fn test_buffered_bounds_at_pole_spans_all_longitudes() {
        let point = Point::new(89.99, 10.0).unwrap();
        let region = Region::buffered_bounds(&point, 5000.0).unwrap();
        assert_eq!(region.west, -180.0);
        assert_eq!(region.east, 180.0);
        assert_eq!(region.north, 90.0);
    }

    #[test]
    fn test_buffered_bounds_stops_at_antimeridian() {
        let point = Point::new(44.6082, 179.99).unwrap();
        let region = Region::buffered_bounds(&point, 5000.0).unwrap();
        assert_eq!(region.east, 180.0);
        assert!(region.west < 179.99 && region.west > 179.9);

        let point = Point::new(-10.0, -179.99).unwrap();
        let region = Region::buffered_bounds(&point, 5000.0).unwrap();
        assert_eq!(region.west, -180.0);
    }

    #[test]
    fn test_buffered_bounds_near_pole_keeps_longitudes_in_range() {
        let point = Point::new(89.95, 150.0).unwrap();
        let region = Region::buffered_bounds(&point, 5000.0).unwrap();
        assert!(region.north < 90.0);
        assert_eq!(region.east, 180.0);
        assert!(region.west >= -180.0 && region.west < 150.0);
    }

    #[test]
    fn test_buffered_bounds_rejects_bad_radius() {
        let point = Point::new(0.0, 0.0).unwrap();
        assert!(Region::buffered_bounds(&point, 0.0).is_err());
        assert!(Region::buffered_bounds(&point, -10.0).is_err());
        assert!(Region::buffered_bounds(&point, f64::NAN).is_err());
    }

    #[test]
    fn test_region_geojson_ring_is_closed() {
        let point = Point::new(10.0, 10.0).unwrap();
        let region = Region::buffered_bounds(&point, 1000.0).unwrap();
        let geojson = region.to_geojson();
        let ring = geojson["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }
}
