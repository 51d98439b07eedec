use crate::{
    core::constants::{EARTH_RADIUS_KILOMETERS, EARTH_RADIUS_MILES},
    MapError, Result,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Latitude beyond which the Mercator projection is clamped (the square-world limit).
const MAX_MERCATOR_LATITUDE: f64 = 85.0511287798;

/// Distance units understood by [`Coordinate::add`] and [`Coordinate::distance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Degree,
    Radian,
    Mile,
    Kilometer,
}

impl Unit {
    fn earth_radius(self) -> Option<f64> {
        match self {
            Unit::Mile => Some(EARTH_RADIUS_MILES),
            Unit::Kilometer => Some(EARTH_RADIUS_KILOMETERS),
            Unit::Degree | Unit::Radian => None,
        }
    }

    /// Whether this unit measures length along the earth's surface rather than an angle.
    pub fn is_physical(self) -> bool {
        self.earth_radius().is_some()
    }

    /// Converts a distance in this unit to a central angle in radians.
    fn to_radians(self, distance: f64) -> f64 {
        match self {
            Unit::Degree => distance.to_radians(),
            Unit::Radian => distance,
            Unit::Mile | Unit::Kilometer => distance / self.earth_radius().unwrap_or(1.0),
        }
    }

    /// Converts a central angle in radians to a distance in this unit.
    fn from_radians(self, radians: f64) -> f64 {
        match self {
            Unit::Degree => radians.to_degrees(),
            Unit::Radian => radians,
            Unit::Mile | Unit::Kilometer => radians * self.earth_radius().unwrap_or(1.0),
        }
    }
}

/// How distances and offsets are measured.
///
/// `Spherical` is geolocation-accurate. `Mercator` measures what a Mercator-tiled map
/// shows on screen, which is what viewport fitting needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    #[default]
    Spherical,
    Mercator,
}

/// Mercator y of a latitude, in radians.
fn mercator_y(latitude: f64) -> f64 {
    let latitude = latitude.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    (PI / 4.0 + latitude.to_radians() / 2.0).tan().ln()
}

fn finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MapError::InvalidArgument(format!(
            "{what} must be a finite number, got {value}"
        )))
    }
}

/// A single latitude/longitude point.
///
/// Latitude is clamped to `[-90, 90]`. Longitude is stored exactly as given so that
/// bounds can extend past the antimeridian; [`Coordinate::normal_lon`] gives the
/// wrapped value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate, clamping the latitude. Non-finite input is rejected.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let mut coordinate = Self {
            latitude: 0.0,
            longitude: 0.0,
        };
        coordinate.set_latitude(latitude)?;
        coordinate.set_longitude(longitude)?;
        Ok(coordinate)
    }

    /// Origin `(0, 0)`.
    pub const fn origin() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    /// Builds a coordinate from parts taken from other coordinates, which are already
    /// finite and clamped.
    pub(crate) const fn from_valid(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Sets the latitude, clamping it to `[-90, 90]`.
    pub fn set_latitude(&mut self, latitude: f64) -> Result<()> {
        self.latitude = finite(latitude, "latitude")?.clamp(-90.0, 90.0);
        Ok(())
    }

    pub fn set_longitude(&mut self, longitude: f64) -> Result<()> {
        self.longitude = finite(longitude, "longitude")?;
        Ok(())
    }

    /// Longitude wrapped into `[-180, 180)`.
    pub fn normal_lon(&self) -> f64 {
        let wrapped = (self.longitude + 180.0).rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        if wrapped >= 360.0 {
            -180.0
        } else {
            wrapped - 180.0
        }
    }

    /// Moves this coordinate by the given latitude and longitude distances.
    ///
    /// Under [`Projection::Spherical`] physical units are turned into angles using the
    /// earth's radius, and the longitude delta is widened by `1/cos(latitude)` to
    /// account for meridians converging. Under [`Projection::Mercator`] the latitude
    /// delta is applied in Mercator space, so equal deltas look equal on screen.
    pub fn add(
        &mut self,
        lat_dist: f64,
        lon_dist: f64,
        unit: Unit,
        projection: Projection,
    ) -> Result<()> {
        let lat_rad = unit.to_radians(finite(lat_dist, "latitude distance")?);
        let lon_rad = unit.to_radians(finite(lon_dist, "longitude distance")?);

        let (latitude, longitude) = match projection {
            Projection::Spherical => {
                let mut lon_deg = lon_rad.to_degrees();
                if unit.is_physical() && lon_deg != 0.0 {
                    lon_deg /= self.latitude.to_radians().cos();
                }
                (self.latitude + lat_rad.to_degrees(), self.longitude + lon_deg)
            }
            Projection::Mercator => {
                if unit.is_physical() {
                    return Err(MapError::UnsupportedUnit { unit, projection });
                }
                let start = self
                    .latitude
                    .clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
                let latitude = ((PI / 360.0 * (start + 90.0)).tan() * lat_rad.exp())
                    .atan()
                    * 360.0
                    / PI
                    - 90.0;
                (latitude, self.longitude + lon_rad.to_degrees())
            }
        };

        self.set_latitude(latitude)?;
        self.set_longitude(longitude)
    }

    /// Returns a copy moved by the given distances. See [`Coordinate::add`].
    pub fn offset(
        &self,
        lat_dist: f64,
        lon_dist: f64,
        unit: Unit,
        projection: Projection,
    ) -> Result<Self> {
        let mut moved = *self;
        moved.add(lat_dist, lon_dist, unit, projection)?;
        Ok(moved)
    }

    /// Distance to another coordinate.
    ///
    /// Spherical distances use the haversine great-circle formula. Mercator distances
    /// are Euclidean in projected space and only support angular units.
    pub fn distance_to(&self, other: &Coordinate, unit: Unit, projection: Projection) -> Result<f64> {
        match projection {
            Projection::Spherical => {
                let lat1 = self.latitude.to_radians();
                let lat2 = other.latitude.to_radians();
                let delta_lat = (other.latitude - self.latitude).to_radians();
                let delta_lon = (other.longitude - self.longitude).to_radians();

                let a = (delta_lat / 2.0).sin().powi(2)
                    + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
                let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

                Ok(unit.from_radians(c))
            }
            Projection::Mercator => {
                if unit.is_physical() {
                    return Err(MapError::UnsupportedUnit { unit, projection });
                }
                let lat_dist = mercator_y(other.latitude) - mercator_y(self.latitude);
                let lon_dist = ((other.normal_lon() - self.normal_lon() + 180.0).rem_euclid(360.0)
                    - 180.0)
                    .to_radians();

                Ok(unit.from_radians(lat_dist.hypot(lon_dist)))
            }
        }
    }

    /// `"lat,lon"`, the form search endpoints expect.
    pub fn search_query_string(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self::origin()
    }
}

impl TryFrom<(f64, f64)> for Coordinate {
    type Error = MapError;

    fn try_from((latitude, longitude): (f64, f64)) -> Result<Self> {
        Self::new(latitude, longitude)
    }
}

/// Accepts any JSON object exposing a recognized latitude/longitude alias, e.g.
/// `{"lat": 1, "lng": 2}` or `{"Latitude": "1.5", "Longitude": "-3"}`.
impl TryFrom<&serde_json::Value> for Coordinate {
    type Error = MapError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        Coordinate::deserialize(value).map_err(|e| MapError::InvalidArgument(e.to_string()))
    }
}

impl TryFrom<geo_types::Coord<f64>> for Coordinate {
    type Error = MapError;

    fn try_from(coord: geo_types::Coord<f64>) -> Result<Self> {
        Self::new(coord.y, coord.x)
    }
}

impl From<Coordinate> for geo_types::Coord<f64> {
    fn from(coordinate: Coordinate) -> Self {
        geo_types::coord! { x: coordinate.longitude, y: coordinate.latitude }
    }
}

/// A number as it appears in loosely-typed location payloads.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    fn value(&self, what: &str) -> Result<f64> {
        match self {
            NumberLike::Number(value) => Ok(*value),
            NumberLike::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                MapError::InvalidArgument(format!("{what} '{text}' is not a number"))
            }),
        }
    }
}

#[derive(Deserialize)]
struct RawCoordinate {
    #[serde(alias = "lat", alias = "Lat", alias = "Latitude")]
    latitude: NumberLike,
    #[serde(
        alias = "lon",
        alias = "lng",
        alias = "long",
        alias = "Lon",
        alias = "Lng",
        alias = "Longitude"
    )]
    longitude: NumberLike,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = MapError;

    fn try_from(raw: RawCoordinate) -> Result<Self> {
        Coordinate::new(raw.latitude.value("latitude")?, raw.longitude.value("longitude")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_latitude_is_clamped() {
        assert_eq!(coord(100.0, 0.0).latitude(), 90.0);
        assert_eq!(coord(-200.0, 0.0).latitude(), -90.0);
        assert_eq!(coord(45.5, 0.0).latitude(), 45.5);
    }

    #[test]
    fn test_longitude_is_stored_as_given() {
        let c = coord(0.0, 540.0);
        assert_eq!(c.longitude(), 540.0);
        assert_eq!(c.normal_lon(), -180.0);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        assert!(matches!(
            Coordinate::new(f64::NAN, 0.0),
            Err(MapError::InvalidArgument(_))
        ));
        assert!(matches!(
            Coordinate::new(0.0, f64::INFINITY),
            Err(MapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_normal_lon_range() {
        let mut lon = -1000.0;
        while lon <= 1000.0 {
            let normal = coord(0.0, lon).normal_lon();
            assert!((-180.0..180.0).contains(&normal), "{lon} -> {normal}");
            lon += 7.3;
        }
        assert_eq!(coord(0.0, 180.0).normal_lon(), -180.0);
        assert_eq!(coord(0.0, -180.0).normal_lon(), -180.0);
        assert_eq!(coord(0.0, 190.0).normal_lon(), -170.0);
        assert_eq!(coord(0.0, -1e-20).normal_lon(), 0.0);
    }

    #[test]
    fn test_spherical_distance() {
        let nyc = coord(40.7128, -74.0060);
        let la = coord(34.0522, -118.2437);
        let km = nyc
            .distance_to(&la, Unit::Kilometer, Projection::Spherical)
            .unwrap();
        // Roughly 3936 km on a 6371 km sphere
        assert!((km - 3936.0).abs() < 10.0, "{km}");

        let miles = nyc.distance_to(&la, Unit::Mile, Projection::Spherical).unwrap();
        assert!((miles - 2446.0).abs() < 10.0, "{miles}");
    }

    #[test]
    fn test_spherical_distance_along_meridian_is_latitude_delta() {
        let a = coord(-1.0, 10.0);
        let b = coord(1.0, 10.0);
        let degrees = a.distance_to(&b, Unit::Degree, Projection::Spherical).unwrap();
        assert_abs_diff_eq!(degrees, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mercator_distance_wraps_longitude() {
        let a = coord(0.0, 179.0);
        let b = coord(0.0, -179.0);
        let degrees = a.distance_to(&b, Unit::Degree, Projection::Mercator).unwrap();
        assert_abs_diff_eq!(degrees, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mercator_rejects_physical_units() {
        let a = coord(0.0, 0.0);
        let b = coord(1.0, 1.0);
        assert!(matches!(
            a.distance_to(&b, Unit::Mile, Projection::Mercator),
            Err(MapError::UnsupportedUnit { .. })
        ));
        let mut c = a;
        assert!(c.add(1.0, 1.0, Unit::Kilometer, Projection::Mercator).is_err());
        assert_eq!(c, a);
    }

    #[test]
    fn test_spherical_add_physical_units() {
        let mut c = coord(60.0, 0.0);
        let one_degree_km = EARTH_RADIUS_KILOMETERS * PI / 180.0;
        c.add(one_degree_km, one_degree_km, Unit::Kilometer, Projection::Spherical)
            .unwrap();
        assert_abs_diff_eq!(c.latitude(), 61.0, epsilon = 1e-9);
        // cos(60°) = 0.5, so one degree of arc is two degrees of longitude
        assert_abs_diff_eq!(c.longitude(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mercator_add_round_trips_distance() {
        let start = coord(10.0, 20.0);
        let moved = start.offset(5.0, 3.0, Unit::Degree, Projection::Mercator).unwrap();
        assert_abs_diff_eq!(moved.longitude(), 23.0, epsilon = 1e-9);

        let north = coord(moved.latitude(), start.longitude());
        let lat_dist = start
            .distance_to(&north, Unit::Degree, Projection::Mercator)
            .unwrap();
        assert_abs_diff_eq!(lat_dist, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_search_query_string() {
        assert_eq!(coord(40.5, -74.0).search_query_string(), "40.5,-74");
    }

    #[test]
    fn test_from_json_aliases() {
        let c = Coordinate::try_from(&serde_json::json!({ "lat": 12.5, "lng": -3 })).unwrap();
        assert_eq!(c, coord(12.5, -3.0));

        let c = Coordinate::try_from(&serde_json::json!({ "Latitude": "1.5", "Longitude": "2" }))
            .unwrap();
        assert_eq!(c, coord(1.5, 2.0));

        let c: Coordinate =
            serde_json::from_str(r#"{"latitude": 95, "longitude": 10}"#).unwrap();
        assert_eq!(c.latitude(), 90.0);
    }

    #[test]
    fn test_from_json_rejects_malformed_input() {
        assert!(Coordinate::try_from(&serde_json::json!({ "lat": 1 })).is_err());
        assert!(Coordinate::try_from(&serde_json::json!({ "lat": "north", "lon": 1 })).is_err());
        assert!(Coordinate::try_from(&serde_json::json!("1,2")).is_err());
    }

    #[test]
    fn test_geo_types_interop() {
        let c = Coordinate::try_from(geo_types::coord! { x: 10.0, y: 20.0 }).unwrap();
        assert_eq!(c, coord(20.0, 10.0));
        let back: geo_types::Coord<f64> = c.into();
        assert_eq!(back.x, 10.0);
        assert_eq!(back.y, 20.0);
    }

    #[test]
    fn test_geo_types_rejects_non_finite() {
        for (x, y) in [(f64::NAN, f64::NAN), (1.0, f64::INFINITY), (f64::NEG_INFINITY, 2.0)] {
            assert!(matches!(
                Coordinate::try_from(geo_types::coord! { x: x, y: y }),
                Err(MapError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_mercator_add_from_pole_stays_finite() {
        let pole = coord(90.0, 0.0);
        let moved = pole.offset(-1.0, 0.0, Unit::Degree, Projection::Mercator).unwrap();
        assert!(moved.latitude() < MAX_MERCATOR_LATITUDE);

        let edge = coord(MAX_MERCATOR_LATITUDE, 0.0);
        let expected = edge.offset(-1.0, 0.0, Unit::Degree, Projection::Mercator).unwrap();
        assert_abs_diff_eq!(moved.latitude(), expected.latitude(), epsilon = 1e-9);
    }
}
