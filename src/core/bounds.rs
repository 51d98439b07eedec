use crate::core::geo::{Coordinate, Projection, Unit};
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};

/// A region delimited by its southwest and northeast corners.
///
/// `ne` is assumed to be north of `sw`, and east of it modulo wraparound. Bounds that
/// cross the antimeridian keep `ne.longitude()` unwrapped (greater than 180) when they
/// come out of [`GeoBounds::fit`], but every method also accepts the wrapped form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub sw: Coordinate,
    pub ne: Coordinate,
}

impl GeoBounds {
    /// Creates bounds from the southwest and northeast corners
    pub fn new(sw: Coordinate, ne: Coordinate) -> Self {
        Self { sw, ne }
    }

    /// Creates bounds from individual edges
    pub fn from_edges(south: f64, west: f64, north: f64, east: f64) -> Result<Self> {
        Ok(Self::new(
            Coordinate::new(south, west)?,
            Coordinate::new(north, east)?,
        ))
    }

    /// Smallest bounds containing every coordinate.
    ///
    /// Longitudes are treated as points on a circle: the box leaves out the widest
    /// empty band of longitude instead of spanning min to max, so points on both sides
    /// of the antimeridian produce a narrow box across it.
    pub fn fit(coordinates: &[Coordinate]) -> Result<Self> {
        if coordinates.is_empty() {
            return Err(MapError::InvalidArgument(
                "cannot fit bounds to zero coordinates".to_string(),
            ));
        }

        let mut south = f64::INFINITY;
        let mut north = f64::NEG_INFINITY;
        for coordinate in coordinates {
            south = south.min(coordinate.latitude());
            north = north.max(coordinate.latitude());
        }

        let mut longitudes: Vec<f64> = coordinates.iter().map(Coordinate::normal_lon).collect();
        longitudes.sort_by(f64::total_cmp);

        let first = longitudes[0];
        let last = longitudes[longitudes.len() - 1];

        // The gap from the last longitude around to the first one
        let mut largest_gap = first + 360.0 - last;
        let mut west = first;
        let mut east = last;

        for pair in longitudes.windows(2) {
            let gap = pair[1] - pair[0];
            if gap > largest_gap {
                largest_gap = gap;
                east = pair[0];
                west = pair[1];
            }
        }

        if east < west {
            east += 360.0;
        }

        Ok(Self::new(
            Coordinate::new(south, west)?,
            Coordinate::new(north, east)?,
        ))
    }

    /// Northwest corner
    pub fn nw(&self) -> Coordinate {
        Coordinate::from_valid(self.ne.latitude(), self.sw.longitude())
    }

    /// Southeast corner
    pub fn se(&self) -> Coordinate {
        Coordinate::from_valid(self.sw.latitude(), self.ne.longitude())
    }

    /// Angular width in degrees, in `[0, 360)`.
    pub fn width_degrees(&self) -> f64 {
        (self.ne.longitude() - self.sw.longitude() + 360.0).rem_euclid(360.0)
    }

    fn contains_longitude(&self, longitude: f64) -> bool {
        if self.ne.longitude() - self.sw.longitude() >= 360.0 {
            return true;
        }

        let west = self.sw.normal_lon();
        let east = self.ne.normal_lon();
        if west <= east {
            longitude >= west && longitude <= east
        } else {
            longitude >= west || longitude <= east
        }
    }

    /// Checks if the bounds contain a coordinate. Edges are inclusive.
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        coordinate.latitude() >= self.sw.latitude()
            && coordinate.latitude() <= self.ne.latitude()
            && self.contains_longitude(coordinate.normal_lon())
    }

    /// Extends the bounds to include a coordinate.
    ///
    /// Longitude grows toward whichever side reaches the coordinate sooner.
    pub fn extend(&mut self, coordinate: &Coordinate) -> Result<()> {
        self.sw
            .set_latitude(self.sw.latitude().min(coordinate.latitude()))?;
        self.ne
            .set_latitude(self.ne.latitude().max(coordinate.latitude()))?;

        let longitude = coordinate.normal_lon();
        if self.contains_longitude(longitude) {
            return Ok(());
        }

        let east_dist = (longitude - self.ne.normal_lon()).rem_euclid(360.0);
        let west_dist = (self.sw.normal_lon() - longitude).rem_euclid(360.0);

        if east_dist < west_dist {
            self.ne.set_longitude(self.ne.longitude() + east_dist)
        } else {
            self.sw.set_longitude(self.sw.longitude() - west_dist)
        }
    }

    /// Gets the center of the bounds.
    ///
    /// Under [`Projection::Mercator`] the vertical center is the midpoint on screen
    /// rather than the midpoint in degrees.
    pub fn center(&self, projection: Projection) -> Result<Coordinate> {
        let nw = self.nw();
        let height = self.sw.distance_to(&nw, Unit::Degree, projection)?;
        let mut center = nw.offset(-height / 2.0, 0.0, Unit::Degree, projection)?;

        let mut longitude = (nw.longitude() + self.ne.longitude()) / 2.0;
        if self.ne.longitude() < nw.longitude() {
            longitude += 180.0;
        }
        center.set_longitude(longitude)?;

        Ok(center)
    }
}

impl TryFrom<geo_types::Rect<f64>> for GeoBounds {
    type Error = MapError;

    fn try_from(rect: geo_types::Rect<f64>) -> Result<Self> {
        let min = rect.min();
        let max = rect.max();
        Self::from_edges(min.y, min.x, max.y, max.x)
    }
}
