use crate::earth_engine::expression::ValueNode;
use serde::{Deserialize, Serialize};

/// Flat approximation used for every meters <-> degrees conversion.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

pub const GRID_CRS: &str = "EPSG:4326";

/// Longitude (`x`) and latitude (`y`) in degrees.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

/// Corners of the square enclosing a circle of `distance` meters around `center`.
///
/// Corners are wound (x-d, y-d), (x-d, y+d), (x+d, y+d), (x+d, y-d). A non-positive distance
/// yields a degenerate or inverted square.
pub fn get_rectangle(center: Coordinate, distance: f64) -> [Coordinate; 4] {
    let delta_deg = distance / METERS_PER_DEGREE;
    let Coordinate { x, y } = center;
    [
        Coordinate::new(x - delta_deg, y - delta_deg),
        Coordinate::new(x - delta_deg, y + delta_deg),
        Coordinate::new(x + delta_deg, y + delta_deg),
        Coordinate::new(x + delta_deg, y - delta_deg),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub center: Coordinate,
    pub distance: f64,
    pub corners: [Coordinate; 4],
}

impl Region {
    pub fn new(center: Coordinate, distance: f64) -> Self {
        Self {
            center,
            distance,
            corners: get_rectangle(center, distance),
        }
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounds(self: &Self) -> (f64, f64, f64, f64) {
        self.corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), c| {
                (min_x.min(c.x), min_y.min(c.y), max_x.max(c.x), max_y.max(c.y))
            },
        )
    }

    /// `GeometryConstructors.Polygon` node with a single outer ring.
    pub fn to_geometry(self: &Self) -> ValueNode {
        let ring = self
            .corners
            .iter()
            .map(|c| ValueNode::array(vec![ValueNode::constant(c.x), ValueNode::constant(c.y)]))
            .collect();
        ValueNode::invoke(
            "GeometryConstructors.Polygon",
            [("coordinates", ValueNode::array(vec![ValueNode::array(ring)]))],
        )
    }

    /// Meters spanned by one degree of longitude at the center's latitude.
    pub fn meters_per_degree_x(self: &Self) -> f64 {
        METERS_PER_DEGREE * self.center.y.to_radians().cos()
    }

    /// Export grid covering the region with square `scale` meter pixels, anchored on the
    /// north-west corner. Longitude degrees shrink with latitude, so the grid is narrower than it
    /// is tall away from the equator.
    pub fn pixel_grid(self: &Self, scale: f64) -> PixelGrid {
        let (min_x, _, _, max_y) = self.bounds();
        let lat_scale = self.center.y.to_radians().cos();
        let width = (2.0 * self.distance * lat_scale / scale).ceil().max(1.0) as u32;
        let height = (2.0 * self.distance / scale).ceil().max(1.0) as u32;

        PixelGrid {
            dimensions: Dimensions { width, height },
            affine_transform: AffineTransform {
                scale_x: scale / self.meters_per_degree_x(),
                shear_x: 0.0,
                translate_x: min_x,
                shear_y: 0.0,
                scale_y: -scale / METERS_PER_DEGREE,
                translate_y: max_y,
            },
            crs_code: GRID_CRS.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PixelGrid {
    pub dimensions: Dimensions,
    pub affine_transform: AffineTransform,
    pub crs_code: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffineTransform {
    pub scale_x: f64,
    pub shear_x: f64,
    pub translate_x: f64,
    pub shear_y: f64,
    pub scale_y: f64,
    pub translate_y: f64,
}
