//! Client side of the Earth Engine REST API
pub mod expression;
mod session;

pub use session::{Credentials, Session};

use crate::error::ServiceError;
use crate::region::PixelGrid;
use anyhow::Result;
use chrono::DateTime;
use expression::Expression;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::OnceLock;

pub const GEO_TIFF: &str = "GEO_TIFF";

const TIME_START_PROPERTY: &str = "system:time_start";

static ASSET_NAME: OnceLock<Regex> = OnceLock::new();

pub trait ImageryService {
    /// Evaluate an image collection expression into its images, in the platform's order.
    async fn compute_images(self: &Self, expression: &Expression) -> Result<Vec<ImageRecord>>;

    /// Render an image expression and stream the encoded file into `sink`. Returns the number
    /// of bytes written.
    async fn compute_pixels<W: Write>(
        self: &Self,
        request: &PixelsRequest,
        sink: &mut W,
    ) -> Result<u64>;
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PixelsRequest {
    pub expression: Expression,
    pub file_format: String,
    pub grid: PixelGrid,
}

impl PixelsRequest {
    pub fn geotiff(expression: Expression, grid: PixelGrid) -> Self {
        Self {
            expression,
            file_format: GEO_TIFF.to_string(),
            grid,
        }
    }
}

/// One image of a resolved collection, with the metadata the exporter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    /// Capture time in milliseconds since the epoch
    pub time_start: Option<i64>,
    pub properties: Map<String, Value>,
}

impl ImageRecord {
    pub fn cloud_cover(self: &Self, property: &str) -> Option<f64> {
        self.properties.get(property)?.as_f64()
    }
}

/// Image entry of a `computeImages` response.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CatalogImage {
    name: Option<String>,
    id: Option<String>,
    start_time: Option<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

impl TryFrom<CatalogImage> for ImageRecord {
    type Error = ServiceError;

    fn try_from(image: CatalogImage) -> Result<Self, Self::Error> {
        let id = match (image.id, image.name.as_deref()) {
            (Some(id), _) => id,
            (None, Some(name)) => asset_id_from_name(name).ok_or(ServiceError::UnnamedImage)?,
            (None, None) => return Err(ServiceError::UnnamedImage),
        };

        let time_start = match image.start_time.as_deref() {
            Some(start_time) => match DateTime::parse_from_rfc3339(start_time) {
                Ok(t) => Some(t.timestamp_millis()),
                Err(e) => {
                    warn!("Unreadable startTime {start_time:?} on {id}: {e}");
                    None
                }
            },
            None => image
                .properties
                .get(TIME_START_PROPERTY)
                .and_then(Value::as_i64),
        };

        Ok(Self {
            id,
            time_start,
            properties: image.properties,
        })
    }
}

/// `projects/earthengine-public/assets/COPERNICUS/S2/<index>` -> `COPERNICUS/S2/<index>`
fn asset_id_from_name(name: &str) -> Option<String> {
    let re = ASSET_NAME.get_or_init(|| {
        Regex::new(r"^projects/[^/]+/assets/(?<id>.+)$")
            .expect("Regex pattern should always compile")
    });
    let captures = re.captures(name)?;
    Some(captures["id"].to_string())
}
