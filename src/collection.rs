use crate::config::ExportConfig;
use crate::date_range::{DateRange, DATE_FORMAT};
use crate::earth_engine::expression::{Expression, ValueNode};
use crate::earth_engine::{ImageRecord, ImageryService};
use crate::region::Region;
use anyhow::Result;
use log::debug;

const TIME_START_FIELD: &str = "system:time_start";
const FOOTPRINT_FIELD: &str = ".all";

/// Catalog images intersecting a region, captured within a date range and below a cloud
/// threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub collection_id: String,
    pub region: Region,
    pub range: DateRange,
    pub cloud_property: String,
    pub max_cloud_percentage: f64,
}

impl CollectionQuery {
    pub fn new(config: &ExportConfig, range: DateRange) -> Self {
        Self {
            collection_id: config.collection.id.clone(),
            region: config.region(),
            range,
            cloud_property: config.collection.cloud_property.clone(),
            max_cloud_percentage: config.collection.max_cloud_percentage,
        }
    }

    pub fn to_expression(self: &Self) -> Result<Expression> {
        let collection = ValueNode::invoke(
            "ImageCollection.load",
            [("id", ValueNode::constant(self.collection_id.as_str()))],
        );

        let bounds = ValueNode::invoke(
            "Filter.intersects",
            [
                ("leftField", ValueNode::constant(FOOTPRINT_FIELD)),
                ("rightValue", self.region.to_geometry()),
            ],
        );

        let dates = ValueNode::invoke(
            "Filter.dateRangeContains",
            [
                ("leftValue", date_range_node(&self.range)?),
                ("rightField", ValueNode::constant(TIME_START_FIELD)),
            ],
        );

        let clouds = ValueNode::invoke(
            "Filter.lessThan",
            [
                ("leftField", ValueNode::constant(self.cloud_property.as_str())),
                ("rightValue", ValueNode::constant(self.max_cloud_percentage)),
            ],
        );

        let filtered = [bounds, dates, clouds]
            .into_iter()
            .fold(collection, |collection, filter| {
                ValueNode::invoke(
                    "Collection.filter",
                    [("collection", collection), ("filter", filter)],
                )
            });

        Ok(Expression::new(filtered))
    }

    /// Evaluate the query on the service. Records come back in the service's order.
    pub async fn resolve(self: &Self, service: &impl ImageryService) -> Result<Vec<ImageRecord>> {
        let expression = self.to_expression()?;
        let records = service.compute_images(&expression).await?;
        debug!(
            "{} images in {} for {}",
            records.len(),
            self.collection_id,
            self.range
        );
        Ok(records)
    }
}

fn date_node(date: chrono::NaiveDate) -> ValueNode {
    ValueNode::invoke(
        "Date",
        [("value", ValueNode::constant(date.format(DATE_FORMAT).to_string()))],
    )
}

/// The platform's range excludes its end, so the day after the inclusive end is sent.
fn date_range_node(range: &DateRange) -> Result<ValueNode> {
    Ok(ValueNode::invoke(
        "DateRange",
        [
            ("start", date_node(range.start)),
            ("end", date_node(range.exclusive_end()?)),
        ],
    ))
}
