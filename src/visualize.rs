use crate::earth_engine::expression::ValueNode;
use crate::region::Region;
use serde::{Deserialize, Serialize};

/// Linear stretch applied to three bands, rendered as an 8-bit RGB image.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VisParams {
    pub bands: Vec<String>,
    pub min: f64,
    pub max: f64,
    pub gamma: f64,
}

impl Default for VisParams {
    fn default() -> Self {
        Self {
            bands: vec!["B4".to_string(), "B3".to_string(), "B2".to_string()],
            min: 0.0,
            max: 3000.0,
            gamma: 1.2,
        }
    }
}

fn band_list(bands: &[String]) -> ValueNode {
    ValueNode::array(bands.iter().map(|b| ValueNode::constant(b.as_str())).collect())
}

/// Select the RGB bands of a catalog image, stretch them and clip the result to `region`.
///
/// Nothing is checked locally: an image lacking one of the bands fails on the platform when
/// the result is computed.
pub fn process_image(image_id: &str, vis: &VisParams, region: &Region) -> ValueNode {
    let image = ValueNode::invoke("Image.load", [("id", ValueNode::constant(image_id))]);

    let rgb = ValueNode::invoke(
        "Image.select",
        [("input", image), ("bandSelectors", band_list(&vis.bands))],
    );

    let visualized = ValueNode::invoke(
        "Image.visualize",
        [
            ("image", rgb),
            ("bands", band_list(&vis.bands)),
            ("min", ValueNode::constant(vis.min)),
            ("max", ValueNode::constant(vis.max)),
            ("gamma", ValueNode::constant(vis.gamma)),
        ],
    );

    ValueNode::invoke(
        "Image.clip",
        [("input", visualized), ("geometry", region.to_geometry())],
    )
}
