use crate::error::ConfigError;
use crate::region::{Coordinate, Region};
use crate::visualize::VisParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml;

pub const DEFAULT_API_ROOT: &str = "https://earthengine.googleapis.com/v1/";

/// Hartbeespoort Dam, Sentinel-2 Level-1C, previous three years.
pub const HARTBEESPOORT_DAM: &str = r#"
name = "Hartbeespoort Dam"

[region]
# longitude, latitude
center = [27.8486, -25.7478]
buffer_m = 3500.0

[collection]
id = "COPERNICUS/S2"
cloud_property = "CLOUDY_PIXEL_PERCENTAGE"
max_cloud_percentage = 20.0

[visualization]
bands = ["B4", "B3", "B2"]
min = 0.0
max = 3000.0
gamma = 1.2

[export]
scale_m = 10.0
file_prefix = "hartbeespoort_dam"
folder_prefix = "images"
years_back = 3
"#;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub name: String,
    pub region: RegionConfig,
    pub collection: CollectionConfig,
    #[serde(default)]
    pub visualization: VisParams,
    pub export: ExportSettings,
    #[serde(default)]
    pub service: ServiceSettings,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RegionConfig {
    pub center: [f64; 2],
    pub buffer_m: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CollectionConfig {
    pub id: String,
    pub cloud_property: String,
    pub max_cloud_percentage: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ExportSettings {
    pub scale_m: f64,
    pub file_prefix: String,
    pub folder_prefix: String,
    pub years_back: u32,
    #[serde(default)]
    pub skip_existing: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServiceSettings {
    pub api_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            timeout_secs: None,
            page_size: None,
        }
    }
}

impl ExportConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(template: &str) -> Result<Self> {
        let config: Self = toml::from_str(template)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(self: &Self) -> std::result::Result<(), ConfigError> {
        let vis = &self.visualization;
        if vis.bands.len() != 3 {
            return Err(ConfigError::BandCount(vis.bands.len()));
        }
        if vis.max <= vis.min {
            return Err(ConfigError::StretchRange {
                min: vis.min,
                max: vis.max,
            });
        }
        if vis.gamma <= 0.0 {
            return Err(ConfigError::Gamma(vis.gamma));
        }
        if self.export.scale_m <= 0.0 {
            return Err(ConfigError::Scale(self.export.scale_m));
        }
        Ok(())
    }

    pub fn region(self: &Self) -> Region {
        Region::new(Coordinate::from(self.region.center), self.region.buffer_m)
    }
}
