use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Environment variable {0} is not set")]
    MissingVar(&'static str),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Earth Engine request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Catalog entry has neither an id nor a resource name")]
    UnnamedImage,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Expected exactly 3 visualization bands, got {0}")]
    BandCount(usize),
    #[error("Visualization max ({max}) must be greater than min ({min})")]
    StretchRange { min: f64, max: f64 },
    #[error("Gamma must be positive, got {0}")]
    Gamma(f64),
    #[error("Export scale must be positive, got {0}")]
    Scale(f64),
}
