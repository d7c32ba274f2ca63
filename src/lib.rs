#![allow(async_fn_in_trait)]
pub mod collection;
pub mod config;
pub mod date_range;
pub mod driver;
pub mod earth_engine;
mod error;
pub mod export_plan;
pub mod region;
pub mod visualize;

pub use error::{ConfigError, ServiceError, SessionError};
