use anyhow::Result;
use chrono::{Datelike, Local};
use clap::Parser;
use std::path::PathBuf;

use reservoir_imagery::config::{ExportConfig, HARTBEESPOORT_DAM};
use reservoir_imagery::driver;
use reservoir_imagery::earth_engine::{Credentials, Session};

/// Export cloud-filtered Sentinel-2 true color images of a reservoir, one folder per year.
///
/// Reads the Earth Engine project from `EarthEngine_Project` and an access token from
/// `EARTHENGINE_TOKEN`, either from the environment or a `.env` file.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML export configuration. Defaults to Hartbeespoort Dam.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the yearly image folders are created in
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Year the previous full years are counted back from
    #[arg(short, long)]
    year: Option<i32>,

    /// Write an export plan per year instead of exporting
    #[arg(long)]
    plan_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ExportConfig::read(path)?,
        None => ExportConfig::from_template(HARTBEESPOORT_DAM)?,
    };

    let credentials = Credentials::from_env()?;
    let session = Session::initialize(credentials, &config.service).await?;

    let current_year = args.year.unwrap_or_else(|| Local::now().year());
    let batches = driver::yearly_batches(current_year, &config.export, &args.output_dir)?;

    if args.plan_only {
        driver::plan(&session, &config, &batches).await?;
    } else {
        driver::run(&session, &config, &batches).await?;
    }

    Ok(())
}
