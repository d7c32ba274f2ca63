use crate::config::{ExportConfig, ExportSettings};
use crate::date_range::{previous_years, DateRange};
use crate::earth_engine::ImageryService;
use crate::export_plan::{download_images_for_range, ExportPlan, PLAN_FILE_NAME};
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// A date range and the folder its images are exported to.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub range: DateRange,
    pub folder: PathBuf,
}

/// One batch per full calendar year before `current_year`, oldest first, each exported to
/// `<output_dir>/<folder_prefix>_<year>`.
pub fn yearly_batches(
    current_year: i32,
    settings: &ExportSettings,
    output_dir: &Path,
) -> Result<Vec<Batch>> {
    let batches = previous_years(current_year, settings.years_back)?
        .into_iter()
        .map(|range| Batch {
            range,
            folder: output_dir.join(format!("{}_{}", settings.folder_prefix, range.start_year())),
        })
        .collect();
    Ok(batches)
}

/// Export every batch in turn. Returns the number of files written.
pub async fn run(
    service: &impl ImageryService,
    config: &ExportConfig,
    batches: &[Batch],
) -> Result<usize> {
    let mut total = 0;
    for batch in batches {
        println!("Downloading images for {}", batch.range);
        let exported =
            download_images_for_range(service, config, batch.range, batch.folder.clone()).await?;
        total += exported.len();
    }
    println!("All downloads complete!");
    Ok(total)
}

/// Resolve every batch and write its export plan into the batch folder without exporting.
pub async fn plan(
    service: &impl ImageryService,
    config: &ExportConfig,
    batches: &[Batch],
) -> Result<Vec<PathBuf>> {
    let mut written = vec![];
    for batch in batches {
        let plan =
            ExportPlan::generate(service, config, batch.range, batch.folder.clone()).await?;
        fs::create_dir_all(&batch.folder)?;
        let path = batch.folder.join(PLAN_FILE_NAME);
        plan.write(&path)?;
        println!("Planned {} exports for {}: {}", plan.jobs.len(), batch.range, path.display());
        written.push(path);
    }
    Ok(written)
}
