use crate::collection::CollectionQuery;
use crate::config::ExportConfig;
use crate::date_range::{DateRange, DATE_FORMAT};
use crate::earth_engine::expression::Expression;
use crate::earth_engine::{ImageRecord, ImageryService, PixelsRequest};
use crate::visualize::process_image;
use anyhow::Result;
use chrono::{Local, TimeZone};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const PLAN_FILE_NAME: &str = "export_plan.json";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub image_id: String,
    pub time_start: Option<i64>,
    pub cloud_cover: Option<f64>,
    pub output: PathBuf,
    pub scale_m: f64,
}

#[derive(Deserialize, Serialize, Debug, PartialEq)]
pub struct ExportPlan {
    pub range: DateRange,
    pub folder: PathBuf,
    pub jobs: Vec<ExportJob>,
}

#[derive(Debug, PartialEq)]
pub enum ExportOutcome {
    Exported(u64),
    Skipped,
}

impl ExportPlan {
    pub fn new(range: DateRange, folder: PathBuf, jobs: Vec<ExportJob>) -> Self {
        Self {
            range,
            folder,
            jobs,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// One job per record, named after its capture date in `tz`.
    pub fn from_records<Tz: TimeZone>(
        records: &[ImageRecord],
        config: &ExportConfig,
        range: DateRange,
        folder: PathBuf,
        tz: &Tz,
    ) -> Self
    where
        Tz::Offset: Display,
    {
        let jobs = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let label = date_label(record.time_start, i, tz);
                let file_name = image_file_name(&config.export.file_prefix, &label);
                ExportJob {
                    image_id: record.id.clone(),
                    time_start: record.time_start,
                    cloud_cover: record.cloud_cover(&config.collection.cloud_property),
                    output: folder.join(file_name),
                    scale_m: config.export.scale_m,
                }
            })
            .collect();
        Self::new(range, folder, jobs)
    }

    /// Resolve the collection for `range` and plan one export per image.
    pub async fn generate(
        service: &impl ImageryService,
        config: &ExportConfig,
        range: DateRange,
        folder: PathBuf,
    ) -> Result<Self> {
        let records = CollectionQuery::new(config, range).resolve(service).await?;
        let plan = Self::from_records(&records, config, range, folder, &Local);
        info!("Planned {} exports into {}", plan.jobs.len(), plan.folder.display());
        Ok(plan)
    }

    /// Run every job in order. The first failure aborts the rest.
    pub async fn execute(
        self: &Self,
        service: &impl ImageryService,
        config: &ExportConfig,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.folder)?;

        let region = config.region();
        let mut exported = vec![];
        for job in self.jobs.iter() {
            let image = process_image(&job.image_id, &config.visualization, &region);
            let grid = region.pixel_grid(job.scale_m);
            let request = PixelsRequest::geotiff(Expression::new(image), grid);

            match try_export(service, &request, &job.output, config.export.skip_existing).await? {
                ExportOutcome::Exported(byte_count) => {
                    info!(
                        "{} ({:?}% cloud) -> {} ({byte_count} bytes)",
                        job.image_id,
                        job.cloud_cover,
                        job.output.display()
                    );
                    println!("Downloaded: {}", job.output.display());
                }
                ExportOutcome::Skipped => {
                    println!("Output file already exists: {}", job.output.display());
                }
            }
            exported.push(job.output.clone());
        }
        Ok(exported)
    }
}

/// Query, visualize and export every image captured in `range` into `folder`.
pub async fn download_images_for_range(
    service: &impl ImageryService,
    config: &ExportConfig,
    range: DateRange,
    folder: PathBuf,
) -> Result<Vec<PathBuf>> {
    let plan = ExportPlan::generate(service, config, range, folder).await?;
    plan.execute(service, config).await
}

/// Write the rendered image to `output`, going through a `.partial` file so an interrupted
/// export never leaves a truncated raster under the final name.
pub async fn try_export(
    service: &impl ImageryService,
    request: &PixelsRequest,
    output: &Path,
    skip_existing: bool,
) -> Result<ExportOutcome> {
    if skip_existing && output.exists() {
        return Ok(ExportOutcome::Skipped);
    }

    if let Some(parent_dir) = output.parent() {
        fs::create_dir_all(parent_dir)?;
    }

    let mut partial = output.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut sink = BufWriter::new(File::create(&partial)?);
    let written = render_into(service, request, &mut sink).await;
    drop(sink);

    let byte_count = match written {
        Ok(byte_count) => byte_count,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };

    fs::rename(&partial, output)?;
    Ok(ExportOutcome::Exported(byte_count))
}

/// Stream the rendered file into `sink` and flush it.
async fn render_into<W: Write>(
    service: &impl ImageryService,
    request: &PixelsRequest,
    sink: &mut W,
) -> Result<u64> {
    let byte_count = service.compute_pixels(request, sink).await?;
    sink.flush()?;
    Ok(byte_count)
}

/// Calendar date of an epoch-milliseconds timestamp in `tz`.
pub fn format_capture_date<Tz: TimeZone>(millis: i64, tz: &Tz) -> Option<String>
where
    Tz::Offset: Display,
{
    let time = tz.timestamp_millis_opt(millis).single()?;
    Some(time.format(DATE_FORMAT).to_string())
}

pub fn date_label<Tz: TimeZone>(time_start: Option<i64>, index: usize, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    match time_start.and_then(|t| format_capture_date(t, tz)) {
        Some(date) => date,
        None => {
            warn!("Image {index} has no capture date");
            format!("unknown_date_{index}")
        }
    }
}

pub fn image_file_name(prefix: &str, label: &str) -> String {
    format!("{prefix}_{label}.tif")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HARTBEESPOORT_DAM;
    use crate::error::ServiceError;
    use chrono::{FixedOffset, Utc};
    use serde_json::Map;
    use std::cell::RefCell;
    use tempfile::tempdir;

    const TIFF_MAGIC: &[u8] = b"II*\0";

    struct MockCatalog {
        records: Vec<ImageRecord>,
        fail_on: Option<usize>,
        requests: RefCell<Vec<PixelsRequest>>,
    }

    impl MockCatalog {
        fn new(timestamps: &[Option<i64>]) -> Self {
            let records = timestamps
                .iter()
                .enumerate()
                .map(|(i, &time_start)| ImageRecord {
                    id: format!("COPERNICUS/S2/image_{i}"),
                    time_start,
                    properties: Map::new(),
                })
                .collect();
            Self {
                records,
                fail_on: None,
                requests: RefCell::new(vec![]),
            }
        }
    }

    impl ImageryService for MockCatalog {
        async fn compute_images(self: &Self, _expression: &Expression) -> Result<Vec<ImageRecord>> {
            Ok(self.records.clone())
        }

        async fn compute_pixels<W: Write>(
            self: &Self,
            request: &PixelsRequest,
            sink: &mut W,
        ) -> Result<u64> {
            let index = self.requests.borrow().len();
            self.requests.borrow_mut().push(request.clone());
            if self.fail_on == Some(index) {
                // Part of the file arrives before the connection drops
                sink.write_all(&TIFF_MAGIC[..2])?;
                return Err(ServiceError::Status {
                    status: 429,
                    message: "Too many concurrent aggregations".to_string(),
                }
                .into());
            }
            sink.write_all(TIFF_MAGIC)?;
            Ok(TIFF_MAGIC.len() as u64)
        }
    }

    fn config() -> ExportConfig {
        ExportConfig::from_template(HARTBEESPOORT_DAM).unwrap()
    }

    fn range_2022() -> DateRange {
        DateRange::parse("2022-01-01", "2022-12-31").unwrap()
    }

    #[test]
    fn test_format_capture_date() {
        assert_eq!(
            format_capture_date(1650000000000, &Utc).as_deref(),
            Some("2022-04-15")
        );
        // 05:20 UTC is still the previous day seven hours west
        let west = FixedOffset::west_opt(7 * 3600).unwrap();
        assert_eq!(
            format_capture_date(1650000000000, &west).as_deref(),
            Some("2022-04-14")
        );
    }

    #[test]
    fn test_date_label_fallback() {
        assert_eq!(date_label(None, 1, &Utc), "unknown_date_1");
        assert_eq!(date_label(Some(i64::MAX), 4, &Utc), "unknown_date_4");
        assert_eq!(
            image_file_name("hartbeespoort_dam", "2022-04-15"),
            "hartbeespoort_dam_2022-04-15.tif"
        );
    }

    #[test]
    fn test_plan_from_records() {
        let catalog = MockCatalog::new(&[Some(1650000000000), None]);
        let plan = ExportPlan::from_records(
            &catalog.records,
            &config(),
            range_2022(),
            PathBuf::from("images_2022"),
            &Utc,
        );

        let outputs: Vec<_> = plan.jobs.iter().map(|j| j.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![
                PathBuf::from("images_2022/hartbeespoort_dam_2022-04-15.tif"),
                PathBuf::from("images_2022/hartbeespoort_dam_unknown_date_1.tif"),
            ]
        );
        assert!(plan.jobs.iter().all(|j| j.scale_m == 10.0));
        assert!(plan.jobs.iter().all(|j| j.cloud_cover.is_none()));
        assert_eq!(plan.jobs[1].image_id, "COPERNICUS/S2/image_1");
    }

    #[test]
    fn test_plan_carries_cloud_cover() {
        let mut catalog = MockCatalog::new(&[Some(1650000000000), None]);
        catalog.records[0]
            .properties
            .insert("CLOUDY_PIXEL_PERCENTAGE".to_string(), serde_json::json!(12.5));
        let plan = ExportPlan::from_records(
            &catalog.records,
            &config(),
            range_2022(),
            PathBuf::from("images_2022"),
            &Utc,
        );

        assert_eq!(plan.jobs[0].cloud_cover, Some(12.5));
        assert_eq!(plan.jobs[1].cloud_cover, None);
    }

    #[test]
    fn test_write_then_read_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PLAN_FILE_NAME);
        let catalog = MockCatalog::new(&[Some(1650000000000), None, Some(1660000000000)]);
        let plan = ExportPlan::from_records(
            &catalog.records,
            &config(),
            range_2022(),
            dir.path().to_path_buf(),
            &Utc,
        );
        plan.write(&path).unwrap();

        let read = ExportPlan::read(&path).unwrap();
        assert_eq!(read, plan);
        assert_eq!(read.jobs.len(), 3);
    }

    #[tokio::test]
    async fn test_download_images_for_range() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("images_2022");
        let catalog = MockCatalog::new(&[Some(1650000000000), None]);

        let exported = download_images_for_range(&catalog, &config(), range_2022(), folder.clone())
            .await
            .unwrap();

        let first = format_capture_date(1650000000000, &Local).unwrap();
        assert_eq!(
            exported,
            vec![
                folder.join(format!("hartbeespoort_dam_{first}.tif")),
                folder.join("hartbeespoort_dam_unknown_date_1.tif"),
            ]
        );
        for path in exported.iter() {
            assert_eq!(fs::read(path).unwrap(), TIFF_MAGIC);
        }
        assert_eq!(fs::read_dir(&folder).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_every_image_is_exported() {
        let dir = tempdir().unwrap();
        let timestamps: Vec<_> = (0..7).map(|day| Some(1640995200000 + day * 86_400_000)).collect();
        let catalog = MockCatalog::new(&timestamps);

        let exported = download_images_for_range(
            &catalog,
            &config(),
            range_2022(),
            dir.path().join("images_2022"),
        )
        .await
        .unwrap();

        assert_eq!(exported.len(), catalog.records.len());
        assert_eq!(catalog.requests.borrow().len(), catalog.records.len());
    }

    #[tokio::test]
    async fn test_requests_follow_config() {
        let dir = tempdir().unwrap();
        let config = config();
        let catalog = MockCatalog::new(&[Some(1650000000000)]);
        download_images_for_range(&catalog, &config, range_2022(), dir.path().to_path_buf())
            .await
            .unwrap();

        let requests = catalog.requests.borrow();
        let region = config.region();
        assert_eq!(requests[0].file_format, "GEO_TIFF");
        assert_eq!(requests[0].grid, region.pixel_grid(10.0));
        assert_eq!(
            requests[0].expression.root().unwrap().function_name(),
            Some("Image.clip")
        );
    }

    #[tokio::test]
    async fn test_existing_folder_is_reused() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("images_2022");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("notes.txt"), "keep me").unwrap();

        let catalog = MockCatalog::new(&[None]);
        let exported = download_images_for_range(&catalog, &config(), range_2022(), folder.clone())
            .await
            .unwrap();

        assert_eq!(exported, vec![folder.join("hartbeespoort_dam_unknown_date_0.tif")]);
        assert_eq!(fs::read_to_string(folder.join("notes.txt")).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_exports() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("images_2022");
        let mut catalog = MockCatalog::new(&[None, None, None]);
        catalog.fail_on = Some(1);

        let err = download_images_for_range(&catalog, &config(), range_2022(), folder.clone())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::Status { status: 429, .. })
        ));
        assert_eq!(catalog.requests.borrow().len(), 2);
        assert!(folder.join("hartbeespoort_dam_unknown_date_0.tif").exists());
        assert!(!folder.join("hartbeespoort_dam_unknown_date_1.tif").exists());
        assert!(!folder.join("hartbeespoort_dam_unknown_date_1.tif.partial").exists());
        assert!(!folder.join("hartbeespoort_dam_unknown_date_2.tif").exists());
    }

    /// Accepts writes, fails on flush like a full disk would.
    struct FullDisk(Vec<u8>);

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
        }
    }

    #[tokio::test]
    async fn test_flush_failure_is_an_export_error() {
        let catalog = MockCatalog::new(&[None]);
        let grid = config().region().pixel_grid(10.0);
        let request = PixelsRequest::geotiff(
            Expression::new(crate::earth_engine::expression::ValueNode::constant(0)),
            grid,
        );
        let mut sink = FullDisk(vec![]);

        let err = render_into(&catalog, &request, &mut sink).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<std::io::Error>().map(|e| e.kind()),
            Some(std::io::ErrorKind::Other)
        );
        assert_eq!(sink.0, TIFF_MAGIC);
    }

    #[tokio::test]
    async fn test_skip_existing() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("images_2022");
        fs::create_dir_all(&folder).unwrap();
        let existing = folder.join("hartbeespoort_dam_unknown_date_0.tif");
        fs::write(&existing, "old").unwrap();

        let mut config = config();
        config.export.skip_existing = true;
        let catalog = MockCatalog::new(&[None]);
        download_images_for_range(&catalog, &config, range_2022(), folder)
            .await
            .unwrap();

        assert!(catalog.requests.borrow().is_empty());
        assert_eq!(fs::read_to_string(existing).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_overwrite_by_default() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("hartbeespoort_dam_unknown_date_0.tif");
        fs::write(&output, "old").unwrap();

        let catalog = MockCatalog::new(&[None]);
        let grid = config().region().pixel_grid(10.0);
        let request = PixelsRequest::geotiff(
            Expression::new(crate::earth_engine::expression::ValueNode::constant(0)),
            grid,
        );
        let outcome = try_export(&catalog, &request, &output, false).await.unwrap();

        assert_eq!(outcome, ExportOutcome::Exported(4));
        assert_eq!(fs::read(&output).unwrap(), TIFF_MAGIC);
    }
}
