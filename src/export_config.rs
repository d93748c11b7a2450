use crate::error::ExportError;
use crate::export_request::{validate_description, Destination, FileFormat};
use crate::geometry::{Point, Region};
use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml;

/// Everything a run needs, as read from disk. Nothing here is trusted until
/// [`ExportConfig::validate`] has turned it into an [`ExportJob`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub credentials: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub collection_id: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub bands: Vec<String>,
    #[serde(default = "default_buffer_radius")]
    pub buffer_radius: f64,
    pub scale: f64,
    pub file_format: FileFormat,
    pub description: String,
    pub destination: String,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    #[serde(default = "default_cloud_cover_property")]
    pub cloud_cover_property: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_buffer_radius() -> f64 {
    5000.0
}

fn default_max_pixels() -> u64 {
    1_000_000_000
}

fn default_cloud_cover_property() -> String {
    "CLOUD_COVER".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

pub fn export_config_toml() -> toml::Table {
    toml::toml! {
        // Path to the service account key file
        credentials = "service-account-key.json"

        latitude = 44.6082
        longitude = -122.9180

        collection_id = "LANDSAT/LC08/C02/T1_TOA"
        date_start = "2024-01-01"
        date_end = "2024-12-31"

        // Output channel order follows this list
        bands = ["B4", "B3", "B2"]

        // Metres around the point covered by the exported file
        buffer_radius = 5000.0
        // Spatial resolution in metres (30 m for Landsat)
        scale = 30.0
        file_format = "GeoTIFF"
        description = "landsat_image"

        // drive://<folder> or gs://<bucket>/<prefix>
        destination = "drive://DufekLab"

        max_pixels = 1000000000
        cloud_cover_property = "CLOUD_COVER"

        wait = false
        poll_interval_secs = 10
    }
}

impl ExportConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        let config: Self = toml::from_str(&table.to_string())?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<ExportJob, ExportError> {
        let point = Point::new(self.latitude, self.longitude)?;
        let region = Region::buffered_bounds(&point, self.buffer_radius)?;
        let dates = DateRange::new(self.date_start, self.date_end)?;

        if self.collection_id.trim().is_empty() {
            return Err(invalid("collection_id must not be empty"));
        }
        if self.cloud_cover_property.trim().is_empty() {
            return Err(invalid("cloud_cover_property must not be empty"));
        }
        validate_bands(&self.bands)?;
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(invalid(format!(
                "scale must be a positive number of metres, got {}",
                self.scale
            )));
        }
        validate_description(&self.description)?;
        let destination = Destination::parse(&self.destination)?;
        if self.max_pixels == 0 {
            return Err(invalid("max_pixels must be greater than zero"));
        }

        Ok(ExportJob {
            credentials: self.credentials.clone(),
            point,
            region,
            dates,
            collection_id: self.collection_id.clone(),
            bands: self.bands.clone(),
            scale: self.scale,
            file_format: self.file_format,
            description: self.description.clone(),
            destination,
            max_pixels: self.max_pixels,
            cloud_cover_property: self.cloud_cover_property.clone(),
            wait: self.wait,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        })
    }
}

fn invalid(message: impl Into<String>) -> ExportError {
    ExportError::InvalidConfig(message.into())
}

fn validate_bands(bands: &[String]) -> Result<(), ExportError> {
    if bands.is_empty() {
        return Err(invalid("at least one band must be selected"));
    }
    let mut seen = HashSet::new();
    for band in bands {
        if band.trim().is_empty() {
            return Err(invalid("band names must not be empty"));
        }
        if !seen.insert(band.as_str()) {
            return Err(invalid(format!("band '{band}' is selected more than once")));
        }
    }
    Ok(())
}

/// Inclusive range of acquisition dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ExportError> {
        if start > end {
            return Err(invalid(format!(
                "date_start ({start}) is after date_end ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First day after the range, for APIs whose upper bound is exclusive.
    pub fn end_exclusive(&self) -> NaiveDate {
        self.end.succ_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A validated configuration, ready to drive a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub credentials: PathBuf,
    pub point: Point,
    pub region: Region,
    pub dates: DateRange,
    pub collection_id: String,
    pub bands: Vec<String>,
    pub scale: f64,
    pub file_format: FileFormat,
    pub description: String,
    pub destination: Destination,
    pub max_pixels: u64,
    pub cloud_cover_property: String,
    pub wait: bool,
    pub poll_interval: Duration,
}
