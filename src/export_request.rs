use crate::earth_engine::expression::{Expression, Image};
use crate::error::ExportError;
use crate::geometry::Region;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    #[serde(rename = "GeoTIFF")]
    GeoTiff,
    #[serde(rename = "TFRecord")]
    TfRecord,
}

impl FileFormat {
    pub fn wire_name(&self) -> &str {
        match self {
            Self::GeoTiff => "GEO_TIFF",
            Self::TfRecord => "TF_RECORD_IMAGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Drive { folder: Option<String> },
    CloudStorage { bucket: String, prefix: Option<String> },
}

impl Destination {
    /// Parses `drive://<folder>` or `gs://<bucket>[/<prefix>]`.
    pub fn parse(uri: &str) -> Result<Self, ExportError> {
        let drive = Regex::new(r"^drive://(?<folder>[^/]*)/?$")
            .expect("Regex pattern should always compile");
        let gcs = Regex::new(r"^gs://(?<bucket>[a-z0-9][a-z0-9._-]{1,220}[a-z0-9])(?:/(?<prefix>.*))?$")
            .expect("Regex pattern should always compile");

        if let Some(captures) = drive.captures(uri) {
            let folder = non_empty(captures.name("folder").map(|m| m.as_str()));
            return Ok(Self::Drive { folder });
        }
        if let Some(captures) = gcs.captures(uri) {
            let bucket = captures["bucket"].to_string();
            // A trailing slash names a directory and is kept
            let prefix = captures
                .name("prefix")
                .map(|m| m.as_str())
                .filter(|p| !p.is_empty() && *p != "/")
                .map(str::to_string);
            return Ok(Self::CloudStorage { bucket, prefix });
        }
        Err(ExportError::InvalidConfig(format!(
            "destination '{uri}' is neither drive://<folder> nor gs://<bucket>/<prefix>"
        )))
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(|s| s.trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Export task descriptions are limited to 100 characters from a small alphabet.
pub fn validate_description(description: &str) -> Result<(), ExportError> {
    let re = Regex::new(r"^[A-Za-z0-9 .,:;_-]{1,100}$").expect("Regex pattern should always compile");
    if !re.is_match(description) {
        return Err(ExportError::InvalidConfig(format!(
            "description '{description}' must be 1-100 letters, digits, spaces or .,:;_-"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub image: Image,
    pub description: String,
    pub scale: f64,
    pub region: Region,
    pub file_format: FileFormat,
    pub destination: Destination,
    pub max_pixels: u64,
}

impl ExportRequest {
    pub fn build(
        image: Image,
        description: &str,
        scale: f64,
        region: Region,
        file_format: FileFormat,
        destination: Destination,
        max_pixels: u64,
    ) -> Result<Self, ExportError> {
        validate_description(description)?;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "scale must be a positive number of metres, got {scale}"
            )));
        }
        Ok(Self {
            image,
            description: description.to_string(),
            scale,
            region,
            file_format,
            destination,
            max_pixels,
        })
    }

    /// The image as the service should render it: cut to the region at the export scale.
    pub fn expression(&self) -> Expression {
        self.image
            .clip_to_bounds_and_scale(&self.region, self.scale)
            .to_expression()
    }

    /// A prefix ending in `/` is a directory, so the description names the file inside it.
    fn filename_prefix(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(p) if p.ends_with('/') => format!("{p}{}", self.description),
            Some(p) => p.to_string(),
            None => self.description.clone(),
        }
    }

    pub fn to_body(&self) -> Value {
        let destination = match &self.destination {
            Destination::Drive { folder } => {
                let mut drive = json!({ "filenamePrefix": self.description });
                if let Some(folder) = folder {
                    drive["folder"] = json!(folder);
                }
                json!({ "driveDestination": drive })
            }
            Destination::CloudStorage { bucket, prefix } => json!({
                "cloudStorageDestination": {
                    "bucket": bucket,
                    "filenamePrefix": self.filename_prefix(prefix.as_deref()),
                }
            }),
        };

        let mut file_export_options = json!({ "fileFormat": self.file_format.wire_name() });
        if let (Value::Object(options), Value::Object(dest)) = (&mut file_export_options, destination) {
            options.extend(dest);
        }

        json!({
            "expression": self.expression(),
            "description": self.description,
            "fileExportOptions": file_export_options,
            // int64 fields travel as strings
            "maxPixels": self.max_pixels.to_string(),
        })
    }
}
