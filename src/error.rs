use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Point ({latitude}, {longitude}) is outside WGS84 bounds")]
    InvalidPoint { latitude: f64, longitude: f64 },

    #[error("Error initializing Earth Engine: {0:#}")]
    Initialization(anyhow::Error),

    #[error("Error querying image collection: {0:#}")]
    Query(anyhow::Error),

    #[error("No image in '{collection}' between {start} and {end} intersects the point of interest")]
    EmptySelection {
        collection: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Image '{image}' is missing requested bands: {}", .missing.join(", "))]
    MissingBands { image: String, missing: Vec<String> },

    #[error("Error exporting image: {0:#}")]
    ExportSubmission(anyhow::Error),

    #[error("Export task '{task}' ended in state {state}: {message}")]
    ExportFailed {
        task: String,
        state: String,
        message: String,
    },
}
