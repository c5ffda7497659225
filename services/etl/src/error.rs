//! Error taxonomy for the ETL pipeline.
//!
//! Only two classes of failure abort a run: a source that cannot be read or
//! has the wrong shape, and a failed warehouse load. Normalization gaps,
//! unparseable numbers and referential gaps are recovered where they happen
//! and surface through logging and the run diagnostics instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read workbook {origin}: {message}")]
    Workbook { origin: String, message: String },

    #[error("malformed XML in {origin}: {message}")]
    Xml { origin: String, message: String },

    /// The file parsed but does not have the expected columns or records.
    #[error("unexpected layout in {origin}: {message}")]
    Layout { origin: String, message: String },
}

impl ExtractError {
    pub(crate) fn layout(origin: &str, message: impl Into<String>) -> Self {
        ExtractError::Layout {
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("warehouse load failed: {0}")]
    Load(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = EtlError> = std::result::Result<T, E>;
