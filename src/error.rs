//! Error types for aerial-meta

use std::io;

/// Result type for aerial-meta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extracting or deriving image metadata
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tag is absent from the image, or the sensor profile has no tag for it
    #[error("{0}. Sensor might not be supported")]
    MissingTag(String),

    /// A tag is present but could not be parsed or converted
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// The image file or object could not be opened
    #[error("Source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// The elevation service failed or returned a non-OK status
    #[error("External service error: {0}")]
    ExternalService(String),

    /// A derived value failed a sanity check
    #[error("Value out of range: {0}")]
    ValueRange(String),

    /// A configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error after the source was opened
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn missing(what: impl Into<String>) -> Self {
        Self::MissingTag(what.into())
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::MalformedData(what.into())
    }

    /// True for the two parsing failures: a missing tag or a malformed one.
    pub fn is_parsing(&self) -> bool {
        matches!(self, Self::MissingTag(_) | Self::MalformedData(_))
    }
}
