//! Parser configuration, loadable from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration.
//!
//! ```
//! use aerial_meta::ParserConfig;
//!
//! let config = ParserConfig::from_toml_str(r#"
//!     chunk_size = 4096
//!     session_file_name = "flight_session.txt"
//!
//!     [pixel_pitches.Parrot]
//!     Sequoia = 3.75e-6
//! "#).unwrap();
//! assert_eq!(config.chunk_size, 4096);
//! assert_eq!(config.exif_window, 65536);
//! ```

use crate::elevation::{API_KEY_ENV, DEFAULT_ELEVATION_URL};
use crate::error::{Error, Result};
use crate::intrinsics::PixelPitchOverrides;
use crate::source::DEFAULT_CHUNK_SIZE;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default name of the session file colocated with in-house images
pub const DEFAULT_SESSION_FILE: &str = "session.txt";

/// Default base URL for HTTP range reads of remote objects
pub const DEFAULT_OBJECT_STORE_ENDPOINT: &str = "https://s3.amazonaws.com";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Bytes requested per step while scanning for the XMP packet
    pub chunk_size: usize,
    /// Bytes fetched for the first EXIF decoding attempt
    pub exif_window: usize,
    pub elevation_url: String,
    /// Elevation API key; `GOOGLE_API_KEY` is used when absent
    pub elevation_api_key: Option<String>,
    pub session_file_name: String,
    pub object_store_endpoint: String,
    /// Extra pixel pitches (meters) by make then model, merged over the built-in table
    pub pixel_pitches: PixelPitchOverrides,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            exif_window: DEFAULT_CHUNK_SIZE,
            elevation_url: DEFAULT_ELEVATION_URL.to_string(),
            elevation_api_key: None,
            session_file_name: DEFAULT_SESSION_FILE.to_string(),
            object_store_endpoint: DEFAULT_OBJECT_STORE_ENDPOINT.to_string(),
            pixel_pitches: PixelPitchOverrides::new(),
        }
    }
}

impl ParserConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The configured API key, or the environment's
    pub fn api_key(&self) -> Option<String> {
        self.elevation_api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }

    fn validate(self) -> Result<Self> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.exif_window == 0 {
            return Err(Error::Config("exif_window must be positive".into()));
        }
        if let Some((make, model, pitch)) = self
            .pixel_pitches
            .iter()
            .flat_map(|(make, models)| models.iter().map(move |(model, p)| (make, model, *p)))
            .find(|(_, _, p)| !(*p > 0.0))
        {
            return Err(Error::Config(format!(
                "pixel pitch for {} {} must be positive, got {}",
                make, model, pitch
            )));
        }
        Ok(self)
    }
}
