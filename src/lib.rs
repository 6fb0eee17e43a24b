//! Streaming extraction of camera and flight metadata from aerial imagery.
//!
//! This crate reads the EXIF and XMP blocks of drone and multispectral camera images
//! and turns vendor-specific tags into normalized values: position, orientation,
//! altitude, camera intrinsics, ground sample distance and radiometric calibration.
//!
//! # Design Principles
//!
//! - **Streaming**: Only the head of a file is read; remote objects are fetched with
//!   growing byte-range requests and never downloaded whole
//! - **Lazy loading**: EXIF and XMP are decoded on first use and cached per parser
//! - **Vendor agnostic**: A [`SensorProfile`] maps logical keys to each vendor's tags
//!
//! # Quick Start
//!
//! ```no_run
//! use aerial_meta::{AltitudeOptions, AltitudeSource, MetadataParser};
//!
//! # fn main() -> aerial_meta::Result<()> {
//! let mut parser = MetadataParser::new("DJI_0042.JPG");
//!
//! let position = parser.location()?;
//! let rotation = parser.rotation(true)?;
//! println!("{} {} at {:?}", position.lat, position.lon, rotation);
//!
//! let altitude = parser.relative_altitude(&AltitudeOptions::new(AltitudeSource::Default))?;
//! println!("{} m above ground ({:?})", altitude.meters, altitude.source);
//!
//! let intrinsics = parser.intrinsics(false)?;
//! println!("focal length {} px", intrinsics.focal_length_pixels());
//! # Ok(())
//! # }
//! ```
//!
//! Remote images are addressed as `s3://bucket/key`:
//!
//! ```no_run
//! use aerial_meta::{ImageHandle, MetadataParser};
//!
//! # fn main() -> aerial_meta::Result<()> {
//! let handle = ImageHandle::parse("s3://survey-bucket/flight-7/IMG_0001.tif");
//! let mut parser = MetadataParser::new(handle);
//! println!("{:?}", parser.make_and_model()?);
//! # Ok(())
//! # }
//! ```

mod altitude;
mod config;
mod elevation;
mod error;
mod exif_tags;
mod handle;
mod intrinsics;
pub mod orientation;
mod parser;
mod profile;
pub mod source;
mod types;
pub mod xmp;

pub use altitude::{parse_session_file, AltitudeOptions, AltitudeOrigin, AltitudeResult, AltitudeSource};
pub use config::{ParserConfig, DEFAULT_OBJECT_STORE_ENDPOINT, DEFAULT_SESSION_FILE};
pub use elevation::{ElevationService, ElevationTransport, HttpTransport, API_KEY_ENV, DEFAULT_ELEVATION_URL};
pub use error::{Error, Result};
pub use exif_tags::{RawExifTags, TagValue};
pub use handle::ImageHandle;
pub use intrinsics::{CameraIntrinsics, PixelPitchOverrides, PixelPitchTable};
pub use orientation::{Euler, Quaternion};
pub use parser::{GsdOptions, MetadataParser, MetadataParserBuilder, DEFAULT_TIMESTAMP_FORMAT};
pub use profile::{ProfileKey, SensorProfile};
pub use source::{ByteRange, RangeFetch, RawTagSource};
pub use types::{Coordinates, Dimensions, GpsAccuracy, PixelCoords, Version};
pub use xmp::{RawXmpProperties, XmpValue};

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
