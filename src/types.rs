//! Small value types returned by the parser

use serde::Serialize;
use std::fmt;

/// Latitude and longitude in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Image height and width in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub height: u32,
    pub width: u32,
}

impl Dimensions {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

/// A point on the sensor in pixels from the origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelCoords {
    pub x: f64,
    pub y: f64,
}

/// Firmware version as MAJOR.MINOR.PATCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// GPS accuracy along each axis in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsAccuracy {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
