//! Camera intrinsics: focal length, pixel pitch, principal point and distortion

use crate::error::{Error, Result};
use crate::exif_tags::RawExifTags;
use crate::profile::{ProfileKey, SensorProfile};
use crate::types::PixelCoords;
use crate::xmp::RawXmpProperties;
use exif::Tag;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Pixel pitch in meters, by make then model
pub type PixelPitchOverrides = HashMap<String, HashMap<String, f64>>;

/// Sensors that do not record pixel pitch in their metadata
const BUILTIN_PIXEL_PITCHES: &[(&str, &str, f64)] = &[
    ("DJI", "FC6310", 2.41e-6),
    ("DJI", "FC6310S", 2.41e-6),
    ("DJI", "FC220", 1.55e-6),
    ("DJI", "FC6520", 3.4e-6),
    ("DJI", "FC330", 1.57937e-6),
    ("DJI", "FC300X", 1.57937e-6),
    ("DJI", "FC300S", 1.57937e-6),
    ("Hasselblad", "L1D-20c", 2.4e-6),
];

/// Per-make, per-model pixel pitch lookup
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPitchTable {
    entries: PixelPitchOverrides,
}

impl Default for PixelPitchTable {
    fn default() -> Self {
        let mut entries: PixelPitchOverrides = HashMap::new();
        for &(make, model, pitch) in BUILTIN_PIXEL_PITCHES {
            entries
                .entry(make.to_string())
                .or_default()
                .insert(model.to_string(), pitch);
        }
        Self { entries }
    }
}

impl PixelPitchTable {
    /// The built-in table with `overrides` merged on top
    pub fn with_overrides(overrides: &PixelPitchOverrides) -> Self {
        let mut table = Self::default();
        for (make, models) in overrides {
            let slot = table.entries.entry(make.clone()).or_default();
            for (model, pitch) in models {
                slot.insert(model.clone(), *pitch);
            }
        }
        table
    }

    pub fn lookup(&self, make: &str, model: &str) -> Option<f64> {
        self.entries.get(make)?.get(model).copied()
    }
}

/// Pixel pitch of the sensor in meters.
///
/// In-house sensors record `FocalPlaneXResolution` in pixels per centimeter; other
/// makes are looked up by model.
pub fn pixel_pitch(
    profile: SensorProfile,
    make: &str,
    model: &str,
    exif: &RawExifTags,
    table: &PixelPitchTable,
) -> Result<f64> {
    if profile.is_in_house() {
        let resolution = exif.real(Tag::FocalPlaneXResolution, "pixel pitch")?;
        if resolution <= 0.0 {
            return Err(Error::malformed(format!(
                "focal plane resolution must be positive, got {}",
                resolution
            )));
        }
        return Ok(1.0 / resolution / 100.0);
    }
    table
        .lookup(make, model)
        .ok_or_else(|| Error::malformed(format!("pixel pitch unsupported for model {} {}", make, model)))
}

/// Focal length in meters.
///
/// With `calibrated`, the vendor's calibrated XMP value is preferred; if the vendor has
/// none or it does not parse, a warning is logged and the EXIF value is used.
pub fn focal_length(
    profile: SensorProfile,
    exif: &RawExifTags,
    xmp: Option<&RawXmpProperties>,
    calibrated: bool,
) -> Result<f64> {
    if calibrated {
        let calibrated_mm = xmp
            .ok_or_else(|| Error::missing("Couldn't read XMP"))
            .and_then(|xmp| {
                let tag = profile.get(ProfileKey::FocalLen)?;
                xmp.float(tag, "calibrated focal length")
            });
        match calibrated_mm {
            Ok(mm) => return Ok(mm / 1000.0),
            Err(e) => warn!(
                "Calibrated focal length unavailable ({}). Defaulting to uncalibrated focal length",
                e
            ),
        }
    }
    Ok(exif.real(Tag::FocalLength, "the focal length")? / 1000.0)
}

/// Principal point in pixels, converted from the millimeter `x,y` XMP value.
pub fn principal_point(
    profile: SensorProfile,
    xmp: &RawXmpProperties,
    pixel_pitch: f64,
) -> Result<PixelCoords> {
    let tag = profile.get(ProfileKey::PrincipalPoint)?;
    let values = parse_float_list(xmp.text(tag, "the principal point")?, "principal point")?;
    match values.as_slice() {
        [x, y, ..] => Ok(PixelCoords {
            x: x * 0.001 / pixel_pitch,
            y: y * 0.001 / pixel_pitch,
        }),
        _ => Err(Error::malformed("principal point needs two coordinates")),
    }
}

/// Distortion coefficients from a comma-separated XMP value.
///
/// DJI writes a calibration date before the coefficients (`date;k1,k2,...`); the date
/// part is skipped.
pub fn distortion(profile: SensorProfile, xmp: &RawXmpProperties) -> Result<Vec<f64>> {
    let tag = profile.get(ProfileKey::Distortion)?;
    let raw = xmp.text(tag, "the distortion parameters")?;
    let coefficients = raw.rsplit(';').next().unwrap_or(raw);
    parse_float_list(coefficients, "distortion parameters")
}

fn parse_float_list(raw: &str, what: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|item| {
            item.trim()
                .parse::<f64>()
                .map_err(|_| Error::malformed(format!("{} contains a non-number: {:?}", what, item)))
        })
        .collect()
}

/// Focal length expressed in pixels
pub fn focal_length_pixels(focal_length_m: f64, pixel_pitch_m: f64) -> f64 {
    focal_length_m / pixel_pitch_m
}

/// Intrinsic camera parameters of one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraIntrinsics {
    /// Focal length in meters
    pub focal_length: f64,
    /// Pixel pitch in meters
    pub pixel_pitch: f64,
    /// Principal point in pixels, when the vendor records one
    pub principal_point: Option<PixelCoords>,
    /// Distortion coefficients, when the vendor records them
    pub distortion: Option<Vec<f64>>,
}

impl CameraIntrinsics {
    pub fn focal_length_pixels(&self) -> f64 {
        focal_length_pixels(self.focal_length, self.pixel_pitch)
    }
}
