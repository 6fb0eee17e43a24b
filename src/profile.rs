//! Vendor tag profiles
//!
//! Each sensor family stores the same logical quantities under its own XMP tag
//! names. A [`SensorProfile`] is selected from the EXIF make alone and maps every
//! [`ProfileKey`] to a concrete tag name, or reports the capability as missing.

use crate::error::{Error, Result};
use std::fmt;

/// Logical metadata keys a profile can map to XMP tag names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKey {
    RelativeAlt,
    LrfAlt,
    /// Misspelled laser-range-finder tag written by one legacy firmware build
    LrfAltLegacy,
    Roll,
    Pitch,
    Yaw,
    FocalLen,
    PrincipalPoint,
    Distortion,
    Ils,
    WavelengthCentral,
    WavelengthFwhm,
    BandName,
    HomepointLat,
    HomepointLon,
    SelfData,
    CaptureUuid,
    FlightUuid,
    Irradiance,
    DewarpFlag,
    XAccuracy,
    YAccuracy,
    ZAccuracy,
}

impl ProfileKey {
    pub const ALL: [ProfileKey; 23] = [
        Self::RelativeAlt,
        Self::LrfAlt,
        Self::LrfAltLegacy,
        Self::Roll,
        Self::Pitch,
        Self::Yaw,
        Self::FocalLen,
        Self::PrincipalPoint,
        Self::Distortion,
        Self::Ils,
        Self::WavelengthCentral,
        Self::WavelengthFwhm,
        Self::BandName,
        Self::HomepointLat,
        Self::HomepointLon,
        Self::SelfData,
        Self::CaptureUuid,
        Self::FlightUuid,
        Self::Irradiance,
        Self::DewarpFlag,
        Self::XAccuracy,
        Self::YAccuracy,
        Self::ZAccuracy,
    ];

    /// Human-readable name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelativeAlt => "relative altitude",
            Self::LrfAlt => "laser range finder altitude",
            Self::LrfAltLegacy => "legacy laser range finder altitude",
            Self::Roll => "roll",
            Self::Pitch => "pitch",
            Self::Yaw => "yaw",
            Self::FocalLen => "calibrated focal length",
            Self::PrincipalPoint => "principal point",
            Self::Distortion => "distortion parameters",
            Self::Ils => "ILS",
            Self::WavelengthCentral => "central wavelength",
            Self::WavelengthFwhm => "wavelength FWHM",
            Self::BandName => "band name",
            Self::HomepointLat => "home point latitude",
            Self::HomepointLon => "home point longitude",
            Self::SelfData => "self data",
            Self::CaptureUuid => "capture id",
            Self::FlightUuid => "flight id",
            Self::Irradiance => "irradiance",
            Self::DewarpFlag => "dewarp flag",
            Self::XAccuracy => "x accuracy",
            Self::YAccuracy => "y accuracy",
            Self::ZAccuracy => "z accuracy",
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor families with distinct XMP tag schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorProfile {
    /// In-house sensors
    Sentera,
    /// DJI and Hasselblad (gimbal-referenced orientation)
    Dji,
    MicaSense,
    Parrot,
    /// Any other make: only the shared radiometric tags
    Default,
}

impl SensorProfile {
    /// Select the profile for an EXIF make. Pure; no I/O.
    pub fn resolve(make: &str) -> Self {
        match make.trim() {
            "Sentera" => Self::Sentera,
            "DJI" | "Hasselblad" => Self::Dji,
            "MicaSense" => Self::MicaSense,
            "Parrot" => Self::Parrot,
            _ => Self::Default,
        }
    }

    /// XMP tag name for `key`, if this profile defines one
    pub fn tag(&self, key: ProfileKey) -> Option<&'static str> {
        use ProfileKey::*;
        let vendor = match (self, key) {
            (Self::Sentera, RelativeAlt) => Some("Camera:AboveGroundAltitude"),
            (Self::Sentera, Roll) => Some("Camera:Roll"),
            (Self::Sentera, Pitch) => Some("Camera:Pitch"),
            (Self::Sentera, Yaw) => Some("Camera:Yaw"),
            (Self::Sentera, FocalLen) => Some("Camera:PerspectiveFocalLength"),
            (Self::Sentera, LrfAlt) => Some("Sentera:AltimeterCalculatedAGL"),
            (Self::Sentera, LrfAltLegacy) => Some("Sentera:AltimeterCalcuatedAGL"),
            (Self::Sentera, HomepointLat) => Some("SENTERA:HomePointLatitude"),
            (Self::Sentera, HomepointLon) => Some("SENTERA:HomePointLongitude"),
            (Self::Sentera, PrincipalPoint) => Some("Camera:PrincipalPoint"),
            (Self::Sentera, Distortion) => Some("Camera:PerspectiveDistortion"),
            (Self::Sentera, CaptureUuid) => Some("Camera:CaptureUUID"),
            (Self::Sentera, FlightUuid) => Some("Camera:FlightUUID"),
            (Self::Sentera, XAccuracy | YAccuracy) => Some("Camera:GPSXYAccuracy"),
            (Self::Sentera, ZAccuracy) => Some("Camera:GPSZAccuracy"),

            (Self::Dji, RelativeAlt) => Some("drone-dji:RelativeAltitude"),
            (Self::Dji, Roll) => Some("drone-dji:GimbalRollDegree"),
            (Self::Dji, Pitch) => Some("drone-dji:GimbalPitchDegree"),
            (Self::Dji, Yaw) => Some("drone-dji:GimbalYawDegree"),
            (Self::Dji, FocalLen) => Some("drone-dji:CalibratedFocalLength"),
            (Self::Dji, SelfData) => Some("drone-dji:SelfData"),
            (Self::Dji, Irradiance) => Some("Camera:Irradiance"),
            (Self::Dji, CaptureUuid) => Some("drone-dji:CaptureUUID"),
            (Self::Dji, DewarpFlag) => Some("drone-dji:DewarpFlag"),
            (Self::Dji, Distortion) => Some("drone-dji:DewarpData"),
            (Self::Dji, XAccuracy) => Some("drone-dji:RtkStdLon"),
            (Self::Dji, YAccuracy) => Some("drone-dji:RtkStdLat"),
            (Self::Dji, ZAccuracy) => Some("drone-dji:RtkStdHgt"),

            (Self::MicaSense, CaptureUuid) => Some("MicaSense:CaptureId"),
            (Self::MicaSense, Irradiance) => Some("Camera:Irradiance"),
            (Self::MicaSense, XAccuracy | YAccuracy) => Some("Camera:GPSXYAccuracy"),
            (Self::MicaSense, ZAccuracy) => Some("Camera:GPSZAccuracy"),

            (Self::Parrot, CaptureUuid) => Some("Camera:CaptureUUID"),

            _ => None,
        };
        vendor.or(match key {
            WavelengthCentral => Some("Camera:CentralWavelength"),
            WavelengthFwhm => Some("Camera:WavelengthFWHM"),
            BandName => Some("Camera:BandName"),
            Ils => Some("Camera:SunSensor"),
            _ => None,
        })
    }

    /// XMP tag name for `key`, or `MissingTag` if the vendor never defines it.
    ///
    /// The error is the same class raised when the tag is absent from an image.
    pub fn get(&self, key: ProfileKey) -> Result<&'static str> {
        self.tag(key)
            .ok_or_else(|| Error::missing(format!("Couldn't parse {}", key)))
    }

    /// Pitch offset (degrees) that maps this vendor's gimbal frame onto the
    /// camera-down-is-zero frame, if the vendor is gimbal-referenced.
    pub fn gimbal_pitch_offset(&self) -> Option<f64> {
        match self {
            Self::Dji => Some(90.0),
            _ => None,
        }
    }

    /// True when the capture timestamp is recorded in UTC rather than local time
    pub fn records_utc(&self) -> bool {
        matches!(self, Self::Sentera | Self::MicaSense)
    }

    /// True for the in-house sensor family
    pub fn is_in_house(&self) -> bool {
        matches!(self, Self::Sentera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_make() {
        assert_eq!(SensorProfile::resolve("Sentera"), SensorProfile::Sentera);
        assert_eq!(SensorProfile::resolve("DJI"), SensorProfile::Dji);
        assert_eq!(SensorProfile::resolve("Hasselblad"), SensorProfile::Dji);
        assert_eq!(SensorProfile::resolve("MicaSense"), SensorProfile::MicaSense);
        assert_eq!(SensorProfile::resolve("Parrot"), SensorProfile::Parrot);
        assert_eq!(SensorProfile::resolve("Blah"), SensorProfile::Default);
    }

    #[test]
    fn test_get_defined_iff_table_defines() {
        let profiles = [
            SensorProfile::Sentera,
            SensorProfile::Dji,
            SensorProfile::MicaSense,
            SensorProfile::Parrot,
            SensorProfile::Default,
        ];
        for profile in profiles {
            for key in ProfileKey::ALL {
                match profile.tag(key) {
                    Some(name) => assert_eq!(profile.get(key).unwrap(), name),
                    None => assert!(matches!(profile.get(key), Err(Error::MissingTag(_)))),
                }
            }
        }
    }

    #[test]
    fn test_vendor_specific_tags() {
        assert_eq!(
            SensorProfile::Sentera.get(ProfileKey::LrfAltLegacy).unwrap(),
            "Sentera:AltimeterCalcuatedAGL"
        );
        assert_eq!(
            SensorProfile::Dji.get(ProfileKey::Pitch).unwrap(),
            "drone-dji:GimbalPitchDegree"
        );
        assert!(SensorProfile::Dji.get(ProfileKey::HomepointLat).is_err());
        assert!(SensorProfile::Default.get(ProfileKey::RelativeAlt).is_err());
        assert_eq!(
            SensorProfile::Parrot.get(ProfileKey::BandName).unwrap(),
            "Camera:BandName"
        );
    }

    #[test]
    fn test_gimbal_offset_only_for_gimbal_vendors() {
        assert_eq!(SensorProfile::Dji.gimbal_pitch_offset(), Some(90.0));
        assert_eq!(SensorProfile::Sentera.gimbal_pitch_offset(), None);
        assert_eq!(SensorProfile::Default.gimbal_pitch_offset(), None);
    }
}
