//! Relative altitude resolution
//!
//! Three sources can be requested:
//! - `Default`: the vendor's relative-altitude XMP tag
//! - `Lrf`: the laser range finder tag, or its legacy misspelled name
//! - `Terrain`: the default altitude corrected by the terrain elevation change
//!   between the home point and the image position
//!
//! When `lrf` or `terrain` fails and fallback is enabled, the default altitude is
//! returned instead. In-house images that predate the relative-altitude tag always
//! derive the default from GPS altitude minus the session ground altitude.

use crate::elevation::ElevationService;
use crate::error::{Error, Result};
use crate::exif_tags::RawExifTags;
use crate::handle::ImageHandle;
use crate::profile::{ProfileKey, SensorProfile};
use crate::types::Coordinates;
use crate::xmp::RawXmpProperties;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Altitude source requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AltitudeSource {
    #[default]
    Default,
    Lrf,
    Terrain,
}

/// Where a resolved altitude actually came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AltitudeOrigin {
    /// Vendor relative-altitude tag
    Default,
    /// Laser range finder tag
    Lrf,
    /// Default altitude plus terrain correction
    Terrain,
    /// GPS altitude minus the session file's ground altitude
    SessionFallback,
}

/// A relative altitude above ground in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AltitudeResult {
    pub meters: f64,
    pub source: AltitudeOrigin,
}

/// Options for [`AltitudeResolver::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct AltitudeOptions {
    pub source: AltitudeSource,
    /// Fall back to the default altitude when `lrf` or `terrain` fails
    pub fallback: bool,
    /// Elevation API key for `terrain`; the configured or environment key otherwise
    pub api_key: Option<String>,
}

impl Default for AltitudeOptions {
    fn default() -> Self {
        Self {
            source: AltitudeSource::Default,
            fallback: true,
            api_key: None,
        }
    }
}

impl AltitudeOptions {
    pub fn new(source: AltitudeSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Everything needed to resolve the altitude of one image
pub struct AltitudeResolver<'a> {
    pub profile: SensorProfile,
    pub exif: &'a RawExifTags,
    pub xmp: &'a RawXmpProperties,
    pub handle: &'a ImageHandle,
    pub session_file_name: &'a str,
    pub elevation: &'a ElevationService,
}

impl AltitudeResolver<'_> {
    pub fn resolve(&self, options: &AltitudeOptions) -> Result<AltitudeResult> {
        let attempt = match options.source {
            AltitudeSource::Default => return self.default_altitude(),
            AltitudeSource::Lrf => self.lrf_altitude(),
            AltitudeSource::Terrain => self.terrain_altitude(options.api_key.as_deref()),
        };
        match attempt {
            Ok(result) => Ok(result),
            Err(e) if options.fallback && falls_back(&e) => {
                warn!("{}. Falling back to default relative altitude.", e);
                self.default_altitude()
            }
            Err(e) => Err(e),
        }
    }

    fn default_altitude(&self) -> Result<AltitudeResult> {
        let tag = self.profile.tag(ProfileKey::RelativeAlt);
        if let Some(value) = tag.and_then(|t| self.xmp.get(t)) {
            let text = value
                .as_text()
                .ok_or_else(|| Error::malformed("relative altitude is not a scalar"))?;
            let meters = text
                .parse::<f64>()
                .map_err(|_| Error::malformed(format!("relative altitude is not a number: {:?}", text)))?;
            return Ok(AltitudeResult {
                meters,
                source: AltitudeOrigin::Default,
            });
        }

        if !self.profile.is_in_house() {
            return Err(Error::missing("Couldn't parse relative altitude from xmp data"));
        }
        warn!("Relative altitude not found in XMP. Attempting to parse from session file");
        let msl = self.exif.altitude_msl()?;
        let ground = self.session_altitude()?;
        Ok(AltitudeResult {
            meters: msl - ground,
            source: AltitudeOrigin::SessionFallback,
        })
    }

    fn lrf_altitude(&self) -> Result<AltitudeResult> {
        let primary = self
            .profile
            .get(ProfileKey::LrfAlt)
            .and_then(|tag| self.xmp.float(tag, "altimeter LRF altitude"));
        let meters = match primary {
            Err(Error::MissingTag(_)) => self
                .profile
                .get(ProfileKey::LrfAltLegacy)
                .and_then(|tag| self.xmp.float(tag, "altimeter LRF altitude"))?,
            other => other?,
        };
        Ok(AltitudeResult {
            meters,
            source: AltitudeOrigin::Lrf,
        })
    }

    fn terrain_altitude(&self, api_key: Option<&str>) -> Result<AltitudeResult> {
        let home = self.home_point()?;
        let image = self.exif.coordinates()?;
        let home_elevation = self.elevation.elevation(home.lat, home.lon, api_key)?;
        let image_elevation = self.elevation.elevation(image.lat, image.lon, api_key)?;
        let offset = home_elevation - image_elevation;
        debug!("terrain offset {} m between home point and image", offset);

        let base = self.default_altitude()?;
        Ok(AltitudeResult {
            meters: base.meters + offset,
            source: AltitudeOrigin::Terrain,
        })
    }

    /// Flight home point.
    ///
    /// Vendors with a composite self-data tag store `lat|lon|...` in four fields;
    /// others use separate latitude and longitude tags.
    pub fn home_point(&self) -> Result<Coordinates> {
        let unsupported = || Error::missing("Couldn't parse home point");

        if let Some(tag) = self.profile.tag(ProfileKey::SelfData) {
            let raw = self.xmp.text(tag, "home point")?;
            let fields: Vec<&str> = raw.split('|').collect();
            if fields.len() != 4 {
                return Err(unsupported());
            }
            let parse = |s: &str| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::malformed(format!("home point is not a number: {:?}", s)))
            };
            return Ok(Coordinates::new(parse(fields[0])?, parse(fields[1])?));
        }

        let (lat_tag, lon_tag) = match (
            self.profile.tag(ProfileKey::HomepointLat),
            self.profile.tag(ProfileKey::HomepointLon),
        ) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(unsupported()),
        };
        Ok(Coordinates::new(
            self.xmp.float(lat_tag, "home point")?,
            self.xmp.float(lon_tag, "home point")?,
        ))
    }

    fn session_altitude(&self) -> Result<f64> {
        let path = self
            .handle
            .local_path()
            .ok_or_else(|| Error::missing("session file requires a local image"))?;
        let session = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(self.session_file_name);
        parse_session_file(&session)
    }
}

fn falls_back(err: &Error) -> bool {
    err.is_parsing() || matches!(err, Error::ExternalService(_))
}

/// Ground altitude in meters from the first `key=value` line of a session file
pub fn parse_session_file(path: &Path) -> Result<f64> {
    let contents = fs::read_to_string(path).map_err(|_| {
        Error::missing(format!("Couldn't find session file {}", path.display()))
    })?;
    let value = contents
        .lines()
        .next()
        .and_then(|line| line.trim().split('=').nth(1))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::malformed("Couldn't parse session altitude from session file"))?;
    value
        .parse::<f64>()
        .map_err(|_| Error::malformed(format!("session altitude is not a number: {:?}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif_tags::TagValue;
    use crate::test_utils::ScriptedTransport;
    use exif::Tag;
    use std::io::Write;

    const OK_50: &str = r#"{"status": "OK", "results": [{"elevation": 50.0}]}"#;
    const OK_0: &str = r#"{"status": "OK", "results": [{"elevation": 0.0}]}"#;

    fn gps_exif(lat: f64, lon: f64, msl: f64) -> RawExifTags {
        RawExifTags::new()
            .with(Tag::GPSLatitude, TagValue::Reals(vec![lat, 0.0, 0.0]))
            .with(Tag::GPSLatitudeRef, TagValue::Text("N".into()))
            .with(Tag::GPSLongitude, TagValue::Reals(vec![lon, 0.0, 0.0]))
            .with(Tag::GPSLongitudeRef, TagValue::Text("E".into()))
            .with(Tag::GPSAltitude, TagValue::Reals(vec![msl]))
    }

    fn resolver<'a>(
        profile: SensorProfile,
        exif: &'a RawExifTags,
        xmp: &'a RawXmpProperties,
        handle: &'a ImageHandle,
        elevation: &'a ElevationService,
    ) -> AltitudeResolver<'a> {
        AltitudeResolver {
            profile,
            exif,
            xmp,
            handle,
            session_file_name: "session.txt",
            elevation,
        }
    }

    fn offline() -> ElevationService {
        ElevationService::new("http://elevation.test", ScriptedTransport::new(vec![]))
    }

    #[test]
    fn test_default_altitude() {
        let exif = gps_exif(45.0, 93.0, 300.0);
        let xmp = RawXmpProperties::new().with_text("drone-dji:RelativeAltitude", "+15.20");
        let handle = ImageHandle::local("/tmp/DJI_0001.JPG");
        let service = offline();
        let r = resolver(SensorProfile::Dji, &exif, &xmp, &handle, &service);

        let result = r.resolve(&AltitudeOptions::default()).unwrap();
        assert_eq!(result.meters, 15.2);
        assert_eq!(result.source, AltitudeOrigin::Default);
    }

    #[test]
    fn test_default_missing_for_other_vendor() {
        let exif = gps_exif(45.0, 93.0, 300.0);
        let xmp = RawXmpProperties::new();
        let handle = ImageHandle::local("/tmp/IMG.JPG");
        let service = offline();
        let r = resolver(SensorProfile::Parrot, &exif, &xmp, &handle, &service);
        let err = r.resolve(&AltitudeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingTag(_)));
    }

    #[test]
    fn test_session_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = std::fs::File::create(dir.path().join("session.txt")).unwrap();
        writeln!(session, "ground_alt=250.5").unwrap();
        writeln!(session, "other=1").unwrap();

        let exif = gps_exif(45.0, 93.0, 300.0);
        let xmp = RawXmpProperties::new();
        let handle = ImageHandle::local(dir.path().join("IMG_00001.jpg"));
        let service = offline();
        let r = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service);

        // Session fallback applies even with fallback disabled
        let result = r.resolve(&AltitudeOptions::default().fallback(false)).unwrap();
        assert_eq!(result.meters, 300.0 - 250.5);
        assert_eq!(result.source, AltitudeOrigin::SessionFallback);
    }

    #[test]
    fn test_session_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let exif = gps_exif(45.0, 93.0, 300.0);
        let xmp = RawXmpProperties::new();
        let service = offline();

        let handle = ImageHandle::local(dir.path().join("IMG_00001.jpg"));
        let err = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service)
            .resolve(&AltitudeOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingTag(_)));

        std::fs::write(dir.path().join("session.txt"), "no separator here\n").unwrap();
        let err = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service)
            .resolve(&AltitudeOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)));

        let remote = ImageHandle::remote("bucket", "flight/IMG_00001.jpg");
        let err = resolver(SensorProfile::Sentera, &exif, &xmp, &remote, &service)
            .resolve(&AltitudeOptions::default())
            .unwrap_err();
        assert!(err.is_parsing());
    }

    #[test]
    fn test_lrf_with_legacy_tag() {
        let exif = gps_exif(45.0, 93.0, 300.0);
        let handle = ImageHandle::local("/tmp/IMG.jpg");
        let service = offline();
        let options = AltitudeOptions::new(AltitudeSource::Lrf).fallback(false);

        let xmp = RawXmpProperties::new().with_text("Sentera:AltimeterCalculatedAGL", "42.1");
        let result = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service)
            .resolve(&options)
            .unwrap();
        assert_eq!(result.meters, 42.1);
        assert_eq!(result.source, AltitudeOrigin::Lrf);

        let xmp = RawXmpProperties::new().with_text("Sentera:AltimeterCalcuatedAGL", "40.0");
        let result = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service)
            .resolve(&options)
            .unwrap();
        assert_eq!(result.meters, 40.0);
    }

    #[test]
    fn test_lrf_fallback_policy() {
        let exif = gps_exif(45.0, 93.0, 300.0);
        let xmp = RawXmpProperties::new().with_text("drone-dji:RelativeAltitude", "30");
        let handle = ImageHandle::local("/tmp/DJI_0001.JPG");
        let service = offline();
        let r = resolver(SensorProfile::Dji, &exif, &xmp, &handle, &service);

        let result = r.resolve(&AltitudeOptions::new(AltitudeSource::Lrf)).unwrap();
        assert_eq!(result.source, AltitudeOrigin::Default);
        assert_eq!(result.meters, 30.0);

        let err = r
            .resolve(&AltitudeOptions::new(AltitudeSource::Lrf).fallback(false))
            .unwrap_err();
        assert!(matches!(err, Error::MissingTag(_)));
    }

    #[test]
    fn test_terrain_shares_home_point_lookup() {
        let transport = ScriptedTransport::new(vec![OK_50, OK_0, OK_0]);
        let service = ElevationService::new("http://elevation.test", transport.clone());
        let options = AltitudeOptions::new(AltitudeSource::Terrain)
            .fallback(false)
            .api_key("test-key");
        let handle = ImageHandle::local("/tmp/DJI_0001.JPG");
        let xmp = RawXmpProperties::new()
            .with_text("drone-dji:RelativeAltitude", "100")
            .with_text("drone-dji:SelfData", "45.0|-93.0|1.0|2.0");

        let first = gps_exif(45.5, 10.0, 300.0);
        let result = resolver(SensorProfile::Dji, &first, &xmp, &handle, &service)
            .resolve(&options)
            .unwrap();
        assert_eq!(result.meters, 150.0);
        assert_eq!(result.source, AltitudeOrigin::Terrain);
        assert_eq!(transport.request_count(), 2);

        // Second image, same home point: only the image position is looked up
        let second = gps_exif(45.6, 10.0, 300.0);
        let result = resolver(SensorProfile::Dji, &second, &xmp, &handle, &service)
            .resolve(&options)
            .unwrap();
        assert_eq!(result.meters, 150.0);
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn test_terrain_service_failure() {
        let denied = r#"{"status": "REQUEST_DENIED", "results": []}"#;
        let transport = ScriptedTransport::repeating(denied);
        let service = ElevationService::new("http://elevation.test", transport);
        let handle = ImageHandle::local("/tmp/IMG.jpg");
        let exif = gps_exif(45.0, 93.0, 300.0);
        let xmp = RawXmpProperties::new()
            .with_text("Camera:AboveGroundAltitude", "80")
            .with_text("SENTERA:HomePointLatitude", "45.1")
            .with_text("SENTERA:HomePointLongitude", "93.1");
        let r = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service);

        let options = AltitudeOptions::new(AltitudeSource::Terrain).api_key("k");
        let result = r.resolve(&options).unwrap();
        assert_eq!(result.meters, 80.0);
        assert_eq!(result.source, AltitudeOrigin::Default);

        let err = r.resolve(&options.fallback(false)).unwrap_err();
        assert!(matches!(err, Error::ExternalService(_)));
    }

    #[test]
    fn test_home_point_extraction() {
        let exif = gps_exif(45.0, 93.0, 300.0);
        let handle = ImageHandle::local("/tmp/IMG.jpg");
        let service = offline();

        let xmp = RawXmpProperties::new().with_text("drone-dji:SelfData", "45.0|-93.0|1.0");
        let err = resolver(SensorProfile::Dji, &exif, &xmp, &handle, &service)
            .home_point()
            .unwrap_err();
        assert!(matches!(err, Error::MissingTag(_)));

        let xmp = RawXmpProperties::new()
            .with_text("SENTERA:HomePointLatitude", "45.1")
            .with_text("SENTERA:HomePointLongitude", "-93.1");
        let home = resolver(SensorProfile::Sentera, &exif, &xmp, &handle, &service)
            .home_point()
            .unwrap();
        assert_eq!(home, Coordinates::new(45.1, -93.1));

        let err = resolver(SensorProfile::MicaSense, &exif, &xmp, &handle, &service)
            .home_point()
            .unwrap_err();
        assert!(err.is_parsing());
    }
}
