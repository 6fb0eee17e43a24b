//! Per-image metadata façade
//!
//! A [`MetadataParser`] owns one image handle and lazily loads its raw EXIF tags and XMP
//! properties, each at most once. Both are read through a single shared
//! [`RawTagSource`], so the second extraction reuses the bytes fetched for the first.
//! Accessors that only need EXIF never trigger an XMP fetch.

use crate::altitude::{AltitudeOptions, AltitudeResolver, AltitudeResult};
use crate::config::ParserConfig;
use crate::elevation::{ElevationService, HttpTransport, DEFAULT_ELEVATION_URL};
use crate::error::{Error, Result};
use crate::exif_tags::RawExifTags;
use crate::handle::ImageHandle;
use crate::intrinsics::{self, CameraIntrinsics, PixelPitchTable};
use crate::orientation::{self, Euler};
use crate::profile::{ProfileKey, SensorProfile};
use crate::source::{self, HttpRangeFetcher, RangeFetch, RawTagSource};
use crate::types::{Coordinates, Dimensions, GpsAccuracy, PixelCoords, Version};
use crate::xmp::RawXmpProperties;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use exif::{Context, Tag};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default EXIF timestamp layout
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// `LensModel` as some in-house firmware writes it, in IFD0 rather than the Exif IFD
const IFD0_LENS_MODEL: Tag = Tag(Context::Tiff, 0xa434);

/// Options for [`MetadataParser::gsd`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GsdOptions {
    /// Prefer the vendor's calibrated focal length
    pub calibrated_focal_length: bool,
    pub altitude: AltitudeOptions,
}

/// Lazily-loading metadata accessors for one image.
///
/// # Example
///
/// ```no_run
/// use aerial_meta::{AltitudeOptions, AltitudeSource, MetadataParser};
///
/// # fn main() -> aerial_meta::Result<()> {
/// let mut parser = MetadataParser::new("flight/DJI_0001.JPG");
/// let (make, model) = parser.make_and_model()?;
/// let rotation = parser.rotation(true)?;
/// let altitude = parser.relative_altitude(&AltitudeOptions::new(AltitudeSource::Lrf))?;
/// println!("{} {}: pitch {} at {} m", make, model, rotation.pitch, altitude.meters);
/// # Ok(())
/// # }
/// ```
pub struct MetadataParser {
    handle: ImageHandle,
    config: ParserConfig,
    pixel_pitches: PixelPitchTable,
    fetcher: Option<Arc<dyn RangeFetch>>,
    elevation: Option<Arc<ElevationService>>,
    source: Option<Box<dyn RawTagSource>>,
    exif: Option<RawExifTags>,
    xmp: Option<RawXmpProperties>,
}

/// Builder for [`MetadataParser`]
pub struct MetadataParserBuilder {
    handle: ImageHandle,
    config: ParserConfig,
    fetcher: Option<Arc<dyn RangeFetch>>,
    elevation: Option<Arc<ElevationService>>,
    source: Option<Box<dyn RawTagSource>>,
    exif: Option<RawExifTags>,
    xmp: Option<RawXmpProperties>,
}

impl MetadataParserBuilder {
    pub fn config(mut self, config: ParserConfig) -> Self {
        self.config = config;
        self
    }

    /// Range fetcher for remote images (defaults to HTTP against the configured endpoint)
    pub fn fetcher(mut self, fetcher: Arc<dyn RangeFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Elevation service for terrain altitude (defaults to the process-wide instance)
    pub fn elevation(mut self, elevation: Arc<ElevationService>) -> Self {
        self.elevation = Some(elevation);
        self
    }

    /// Read raw bytes from `source` instead of opening the handle
    pub fn source(mut self, source: Box<dyn RawTagSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use already-decoded EXIF tags
    pub fn exif(mut self, exif: RawExifTags) -> Self {
        self.exif = Some(exif);
        self
    }

    /// Use already-parsed XMP properties
    pub fn xmp(mut self, xmp: RawXmpProperties) -> Self {
        self.xmp = Some(xmp);
        self
    }

    pub fn build(self) -> MetadataParser {
        MetadataParser {
            pixel_pitches: PixelPitchTable::with_overrides(&self.config.pixel_pitches),
            handle: self.handle,
            config: self.config,
            fetcher: self.fetcher,
            elevation: self.elevation,
            source: self.source,
            exif: self.exif,
            xmp: self.xmp,
        }
    }
}

impl MetadataParser {
    /// Parser with the default configuration
    pub fn new(handle: impl Into<ImageHandle>) -> Self {
        Self::builder(handle).build()
    }

    pub fn builder(handle: impl Into<ImageHandle>) -> MetadataParserBuilder {
        MetadataParserBuilder {
            handle: handle.into(),
            config: ParserConfig::default(),
            fetcher: None,
            elevation: None,
            source: None,
            exif: None,
            xmp: None,
        }
    }

    pub fn handle(&self) -> &ImageHandle {
        &self.handle
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    // ---- raw tag cache ----

    fn source(&mut self) -> Result<&mut dyn RawTagSource> {
        let source = match self.source.take() {
            Some(source) => source,
            None => {
                let fetcher = if self.handle.is_local() {
                    None
                } else {
                    Some(self.range_fetcher())
                };
                source::open_source(&self.handle, fetcher)?
            }
        };
        Ok(self.source.insert(source).as_mut())
    }

    fn range_fetcher(&mut self) -> Arc<dyn RangeFetch> {
        let endpoint = &self.config.object_store_endpoint;
        Arc::clone(
            self.fetcher
                .get_or_insert_with(|| Arc::new(HttpRangeFetcher::new(endpoint))),
        )
    }

    /// Raw EXIF tags, fetched on first use
    pub fn exif(&mut self) -> Result<&RawExifTags> {
        let tags = match self.exif.take() {
            Some(tags) => tags,
            None => {
                let window = self.config.exif_window;
                debug!("loading EXIF for {}", self.handle);
                RawExifTags::fetch(self.source()?, window)?
            }
        };
        Ok(self.exif.insert(tags))
    }

    /// Raw XMP properties, fetched on first use. An image without a packet has none.
    pub fn xmp(&mut self) -> Result<&RawXmpProperties> {
        let props = match self.xmp.take() {
            Some(props) => props,
            None => {
                let chunk_size = self.config.chunk_size;
                debug!("loading XMP for {}", self.handle);
                RawXmpProperties::fetch_or_empty(self.source()?, chunk_size)?
            }
        };
        Ok(self.xmp.insert(props))
    }

    /// Both raw maps and the sensor profile
    fn tags(&mut self) -> Result<(SensorProfile, &RawExifTags, &RawXmpProperties)> {
        self.exif()?;
        self.xmp()?;
        match (&self.exif, &self.xmp) {
            (Some(exif), Some(xmp)) => Ok((profile_of(exif)?, exif, xmp)),
            _ => Err(Error::malformed("raw tags could not be cached")),
        }
    }

    /// Sensor profile selected from the EXIF make
    pub fn profile(&mut self) -> Result<SensorProfile> {
        profile_of(self.exif()?)
    }

    // ---- identity ----

    pub fn make_and_model(&mut self) -> Result<(String, String)> {
        let exif = self.exif()?;
        Ok((
            exif.text(Tag::Make, "the make and model")?.to_string(),
            exif.text(Tag::Model, "the make and model")?.to_string(),
        ))
    }

    pub fn make(&mut self) -> Result<String> {
        Ok(self.exif()?.text(Tag::Make, "the make")?.to_string())
    }

    pub fn model(&mut self) -> Result<String> {
        Ok(self.exif()?.text(Tag::Model, "the model")?.to_string())
    }

    /// First `MAJOR.MINOR.PATCH` found in the EXIF software tag (a leading `v` is fine)
    pub fn firmware_version(&mut self) -> Result<Version> {
        let software = self.exif()?.text(Tag::Software, "sensor version")?;
        find_version(software).ok_or_else(|| Error::missing("Couldn't parse sensor version"))
    }

    pub fn serial_number(&mut self) -> Result<u64> {
        let serial = self.exif()?.text(Tag::BodySerialNumber, "serial number")?;
        serial
            .trim()
            .parse()
            .map_err(|_| Error::malformed(format!("serial number is not numeric: {:?}", serial)))
    }

    /// Lens model; only in-house sensors record one
    pub fn lens_model(&mut self) -> Result<String> {
        let exif = self.exif()?;
        if !profile_of(exif)?.is_in_house() {
            return Err(Error::missing("Couldn't parse lens model"));
        }
        exif.text(IFD0_LENS_MODEL, "lens model")
            .or_else(|_| exif.text(Tag::LensModel, "lens model"))
            .map(str::to_string)
    }

    // ---- image ----

    /// Height and width in pixels, read from the tags that match the file type
    pub fn dimensions(&mut self) -> Result<Dimensions> {
        let ext = self.handle.extension().unwrap_or_default();
        let (height_tag, width_tag) = match ext.as_str() {
            "jpg" | "jpeg" => (Tag::PixelYDimension, Tag::PixelXDimension),
            "tif" | "tiff" => (Tag::ImageLength, Tag::ImageWidth),
            _ => {
                return Err(Error::malformed(format!(
                    "Image format .{} isn't supported for parsing height/width",
                    ext
                )))
            }
        };

        let exif = self.exif()?;
        let pixels = |tag: Tag| {
            exif.get(tag)
                .and_then(|v| v.integer(0))
                .and_then(|v| u32::try_from(v).ok())
        };
        if let (Some(height), Some(width)) = (pixels(height_tag), pixels(width_tag)) {
            return Ok(Dimensions::new(height, width));
        }

        // Some in-house models omit the size tags
        let make = exif.text(Tag::Make, "the make")?;
        let model = exif.text(Tag::Model, "the model")?;
        if SensorProfile::resolve(make).is_in_house() {
            if model.starts_with("21030-") {
                return Ok(Dimensions::new(7000, 9344));
            }
            if model.starts_with("21214-") {
                return Ok(Dimensions::new(3888, 5184));
            }
        }
        Err(Error::missing("Couldn't parse the height and width of the image"))
    }

    /// ISO sensitivity times exposure time
    pub fn autoexposure(&mut self) -> Result<f64> {
        let exif = self.exif()?;
        let iso = exif.real(Tag::PhotographicSensitivity, "either ISO or exposure time")?;
        let exposure = exif.real(Tag::ExposureTime, "either ISO or exposure time")?;
        Ok(iso * exposure)
    }

    // ---- time ----

    /// Capture instant in UTC using the default EXIF layout
    pub fn timestamp(&mut self) -> Result<DateTime<Utc>> {
        self.timestamp_with_format(DEFAULT_TIMESTAMP_FORMAT)
    }

    /// Capture instant in UTC.
    ///
    /// Sensors that record local time are corrected by the mean solar offset of the
    /// image longitude (one hour per 15°).
    pub fn timestamp_with_format(&mut self, format: &str) -> Result<DateTime<Utc>> {
        let (naive, records_utc) = self.naive_timestamp(format)?;
        if records_utc {
            return Ok(Utc.from_utc_datetime(&naive));
        }
        let offset = solar_offset(self.location()?.lon)?;
        localize(offset, &naive).map(|local| local.with_timezone(&Utc))
    }

    /// Capture instant in the image's mean solar time zone
    pub fn local_timestamp(&mut self) -> Result<DateTime<FixedOffset>> {
        let (naive, records_utc) = self.naive_timestamp(DEFAULT_TIMESTAMP_FORMAT)?;
        let offset = solar_offset(self.location()?.lon)?;
        if records_utc {
            return Ok(Utc.from_utc_datetime(&naive).with_timezone(&offset));
        }
        localize(offset, &naive)
    }

    fn naive_timestamp(&mut self, format: &str) -> Result<(NaiveDateTime, bool)> {
        let exif = self.exif()?;
        let records_utc = profile_of(exif)?.records_utc();
        let raw = exif.text(Tag::DateTimeOriginal, "image timestamp")?;
        let naive = NaiveDateTime::parse_from_str(raw, format).map_err(|_| {
            Error::malformed(format!("Couldn't parse found timestamp {:?} with format {:?}", raw, format))
        })?;
        Ok((naive, records_utc))
    }

    // ---- position ----

    pub fn location(&mut self) -> Result<Coordinates> {
        self.exif()?.coordinates()
    }

    /// GPS altitude above mean sea level in meters
    pub fn global_altitude(&mut self) -> Result<f64> {
        self.exif()?.altitude_msl()
    }

    /// Roll, pitch and yaw in degrees.
    ///
    /// With `standardize`, gimbal-referenced vendors are rotated into the frame where a
    /// camera pointing straight down has pitch 0.
    pub fn rotation(&mut self, standardize: bool) -> Result<Euler> {
        let (profile, _, xmp) = self.tags()?;
        let angle = |key: ProfileKey| -> Result<f64> {
            xmp.float(profile.get(key)?, "roll/pitch/yaw")
        };
        let raw = Euler::new(angle(ProfileKey::Roll)?, angle(ProfileKey::Pitch)?, angle(ProfileKey::Yaw)?);
        Ok(if standardize {
            orientation::standardize(raw, profile)
        } else {
            raw
        })
    }

    /// Relative altitude above ground
    pub fn relative_altitude(&mut self, options: &AltitudeOptions) -> Result<AltitudeResult> {
        let elevation = self.elevation_service();
        let mut options = options.clone();
        if options.api_key.is_none() {
            options.api_key = self.config.api_key();
        }
        let session_file_name = self.config.session_file_name.clone();
        let handle = self.handle.clone();

        let (profile, exif, xmp) = self.tags()?;
        let resolver = AltitudeResolver {
            profile,
            exif,
            xmp,
            handle: &handle,
            session_file_name: &session_file_name,
            elevation: &elevation,
        };
        resolver.resolve(&options)
    }

    /// Flight home point (vendors that record one)
    pub fn home_point(&mut self) -> Result<Coordinates> {
        let elevation = self.elevation_service();
        let session_file_name = self.config.session_file_name.clone();
        let handle = self.handle.clone();
        let (profile, exif, xmp) = self.tags()?;
        AltitudeResolver {
            profile,
            exif,
            xmp,
            handle: &handle,
            session_file_name: &session_file_name,
            elevation: &elevation,
        }
        .home_point()
    }

    fn elevation_service(&mut self) -> Arc<ElevationService> {
        if let Some(service) = &self.elevation {
            return Arc::clone(service);
        }
        let service = if self.config.elevation_url == DEFAULT_ELEVATION_URL {
            ElevationService::shared()
        } else {
            Arc::new(ElevationService::new(&self.config.elevation_url, HttpTransport::new()))
        };
        self.elevation = Some(Arc::clone(&service));
        service
    }

    // ---- intrinsics ----

    pub fn pixel_pitch_meters(&mut self) -> Result<f64> {
        self.exif()?;
        let exif = self
            .exif
            .as_ref()
            .ok_or_else(|| Error::malformed("EXIF could not be cached"))?;
        let profile = profile_of(exif)?;
        let make = exif.text(Tag::Make, "the make and model")?;
        let model = exif.text(Tag::Model, "the make and model")?;
        intrinsics::pixel_pitch(profile, make, model, exif, &self.pixel_pitches)
    }

    /// Focal length in meters; `calibrated` prefers the vendor's calibrated value
    pub fn focal_length_meters(&mut self, calibrated: bool) -> Result<f64> {
        let profile = self.profile()?;
        if calibrated {
            match self.xmp() {
                Err(e) if e.is_parsing() => {
                    warn!("XMP unavailable for calibrated focal length: {}", e)
                }
                Err(e) => return Err(e),
                Ok(_) => {}
            }
        }
        let xmp = if calibrated { self.xmp.as_ref() } else { None };
        let exif = self
            .exif
            .as_ref()
            .ok_or_else(|| Error::malformed("EXIF could not be cached"))?;
        intrinsics::focal_length(profile, exif, xmp, calibrated)
    }

    pub fn focal_length_pixels(&mut self, calibrated: bool) -> Result<f64> {
        let focal_length = self.focal_length_meters(calibrated)?;
        let pixel_pitch = self.pixel_pitch_meters()?;
        Ok(intrinsics::focal_length_pixels(focal_length, pixel_pitch))
    }

    /// Principal point in pixels
    pub fn principal_point(&mut self) -> Result<PixelCoords> {
        let pixel_pitch = self.pixel_pitch_meters()?;
        let (profile, _, xmp) = self.tags()?;
        intrinsics::principal_point(profile, xmp, pixel_pitch)
    }

    pub fn distortion_parameters(&mut self) -> Result<Vec<f64>> {
        let (profile, _, xmp) = self.tags()?;
        intrinsics::distortion(profile, xmp)
    }

    /// All intrinsics at once. A vendor without principal point or distortion tags
    /// yields `None` for them; a malformed tag is still an error.
    pub fn intrinsics(&mut self, calibrated: bool) -> Result<CameraIntrinsics> {
        let focal_length = self.focal_length_meters(calibrated)?;
        let pixel_pitch = self.pixel_pitch_meters()?;
        let principal_point = optional(self.principal_point())?;
        let distortion = optional(self.distortion_parameters())?;
        Ok(CameraIntrinsics {
            focal_length,
            pixel_pitch,
            principal_point,
            distortion,
        })
    }

    /// Ground sample distance in meters per pixel
    pub fn gsd(&mut self, options: &GsdOptions) -> Result<f64> {
        let altitude = self.relative_altitude(&options.altitude)?;
        if altitude.meters <= 0.0 {
            return Err(Error::ValueRange(format!(
                "relative altitude {} m gives a non-positive GSD",
                altitude.meters
            )));
        }
        let focal_length = self.focal_length_pixels(options.calibrated_focal_length)?;
        let gsd = altitude.meters / focal_length;
        if !(gsd > 0.0) {
            return Err(Error::ValueRange(format!("parsed GSD {} is not positive", gsd)));
        }
        Ok(gsd)
    }

    // ---- radiometry ----

    /// Incident light sensor readings
    pub fn ils(&mut self) -> Result<Vec<f64>> {
        let (profile, _, xmp) = self.tags()?;
        xmp.floats(profile.get(ProfileKey::Ils)?, "ILS value")
    }

    /// Central wavelength and FWHM of each band in nanometers
    pub fn wavelength_data(&mut self) -> Result<(Vec<f64>, Vec<f64>)> {
        let (profile, _, xmp) = self.tags()?;
        let central = xmp.floats(profile.get(ProfileKey::WavelengthCentral)?, "wavelength data")?;
        let fwhm = xmp.floats(profile.get(ProfileKey::WavelengthFwhm)?, "wavelength data")?;
        Ok((central, fwhm))
    }

    pub fn bandnames(&mut self) -> Result<Vec<String>> {
        let (profile, _, xmp) = self.tags()?;
        let value = xmp
            .get(profile.get(ProfileKey::BandName)?)
            .ok_or_else(|| Error::missing("Couldn't parse bandnames"))?;
        Ok(value.items().into_iter().map(str::to_string).collect())
    }

    pub fn irradiance(&mut self) -> Result<f64> {
        let (profile, _, xmp) = self.tags()?;
        xmp.float(profile.get(ProfileKey::Irradiance)?, "irradiance")
    }

    // ---- capture bookkeeping ----

    pub fn capture_id(&mut self) -> Result<String> {
        self.xmp_text(ProfileKey::CaptureUuid, "capture id")
    }

    pub fn flight_id(&mut self) -> Result<String> {
        self.xmp_text(ProfileKey::FlightUuid, "flight id")
    }

    /// True when the vendor has already removed lens distortion from the pixels
    pub fn dewarp_flag(&mut self) -> Result<bool> {
        let flag = self.xmp_text(ProfileKey::DewarpFlag, "dewarp flag")?;
        match flag.to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => Err(Error::malformed(format!("dewarp flag is not boolean: {:?}", other))),
        }
    }

    /// GPS accuracy per axis in meters
    pub fn gps_accuracy(&mut self) -> Result<GpsAccuracy> {
        let (profile, _, xmp) = self.tags()?;
        let axis = |key: ProfileKey| xmp.float(profile.get(key)?, "GPS accuracy");
        Ok(GpsAccuracy {
            x: axis(ProfileKey::XAccuracy)?,
            y: axis(ProfileKey::YAccuracy)?,
            z: axis(ProfileKey::ZAccuracy)?,
        })
    }

    fn xmp_text(&mut self, key: ProfileKey, what: &str) -> Result<String> {
        let (profile, _, xmp) = self.tags()?;
        Ok(xmp.text(profile.get(key)?, what)?.to_string())
    }
}

fn profile_of(exif: &RawExifTags) -> Result<SensorProfile> {
    Ok(SensorProfile::resolve(exif.text(Tag::Make, "the make and model")?))
}

/// `Ok(None)` for a missing tag, errors otherwise
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::MissingTag(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn find_version(text: &str) -> Option<Version> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find_map(|token| {
            let parts: Vec<&str> = token.split('.').collect();
            parts.windows(3).find_map(|w| {
                Some(Version::new(w[0].parse().ok()?, w[1].parse().ok()?, w[2].parse().ok()?))
            })
        })
}

/// Mean solar time offset for a longitude, one hour per 15°
fn solar_offset(lon: f64) -> Result<FixedOffset> {
    let seconds = (lon / 15.0 * 3600.0).round() as i32;
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| Error::ValueRange(format!("longitude {} gives no valid time offset", lon)))
}

fn localize(offset: FixedOffset, naive: &NaiveDateTime) -> Result<DateTime<FixedOffset>> {
    offset
        .from_local_datetime(naive)
        .single()
        .ok_or_else(|| Error::malformed("ambiguous local timestamp"))
}
