//! Raw EXIF tags
//!
//! The binary decoding is delegated to `kamadak-exif`; this module flattens the
//! primary IFD (including the Exif and GPS sub-IFDs) into a map of typed values.

use crate::error::{Error, Result};
use crate::source::{RawTagSource, MAX_SCAN_BYTES};
use crate::types::Coordinates;
use exif::{In, Tag, Value};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::debug;

/// A decoded EXIF value
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// ASCII strings (trailing NULs and whitespace trimmed)
    Text(String),
    /// BYTE, SHORT, LONG and their signed forms
    Integers(Vec<i64>),
    /// RATIONAL, SRATIONAL, FLOAT and DOUBLE
    Reals(Vec<f64>),
    /// UNDEFINED payloads
    Bytes(Vec<u8>),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value at `index`, whatever the numeric storage type
    pub fn real(&self, index: usize) -> Option<f64> {
        match self {
            Self::Reals(v) => v.get(index).copied(),
            Self::Integers(v) => v.get(index).map(|&i| i as f64),
            _ => None,
        }
    }

    pub fn integer(&self, index: usize) -> Option<i64> {
        match self {
            Self::Integers(v) => v.get(index).copied(),
            _ => None,
        }
    }

    fn from_exif(value: &Value) -> Option<Self> {
        let tag_value = match value {
            Value::Ascii(strings) => {
                let joined = strings
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect::<Vec<_>>()
                    .join(" ");
                Self::Text(joined.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
            }
            Value::Byte(v) => Self::Integers(v.iter().map(|&x| x as i64).collect()),
            Value::Short(v) => Self::Integers(v.iter().map(|&x| x as i64).collect()),
            Value::Long(v) => Self::Integers(v.iter().map(|&x| x as i64).collect()),
            Value::SByte(v) => Self::Integers(v.iter().map(|&x| x as i64).collect()),
            Value::SShort(v) => Self::Integers(v.iter().map(|&x| x as i64).collect()),
            Value::SLong(v) => Self::Integers(v.iter().map(|&x| x as i64).collect()),
            Value::Rational(v) => Self::Reals(v.iter().map(|r| r.to_f64()).collect()),
            Value::SRational(v) => Self::Reals(v.iter().map(|r| r.to_f64()).collect()),
            Value::Float(v) => Self::Reals(v.iter().map(|&x| x as f64).collect()),
            Value::Double(v) => Self::Reals(v.clone()),
            Value::Undefined(bytes, _) => Self::Bytes(bytes.clone()),
            _ => return None,
        };
        Some(tag_value)
    }
}

/// EXIF tags of one image, keyed by tag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExifTags {
    tags: HashMap<Tag, TagValue>,
}

impl RawExifTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for injecting tags directly
    pub fn with(mut self, tag: Tag, value: TagValue) -> Self {
        self.tags.insert(tag, value);
        self
    }

    pub fn insert(&mut self, tag: Tag, value: TagValue) {
        self.tags.insert(tag, value);
    }

    pub fn get(&self, tag: Tag) -> Option<&TagValue> {
        self.tags.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Text tag or a `MissingTag` error naming `what`
    pub fn text(&self, tag: Tag, what: &str) -> Result<&str> {
        self.get(tag)
            .and_then(TagValue::as_text)
            .ok_or_else(|| Error::missing(format!("Couldn't parse {}", what)))
    }

    /// First numeric component or a `MissingTag` error naming `what`
    pub fn real(&self, tag: Tag, what: &str) -> Result<f64> {
        self.real_at(tag, 0, what)
    }

    pub fn real_at(&self, tag: Tag, index: usize, what: &str) -> Result<f64> {
        self.get(tag)
            .and_then(|v| v.real(index))
            .ok_or_else(|| Error::missing(format!("Couldn't parse {}", what)))
    }

    /// GPS position in signed decimal degrees
    pub fn coordinates(&self) -> Result<Coordinates> {
        let lat = self.dms(Tag::GPSLatitude, "lat/lon")?;
        let lon = self.dms(Tag::GPSLongitude, "lat/lon")?;
        let lat_ref = self.text(Tag::GPSLatitudeRef, "lat/lon")?;
        let lon_ref = self.text(Tag::GPSLongitudeRef, "lat/lon")?;

        Ok(Coordinates::new(
            if lat_ref.starts_with('N') { lat } else { -lat },
            if lon_ref.starts_with('E') { lon } else { -lon },
        ))
    }

    /// GPS altitude above mean sea level in meters, negative when below sea level
    pub fn altitude_msl(&self) -> Result<f64> {
        let altitude = self.real(Tag::GPSAltitude, "altitude msl")?;
        let below_sea_level = self
            .get(Tag::GPSAltitudeRef)
            .and_then(|v| v.integer(0))
            .is_some_and(|r| r == 1);
        Ok(if below_sea_level { -altitude } else { altitude })
    }

    /// Degrees, minutes and seconds folded into decimal degrees
    fn dms(&self, tag: Tag, what: &str) -> Result<f64> {
        let degrees = self.real_at(tag, 0, what)?;
        let minutes = self.real_at(tag, 1, what)?;
        let seconds = self.real_at(tag, 2, what)?;
        Ok(degrees + minutes / 60.0 + seconds / 3600.0)
    }

    /// Decode EXIF from a buffer holding a container prefix (JPEG, TIFF, PNG, ...)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let exif = exif::Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .map_err(|e| Error::malformed(format!("Couldn't read EXIF data: {}", e)))?;

        let tags: HashMap<Tag, TagValue> = exif
            .fields()
            .filter(|field| field.ifd_num == In::PRIMARY)
            .filter_map(|field| TagValue::from_exif(&field.value).map(|v| (field.tag, v)))
            .collect();

        if tags.is_empty() {
            return Err(Error::malformed("EXIF block contains no primary tags"));
        }
        Ok(Self { tags })
    }

    /// Read EXIF from the head of a source.
    ///
    /// Decoding is first attempted on a `window`-byte prefix. While that fails and the
    /// source has more data (e.g. a TIFF whose IFDs sit past the window), the window is
    /// doubled and decoding retried, up to [`MAX_SCAN_BYTES`].
    pub fn fetch(source: &mut dyn RawTagSource, window: usize) -> Result<Self> {
        let mut window = window.max(1);
        loop {
            let head = source.read_up_to(window)?;
            let held = head.len();
            let err = match Self::decode(head) {
                Ok(tags) => return Ok(tags),
                Err(err) => err,
            };
            if source.is_exhausted() || held < window || window >= MAX_SCAN_BYTES {
                return Err(err);
            }
            debug!("EXIF not decodable from {}-byte prefix ({}); widening", window, err);
            window = window.saturating_mul(2).min(MAX_SCAN_BYTES);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, RemoteSource};
    use crate::test_utils::{RecordingFetcher, TiffBuilder};
    use std::sync::Arc;

    #[test]
    fn test_decode_tiff_fixture() {
        let bytes = TiffBuilder::new()
            .ascii(Tag::Make, "DJI")
            .ascii(Tag::Model, "FC6310")
            .rational(Tag::FocalLength, &[(88, 10)])
            .short(Tag::PhotographicSensitivity, 100)
            .build();

        let tags = RawExifTags::decode(&bytes).unwrap();
        assert_eq!(tags.text(Tag::Make, "make").unwrap(), "DJI");
        assert_eq!(tags.text(Tag::Model, "model").unwrap(), "FC6310");
        assert!((tags.real(Tag::FocalLength, "focal length").unwrap() - 8.8).abs() < 1e-12);
        assert_eq!(tags.get(Tag::PhotographicSensitivity).and_then(|v| v.integer(0)), Some(100));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let err = RawExifTags::decode(b"not an image at all").unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)));
    }

    #[test]
    fn test_fetch_widens_window_until_decodable() {
        // Pad the value area so the IFD0 strings sit beyond a tiny window
        let bytes = TiffBuilder::new()
            .ascii(Tag::Make, "Sentera")
            .ascii(Tag::Software, &"x".repeat(512))
            .build();
        let mut source = MemorySource::new(bytes);
        let tags = RawExifTags::fetch(&mut source, 16).unwrap();
        assert_eq!(tags.text(Tag::Make, "make").unwrap(), "Sentera");
    }

    #[test]
    fn test_fetch_never_requests_open_ended_range() {
        let mut bytes = vec![0xFF, 0xD8];
        bytes.extend(std::iter::repeat(0u8).take(300_000));
        let len = bytes.len() as u64;
        let fetcher = Arc::new(RecordingFetcher::new(bytes));
        let mut source = RemoteSource::new("bucket".into(), "no-exif.jpg".into(), None, fetcher.clone());

        assert!(RawExifTags::fetch(&mut source, 4096).is_err());

        let requests = fetcher.requests();
        assert!(requests.len() > 1);
        assert_eq!(requests[0].offset, 0);
        for range in &requests {
            assert_ne!(range.end_offset(), u64::MAX);
            assert!(range.size <= MAX_SCAN_BYTES as u64);
        }
        for pair in requests.windows(2) {
            assert_eq!(pair[1].offset, pair[0].end_offset());
        }
        assert!(fetcher.bytes_served() <= len);
    }

    #[test]
    fn test_missing_tag_error() {
        let tags = RawExifTags::new().with(Tag::Make, TagValue::Text("DJI".into()));
        let err = tags.real(Tag::GPSAltitude, "altitude msl").unwrap_err();
        assert!(matches!(err, Error::MissingTag(_)));
    }

    #[test]
    fn test_coordinates_and_altitude() {
        let tags = RawExifTags::new()
            .with(Tag::GPSLatitude, TagValue::Reals(vec![44.0, 58.0, 38.4]))
            .with(Tag::GPSLatitudeRef, TagValue::Text("N".into()))
            .with(Tag::GPSLongitude, TagValue::Reals(vec![93.0, 15.0, 0.0]))
            .with(Tag::GPSLongitudeRef, TagValue::Text("W".into()))
            .with(Tag::GPSAltitude, TagValue::Reals(vec![12.5]))
            .with(Tag::GPSAltitudeRef, TagValue::Integers(vec![1]));

        let coords = tags.coordinates().unwrap();
        assert!((coords.lat - 44.977333).abs() < 1e-6);
        assert_eq!(coords.lon, -93.25);
        assert_eq!(tags.altitude_msl().unwrap(), -12.5);
    }

    #[test]
    fn test_coordinates_need_refs() {
        let tags = RawExifTags::new()
            .with(Tag::GPSLatitude, TagValue::Reals(vec![44.0, 0.0, 0.0]))
            .with(Tag::GPSLongitude, TagValue::Reals(vec![93.0, 0.0, 0.0]));
        assert!(matches!(tags.coordinates(), Err(Error::MissingTag(_))));
    }

    #[test]
    fn test_integer_reads_as_real() {
        let value = TagValue::Integers(vec![3000, 4000]);
        assert_eq!(value.real(1), Some(4000.0));
        assert_eq!(value.as_text(), None);
    }
}
