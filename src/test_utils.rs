//! Test utilities for building fixture images and observing I/O.
//!
//! This module provides:
//! - [`TiffBuilder`]: real little-endian TIFF bytes with IFD0, Exif and GPS
//!   directories, optionally followed by an XMP packet or wrapped in a JPEG
//! - [`xmp_packet`]: a minimal XMP packet with properties as attributes
//! - [`RecordingFetcher`]: an in-memory object store that records every range request
//! - [`ScriptedTransport`]: an elevation transport replaying canned JSON responses
//! - [`CountingSource`]: a source wrapper counting prefix reads
//!
//! # Usage
//!
//! ```
//! use aerial_meta::test_utils::{xmp_packet, TiffBuilder};
//! use exif::Tag;
//!
//! let xmp = xmp_packet(&[("drone-dji:RelativeAltitude", "+15.20")]);
//! let jpeg = TiffBuilder::new()
//!     .ascii(Tag::Make, "DJI")
//!     .ascii(Tag::Model, "FC6310")
//!     .rational(Tag::FocalLength, &[(88, 10)])
//!     .trailer(xmp.as_bytes())
//!     .build_jpeg();
//! assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};
use exif::{Context, Tag};

use crate::elevation::ElevationTransport;
use crate::source::{ByteRange, RangeFetch, RawTagSource};
use crate::{Error, Result};

/// TIFF field types
mod field_type {
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
}

const EXIF_IFD_POINTER: u16 = 0x8769;
const GPS_IFD_POINTER: u16 = 0x8825;
const TIFF_HEADER_LEN: u32 = 8;

#[derive(Debug, Clone)]
struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl Entry {
    /// Bytes this entry adds to the data area after its IFD (word aligned)
    fn overflow_len(&self) -> u32 {
        if self.data.len() <= 4 {
            0
        } else {
            (self.data.len() as u32 + 1) & !1
        }
    }
}

fn ifd_len(entries: &[Entry]) -> u32 {
    2 + 12 * entries.len() as u32 + 4 + entries.iter().map(Entry::overflow_len).sum::<u32>()
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

/// Write one IFD starting at absolute offset `base`, values after the entries.
fn write_ifd(out: &mut Vec<u8>, mut entries: Vec<Entry>, base: u32) {
    entries.sort_by_key(|e| e.tag);
    let mut data_offset = base + 2 + 12 * entries.len() as u32 + 4;
    let mut overflow = Vec::new();

    put_u16(out, entries.len() as u16);
    for entry in &entries {
        put_u16(out, entry.tag);
        put_u16(out, entry.field_type);
        put_u32(out, entry.count);
        if entry.data.len() <= 4 {
            let mut inline = entry.data.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            put_u32(out, data_offset);
            overflow.extend_from_slice(&entry.data);
            if entry.data.len() % 2 == 1 {
                overflow.push(0);
            }
            data_offset += entry.overflow_len();
        }
    }
    put_u32(out, 0);
    out.extend_from_slice(&overflow);
}

/// Builds little-endian TIFF/EXIF fixtures that `kamadak-exif` decodes.
///
/// Fields are routed to IFD0, the Exif IFD or the GPS IFD by the tag's context.
#[derive(Debug, Clone, Default)]
pub struct TiffBuilder {
    ifd0: Vec<Entry>,
    exif: Vec<Entry>,
    gps: Vec<Entry>,
    trailer: Vec<u8>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, tag: Tag, field_type: u16, count: u32, data: Vec<u8>) -> Self {
        let entry = Entry {
            tag: tag.number(),
            field_type,
            count,
            data,
        };
        match tag.context() {
            Context::Exif => self.exif.push(entry),
            Context::Gps => self.gps.push(entry),
            _ => self.ifd0.push(entry),
        }
        self
    }

    pub fn ascii(self, tag: Tag, value: &str) -> Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        let count = data.len() as u32;
        self.push(tag, field_type::ASCII, count, data)
    }

    pub fn short(self, tag: Tag, value: u16) -> Self {
        let mut data = Vec::new();
        put_u16(&mut data, value);
        self.push(tag, field_type::SHORT, 1, data)
    }

    pub fn long(self, tag: Tag, value: u32) -> Self {
        let mut data = Vec::new();
        put_u32(&mut data, value);
        self.push(tag, field_type::LONG, 1, data)
    }

    /// Unsigned rationals as `(numerator, denominator)` pairs
    pub fn rational(self, tag: Tag, values: &[(u32, u32)]) -> Self {
        let mut data = Vec::new();
        for &(num, den) in values {
            put_u32(&mut data, num);
            put_u32(&mut data, den);
        }
        self.push(tag, field_type::RATIONAL, values.len() as u32, data)
    }

    /// GPS latitude/longitude with their reference letters, in whole micro-seconds of arc
    pub fn gps_position(self, lat: f64, lon: f64) -> Self {
        let dms = |deg: f64| -> [(u32, u32); 3] {
            let deg = deg.abs();
            let whole = deg.trunc();
            let minutes = ((deg - whole) * 60.0).trunc();
            let seconds = ((deg - whole) * 60.0 - minutes) * 60.0;
            [
                (whole as u32, 1),
                (minutes as u32, 1),
                ((seconds * 1_000_000.0).round() as u32, 1_000_000),
            ]
        };
        self.ascii(Tag::GPSLatitudeRef, if lat >= 0.0 { "N" } else { "S" })
            .rational(Tag::GPSLatitude, &dms(lat))
            .ascii(Tag::GPSLongitudeRef, if lon >= 0.0 { "E" } else { "W" })
            .rational(Tag::GPSLongitude, &dms(lon))
    }

    /// Bytes appended after the TIFF structure (typically an XMP packet)
    pub fn trailer(mut self, bytes: &[u8]) -> Self {
        self.trailer.extend_from_slice(bytes);
        self
    }

    /// The TIFF file followed by the trailer
    pub fn build(&self) -> Vec<u8> {
        let mut out = self.tiff();
        out.extend_from_slice(&self.trailer);
        out
    }

    /// A baseline JPEG carrying the TIFF in an `Exif` APP1 segment and the trailer in
    /// an XMP APP1 segment. There is no image data.
    pub fn build_jpeg(&self) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        let mut exif_payload = b"Exif\0\0".to_vec();
        exif_payload.extend_from_slice(&self.tiff());
        push_app1(&mut out, &exif_payload);
        if !self.trailer.is_empty() {
            let mut xmp_payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
            xmp_payload.extend_from_slice(&self.trailer);
            push_app1(&mut out, &xmp_payload);
        }
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn tiff(&self) -> Vec<u8> {
        let mut ifd0 = self.ifd0.clone();
        let pointer = |tag: u16| Entry {
            tag,
            field_type: field_type::LONG,
            count: 1,
            data: Vec::new(),
        };
        if !self.exif.is_empty() {
            ifd0.push(pointer(EXIF_IFD_POINTER));
        }
        if !self.gps.is_empty() {
            ifd0.push(pointer(GPS_IFD_POINTER));
        }

        let exif_offset = TIFF_HEADER_LEN + ifd_len(&ifd0);
        let gps_offset = exif_offset + if self.exif.is_empty() { 0 } else { ifd_len(&self.exif) };
        for entry in ifd0.iter_mut() {
            let offset = match entry.tag {
                EXIF_IFD_POINTER => exif_offset,
                GPS_IFD_POINTER => gps_offset,
                _ => continue,
            };
            entry.data.clear();
            put_u32(&mut entry.data, offset);
        }

        let mut out = b"II".to_vec();
        put_u16(&mut out, 42);
        put_u32(&mut out, TIFF_HEADER_LEN);
        write_ifd(&mut out, ifd0, TIFF_HEADER_LEN);
        if !self.exif.is_empty() {
            write_ifd(&mut out, self.exif.clone(), exif_offset);
        }
        if !self.gps.is_empty() {
            write_ifd(&mut out, self.gps.clone(), gps_offset);
        }
        out
    }
}

fn push_app1(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&[0xFF, 0xE1]);
    put_u16_be(out, (payload.len() + 2) as u16);
    out.extend_from_slice(payload);
}

fn put_u16_be(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; 2];
    byteorder::BigEndian::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

/// A minimal XMP packet with each property written as an `rdf:Description` attribute
pub fn xmp_packet(properties: &[(&str, &str)]) -> String {
    xmp_packet_with_lists(properties, &[])
}

/// Like [`xmp_packet`], plus `rdf:Seq` list properties
pub fn xmp_packet_with_lists(properties: &[(&str, &str)], lists: &[(&str, &[&str])]) -> String {
    let attributes: String = properties
        .iter()
        .map(|(name, value)| format!("\n      {}=\"{}\"", name, value))
        .collect();
    let elements: String = lists
        .iter()
        .map(|(name, items)| {
            let items: String = items.iter().map(|i| format!("<rdf:li>{}</rdf:li>", i)).collect();
            format!("\n      <{0}><rdf:Seq>{1}</rdf:Seq></{0}>", name, items)
        })
        .collect();
    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
      xmlns:drone-dji="http://www.dji.com/drone-dji/1.0/"
      xmlns:Camera="http://pix4d.com/camera/1.0/"
      xmlns:Sentera="http://www.sentera.com/ns/1.0/"
      xmlns:MicaSense="http://micasense.com/MicaSense/1.0/"{}>{}
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#,
        attributes, elements
    )
}

/// An in-memory object store that records every requested range
#[derive(Debug, Default)]
pub struct RecordingFetcher {
    data: Vec<u8>,
    requests: Mutex<Vec<ByteRange>>,
}

impl RecordingFetcher {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ByteRange> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Total bytes served so far
    pub fn bytes_served(&self) -> u64 {
        let len = self.data.len() as u64;
        self.requests()
            .iter()
            .map(|r| r.end_offset().min(len).saturating_sub(r.offset.min(len)))
            .sum()
    }
}

impl RangeFetch for RecordingFetcher {
    fn fetch(
        &self,
        _bucket: &str,
        _key: &str,
        _role_arn: Option<&str>,
        range: ByteRange,
    ) -> Result<Vec<u8>> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(range);
        let len = self.data.len() as u64;
        let start = range.offset.min(len) as usize;
        let end = range.end_offset().min(len) as usize;
        Ok(self.data[start..end].to_vec())
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<String>,
    repeat: Option<String>,
    queries: Vec<Vec<(String, String)>>,
}

/// Elevation transport replaying canned response bodies and recording queries.
///
/// Clones share the same script, so a test can keep one to inspect after handing
/// another to an [`ElevationService`](crate::ElevationService).
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Respond with `responses` in order, then fail
    pub fn new(responses: Vec<&str>) -> Self {
        let script = Script {
            responses: responses.into_iter().map(String::from).collect(),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Respond with `body` to every request
    pub fn repeating(body: &str) -> Self {
        let script = Script {
            repeat: Some(body.to_string()),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub fn request_count(&self) -> usize {
        self.script.lock().unwrap_or_else(|p| p.into_inner()).queries.len()
    }

    pub fn queries(&self) -> Vec<Vec<(String, String)>> {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .queries
            .clone()
    }
}

impl ElevationTransport for ScriptedTransport {
    fn get(&self, _url: &str, query: &[(&str, String)]) -> Result<String> {
        let mut script = self.script.lock().unwrap_or_else(|p| p.into_inner());
        script
            .queries
            .push(query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect());
        match script.responses.pop_front() {
            Some(body) => Ok(body),
            None => script
                .repeat
                .clone()
                .ok_or_else(|| Error::ExternalService("no scripted elevation response left".into())),
        }
    }
}

/// Shared view of a [`CountingSource`]'s read count
#[derive(Debug, Clone, Default)]
pub struct ReadCounter(Arc<AtomicUsize>);

impl ReadCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wraps a source and counts `read_up_to` calls
pub struct CountingSource {
    inner: Box<dyn RawTagSource>,
    reads: ReadCounter,
}

impl CountingSource {
    pub fn wrap(inner: impl RawTagSource + 'static) -> (Self, ReadCounter) {
        let reads = ReadCounter::default();
        let source = Self {
            inner: Box::new(inner),
            reads: reads.clone(),
        };
        (source, reads)
    }
}

impl RawTagSource for CountingSource {
    fn read_up_to(&mut self, n: usize) -> Result<&[u8]> {
        self.reads.0.fetch_add(1, Ordering::SeqCst);
        self.inner.read_up_to(n)
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    fn buffered(&self) -> usize {
        self.inner.buffered()
    }
}
