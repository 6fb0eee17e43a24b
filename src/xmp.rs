//! XMP packet location and property extraction
//!
//! The locator scans a [`RawTagSource`] chunk by chunk for the first complete
//! `<x:xmpmeta>…</x:xmpmeta>` packet, reading no further than needed. The packet is
//! then flattened into [`RawXmpProperties`]:
//! - Attributes on `rdf:Description` become text properties
//! - Property elements with character data become text properties
//! - Elements holding `rdf:Seq`, `rdf:Bag` or `rdf:Alt` become lists of their `rdf:li` items

use crate::error::{Error, Result};
use crate::source::{RawTagSource, MAX_SCAN_BYTES};
use memchr::memmem;
use std::collections::HashMap;
use tracing::debug;

const OPEN_MARKER: &[u8] = b"<x:xmpmeta";
const CLOSE_MARKER: &[u8] = b"</x:xmpmeta>";

const RDF_DESCRIPTION: &str = "rdf:Description";

/// Find the first complete XMP packet in `source`, failing when there is none.
pub fn locate_packet(source: &mut dyn RawTagSource, chunk_size: usize) -> Result<String> {
    find_packet(source, chunk_size)?.ok_or_else(|| Error::malformed("no XMP block found"))
}

/// Find the first complete XMP packet in `source`; `None` if the stream ends without one.
///
/// Each iteration requests `chunk_size` more bytes and searches only the new tail,
/// widened by `CLOSE_MARKER.len() - 1` bytes so a marker split across chunks is
/// still found. Total scan work is linear in the bytes read.
pub fn find_packet(source: &mut dyn RawTagSource, chunk_size: usize) -> Result<Option<String>> {
    let chunk_size = chunk_size.max(1);
    let overlap = CLOSE_MARKER.len() - 1;
    let closer = memmem::Finder::new(CLOSE_MARKER);
    // Bytes before this offset have been searched for the close marker already
    let mut scanned = 0usize;

    loop {
        let requested = scanned.saturating_add(chunk_size);
        let held = source.read_up_to(requested)?.len();
        let exhausted = source.is_exhausted() || held < requested;

        let window_start = scanned.saturating_sub(overlap);
        let buffer = source.read_up_to(held)?;
        if let Some(pos) = closer.find(&buffer[window_start..held]) {
            let close_end = window_start + pos + CLOSE_MARKER.len();
            if let Some(packet) = match_packet(&buffer[..close_end]) {
                debug!("XMP packet found ({} bytes) after reading {} bytes", packet.len(), held);
                return Ok(Some(packet));
            }
            // A close marker with no opener before it; search the rest of the buffer
            scanned = close_end;
            continue;
        }
        scanned = held;

        if exhausted {
            return Ok(None);
        }
        if held > MAX_SCAN_BYTES {
            return Err(Error::malformed(format!(
                "no XMP block within the first {} MB",
                MAX_SCAN_BYTES / (1024 * 1024)
            )));
        }
    }
}

/// Match `<x:xmpmeta … </x:xmpmeta>` against the whole buffer.
fn match_packet(buffer: &[u8]) -> Option<String> {
    let start = memmem::find(buffer, OPEN_MARKER)?;
    let end = memmem::find(&buffer[start..], CLOSE_MARKER)? + start + CLOSE_MARKER.len();
    Some(String::from_utf8_lossy(&buffer[start..end]).into_owned())
}

/// A flattened XMP property value
#[derive(Debug, Clone, PartialEq)]
pub enum XmpValue {
    Text(String),
    List(Vec<String>),
}

impl XmpValue {
    /// Scalar text; lists are not coerced
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.trim()),
            Self::List(_) => None,
        }
    }

    /// All items, a scalar counting as a one-element list
    pub fn items(&self) -> Vec<&str> {
        match self {
            Self::Text(s) => vec![s.trim()],
            Self::List(items) => items.iter().map(|s| s.trim()).collect(),
        }
    }
}

/// XMP properties of one image, keyed by qualified name (e.g. `drone-dji:GimbalPitchDegree`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawXmpProperties {
    properties: HashMap<String, XmpValue>,
}

enum Frame {
    /// Structural element (`x:xmpmeta`, `rdf:RDF`, `rdf:Description`, collections)
    Container,
    Property {
        name: String,
        text: String,
        items: Option<Vec<String>>,
    },
    Item(String),
}

impl RawXmpProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a text property
    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.insert(name, XmpValue::Text(value.to_string()));
        self
    }

    /// Builder-style insert of a list property
    pub fn with_list(mut self, name: &str, items: &[&str]) -> Self {
        let items = items.iter().map(|s| s.to_string()).collect();
        self.insert(name, XmpValue::List(items));
        self
    }

    pub fn insert(&mut self, name: &str, value: XmpValue) {
        self.properties.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&XmpValue> {
        self.properties.get(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Scalar text property or a `MissingTag` error naming `what`
    pub fn text(&self, name: &str, what: &str) -> Result<&str> {
        self.get(name)
            .and_then(XmpValue::as_text)
            .ok_or_else(|| Error::missing(format!("Couldn't parse {}", what)))
    }

    /// Scalar property parsed as a float; present but unparsable is `MalformedData`
    pub fn float(&self, name: &str, what: &str) -> Result<f64> {
        let text = self.text(name, what)?;
        text.parse::<f64>()
            .map_err(|_| Error::malformed(format!("{} is not a number: {:?}", what, text)))
    }

    /// All items of a property as floats, a scalar counting as one item
    pub fn floats(&self, name: &str, what: &str) -> Result<Vec<f64>> {
        let value = self
            .get(name)
            .ok_or_else(|| Error::missing(format!("Couldn't parse {}", what)))?;
        value
            .items()
            .into_iter()
            .map(|item| {
                item.parse::<f64>()
                    .map_err(|_| Error::malformed(format!("{} is not a number: {:?}", what, item)))
            })
            .collect()
    }

    /// Locate the packet in `source` and parse it.
    pub fn fetch(source: &mut dyn RawTagSource, chunk_size: usize) -> Result<Self> {
        let packet = locate_packet(source, chunk_size)?;
        Self::parse(&packet)
    }

    /// Like [`fetch`](Self::fetch), but an image without any packet has no properties.
    ///
    /// Tag lookups on the result then fail as `MissingTag`, the same as for a packet that
    /// lacks the tag. A packet that is present but unparsable is still an error.
    pub fn fetch_or_empty(source: &mut dyn RawTagSource, chunk_size: usize) -> Result<Self> {
        match find_packet(source, chunk_size)? {
            Some(packet) => Self::parse(&packet),
            None => {
                debug!("no XMP packet in {} bytes; treating as empty", source.buffered());
                Ok(Self::new())
            }
        }
    }

    /// Flatten an XMP packet into properties. The first occurrence of a name wins.
    ///
    /// # Example
    ///
    /// ```
    /// use aerial_meta::xmp::RawXmpProperties;
    ///
    /// let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF>
    ///   <rdf:Description drone-dji:RelativeAltitude="+15.20"/>
    /// </rdf:RDF></x:xmpmeta>"#;
    /// let props = RawXmpProperties::parse(xmp).unwrap();
    /// let alt = props.get("drone-dji:RelativeAltitude").unwrap();
    /// assert_eq!(alt.as_text(), Some("+15.20"));
    /// ```
    pub fn parse(packet: &str) -> Result<Self> {
        use quick_xml::{events::Event, Reader};

        let mut reader = Reader::from_str(packet);
        reader.config_mut().trim_text(true);

        let mut props = Self::new();
        let mut stack: Vec<Frame> = Vec::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| Error::malformed(format!("XMP parse error: {}", e)))?;
            match event {
                Event::Start(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let frame = match name.as_str() {
                        RDF_DESCRIPTION => {
                            props.absorb_attributes(e)?;
                            Frame::Container
                        }
                        "x:xmpmeta" | "rdf:RDF" => Frame::Container,
                        "rdf:Seq" | "rdf:Bag" | "rdf:Alt" => {
                            if let Some(Frame::Property { items, .. }) = stack.last_mut() {
                                items.get_or_insert_with(Vec::new);
                            }
                            Frame::Container
                        }
                        "rdf:li" => Frame::Item(String::new()),
                        _ => {
                            props.absorb_attributes(e)?;
                            Frame::Property {
                                name,
                                text: String::new(),
                                items: None,
                            }
                        }
                    };
                    stack.push(frame);
                }
                Event::Empty(ref e) => {
                    let name = e.name();
                    match name.as_ref() {
                        b"rdf:li" => {
                            if let Some(Frame::Property { items: Some(items), .. }) =
                                nearest_property(&mut stack)
                            {
                                items.push(String::new());
                            }
                        }
                        b"rdf:Seq" | b"rdf:Bag" | b"rdf:Alt" => {}
                        _ => props.absorb_attributes(e)?,
                    }
                }
                Event::Text(ref e) => {
                    let text = e
                        .unescape()
                        .map_err(|err| Error::malformed(format!("XMP text error: {}", err)))?;
                    append_text(&mut stack, &text);
                }
                Event::CData(ref e) => {
                    append_text(&mut stack, &String::from_utf8_lossy(&e.clone().into_inner()));
                }
                Event::End(_) => match stack.pop() {
                    Some(Frame::Item(text)) => {
                        if let Some(Frame::Property { items, .. }) = nearest_property(&mut stack) {
                            items.get_or_insert_with(Vec::new).push(text);
                        }
                    }
                    Some(Frame::Property { name, text, items }) => {
                        let value = match items {
                            Some(items) => Some(XmpValue::List(items)),
                            None if !text.is_empty() => Some(XmpValue::Text(text)),
                            None => None,
                        };
                        if let Some(value) = value {
                            props.properties.entry(name).or_insert(value);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(props)
    }

    fn absorb_attributes(&mut self, element: &quick_xml::events::BytesStart<'_>) -> Result<()> {
        for attr in element.attributes() {
            let attr =
                attr.map_err(|e| Error::malformed(format!("XMP attribute error: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key.starts_with("xmlns") || key.starts_with("rdf:") || key.starts_with("x:") {
                continue;
            }
            let value = attr
                .unescape_value()
                .map_err(|e| Error::malformed(format!("XMP attribute error: {}", e)))?;
            self.properties
                .entry(key)
                .or_insert_with(|| XmpValue::Text(value.into_owned()));
        }
        Ok(())
    }
}

fn nearest_property(stack: &mut [Frame]) -> Option<&mut Frame> {
    stack
        .iter_mut()
        .rev()
        .find(|frame| matches!(frame, Frame::Property { .. }))
}

fn append_text(stack: &mut [Frame], text: &str) {
    match stack.last_mut() {
        Some(Frame::Property { text: buf, .. }) | Some(Frame::Item(buf)) => buf.push_str(text),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    const TEST_XMP: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
    <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
        <rdf:Description rdf:about=""
            xmlns:drone-dji="http://www.dji.com/drone-dji/1.0/"
            xmlns:Camera="http://pix4d.com/camera/1.0/"
            drone-dji:GimbalPitchDegree="-89.90"
            drone-dji:RelativeAltitude="+15.20">
            <Camera:BandName>
                <rdf:Seq>
                    <rdf:li>Red</rdf:li>
                    <rdf:li>Green</rdf:li>
                    <rdf:li>Blue</rdf:li>
                </rdf:Seq>
            </Camera:BandName>
            <Camera:CentralWavelength>
                <rdf:Seq><rdf:li>630</rdf:li><rdf:li>525</rdf:li><rdf:li>450</rdf:li></rdf:Seq>
            </Camera:CentralWavelength>
            <Camera:Irradiance>2281.688965</Camera:Irradiance>
            <Camera:Note>a &amp; b</Camera:Note>
        </rdf:Description>
    </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    fn embedded(prefix_len: usize, packet: &str, suffix_len: usize) -> Vec<u8> {
        let mut bytes = vec![0xAB; prefix_len];
        bytes.extend_from_slice(packet.as_bytes());
        bytes.extend(std::iter::repeat(0xCD).take(suffix_len));
        bytes
    }

    #[test]
    fn test_parse_attributes_and_lists() {
        let props = RawXmpProperties::parse(TEST_XMP).unwrap();
        assert_eq!(
            props.get("drone-dji:GimbalPitchDegree").unwrap().as_text(),
            Some("-89.90")
        );
        assert_eq!(
            props.get("Camera:BandName").unwrap().items(),
            vec!["Red", "Green", "Blue"]
        );
        assert_eq!(
            props.get("Camera:CentralWavelength").unwrap(),
            &XmpValue::List(vec!["630".into(), "525".into(), "450".into()])
        );
        assert_eq!(
            props.get("Camera:Irradiance").unwrap().as_text(),
            Some("2281.688965")
        );
        assert_eq!(props.get("Camera:Note").unwrap().as_text(), Some("a & b"));
        assert!(props.get("rdf:about").is_none());
        assert!(props.get("xmlns:drone-dji").is_none());
    }

    #[test]
    fn test_locate_packet_mid_stream() {
        let bytes = embedded(5000, TEST_XMP, 5000);
        let mut source = MemorySource::new(bytes);
        let packet = locate_packet(&mut source, 1024).unwrap();
        assert!(packet.starts_with("<x:xmpmeta"));
        assert!(packet.ends_with("</x:xmpmeta>"));
        // Stopped before reading the whole stream
        assert!(!source.is_exhausted());
    }

    #[test]
    fn test_close_marker_split_across_chunks() {
        // Place the packet so the close marker straddles a 10-byte chunk boundary:
        // "...</x:xmp" | "meta>..."
        let packet = "<x:xmpmeta><rdf:RDF/></x:xmpmeta>";
        let split_at = packet.len() - "meta>".len();
        let prefix = 10 - (split_at % 10);
        let bytes = embedded(prefix, packet, 50);
        assert_eq!((prefix + split_at) % 10, 0);

        let mut source = MemorySource::new(bytes);
        assert_eq!(locate_packet(&mut source, 10).unwrap(), packet);
    }

    #[test]
    fn test_chunk_smaller_than_marker() {
        let bytes = embedded(37, TEST_XMP, 3);
        for chunk in [1, 3, 7, 11, 12, 13] {
            let mut source = MemorySource::new(bytes.clone());
            let packet = locate_packet(&mut source, chunk).unwrap();
            assert!(packet.ends_with("</x:xmpmeta>"), "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_no_packet() {
        let mut source = MemorySource::new(vec![0u8; 300]);
        let err = locate_packet(&mut source, 64).unwrap_err();
        assert!(matches!(err, Error::MalformedData(ref m) if m.contains("no XMP block found")));
    }

    #[test]
    fn test_stray_close_marker_before_packet() {
        let mut bytes = b"junk </x:xmpmeta> junk ".to_vec();
        bytes.extend_from_slice(b"<x:xmpmeta>real</x:xmpmeta>");
        for chunk in [8, 4096] {
            let mut source = MemorySource::new(bytes.clone());
            assert_eq!(
                locate_packet(&mut source, chunk).unwrap(),
                "<x:xmpmeta>real</x:xmpmeta>"
            );
        }
    }

    #[test]
    fn test_typed_accessors() {
        let props = RawXmpProperties::parse(TEST_XMP).unwrap();
        assert_eq!(props.float("drone-dji:RelativeAltitude", "relative altitude").unwrap(), 15.2);
        assert_eq!(
            props.floats("Camera:CentralWavelength", "wavelength").unwrap(),
            vec![630.0, 525.0, 450.0]
        );
        assert_eq!(props.floats("Camera:Irradiance", "irradiance").unwrap().len(), 1);

        assert!(matches!(props.float("Camera:Note", "note"), Err(Error::MalformedData(_))));
        assert!(matches!(props.float("Camera:Missing", "missing"), Err(Error::MissingTag(_))));
        // Lists are not scalars
        assert!(props.text("Camera:BandName", "band name").is_err());
    }

    #[test]
    fn test_fetch_or_empty_without_packet() {
        let mut source = MemorySource::new(vec![0u8; 300]);
        let props = RawXmpProperties::fetch_or_empty(&mut source, 64).unwrap();
        assert!(props.is_empty());
        assert!(matches!(
            props.text("drone-dji:RelativeAltitude", "relative altitude"),
            Err(Error::MissingTag(_))
        ));

        let mut source = MemorySource::new(b"<x:xmpmeta><rdf:RDF></x:xmpmeta>".to_vec());
        assert!(matches!(
            RawXmpProperties::fetch_or_empty(&mut source, 64),
            Err(Error::MalformedData(_))
        ));
    }

    #[test]
    fn test_fetch_parses_located_packet() {
        let mut source = MemorySource::new(embedded(100, TEST_XMP, 100));
        let props = RawXmpProperties::fetch(&mut source, 64).unwrap();
        assert_eq!(
            props.get("drone-dji:RelativeAltitude").unwrap().as_text(),
            Some("+15.20")
        );
    }
}
