#![no_main]

use aerial_meta::source::MemorySource;
use aerial_meta::xmp::{locate_packet, RawXmpProperties};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Chunked scanning must agree with a single large read
    let mut small = MemorySource::new(data.to_vec());
    let mut large = MemorySource::new(data.to_vec());
    let chunked = locate_packet(&mut small, 7).ok();
    let whole = locate_packet(&mut large, data.len().max(1)).ok();
    assert_eq!(chunked, whole);

    if let Some(packet) = chunked {
        if let Ok(props) = RawXmpProperties::parse(&packet) {
            let _ = props.text("drone-dji:RelativeAltitude", "relative altitude");
            let _ = props.floats("Camera:CentralWavelength", "wavelength data");
        }
    }
});
