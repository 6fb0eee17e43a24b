#![no_main]

use aerial_meta::source::MemorySource;
use aerial_meta::{GsdOptions, MetadataParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any input must produce values or errors, never a panic
    let mut parser = MetadataParser::builder("fuzz.jpg")
        .source(Box::new(MemorySource::new(data.to_vec())))
        .build();

    let _ = parser.make_and_model();
    let _ = parser.firmware_version();
    let _ = parser.dimensions();
    let _ = parser.timestamp();
    let _ = parser.location();
    let _ = parser.global_altitude();
    let _ = parser.rotation(true);
    let _ = parser.home_point();
    let _ = parser.intrinsics(true);
    let _ = parser.gsd(&GsdOptions::default());
    let _ = parser.wavelength_data();
    let _ = parser.gps_accuracy();
});
