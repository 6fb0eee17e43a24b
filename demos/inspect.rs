//! Example: Print every metadata value the parser can extract from an image
//!
//! Accepts a local path or an `s3://bucket/key` URL, and optionally a TOML config file.
//! Accessors that fail print their error instead of a value.
//!
//! Run: `RUST_LOG=aerial_meta=debug cargo run --example inspect -- <image> [config.toml]`

use aerial_meta::{AltitudeOptions, AltitudeSource, GsdOptions, MetadataParser, ParserConfig};
use std::env;
use std::fmt::Debug;
use tracing_subscriber::EnvFilter;

fn show<T: Debug>(label: &str, value: aerial_meta::Result<T>) {
    match value {
        Ok(v) => println!("  {:<22} {:?}", label, v),
        Err(e) => println!("  {:<22} ✗ {}", label, e),
    }
}

fn main() -> aerial_meta::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <image_file | s3://bucket/key> [config.toml]", args[0]);
        std::process::exit(1);
    }

    let config = match args.get(2) {
        Some(path) => ParserConfig::load(path)?,
        None => ParserConfig::default(),
    };
    let mut parser = MetadataParser::builder(args[1].as_str()).config(config).build();
    println!("Parsing: {}", parser.handle());

    println!("\nIdentity:");
    show("profile", parser.profile());
    show("make/model", parser.make_and_model());
    show("firmware", parser.firmware_version().map(|v| v.to_string()));
    show("serial number", parser.serial_number());
    show("lens model", parser.lens_model());
    show("dimensions", parser.dimensions());
    show("autoexposure", parser.autoexposure());

    println!("\nTime and position:");
    show("timestamp (UTC)", parser.timestamp());
    show("timestamp (local)", parser.local_timestamp());
    show("location", parser.location());
    show("altitude MSL", parser.global_altitude());
    show("rotation (raw)", parser.rotation(false));
    show("rotation (standard)", parser.rotation(true));
    show("home point", parser.home_point());
    show("altitude (default)", parser.relative_altitude(&AltitudeOptions::default()));
    show(
        "altitude (LRF)",
        parser.relative_altitude(&AltitudeOptions::new(AltitudeSource::Lrf)),
    );
    show("GPS accuracy", parser.gps_accuracy());

    println!("\nCamera:");
    show("pixel pitch (m)", parser.pixel_pitch_meters());
    show("focal length (px)", parser.focal_length_pixels(true));
    show("GSD (m/px)", parser.gsd(&GsdOptions::default()));
    show("dewarp flag", parser.dewarp_flag());
    match parser.intrinsics(true) {
        Ok(intrinsics) => match serde_json::to_string_pretty(&intrinsics) {
            Ok(json) => println!("  intrinsics\n{}", json),
            Err(e) => println!("  intrinsics             ✗ {}", e),
        },
        Err(e) => println!("  intrinsics             ✗ {}", e),
    }

    println!("\nRadiometry:");
    show("band names", parser.bandnames());
    show("wavelengths (nm)", parser.wavelength_data());
    show("irradiance", parser.irradiance());
    show("ILS", parser.ils());
    show("capture id", parser.capture_id());
    show("flight id", parser.flight_id());

    Ok(())
}
