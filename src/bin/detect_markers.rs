//! detect_markers - run marker detection on an image file
//!
//! Prints the detected centers as JSON and optionally writes the detection mask.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use mocap_rig::{DetectedMarker, DetectionConfig, MarkerDetector};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect bright circular markers in an image")]
struct Args {
    /// Input image (PNG or JPEG).
    image: PathBuf,

    /// Brightness threshold; pixels at or above it are foreground.
    #[arg(long, env = "MOCAP_THRESHOLD", default_value_t = 200)]
    threshold: u8,

    /// Use the blob-first detector with the contour fallback.
    #[arg(long)]
    strict: bool,

    /// Write the detection mask to this PNG.
    #[arg(long, value_name = "PATH")]
    mask: Option<PathBuf>,
}

#[derive(Serialize)]
struct Output<'a> {
    image: String,
    threshold: u8,
    strategies: Vec<&'static str>,
    markers: &'a [DetectedMarker],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let frame = image::open(&args.image)
        .with_context(|| format!("open image {}", args.image.display()))?
        .to_rgb8();
    let cfg = DetectionConfig {
        strict: args.strict,
        ..DetectionConfig::default()
    };
    let detector = MarkerDetector::from_config(&cfg);
    let detection = detector.detect(&frame, args.threshold)?;

    if let Some(path) = &args.mask {
        detection
            .mask
            .save(path)
            .with_context(|| format!("write mask {}", path.display()))?;
    }

    let output = Output {
        image: args.image.display().to_string(),
        threshold: args.threshold,
        strategies: detector.strategies(),
        markers: &detection.markers,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
