//! Marker detection.
//!
//! - `MarkerStrategy`: one detection method (contour tracing, multi-threshold blobs).
//! - `StrategyChain`: ordered strategies with a count-based fallback.
//! - `MarkerDetector`: the configured chain applied to a processed RGB frame.

mod backend;
mod backends;
pub mod geometry;
mod registry;
mod result;

pub use backend::MarkerStrategy;
pub use backends::{BlobStrategy, ContourStrategy};
pub use registry::StrategyChain;
pub use result::{DetectedMarker, Detection};

use anyhow::Result;
use image::imageops::grayscale;
use image::RgbImage;

use crate::config::DetectionConfig;

pub struct MarkerDetector {
    chain: StrategyChain,
}

impl MarkerDetector {
    /// Contour tracing with the area band only.
    pub fn basic(cfg: &DetectionConfig) -> Self {
        let contour = ContourStrategy::new(f64::from(cfg.min_area), f64::from(cfg.max_area));
        Self {
            chain: StrategyChain::new(0).with(contour),
        }
    }

    /// Blob sweep first, circular contours when the sweep finds fewer than
    /// `expected_min_markers`.
    pub fn strict(cfg: &DetectionConfig) -> Self {
        let (min_area, max_area) = (f64::from(cfg.min_area), f64::from(cfg.max_area));
        let circularity = f64::from(cfg.min_circularity);
        let chain = StrategyChain::new(cfg.expected_min_markers)
            .with(BlobStrategy::new(min_area, max_area, circularity))
            .with(ContourStrategy::new(min_area, max_area).with_min_circularity(circularity));
        Self { chain }
    }

    pub fn from_config(cfg: &DetectionConfig) -> Self {
        if cfg.strict {
            Self::strict(cfg)
        } else {
            Self::basic(cfg)
        }
    }

    pub fn strategies(&self) -> Vec<&'static str> {
        self.chain.list()
    }

    pub fn detect(&self, frame: &RgbImage, threshold: u8) -> Result<Detection> {
        self.chain.detect(&grayscale(frame), threshold)
    }
}

/// Basic contour detection with the default area band.
pub fn detect_markers(frame: &RgbImage, threshold: u8) -> Result<Detection> {
    MarkerDetector::basic(&DetectionConfig::default()).detect(frame, threshold)
}
