use anyhow::Result;
use image::GrayImage;

use super::result::Detection;

/// One way of turning a grayscale frame into marker centers.
///
/// Strategies are stateless between calls: no memory of earlier frames.
pub trait MarkerStrategy: Send + Sync {
    /// Strategy identifier for logs.
    fn name(&self) -> &'static str;

    /// Detect bright markers; `threshold` is the lowest foreground intensity.
    fn detect(&self, gray: &GrayImage, threshold: u8) -> Result<Detection>;
}
