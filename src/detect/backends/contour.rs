use anyhow::Result;
use image::GrayImage;

use super::{binarize, external_contours, fill_contour};
use crate::detect::backend::MarkerStrategy;
use crate::detect::geometry::ContourShape;
use crate::detect::result::{DetectedMarker, Detection};

/// Threshold, trace external contours, keep those inside the area band.
///
/// With `min_circularity` set, elongated contours (reflections, streaks) are rejected too.
#[derive(Clone, Debug)]
pub struct ContourStrategy {
    pub min_area: f64,
    pub max_area: f64,
    pub min_circularity: Option<f64>,
}

impl ContourStrategy {
    pub fn new(min_area: f64, max_area: f64) -> Self {
        Self {
            min_area,
            max_area,
            min_circularity: None,
        }
    }

    pub fn with_min_circularity(mut self, min_circularity: f64) -> Self {
        self.min_circularity = Some(min_circularity);
        self
    }

    fn accepts(&self, shape: &ContourShape) -> bool {
        if shape.area <= self.min_area || shape.area >= self.max_area {
            return false;
        }
        self.min_circularity
            .map_or(true, |min| shape.circularity() >= min)
    }
}

impl MarkerStrategy for ContourStrategy {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn detect(&self, gray: &GrayImage, threshold: u8) -> Result<Detection> {
        let binary = binarize(gray, threshold);
        let mut detection = Detection::empty(gray.width(), gray.height());
        for points in external_contours(&binary) {
            let Some(shape) = ContourShape::measure(&points) else {
                continue;
            };
            if !self.accepts(&shape) {
                continue;
            }
            detection.markers.push(DetectedMarker::new(
                shape.centroid.0 as f32,
                shape.centroid.1 as f32,
                shape.equivalent_diameter() as f32,
            ));
            fill_contour(&mut detection.mask, &points);
        }
        Ok(detection)
    }
}
