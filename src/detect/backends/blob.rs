use anyhow::Result;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_filled_circle_mut;
use imageproc::morphology::{close, open};

use super::{binarize, external_contours};
use crate::detect::backend::MarkerStrategy;
use crate::detect::geometry::{convexity, ContourShape};
use crate::detect::result::{DetectedMarker, Detection};

/// Multi-threshold blob detector.
///
/// The frame is binarized at every level from `threshold` to 255 in `threshold_step`
/// increments, cleaned with a morphological open then close, and filtered by area,
/// circularity, convexity and inertia ratio. Centers seen at `min_repeatability` or more
/// levels within `min_distance` pixels of each other become one marker.
#[derive(Clone, Debug)]
pub struct BlobStrategy {
    pub min_area: f64,
    pub max_area: f64,
    pub min_circularity: f64,
    pub min_convexity: f64,
    pub min_inertia_ratio: f64,
    pub threshold_step: u8,
    pub min_repeatability: usize,
    pub min_distance: f32,
    /// Chebyshev radius of the open/close structuring element.
    pub morph_radius: u8,
}

impl BlobStrategy {
    pub fn new(min_area: f64, max_area: f64, min_circularity: f64) -> Self {
        Self {
            min_area,
            max_area,
            min_circularity,
            min_convexity: 0.1,
            min_inertia_ratio: 0.2,
            threshold_step: 10,
            min_repeatability: 2,
            min_distance: 10.0,
            morph_radius: 1,
        }
    }

    fn levels(&self, threshold: u8) -> Vec<u8> {
        let step = usize::from(self.threshold_step.max(1));
        (u16::from(threshold)..=255)
            .step_by(step)
            .map(|t| t as u8)
            .collect()
    }

    fn candidates(&self, gray: &GrayImage, level: u8) -> Vec<DetectedMarker> {
        let binary = binarize(gray, level);
        let cleaned = close(&open(&binary, Norm::LInf, self.morph_radius), Norm::LInf, self.morph_radius);
        external_contours(&cleaned)
            .into_iter()
            .filter_map(|points| {
                let shape = ContourShape::measure(&points)?;
                let keep = shape.area > self.min_area
                    && shape.area < self.max_area
                    && shape.circularity() >= self.min_circularity
                    && shape.inertia_ratio >= self.min_inertia_ratio
                    && convexity(&points, shape.area) >= self.min_convexity;
                keep.then(|| {
                    DetectedMarker::new(
                        shape.centroid.0 as f32,
                        shape.centroid.1 as f32,
                        shape.equivalent_diameter() as f32,
                    )
                })
            })
            .collect()
    }
}

/// Running mean of one marker's center across threshold levels.
struct BlobGroup {
    sum_x: f32,
    sum_y: f32,
    sum_size: f32,
    hits: usize,
}

impl BlobGroup {
    fn mean(&self) -> DetectedMarker {
        let n = self.hits as f32;
        DetectedMarker::new(self.sum_x / n, self.sum_y / n, self.sum_size / n)
    }
}

impl MarkerStrategy for BlobStrategy {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn detect(&self, gray: &GrayImage, threshold: u8) -> Result<Detection> {
        let levels = self.levels(threshold);
        let mut groups: Vec<BlobGroup> = Vec::new();
        for &level in &levels {
            for candidate in self.candidates(gray, level) {
                let near = groups
                    .iter_mut()
                    .find(|g| g.mean().distance_to(&candidate) < self.min_distance);
                match near {
                    Some(group) => {
                        group.sum_x += candidate.x;
                        group.sum_y += candidate.y;
                        group.sum_size += candidate.size;
                        group.hits += 1;
                    }
                    None => groups.push(BlobGroup {
                        sum_x: candidate.x,
                        sum_y: candidate.y,
                        sum_size: candidate.size,
                        hits: 1,
                    }),
                }
            }
        }

        // A single sweep level cannot repeat anything.
        let required = self.min_repeatability.min(levels.len()).max(1);
        let mut detection = Detection::empty(gray.width(), gray.height());
        for group in groups.iter().filter(|g| g.hits >= required) {
            let marker = group.mean();
            let radius = (marker.size / 2.0).round().max(1.0) as i32;
            draw_filled_circle_mut(
                &mut detection.mask,
                (marker.x.round() as i32, marker.y.round() as i32),
                radius,
                Luma([255]),
            );
            detection.markers.push(marker);
        }
        Ok(detection)
    }
}
