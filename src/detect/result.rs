use image::GrayImage;
use serde::Serialize;

/// One detected marker in pixel coordinates of the processed frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DetectedMarker {
    pub x: f32,
    pub y: f32,
    /// Equivalent-circle diameter in pixels.
    pub size: f32,
}

impl DetectedMarker {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self { x, y, size }
    }

    pub fn distance_to(&self, other: &DetectedMarker) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Result of running detection on a frame.
#[derive(Clone, Debug)]
pub struct Detection {
    /// Marker centers in detector output order.
    pub markers: Vec<DetectedMarker>,
    /// Accepted marker regions at 255, everything else 0.
    pub mask: GrayImage,
}

impl Detection {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            markers: Vec::new(),
            mask: GrayImage::new(width, height),
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
