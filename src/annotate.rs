//! Overlay detected markers on processed frames.
//!
//! Every marker gets a red ring of its estimated diameter. Once the correspondence is frozen,
//! each marker also gets a small square tag whose colour encodes its stable ID, so the same
//! physical marker carries the same colour in every matched view.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::rect::Rect;

use crate::detect::DetectedMarker;

const RING: Rgb<u8> = Rgb([255, 0, 0]);
const TAG_SIDE: u32 = 5;
const TAG_OFFSET: i32 = 8;

/// Distinct tag colours; IDs wrap around.
pub const ID_PALETTE: [Rgb<u8>; 12] = [
    Rgb([0, 255, 0]),
    Rgb([0, 128, 255]),
    Rgb([255, 255, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 128, 0]),
    Rgb([128, 255, 128]),
    Rgb([128, 0, 255]),
    Rgb([255, 128, 192]),
    Rgb([128, 128, 0]),
    Rgb([0, 128, 128]),
    Rgb([255, 255, 255]),
];

pub fn id_colour(id: usize) -> Rgb<u8> {
    ID_PALETTE[id % ID_PALETTE.len()]
}

/// Draw rings for `markers`, plus an ID tag when `labels` is given (one per marker).
pub fn annotate(frame: &mut RgbImage, markers: &[DetectedMarker], labels: Option<&[usize]>) {
    for (i, marker) in markers.iter().enumerate() {
        let center = (marker.x.round() as i32, marker.y.round() as i32);
        let radius = ((marker.size / 2.0).round() as i32).max(2) + 1;
        draw_hollow_circle_mut(frame, center, radius, RING);
        if let Some(id) = labels.and_then(|labels| labels.get(i)) {
            let tag = Rect::at(center.0 - TAG_OFFSET, center.1 - TAG_OFFSET)
                .of_size(TAG_SIDE, TAG_SIDE);
            draw_filled_rect_mut(frame, tag, id_colour(*id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rings_without_labels() {
        let mut frame = RgbImage::new(40, 40);
        annotate(&mut frame, &[DetectedMarker::new(20.0, 20.0, 8.0)], None);
        assert_eq!(frame.get_pixel(25, 20).0, RING.0);
        assert_eq!(frame.get_pixel(20, 20).0, [0, 0, 0]);
        assert!(!frame.pixels().any(|p| p.0 == id_colour(0).0));
    }

    #[test]
    fn labels_paint_id_colours() {
        let mut frame = RgbImage::new(60, 40);
        let markers = [
            DetectedMarker::new(15.0, 20.0, 6.0),
            DetectedMarker::new(45.0, 20.0, 6.0),
        ];
        annotate(&mut frame, &markers, Some(&[3, 13]));
        assert_eq!(frame.get_pixel(8, 13).0, id_colour(3).0);
        assert_eq!(frame.get_pixel(38, 13).0, id_colour(1).0);
    }

    #[test]
    fn markers_at_the_edge_are_clipped() {
        let mut frame = RgbImage::new(10, 10);
        annotate(&mut frame, &[DetectedMarker::new(0.0, 0.0, 6.0)], Some(&[0]));
        annotate(&mut frame, &[DetectedMarker::new(9.0, 9.0, 30.0)], None);
    }
}
