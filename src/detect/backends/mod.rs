pub mod blob;
pub mod contour;

pub use blob::BlobStrategy;
pub use contour::ContourStrategy;

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{threshold as threshold_image, ThresholdType};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

/// Foreground (255) where `pixel >= threshold`. Threshold 0 marks every pixel.
pub(crate) fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    match threshold.checked_sub(1) {
        Some(cutoff) => threshold_image(gray, cutoff, ThresholdType::Binary),
        None => GrayImage::from_pixel(gray.width(), gray.height(), Luma([255])),
    }
}

/// Outer borders of top-level foreground regions; holes and nested regions are skipped.
pub(crate) fn external_contours(binary: &GrayImage) -> Vec<Vec<Point<i32>>> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

/// Fill the region bounded by `points` on `mask`.
pub(crate) fn fill_contour(mask: &mut GrayImage, points: &[Point<i32>]) {
    let fill = Luma([255u8]);
    let closed = points.len() >= 3 && points.first() != points.last();
    if closed {
        draw_polygon_mut(mask, points, fill);
    }
    for p in points {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < mask.width() && (p.y as u32) < mask.height() {
            mask.put_pixel(p.x as u32, p.y as u32, fill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binarize_is_inclusive_at_threshold() {
        let gray = GrayImage::from_fn(4, 1, |x, _| Luma([[0u8, 199, 200, 255][x as usize]]));
        let binary = binarize(&gray, 200);
        assert_eq!(binary.as_raw(), &vec![0, 0, 255, 255]);
        assert!(binarize(&gray, 0).pixels().all(|p| p.0[0] == 255));
        assert_eq!(binarize(&gray, 255).as_raw(), &vec![0, 0, 0, 255]);
    }
}
