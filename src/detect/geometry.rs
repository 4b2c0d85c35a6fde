//! Shape measurements of traced contours.
//!
//! Area, perimeter and hull come from `imageproc::geometry`. Second moments are polygon
//! moments over the contour vertices (Green's theorem), the same quantities a raster moment
//! computation converges to for filled blobs.

use imageproc::geometry::{arc_length, contour_area, convex_hull};
use imageproc::point::Point;
use std::f64::consts::PI;

/// Measurements of one closed contour. Only built for non-degenerate contours.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContourShape {
    pub area: f64,
    pub perimeter: f64,
    pub centroid: (f64, f64),
    /// Minor over major principal second moment (1 for a disc).
    pub inertia_ratio: f64,
}

impl ContourShape {
    /// `None` when the enclosed area or the perimeter is zero.
    pub fn measure(points: &[Point<i32>]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let perimeter = arc_length(points, true);
        let area = contour_area(points);
        let m = Moments::of_polygon(points);
        if area < f64::EPSILON || perimeter <= f64::EPSILON {
            return None;
        }
        let cx = m.m10 / m.m00;
        let cy = m.m01 / m.m00;
        let mu20 = m.m20 / m.m00 - cx * cx;
        let mu02 = m.m02 / m.m00 - cy * cy;
        let mu11 = m.m11 / m.m00 - cx * cy;
        let half_sum = (mu20 + mu02) / 2.0;
        let spread = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
        let major = half_sum + spread;
        let minor = half_sum - spread;
        let inertia_ratio = if major.abs() < f64::EPSILON {
            1.0
        } else {
            (minor / major).clamp(0.0, 1.0)
        };
        Some(Self {
            area,
            perimeter,
            centroid: (cx, cy),
            inertia_ratio,
        })
    }

    /// `4 * pi * area / perimeter^2`; 1 for a perfect circle.
    pub fn circularity(&self) -> f64 {
        4.0 * PI * self.area / (self.perimeter * self.perimeter)
    }

    /// Diameter of the circle with the same area.
    pub fn equivalent_diameter(&self) -> f64 {
        2.0 * (self.area / PI).sqrt()
    }
}

/// Raw polygon moments; `m00` is the signed area, so ratios are orientation independent.
#[derive(Debug, Default)]
struct Moments {
    m00: f64,
    m10: f64,
    m01: f64,
    m20: f64,
    m02: f64,
    m11: f64,
}

impl Moments {
    fn of_polygon(points: &[Point<i32>]) -> Self {
        let mut m = Moments::default();
        for (i, p) in points.iter().enumerate() {
            let q = points[(i + 1) % points.len()];
            let (x0, y0) = (f64::from(p.x), f64::from(p.y));
            let (x1, y1) = (f64::from(q.x), f64::from(q.y));
            let cross = x0 * y1 - x1 * y0;
            m.m00 += cross;
            m.m10 += (x0 + x1) * cross;
            m.m01 += (y0 + y1) * cross;
            m.m20 += (x0 * x0 + x0 * x1 + x1 * x1) * cross;
            m.m02 += (y0 * y0 + y0 * y1 + y1 * y1) * cross;
            m.m11 += (2.0 * x0 * y0 + x0 * y1 + x1 * y0 + 2.0 * x1 * y1) * cross;
        }
        m.m00 /= 2.0;
        m.m10 /= 6.0;
        m.m01 /= 6.0;
        m.m20 /= 12.0;
        m.m02 /= 12.0;
        m.m11 /= 24.0;
        m
    }
}

/// Contour area over hull area; 1 for convex shapes.
pub fn convexity(points: &[Point<i32>], area: f64) -> f64 {
    let hull_area = contour_area(&convex_hull(points));
    if hull_area <= f64::EPSILON {
        return 0.0;
    }
    (area / hull_area).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square(x: i32, y: i32, side: i32) -> Vec<Point<i32>> {
        vec![
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ]
    }

    #[test]
    fn square_moments() {
        let shape = ContourShape::measure(&square(10, 20, 4)).unwrap();
        assert_abs_diff_eq!(shape.area, 16.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shape.perimeter, 16.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shape.centroid.0, 12.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shape.centroid.1, 22.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shape.inertia_ratio, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shape.circularity(), PI / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn orientation_does_not_change_measurements() {
        let mut clockwise = square(0, 0, 6);
        clockwise.reverse();
        let a = ContourShape::measure(&square(0, 0, 6)).unwrap();
        let b = ContourShape::measure(&clockwise).unwrap();
        assert_abs_diff_eq!(a.area, b.area, epsilon = 1e-9);
        assert_abs_diff_eq!(a.centroid.0, b.centroid.0, epsilon = 1e-9);
        assert_abs_diff_eq!(a.centroid.1, b.centroid.1, epsilon = 1e-9);
    }

    #[test]
    fn elongated_rectangle_has_low_inertia_ratio() {
        let rect = vec![
            Point::new(0, 0),
            Point::new(20, 0),
            Point::new(20, 2),
            Point::new(0, 2),
        ];
        let shape = ContourShape::measure(&rect).unwrap();
        assert_abs_diff_eq!(shape.inertia_ratio, 0.01, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_contours_are_rejected() {
        assert!(ContourShape::measure(&[]).is_none());
        assert!(ContourShape::measure(&[Point::new(3, 3)]).is_none());
        let line = vec![Point::new(0, 0), Point::new(5, 0), Point::new(9, 0)];
        assert!(ContourShape::measure(&line).is_none());
        let spike = vec![Point::new(0, 0), Point::new(4, 4), Point::new(0, 0)];
        assert!(ContourShape::measure(&spike).is_none());
    }

    #[test]
    fn hull_of_notched_shape() {
        // 4x4 square with a 2x2 corner cut out.
        let l_shape = vec![
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 2),
            Point::new(2, 2),
            Point::new(2, 4),
            Point::new(0, 4),
        ];
        let hull = convex_hull(l_shape.as_slice());
        assert!(!hull.contains(&Point::new(2, 2)));
        assert_abs_diff_eq!(contour_area(&hull), 14.0, epsilon = 1e-9);
        assert_abs_diff_eq!(convexity(&l_shape, 12.0), 12.0 / 14.0, epsilon = 1e-9);
        assert_abs_diff_eq!(convexity(&square(0, 0, 3), 9.0), 1.0, epsilon = 1e-9);
    }
}
