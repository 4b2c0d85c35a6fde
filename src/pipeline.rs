//! Per-camera image processing.
//!
//! For every camera index the pipeline runs, in order:
//! 1. placeholder when the camera has no frame (or the frame is malformed)
//! 2. quarter-turn rotation correction
//! 3. lens undistortion
//! 4. 5x5 Gaussian blur followed by the 5x5 sharpen kernel
//! 5. channel normalization to RGB
//!
//! Every output frame has the configured resolution so the set can be stitched.

use anyhow::{anyhow, bail, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::calibration::CameraParameters;
use crate::frame::RawFrame;

/// Binomial 5x5 Gaussian, normalized by 256.
const BLUR_ROW: [i32; 5] = [1, 4, 6, 4, 1];
const BLUR_DIVISOR: i32 = 256;

/// Edge-emphasizing band-pass. Coefficients sum to 0 (inner 3x3 +20, outer ring -20), so
/// flat areas go to black and a bright disc keeps a saturated rim inside its edge.
const SHARPEN_KERNEL: [[i32; 5]; 5] = [
    [-2, -1, -1, -1, -2],
    [-1, 1, 3, 1, -1],
    [-1, 3, 4, 3, -1],
    [-1, 1, 3, 1, -1],
    [-2, -1, -1, -1, -2],
];

const PLACEHOLDER_BORDER: Rgb<u8> = Rgb([200, 0, 0]);
const PLACEHOLDER_CROSS: Rgb<u8> = Rgb([90, 0, 0]);
const PLACEHOLDER_TALLY: Rgb<u8> = Rgb([230, 230, 230]);

/// One camera's processed output for a cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CameraFrame {
    Live(RgbImage),
    /// "No signal" stand-in for a missing or malformed frame. Carries no scene content.
    Placeholder(RgbImage),
}

impl CameraFrame {
    pub fn image(&self) -> &RgbImage {
        match self {
            Self::Live(img) | Self::Placeholder(img) => img,
        }
    }

    pub fn into_image(self) -> RgbImage {
        match self {
            Self::Live(img) | Self::Placeholder(img) => img,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }
}

pub struct ProcessingPipeline {
    width: u32,
    height: u32,
    params: Vec<CameraParameters>,
    maps: Mutex<HashMap<(usize, u32, u32), Arc<UndistortMap>>>,
}

impl ProcessingPipeline {
    pub fn new(width: u32, height: u32, params: Vec<CameraParameters>) -> Self {
        Self {
            width,
            height,
            params,
            maps: Mutex::new(HashMap::new()),
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn camera_parameters(&self, camera_index: usize) -> Option<&CameraParameters> {
        self.params.get(camera_index)
    }

    /// Process one snapshot into exactly `camera_count` frames of the output resolution.
    pub fn process(
        &self,
        snapshot: &BTreeMap<usize, RawFrame>,
        camera_count: usize,
    ) -> Vec<RgbImage> {
        self.process_cameras(snapshot, camera_count)
            .into_iter()
            .map(CameraFrame::into_image)
            .collect()
    }

    /// Like [`process`](Self::process), but keeps track of which indices are placeholders.
    pub fn process_cameras(
        &self,
        snapshot: &BTreeMap<usize, RawFrame>,
        camera_count: usize,
    ) -> Vec<CameraFrame> {
        (0..camera_count)
            .map(|index| match snapshot.get(&index) {
                None => CameraFrame::Placeholder(placeholder(index, self.width, self.height)),
                Some(frame) => match self.process_camera(index, frame) {
                    Ok(img) => CameraFrame::Live(img),
                    Err(err) => {
                        log::warn!("camera {}: substituting placeholder: {:#}", index, err);
                        CameraFrame::Placeholder(placeholder(index, self.width, self.height))
                    }
                },
            })
            .collect()
    }

    fn process_camera(&self, index: usize, frame: &RawFrame) -> Result<RgbImage> {
        let mut img = frame.to_rgb()?;
        if let Some(params) = self.params.get(index) {
            img = rotate_quarter_turns(&img, params.quarter_turns());
            if !params.distortion.is_identity() {
                let map = self.undistort_map(index, params, img.width(), img.height())?;
                img = map.apply(&img);
            }
        }
        let img = sharpen(&gaussian_blur(&img));
        Ok(fit_to_canvas(&img, self.width, self.height))
    }

    fn undistort_map(
        &self,
        index: usize,
        params: &CameraParameters,
        width: u32,
        height: u32,
    ) -> Result<Arc<UndistortMap>> {
        let mut maps = self
            .maps
            .lock()
            .map_err(|_| anyhow!("undistort map cache lock poisoned"))?;
        if let Some(map) = maps.get(&(index, width, height)) {
            return Ok(map.clone());
        }
        let map = Arc::new(UndistortMap::build(params, width, height)?);
        log::debug!("camera {}: built undistort map {}x{}", index, width, height);
        maps.insert((index, width, height), map.clone());
        Ok(map)
    }
}

// ----------------------------------------------------------------------------
// Geometric correction
// ----------------------------------------------------------------------------

/// Rotate counter-clockwise by `quarter_turns` x 90 degrees.
pub fn rotate_quarter_turns(img: &RgbImage, quarter_turns: u8) -> RgbImage {
    match quarter_turns % 4 {
        1 => imageops::rotate270(img),
        2 => imageops::rotate180(img),
        3 => imageops::rotate90(img),
        _ => img.clone(),
    }
}

/// Source coordinate for every destination pixel of an undistorted image.
pub struct UndistortMap {
    width: u32,
    height: u32,
    coords: Vec<(f32, f32)>,
}

impl UndistortMap {
    /// The intrinsic matrix doubles as the new camera matrix.
    pub fn build(params: &CameraParameters, width: u32, height: u32) -> Result<Self> {
        let k = params.intrinsic;
        let k_inv = k
            .try_inverse()
            .ok_or_else(|| anyhow!("intrinsic matrix is singular"))?;
        let mut coords = Vec::with_capacity(width as usize * height as usize);
        for v in 0..height {
            for u in 0..width {
                let ray = k_inv * nalgebra::Vector3::new(u as f64, v as f64, 1.0);
                if ray.z.abs() < f64::EPSILON {
                    coords.push((-1.0, -1.0));
                    continue;
                }
                let [xd, yd] = params
                    .distortion
                    .distort_normalized([ray.x / ray.z, ray.y / ray.z]);
                let src = k * nalgebra::Vector3::new(xd, yd, 1.0);
                coords.push(((src.x / src.z) as f32, (src.y / src.z) as f32));
            }
        }
        Ok(Self {
            width,
            height,
            coords,
        })
    }

    /// Bilinear remap; samples outside the source are black.
    pub fn apply(&self, src: &RgbImage) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (i, &(sx, sy)) in self.coords.iter().enumerate() {
            let x = i as u32 % self.width;
            let y = i as u32 / self.width;
            out.put_pixel(x, y, sample_bilinear(src, sx, sy));
        }
        out
    }
}

fn sample_bilinear(src: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    const EDGE_SLACK: f32 = 1e-3;
    let (w, h) = src.dimensions();
    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);
    if !(x >= -EDGE_SLACK && y >= -EDGE_SLACK && x <= max_x + EDGE_SLACK && y <= max_y + EDGE_SLACK)
    {
        return Rgb([0, 0, 0]);
    }
    let (x, y) = (x.clamp(0.0, max_x), y.clamp(0.0, max_y));
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;
    let mut px = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        px[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(px)
}

// ----------------------------------------------------------------------------
// Filtering
// ----------------------------------------------------------------------------

pub fn gaussian_blur(img: &RgbImage) -> RgbImage {
    let mut kernel = [[0i32; 5]; 5];
    for (r, row) in kernel.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = BLUR_ROW[r] * BLUR_ROW[c];
        }
    }
    convolve5(img, &kernel, BLUR_DIVISOR)
}

pub fn sharpen(img: &RgbImage) -> RgbImage {
    convolve5(img, &SHARPEN_KERNEL, 1)
}

/// 5x5 correlation per channel with reflect-101 borders, rounding and saturation.
fn convolve5(img: &RgbImage, kernel: &[[i32; 5]; 5], divisor: i32) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0i32; 3];
            for (ky, row) in kernel.iter().enumerate() {
                let sy = reflect101(y as i64 + ky as i64 - 2, h);
                for (kx, &weight) in row.iter().enumerate() {
                    if weight == 0 {
                        continue;
                    }
                    let sx = reflect101(x as i64 + kx as i64 - 2, w);
                    let p = img.get_pixel(sx, sy).0;
                    for c in 0..3 {
                        acc[c] += weight * p[c] as i32;
                    }
                }
            }
            let px = acc.map(|sum| {
                let scaled = if divisor == 1 {
                    sum
                } else {
                    (sum + sum.signum() * divisor / 2) / divisor
                };
                scaled.clamp(0, 255) as u8
            });
            out.put_pixel(x, y, Rgb(px));
        }
    }
    out
}

/// Mirror an out-of-range index without repeating the edge pixel (`dcb|abcd|cba`).
fn reflect101(i: i64, n: u32) -> u32 {
    let n = n as i64;
    if n <= 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * (n - 1) - i;
        }
    }
    i as u32
}

// ----------------------------------------------------------------------------
// Output shaping
// ----------------------------------------------------------------------------

/// Scale to fit inside `width` x `height` and center on black. Same-size input is returned as is.
pub fn fit_to_canvas(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if (w, h) == (width, height) {
        return img.clone();
    }
    let mut canvas = RgbImage::new(width, height);
    if w == 0 || h == 0 {
        return canvas;
    }
    let scale = (width as f32 / w as f32).min(height as f32 / h as f32);
    let fit_w = ((w as f32 * scale).round() as u32).clamp(1, width);
    let fit_h = ((h as f32 * scale).round() as u32).clamp(1, height);
    let resized = imageops::resize(img, fit_w, fit_h, FilterType::Triangle);
    let x = i64::from((width - fit_w) / 2);
    let y = i64::from((height - fit_h) / 2);
    imageops::overlay(&mut canvas, &resized, x, y);
    canvas
}

/// "No signal" frame for camera `index`: red border, diagonal cross, `index + 1` tally bars.
pub fn placeholder(index: usize, width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    if width < 8 || height < 8 {
        return img;
    }
    let (wf, hf) = ((width - 1) as f32, (height - 1) as f32);
    draw_line_segment_mut(&mut img, (0.0, 0.0), (wf, hf), PLACEHOLDER_CROSS);
    draw_line_segment_mut(&mut img, (wf, 0.0), (0.0, hf), PLACEHOLDER_CROSS);
    for inset in 0..2i32 {
        let rect = Rect::at(inset, inset).of_size(width - 2 * inset as u32, height - 2 * inset as u32);
        draw_hollow_rect_mut(&mut img, rect, PLACEHOLDER_BORDER);
    }

    let bars = index as u32 + 1;
    let bar_w = 4u32;
    let pitch = 8u32;
    let bar_h = (height / 4).max(1);
    let total = bars * pitch - (pitch - bar_w);
    let start_x = width.saturating_sub(total) / 2;
    let y = (height - bar_h) / 2;
    for bar in 0..bars {
        let x = start_x + bar * pitch;
        if x + bar_w > width - 2 {
            break;
        }
        draw_filled_rect_mut(
            &mut img,
            Rect::at(x as i32, y as i32).of_size(bar_w, bar_h),
            PLACEHOLDER_TALLY,
        );
    }
    img
}

/// Concatenate frames left to right. Every frame must share the same height.
pub fn stitch_horizontal(frames: &[RgbImage]) -> Result<RgbImage> {
    let Some(first) = frames.first() else {
        bail!("nothing to stitch");
    };
    let height = first.height();
    if let Some(bad) = frames.iter().position(|f| f.height() != height) {
        bail!(
            "frame {} height {} does not match {}",
            bad,
            frames[bad].height(),
            height
        );
    }
    let width: u32 = frames.iter().map(|f| f.width()).sum();
    let mut out = RgbImage::new(width, height);
    let mut x = 0i64;
    for frame in frames {
        imageops::replace(&mut out, frame, x, 0);
        x += i64::from(frame.width());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Distortion;
    use crate::frame::PixelFormat;
    use nalgebra::Matrix3;

    fn uniform(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    fn disc(w: u32, h: u32, center: (i32, i32), radius: i32) -> RgbImage {
        let mut img = RgbImage::new(w, h);
        imageproc::drawing::draw_filled_circle_mut(&mut img, center, radius, Rgb([255, 255, 255]));
        img
    }

    #[test]
    fn empty_snapshot_yields_placeholders_of_output_size() {
        let pipeline = ProcessingPipeline::new(64, 48, Vec::new());
        let frames = pipeline.process(&BTreeMap::new(), 3);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(frame.dimensions(), (64, 48));
        }
        assert_ne!(frames[0], frames[2]);
    }

    #[test]
    fn malformed_frame_becomes_placeholder_without_affecting_others() {
        let pipeline = ProcessingPipeline::new(32, 24, Vec::new());
        let mut snapshot = BTreeMap::new();
        snapshot.insert(0, RawFrame::new(0, vec![0; 7], 32, 24, PixelFormat::Rgb8));
        snapshot.insert(1, RawFrame::from_rgb(1, uniform(32, 24, 10)));
        let frames = pipeline.process_cameras(&snapshot, 3);
        assert_eq!(frames[0], CameraFrame::Placeholder(placeholder(0, 32, 24)));
        assert!(!frames[1].is_placeholder());
        // Flat input carries no edges, so conditioning leaves it black.
        assert!(frames[1].image().pixels().all(|p| p.0 == [0, 0, 0]));
        assert!(frames[2].is_placeholder());
        assert_eq!(pipeline.process(&snapshot, 3)[2], placeholder(2, 32, 24));
    }

    #[test]
    fn sharpen_kernel_zeroes_flat_regions() {
        let sum: i32 = SHARPEN_KERNEL.iter().flatten().sum();
        assert_eq!(sum, 0);
        let out = sharpen(&gaussian_blur(&uniform(12, 12, 20)));
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
        let bright = sharpen(&uniform(6, 6, 250));
        assert!(bright.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn bright_disc_keeps_a_foreground_rim() {
        let out = sharpen(&gaussian_blur(&disc(64, 64, (32, 32), 6)));
        let row: Vec<u8> = (0..64).map(|x| out.get_pixel(x, 32).0[0]).collect();
        // The rim sits just inside the edge on both sides of the disc.
        assert!(row[20..32].iter().any(|&v| v >= 200));
        assert!(row[33..44].iter().any(|&v| v >= 200));
        assert_eq!(out.get_pixel(4, 4).0, [0, 0, 0]);

        let detection = crate::detect::detect_markers(&out, 200).unwrap();
        assert_eq!(detection.len(), 1);
        let marker = detection.markers[0];
        assert!((marker.x - 32.0).abs() <= 1.0 && (marker.y - 32.0).abs() <= 1.0);
    }

    #[test]
    fn blur_preserves_flat_image_and_spreads_a_point() {
        assert_eq!(gaussian_blur(&uniform(5, 5, 77)), uniform(5, 5, 77));
        let mut img = RgbImage::new(9, 9);
        img.put_pixel(4, 4, Rgb([255, 255, 255]));
        let blurred = gaussian_blur(&img);
        // 36/256 of the peak stays at the center.
        assert_eq!(blurred.get_pixel(4, 4).0[0], 36);
        assert!(blurred.get_pixel(3, 4).0[0] > blurred.get_pixel(2, 4).0[0]);
    }

    #[test]
    fn reflect101_mirrors_without_edge_repeat() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(3, 1), 0);
    }

    #[test]
    fn quarter_turn_is_counter_clockwise() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 0, Rgb([255, 0, 0]));
        let rotated = rotate_quarter_turns(&img, 1);
        assert_eq!(rotated.dimensions(), (2, 3));
        // Top-right corner moves to top-left.
        assert_eq!(rotated.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(rotate_quarter_turns(&img, 4), img);
    }

    #[test]
    fn rotated_frames_are_letterboxed_to_output_size() {
        let params = vec![CameraParameters::new(Matrix3::identity(), Distortion::default())
            .with_rotation_frames(1)];
        let pipeline = ProcessingPipeline::new(40, 20, params);
        let mut snapshot = BTreeMap::new();
        let input = disc(40, 20, (30, 10), 6);
        snapshot.insert(0, RawFrame::from_rgb(0, input.clone()));
        let frames = pipeline.process(&snapshot, 1);
        assert_eq!(frames[0].dimensions(), (40, 20));

        let rotated = rotate_quarter_turns(&input, 1);
        assert_eq!(rotated.dimensions(), (20, 40));
        let expected = fit_to_canvas(&sharpen(&gaussian_blur(&rotated)), 40, 20);
        assert_eq!(frames[0], expected);
        assert_ne!(frames[0], sharpen(&gaussian_blur(&input)));
    }

    #[test]
    fn fit_to_canvas_centers_on_black() {
        let fitted = fit_to_canvas(&uniform(20, 40, 30), 40, 20);
        assert_eq!(fitted.dimensions(), (40, 20));
        assert_eq!(fitted.get_pixel(0, 10).0, [0, 0, 0]);
        assert_eq!(fitted.get_pixel(20, 10).0, [30, 30, 30]);
        assert_eq!(fitted.get_pixel(39, 10).0, [0, 0, 0]);
    }

    #[test]
    fn undistort_map_without_distortion_is_identity() {
        let k = Matrix3::new(50.0, 0.0, 10.0, 0.0, 50.0, 8.0, 0.0, 0.0, 1.0);
        let params = CameraParameters::new(k, Distortion::default());
        let map = UndistortMap::build(&params, 20, 16).unwrap();
        let mut img = RgbImage::new(20, 16);
        img.put_pixel(3, 5, Rgb([9, 8, 7]));
        assert_eq!(map.apply(&img), img);
    }

    #[test]
    fn barrel_distortion_keeps_principal_point() {
        let k = Matrix3::new(40.0, 0.0, 16.0, 0.0, 40.0, 12.0, 0.0, 0.0, 1.0);
        let distortion = Distortion::from_coefficients(&[-0.3, 0.0, 0.0, 0.0]).unwrap();
        let params = CameraParameters::new(k, distortion);
        let map = UndistortMap::build(&params, 32, 24).unwrap();
        let mut img = RgbImage::new(32, 24);
        img.put_pixel(16, 12, Rgb([200, 200, 200]));
        let out = map.apply(&img);
        assert_eq!(out.get_pixel(16, 12).0, [200, 200, 200]);
    }

    #[test]
    fn placeholder_tally_counts_camera_index() {
        let count_bars = |img: &RgbImage| {
            let y = img.height() / 2;
            let mut bars = 0;
            let mut inside = false;
            for x in 0..img.width() {
                let lit = img.get_pixel(x, y).0 == PLACEHOLDER_TALLY.0;
                if lit && !inside {
                    bars += 1;
                }
                inside = lit;
            }
            bars
        };
        assert_eq!(count_bars(&placeholder(0, 160, 120)), 1);
        assert_eq!(count_bars(&placeholder(3, 160, 120)), 4);
        assert_eq!(placeholder(0, 160, 120).get_pixel(0, 60).0, PLACEHOLDER_BORDER.0);
    }

    #[test]
    fn stitch_requires_equal_heights() {
        let stitched = stitch_horizontal(&[uniform(4, 3, 1), uniform(5, 3, 2)]).unwrap();
        assert_eq!(stitched.dimensions(), (9, 3));
        assert_eq!(stitched.get_pixel(4, 0).0, [2, 2, 2]);
        assert!(stitch_horizontal(&[uniform(4, 3, 1), uniform(4, 2, 1)]).is_err());
        assert!(stitch_horizontal(&[]).is_err());
    }
}
