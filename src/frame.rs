//! Raw frame container and the latest-wins frame store.
//!
//! - `RawFrame`: one camera's pixel buffer as delivered by a capture driver.
//! - `FrameBuffer`: thread-safe store holding exactly one frame per camera index.
//!
//! The capture context owns each `RawFrame` until it is handed to `FrameBuffer::put`.
//! Readers only ever receive copies (`FrameBuffer::snapshot`), so no two threads alias
//! the same pixel buffer.

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// Channel layout of a raw frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// A single camera frame exactly as the driver produced it.
///
/// The byte length is not validated at construction: drivers may hand over short or
/// oversized buffers, and the processing pipeline treats those as malformed.
#[derive(Clone, Debug)]
pub struct RawFrame {
    data: Vec<u8>,
    pub camera_index: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonic capture instant (for staleness reporting).
    captured_at: Instant,
}

impl RawFrame {
    pub fn new(
        camera_index: usize,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            data,
            camera_index,
            width,
            height,
            format,
            captured_at: Instant::now(),
        }
    }

    pub fn from_rgb(camera_index: usize, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(camera_index, image.into_raw(), width, height, PixelFormat::Rgb8)
    }

    pub fn from_gray(camera_index: usize, image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(camera_index, image.into_raw(), width, height, PixelFormat::Gray8)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }

    /// True when the buffer length matches width * height * channels.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.byte_len() == self.expected_len()
    }

    pub fn age_millis(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Convert to an RGB image, swapping or expanding channels as needed.
    pub fn to_rgb(&self) -> Result<RgbImage> {
        if !self.is_well_formed() {
            return Err(anyhow!(
                "camera {} frame malformed: {} bytes for {}x{} {:?}",
                self.camera_index,
                self.byte_len(),
                self.width,
                self.height,
                self.format
            ));
        }
        let rgb = match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("camera {} frame buffer size mismatch", self.camera_index))
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: latest-wins store
// ----------------------------------------------------------------------------

/// Latest-frame-per-camera store shared between the capture and consumer contexts.
///
/// - `put` overwrites whatever was stored for that camera; there is no queue.
/// - `snapshot` copies the whole mapping under one lock acquisition, so the caller sees a
///   single consistent instant and can mutate its copy freely.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slots: Mutex<BTreeMap<usize, RawFrame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the latest for `camera_index`, dropping the previous one.
    pub fn put(&self, camera_index: usize, frame: RawFrame) -> Result<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        slots.insert(camera_index, frame);
        Ok(())
    }

    /// Store every frame of one driver read. Frames are keyed by their camera index.
    pub fn put_all(&self, frames: Vec<RawFrame>) -> Result<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        for frame in frames {
            slots.insert(frame.camera_index, frame);
        }
        Ok(())
    }

    /// Independent copy of the current mapping. Empty when nothing was ever stored.
    pub fn snapshot(&self) -> Result<BTreeMap<usize, RawFrame>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        Ok(slots.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored frame (used when a capture session restarts).
    pub fn clear(&self) -> Result<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        slots.clear();
        Ok(())
    }

    /// Memory usage estimate.
    pub fn memory_bytes(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().map(|f| f.byte_len()).sum())
            .unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_test_frame(camera_index: usize, fill: u8) -> RawFrame {
        RawFrame::new(camera_index, vec![fill; 4 * 3 * 3], 4, 3, PixelFormat::Rgb8)
    }

    #[test]
    fn snapshot_of_empty_buffer_is_empty() {
        let buf = FrameBuffer::new();
        assert!(buf.snapshot().unwrap().is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn put_overwrites_previous_frame() {
        let buf = FrameBuffer::new();
        buf.put(0, make_test_frame(0, 1)).unwrap();
        buf.put(0, make_test_frame(0, 2)).unwrap();

        let snap = buf.snapshot().unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap[&0].data().iter().all(|&b| b == 2));
    }

    #[test]
    fn snapshot_is_isolated_from_later_puts_and_mutation() {
        let buf = FrameBuffer::new();
        buf.put(0, make_test_frame(0, 10)).unwrap();
        buf.put(1, make_test_frame(1, 20)).unwrap();

        let mut first = buf.snapshot().unwrap();
        buf.put(0, make_test_frame(0, 99)).unwrap();
        assert!(first[&0].data().iter().all(|&b| b == 10));

        first.remove(&1);
        first.insert(0, make_test_frame(0, 55));
        let second = buf.snapshot().unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[&0].data().iter().all(|&b| b == 99));
        assert!(second[&1].data().iter().all(|&b| b == 20));
    }

    #[test]
    fn concurrent_writer_and_reader_see_whole_frames() {
        let buf = Arc::new(FrameBuffer::new());
        let writer = {
            let buf = buf.clone();
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    buf.put(0, make_test_frame(0, (i % 251) as u8)).unwrap();
                }
            })
        };
        for _ in 0..500 {
            if let Some(frame) = buf.snapshot().unwrap().get(&0) {
                let first = frame.data()[0];
                assert!(frame.data().iter().all(|&b| b == first));
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn bgr_and_gray_frames_normalize_to_rgb() {
        let bgr = RawFrame::new(0, vec![1, 2, 3], 1, 1, PixelFormat::Bgr8);
        assert_eq!(bgr.to_rgb().unwrap().get_pixel(0, 0).0, [3, 2, 1]);

        let gray = RawFrame::new(0, vec![7], 1, 1, PixelFormat::Gray8);
        assert_eq!(gray.to_rgb().unwrap().get_pixel(0, 0).0, [7, 7, 7]);
    }

    #[test]
    fn short_buffer_is_malformed() {
        let frame = RawFrame::new(2, vec![0; 5], 4, 4, PixelFormat::Rgb8);
        assert!(!frame.is_well_formed());
        assert!(frame.to_rgb().is_err());
    }
}
