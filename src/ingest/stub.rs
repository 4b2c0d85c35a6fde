//! Synthetic rig driver (`stub://`).
//!
//! Renders each camera as a dark frame with sensor noise and a rigid marker pattern: two
//! horizontal rows of six bright discs. Camera `i` sees the pattern shifted right by a few
//! pixels per index so views differ but keep the same row/column ordering.
//!
//! URL forms:
//! - `stub://` two cameras
//! - `stub://4` four cameras
//! - `stub://0` a rig where no camera is found
//! - `stub://2?fail_after=10` reads fail after ten successful reads

use anyhow::{anyhow, bail, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use rand::Rng;

use super::{CaptureDriver, DriverInfo};
use crate::config::CaptureConfig;
use crate::frame::RawFrame;

const DEFAULT_CAMERAS: usize = 2;
const MARKER_RADIUS: i32 = 4;
const NOISE_CEILING: u8 = 24;
const VIEW_SHIFT_PX: f32 = 6.0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubConfig {
    pub cameras: usize,
    /// Fail every read after this many successful reads.
    pub fail_after: Option<u64>,
}

impl StubConfig {
    pub fn parse(source: &str) -> Result<Self> {
        let rest = source
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("stub source must start with stub://"))?;
        let (count, query) = match rest.split_once('?') {
            Some((count, query)) => (count, Some(query)),
            None => (rest, None),
        };
        let cameras = if count.trim().is_empty() {
            DEFAULT_CAMERAS
        } else {
            count
                .trim()
                .parse()
                .map_err(|_| anyhow!("stub camera count '{}' is not an integer", count))?
        };
        let mut fail_after = None;
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("fail_after", value)) => {
                    fail_after = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("fail_after '{}' is not an integer", value))?,
                    );
                }
                _ => bail!("unknown stub option '{}'", pair),
            }
        }
        Ok(Self {
            cameras,
            fail_after,
        })
    }
}

pub struct StubDriver {
    config: StubConfig,
    mode: Option<(u32, u32)>,
    reads: u64,
    exposure: u32,
    gain: u32,
}

impl StubDriver {
    pub fn new(config: StubConfig) -> Self {
        Self {
            config,
            mode: None,
            reads: 0,
            exposure: 0,
            gain: 0,
        }
    }

    /// Ground-truth marker centers for camera `index` at `width` x `height`.
    pub fn pattern_centers(index: usize, width: u32, height: u32) -> Vec<(f32, f32)> {
        let (w, h) = (width as f32, height as f32);
        let shift = VIEW_SHIFT_PX * index as f32;
        [0.35f32, 0.65]
            .iter()
            .flat_map(|row| {
                (0..6).map(move |col| ((0.2 + 0.12 * col as f32) * w + shift, row * h))
            })
            .map(|(x, y)| (x.round(), y.round()))
            .collect()
    }

    fn render(&self, index: usize, width: u32, height: u32) -> RgbImage {
        let mut rng = rand::thread_rng();
        let mut img = RgbImage::from_fn(width, height, |_, _| {
            let v = rng.gen_range(0..NOISE_CEILING);
            Rgb([v, v, v])
        });
        for (x, y) in Self::pattern_centers(index, width, height) {
            draw_filled_circle_mut(
                &mut img,
                (x as i32, y as i32),
                MARKER_RADIUS,
                Rgb([255, 255, 255]),
            );
        }
        img
    }
}

impl CaptureDriver for StubDriver {
    fn name(&self) -> &str {
        "stub"
    }

    fn start(&mut self, cfg: &CaptureConfig) -> Result<DriverInfo> {
        self.exposure = cfg.exposure;
        self.gain = cfg.gain;
        self.reads = 0;
        if self.config.cameras == 0 {
            self.mode = None;
            log::warn!("StubDriver: no cameras detected");
            return Ok(DriverInfo {
                camera_count: 0,
                width: cfg.width,
                height: cfg.height,
            });
        }
        self.mode = Some((cfg.width, cfg.height));
        log::info!(
            "StubDriver: started {} camera(s) at {}x{} {} fps (synthetic)",
            self.config.cameras,
            cfg.width,
            cfg.height,
            cfg.fps
        );
        Ok(DriverInfo {
            camera_count: self.config.cameras,
            width: cfg.width,
            height: cfg.height,
        })
    }

    fn read(&mut self) -> Result<Vec<RawFrame>> {
        let (width, height) = self.mode.ok_or_else(|| anyhow!("stub driver not started"))?;
        if let Some(limit) = self.config.fail_after {
            if self.reads >= limit {
                bail!("stub camera read failed after {} frames", limit);
            }
        }
        self.reads += 1;
        Ok((0..self.config.cameras)
            .map(|index| RawFrame::from_rgb(index, self.render(index, width, height)))
            .collect())
    }

    fn set_exposure_gain(&mut self, exposure: u32, gain: u32) -> Result<()> {
        self.exposure = exposure;
        self.gain = gain;
        log::debug!("StubDriver: exposure={} gain={}", exposure, gain);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.mode.take().is_none() {
            bail!("stub driver stopped twice or never started");
        }
        log::info!("StubDriver: released after {} reads", self.reads);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_count_and_failure_option() {
        assert_eq!(
            StubConfig::parse("stub://").unwrap(),
            StubConfig {
                cameras: 2,
                fail_after: None
            }
        );
        assert_eq!(
            StubConfig::parse("stub://3?fail_after=7").unwrap(),
            StubConfig {
                cameras: 3,
                fail_after: Some(7)
            }
        );
        assert!(StubConfig::parse("stub://x").is_err());
        assert!(StubConfig::parse("stub://2?bogus=1").is_err());
    }

    #[test]
    fn reads_one_frame_per_camera() -> Result<()> {
        let mut driver = StubDriver::new(StubConfig::parse("stub://3")?);
        let info = driver.start(&CaptureConfig::default())?;
        assert_eq!(info.camera_count, 3);

        let frames = driver.read()?;
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.camera_index, i);
            assert_eq!((frame.width, frame.height), (320, 240));
            assert!(frame.is_well_formed());
        }
        driver.stop()
    }

    #[test]
    fn fails_after_configured_reads() -> Result<()> {
        let mut driver = StubDriver::new(StubConfig::parse("stub://1?fail_after=2")?);
        driver.start(&CaptureConfig::default())?;
        driver.read()?;
        driver.read()?;
        assert!(driver.read().is_err());
        Ok(())
    }

    #[test]
    fn zero_camera_rig_reports_nothing_found() -> Result<()> {
        let mut driver = StubDriver::new(StubConfig::parse("stub://0")?);
        let info = driver.start(&CaptureConfig::default())?;
        assert_eq!(info.camera_count, 0);
        assert!(driver.read().is_err());
        Ok(())
    }

    #[test]
    fn double_stop_is_reported() -> Result<()> {
        let mut driver = StubDriver::new(StubConfig::parse("stub://1")?);
        driver.start(&CaptureConfig::default())?;
        driver.stop()?;
        assert!(driver.stop().is_err());
        Ok(())
    }
}
