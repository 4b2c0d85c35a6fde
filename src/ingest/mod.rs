//! Capture drivers.
//!
//! A driver owns the physical (or synthetic) cameras and delivers one frame per camera on
//! each `read`. Drivers are selected by URL scheme:
//! - `stub://N[?fail_after=K]` synthetic rig (testing, demos)
//! - `v4l2:///dev/video0,/dev/video2` local V4L2 devices (feature: ingest-v4l2)
//!
//! Only the capture context calls driver methods once `start` has succeeded; the driver is
//! moved into the capture thread and handed back for `stop` after the thread is joined.

use anyhow::{anyhow, Result};

use crate::config::CaptureConfig;
use crate::frame::RawFrame;

mod stub;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use stub::{StubConfig, StubDriver};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Driver;

/// What a started driver reports about its cameras.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverInfo {
    pub camera_count: usize,
    pub width: u32,
    pub height: u32,
}

/// Hardware abstraction for a multi-camera rig.
pub trait CaptureDriver: Send {
    /// Driver identifier for logs.
    fn name(&self) -> &str;

    /// Open the cameras with the requested mode. Zero cameras is reported as `camera_count: 0`.
    fn start(&mut self, cfg: &CaptureConfig) -> Result<DriverInfo>;

    /// Read the next frame from every camera. May block briefly.
    fn read(&mut self) -> Result<Vec<RawFrame>>;

    /// Apply exposure and gain to every camera.
    fn set_exposure_gain(&mut self, exposure: u32, gain: u32) -> Result<()>;

    /// Release the cameras. Called once, after the capture loop has exited.
    fn stop(&mut self) -> Result<()>;
}

/// Construct the driver named by `source`. The driver is not started.
pub fn open_driver(source: &str) -> Result<Box<dyn CaptureDriver>> {
    if source.starts_with("stub://") {
        return Ok(Box::new(StubDriver::new(StubConfig::parse(source)?)));
    }
    if let Some(devices) = source.strip_prefix("v4l2://") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Driver::new(split_devices(devices))));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            let _ = devices;
            return Err(anyhow!("v4l2 capture requires the ingest-v4l2 feature"));
        }
    }
    Err(anyhow!("unsupported capture source '{}'", source))
}

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
fn split_devices(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_source_opens_stub_driver() {
        let driver = open_driver("stub://3").unwrap();
        assert_eq!(driver.name(), "stub");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(open_driver("rtsp://camera").is_err());
    }

    #[test]
    fn device_list_is_split_on_commas() {
        assert_eq!(
            split_devices("/dev/video0, /dev/video2,"),
            vec!["/dev/video0".to_string(), "/dev/video2".to_string()]
        );
    }
}
