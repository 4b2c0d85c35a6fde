//! V4L2 rig driver.
//!
//! Opens one V4L2 device node per camera (e.g. `/dev/video0,/dev/video2`), negotiates a
//! packed 8-bit format at the requested resolution and frame rate, and reads one frame per
//! device on each `read`. Camera indices follow the order of the device list.

use anyhow::{anyhow, bail, Context, Result};
use ouroboros::self_referencing;

use super::{CaptureDriver, DriverInfo};
use crate::config::CaptureConfig;
use crate::frame::{PixelFormat, RawFrame};

const V4L2_CID_EXPOSURE: u32 = 0x0098_0911;
const V4L2_CID_GAIN: u32 = 0x0098_0913;
const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Driver {
    devices: Vec<String>,
    cameras: Vec<DeviceCamera>,
}

struct DeviceCamera {
    path: String,
    state: DeviceState,
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Driver {
    pub fn new(devices: Vec<String>) -> Self {
        Self {
            devices,
            cameras: Vec::new(),
        }
    }

    fn open_camera(path: &str, cfg: &CaptureConfig) -> Result<DeviceCamera> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = cfg.width;
        format.height = cfg.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Driver: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb8
        } else if format.fourcc == v4l::FourCC::new(b"BGR3") {
            PixelFormat::Bgr8
        } else if format.fourcc == v4l::FourCC::new(b"GREY") {
            PixelFormat::Gray8
        } else {
            bail!("v4l2 device {} negotiated unsupported format {}", path, format.fourcc);
        };

        let params = v4l::video::capture::Parameters::with_fps(cfg.fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2Driver: failed to set fps on {}: {}", path, err);
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        Ok(DeviceCamera {
            path: path.to_string(),
            state,
            width: format.width,
            height: format.height,
            format: pixel_format,
        })
    }

    fn apply_control(camera: &DeviceCamera, id: u32, value: u32) -> Result<()> {
        let control = v4l::control::Control {
            id,
            value: v4l::control::Value::Integer(i64::from(value)),
        };
        camera
            .state
            .borrow_device()
            .set_control(control)
            .with_context(|| format!("set control {:#x} on {}", id, camera.path))
    }
}

impl CaptureDriver for V4l2Driver {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn start(&mut self, cfg: &CaptureConfig) -> Result<DriverInfo> {
        self.cameras.clear();
        for path in &self.devices {
            match Self::open_camera(path, cfg) {
                Ok(camera) => self.cameras.push(camera),
                Err(err) => log::error!("V4l2Driver: skipping {}: {:#}", path, err),
            }
        }
        let (width, height) = self
            .cameras
            .first()
            .map(|c| (c.width, c.height))
            .unwrap_or((cfg.width, cfg.height));
        if !self.cameras.is_empty() {
            self.set_exposure_gain(cfg.exposure, cfg.gain)?;
        }
        log::info!(
            "V4l2Driver: started {} of {} device(s) at {}x{}",
            self.cameras.len(),
            self.devices.len(),
            width,
            height
        );
        Ok(DriverInfo {
            camera_count: self.cameras.len(),
            width,
            height,
        })
    }

    fn read(&mut self) -> Result<Vec<RawFrame>> {
        use v4l::io::traits::CaptureStream;

        if self.cameras.is_empty() {
            bail!("v4l2 driver not started");
        }
        let mut frames = Vec::with_capacity(self.cameras.len());
        for (index, camera) in self.cameras.iter_mut().enumerate() {
            let (width, height, format) = (camera.width, camera.height, camera.format);
            let data = camera
                .state
                .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
                .map_err(|err| {
                    anyhow::Error::new(err).context(format!("capture v4l2 frame {}", camera.path))
                })?;
            frames.push(RawFrame::new(index, data, width, height, format));
        }
        Ok(frames)
    }

    fn set_exposure_gain(&mut self, exposure: u32, gain: u32) -> Result<()> {
        for camera in &self.cameras {
            Self::apply_control(camera, V4L2_CID_EXPOSURE, exposure)?;
            Self::apply_control(camera, V4L2_CID_GAIN, gain)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("v4l2 driver stopped twice or never started"));
        }
        // Dropping the stream unmaps the buffers before the device fd closes.
        let released = self.cameras.len();
        self.cameras.clear();
        log::info!("V4l2Driver: released {} device(s)", released);
        Ok(())
    }
}
