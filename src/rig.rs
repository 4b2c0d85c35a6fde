//! The rig context: every long-lived component, constructed once in a fixed order and
//! shared by reference with the command interface and the consumer loop.

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::annotate::annotate;
use crate::calibration::{load_camera_parameters, CameraParameters};
use crate::capture::{CaptureSession, CaptureStats};
use crate::config::RigConfig;
use crate::detect::{DetectedMarker, Detection, MarkerDetector};
use crate::frame::FrameBuffer;
use crate::ingest::open_driver;
use crate::matcher::{CorrespondenceMatcher, MarkerSet};
use crate::pipeline::{stitch_horizontal, CameraFrame, ProcessingPipeline};
use crate::settings::Settings;

/// A marker with the ID it is displayed under this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LabeledMarker {
    pub id: usize,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct CameraReport {
    pub camera: usize,
    pub markers: Vec<LabeledMarker>,
}

/// Output of one consumer cycle.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub camera_count: usize,
    pub detection_enabled: bool,
    pub threshold: u8,
    pub cameras: Vec<CameraReport>,
    pub matcher_initialized: bool,
    pub matches: Vec<(usize, usize)>,
    /// Annotated per-camera frames.
    #[serde(skip)]
    pub frames: Vec<RgbImage>,
    /// Detection masks, present when detection ran.
    #[serde(skip)]
    pub masks: Vec<GrayImage>,
    /// Annotated frames side by side.
    #[serde(skip)]
    pub stitched: Option<RgbImage>,
}

impl CycleReport {
    pub fn marker_count(&self) -> usize {
        self.cameras.iter().map(|c| c.markers.len()).sum()
    }
}

pub struct Rig {
    config: RigConfig,
    settings: Arc<Settings>,
    buffer: Arc<FrameBuffer>,
    pipeline: ProcessingPipeline,
    detector: MarkerDetector,
    matcher: Mutex<CorrespondenceMatcher>,
    capture: Mutex<Option<CaptureSession>>,
    camera_count: AtomicUsize,
    cycles: AtomicU64,
}

impl Rig {
    /// Load calibration and build every component. Capture is not started.
    pub fn new(config: RigConfig) -> Self {
        let params = load_camera_parameters(&config.calibration_path);
        Self::with_calibration(config, params)
    }

    pub fn with_calibration(config: RigConfig, params: Vec<CameraParameters>) -> Self {
        let settings = Arc::new(Settings::from_config(&config));
        let pipeline =
            ProcessingPipeline::new(config.capture.width, config.capture.height, params);
        let detector = MarkerDetector::from_config(&config.detection);
        let matcher = Mutex::new(CorrespondenceMatcher::new(&config.matcher));
        log::info!(
            "rig ready: source={} {}x{} detector={:?}",
            config.capture.source,
            config.capture.width,
            config.capture.height,
            detector.strategies()
        );
        Self {
            config,
            settings,
            buffer: Arc::new(FrameBuffer::new()),
            pipeline,
            detector,
            matcher,
            capture: Mutex::new(None),
            camera_count: AtomicUsize::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn camera_count(&self) -> usize {
        self.camera_count.load(Ordering::SeqCst)
    }

    fn capture_slot(&self) -> Result<MutexGuard<'_, Option<CaptureSession>>> {
        self.capture
            .lock()
            .map_err(|_| anyhow!("capture session lock poisoned"))
    }

    fn matcher(&self) -> Result<MutexGuard<'_, CorrespondenceMatcher>> {
        self.matcher
            .lock()
            .map_err(|_| anyhow!("matcher lock poisoned"))
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Open and start the configured driver and spawn the capture loop.
    ///
    /// Returns the camera count; 0 means no camera was found and the rig stays idle until
    /// the next explicit `start_capture`. A session that already runs is left alone.
    pub fn start_capture(&self) -> Result<usize> {
        let mut slot = self.capture_slot()?;
        if let Some(session) = slot.take() {
            if session.is_running() {
                *slot = Some(session);
                log::info!("capture already running");
                return Ok(self.camera_count());
            }
            log::warn!("previous capture session ended on a fault; releasing it");
            if let Err(err) = session.stop() {
                log::warn!("releasing faulted session failed: {:#}", err);
            }
        }
        self.buffer.clear()?;
        self.camera_count.store(0, Ordering::SeqCst);

        let cfg = &self.config.capture;
        let mut driver = open_driver(&cfg.source)?;
        let info = match driver.start(cfg) {
            Ok(info) => info,
            Err(err) => {
                log::error!("{} driver failed to start: {:#}; rig idle", driver.name(), err);
                log::debug!("releasing {} driver after failed start", driver.name());
                return Ok(0);
            }
        };
        if info.camera_count == 0 {
            log::warn!("no cameras found on {}; rig idle", cfg.source);
            log::debug!("releasing {} driver with no cameras", driver.name());
            return Ok(0);
        }
        if (info.width, info.height) != (cfg.width, cfg.height) {
            log::warn!(
                "driver delivers {}x{}, output is {}x{}; frames will be letterboxed",
                info.width,
                info.height,
                cfg.width,
                cfg.height
            );
        }

        let session = CaptureSession::spawn(
            driver,
            self.settings.clone(),
            self.buffer.clone(),
            cfg.yield_interval,
        )?;
        *slot = Some(session);
        self.camera_count.store(info.camera_count, Ordering::SeqCst);
        log::info!(
            "capture started: {} camera(s) at {}x{} {} fps",
            info.camera_count,
            info.width,
            info.height,
            cfg.fps
        );
        Ok(info.camera_count)
    }

    /// Stop the capture loop, join it, then release the driver. The rig becomes idle.
    pub fn stop_capture(&self) -> Result<()> {
        let session = self.capture_slot()?.take();
        self.camera_count.store(0, Ordering::SeqCst);
        let result = match session {
            Some(session) => session.stop(),
            None => {
                log::debug!("stop requested with no capture session");
                Ok(())
            }
        };
        self.buffer.clear()?;
        result
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_slot()
            .map(|slot| slot.as_ref().is_some_and(|s| s.is_running()))
            .unwrap_or(false)
    }

    pub fn capture_stats(&self) -> Option<Arc<CaptureStats>> {
        self.capture_slot()
            .ok()
            .and_then(|slot| slot.as_ref().map(|s| s.stats()))
    }

    pub fn set_threshold(&self, threshold: u8) {
        log::info!("threshold set to {}", threshold);
        self.settings.set_threshold(threshold);
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        log::info!("detection {}", if enabled { "enabled" } else { "disabled" });
        self.settings.set_detection_enabled(enabled);
    }

    /// Picked up by the capture loop on its next iteration.
    pub fn set_exposure_gain(&self, exposure: u32, gain: u32) {
        self.settings.set_exposure_gain(exposure, gain);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// One processed frame per camera, or `None` when no data has arrived (including the
    /// idle rig after a failed start).
    pub fn processed_frames(&self) -> Result<Option<Vec<RgbImage>>> {
        Ok(self.camera_frames()?.map(|frames| {
            frames.into_iter().map(CameraFrame::into_image).collect()
        }))
    }

    fn camera_frames(&self) -> Result<Option<Vec<CameraFrame>>> {
        let count = self.camera_count();
        if count == 0 {
            return Ok(None);
        }
        let snapshot = self.buffer.snapshot()?;
        if snapshot.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.pipeline.process_cameras(&snapshot, count)))
    }

    /// Run the configured detector at `threshold`.
    pub fn detect_markers(&self, frame: &RgbImage, threshold: u8) -> Result<Detection> {
        self.detector.detect(frame, threshold)
    }

    pub fn is_initialized(&self) -> bool {
        self.matcher().map(|m| m.is_initialized()).unwrap_or(false)
    }

    pub fn matches(&self) -> Vec<(usize, usize)> {
        self.matcher().map(|m| m.matches()).unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Consumer cycle
    // ------------------------------------------------------------------------

    /// Snapshot, process, detect, match once, label and annotate. `None` when there is no
    /// frame data yet.
    pub fn run_cycle(&self) -> Result<Option<CycleReport>> {
        let Some(camera_frames) = self.camera_frames()? else {
            return Ok(None);
        };
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let detection_enabled = self.settings.detection_enabled();
        let threshold = self.settings.threshold();

        let mut marker_set = MarkerSet::new();
        let mut masks = Vec::new();
        if detection_enabled {
            for (camera, frame) in camera_frames.iter().enumerate() {
                let (width, height) = frame.image().dimensions();
                if frame.is_placeholder() {
                    // No-signal frames carry no scene content to detect in.
                    marker_set.insert(camera, Vec::new());
                    masks.push(GrayImage::new(width, height));
                    continue;
                }
                match self.detector.detect(frame.image(), threshold) {
                    Ok(detection) => {
                        marker_set.insert(camera, detection.markers);
                        masks.push(detection.mask);
                    }
                    Err(err) => {
                        log::warn!("camera {}: detection failed: {:#}", camera, err);
                        marker_set.insert(camera, Vec::new());
                        masks.push(GrayImage::new(width, height));
                    }
                }
            }
        }
        let mut frames: Vec<RgbImage> = camera_frames
            .into_iter()
            .map(CameraFrame::into_image)
            .collect();

        let (cameras, matcher_initialized, matches) = {
            let mut matcher = self.matcher()?;
            if detection_enabled {
                matcher.try_initialize(&marker_set);
            }
            let initialized = matcher.is_initialized();
            let cameras: Vec<CameraReport> = marker_set
                .iter()
                .map(|(&camera, markers)| CameraReport {
                    camera,
                    markers: label(&matcher, camera, markers),
                })
                .collect();
            (cameras, initialized, matcher.matches())
        };

        for report in &cameras {
            if let Some(frame) = frames.get_mut(report.camera) {
                let markers: Vec<DetectedMarker> = report
                    .markers
                    .iter()
                    .map(|m| DetectedMarker::new(m.x, m.y, m.size))
                    .collect();
                let ids: Vec<usize> = report.markers.iter().map(|m| m.id).collect();
                annotate(frame, &markers, matcher_initialized.then_some(ids.as_slice()));
            }
        }
        let stitched = match stitch_horizontal(&frames) {
            Ok(stitched) => Some(stitched),
            Err(err) => {
                log::warn!("stitching failed: {:#}", err);
                None
            }
        };

        Ok(Some(CycleReport {
            cycle,
            camera_count: frames.len(),
            detection_enabled,
            threshold,
            cameras,
            matcher_initialized,
            matches,
            frames,
            masks,
            stitched,
        }))
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        if let Ok(slot) = self.capture.get_mut() {
            if let Some(session) = slot.take() {
                if let Err(err) = session.stop() {
                    log::warn!("capture release on shutdown failed: {:#}", err);
                }
            }
        }
    }
}

fn label(
    matcher: &CorrespondenceMatcher,
    camera: usize,
    markers: &[DetectedMarker],
) -> Vec<LabeledMarker> {
    markers
        .iter()
        .enumerate()
        .map(|(index, m)| LabeledMarker {
            id: matcher.label_for(camera, index),
            x: m.x,
            y: m.y,
            size: m.size,
        })
        .collect()
}
