use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::RigConfig;

/// Process-wide mutable rig settings.
///
/// One logical writer (the command interface) and any number of readers (consumer loop,
/// capture loop). Fields are independent atomics: exposure and gain may be observed
/// updated one after the other, but a single field is never read half-written.
#[derive(Debug)]
pub struct Settings {
    detection_enabled: AtomicBool,
    threshold: AtomicU8,
    exposure: AtomicU32,
    gain: AtomicU32,
}

impl Settings {
    pub fn new(detection_enabled: bool, threshold: u8, exposure: u32, gain: u32) -> Self {
        Self {
            detection_enabled: AtomicBool::new(detection_enabled),
            threshold: AtomicU8::new(threshold),
            exposure: AtomicU32::new(exposure),
            gain: AtomicU32::new(gain),
        }
    }

    pub fn from_config(cfg: &RigConfig) -> Self {
        Self::new(
            cfg.detection.enabled,
            cfg.detection.threshold,
            cfg.capture.exposure,
            cfg.capture.gain,
        )
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Acquire)
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::Release);
    }

    pub fn threshold(&self) -> u8 {
        self.threshold.load(Ordering::Acquire)
    }

    pub fn set_threshold(&self, threshold: u8) {
        self.threshold.store(threshold, Ordering::Release);
    }

    pub fn exposure(&self) -> u32 {
        self.exposure.load(Ordering::Acquire)
    }

    pub fn gain(&self) -> u32 {
        self.gain.load(Ordering::Acquire)
    }

    /// Current (exposure, gain) pair. The two loads are not one transaction.
    pub fn exposure_gain(&self) -> (u32, u32) {
        (self.exposure(), self.gain())
    }

    pub fn set_exposure_gain(&self, exposure: u32, gain: u32) {
        self.exposure.store(exposure, Ordering::Release);
        self.gain.store(gain, Ordering::Release);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&RigConfig::default())
    }
}
