use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SOURCE: &str = "stub://2";
const DEFAULT_FPS: u32 = 90;
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_EXPOSURE: u32 = 100;
const DEFAULT_GAIN: u32 = 10;
const DEFAULT_YIELD_MS: u64 = 5;
const DEFAULT_CALIBRATION_PATH: &str = "config/camera-params.json";
const DEFAULT_THRESHOLD: u8 = 200;
const DEFAULT_MIN_AREA: f32 = 2.0;
const DEFAULT_MAX_AREA: f32 = 500.0;
const DEFAULT_MIN_CIRCULARITY: f32 = 0.5;
const DEFAULT_EXPECTED_MIN_MARKERS: usize = 6;
const DEFAULT_MIN_POINTS: usize = 8;
const DEFAULT_TOP_ROW_LEN: usize = 6;
const DEFAULT_CYCLE_HZ: u32 = 20;

#[derive(Debug, Deserialize, Default)]
struct RigConfigFile {
    calibration_path: Option<PathBuf>,
    cycle_hz: Option<u32>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    matcher: Option<MatcherConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    exposure: Option<u32>,
    gain: Option<u32>,
    yield_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    enabled: Option<bool>,
    threshold: Option<u8>,
    min_area: Option<f32>,
    max_area: Option<f32>,
    min_circularity: Option<f32>,
    expected_min_markers: Option<usize>,
    strict: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MatcherConfigFile {
    min_points: Option<usize>,
    top_row_len: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RigConfig {
    pub calibration_path: PathBuf,
    pub cycle_hz: u32,
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub matcher: MatcherConfig,
}

/// Parameters handed to `CaptureDriver::start`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Driver URL, e.g. `stub://2` or `v4l2:///dev/video0,/dev/video2`.
    pub source: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub exposure: u32,
    pub gain: u32,
    /// Sleep between driver reads in the capture loop.
    pub yield_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub enabled: bool,
    pub threshold: u8,
    pub min_area: f32,
    pub max_area: f32,
    pub min_circularity: f32,
    pub expected_min_markers: usize,
    /// Use the blob-first strategy chain instead of the plain contour detector.
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub min_points: usize,
    pub top_row_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_file(CaptureConfigFile::default())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self::from_file(DetectionConfigFile::default())
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::from_file(MatcherConfigFile::default())
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self::from_file(RigConfigFile::default())
    }
}

impl CaptureConfig {
    fn from_file(file: CaptureConfigFile) -> Self {
        Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            fps: file.fps.unwrap_or(DEFAULT_FPS),
            width: file.width.unwrap_or(DEFAULT_WIDTH),
            height: file.height.unwrap_or(DEFAULT_HEIGHT),
            exposure: file.exposure.unwrap_or(DEFAULT_EXPOSURE),
            gain: file.gain.unwrap_or(DEFAULT_GAIN),
            yield_interval: Duration::from_millis(file.yield_ms.unwrap_or(DEFAULT_YIELD_MS)),
        }
    }
}

impl DetectionConfig {
    fn from_file(file: DetectionConfigFile) -> Self {
        Self {
            enabled: file.enabled.unwrap_or(true),
            threshold: file.threshold.unwrap_or(DEFAULT_THRESHOLD),
            min_area: file.min_area.unwrap_or(DEFAULT_MIN_AREA),
            max_area: file.max_area.unwrap_or(DEFAULT_MAX_AREA),
            min_circularity: file.min_circularity.unwrap_or(DEFAULT_MIN_CIRCULARITY),
            expected_min_markers: file
                .expected_min_markers
                .unwrap_or(DEFAULT_EXPECTED_MIN_MARKERS),
            strict: file.strict.unwrap_or(false),
        }
    }
}

impl MatcherConfig {
    fn from_file(file: MatcherConfigFile) -> Self {
        Self {
            min_points: file.min_points.unwrap_or(DEFAULT_MIN_POINTS),
            top_row_len: file.top_row_len.unwrap_or(DEFAULT_TOP_ROW_LEN),
        }
    }
}

impl RigConfig {
    /// Load from `MOCAP_CONFIG` (TOML, optional), then apply `MOCAP_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOCAP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: RigConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RigConfigFile) -> Self {
        Self {
            calibration_path: file
                .calibration_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_PATH)),
            cycle_hz: file.cycle_hz.unwrap_or(DEFAULT_CYCLE_HZ),
            capture: CaptureConfig::from_file(file.capture.unwrap_or_default()),
            detection: DetectionConfig::from_file(file.detection.unwrap_or_default()),
            matcher: MatcherConfig::from_file(file.matcher.unwrap_or_default()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("MOCAP_SOURCE") {
            if !source.trim().is_empty() {
                self.capture.source = source;
            }
        }
        if let Ok(path) = std::env::var("MOCAP_CALIBRATION") {
            if !path.trim().is_empty() {
                self.calibration_path = PathBuf::from(path);
            }
        }
        if let Ok(threshold) = std::env::var("MOCAP_THRESHOLD") {
            self.detection.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOCAP_THRESHOLD must be an integer in 0..=255"))?;
        }
        if let Ok(exposure) = std::env::var("MOCAP_EXPOSURE") {
            self.capture.exposure = exposure
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOCAP_EXPOSURE must be a non-negative integer"))?;
        }
        if let Ok(gain) = std::env::var("MOCAP_GAIN") {
            self.capture.gain = gain
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOCAP_GAIN must be a non-negative integer"))?;
        }
        if let Ok(hz) = std::env::var("MOCAP_CYCLE_HZ") {
            self.cycle_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOCAP_CYCLE_HZ must be an integer rate in Hz"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture resolution must be non-zero"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.cycle_hz == 0 {
            return Err(anyhow!("cycle_hz must be greater than zero"));
        }
        if !(self.detection.min_area >= 0.0 && self.detection.min_area < self.detection.max_area)
        {
            return Err(anyhow!(
                "detection area cutoffs must satisfy 0 <= min_area < max_area"
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.min_circularity) {
            return Err(anyhow!("min_circularity must be within 0..=1"));
        }
        if self.matcher.top_row_len == 0 {
            return Err(anyhow!("matcher top_row_len must be greater than zero"));
        }
        if self.matcher.min_points < 2 {
            return Err(anyhow!("matcher min_points must be at least 2"));
        }
        Ok(())
    }

    /// Consumer tick interval derived from `cycle_hz`.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.cycle_hz.max(1)))
    }
}

fn read_config_file(path: &Path) -> Result<RigConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
