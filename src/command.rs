//! Operator commands.
//!
//! Text form, one command per line:
//!
//! ```text
//! threshold 180
//! detection on|off
//! exposure 120 8        (exposure, gain)
//! start
//! stop
//! status
//! ```

use anyhow::{anyhow, bail, Result};
use serde::Serialize;

use crate::rig::Rig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetThreshold(u8),
    SetDetectionEnabled(bool),
    SetExposureGain(u32, u32),
    StartCapture,
    StopCapture,
    Status,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let mut arg = |name: &str| {
            words
                .next()
                .ok_or_else(|| anyhow!("{} requires a {} argument", verb, name))
        };
        let cmd = match verb.to_ascii_lowercase().as_str() {
            "threshold" => {
                let raw = arg("value")?;
                Command::SetThreshold(
                    raw.parse()
                        .map_err(|_| anyhow!("threshold '{}' must be within 0..=255", raw))?,
                )
            }
            "detection" => match arg("on|off")? {
                "on" | "true" | "1" => Command::SetDetectionEnabled(true),
                "off" | "false" | "0" => Command::SetDetectionEnabled(false),
                other => bail!("detection expects on or off, got '{}'", other),
            },
            "exposure" => {
                let exposure = arg("exposure")?;
                let gain = arg("gain")?;
                Command::SetExposureGain(
                    exposure
                        .parse()
                        .map_err(|_| anyhow!("exposure '{}' is not an integer", exposure))?,
                    gain.parse()
                        .map_err(|_| anyhow!("gain '{}' is not an integer", gain))?,
                )
            }
            "start" => Command::StartCapture,
            "stop" => Command::StopCapture,
            "status" => Command::Status,
            other => bail!("unknown command '{}'", other),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument '{}'", extra);
        }
        Ok(cmd)
    }
}

/// Rig state reported back to the operator.
#[derive(Clone, Debug, Serialize)]
pub struct Status {
    pub capturing: bool,
    pub camera_count: usize,
    pub frames_captured: u64,
    pub detection_enabled: bool,
    pub threshold: u8,
    pub exposure: u32,
    pub gain: u32,
    pub matcher_initialized: bool,
    pub matches: Vec<(usize, usize)>,
}

impl Rig {
    pub fn status(&self) -> Status {
        let settings = self.settings();
        Status {
            capturing: self.is_capturing(),
            camera_count: self.camera_count(),
            frames_captured: self.capture_stats().map_or(0, |s| s.frames_captured()),
            detection_enabled: settings.detection_enabled(),
            threshold: settings.threshold(),
            exposure: settings.exposure(),
            gain: settings.gain(),
            matcher_initialized: self.is_initialized(),
            matches: self.matches(),
        }
    }

    /// Execute `cmd` and return the resulting status.
    pub fn apply(&self, cmd: Command) -> Result<Status> {
        match cmd {
            Command::SetThreshold(threshold) => self.set_threshold(threshold),
            Command::SetDetectionEnabled(enabled) => self.set_detection_enabled(enabled),
            Command::SetExposureGain(exposure, gain) => self.set_exposure_gain(exposure, gain),
            Command::StartCapture => {
                self.start_capture()?;
            }
            Command::StopCapture => self.stop_capture()?,
            Command::Status => {}
        }
        Ok(self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_verb() {
        assert_eq!(Command::parse("threshold 180").unwrap(), Command::SetThreshold(180));
        assert_eq!(
            Command::parse("  Detection off ").unwrap(),
            Command::SetDetectionEnabled(false)
        );
        assert_eq!(
            Command::parse("exposure 120 8").unwrap(),
            Command::SetExposureGain(120, 8)
        );
        assert_eq!(Command::parse("start").unwrap(), Command::StartCapture);
        assert_eq!(Command::parse("stop").unwrap(), Command::StopCapture);
        assert_eq!(Command::parse("status").unwrap(), Command::Status);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("threshold 300").is_err());
        assert!(Command::parse("threshold").is_err());
        assert!(Command::parse("exposure 10").is_err());
        assert!(Command::parse("detection maybe").is_err());
        assert!(Command::parse("stop now").is_err());
        assert!(Command::parse("reboot").is_err());
    }
}
