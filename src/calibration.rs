//! Per-camera calibration parameters.
//!
//! The calibration file is an ordered JSON array, one entry per camera, index-aligned with
//! the camera ordering reported by the capture driver:
//!
//! ```json
//! [
//!   {
//!     "intrinsic_matrix": [[600, 0, 160], [0, 600, 120], [0, 0, 1]],
//!     "distortion_coef": [-0.2, 0.05, 0.0, 0.0, 0.0],
//!     "rotation": [0.0, 0.0, 0.0],
//!     "rotation_frames": 1
//!   },
//!   {
//!     "intrinsic_matrix": [[600, 0, 160], [0, 600, 120], [0, 0, 1]],
//!     "distortion_coef": [-0.2, 0.05, 0.0, 0.0, 0.0],
//!     "rotation": 1
//!   }
//! ]
//! ```
//!
//! `"rotation"` is either a mounting rotation in degrees about x, y, z or an integer count
//! of counter-clockwise quarter turns. An explicit `"rotation_frames"` wins over the integer
//! form.
//!
//! A missing or unreadable file is not fatal: the rig runs without geometric correction.
//! A single bad entry only costs that camera its correction.

use anyhow::{anyhow, Context, Result};
use nalgebra::Matrix3;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CameraParametersFile {
    intrinsic_matrix: [[f64; 3]; 3],
    #[serde(alias = "distortion_coefficients")]
    distortion_coef: Vec<f64>,
    #[serde(default, alias = "rotation_degrees")]
    rotation: Option<RotationFile>,
    #[serde(default)]
    rotation_frames: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RotationFile {
    QuarterTurns(i32),
    Degrees([f64; 3]),
}

/// OpenCV-compatible lens distortion (k1, k2, p1, p2, k3, k4, k5, k6).
///
/// Missing trailing coefficients are zero; k4..k6 form the rational denominator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    pub fn from_coefficients(coef: &[f64]) -> Result<Self> {
        if !matches!(coef.len(), 4 | 5 | 8) {
            return Err(anyhow!(
                "distortion must have 4, 5 or 8 coefficients, got {}",
                coef.len()
            ));
        }
        let at = |i: usize| coef.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
            k4: at(5),
            k5: at(6),
            k6: at(7),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Apply distortion to normalized camera coordinates.
    pub fn distort_normalized(&self, xy: [f64; 2]) -> [f64; 2] {
        let [x, y] = xy;
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let num = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let den = 1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6;
        let radial = if den.abs() < 1e-12 { num } else { num / den };
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        [x * radial + x_tan, y * radial + y_tan]
    }
}

/// Calibration of one camera. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParameters {
    pub intrinsic: Matrix3<f64>,
    pub distortion: Distortion,
    /// Mounting rotation in degrees about x, y, z. Carried for pose code; unused in 2D.
    pub rotation_degrees: [f64; 3],
    /// Counter-clockwise quarter turns applied to correct sensor orientation.
    pub rotation_frames: i32,
}

impl CameraParameters {
    pub fn new(intrinsic: Matrix3<f64>, distortion: Distortion) -> Self {
        Self {
            intrinsic,
            distortion,
            rotation_degrees: [0.0; 3],
            rotation_frames: 0,
        }
    }

    /// Identity intrinsics, no distortion, no rotation.
    pub fn uncorrected() -> Self {
        Self::new(Matrix3::identity(), Distortion::default())
    }

    pub fn with_rotation_frames(mut self, quarter_turns: i32) -> Self {
        self.rotation_frames = quarter_turns;
        self
    }

    /// Quarter turns normalized to 0..=3.
    pub fn quarter_turns(&self) -> u8 {
        self.rotation_frames.rem_euclid(4) as u8
    }

    pub fn fx(&self) -> f64 {
        self.intrinsic[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic[(1, 2)]
    }

    fn from_file(index: usize, file: CameraParametersFile) -> Result<Self> {
        let m = file.intrinsic_matrix;
        let intrinsic = Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        );
        if intrinsic[(0, 0)].abs() < f64::EPSILON || intrinsic[(1, 1)].abs() < f64::EPSILON {
            return Err(anyhow!("camera {}: focal length must be non-zero", index));
        }
        let distortion = Distortion::from_coefficients(&file.distortion_coef)
            .with_context(|| format!("camera {}", index))?;
        let (rotation_degrees, quarter_turns) = match file.rotation {
            Some(RotationFile::Degrees(degrees)) => (degrees, 0),
            Some(RotationFile::QuarterTurns(turns)) => ([0.0; 3], turns),
            None => ([0.0; 3], 0),
        };
        Ok(Self {
            intrinsic,
            distortion,
            rotation_degrees,
            rotation_frames: file.rotation_frames.unwrap_or(quarter_turns),
        })
    }
}

/// Parse one calibration entry.
fn parse_entry(index: usize, entry: serde_json::Value) -> Result<CameraParameters> {
    let file: CameraParametersFile = serde_json::from_value(entry)
        .map_err(|e| anyhow!("camera {}: invalid entry: {}", index, e))?;
    CameraParameters::from_file(index, file)
}

/// Parse the calibration JSON document.
///
/// Only a malformed document is an error. An entry that does not parse is logged and left
/// uncorrected so the remaining cameras keep their index alignment.
pub fn parse_camera_parameters(raw: &str) -> Result<Vec<CameraParameters>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid calibration json: {}", e))?;
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_entry(index, entry).unwrap_or_else(|err| {
                log::error!("{:#}; camera runs without geometric correction", err);
                CameraParameters::uncorrected()
            })
        })
        .collect())
}

/// Load calibration from `path`, falling back to "no geometric correction" on any problem.
pub fn load_camera_parameters(path: &Path) -> Vec<CameraParameters> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            log::warn!(
                "calibration file {} unavailable ({}); running without geometric correction",
                path.display(),
                err
            );
            return Vec::new();
        }
    };
    match parse_camera_parameters(&raw) {
        Ok(params) => {
            log::info!(
                "loaded calibration for {} camera(s) from {}",
                params.len(),
                path.display()
            );
            params
        }
        Err(err) => {
            log::error!(
                "calibration file {} rejected: {:#}; running without geometric correction",
                path.display(),
                err
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {
            "intrinsic_matrix": [[600, 0, 160], [0, 610, 120], [0, 0, 1]],
            "distortion_coef": [-0.2, 0.05, 0.001, 0.002, 0.0],
            "rotation": [0.0, 90.0, 0.0],
            "rotation_frames": -1
        },
        {
            "intrinsic_matrix": [[500, 0, 160], [0, 500, 120], [0, 0, 1]],
            "distortion_coef": [0.0, 0.0, 0.0, 0.0]
        }
    ]"#;

    #[test]
    fn parses_ordered_entries() {
        let params = parse_camera_parameters(SAMPLE).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].fx(), 600.0);
        assert_eq!(params[0].fy(), 610.0);
        assert_eq!(params[0].cx(), 160.0);
        assert_eq!(params[0].distortion.k1, -0.2);
        assert_eq!(params[0].rotation_degrees, [0.0, 90.0, 0.0]);
        assert_eq!(params[0].quarter_turns(), 3);
        assert_eq!(params[1].rotation_frames, 0);
        assert!(params[1].distortion.is_identity());
    }

    #[test]
    fn bad_entry_is_uncorrected_without_dropping_others() {
        let raw = r#"[
            {"intrinsic_matrix": [[1,0,0],[0,1,0],[0,0,1]], "distortion_coef": [0.1]},
            {"intrinsic_matrix": [[0,0,0],[0,0,0],[0,0,1]], "distortion_coef": [0,0,0,0]},
            {"intrinsic_matrix": "nope", "distortion_coef": [0,0,0,0]},
            {"intrinsic_matrix": [[300,0,160],[0,300,120],[0,0,1]], "distortion_coef": [0.1,0,0,0]}
        ]"#;
        let params = parse_camera_parameters(raw).unwrap();
        assert_eq!(params.len(), 4);
        for bad in &params[..3] {
            assert_eq!(*bad, CameraParameters::uncorrected());
        }
        assert_eq!(params[3].fx(), 300.0);
        assert_eq!(params[3].distortion.k1, 0.1);
    }

    #[test]
    fn integer_rotation_counts_quarter_turns() {
        let raw = r#"[
            {
                "intrinsic_matrix": [[600, 0, 160], [0, 600, 120], [0, 0, 1]],
                "distortion_coef": [-0.2, 0.05, 0.0, 0.0, 0.0],
                "rotation": 1
            },
            {
                "intrinsic_matrix": [[600, 0, 160], [0, 600, 120], [0, 0, 1]],
                "distortion_coef": [0.0, 0.0, 0.0, 0.0],
                "rotation": 3,
                "rotation_frames": 2
            }
        ]"#;
        let params = parse_camera_parameters(raw).unwrap();
        assert_eq!(params[0].quarter_turns(), 1);
        assert_eq!(params[0].rotation_degrees, [0.0; 3]);
        assert_eq!(params[0].distortion.k1, -0.2);
        assert_eq!(params[1].quarter_turns(), 2);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();
        assert_eq!(load_camera_parameters(file.path()).len(), 2);
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let params = load_camera_parameters(Path::new("/nonexistent/camera-params.json"));
        assert!(params.is_empty());
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(load_camera_parameters(file.path()).is_empty());
    }

    #[test]
    fn zero_distortion_is_identity_mapping() {
        let d = Distortion::default();
        assert_eq!(d.distort_normalized([0.3, -0.2]), [0.3, -0.2]);
    }
}
