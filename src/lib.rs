//! Motion-capture rig core
//!
//! Captures frames from a multi-camera rig, conditions them, detects bright circular
//! markers and assigns each marker an identity that is stable across camera views.
//!
//! # Architecture
//!
//! Two execution contexts share state through the `Rig` context object:
//!
//! 1. **Capture**: a dedicated thread owns the camera driver and overwrites the latest frame
//!    per camera in a `FrameBuffer` as fast as the driver delivers.
//! 2. **Consumer**: a fixed-cadence loop snapshots the buffer, runs the processing
//!    pipeline and marker detector, freezes the cross-view correspondence once, and emits
//!    a `CycleReport`.
//!
//! Neither context blocks the other: the buffer keeps only the newest frame per camera.
//!
//! # Module Structure
//!
//! - `frame`: `RawFrame` and the latest-wins `FrameBuffer`
//! - `ingest`: capture drivers (`stub://`, V4L2)
//! - `capture`: the capture loop and its two-phase stop
//! - `pipeline`: rotation, undistortion, blur/sharpen, placeholders, stitching
//! - `detect`: marker detection strategies
//! - `matcher`: frozen cross-view correspondence
//! - `rig`: the context object exposing commands and queries
//! - `command`: text operator commands applied to the rig
//! - `consumer`: the fixed-cadence loop and report sinks

pub mod annotate;
pub mod calibration;
pub mod capture;
pub mod command;
pub mod config;
pub mod consumer;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod matcher;
pub mod pipeline;
pub mod rig;
pub mod settings;

pub use calibration::{load_camera_parameters, CameraParameters, Distortion};
pub use capture::{CaptureSession, CaptureStats};
pub use command::{Command, Status};
pub use config::{CaptureConfig, DetectionConfig, MatcherConfig, RigConfig};
pub use consumer::{run_consumer, ConsumerSummary, CycleSink, JsonLinesSink, SnapshotSink, Tee};
pub use detect::{detect_markers, DetectedMarker, Detection, MarkerDetector};
pub use frame::{FrameBuffer, PixelFormat, RawFrame};
pub use ingest::{open_driver, CaptureDriver, DriverInfo};
pub use matcher::{CorrespondenceMap, CorrespondenceMatcher, MarkerSet, MatcherState};
pub use pipeline::{stitch_horizontal, CameraFrame, ProcessingPipeline};
pub use rig::{CameraReport, CycleReport, LabeledMarker, Rig};
pub use settings::Settings;
