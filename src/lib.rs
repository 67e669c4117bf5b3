//! EkoLenz object detection
//!
//! Live detection loop for the EkoLenz camera screen: grab a frame, run an
//! object detector on it, clean up the detections and hand them to the
//! display layer, over and over while the screen is focused.
//!
//! # Module Structure
//!
//! - `ingest`: Camera sources (stub, JPEG directory, HTTP snapshot)
//! - `frame`: Decoding and downscaling into the RGB frames engines consume
//! - `detect`: Detection types, inference engines, post-processing
//! - `detection_loop`: Throttled capture/infer/publish cycle and its lifecycle
//! - `sink`: Where published batches go
//! - `overlay`: Display-space boxes and labels
//! - `config`: File and environment configuration

pub mod config;
pub mod detect;
pub mod detection_loop;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod sink;
#[cfg(feature = "http")]
pub mod upload;

pub use config::{EngineKind, EngineSettings, LoopConfig, ThresholdSettings};
pub use detect::{
    BoundingBox, ClassThresholds, Detection, DetectionBatch, InferenceEngine, PostProcessor,
    ScriptStep, ScriptedEngine,
};
pub use detection_loop::{
    CancelToken, CycleOutcome, CycleState, DetectionLoop, FailureKind, LoopHandle, LoopSettings,
    LoopStats, Phase, ScreenSession,
};
pub use frame::{prepare_frame, RgbFrame};
pub use ingest::{open_camera, CameraSource, CaptureOptions, CapturedFrame};
pub use overlay::{overlay_for, OverlayBox};
pub use sink::{FanoutSink, LatestBatch, LogSink, ResultSink};
#[cfg(feature = "http")]
pub use upload::PhotoUploader;
