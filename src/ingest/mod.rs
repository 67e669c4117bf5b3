//! Camera sources.
//!
//! This module provides the sources the detection loop captures from:
//! - Stub source (`stub://`, synthetic scene for tests and demos)
//! - Local directory of JPEG stills (replayed in name order)
//! - HTTP snapshot endpoints (feature: http)
//!
//! A source hands back one compressed or raw frame per `capture` call. It
//! does not decode, resize or retain frames; preprocessing happens in
//! `frame::prepare_frame`. Capture failures are reported as errors and the
//! loop treats every one of them as retryable.

pub mod directory;
#[cfg(feature = "http")]
pub mod http;
pub mod stub;

use anyhow::{anyhow, Result};

pub use directory::DirectoryCamera;
#[cfg(feature = "http")]
pub use http::HttpSnapshotCamera;
pub use stub::StubCamera;

pub const DEFAULT_CAPTURE_QUALITY: u8 = 50;

/// Per-capture options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureOptions {
    /// JPEG quality, 1..=100. Lower values trade fidelity for capture speed.
    pub quality: u8,
    /// Skip device-side post-processing (orientation fixes, filters).
    pub skip_post_processing: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_CAPTURE_QUALITY,
            skip_post_processing: true,
        }
    }
}

/// A captured frame as produced by the device.
#[derive(Clone, Debug)]
pub enum CapturedFrame {
    /// Compressed JPEG bytes.
    Jpeg(Vec<u8>),
    /// Raw 4-channel pixels, row-major.
    Rgba {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
}

impl CapturedFrame {
    pub fn byte_len(&self) -> usize {
        match self {
            CapturedFrame::Jpeg(bytes) => bytes.len(),
            CapturedFrame::Rgba { data, .. } => data.len(),
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Device the detection loop captures frames from.
pub trait CameraSource: Send {
    /// Human-readable source description (URL or path).
    fn describe(&self) -> String;

    /// Capture one frame.
    fn capture(&mut self, options: &CaptureOptions) -> Result<CapturedFrame>;

    fn stats(&self) -> CameraStats;
}

/// Open a camera from a source URL.
///
/// `stub://name` selects the synthetic camera, `http(s)://` a snapshot
/// endpoint (feature `http`), anything without a scheme a local directory.
pub fn open_camera(url: &str) -> Result<Box<dyn CameraSource>> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("camera url must not be empty"));
    }
    if trimmed.starts_with("stub://") {
        return Ok(Box::new(StubCamera::new(trimmed)));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        #[cfg(feature = "http")]
        {
            return Ok(Box::new(HttpSnapshotCamera::new(trimmed)?));
        }
        #[cfg(not(feature = "http"))]
        {
            return Err(anyhow!("http camera sources require the http feature"));
        }
    }
    if trimmed.contains("://") {
        return Err(anyhow!(
            "unsupported camera url '{}'; expected stub://, http(s):// or a local directory",
            trimmed
        ));
    }
    Ok(Box::new(DirectoryCamera::open(trimmed)?))
}
