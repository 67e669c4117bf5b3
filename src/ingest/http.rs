//! HTTP snapshot camera.
//!
//! Fetches one JPEG per capture from a snapshot endpoint (ESP32-CAM
//! `/capture`, IP camera `snapshot.jpg`, ...). Each capture is an independent
//! request, so a dropped connection only fails that one cycle.

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{CameraSource, CameraStats, CaptureOptions, CapturedFrame};

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpSnapshotCamera {
    url: Url,
    agent: ureq::Agent,
    frame_count: u64,
}

impl HttpSnapshotCamera {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).context("parse camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported snapshot scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            url,
            agent,
            frame_count: 0,
        })
    }
}

impl CameraSource for HttpSnapshotCamera {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn capture(&mut self, _options: &CaptureOptions) -> Result<CapturedFrame> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES + 1)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        if bytes.len() as u64 > MAX_JPEG_BYTES {
            return Err(anyhow!(
                "jpeg snapshot exceeds {} bytes",
                MAX_JPEG_BYTES
            ));
        }
        self.frame_count += 1;
        Ok(CapturedFrame::Jpeg(bytes))
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            source: self.describe(),
        }
    }
}
