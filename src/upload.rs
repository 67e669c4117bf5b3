//! Snapshot upload.
//!
//! Posts a captured JPEG to a collection endpoint. Uploads run beside the
//! detection loop and never feed back into it.

use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct PhotoUploader {
    endpoint: Url,
    agent: ureq::Agent,
}

impl PhotoUploader {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse upload url")?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported upload scheme '{}'; expected http(s)",
                endpoint.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(UPLOAD_TIMEOUT).build();
        Ok(Self { endpoint, agent })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Blocking upload. Returns the HTTP status on success.
    pub fn upload(&self, jpeg: &[u8]) -> Result<u16> {
        if jpeg.is_empty() {
            return Err(anyhow!("refusing to upload an empty photo"));
        }
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "image/jpeg")
            .send_bytes(jpeg)
            .with_context(|| format!("upload photo to {}", self.endpoint))?;
        Ok(response.status())
    }

    /// Upload on a background thread and only log the outcome.
    pub fn upload_detached(self, jpeg: Vec<u8>) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("photo-upload".into())
            .spawn(move || match self.upload(&jpeg) {
                Ok(status) => log::info!(
                    "uploaded {} byte photo to {} (status {})",
                    jpeg.len(),
                    self.endpoint,
                    status
                ),
                Err(err) => log::warn!("photo upload failed: {:#}", err),
            })
            .context("failed to spawn upload thread")
    }
}
