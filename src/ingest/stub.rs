//! Synthetic camera (`stub://`).
//!
//! Renders a moving gradient scene and encodes it as JPEG at the requested
//! quality, so the decode and resize path runs exactly as it would for a
//! real device.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

use super::{CameraSource, CameraStats, CaptureOptions, CapturedFrame};

const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;

pub struct StubCamera {
    url: String,
    width: u32,
    height: u32,
    rgba: bool,
    frame_count: u64,
}

impl StubCamera {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            width: STUB_WIDTH,
            height: STUB_HEIGHT,
            rgba: false,
            frame_count: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Hand out raw RGBA frames instead of JPEG.
    pub fn with_rgba_output(mut self) -> Self {
        self.rgba = true;
        self
    }

    fn render(&self) -> RgbImage {
        let shift = (self.frame_count % 256) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }
}

impl CameraSource for StubCamera {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn capture(&mut self, options: &CaptureOptions) -> Result<CapturedFrame> {
        self.frame_count += 1;
        let scene = self.render();

        if self.rgba {
            let rgba = DynamicImage::ImageRgb8(scene).into_rgba8();
            return Ok(CapturedFrame::Rgba {
                width: rgba.width(),
                height: rgba.height(),
                data: rgba.into_raw(),
            });
        }

        let mut bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut bytes, options.quality.clamp(1, 100));
        DynamicImage::ImageRgb8(scene)
            .write_with_encoder(encoder)
            .context("encode synthetic jpeg")?;
        Ok(CapturedFrame::Jpeg(bytes))
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}
