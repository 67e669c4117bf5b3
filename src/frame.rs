//! Frame preprocessing.
//!
//! Turns a captured frame into the 3-channel buffer inference engines
//! expect:
//!
//! - Decode JPEG payloads in-memory
//! - Downscale to the inference width (aspect preserved, never upscaled)
//! - Drop the alpha channel
//!
//! Downscaling happens before anything else touches the pixels; full
//! resolution frames are never handed to an engine.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::ingest::CapturedFrame;

pub const DEFAULT_TARGET_WIDTH: u32 = 300;

/// Row-major RGB pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbFrame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl RgbFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Resample to exactly `width` x `height` (engine input size).
    pub fn resize_exact(&self, width: u32, height: u32) -> Result<RgbFrame> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let image = RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("RGB buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
        RgbFrame::new(resized.into_raw(), width, height)
    }

    fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
        }
    }
}

/// Decode, downscale and flatten a captured frame to RGB.
pub fn prepare_frame(captured: CapturedFrame, target_width: u32) -> Result<RgbFrame> {
    if target_width == 0 {
        return Err(anyhow!("target width must be greater than zero"));
    }
    let image = decode(captured)?;
    let image = downscale(image, target_width);
    Ok(RgbFrame::from_image(image.into_rgb8()))
}

fn decode(captured: CapturedFrame) -> Result<DynamicImage> {
    match captured {
        CapturedFrame::Jpeg(bytes) => {
            image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).context("decode jpeg")
        }
        CapturedFrame::Rgba {
            data,
            width,
            height,
        } => {
            let expected = rgb_len(width, height)? / 3 * 4;
            if data.len() != expected {
                return Err(anyhow!(
                    "RGBA frame length mismatch: expected {}, got {}",
                    expected,
                    data.len()
                ));
            }
            let image = RgbImage::from_raw(width, height, strip_alpha(&data)?)
                .ok_or_else(|| anyhow!("RGBA buffer does not match its dimensions"))?;
            Ok(DynamicImage::ImageRgb8(image))
        }
    }
}

fn downscale(image: DynamicImage, target_width: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= target_width {
        return image;
    }
    let scaled_height = ((height as u64 * target_width as u64) / width as u64).max(1) as u32;
    image.resize_exact(target_width, scaled_height, FilterType::Triangle)
}

/// Drop every fourth byte of an RGBA buffer.
pub fn strip_alpha(rgba: &[u8]) -> Result<Vec<u8>> {
    if rgba.len() % 4 != 0 {
        return Err(anyhow!(
            "RGBA buffer length {} is not a multiple of 4",
            rgba.len()
        ));
    }
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for pixel in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }
    Ok(rgb)
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 40, 90]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 90))
            .unwrap();
        bytes
    }

    #[test]
    fn large_jpeg_is_downscaled_to_target_width() -> Result<()> {
        let frame = prepare_frame(CapturedFrame::Jpeg(jpeg(600, 400)), 300)?;
        assert_eq!(frame.width(), 300);
        assert_eq!(frame.height(), 200);
        assert_eq!(frame.pixels().len(), 300 * 200 * 3);
        Ok(())
    }

    #[test]
    fn small_frames_are_not_upscaled() -> Result<()> {
        let frame = prepare_frame(CapturedFrame::Jpeg(jpeg(120, 80)), 300)?;
        assert_eq!((frame.width(), frame.height()), (120, 80));
        Ok(())
    }

    #[test]
    fn rgba_frames_lose_alpha() -> Result<()> {
        let data = vec![10, 20, 30, 255, 40, 50, 60, 0];
        let frame = prepare_frame(
            CapturedFrame::Rgba {
                data,
                width: 2,
                height: 1,
            },
            300,
        )?;
        assert_eq!(frame.pixels(), &[10, 20, 30, 40, 50, 60]);
        Ok(())
    }

    #[test]
    fn malformed_payloads_fail_to_decode() {
        assert!(prepare_frame(CapturedFrame::Jpeg(b"not a jpeg".to_vec()), 300).is_err());
        let short = CapturedFrame::Rgba {
            data: vec![0; 7],
            width: 2,
            height: 1,
        };
        assert!(prepare_frame(short, 300).is_err());
    }

    #[test]
    fn strip_alpha_validates_length() -> Result<()> {
        assert_eq!(strip_alpha(&[1, 2, 3, 4, 5, 6, 7, 8])?, vec![1, 2, 3, 5, 6, 7]);
        assert!(strip_alpha(&[1, 2, 3]).is_err());
        Ok(())
    }

    #[test]
    fn resize_exact_hits_requested_size() -> Result<()> {
        let frame = RgbFrame::new(vec![128u8; 4 * 2 * 3], 4, 2)?;
        let resized = frame.resize_exact(2, 2)?;
        assert_eq!(resized.pixels().len(), 12);
        Ok(())
    }
}
