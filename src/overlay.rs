//! Display overlay geometry.
//!
//! Boxes come out of the loop in the coordinates of the downscaled inference
//! frame. The camera preview is wider, so every box is scaled by
//! `display_width / frame_width` before drawing. Borders cycle through a
//! fixed palette by position in the batch.

use serde::Serialize;

use crate::detect::{BoundingBox, Detection, DetectionBatch};

pub const BORDER_COLORS: [&str; 5] = ["blue", "green", "orange", "pink", "purple"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayBox {
    pub rect: BoundingBox,
    pub color: &'static str,
    pub label: String,
}

/// Prediction label as shown under the preview, e.g. `bottle: 47%`.
pub fn label_for(detection: &Detection) -> String {
    format!(
        "{}: {}%",
        detection.class_label,
        (detection.confidence * 100.0).round() as i64
    )
}

/// Factor mapping frame pixels to display pixels.
pub fn scaling_factor(frame_width: u32, display_width: u32) -> f32 {
    if frame_width == 0 {
        return 1.0;
    }
    display_width as f32 / frame_width as f32
}

/// Overlay boxes for a batch on a display `display_width` pixels wide.
pub fn overlay_for(batch: &DetectionBatch, display_width: u32) -> Vec<OverlayBox> {
    let factor = scaling_factor(batch.frame_width, display_width);
    batch
        .detections
        .iter()
        .enumerate()
        .map(|(index, detection)| OverlayBox {
            rect: detection.bbox.scaled(factor),
            color: BORDER_COLORS[index % BORDER_COLORS.len()],
            label: label_for(detection),
        })
        .collect()
}
