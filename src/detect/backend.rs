use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::RgbFrame;

/// Pretrained detector the loop submits frames to.
///
/// The engine is an explicitly owned handle: the detection loop holds it for
/// its whole session and nothing else reaches it. Loading is a one-time step
/// that must complete before the first cycle runs.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Load model weights. Calling it again on a loaded engine is a no-op.
    fn load(&mut self) -> Result<()>;

    /// True once `load` has succeeded.
    fn is_loaded(&self) -> bool;

    /// Run detection on a 3-channel frame.
    ///
    /// Boxes are returned in the frame's pixel coordinates. The engine must
    /// not retain the pixel slice beyond this call.
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>>;
}

/// Reject engine output the post-processor cannot work with: confidences
/// outside `[0, 1]` or non-finite box coordinates.
pub fn validate_output(raw: &[Detection]) -> Result<()> {
    for detection in raw {
        if !(0.0..=1.0).contains(&detection.confidence) {
            return Err(anyhow!(
                "engine returned confidence {} for '{}'",
                detection.confidence,
                detection.class_label
            ));
        }
        let b = detection.bbox;
        if ![b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite()) {
            return Err(anyhow!(
                "engine returned non-finite box for '{}'",
                detection.class_label
            ));
        }
    }
    Ok(())
}
