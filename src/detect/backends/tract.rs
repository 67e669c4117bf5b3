#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceEngine;
use crate::detect::labels::coco_label;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::RgbFrame;

type Plan = TypedRunnableModel<TypedModel>;

/// Scores below this never leave the engine; class thresholds apply later.
const MIN_ENGINE_SCORE: f32 = 0.2;

/// Output tensor positions of an SSD detector exported from the TensorFlow
/// object detection API.
#[derive(Clone, Copy, Debug)]
pub struct SsdOutputLayout {
    /// `[1, N, 4]` boxes as normalized `(ymin, xmin, ymax, xmax)`.
    pub boxes: usize,
    /// `[1, N]` COCO class ids stored as floats.
    pub classes: usize,
    /// `[1, N]` scores.
    pub scores: usize,
    /// `[1]` number of valid rows, when the model exports it.
    pub count: Option<usize>,
}

impl Default for SsdOutputLayout {
    fn default() -> Self {
        Self {
            boxes: 0,
            classes: 1,
            scores: 2,
            count: Some(3),
        }
    }
}

/// Tract-based SSD engine for ONNX models taking `[1, H, W, 3]` u8 input.
///
/// Loads a local model file only; no network I/O.
pub struct TractEngine {
    model_path: PathBuf,
    width: u32,
    height: u32,
    layout: SsdOutputLayout,
    model: Option<Plan>,
}

impl TractEngine {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            width,
            height,
            layout: SsdOutputLayout::default(),
            model: None,
        }
    }

    pub fn with_layout(mut self, layout: SsdOutputLayout) -> Self {
        self.layout = layout;
        self
    }

    fn build_input(&self, frame: &RgbFrame) -> Result<Tensor> {
        let resized = frame.resize_exact(self.width, self.height)?;
        let pixels = resized.pixels();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, width, 3),
            |(_, y, x, channel)| pixels[(y * width + x) * 3 + channel],
        );
        Ok(input.into_tensor())
    }

    fn extract_detections(
        &self,
        outputs: &TVec<TValue>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>> {
        let output = |index: usize| {
            outputs
                .get(index)
                .ok_or_else(|| anyhow!("model produced no output #{}", index))
        };
        let boxes = output(self.layout.boxes)?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;
        let classes = output(self.layout.classes)?
            .to_array_view::<f32>()
            .context("class tensor was not f32")?;
        let scores = output(self.layout.scores)?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        if boxes.len() != scores.len() * 4 || classes.len() != scores.len() {
            return Err(anyhow!(
                "inconsistent SSD outputs: {} boxes, {} classes, {} scores",
                boxes.len() / 4,
                classes.len(),
                scores.len()
            ));
        }

        let mut rows = scores.len();
        if let Some(count_index) = self.layout.count {
            let count = output(count_index)?
                .to_array_view::<f32>()
                .context("count tensor was not f32")?;
            if let Some(valid) = count.iter().next() {
                rows = rows.min(valid.max(0.0) as usize);
            }
        }

        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let mut detections = Vec::new();
        for row in 0..rows {
            let score = scores[row];
            if !score.is_finite() || score < MIN_ENGINE_SCORE {
                continue;
            }
            let Some(label) = coco_label(classes[row].round() as u32) else {
                continue;
            };
            let ymin = boxes[row * 4].clamp(0.0, 1.0);
            let xmin = boxes[row * 4 + 1].clamp(0.0, 1.0);
            let ymax = boxes[row * 4 + 2].clamp(0.0, 1.0);
            let xmax = boxes[row * 4 + 3].clamp(0.0, 1.0);
            detections.push(Detection::new(
                label,
                score.min(1.0),
                BoundingBox::new(
                    xmin * fw,
                    ymin * fh,
                    (xmax - xmin).max(0.0) * fw,
                    (ymax - ymin).max(0.0) * fh,
                ),
            ));
        }
        Ok(detections)
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&mut self) -> Result<()> {
        if self.model.is_some() {
            return Ok(());
        }
        let model = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, self.height as usize, self.width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!(
            "tract engine loaded {} ({}x{} input)",
            self.model_path.display(),
            self.width,
            self.height
        );
        self.model = Some(model);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract engine not loaded; call load() first"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(&outputs, frame.width(), frame.height())
    }
}
