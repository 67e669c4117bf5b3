use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceEngine;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::RgbFrame;

/// One scripted engine response.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Scripted engine for tests and the `stub` engine setting.
///
/// Replays its steps in order and wraps around. An empty script returns no
/// detections. Boxes are taken as-is; they are not rescaled to the frame.
pub struct ScriptedEngine {
    script: Vec<ScriptStep>,
    cursor: usize,
    loaded: bool,
    fail_load: bool,
    calls: Arc<AtomicU64>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            cursor: 0,
            loaded: false,
            fail_load: false,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Engine that always returns the same detections.
    pub fn fixed(detections: Vec<Detection>) -> Self {
        Self::new(vec![ScriptStep::Detections(detections)])
    }

    /// A bottle in front of a person, with a dog in the corner.
    pub fn demo_scene() -> Self {
        Self::fixed(vec![
            Detection::new("person", 0.82, BoundingBox::new(40.0, 20.0, 160.0, 200.0)),
            Detection::new("bottle", 0.47, BoundingBox::new(60.0, 90.0, 60.0, 110.0)),
            Detection::new("dog", 0.61, BoundingBox::new(220.0, 150.0, 60.0, 60.0)),
        ])
    }

    /// Make `load` fail.
    pub fn with_failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Shared counter of `detect` calls, readable after the engine is moved.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&mut self) -> Result<()> {
        if self.fail_load {
            return Err(anyhow!("scripted engine configured to fail loading"));
        }
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn detect(&mut self, _frame: &RgbFrame) -> Result<Vec<Detection>> {
        if !self.loaded {
            return Err(anyhow!("scripted engine not loaded"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let step = self.script[self.cursor % self.script.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        match step {
            ScriptStep::Detections(detections) => Ok(detections),
            ScriptStep::Fail(reason) => Err(anyhow!(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RgbFrame {
        RgbFrame::new(vec![0u8; 12], 2, 2).unwrap()
    }

    #[test]
    fn scripted_engine_replays_steps() {
        let mut engine = ScriptedEngine::new(vec![
            ScriptStep::Detections(vec![Detection::new(
                "cup",
                0.9,
                BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            )]),
            ScriptStep::Fail("busy".into()),
        ]);
        let calls = engine.call_counter();

        assert!(engine.detect(&frame()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        engine.load().unwrap();
        assert_eq!(engine.detect(&frame()).unwrap().len(), 1);
        assert!(engine.detect(&frame()).is_err());
        assert_eq!(engine.detect(&frame()).unwrap()[0].class_label, "cup");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_load_keeps_engine_unloaded() {
        let mut engine = ScriptedEngine::default().with_failing_load();
        assert!(engine.load().is_err());
        assert!(!engine.is_loaded());
    }
}
