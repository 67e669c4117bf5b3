use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::postprocess::{
    DEFAULT_OVERLAP_RATIO, DEFAULT_PERSON_THRESHOLD, DEFAULT_PRIVILEGED_CLASSES,
    DEFAULT_PRIVILEGED_THRESHOLD, DEFAULT_THRESHOLD,
};
use crate::detect::{ClassThresholds, InferenceEngine, PostProcessor, ScriptedEngine, PERSON_CLASS};
use crate::detection_loop::{
    DetectionLoop, LoopSettings, DEFAULT_BACKOFF, DEFAULT_MIN_INTERVAL, DEFAULT_SUCCESS_DELAY,
    DEFAULT_TRIGGER_TICK,
};
use crate::frame::DEFAULT_TARGET_WIDTH;
use crate::ingest::{open_camera, CaptureOptions, DEFAULT_CAPTURE_QUALITY};
use crate::sink::ResultSink;

const DEFAULT_CAMERA_URL: &str = "stub://camera";
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_DISPLAY_WIDTH: u32 = 360;

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    camera: Option<CameraConfigFile>,
    preprocess: Option<PreprocessConfigFile>,
    timing: Option<TimingConfigFile>,
    thresholds: Option<ThresholdConfigFile>,
    engine: Option<EngineConfigFile>,
    overlay: Option<OverlayConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    quality: Option<u8>,
    skip_post_processing: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PreprocessConfigFile {
    target_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    min_interval_ms: Option<u64>,
    success_delay_ms: Option<u64>,
    backoff_ms: Option<u64>,
    trigger_tick_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    privileged: Option<f32>,
    person: Option<f32>,
    default: Option<f32>,
    overlap_ratio: Option<f32>,
    privileged_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    kind: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    display_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub camera_url: String,
    pub loop_settings: LoopSettings,
    pub thresholds: ThresholdSettings,
    pub engine: EngineSettings,
    pub display_width: u32,
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSettings {
    pub classes: ClassThresholds,
    pub overlap_ratio: f32,
    pub privileged_classes: Vec<String>,
}

impl ThresholdSettings {
    pub fn post_processor(&self) -> PostProcessor {
        PostProcessor::new(
            self.privileged_classes.clone(),
            self.classes,
            self.overlap_ratio,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    Stub,
    Tract,
}

impl EngineKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(EngineKind::Stub),
            "tract" => Ok(EngineKind::Tract),
            other => Err(anyhow!(
                "unknown engine '{}'; expected 'stub' or 'tract'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub kind: EngineKind,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

impl EngineSettings {
    /// Build an unloaded engine handle.
    pub fn build(&self) -> Result<Box<dyn InferenceEngine>> {
        match self.kind {
            EngineKind::Stub => Ok(Box::new(ScriptedEngine::demo_scene())),
            EngineKind::Tract => self.build_tract(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract(&self) -> Result<Box<dyn InferenceEngine>> {
        let path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract engine requires engine.model_path"))?;
        Ok(Box::new(crate::detect::TractEngine::new(
            path,
            self.input_width,
            self.input_height,
        )))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract(&self) -> Result<Box<dyn InferenceEngine>> {
        Err(anyhow!("tract engine requires the backend-tract feature"))
    }
}

impl LoopConfig {
    /// Load from `EKOLENZ_CONFIG` (when set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EKOLENZ_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LoopConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let preprocess = file.preprocess.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let thresholds = file.thresholds.unwrap_or_default();
        let engine = file.engine.unwrap_or_default();

        let loop_settings = LoopSettings {
            min_interval: millis_or(timing.min_interval_ms, DEFAULT_MIN_INTERVAL),
            success_delay: millis_or(timing.success_delay_ms, DEFAULT_SUCCESS_DELAY),
            backoff: millis_or(timing.backoff_ms, DEFAULT_BACKOFF),
            trigger_tick: millis_or(timing.trigger_tick_ms, DEFAULT_TRIGGER_TICK),
            capture: CaptureOptions {
                quality: camera.quality.unwrap_or(DEFAULT_CAPTURE_QUALITY),
                skip_post_processing: camera.skip_post_processing.unwrap_or(true),
            },
            target_width: preprocess.target_width.unwrap_or(DEFAULT_TARGET_WIDTH),
        };

        let thresholds = ThresholdSettings {
            classes: ClassThresholds {
                privileged: thresholds
                    .privileged
                    .unwrap_or(DEFAULT_PRIVILEGED_THRESHOLD),
                person: thresholds.person.unwrap_or(DEFAULT_PERSON_THRESHOLD),
                default: thresholds.default.unwrap_or(DEFAULT_THRESHOLD),
            },
            overlap_ratio: thresholds.overlap_ratio.unwrap_or(DEFAULT_OVERLAP_RATIO),
            privileged_classes: thresholds.privileged_classes.unwrap_or_else(|| {
                DEFAULT_PRIVILEGED_CLASSES
                    .iter()
                    .map(|class| class.to_string())
                    .collect()
            }),
        };

        let engine = EngineSettings {
            kind: engine
                .kind
                .as_deref()
                .map(EngineKind::parse)
                .transpose()?
                .unwrap_or(EngineKind::Stub),
            model_path: engine.model_path,
            input_width: engine.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: engine.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
        };

        Ok(Self {
            camera_url: camera
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            loop_settings,
            thresholds,
            engine,
            display_width: file
                .overlay
                .and_then(|overlay| overlay.display_width)
                .unwrap_or(DEFAULT_DISPLAY_WIDTH),
            upload_url: file.upload.and_then(|upload| upload.url),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("EKOLENZ_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera_url = url;
            }
        }
        if let Ok(kind) = std::env::var("EKOLENZ_ENGINE") {
            if !kind.trim().is_empty() {
                self.engine.kind = EngineKind::parse(&kind)?;
            }
        }
        if let Ok(path) = std::env::var("EKOLENZ_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.engine.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(interval) = std::env::var("EKOLENZ_MIN_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("EKOLENZ_MIN_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.loop_settings.min_interval = Duration::from_millis(millis);
        }
        if let Ok(classes) = std::env::var("EKOLENZ_PRIVILEGED_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.thresholds.privileged_classes = parsed;
            }
        }
        if let Ok(url) = std::env::var("EKOLENZ_UPLOAD_URL") {
            if !url.trim().is_empty() {
                self.upload_url = Some(url);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let t = &self.thresholds;
        for (name, value) in [
            ("thresholds.privileged", t.classes.privileged),
            ("thresholds.person", t.classes.person),
            ("thresholds.default", t.classes.default),
            ("thresholds.overlap_ratio", t.overlap_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }

        self.thresholds.privileged_classes = self
            .thresholds
            .privileged_classes
            .iter()
            .map(|class| class.trim().to_lowercase())
            .filter(|class| !class.is_empty())
            .collect();
        if self.thresholds.privileged_classes.is_empty() {
            return Err(anyhow!("thresholds.privileged_classes must not be empty"));
        }
        if self
            .thresholds
            .privileged_classes
            .iter()
            .any(|class| class == PERSON_CLASS)
        {
            return Err(anyhow!("'person' cannot be a privileged class"));
        }

        let quality = self.loop_settings.capture.quality;
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("camera.quality must be within 1..=100, got {}", quality));
        }
        if self.loop_settings.target_width == 0 {
            return Err(anyhow!("preprocess.target_width must be greater than zero"));
        }
        if self.loop_settings.min_interval.is_zero()
            || self.loop_settings.backoff.is_zero()
            || self.loop_settings.trigger_tick.is_zero()
        {
            return Err(anyhow!(
                "timing.min_interval_ms, timing.backoff_ms and timing.trigger_tick_ms must be greater than zero"
            ));
        }
        if self.engine.input_width == 0 || self.engine.input_height == 0 {
            return Err(anyhow!("engine input size must be greater than zero"));
        }
        if self.engine.kind == EngineKind::Tract && self.engine.model_path.is_none() {
            return Err(anyhow!("engine.model_path is required for the tract engine"));
        }
        if self.display_width == 0 {
            return Err(anyhow!("overlay.display_width must be greater than zero"));
        }
        Ok(())
    }

    /// Open the camera, build the engine and wire them into a loop.
    ///
    /// The engine is returned unloaded.
    pub fn build_loop(&self, sink: Arc<dyn ResultSink>) -> Result<DetectionLoop> {
        let camera = open_camera(&self.camera_url)
            .with_context(|| format!("failed to open camera {}", self.camera_url))?;
        let engine = self.engine.build()?;
        Ok(DetectionLoop::new(camera, engine, sink)
            .with_settings(self.loop_settings)
            .with_postprocessor(self.thresholds.post_processor()))
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn read_config_file(path: &Path) -> Result<LoopConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
