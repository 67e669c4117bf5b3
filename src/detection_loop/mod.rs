//! Live detection loop.
//!
//! One cycle captures a frame, downscales and flattens it, runs the engine,
//! post-processes the detections and publishes them:
//!
//! `Idle -> Capturing -> Inferring -> PostProcessing -> Publishing -> Idle`
//!
//! A cycle started too soon after the previous accepted start is throttled;
//! a failed cycle backs off for a fixed delay. Neither ends the loop. Only an
//! explicit stop does, and a result that lands after the stop is dropped
//! instead of published.
//!
//! `DetectionLoop` runs single cycles and decides the next delay.
//! `DetectionLoop::spawn` drives it on its own thread and returns a
//! cancellable [`LoopHandle`]; [`ScreenSession`] maps screen focus changes
//! onto spawn and stop.

mod runner;
mod session;
mod state;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::detect::{validate_output, DetectionBatch, InferenceEngine, PostProcessor};
use crate::frame::{prepare_frame, DEFAULT_TARGET_WIDTH};
use crate::ingest::{CameraSource, CaptureOptions};
use crate::sink::ResultSink;

pub use runner::{CancelToken, LoopHandle};
pub use session::ScreenSession;
pub use state::{CycleState, LoopStats, Phase};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SUCCESS_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);
/// One display frame at 60 Hz.
pub const DEFAULT_TRIGGER_TICK: Duration = Duration::from_millis(16);

/// Timing and capture parameters of the loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopSettings {
    /// Minimum time between two accepted cycle starts.
    pub min_interval: Duration,
    /// Delay after a published cycle.
    pub success_delay: Duration,
    /// Fixed delay after a failed cycle.
    pub backoff: Duration,
    /// Re-check delay for throttled or not-ready triggers.
    pub trigger_tick: Duration,
    pub capture: CaptureOptions,
    /// Width frames are downscaled to before inference.
    pub target_width: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            success_delay: DEFAULT_SUCCESS_DELAY,
            backoff: DEFAULT_BACKOFF,
            trigger_tick: DEFAULT_TRIGGER_TICK,
            capture: CaptureOptions::default(),
            target_width: DEFAULT_TARGET_WIDTH,
        }
    }
}

/// Stage a cycle failed in. All kinds are retried the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Capture,
    Decode,
    Inference,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Capture => "capture",
            FailureKind::Decode => "decode",
            FailureKind::Inference => "inference",
        };
        f.write_str(name)
    }
}

/// Result of one trigger, with the delay before the next one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A batch was published.
    Completed {
        frame_seq: u64,
        detections: usize,
        next: Duration,
    },
    /// Too soon after the previous accepted start; nothing captured.
    Throttled { next: Duration },
    /// The engine has not finished loading.
    NotReady { next: Duration },
    /// Another cycle holds the re-entrancy guard.
    Busy { next: Duration },
    /// The cycle failed; the previous batch stays on display.
    BackedOff { kind: FailureKind, next: Duration },
    /// The loop was cancelled; nothing is rescheduled.
    Cancelled,
}

impl CycleOutcome {
    /// Delay before the next trigger, `None` once cancelled.
    pub fn next_delay(&self) -> Option<Duration> {
        match *self {
            CycleOutcome::Completed { next, .. }
            | CycleOutcome::Throttled { next }
            | CycleOutcome::NotReady { next }
            | CycleOutcome::Busy { next }
            | CycleOutcome::BackedOff { next, .. } => Some(next),
            CycleOutcome::Cancelled => None,
        }
    }
}

struct CycleError {
    kind: FailureKind,
    source: anyhow::Error,
}

impl CycleError {
    fn new(kind: FailureKind) -> impl FnOnce(anyhow::Error) -> CycleError {
        move |source| CycleError { kind, source }
    }
}

/// Controller for the capture, infer, publish cycle.
///
/// Owns its camera and engine for the whole session; nothing else holds the
/// engine.
pub struct DetectionLoop {
    camera: Box<dyn CameraSource>,
    engine: Box<dyn InferenceEngine>,
    sink: Arc<dyn ResultSink>,
    postprocess: PostProcessor,
    settings: LoopSettings,
    state: Arc<CycleState>,
    cancel: CancelToken,
}

impl DetectionLoop {
    pub fn new(
        camera: Box<dyn CameraSource>,
        engine: Box<dyn InferenceEngine>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            camera,
            engine,
            sink,
            postprocess: PostProcessor::default(),
            settings: LoopSettings::default(),
            state: Arc::new(CycleState::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_postprocessor(mut self, postprocess: PostProcessor) -> Self {
        self.postprocess = postprocess;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Shared handle on the cycle state.
    pub fn state(&self) -> Arc<CycleState> {
        self.state.clone()
    }

    /// Cancellation token currently observed by this controller.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn camera_description(&self) -> String {
        self.camera.describe()
    }

    pub fn engine_ready(&self) -> bool {
        self.engine.is_loaded()
    }

    /// One-time engine load; must complete before cycles can run.
    pub fn load_engine(&mut self) -> Result<()> {
        if self.engine.is_loaded() {
            return Ok(());
        }
        let started = Instant::now();
        self.engine
            .load()
            .with_context(|| format!("failed to load {} engine", self.engine.name()))?;
        log::info!(
            "{} engine ready in {} ms",
            self.engine.name(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Run one cycle now.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.run_cycle_at(Instant::now())
    }

    /// Run one cycle as if triggered at `now`.
    pub fn run_cycle_at(&mut self, now: Instant) -> CycleOutcome {
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }
        let tick = self.settings.trigger_tick;
        if !self.engine.is_loaded() {
            return CycleOutcome::NotReady { next: tick };
        }

        let state = self.state.clone();
        let Some(_guard) = state.try_begin() else {
            return CycleOutcome::Busy { next: tick };
        };

        if let Some(last) = state.last_cycle_start() {
            if now.saturating_duration_since(last) < self.settings.min_interval {
                state.record_throttle();
                state.set_phase(Phase::Throttled);
                log::trace!("cycle throttled");
                return CycleOutcome::Throttled { next: tick };
            }
        }
        let frame_seq = state.accept_start(now);

        let batch = match self.process(frame_seq) {
            Ok(batch) => batch,
            Err(_) if self.cancel.is_cancelled() => return self.discard(frame_seq),
            Err(err) => {
                let attempt = state.record_failure();
                log::warn!(
                    "{} failure on frame #{} (consecutive: {}), retrying in {} ms: {:#}",
                    err.kind,
                    frame_seq,
                    attempt,
                    self.settings.backoff.as_millis(),
                    err.source
                );
                state.set_phase(Phase::BackingOff);
                return CycleOutcome::BackedOff {
                    kind: err.kind,
                    next: self.settings.backoff,
                };
            }
        };

        state.set_phase(Phase::Publishing);
        let detections = batch.len();
        let sink = &self.sink;
        if !self
            .cancel
            .publish_unless_cancelled(move || sink.publish(batch))
        {
            return self.discard(frame_seq);
        }
        state.record_success();
        state.set_phase(Phase::Idle);
        CycleOutcome::Completed {
            frame_seq,
            detections,
            next: self.settings.success_delay,
        }
    }

    fn discard(&self, frame_seq: u64) -> CycleOutcome {
        self.state.record_discard();
        log::debug!("frame #{} dropped after cancellation", frame_seq);
        CycleOutcome::Cancelled
    }

    fn process(&mut self, frame_seq: u64) -> Result<DetectionBatch, CycleError> {
        self.state.set_phase(Phase::Capturing);
        let captured = self
            .camera
            .capture(&self.settings.capture)
            .map_err(CycleError::new(FailureKind::Capture))?;
        let frame = prepare_frame(captured, self.settings.target_width)
            .map_err(CycleError::new(FailureKind::Decode))?;

        self.state.set_phase(Phase::Inferring);
        let raw = self
            .engine
            .detect(&frame)
            .and_then(|raw| validate_output(&raw).map(|_| raw))
            .map_err(CycleError::new(FailureKind::Inference))?;

        self.state.set_phase(Phase::PostProcessing);
        let detections = self.postprocess.process(raw);
        Ok(DetectionBatch {
            frame_seq,
            frame_width: frame.width(),
            frame_height: frame.height(),
            detections,
        })
    }

    pub(crate) fn install_cancel(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }
}
