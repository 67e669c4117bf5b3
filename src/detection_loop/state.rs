use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Where the loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    Inferring,
    PostProcessing,
    Publishing,
    Throttled,
    BackingOff,
    Stopped,
}

/// Cumulative counters for one loop session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles_completed: u64,
    pub cycles_throttled: u64,
    pub cycles_failed: u64,
    /// Results that arrived after cancellation and were dropped.
    pub results_discarded: u64,
}

/// Shared cycle state.
///
/// Read by the loop handle (trigger coalescing, health) while the loop
/// thread drives it. `is_processing` is the re-entrancy guard: it is only set
/// through [`CycleState::try_begin`], and the returned guard clears it again.
#[derive(Debug)]
pub struct CycleState {
    processing: AtomicBool,
    last_cycle_start: Mutex<Option<Instant>>,
    consecutive_errors: AtomicU32,
    phase: Mutex<Phase>,
    frame_seq: AtomicU64,
    completed: AtomicU64,
    throttled: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl CycleState {
    pub fn new() -> Self {
        Self {
            processing: AtomicBool::new(false),
            last_cycle_start: Mutex::new(None),
            consecutive_errors: AtomicU32::new(0),
            phase: Mutex::new(Phase::Idle),
            frame_seq: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn last_cycle_start(&self) -> Option<Instant> {
        *self
            .last_cycle_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            cycles_completed: self.completed.load(Ordering::SeqCst),
            cycles_throttled: self.throttled.load(Ordering::SeqCst),
            cycles_failed: self.failed.load(Ordering::SeqCst),
            results_discarded: self.discarded.load(Ordering::SeqCst),
        }
    }

    /// Back to idle for a fresh screen session. Statistics are kept.
    pub fn reset(&self) {
        self.processing.store(false, Ordering::SeqCst);
        *self
            .last_cycle_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.set_phase(Phase::Idle);
    }

    /// Claim the re-entrancy guard. `None` while another cycle holds it.
    pub(crate) fn try_begin(&self) -> Option<ProcessingGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ProcessingGuard { state: self })
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// A throttle or back-off delay has elapsed.
    pub(crate) fn end_wait(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*phase, Phase::Throttled | Phase::BackingOff) {
            *phase = Phase::Idle;
        }
    }

    pub(crate) fn accept_start(&self, now: Instant) -> u64 {
        *self
            .last_cycle_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);
        self.frame_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self) -> u32 {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_throttle(&self) {
        self.throttled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the re-entrancy guard; releases it on drop, including on unwind.
pub(crate) struct ProcessingGuard<'a> {
    state: &'a CycleState,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.state.processing.store(false, Ordering::SeqCst);
    }
}
