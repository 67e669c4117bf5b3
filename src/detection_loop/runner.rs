use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::state::{CycleState, LoopStats, Phase};
use super::DetectionLoop;

/// Cancellation flag plus the wake-up signal of the loop thread.
///
/// Cancelling wakes a sleeping loop right away; a cycle already in flight
/// runs to completion and its result is dropped. A publish that already
/// started finishes before `cancel` returns, and none starts afterwards.
/// Sinks must not cancel the loop that is publishing to them.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Signal>,
}

#[derive(Debug, Default)]
struct Signal {
    cancelled: AtomicBool,
    publish_gate: Mutex<()>,
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        drop(
            self.inner
                .publish_gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.wake();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Run `publish` unless cancelled, holding off `cancel` until it is done.
    /// Returns false when the publish was skipped.
    pub(crate) fn publish_unless_cancelled(&self, publish: impl FnOnce()) -> bool {
        let _gate = self
            .inner
            .publish_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return false;
        }
        publish();
        true
    }

    pub(crate) fn wake(&self) {
        let mut woken = self
            .inner
            .woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *woken = true;
        self.inner.condvar.notify_all();
    }

    /// Sleep for `delay` or until woken. Returns false once cancelled.
    pub(crate) fn wait(&self, delay: Duration) -> bool {
        let woken = self
            .inner
            .woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut woken, _) = self
            .inner
            .condvar
            .wait_timeout_while(woken, delay, |woken| !*woken)
            .unwrap_or_else(PoisonError::into_inner);
        *woken = false;
        !self.is_cancelled()
    }
}

/// Handle on a running detection loop.
///
/// Dropping the handle cancels the loop without waiting for the thread; use
/// [`LoopHandle::stop`] to get the controller back.
#[derive(Debug)]
pub struct LoopHandle {
    cancel: CancelToken,
    state: Arc<CycleState>,
    join: Option<JoinHandle<Option<DetectionLoop>>>,
}

impl LoopHandle {
    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.state.stats()
    }

    pub fn is_running(&self) -> bool {
        self.join
            .as_ref()
            .map(|join| !join.is_finished())
            .unwrap_or(false)
    }

    /// Ask for a cycle now instead of after the scheduled delay.
    ///
    /// Dropped (returns false) while a cycle is in flight or after
    /// cancellation. An accepted trigger is still subject to throttling.
    pub fn trigger(&self) -> bool {
        if self.cancel.is_cancelled() || self.state.is_processing() {
            return false;
        }
        self.cancel.wake();
        true
    }

    /// Cancel, wait for an in-flight cycle to finish, and hand the controller
    /// back with its cycle state reset to idle.
    pub fn stop(mut self) -> Result<DetectionLoop> {
        self.cancel.cancel();
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("detection loop already stopped"))?;
        let controller = join
            .join()
            .map_err(|_| anyhow!("detection loop thread panicked"))?
            .ok_or_else(|| anyhow!("detection loop thread exited without its controller"))?;
        controller.state.reset();
        Ok(controller)
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for DetectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionLoop")
            .field("camera", &self.camera.describe())
            .field("engine", &self.engine.name())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Thread body handed to the spawner; yields the controller back on exit.
pub(crate) type LoopBody = Box<dyn FnOnce() -> Option<DetectionLoop> + Send>;

impl DetectionLoop {
    /// Start the repeating task on a dedicated thread.
    ///
    /// Each spawn gets a fresh cancellation token and idle cycle state.
    pub fn spawn(self) -> Result<LoopHandle> {
        self.try_spawn().map_err(|(_, err)| err)
    }

    /// Like [`DetectionLoop::spawn`], but hands the controller back when the
    /// thread cannot be started.
    pub fn try_spawn(self) -> Result<LoopHandle, (DetectionLoop, anyhow::Error)> {
        self.start(|body| {
            std::thread::Builder::new()
                .name("detection-loop".into())
                .spawn(body)
        })
    }

    pub(crate) fn start<S>(
        mut self,
        spawn: S,
    ) -> Result<LoopHandle, (DetectionLoop, anyhow::Error)>
    where
        S: FnOnce(LoopBody) -> std::io::Result<JoinHandle<Option<DetectionLoop>>>,
    {
        let cancel = CancelToken::new();
        self.install_cancel(cancel.clone());
        self.state.reset();
        let state = self.state.clone();

        // The controller only moves to the thread once it is running.
        let (tx, rx) = mpsc::channel::<DetectionLoop>();
        let body: LoopBody = Box::new(move || {
            let mut controller = rx.recv().ok()?;
            controller.run_until_cancelled();
            Some(controller)
        });
        let join = match spawn(body) {
            Ok(join) => join,
            Err(err) => {
                let err =
                    anyhow::Error::new(err).context("failed to spawn detection loop thread");
                return Err((self, err));
            }
        };
        if let Err(mpsc::SendError(controller)) = tx.send(self) {
            return Err((
                controller,
                anyhow!("detection loop thread exited before start"),
            ));
        }
        Ok(LoopHandle {
            cancel,
            state,
            join: Some(join),
        })
    }

    fn run_until_cancelled(&mut self) {
        log::info!(
            "detection loop started: camera={} engine={}",
            self.camera.describe(),
            self.engine.name()
        );
        loop {
            let outcome = self.run_cycle();
            let Some(delay) = outcome.next_delay() else {
                break;
            };
            if !self.cancel.wait(delay) {
                break;
            }
            self.state.end_wait();
        }
        self.state.set_phase(Phase::Stopped);
        let stats = self.state.stats();
        log::info!(
            "detection loop stopped: completed={} throttled={} failed={} discarded={}",
            stats.cycles_completed,
            stats.cycles_throttled,
            stats.cycles_failed,
            stats.results_discarded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedEngine;
    use crate::ingest::StubCamera;
    use crate::sink::LatestBatch;
    use std::time::Instant;

    #[test]
    fn cancel_wakes_a_long_wait() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let join = std::thread::spawn(move || waiter.wait(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(!join.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wake_ends_wait_without_cancelling() {
        let token = CancelToken::new();
        token.wake();
        assert!(token.wait(Duration::from_secs(30)));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn wait_times_out() {
        let token = CancelToken::new();
        assert!(token.wait(Duration::from_millis(5)));
    }

    #[test]
    fn failed_spawn_hands_the_controller_back() {
        let mut ctl = DetectionLoop::new(
            Box::new(StubCamera::new("stub://unit")),
            Box::new(ScriptedEngine::default()),
            Arc::new(LatestBatch::new()),
        );
        ctl.load_engine().unwrap();

        let (ctl, err) = ctl
            .start(|_| Err(std::io::Error::new(std::io::ErrorKind::Other, "no threads left")))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no threads left"));
        assert!(ctl.engine_ready());
        assert!(!ctl.cancel_token().is_cancelled());
    }
}
