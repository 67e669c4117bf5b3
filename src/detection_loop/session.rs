use anyhow::{anyhow, Result};

use super::runner::LoopHandle;
use super::state::LoopStats;
use super::DetectionLoop;

enum SessionState {
    Blurred(DetectionLoop),
    Focused(LoopHandle),
    Closed,
}

/// Detection loop bound to the lifecycle of the camera screen.
///
/// Focus loads the engine (once) and starts the loop; blur stops it and keeps
/// the controller, with its loaded engine, for the next focus. Teardown stops
/// everything for good.
pub struct ScreenSession {
    state: SessionState,
}

impl ScreenSession {
    pub fn new(controller: DetectionLoop) -> Self {
        Self {
            state: SessionState::Blurred(controller),
        }
    }

    pub fn is_focused(&self) -> bool {
        matches!(self.state, SessionState::Focused(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    pub fn stats(&self) -> Option<LoopStats> {
        match &self.state {
            SessionState::Blurred(controller) => Some(controller.state().stats()),
            SessionState::Focused(handle) => Some(handle.stats()),
            SessionState::Closed => None,
        }
    }

    /// Handle of the running loop while focused.
    pub fn handle(&self) -> Option<&LoopHandle> {
        match &self.state {
            SessionState::Focused(handle) => Some(handle),
            _ => None,
        }
    }

    /// Screen gained focus. A no-op when already focused.
    ///
    /// When the engine fails to load or the loop thread cannot be started the
    /// session stays blurred and the error is returned.
    pub fn on_focus(&mut self) -> Result<()> {
        self.focus_with(DetectionLoop::try_spawn)
    }

    fn focus_with(
        &mut self,
        spawn: impl FnOnce(DetectionLoop) -> Result<LoopHandle, (DetectionLoop, anyhow::Error)>,
    ) -> Result<()> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Blurred(mut controller) => {
                if let Err(err) = controller.load_engine() {
                    self.state = SessionState::Blurred(controller);
                    return Err(err);
                }
                match spawn(controller) {
                    Ok(handle) => {
                        self.state = SessionState::Focused(handle);
                        Ok(())
                    }
                    Err((controller, err)) => {
                        self.state = SessionState::Blurred(controller);
                        Err(err)
                    }
                }
            }
            focused @ SessionState::Focused(_) => {
                self.state = focused;
                Ok(())
            }
            SessionState::Closed => Err(anyhow!("screen session already torn down")),
        }
    }

    /// Screen lost focus. A no-op when not focused.
    pub fn on_blur(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Focused(handle) => {
                let controller = handle.stop()?;
                self.state = SessionState::Blurred(controller);
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Screen torn down; the session cannot be focused again.
    pub fn teardown(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Focused(handle) => handle.stop().map(|_| ()),
            SessionState::Blurred(_) | SessionState::Closed => Ok(()),
        }
    }
}
