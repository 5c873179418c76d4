use crate::{error::SyncError, types::PollLoopState};

/// Tracks `Idle -> Running -> Stopped -> Running` for one client.
#[derive(Debug, Clone, Default)]
pub struct PollStateMachine {
    state: PollLoopState,
}

impl PollStateMachine {
    pub fn state(&self) -> PollLoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PollLoopState::Running
    }

    /// Returns `true` when this call moved the loop to `Running`.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.state = PollLoopState::Running;
        true
    }

    /// Returns `true` when this call moved the loop out of `Running`.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state = PollLoopState::Stopped;
        true
    }

    /// Guard for work that is only valid while polling.
    pub fn ensure_running(&self, action: &str) -> Result<(), SyncError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SyncError::invalid_state(self.state, action))
        }
    }
}
