//! Stop controller (C2, spec §4.2).
//!
//! Session-local (spec §9 "Global state": not process-global), owned one
//! instance per agent/session. Distinguishes graceful from immediate stop
//! and holds a resumable snapshot of where the loop left off.

use parking_lot::RwLock;
use serde_json::Value;
use wukong_foundation::{StopSnapshot, StopStateView};

/// Parameters of a stop request (spec §4.2 `requestStop`).
#[derive(Debug, Clone, Copy)]
pub struct StopRequest {
    pub graceful: bool,
    pub save_state: bool,
}

impl Default for StopRequest {
    fn default() -> Self {
        Self { graceful: true, save_state: true }
    }
}

#[derive(Debug, Clone, Default)]
struct StopFlags {
    requested: bool,
    graceful: bool,
    save_state: bool,
    confirmed: bool,
    snapshot: Option<StopSnapshot>,
}

/// Implements the graceful-stop protocol from spec §4.2:
///
/// > the loop finishes the current step, calls `confirmStop`, observes
/// > `shouldStop`, and exits with status `stopped`.
///
/// Per the open question in spec §9, the autonomous loop calls
/// `confirm_stop` unconditionally right after every successful step —
/// which means a graceful request always takes effect after the step in
/// progress when it was issued, never later. This implementation preserves
/// that behavior rather than "fixing" it; see `DESIGN.md`.
pub struct StopController {
    flags: RwLock<StopFlags>,
}

impl StopController {
    pub fn new() -> Self {
        Self { flags: RwLock::new(StopFlags::default()) }
    }

    pub fn request_stop(&self, request: StopRequest) {
        let mut flags = self.flags.write();
        flags.requested = true;
        flags.graceful = request.graceful;
        flags.save_state = request.save_state;
        flags.confirmed = false;
        tracing::info!(graceful = request.graceful, save_state = request.save_state, "stop requested");
    }

    pub fn update_state(
        &self,
        session_id: wukong_foundation::SessionId,
        completed_steps: u64,
        last_step_id: Option<wukong_foundation::StepId>,
        partial_result: Option<Value>,
    ) {
        let mut flags = self.flags.write();
        flags.snapshot = Some(StopSnapshot { session_id, completed_steps, last_step_id, partial_result });
    }

    /// Callable only if a stop is requested (spec §4.2); otherwise a no-op.
    pub fn confirm_stop(&self) -> bool {
        let mut flags = self.flags.write();
        if !flags.requested {
            return false;
        }
        flags.confirmed = true;
        true
    }

    pub fn has_stop_request(&self) -> bool {
        self.flags.read().requested
    }

    /// `(requested AND NOT graceful) OR (graceful AND confirmed)` (spec §4.2).
    pub fn should_stop(&self) -> bool {
        let flags = self.flags.read();
        if !flags.requested {
            return false;
        }
        (!flags.graceful) || (flags.graceful && flags.confirmed)
    }

    pub fn get_stop_state(&self) -> StopStateView {
        let flags = self.flags.read();
        let can_resume = flags.snapshot.is_some() && flags.save_state;
        StopStateView { snapshot: flags.snapshot.clone(), can_resume }
    }

    /// Clears all flags; called at loop entry (spec §4.2).
    pub fn reset(&self) {
        *self.flags.write() = StopFlags::default();
    }
}

impl Default for StopController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wukong_foundation::SessionId;

    #[test]
    fn immediate_stop_short_circuits_without_confirmation() {
        let ctl = StopController::new();
        ctl.request_stop(StopRequest { graceful: false, save_state: true });
        assert!(ctl.should_stop());
    }

    #[test]
    fn graceful_stop_requires_confirmation() {
        let ctl = StopController::new();
        ctl.request_stop(StopRequest { graceful: true, save_state: true });
        assert!(!ctl.should_stop());
        ctl.confirm_stop();
        assert!(ctl.should_stop());
    }

    #[test]
    fn confirm_stop_is_noop_without_a_pending_request() {
        let ctl = StopController::new();
        assert!(!ctl.confirm_stop());
        assert!(!ctl.should_stop());
    }

    #[test]
    fn can_resume_requires_both_snapshot_and_save_state() {
        let ctl = StopController::new();
        ctl.request_stop(StopRequest { graceful: true, save_state: false });
        ctl.update_state(SessionId::new(), 3, None, None);
        assert!(!ctl.get_stop_state().can_resume);

        let ctl2 = StopController::new();
        ctl2.request_stop(StopRequest { graceful: true, save_state: true });
        ctl2.update_state(SessionId::new(), 3, None, None);
        assert!(ctl2.get_stop_state().can_resume);
    }

    #[test]
    fn reset_clears_all_flags() {
        let ctl = StopController::new();
        ctl.request_stop(StopRequest { graceful: false, save_state: true });
        ctl.reset();
        assert!(!ctl.has_stop_request());
        assert!(!ctl.should_stop());
    }
}
