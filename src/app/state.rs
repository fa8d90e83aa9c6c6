use super::{Supervisor, SupervisorState};
use crate::error::{Result, SupervisorError};
use crate::events::SupervisorEvent;
use tracing::debug;

impl Supervisor {
    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Move to `next`, publishing the change. `Running` additionally requires
    /// that no child is still starting.
    pub(super) fn transition(&mut self, next: SupervisorState) -> Result<()> {
        let from = self.state;
        let blocked = next == SupervisorState::Running && !self.children.all_started();

        if !from.can_transition_to(next) || blocked {
            return Err(SupervisorError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        self.state = next;
        debug!("Supervisor state changed: {} -> {}", from, next);
        self.event_bus
            .publish(SupervisorEvent::StateChanged { from, to: next });
        Ok(())
    }
}
