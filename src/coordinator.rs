//! Coordinated shutdown.
//!
//! The coordinator honours exactly one shutdown trigger per run. The first
//! trigger broadcasts graceful termination to every live child and starts
//! the grace period; later triggers only bump a counter. Children still alive
//! when the grace period ends are force-killed.
//!
//! ```text
//! Armed -> Broadcasting -> Waiting -> Escalating -> Done
//!                             \__________________/-> Done
//! ```

use crate::app::ShutdownReason;
use crate::child::ChildTable;
use crate::events::{EventBus, SupervisorEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// No trigger received yet
    Armed,
    /// Sending graceful termination to live children
    Broadcasting,
    /// Grace period running
    Waiting,
    /// Grace period over, stragglers force-killed
    Escalating,
    /// Every child has been reaped
    Done,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CoordinatorState::Armed => "armed",
            CoordinatorState::Broadcasting => "broadcasting",
            CoordinatorState::Waiting => "waiting",
            CoordinatorState::Escalating => "escalating",
            CoordinatorState::Done => "done",
        };
        f.write_str(label)
    }
}

pub struct SignalCoordinator {
    state: CoordinatorState,
    grace_period: Duration,
    reason: Option<ShutdownReason>,
    requested: watch::Sender<Option<Instant>>,
    requested_at: Option<DateTime<Utc>>,
    deadline: Option<Instant>,
    broadcasts: u32,
    ignored_triggers: u32,
    escalated: Vec<String>,
    event_bus: EventBus,
}

impl SignalCoordinator {
    pub fn new(grace_period: Duration, event_bus: EventBus) -> Self {
        let (requested, _) = watch::channel(None);
        Self {
            state: CoordinatorState::Armed,
            grace_period,
            reason: None,
            requested,
            requested_at: None,
            deadline: None,
            broadcasts: 0,
            ignored_triggers: 0,
            escalated: Vec::new(),
            event_bus,
        }
    }

    /// Receiver carrying the monotonic moment shutdown was requested
    pub fn subscribe(&self) -> watch::Receiver<Option<Instant>> {
        self.requested.subscribe()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == CoordinatorState::Armed
    }

    pub fn is_done(&self) -> bool {
        self.state == CoordinatorState::Done
    }

    /// The trigger that started shutdown
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.as_ref()
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// How many termination broadcasts have been sent. Never more than one.
    pub fn broadcasts(&self) -> u32 {
        self.broadcasts
    }

    pub fn ignored_triggers(&self) -> u32 {
        self.ignored_triggers
    }

    /// Services that were force-killed
    pub fn escalated(&self) -> &[String] {
        &self.escalated
    }

    /// Start shutdown. Returns false when shutdown had already begun, in
    /// which case nothing is sent and the deadline is left alone.
    pub fn trigger(&mut self, reason: ShutdownReason, children: &ChildTable) -> bool {
        if self.state != CoordinatorState::Armed {
            self.ignored_triggers += 1;
            debug!("Shutdown already {}, ignoring {}", self.state, reason);
            self.event_bus.publish(SupervisorEvent::TriggerIgnored {
                reason: reason.to_string(),
            });
            return false;
        }

        // Recorded before any child is signalled so every exit caused by the
        // broadcast is classified as expected.
        self.requested.send_replace(Some(Instant::now()));
        self.requested_at = Some(Utc::now());
        self.event_bus.publish(SupervisorEvent::ShutdownTriggered {
            reason: reason.to_string(),
        });
        self.reason = Some(reason);

        self.state = CoordinatorState::Broadcasting;
        let targets = children.terminate_live();
        self.broadcasts += 1;
        info!(
            "Requested graceful termination from {} services, grace period {:?}",
            targets.len(),
            self.grace_period
        );
        self.event_bus
            .publish(SupervisorEvent::TerminationBroadcast { targets });

        self.state = CoordinatorState::Waiting;
        self.deadline = Some(Instant::now() + self.grace_period);
        self.settle(children);
        true
    }

    /// Resolves when the grace period runs out. Pending in every other state.
    pub async fn grace_expired(&self) {
        match (self.state, self.deadline) {
            (CoordinatorState::Waiting, Some(deadline)) => sleep_until(deadline).await,
            _ => std::future::pending().await,
        }
    }

    /// Force-kill every child still alive. Returns the services killed.
    pub fn escalate(&mut self, children: &ChildTable) -> Vec<String> {
        if self.state != CoordinatorState::Waiting {
            return Vec::new();
        }

        self.state = CoordinatorState::Escalating;
        self.deadline = None;
        let killed = children.kill_live();
        for service in &killed {
            self.event_bus.publish(SupervisorEvent::ForcedKill {
                service: service.clone(),
            });
        }
        self.escalated.extend(killed.iter().cloned());
        self.settle(children);
        killed
    }

    /// Move to `Done` once every child has been reaped
    pub fn settle(&mut self, children: &ChildTable) {
        let stopping = matches!(
            self.state,
            CoordinatorState::Waiting | CoordinatorState::Escalating
        );
        if stopping && children.all_exited() {
            self.state = CoordinatorState::Done;
            self.deadline = None;
            info!("All services stopped");
        }
    }
}
