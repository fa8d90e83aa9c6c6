use serde::Serialize;
use std::fmt;

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    ShuttingDown,
    Stopped,
}

impl SupervisorState {
    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, Launching)
                | (Launching, Running)
                | (Launching, ShuttingDown)
                | (Running, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Launching => "launching",
            SupervisorState::Running => "running",
            SupervisorState::ShuttingDown => "shutting down",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Why shutdown started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM delivered to the supervisor
    Signal(String),
    /// A child exited before any shutdown was requested
    FatalChildExit { service: String, status: String },
    /// No service could be launched
    NothingLaunched,
    /// Requested through a [`ShutdownHandle`](super::ShutdownHandle)
    UserRequest,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::FatalChildExit { service, status } => {
                write!(f, "{} exited unexpectedly with {}", service, status)
            }
            ShutdownReason::NothingLaunched => f.write_str("no service could be launched"),
            ShutdownReason::UserRequest => f.write_str("shutdown requested"),
        }
    }
}
