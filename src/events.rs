use crate::app::SupervisorState;
use crate::error::EventBusError;
use crate::process::ExitNotice;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How a child exit is treated by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    /// Exit before shutdown was requested, whatever the exit code
    Fatal,
    /// Exit after shutdown was requested
    Expected,
}

/// A reaped child, as observed by the lifecycle monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub service: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub class: ExitClass,
    pub terminated: bool,
    pub forced: bool,
}

impl LifecycleEvent {
    pub fn from_notice(notice: ExitNotice, class: ExitClass) -> Self {
        Self {
            service: notice.service,
            pid: notice.pid,
            exit_code: notice.exit_code,
            signal: notice.signal,
            timestamp: notice.at,
            class,
            terminated: notice.terminated,
            forced: notice.forced,
        }
    }

    /// Whether this exit counts as a clean stop.
    ///
    /// Code 0 is clean. Death by the SIGTERM we delivered is clean only when
    /// `signal_exit_is_clean` is set.
    pub fn is_clean(&self, signal_exit_is_clean: bool) -> bool {
        if self.forced {
            return false;
        }
        match (self.exit_code, self.signal) {
            (Some(0), _) => true,
            (None, Some(signal)) => {
                signal_exit_is_clean && self.terminated && signal == libc::SIGTERM
            }
            _ => false,
        }
    }

    /// "code 3", "signal 9" or "unknown status"
    pub fn status_label(&self) -> String {
        status_label(self.exit_code, self.signal)
    }
}

pub(crate) fn status_label(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("code {}", code),
        (None, Some(signal)) => format!("signal {}", signal),
        (None, None) => "unknown status".to_string(),
    }
}

/// Events published while the supervisor runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// The supervisor moved to a new lifecycle state
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    /// A service process was spawned
    ServiceLaunched { service: String, pid: u32, port: u16 },
    /// A service could not be started
    LaunchFailed { service: String, cause: String },
    /// A child process was reaped
    ServiceExited(LifecycleEvent),
    /// Coordinated shutdown began
    ShutdownTriggered { reason: String },
    /// A shutdown trigger arrived after shutdown had already begun
    TriggerIgnored { reason: String },
    /// Graceful termination was requested from these services
    TerminationBroadcast { targets: Vec<String> },
    /// A service outlived the grace period and was force-killed
    ForcedKill { service: String },
    /// The supervisor finished
    Stopped { exit_code: i32 },
}

impl SupervisorEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SupervisorEvent::StateChanged { from, to } => {
                format!("Supervisor state {} -> {}", from, to)
            }
            SupervisorEvent::ServiceLaunched { service, pid, port } => {
                format!("{} launched (pid {}, port {})", service, pid, port)
            }
            SupervisorEvent::LaunchFailed { service, cause } => {
                format!("{} failed to launch: {}", service, cause)
            }
            SupervisorEvent::ServiceExited(event) => {
                format!(
                    "{} exited with {} ({:?})",
                    event.service,
                    event.status_label(),
                    event.class
                )
            }
            SupervisorEvent::ShutdownTriggered { reason } => {
                format!("Shutdown triggered: {}", reason)
            }
            SupervisorEvent::TriggerIgnored { reason } => {
                format!("Shutdown already in progress, ignored: {}", reason)
            }
            SupervisorEvent::TerminationBroadcast { targets } => {
                format!("Termination requested from {} services", targets.len())
            }
            SupervisorEvent::ForcedKill { service } => {
                format!("{} force-killed after the grace period", service)
            }
            SupervisorEvent::Stopped { exit_code } => {
                format!("Supervisor stopped with exit code {}", exit_code)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SupervisorEvent::StateChanged { .. } => "state_changed",
            SupervisorEvent::ServiceLaunched { .. } => "service_launched",
            SupervisorEvent::LaunchFailed { .. } => "launch_failed",
            SupervisorEvent::ServiceExited(_) => "service_exited",
            SupervisorEvent::ShutdownTriggered { .. } => "shutdown_triggered",
            SupervisorEvent::TriggerIgnored { .. } => "trigger_ignored",
            SupervisorEvent::TerminationBroadcast { .. } => "termination_broadcast",
            SupervisorEvent::ForcedKill { .. } => "forced_kill",
            SupervisorEvent::Stopped { .. } => "stopped",
        }
    }

    /// The service an event is about, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            SupervisorEvent::ServiceLaunched { service, .. }
            | SupervisorEvent::LaunchFailed { service, .. }
            | SupervisorEvent::ForcedKill { service } => Some(service),
            SupervisorEvent::ServiceExited(event) => Some(&event.service),
            _ => None,
        }
    }
}

/// Broadcast channel for observing the supervisor from the outside
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Returns how many received it;
    /// having no subscribers is not an error.
    pub fn publish(&self, event: SupervisorEvent) -> usize {
        match &event {
            SupervisorEvent::LaunchFailed { service, cause } => {
                error!("Failed to launch {}: {}", service, cause);
            }
            SupervisorEvent::ShutdownTriggered { reason } => {
                info!("Shutdown triggered: {}", reason);
            }
            SupervisorEvent::ForcedKill { service } => {
                warn!("{} did not stop within the grace period, force killing", service);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events about specific services
    Services(Vec<String>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SupervisorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Services(services) => event
                .service()
                .map(|service| services.iter().any(|s| s == service))
                .unwrap_or(false),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SupervisorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<SupervisorEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SupervisorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain every filtered event that is already queued
    pub fn drain(&mut self) -> Result<Vec<SupervisorEvent>, EventBusError> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        events.push(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return Ok(events),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged(n));
                }
            }
        }
    }
}
