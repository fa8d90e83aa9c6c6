use super::types::{ShutdownReason, SupervisorState};
use crate::child::ChildTable;
use crate::config::{SupervisorConfig, SupervisorSettings};
use crate::coordinator::SignalCoordinator;
use crate::error::{LaunchError, Result};
use crate::events::{EventBus, LifecycleEvent, SupervisorEvent};
use crate::monitor::LifecycleMonitor;
use crate::process::{ProcessLauncher, ReadinessReport};
use crate::spec::{load_specs, validate_specs, ServiceSpec};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_BUS_CAPACITY: usize = 256;

/// Launches the service table and supervises it until every child is gone
pub struct Supervisor {
    pub(super) settings: SupervisorSettings,
    pub(super) specs: Vec<ServiceSpec>,
    pub(super) state: SupervisorState,
    pub(super) event_bus: Arc<EventBus>,

    // Children
    pub(super) launcher: ProcessLauncher,
    pub(super) children: ChildTable,
    pub(super) launch_failures: Vec<LaunchError>,
    pub(super) exits: Vec<LifecycleEvent>,
    pub(super) readiness_tx: mpsc::UnboundedSender<ReadinessReport>,
    pub(super) readiness_rx: mpsc::UnboundedReceiver<ReadinessReport>,

    // Lifecycle management
    pub(super) monitor: LifecycleMonitor,
    pub(super) coordinator: SignalCoordinator,
    pub(super) triggers_tx: mpsc::UnboundedSender<ShutdownReason>,
    pub(super) triggers_rx: mpsc::UnboundedReceiver<ShutdownReason>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) run_id: Uuid,
}

/// Cloneable handle for requesting shutdown from outside the supervisor
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    triggers: mpsc::UnboundedSender<ShutdownReason>,
}

impl ShutdownHandle {
    /// Returns false once the supervisor has gone away
    pub fn request(&self, reason: ShutdownReason) -> bool {
        self.triggers.send(reason).is_ok()
    }

    /// Same as an interactive Ctrl+C
    pub fn interrupt(&self) -> bool {
        self.request(ShutdownReason::Signal("SIGINT".to_string()))
    }
}

impl Supervisor {
    /// Validate the configuration and build the service table. Fails before
    /// anything is spawned when the table is unusable.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let specs = load_specs(&config)?;
        Self::with_specs(specs, config.supervisor)
    }

    pub fn with_specs(specs: Vec<ServiceSpec>, settings: SupervisorSettings) -> Result<Self> {
        validate_specs(&specs)?;

        let event_bus = Arc::new(if tracing::enabled!(tracing::Level::DEBUG) {
            EventBus::with_debug_logging(EVENT_BUS_CAPACITY)
        } else {
            EventBus::new(EVENT_BUS_CAPACITY)
        });
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (triggers_tx, triggers_rx) = mpsc::unbounded_channel();
        let (readiness_tx, readiness_rx) = mpsc::unbounded_channel();

        let coordinator = SignalCoordinator::new(settings.grace_period(), (*event_bus).clone());
        let monitor = LifecycleMonitor::new(exit_rx, coordinator.subscribe());
        let launcher = ProcessLauncher::new(settings.clone(), exit_tx);

        Ok(Self {
            settings,
            specs,
            state: SupervisorState::Idle,
            event_bus,
            launcher,
            children: ChildTable::new(),
            launch_failures: Vec::new(),
            exits: Vec::new(),
            readiness_tx,
            readiness_rx,
            monitor,
            coordinator,
            triggers_tx,
            triggers_rx,
            cancellation_token: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn specs(&self) -> &[ServiceSpec] {
        &self.specs
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn children(&self) -> &ChildTable {
        &self.children
    }

    pub fn launch_failures(&self) -> &[LaunchError] {
        &self.launch_failures
    }

    pub fn coordinator(&self) -> &SignalCoordinator {
        &self.coordinator
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Observe supervisor events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_bus.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            triggers: self.triggers_tx.clone(),
        }
    }
}
