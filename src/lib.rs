pub mod app;
pub mod child;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod monitor;
pub mod process;
pub mod report;
pub mod spec;

pub use app::{ShutdownHandle, ShutdownReason, Supervisor, SupervisorState};
pub use child::{ChildHandle, ChildState, ChildTable};
pub use config::{ReadinessConfig, ServiceConfig, SupervisorConfig, SupervisorSettings};
pub use coordinator::{CoordinatorState, SignalCoordinator};
pub use error::{LaunchCause, LaunchError, Result, SpecError, SupervisorError};
pub use events::{
    EventBus, EventFilter, EventReceiver, ExitClass, LifecycleEvent, SupervisorEvent,
};
pub use monitor::LifecycleMonitor;
pub use report::{ServiceOutcome, ServiceReport, SupervisorReport};
pub use spec::{load_specs, ReadinessProbe, ServiceSpec};
