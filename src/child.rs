//! Runtime records binding a service to an OS process.
//!
//! The [`ChildTable`] is owned by the supervisor. Launch inserts handles and
//! the supervisor's control loop marks them exited when the lifecycle monitor
//! reports a reaped child; nothing else writes to it.

use crate::events::LifecycleEvent;
use crate::process::ChildControl;
use crate::spec::ServiceSpec;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
    /// Spawned, readiness not yet settled
    Starting,
    /// Readiness probe succeeded
    Ready,
    /// Up, without a confirmed readiness signal
    Running,
    /// Reaped
    Exited,
}

impl fmt::Display for ChildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChildState::Starting => "starting",
            ChildState::Ready => "ready",
            ChildState::Running => "running",
            ChildState::Exited => "exited",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildHandle {
    pub service: String,
    pub port: u16,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub state: ChildState,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub exited_at: Option<DateTime<Utc>>,
}

impl ChildHandle {
    pub fn new(spec: &ServiceSpec, pid: u32) -> Self {
        Self {
            service: spec.name.clone(),
            port: spec.port,
            pid,
            started_at: Utc::now(),
            state: ChildState::Starting,
            exit_code: None,
            exit_signal: None,
            exited_at: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state != ChildState::Exited
    }
}

struct ChildEntry {
    handle: ChildHandle,
    control: ChildControl,
}

/// Supervisor-owned set of child handles, in launch order
#[derive(Default)]
pub struct ChildTable {
    entries: Vec<ChildEntry>,
}

impl ChildTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ChildHandle, control: ChildControl) {
        self.entries.push(ChildEntry { handle, control });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, service: &str) -> Option<&ChildHandle> {
        self.entries
            .iter()
            .find(|entry| entry.handle.service == service)
            .map(|entry| &entry.handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = &ChildHandle> {
        self.entries.iter().map(|entry| &entry.handle)
    }

    /// Names of children that have not been reaped yet
    pub fn live_services(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.handle.is_alive())
            .map(|entry| entry.handle.service.clone())
            .collect()
    }

    pub fn all_exited(&self) -> bool {
        self.entries.iter().all(|entry| !entry.handle.is_alive())
    }

    /// No handle is still in `Starting`
    pub fn all_started(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.handle.state != ChildState::Starting)
    }

    /// Settle the readiness of a child still `starting`. Returns false when
    /// the child is unknown or has already moved on (for example, exited).
    pub fn mark_started(&mut self, service: &str, state: ChildState) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.handle.service == service)
        {
            Some(entry) if entry.handle.state == ChildState::Starting => {
                entry.handle.state = state;
                true
            }
            _ => false,
        }
    }

    /// Record a reaped child. Returns the updated handle, or `None` for an
    /// unknown or already-retired service.
    pub fn mark_exited(&mut self, event: &LifecycleEvent) -> Option<&ChildHandle> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.handle.service == event.service && entry.handle.is_alive())?;

        entry.handle.state = ChildState::Exited;
        entry.handle.exit_code = event.exit_code;
        entry.handle.exit_signal = event.signal;
        entry.handle.exited_at = Some(event.timestamp);
        Some(&entry.handle)
    }

    /// Ask every live child to terminate. Returns the services that were asked.
    pub fn terminate_live(&self) -> Vec<String> {
        self.signal_live(ChildControl::terminate)
    }

    /// Force every live child to exit. Returns the services that were killed.
    pub fn kill_live(&self) -> Vec<String> {
        self.signal_live(ChildControl::kill)
    }

    fn signal_live(&self, send: fn(&ChildControl) -> bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.handle.is_alive())
            .filter(|entry| send(&entry.control))
            .map(|entry| entry.handle.service.clone())
            .collect()
    }
}
