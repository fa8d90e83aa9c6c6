//! Final run report and process exit code.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

/// Every service launched and stopped cleanly
pub const EXIT_OK: i32 = 0;
/// The supervisor itself failed
pub const EXIT_INTERNAL: i32 = 1;
/// At least one service could not be launched
pub const EXIT_LAUNCH_FAILURE: i32 = 2;
/// A service exited before shutdown was requested
pub const EXIT_FATAL_CHILD: i32 = 3;
/// A service had to be force-killed
pub const EXIT_FORCED_KILL: i32 = 4;
/// A service stopped with a non-zero status during shutdown
pub const EXIT_UNCLEAN_STOP: i32 = 5;
/// Unusable configuration or service table (EX_CONFIG)
pub const EXIT_CONFIG: i32 = 78;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceOutcome {
    NeverStarted { cause: String },
    StoppedCleanly { status: String },
    StoppedWithError { status: String },
    Crashed { status: String },
    ForcedKill,
}

impl ServiceOutcome {
    pub fn label(&self) -> String {
        match self {
            ServiceOutcome::NeverStarted { cause } => format!("never started: {}", cause),
            ServiceOutcome::StoppedCleanly { status } => format!("stopped cleanly ({})", status),
            ServiceOutcome::StoppedWithError { status } => {
                format!("stopped with error ({})", status)
            }
            ServiceOutcome::Crashed { status } => format!("crashed ({})", status),
            ServiceOutcome::ForcedKill => "force-killed after grace period".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub outcome: ServiceOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorReport {
    pub run_id: Uuid,
    pub shutdown_reason: Option<String>,
    pub shutdown_requested_at: Option<DateTime<Utc>>,
    pub grace_period_ms: u64,
    pub termination_broadcasts: u32,
    pub ignored_triggers: u32,
    pub services: Vec<ServiceReport>,
}

impl SupervisorReport {
    fn any(&self, predicate: impl Fn(&ServiceOutcome) -> bool) -> bool {
        self.services.iter().any(|service| predicate(&service.outcome))
    }

    pub fn launch_failures(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services
            .iter()
            .filter(|service| matches!(service.outcome, ServiceOutcome::NeverStarted { .. }))
    }

    pub fn forced_kills(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services
            .iter()
            .filter(|service| service.outcome == ServiceOutcome::ForcedKill)
    }

    /// Exit code for the supervisor process.
    ///
    /// A crash outranks a launch failure, which outranks a forced kill, which
    /// outranks an unclean stop.
    pub fn exit_code(&self) -> i32 {
        if self.any(|o| matches!(o, ServiceOutcome::Crashed { .. })) {
            EXIT_FATAL_CHILD
        } else if self.any(|o| matches!(o, ServiceOutcome::NeverStarted { .. })) {
            EXIT_LAUNCH_FAILURE
        } else if self.any(|o| *o == ServiceOutcome::ForcedKill) {
            EXIT_FORCED_KILL
        } else if self.any(|o| matches!(o, ServiceOutcome::StoppedWithError { .. })) {
            EXIT_UNCLEAN_STOP
        } else {
            EXIT_OK
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == EXIT_OK
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Stackvisor run {}", self.run_id);
        if let Some(reason) = &self.shutdown_reason {
            let _ = writeln!(out, "Shutdown reason: {}", reason);
        }
        if self.ignored_triggers > 0 {
            let _ = writeln!(
                out,
                "Ignored {} further shutdown request(s)",
                self.ignored_triggers
            );
        }

        let width = self
            .services
            .iter()
            .map(|service| service.name.len())
            .max()
            .unwrap_or(0);
        for service in &self.services {
            let pid = service
                .pid
                .map(|pid| format!("pid {}", pid))
                .unwrap_or_else(|| "no pid".to_string());
            let _ = writeln!(
                out,
                "  {:<width$}  port {:<5}  {:<10}  {}",
                service.name,
                service.port,
                pid,
                service.outcome.label(),
                width = width
            );
        }

        let _ = writeln!(out, "Exit code: {}", self.exit_code());
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
