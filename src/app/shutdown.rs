use super::{Supervisor, SupervisorState};
use crate::error::Result;
use crate::events::{ExitClass, SupervisorEvent};
use crate::report::{ServiceOutcome, ServiceReport, SupervisorReport};
use crate::spec::ServiceSpec;
use tracing::info;

impl Supervisor {
    /// Called once the coordinator is done: stop background tasks, move to
    /// `Stopped`, and summarise the run.
    pub(super) fn finish(&mut self) -> Result<SupervisorReport> {
        self.cancellation_token.cancel();
        self.transition(SupervisorState::Stopped)?;

        let report = self.build_report();
        let exit_code = report.exit_code();
        self.event_bus
            .publish(SupervisorEvent::Stopped { exit_code });

        info!("Supervisor stopped with exit code {}", exit_code);
        Ok(report)
    }

    /// Report for the current state of the run, one entry per service in
    /// table order
    pub fn build_report(&self) -> SupervisorReport {
        let services = self
            .specs
            .iter()
            .map(|spec| self.service_report(spec))
            .collect();

        SupervisorReport {
            run_id: self.run_id,
            shutdown_reason: self.coordinator.reason().map(|reason| reason.to_string()),
            shutdown_requested_at: self.coordinator.requested_at(),
            grace_period_ms: self.settings.grace_period_ms,
            termination_broadcasts: self.coordinator.broadcasts(),
            ignored_triggers: self.coordinator.ignored_triggers(),
            services,
        }
    }

    fn service_report(&self, spec: &ServiceSpec) -> ServiceReport {
        let mut report = ServiceReport {
            name: spec.name.clone(),
            port: spec.port,
            pid: None,
            started_at: None,
            exited_at: None,
            outcome: ServiceOutcome::NeverStarted {
                cause: "not launched".to_string(),
            },
        };

        if let Some(failure) = self
            .launch_failures
            .iter()
            .find(|failure| failure.service == spec.name)
        {
            report.outcome = ServiceOutcome::NeverStarted {
                cause: failure.cause.to_string(),
            };
            return report;
        }

        let Some(handle) = self.children.get(&spec.name) else {
            return report;
        };
        report.pid = Some(handle.pid);
        report.started_at = Some(handle.started_at);
        report.exited_at = handle.exited_at;

        let Some(exit) = self.exits.iter().find(|exit| exit.service == spec.name) else {
            report.outcome = ServiceOutcome::StoppedWithError {
                status: "still running".to_string(),
            };
            return report;
        };

        let status = exit.status_label();
        report.outcome = if exit.forced {
            ServiceOutcome::ForcedKill
        } else if exit.class == ExitClass::Fatal {
            ServiceOutcome::Crashed { status }
        } else if exit.is_clean(self.settings.signal_exit_is_clean) {
            ServiceOutcome::StoppedCleanly { status }
        } else {
            ServiceOutcome::StoppedWithError { status }
        };
        report
    }
}
