use super::{Supervisor, SupervisorState};
use crate::error::Result;
use crate::events::SupervisorEvent;
use crate::process::{started_state, ReadinessReport};
use tracing::{debug, info, warn};

impl Supervisor {
    /// Launch every service in the table.
    ///
    /// Children are spawned concurrently and enter the child table as soon
    /// as they exist; readiness probes run on their own tasks. Until every
    /// probe has settled the control loop keeps serving exits and shutdown
    /// triggers, so a crash or an interrupt during startup moves straight to
    /// `ShuttingDown` and reaches every child spawned so far.
    ///
    /// Launch failures are recorded and never stop the other services.
    /// Returns once the supervisor is `Running` or shutting down. With no
    /// child at all it stays in `Launching` and [`run`](Supervisor::run)
    /// shuts down straight away.
    pub async fn launch(&mut self) -> Result<()> {
        self.transition(SupervisorState::Launching)?;
        info!("Launching {} services", self.specs.len());

        let outcome = self.launcher.launch_all(&self.specs).await;

        for child in outcome.launched {
            self.event_bus.publish(SupervisorEvent::ServiceLaunched {
                service: child.handle.service.clone(),
                pid: child.handle.pid,
                port: child.handle.port,
            });
            self.monitor.track(&child.handle.service);

            if child.readiness.is_none() {
                if let Some(spec) = self
                    .specs
                    .iter()
                    .find(|spec| spec.name == child.handle.service)
                {
                    self.launcher.watch_readiness(
                        spec,
                        child.control.exit_watch(),
                        self.readiness_tx.clone(),
                        self.cancellation_token.clone(),
                    );
                }
            }
            self.children.insert(child.handle, child.control);
        }

        for failure in outcome.failures {
            self.event_bus.publish(SupervisorEvent::LaunchFailed {
                service: failure.service.clone(),
                cause: failure.cause.to_string(),
            });
            self.launch_failures.push(failure);
        }

        if self.children.is_empty() {
            warn!("No service could be launched");
            return Ok(());
        }

        self.enter_running_once_started()?;
        self.await_launch().await
    }

    /// Record a settled readiness probe
    pub(super) fn settle_readiness(&mut self, report: ReadinessReport) -> Result<()> {
        if !self
            .children
            .mark_started(&report.service, started_state(report.outcome))
        {
            debug!(
                "Readiness of {} settled after it left starting",
                report.service
            );
        }
        self.enter_running_once_started()
    }

    fn enter_running_once_started(&mut self) -> Result<()> {
        if self.state == SupervisorState::Launching && self.children.all_started() {
            self.transition(SupervisorState::Running)?;
            self.log_summary();
        }
        Ok(())
    }

    /// Print where each launched service can be reached
    fn log_summary(&self) {
        info!(
            "{} of {} services started",
            self.children.len(),
            self.specs.len()
        );
        info!("Application URLs:");
        for spec in &self.specs {
            let Some(handle) = self.children.get(&spec.name) else {
                continue;
            };
            match &spec.description {
                Some(description) => info!(
                    "  {} ({}) -> {} - {}",
                    spec.name,
                    handle.state,
                    spec.url(),
                    description
                ),
                None => info!("  {} ({}) -> {}", spec.name, handle.state, spec.url()),
            }
        }
        if !self.launch_failures.is_empty() {
            warn!(
                "{} services failed to launch: {}",
                self.launch_failures.len(),
                self.launch_failures
                    .iter()
                    .map(|failure| failure.service.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        info!("Press Ctrl+C to stop all services");
    }
}
