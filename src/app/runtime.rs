use super::{ShutdownReason, Supervisor, SupervisorState};
use crate::events::{ExitClass, LifecycleEvent, SupervisorEvent};
use crate::error::Result;
use crate::process::ReadinessReport;
use crate::report::SupervisorReport;
use tracing::{debug, info, warn};

/// One turn of the control loop
enum Step {
    Exited(Option<LifecycleEvent>),
    Ready(ReadinessReport),
    Trigger(ShutdownReason),
    GraceExpired,
}

impl Supervisor {
    /// Launch (if not done yet) and supervise until every child has been
    /// reaped, then return the final report.
    pub async fn run(&mut self) -> Result<SupervisorReport> {
        if self.state == SupervisorState::Idle {
            self.launch().await?;
        }

        if self.children.is_empty() {
            self.request_shutdown(ShutdownReason::NothingLaunched);
        } else {
            info!("Supervising {} services", self.children.len());
        }

        while !self.coordinator.is_done() {
            let step = self.next_step().await;
            self.apply(step)?;
        }

        self.finish()
    }

    /// Serve the control loop until the launch phase is over
    pub(super) async fn await_launch(&mut self) -> Result<()> {
        while self.state == SupervisorState::Launching {
            let step = self.next_step().await;
            self.apply(step)?;
        }
        Ok(())
    }

    async fn next_step(&mut self) -> Step {
        tokio::select! {
            event = self.monitor.next_event() => Step::Exited(event),
            Some(report) = self.readiness_rx.recv() => Step::Ready(report),
            Some(reason) = self.triggers_rx.recv() => Step::Trigger(reason),
            _ = self.coordinator.grace_expired() => Step::GraceExpired,
        }
    }

    fn apply(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Exited(Some(event)) => self.handle_exit(event),
            // Every tracked child has been reaped, and the first of them was fatal
            Step::Exited(None) => self.coordinator.settle(&self.children),
            Step::Ready(report) => self.settle_readiness(report)?,
            Step::Trigger(reason) => self.request_shutdown(reason),
            Step::GraceExpired => {
                warn!(
                    "Grace period expired, still running: {}",
                    self.children.live_services().join(", ")
                );
                let killed = self.coordinator.escalate(&self.children);
                debug!("Escalated to SIGKILL for {:?}", killed);
            }
        }
        Ok(())
    }

    /// Forward SIGINT and SIGTERM to the control loop. Every delivery is
    /// forwarded; the coordinator decides which ones count.
    pub fn install_signal_handlers(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            for (kind, name) in [
                (SignalKind::interrupt(), "SIGINT"),
                (SignalKind::terminate(), "SIGTERM"),
            ] {
                let mut stream = signal(kind)?;
                let triggers = self.triggers_tx.clone();
                let token = self.cancellation_token.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            received = stream.recv() => {
                                if received.is_none() {
                                    break;
                                }
                                info!("Received {}", name);
                                if triggers.send(ShutdownReason::Signal(name.to_string())).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        }

        #[cfg(not(unix))]
        spawn_ctrl_c_forwarder(self.triggers_tx.clone(), self.cancellation_token.clone());

        Ok(())
    }

    fn handle_exit(&mut self, event: LifecycleEvent) {
        if self.children.mark_exited(&event).is_none() {
            warn!("Exit reported for unknown service {}", event.service);
            return;
        }
        self.event_bus
            .publish(SupervisorEvent::ServiceExited(event.clone()));

        let fatal = event.class == ExitClass::Fatal;
        let reason = ShutdownReason::FatalChildExit {
            service: event.service.clone(),
            status: event.status_label(),
        };
        self.exits.push(event);

        if fatal {
            self.request_shutdown(reason);
        }
        self.coordinator.settle(&self.children);
    }

    pub(super) fn request_shutdown(&mut self, reason: ShutdownReason) {
        if !self.coordinator.trigger(reason, &self.children) {
            return;
        }
        if let Err(e) = self.transition(SupervisorState::ShuttingDown) {
            warn!("{}", e);
        }
    }
}

#[cfg(not(unix))]
fn spawn_ctrl_c_forwarder(
    triggers: tokio::sync::mpsc::UnboundedSender<ShutdownReason>,
    token: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = tokio::signal::ctrl_c() => {
                    if received.is_err() {
                        break;
                    }
                    info!("Received Ctrl+C");
                    if triggers.send(ShutdownReason::Signal("SIGINT".to_string())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
