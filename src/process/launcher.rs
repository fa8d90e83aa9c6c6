use super::output::{forward_output, OutputStream};
use super::readiness::{is_accepting, probe_readiness, ReadinessOutcome};
use super::watcher::{watch_child, ChildControl, ExitNotice};
use crate::child::{ChildHandle, ChildState};
use crate::config::SupervisorSettings;
use crate::error::{LaunchCause, LaunchError};
use crate::spec::{ReadinessProbe, ServiceSpec};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A successfully spawned service
#[derive(Debug)]
pub struct LaunchedChild {
    pub handle: ChildHandle,
    pub control: ChildControl,
    /// `None` while a readiness probe is still outstanding
    pub readiness: Option<ReadinessOutcome>,
}

/// Everything `launch_all` attempted, split into successes and failures
#[derive(Debug, Default)]
pub struct LaunchOutcome {
    pub launched: Vec<LaunchedChild>,
    pub failures: Vec<LaunchError>,
}

impl LaunchOutcome {
    pub fn attempts(&self) -> usize {
        self.launched.len() + self.failures.len()
    }
}

/// Sent by a background readiness probe once it has settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub service: String,
    pub outcome: ReadinessOutcome,
}

/// Spawns one child per service and hands each to its own watcher task
#[derive(Clone)]
pub struct ProcessLauncher {
    settings: SupervisorSettings,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
}

impl ProcessLauncher {
    /// Exit notices for every launched child are delivered on `exit_tx`
    pub fn new(settings: SupervisorSettings, exit_tx: mpsc::UnboundedSender<ExitNotice>) -> Self {
        Self { settings, exit_tx }
    }

    /// Spawn every spec concurrently without waiting for readiness. A
    /// failure never prevents the others from starting.
    pub async fn launch_all(&self, specs: &[ServiceSpec]) -> LaunchOutcome {
        let results = join_all(specs.iter().map(|spec| self.spawn(spec))).await;

        let mut outcome = LaunchOutcome::default();
        for result in results {
            match result {
                Ok(child) => outcome.launched.push(child),
                Err(e) => {
                    error!("{}", e);
                    outcome.failures.push(e);
                }
            }
        }

        outcome
    }

    /// Spawn a single service and wait for its readiness probe to settle
    pub async fn launch(&self, spec: &ServiceSpec) -> Result<LaunchedChild, LaunchError> {
        let mut child = self.spawn(spec).await?;
        if child.readiness.is_none() {
            let outcome = self.await_readiness(spec, child.control.exit_watch()).await;
            child.handle.state = started_state(outcome);
            child.readiness = Some(outcome);
        }
        Ok(child)
    }

    /// Check the working directory and port, then spawn the child and hand it
    /// to its watcher. A service with no readiness probe comes back `running`;
    /// otherwise it stays `starting` until [`watch_readiness`] reports.
    ///
    /// [`watch_readiness`]: ProcessLauncher::watch_readiness
    pub async fn spawn(&self, spec: &ServiceSpec) -> Result<LaunchedChild, LaunchError> {
        let fail = |cause| LaunchError {
            service: spec.name.clone(),
            port: spec.port,
            cause,
        };

        if !spec.working_dir.is_dir() {
            return Err(fail(LaunchCause::WorkingDirMissing(spec.working_dir.clone())));
        }

        if self.settings.check_ports && is_accepting(spec.port).await {
            return Err(fail(LaunchCause::PortInUse(spec.port)));
        }

        info!("Starting {} on port {}", spec.name, spec.port);
        if let Some(description) = &spec.description {
            debug!("{}: {}", spec.name, description);
        }
        debug!(
            "{}: `{}` in {}",
            spec.name,
            spec.command_line(),
            spec.working_dir.display()
        );

        let mut child = self.build_command(spec).spawn().map_err(|source| {
            fail(LaunchCause::Spawn {
                program: spec.program.clone(),
                source,
            })
        })?;

        let pid = child.id().ok_or_else(|| fail(LaunchCause::NoPid))?;

        if self.settings.forward_output {
            forward_output(spec.name.clone(), OutputStream::Stdout, child.stdout.take());
            forward_output(spec.name.clone(), OutputStream::Stderr, child.stderr.take());
        }

        let mut handle = ChildHandle::new(spec, pid);
        let control = watch_child(spec.name.clone(), pid, child, self.exit_tx.clone());

        let readiness = match spec.readiness {
            ReadinessProbe::None => {
                info!("{} started with pid {}", spec.name, pid);
                handle.state = ChildState::Running;
                Some(ReadinessOutcome::NotProbed)
            }
            _ => None,
        };

        Ok(LaunchedChild {
            handle,
            control,
            readiness,
        })
    }

    /// Probe `spec` on a background task and send the outcome to `reports`.
    /// The probe gives up early when the child exits or `token` is cancelled.
    pub fn watch_readiness(
        &self,
        spec: &ServiceSpec,
        exited: watch::Receiver<bool>,
        reports: mpsc::UnboundedSender<ReadinessReport>,
        token: CancellationToken,
    ) {
        let launcher = self.clone();
        let spec = spec.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = launcher.await_readiness(&spec, exited) => outcome,
            };
            let report = ReadinessReport {
                service: spec.name.clone(),
                outcome,
            };
            if reports.send(report).is_err() {
                debug!("Readiness of {} settled after the supervisor stopped", spec.name);
            }
        });
    }

    async fn await_readiness(
        &self,
        spec: &ServiceSpec,
        exited: watch::Receiver<bool>,
    ) -> ReadinessOutcome {
        let readiness = probe_readiness(
            spec.readiness,
            spec.port,
            self.settings.readiness_timeout(),
            self.settings.readiness_poll_interval(),
            exited,
        )
        .await;

        match readiness {
            ReadinessOutcome::Ready => info!("{} is ready at {}", spec.name, spec.url()),
            ReadinessOutcome::NotProbed => info!("{} started", spec.name),
            ReadinessOutcome::TimedOut => warn!(
                "{} did not accept connections on port {} within {:?}",
                spec.name,
                spec.port,
                self.settings.readiness_timeout()
            ),
            ReadinessOutcome::Exited => warn!("{} exited during startup", spec.name),
        }

        readiness
    }

    fn build_command(&self, spec: &ServiceSpec) -> Command {
        let mut cmd = Command::new(resolve_program(&spec.program, &spec.working_dir));
        cmd.args(spec.resolved_args())
            .current_dir(&spec.working_dir)
            .env(&self.settings.port_env, spec.port.to_string())
            .envs(spec.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.settings.forward_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        // Own process group: terminal interrupts reach only the supervisor,
        // and signals can be sent to the child's whole group.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Handle state once readiness has settled
pub fn started_state(readiness: ReadinessOutcome) -> ChildState {
    match readiness {
        ReadinessOutcome::Ready => ChildState::Ready,
        _ => ChildState::Running,
    }
}

/// Relative programs with a path component are taken relative to the
/// service's working directory; bare names go through `PATH`.
fn resolve_program(program: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        working_dir.join(path)
    } else {
        path.to_path_buf()
    }
}
