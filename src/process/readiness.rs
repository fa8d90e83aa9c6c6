use crate::spec::ReadinessProbe;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Connect attempts give up after this long
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of waiting for a service to come up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// The service has no readiness probe
    NotProbed,
    /// The probe succeeded
    Ready,
    /// The probe did not succeed within the timeout
    TimedOut,
    /// The child exited while the probe was running
    Exited,
}

/// Whether something on this host is accepting TCP connections on `port`
pub async fn is_accepting(port: u16) -> bool {
    matches!(
        timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Run the readiness probe for a freshly spawned child.
///
/// Bounded by `probe_timeout`, and cut short as soon as `exited` reports the
/// child is gone.
pub async fn probe_readiness(
    probe: ReadinessProbe,
    port: u16,
    probe_timeout: Duration,
    poll_interval: Duration,
    mut exited: watch::Receiver<bool>,
) -> ReadinessOutcome {
    match probe {
        ReadinessProbe::None => ReadinessOutcome::NotProbed,
        ReadinessProbe::Delay(delay) => {
            tokio::select! {
                _ = sleep(delay) => ReadinessOutcome::Ready,
                Ok(_) = exited.wait_for(|gone| *gone) => ReadinessOutcome::Exited,
            }
        }
        ReadinessProbe::TcpConnect => {
            let deadline = Instant::now() + probe_timeout;
            let poll = async {
                let mut attempts = 0u32;
                loop {
                    attempts += 1;
                    if is_accepting(port).await {
                        debug!("Port {} accepted a connection after {} attempts", port, attempts);
                        return ReadinessOutcome::Ready;
                    }
                    if Instant::now() + poll_interval >= deadline {
                        return ReadinessOutcome::TimedOut;
                    }
                    sleep(poll_interval).await;
                }
            };

            tokio::select! {
                outcome = timeout(probe_timeout, poll) => outcome.unwrap_or(ReadinessOutcome::TimedOut),
                Ok(_) = exited.wait_for(|gone| *gone) => ReadinessOutcome::Exited,
            }
        }
    }
}
