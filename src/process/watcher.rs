//! One watcher task per child.
//!
//! The watcher owns the OS child object, so it is the only place that reaps
//! the process and the only place that signals it. Signals are therefore
//! never delivered to a pid that has already been reaped and reused.

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Requests the supervisor can make of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSignal {
    /// Graceful termination (SIGTERM to the child's process group)
    Terminate,
    /// Forced termination (SIGKILL to the child's process group)
    Kill,
}

/// Emitted exactly once per child, after it has been reaped
#[derive(Debug, Clone)]
pub struct ExitNotice {
    pub service: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
    /// Terminating signal, when the child was killed by one
    pub signal: Option<i32>,
    pub at: DateTime<Utc>,
    /// Monotonic reap time, used to order the exit against a shutdown request
    pub reaped: Instant,
    /// A graceful termination request was delivered before exit
    pub terminated: bool,
    /// A forced kill was delivered before exit
    pub forced: bool,
}

/// Signal access to a running child
#[derive(Debug)]
pub struct ChildControl {
    service: String,
    pid: u32,
    signals: mpsc::UnboundedSender<ChildSignal>,
    exited: watch::Receiver<bool>,
}

impl ChildControl {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Ask the child to exit. Returns false if the watcher is already gone.
    pub fn terminate(&self) -> bool {
        self.send(ChildSignal::Terminate)
    }

    /// Force the child to exit. Returns false if the watcher is already gone.
    pub fn kill(&self) -> bool {
        self.send(ChildSignal::Kill)
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// A receiver that flips to `true` once the child has been reaped
    pub fn exit_watch(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }

    fn send(&self, signal: ChildSignal) -> bool {
        if self.has_exited() {
            return false;
        }
        self.signals.send(signal).is_ok()
    }
}

/// Hand `child` to a dedicated watcher task and return its control handle
pub(crate) fn watch_child(
    service: String,
    pid: u32,
    child: Child,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) -> ChildControl {
    let (signals_tx, signals_rx) = mpsc::unbounded_channel();
    let (exited_tx, exited_rx) = watch::channel(false);

    tokio::spawn(run_watcher(
        service.clone(),
        pid,
        child,
        signals_rx,
        exited_tx,
        exit_tx,
    ));

    ChildControl {
        service,
        pid,
        signals: signals_tx,
        exited: exited_rx,
    }
}

async fn run_watcher(
    service: String,
    pid: u32,
    mut child: Child,
    mut signals_rx: mpsc::UnboundedReceiver<ChildSignal>,
    exited_tx: watch::Sender<bool>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) {
    let mut terminated = false;
    let mut forced = false;

    let status = loop {
        tokio::select! {
            result = child.wait() => break result,
            Some(signal) = signals_rx.recv() => match signal {
                ChildSignal::Terminate => {
                    debug!("Sending SIGTERM to {} (pid {})", service, pid);
                    terminated = true;
                    send_terminate(&mut child, pid);
                }
                ChildSignal::Kill => {
                    debug!("Sending SIGKILL to {} (pid {})", service, pid);
                    forced = true;
                    send_kill(&mut child, pid);
                }
            },
        }
    };

    let (exit_code, signal) = match status {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            warn!("Error waiting for {} (pid {}): {}", service, pid, e);
            (None, None)
        }
    };

    let reaped = Instant::now();
    debug!(
        "{} (pid {}) reaped with code {:?}, signal {:?}",
        service, pid, exit_code, signal
    );

    exited_tx.send_replace(true);

    let notice = ExitNotice {
        service: service.clone(),
        pid,
        exit_code,
        signal,
        at: Utc::now(),
        reaped,
        terminated,
        forced,
    };

    if exit_tx.send(notice).is_err() {
        debug!("Exit channel closed before {} was reported", service);
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) {
    // The child leads its own process group, so this reaches its helpers too.
    let result = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        warn!("SIGTERM to process group {} failed: {}", pid, err);
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, pid: u32) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop process {}: {}", pid, e);
    }
}

fn send_kill(child: &mut Child, pid: u32) {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if result == 0 {
            return;
        }
        let err = std::io::Error::last_os_error();
        debug!("SIGKILL to process group {} failed: {}", pid, err);
    }

    if let Err(e) = child.start_kill() {
        warn!("Failed to kill process {}: {}", pid, e);
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
