//! Lifecycle monitor: turns reaped children into classified events.
//!
//! A child that exits before shutdown was requested is `Fatal`, even with
//! exit code 0. A child that exits afterwards is `Expected`. The comparison
//! uses the monotonic time the child was reaped, so an exit queued just
//! before an interrupt is still fatal and a wall-clock step cannot reorder
//! the two.

use crate::events::{ExitClass, LifecycleEvent};
use crate::process::ExitNotice;
use futures::Stream;
use std::collections::HashSet;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

pub struct LifecycleMonitor {
    exits: mpsc::UnboundedReceiver<ExitNotice>,
    shutdown_requested: watch::Receiver<Option<Instant>>,
    outstanding: HashSet<String>,
}

impl LifecycleMonitor {
    /// `shutdown_requested` carries the moment shutdown began, if it has
    pub fn new(
        exits: mpsc::UnboundedReceiver<ExitNotice>,
        shutdown_requested: watch::Receiver<Option<Instant>>,
    ) -> Self {
        Self {
            exits,
            shutdown_requested,
            outstanding: HashSet::new(),
        }
    }

    /// Start expecting an exit from `service`
    pub fn track(&mut self, service: &str) {
        self.outstanding.insert(service.to_string());
    }

    /// Children that have not been reaped yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn classify(&self, reaped_at: Instant) -> ExitClass {
        match *self.shutdown_requested.borrow() {
            Some(requested_at) if reaped_at >= requested_at => ExitClass::Expected,
            _ => ExitClass::Fatal,
        }
    }

    /// Wait for the next child exit. Returns `None` once every tracked child
    /// has been reaped.
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        while !self.outstanding.is_empty() {
            let notice = self.exits.recv().await?;

            if !self.outstanding.remove(&notice.service) {
                debug!("Ignoring exit of untracked service {}", notice.service);
                continue;
            }

            let class = self.classify(notice.reaped);
            let event = LifecycleEvent::from_notice(notice, class);

            match class {
                ExitClass::Fatal => error!(
                    "{} (pid {}) exited unexpectedly with {}",
                    event.service,
                    event.pid,
                    event.status_label()
                ),
                ExitClass::Expected => info!(
                    "{} (pid {}) stopped with {}",
                    event.service,
                    event.pid,
                    event.status_label()
                ),
            }

            return Some(event);
        }

        None
    }

    /// The monitor as a lazy event stream that ends when every child is reaped
    pub fn events(mut self) -> impl Stream<Item = LifecycleEvent> {
        async_stream::stream! {
            while let Some(event) = self.next_event().await {
                yield event;
            }
        }
    }
}
