//! Child process management
//!
//! This module provides:
//! - `ProcessLauncher` - spawns services, alone or all at once, and probes
//!   their readiness in the background
//! - `ChildControl` - signal access to a launched child
//! - `ExitNotice` - the single report a watcher sends when its child is reaped
//! - `probe_readiness` / `is_accepting` - TCP readiness and port checks

mod launcher;
mod output;
mod readiness;
mod watcher;


pub use launcher::{started_state, LaunchOutcome, LaunchedChild, ProcessLauncher, ReadinessReport};
pub use output::OutputStream;
pub use readiness::{is_accepting, probe_readiness, ReadinessOutcome};
pub use watcher::{ChildControl, ChildSignal, ExitNotice};
