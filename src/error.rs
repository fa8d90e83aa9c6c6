use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid service table: {0}")]
    Spec(#[from] SpecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Report encoding error: {0}")]
    Report(#[from] serde_json::Error),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl SupervisorError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Whether the error was raised before any service could be launched
    /// because the configuration or service table is unusable.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Spec(_))
    }
}

/// Problems with the service table itself. Any of these aborts the run
/// before a single process is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("service #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("service name '{name}' is declared more than once")]
    DuplicateName { name: String },

    #[error("port {port} is assigned to both '{first}' and '{second}'")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("service '{service}' must use a non-zero port")]
    InvalidPort { service: String },

    #[error("service '{service}' has an empty command")]
    EmptyCommand { service: String },

    #[error("service '{service}' has a malformed env entry '{entry}' (expected KEY=VALUE)")]
    InvalidEnv { service: String, entry: String },
}

/// Why a single service could not be started.
#[derive(Error, Debug)]
pub enum LaunchCause {
    #[error("working directory {} does not exist", .0.display())]
    WorkingDirMissing(PathBuf),

    #[error("port {0} is already accepting connections on this host")]
    PortInUse(u16),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited before its pid could be recorded")]
    NoPid,
}

/// A failed launch of one service. Never aborts the launch of the others.
#[derive(Error, Debug)]
#[error("failed to launch '{service}' on port {port}: {cause}")]
pub struct LaunchError {
    pub service: String,
    pub port: u16,
    #[source]
    pub cause: LaunchCause,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Receiver lagged behind by {0} events")]
    Lagged(u64),

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
