//! Error types for container lifecycle management.

use std::time::Duration;

use thiserror::Error;

use crate::container::ContainerState;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors that can occur while driving a container through its lifecycle.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container engine could not be reached.
    #[error("Container engine not available: {reason}")]
    EngineUnavailable {
        /// Reason why the engine is unavailable.
        reason: String,
    },

    /// The image could not be resolved or pulled.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// The engine refused to start the container.
    #[error("Failed to start container '{id}': {reason}")]
    StartFailed {
        /// Runtime id of the container.
        id: String,
        /// Engine error message.
        reason: String,
        /// Whatever output the container produced before failing.
        diagnostics: String,
    },

    /// The port was never declared on the container.
    #[error("Port {port} is not exposed by this container")]
    PortNotExposed {
        /// Declared container port that was looked up.
        port: u16,
    },

    /// The operation needs a running container.
    #[error("Container is not running (state: {state})")]
    NotRunning {
        /// State the handle was in.
        state: ContainerState,
    },

    /// Configuration cannot change once the container has been started.
    #[error("Container already started (state: {state}), configuration is frozen")]
    AlreadyStarted {
        /// State the handle was in.
        state: ContainerState,
    },

    /// The readiness condition did not hold within the timeout.
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    WaitTimeout {
        /// Configured ceiling.
        timeout: Duration,
        /// Human-readable description of the condition.
        waiting_for: String,
    },

    /// The container stopped before becoming ready.
    #[error("Container '{id}' exited before becoming ready")]
    ContainerExited {
        /// Runtime id of the container.
        id: String,
        /// Last lines of output seen before the exit.
        last_output: Vec<String>,
    },

    /// Any other engine failure.
    #[error("Container engine error during {operation}: {reason}")]
    Engine {
        /// Engine operation that failed.
        operation: &'static str,
        /// Engine error message.
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ContainerError {
    /// Whether this error means the container died while we were waiting on it.
    pub fn is_exited(&self) -> bool {
        matches!(self, ContainerError::ContainerExited { .. })
    }

    /// Whether this error is a readiness timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ContainerError::WaitTimeout { .. })
    }
}
