use thiserror::Error;

/// Main error type for the inference-server governor
#[derive(Debug, Error)]
pub enum GovernorError {
    // Process-related errors
    #[error("Server directory not found: {0}")]
    ServerDirNotFound(String),

    #[error("Server entrypoint not found: {0}")]
    EntrypointNotFound(String),

    #[error("Failed to spawn model server: {0}")]
    SpawnError(String),

    #[error("Model server exited during startup: {0}")]
    ExitedDuringStartup(String),

    #[error("Model server did not become healthy within {0:?}")]
    StartTimeout(std::time::Duration),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Governor is shutting down")]
    ShuttingDown,

    // Probe errors
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Metrics request failed: {0}")]
    MetricsUnavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model server is not available: {0}")]
    ServerUnavailable(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Request errors surfaced through the service layer
    #[error(transparent)]
    Request(#[from] crate::governor::RequestError),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Result type alias for governor operations
pub type Result<T> = std::result::Result<T, GovernorError>;
