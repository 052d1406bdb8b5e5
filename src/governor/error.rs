use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by a failed work unit
pub type WorkError = Box<dyn StdError + Send + Sync>;

/// Outcome of a request that did not complete successfully
#[derive(Debug, Error)]
pub enum RequestError {
    // Admission: nothing ran
    #[error("Request queue is full")]
    QueueFull,

    #[error("Request queue was cleared")]
    QueueCleared,

    #[error("Request governor is shutting down")]
    ShuttingDown,

    // Timeouts
    #[error("Request timed out after {0:?} while queued")]
    QueueTimeout(Duration),

    #[error("Request timed out after {0:?} while executing")]
    ExecutionTimeout(Duration),

    // The work itself failed
    #[error("Request failed: {0}")]
    Failed(#[source] WorkError),
}

impl RequestError {
    /// The request was turned away before it consumed any resources
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RequestError::QueueFull | RequestError::QueueCleared | RequestError::ShuttingDown
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RequestError::QueueTimeout(_) | RequestError::ExecutionTimeout(_)
        )
    }
}
