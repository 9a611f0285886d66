//! Error types for the pacer crate.

use thiserror::Error;

use crate::timer::TimerError;

/// Main error type for pacer operations.
#[derive(Error, Debug)]
pub enum PacerError {
    /// The limiter could not register its timer during creation.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(#[source] TimerError),

    /// Re-arming the timer failed; the limiter keeps working unthrottled
    /// until a later re-arm succeeds.
    #[error("Timer schedule failed: {0}")]
    TimerScheduleFailed(#[source] TimerError),

    /// The limiter has been shut down and accepts no more work.
    #[error("Rate limiter is shutting down")]
    ShuttingDown,

    /// The task consumer went away before completing the teardown.
    #[error("Task closed before teardown completed")]
    TaskClosed,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pacer operations.
pub type Result<T> = std::result::Result<T, PacerError>;
