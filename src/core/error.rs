use thiserror::Error;

use crate::download::source::AcquireError;

/// Centralized error types for the application
///
/// All errors raised while processing a job are converted to this enum so the
/// worker can handle them at a single job boundary.
///
/// # Example
///
/// ```no_run
/// use linkdrop::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Acquisition backend errors
    #[error("Acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    /// File delivery errors
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Offloaded task failed to join (panicked or was aborted)
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal failures (e.g. a panic caught at the job boundary)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error means the link itself cannot be handled,
    /// as opposed to something going wrong on our side.
    pub fn is_unsupported_input(&self) -> bool {
        matches!(self, AppError::Acquire(e) if e.is_unsupported())
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_input_classification() {
        let err = AppError::from(AcquireError::Unsupported("Unsupported URL: x".to_string()));
        assert!(err.is_unsupported_input());

        let err = AppError::from(AcquireError::Process("exit code 1".to_string()));
        assert!(!err.is_unsupported_input());

        let err = AppError::Delivery("upload failed".to_string());
        assert!(!err.is_unsupported_input());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Internal("job panicked: boom".to_string());
        assert_eq!(err.to_string(), "Internal error: job panicked: boom");

        let err = AppError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.to_string(), "IO error: gone");
    }
}
