//! Media acquisition backend abstraction.
//!
//! The worker only knows the `Acquirer` trait: hand it URLs and an output
//! directory, get back the produced files. Acquisition is blocking and runs on
//! a blocking thread; progress flows back through a [`ProgressSender`].
//!
//! Built-in backends:
//! - `YtDlpAcquirer`: 1000+ sites via the yt-dlp command line tool

pub mod compat;
pub mod ytdlp;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::progress::ProgressSender;
use crate::download::selection::PlaylistEntry;

pub use compat::MediaTools;
pub use ytdlp::{YtDlpAcquirer, YtDlpConfig};

/// Parameters of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    /// Source URLs, usually exactly one
    pub urls: Vec<String>,
    /// Directory the backend writes into (the job's session directory)
    pub output_dir: PathBuf,
    /// Optional video height cap
    pub max_height: Option<u32>,
    /// Optional playlist item selector, e.g. "3"
    pub playlist_items: Option<String>,
}

/// What a link offers before anything is downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// Empty unless the link is a playlist
    pub playlist_entries: Vec<PlaylistEntry>,
    /// Available video heights, best first
    pub heights: Vec<u32>,
}

/// Acquisition failures.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The backend cannot handle this link at all
    #[error("unsupported link: {0}")]
    Unsupported(String),

    /// None of the requested formats exist for this link
    #[error("requested format is not available: {0}")]
    FormatUnavailable(String),

    /// The backend ran but failed
    #[error("acquisition failed: {0}")]
    Process(String),

    #[error("acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// The backend executable could not be started
    #[error("acquisition tool not available: {0}")]
    ToolMissing(String),

    #[error("IO error during acquisition: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquireError {
    /// Whether the link itself is the problem, as opposed to our side failing.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, AcquireError::Unsupported(_) | AcquireError::FormatUnavailable(_))
    }
}

/// A blocking media acquisition backend.
///
/// Implementations must be callable from a blocking thread and report progress
/// only through the supplied [`ProgressSender`].
pub trait Acquirer: Send + Sync {
    /// Human-readable name of this backend (e.g., "yt-dlp")
    fn name(&self) -> &str;

    /// Checks that the tools the backend depends on are usable.
    fn check_ready(&self) -> Result<(), AcquireError> {
        Ok(())
    }

    /// Inspects a link: playlist entries and available video heights.
    ///
    /// Fails with [`AcquireError::Unsupported`] when the link cannot be handled.
    fn probe(&self, url: &str) -> Result<ProbeResult, AcquireError>;

    /// Downloads everything the request names into `request.output_dir`.
    ///
    /// Returns the produced media files in delivery order. An empty list is not an error.
    fn acquire(&self, request: &AcquireRequest, progress: &ProgressSender) -> Result<Vec<PathBuf>, AcquireError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_classification() {
        assert!(AcquireError::Unsupported("Unsupported URL: http://x".into()).is_unsupported());
        assert!(AcquireError::FormatUnavailable("best".into()).is_unsupported());
        assert!(!AcquireError::Process("exit status 1".into()).is_unsupported());
        assert!(!AcquireError::Timeout(Duration::from_secs(5)).is_unsupported());
        assert!(!AcquireError::ToolMissing("yt-dlp".into()).is_unsupported());
    }
}
