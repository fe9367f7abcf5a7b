//! Per-job scratch directories.
//!
//! Each job downloads into its own `session-YYYYMMDD-HHMMSS-xxxxxxxx`
//! directory below the download root. The directory is deleted only after a
//! fully successful job, and only if it still resolves to a session directory
//! inside the root at that moment.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lazy_regex::regex_is_match;

use crate::core::error::AppResult;

const SESSION_PREFIX: &str = "session-";

/// Builds a fresh session directory name from the current UTC time and 8 random hex chars.
pub fn new_session_name() -> String {
    let ts = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let rnd = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}-{}", SESSION_PREFIX, ts, &rnd[..8])
}

/// Whether `name` follows the reserved session naming pattern.
pub fn is_session_name(name: &str) -> bool {
    regex_is_match!(r"^session-\d{8}-\d{6}-[0-9a-f]{8}$", name)
}

/// Handle to one job's working directory.
#[derive(Debug, Clone)]
pub struct SessionDir {
    root: PathBuf,
    path: PathBuf,
}

impl SessionDir {
    /// Creates a new, empty session directory under `root` (creating `root` if needed).
    pub async fn create(root: &Path) -> AppResult<Self> {
        fs_err::tokio::create_dir_all(root).await?;
        let path = root.join(new_session_name());
        fs_err::tokio::create_dir(&path).await?;
        log::info!("Session dir: {}", path.display());
        Ok(Self {
            root: root.to_path_buf(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    /// Deletes the directory after re-validating it.
    ///
    /// Returns `Ok(false)` when the directory is already gone or fails
    /// validation (resolved path outside the root, or not a session name).
    pub async fn cleanup(&self) -> AppResult<bool> {
        let resolved = match resolve(&self.root, &self.path).await? {
            Some(resolved) => resolved,
            None => return Ok(false),
        };
        let (root, dir) = resolved;

        if dir == root || !dir.starts_with(&root) {
            log::warn!("Refusing to delete outside download root: {}", dir.display());
            return Ok(false);
        }
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !is_session_name(name) {
            log::warn!("Refusing to delete non-session dir: {}", dir.display());
            return Ok(false);
        }

        match fs_err::tokio::remove_dir_all(&dir).await {
            Ok(()) => {
                log::info!("Cleaned up session dir: {}", dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Canonicalizes root and directory; `None` if either no longer exists.
async fn resolve(root: &Path, dir: &Path) -> AppResult<Option<(PathBuf, PathBuf)>> {
    let root = match fs_err::tokio::canonicalize(root).await {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let dir = match fs_err::tokio::canonicalize(dir).await {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some((root, dir)))
}
