use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Reads an environment variable, treating empty or whitespace-only values as unset.
fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Parses an environment variable, falling back to `default` when unset or malformed.
fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match non_empty_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Invalid value for {}: {:?}, using default", name, raw);
            default
        }),
        None => default,
    }
}

/// Parses a boolean flag: 1/true/yes/y/on (case-insensitive) are true.
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on")
}

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Custom Bot API server URL (self-hosted telegram-bot-api)
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| non_empty_var("BOT_API_URL"));

/// Download root: every job gets its own session directory below it.
/// Read from DOWNLOAD_ROOT, supports tilde (~) expansion.
/// Default: ./downloads
pub static DOWNLOAD_ROOT: Lazy<String> =
    Lazy::new(|| non_empty_var("DOWNLOAD_ROOT").unwrap_or_else(|| "./downloads".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| non_empty_var("LOG_FILE_PATH").unwrap_or_else(|| "app.log".to_string()));

/// Log level (error, warn, info, debug, trace)
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| non_empty_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()));

/// Returns the download root with `~` expanded.
pub fn download_root() -> PathBuf {
    PathBuf::from(shellexpand::tilde(DOWNLOAD_ROOT.as_str()).to_string())
}

/// Progress reporting configuration
pub mod progress {
    use super::{parsed_var, Duration, Lazy};

    /// Minimum interval between two status edits (Telegram edit rate limits)
    pub static MIN_INTERVAL_MS: Lazy<u64> = Lazy::new(|| parsed_var("PROGRESS_MIN_INTERVAL_MS", 1000));

    /// No progress event for this long counts as a stall
    pub static STALL_INTERVAL_MS: Lazy<u64> = Lazy::new(|| parsed_var("PROGRESS_STALL_INTERVAL_MS", 10_000));

    pub fn min_interval() -> Duration {
        Duration::from_millis(*MIN_INTERVAL_MS)
    }

    pub fn stall_interval() -> Duration {
        Duration::from_millis(*STALL_INTERVAL_MS)
    }
}

/// Selection session configuration
pub mod selection {
    use super::{parsed_var, Duration, Lazy};

    /// Pending selections older than this are treated as absent
    pub static TTL_SECS: Lazy<u64> = Lazy::new(|| parsed_var("SELECTION_TTL_SECS", 24 * 60 * 60));

    /// Interval of the background sweep of expired selections (0 disables it)
    pub static SWEEP_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| parsed_var("SELECTION_SWEEP_INTERVAL_SECS", 3600));

    /// Playlist entries shown per picker page
    pub static PLAYLIST_PAGE_SIZE: Lazy<usize> = Lazy::new(|| parsed_var::<usize>("PLAYLIST_PAGE_SIZE", 10).max(1));

    pub fn ttl() -> Duration {
        Duration::from_secs(*TTL_SECS)
    }

    /// `None` when the periodic sweep is disabled.
    pub fn sweep_interval() -> Option<Duration> {
        match *SWEEP_INTERVAL_SECS {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// yt-dlp configuration
pub mod ytdlp {
    use super::{env, non_empty_var, parse_flag, parsed_var, Duration, Lazy};

    /// yt-dlp binary path
    /// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
    pub static YTDL_BIN: Lazy<String> = Lazy::new(|| non_empty_var("YTDL_BIN").unwrap_or_else(|| "yt-dlp".to_string()));

    /// Passed to yt-dlp as --ffmpeg-location
    pub static FFMPEG_LOCATION: Lazy<Option<String>> = Lazy::new(|| non_empty_var("FFMPEG_LOCATION"));

    /// Passed to yt-dlp as --js-runtimes
    pub static JS_RUNTIME: Lazy<Option<String>> = Lazy::new(|| non_empty_var("YTDLP_JS_RUNTIME"));

    /// Passed to yt-dlp as --remote-components.
    /// Present-but-empty is kept as `Some("")`, which disables remote components.
    pub static REMOTE_COMPONENTS: Lazy<Option<String>> =
        Lazy::new(|| env::var("YTDLP_REMOTE_COMPONENTS").ok().map(|v| v.trim().to_string()));

    /// Rewrite produced files for Telegram playback (ffprobe + ffmpeg pass).
    /// Read from TELEGRAM_COMPAT, default on
    pub static TELEGRAM_COMPAT: Lazy<bool> =
        Lazy::new(|| non_empty_var("TELEGRAM_COMPAT").map(|v| parse_flag(&v)).unwrap_or(true));

    /// Hard timeout for one acquisition
    pub static TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| parsed_var("YTDLP_TIMEOUT_SECS", 3600));

    pub fn timeout() -> Duration {
        Duration::from_secs(*TIMEOUT_SECS)
    }
}

/// Telegram delivery configuration
pub mod delivery {
    use super::{non_empty_var, parse_flag, parsed_var, Duration, Lazy, PathBuf};

    /// Send files as file:// URIs to a local Bot API server
    pub static LOCAL_MODE: Lazy<bool> =
        Lazy::new(|| non_empty_var("BOT_LOCAL_MODE").map(|v| parse_flag(&v)).unwrap_or(false));

    /// Local path prefix as seen by this process
    pub static LOCAL_PATH_FROM: Lazy<Option<PathBuf>> =
        Lazy::new(|| non_empty_var("BOT_API_LOCAL_PATH_FROM").map(|p| PathBuf::from(shellexpand::tilde(&p).to_string())));

    /// The same location as seen by the Bot API server
    pub static LOCAL_PATH_TO: Lazy<Option<PathBuf>> =
        Lazy::new(|| non_empty_var("BOT_API_LOCAL_PATH_TO").map(PathBuf::from));

    /// Bot HTTP client timeout. Uploads of large files through a local
    /// Bot API server can take minutes.
    pub static HTTP_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| parsed_var("HTTP_TIMEOUT_SECS", 600));

    pub fn http_timeout() -> Duration {
        Duration::from_secs(*HTTP_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(parse_flag("on"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }

    #[test]
    #[serial]
    fn test_parsed_var_falls_back_on_garbage() {
        env::set_var("LINKDROP_TEST_NUMBER", "not-a-number");
        assert_eq!(parsed_var("LINKDROP_TEST_NUMBER", 42u64), 42);
        env::set_var("LINKDROP_TEST_NUMBER", " 7 ");
        assert_eq!(parsed_var("LINKDROP_TEST_NUMBER", 42u64), 7);
        env::remove_var("LINKDROP_TEST_NUMBER");
        assert_eq!(parsed_var("LINKDROP_TEST_NUMBER", 42u64), 42);
    }

    #[test]
    #[serial]
    fn test_non_empty_var_ignores_blank() {
        env::set_var("LINKDROP_TEST_BLANK", "   ");
        assert_eq!(non_empty_var("LINKDROP_TEST_BLANK"), None);
        env::remove_var("LINKDROP_TEST_BLANK");
    }
}
