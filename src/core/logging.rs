//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup report of the effective configuration

use anyhow::Result;
use simplelog::*;
use std::fs::File;
use std::str::FromStr;

use crate::core::config;

/// Parses a textual level, falling back to `Info` for unknown values.
pub fn parse_level(raw: &str) -> LevelFilter {
    LevelFilter::from_str(raw.trim()).unwrap_or(LevelFilter::Info)
}

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `level` - Maximum level written to both outputs
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to create the file or install the logger
pub fn init_logger(log_file_path: &str, level: LevelFilter) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the effective configuration at application startup
pub fn log_startup_configuration() {
    log::info!("Download root: {}", config::download_root().display());
    log::info!(
        "Progress: min interval {:?}, stall interval {:?}",
        config::progress::min_interval(),
        config::progress::stall_interval()
    );
    match config::selection::sweep_interval() {
        Some(every) => log::info!("Selections: ttl {:?}, sweep every {:?}", config::selection::ttl(), every),
        None => log::info!("Selections: ttl {:?}, periodic sweep disabled", config::selection::ttl()),
    }
    log::info!(
        "yt-dlp: {} (timeout {:?}, telegram compat {})",
        config::ytdlp::YTDL_BIN.as_str(),
        config::ytdlp::timeout(),
        *config::ytdlp::TELEGRAM_COMPAT
    );
    if let Some(ref ffmpeg) = *config::ytdlp::FFMPEG_LOCATION {
        log::info!("ffmpeg location: {}", ffmpeg);
    }
    if let Some(ref url) = *config::BOT_API_URL {
        log::info!("Bot API URL: {}", url);
    }
    if *config::delivery::LOCAL_MODE {
        log::info!(
            "Local Bot API mode enabled (path mapping: {:?} -> {:?})",
            *config::delivery::LOCAL_PATH_FROM,
            *config::delivery::LOCAL_PATH_TO
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level(" error "), LevelFilter::Error);
        assert_eq!(parse_level("loud"), LevelFilter::Info);
    }
}
