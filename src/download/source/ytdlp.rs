//! yt-dlp acquisition backend.
//!
//! Runs the yt-dlp command line tool as a child process, parses its
//! `--progress-template` output into [`RawProgress`] events and collects the
//! produced media files from the output directory afterwards. With Telegram
//! compatibility on, the collected files then go through the ffmpeg pass in
//! [`super::compat`].

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use serde::Deserialize;

use super::compat::MediaTools;
use super::{AcquireError, AcquireRequest, Acquirer, ProbeResult};
use crate::core::config;
use crate::download::progress::{ProgressSender, RawProgress, UNKNOWN_STREAM};
use crate::download::selection::PlaylistEntry;

/// Marker prefix of download progress lines (followed by a JSON object).
const PROGRESS_MARKER: &str = "PROGRESS ";
/// Marker prefix of post-processing lines.
const PROCESSING_MARKER: &str = "PROCESSING ";

/// Selector used for the single retry after "requested format is not available".
pub const PERMISSIVE_FORMAT: &str = "best/bestaudio/bestvideo";

/// Default remote components when none are configured.
const DEFAULT_REMOTE_COMPONENTS: &str = "ejs:github";

/// Media file extensions the backend may produce.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mp3", "m4a", "aac", "wav", "flac", "ogg"];

const STDERR_TAIL_LINES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlpConfig {
    pub bin: String,
    pub ffmpeg_location: Option<String>,
    pub js_runtime: Option<String>,
    /// `None` means "use the default", `Some("")` disables remote components
    pub remote_components: Option<String>,
    pub timeout: Duration,
    /// ffmpeg and ffprobe, resolved from `ffmpeg_location`
    pub media_tools: MediaTools,
    /// Rewrite produced files for Telegram playback
    pub telegram_compat: bool,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            bin: "yt-dlp".to_string(),
            ffmpeg_location: None,
            js_runtime: None,
            remote_components: None,
            timeout: Duration::from_secs(3600),
            media_tools: MediaTools::default(),
            telegram_compat: false,
        }
    }
}

impl YtDlpConfig {
    pub fn from_env() -> Self {
        Self {
            bin: config::ytdlp::YTDL_BIN.clone(),
            ffmpeg_location: config::ytdlp::FFMPEG_LOCATION.clone(),
            js_runtime: config::ytdlp::JS_RUNTIME.clone(),
            remote_components: config::ytdlp::REMOTE_COMPONENTS.clone(),
            timeout: config::ytdlp::timeout(),
            media_tools: MediaTools::from_location(config::ytdlp::FFMPEG_LOCATION.as_deref()),
            telegram_compat: *config::ytdlp::TELEGRAM_COMPAT,
        }
    }

    /// Remote components to enable, honouring the "empty disables" rule.
    pub fn remote_components(&self) -> Vec<String> {
        self.remote_components
            .as_deref()
            .unwrap_or(DEFAULT_REMOTE_COMPONENTS)
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Builds the format selector, preferring Telegram-playable H.264 + AAC.
///
/// Falls back to any video+audio, then any single file with video, then
/// audio-only sources.
pub fn format_selector(max_height: Option<u32>) -> String {
    match max_height {
        Some(h) => format!(
            "bv*[height<={h}][vcodec^=avc1]+ba[ext=m4a]/\
             bv*[height<={h}][vcodec!=none]+ba/\
             best[height<={h}][vcodec!=none]/\
             best[vcodec!=none]/\
             bestaudio/best"
        ),
        None => "bv*[vcodec^=avc1]+ba[ext=m4a]/bv*[vcodec!=none]+ba/best[vcodec!=none]/bestaudio/best".to_string(),
    }
}

/// Progress payload as printed by `%(progress)j`.
#[derive(Debug, Default, Deserialize)]
struct YtDlpProgress {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    downloaded_bytes: Option<f64>,
    #[serde(default)]
    total_bytes: Option<f64>,
    #[serde(default)]
    total_bytes_estimate: Option<f64>,
    #[serde(default, rename = "_percent_str")]
    percent_str: Option<String>,
}

impl YtDlpProgress {
    fn into_raw(self) -> Option<RawProgress> {
        let key = self
            .filename
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| UNKNOWN_STREAM.to_string());
        let total = self
            .total_bytes
            .filter(|t| *t > 0.0)
            .or(self.total_bytes_estimate.filter(|t| *t > 0.0))
            .map(|t| t as u64);

        match self.status.as_deref() {
            Some("downloading") => Some(RawProgress::Downloading {
                key,
                downloaded: self.downloaded_bytes.filter(|d| *d >= 0.0).map(|d| d as u64),
                total,
                percent_hint: self.percent_str.as_deref().and_then(parse_percent),
            }),
            Some("finished") => Some(RawProgress::Finished { key, total }),
            Some("processing") | Some("postprocessing") => Some(RawProgress::Processing),
            _ => None,
        }
    }
}

/// Parses strings like " 42.3%" into a number.
fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').trim().parse().ok()
}

/// Turns one line of yt-dlp output into a raw progress event, if it is one.
pub fn parse_progress_line(line: &str) -> Option<RawProgress> {
    let line = line.trim();
    if let Some(json) = line.strip_prefix(PROGRESS_MARKER) {
        return match serde_json::from_str::<YtDlpProgress>(json) {
            Ok(progress) => progress.into_raw(),
            Err(e) => {
                log::debug!("Unparseable yt-dlp progress line: {}", e);
                None
            }
        };
    }
    if line.starts_with(PROCESSING_MARKER) || line.starts_with("[Merger]") || line.starts_with("[ExtractAudio]") {
        return Some(RawProgress::Processing);
    }
    None
}

/// Maps yt-dlp's error output to an [`AcquireError`].
fn classify_failure(stderr: &str) -> AcquireError {
    let lower = stderr.to_lowercase();
    let last_error = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().last())
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string();

    if lower.contains("requested format is not available") {
        AcquireError::FormatUnavailable(last_error)
    } else if lower.contains("unsupported url") {
        AcquireError::Unsupported(last_error)
    } else {
        AcquireError::Process(last_error)
    }
}

/// Lists produced media files, newest first and larger first on ties.
pub fn collect_media_files(dir: &Path) -> Result<Vec<PathBuf>, AcquireError> {
    let mut files: Vec<(SystemTime, u64, PathBuf)> = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with(".part") {
            continue;
        }
        let is_media = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| MEDIA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if !is_media {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, meta.len(), path));
    }
    files.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    Ok(files.into_iter().map(|(_, _, path)| path).collect())
}

/// `-J` output, trimmed to what the picker needs.
#[derive(Debug, Default, Deserialize)]
struct ProbeInfo {
    #[serde(default, rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ie_key: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl FlatEntry {
    /// Downloadable URL of a flat playlist entry.
    fn resolved_url(&self) -> Option<String> {
        if let Some(ref page) = self.webpage_url {
            if page.starts_with("http") {
                return Some(page.clone());
            }
        }
        let url = self.url.as_deref().filter(|u| !u.is_empty())?;
        if url.starts_with("http") {
            return Some(url.to_string());
        }
        match self.ie_key.as_deref().filter(|k| !k.is_empty()) {
            Some(ie_key) => Some(format!("{}:{}", ie_key, url)),
            None => Some(url.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FormatInfo {
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    vcodec: Option<String>,
}

/// Playlist entries of a `--flat-playlist -J` dump; empty for single items.
fn playlist_entries(info: &ProbeInfo) -> Vec<PlaylistEntry> {
    if info.kind.as_deref() != Some("playlist") {
        return Vec::new();
    }
    info.entries
        .iter()
        .flatten()
        .enumerate()
        .filter_map(|(i, entry)| {
            let url = entry.resolved_url()?;
            let title = entry
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .or_else(|| entry.id.clone())
                .unwrap_or_else(|| "(untitled)".to_string());
            Some(PlaylistEntry {
                index: (i + 1) as u32,
                title,
                url,
                duration_secs: entry.duration.filter(|d| *d >= 0.0).map(|d| d as u32),
            })
        })
        .collect()
}

/// Distinct heights of formats that carry video, highest first.
fn available_heights(info: &ProbeInfo) -> Vec<u32> {
    let mut heights: Vec<u32> = info
        .formats
        .iter()
        .filter(|f| f.vcodec.as_deref().is_some_and(|v| !v.is_empty() && v != "none"))
        .filter_map(|f| f.height.filter(|h| *h > 0.0).map(|h| h as u32))
        .collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));
    heights.dedup();
    heights
}

/// yt-dlp based [`Acquirer`].
pub struct YtDlpAcquirer {
    config: YtDlpConfig,
}

impl YtDlpAcquirer {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// Full argument list for one run.
    pub fn build_args(&self, request: &AcquireRequest, selector: &str) -> Vec<String> {
        let template = request.output_dir.join("%(title).200s [%(id)s].%(ext)s");
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-colors".into(),
            "--progress".into(),
            "--progress-template".into(),
            format!("download:{}%(progress)j", PROGRESS_MARKER),
            "--progress-template".into(),
            format!("postprocess:{}%(progress.status)s", PROCESSING_MARKER),
            "-o".into(),
            template.to_string_lossy().into_owned(),
            "-f".into(),
            selector.to_string(),
            "--merge-output-format".into(),
            "mp4".into(),
            "--retries".into(),
            "3".into(),
        ];

        match request.playlist_items {
            Some(ref items) => {
                args.push("--playlist-items".into());
                args.push(items.clone());
            }
            None => args.push("--no-playlist".into()),
        }
        self.push_tool_args(&mut args);

        args.push("--".into());
        args.extend(request.urls.iter().cloned());
        args
    }

    /// ffmpeg location, JS runtime and remote components.
    fn push_tool_args(&self, args: &mut Vec<String>) {
        if let Some(ref ffmpeg) = self.config.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.clone());
        }
        if let Some(ref runtime) = self.config.js_runtime {
            args.push("--js-runtimes".into());
            args.push(runtime.to_lowercase());
        }
        for component in self.config.remote_components() {
            args.push("--remote-components".into());
            args.push(component);
        }
    }

    /// Runs yt-dlp in `-J` mode and parses the dump.
    fn dump_json(&self, url: &str, flat_playlist: bool) -> Result<ProbeInfo, AcquireError> {
        let mut args: Vec<String> = vec!["-J".into(), "--no-warnings".into()];
        args.push(if flat_playlist { "--flat-playlist" } else { "--no-playlist" }.into());
        self.push_tool_args(&mut args);
        args.push("--".into());
        args.push(url.to_string());

        let output = Command::new(&self.config.bin)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => AcquireError::ToolMissing(self.config.bin.clone()),
                _ => AcquireError::Io(e),
            })?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| AcquireError::Process(format!("unreadable yt-dlp metadata: {}", e)))
    }

    fn run(&self, request: &AcquireRequest, selector: &str, progress: &ProgressSender) -> Result<(), AcquireError> {
        let args = self.build_args(request, selector);
        log::debug!("{} {}", self.config.bin, args.join(" "));

        let mut child = Command::new(&self.config.bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => AcquireError::ToolMissing(self.config.bin.clone()),
                _ => AcquireError::Io(e),
            })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::<String>::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader("stdout", stdout, progress.clone(), None));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                "stderr",
                stderr,
                progress.clone(),
                Some(Arc::clone(&stderr_tail)),
            ));
        }

        let deadline = Instant::now() + self.config.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        log::error!("yt-dlp timed out after {}s, killing", self.config.timeout.as_secs());
                        reap(&mut child);
                        return Err(AcquireError::Timeout(self.config.timeout));
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(e) => {
                    log::error!("Failed to poll yt-dlp: {}, killing", e);
                    reap(&mut child);
                    return Err(AcquireError::Io(e));
                }
            }
        };

        for reader in readers {
            let _ = reader.join();
        }

        if status.success() {
            return Ok(());
        }

        let stderr_text = stderr_tail
            .lock()
            .map(|mut lines| lines.make_contiguous().join("\n"))
            .unwrap_or_default();
        log::warn!("yt-dlp exited with {}", status);
        Err(classify_failure(&stderr_text))
    }
}

/// Kills the child and waits for it so no zombie is left behind.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Reads a child stream line by line, forwarding progress and keeping an optional tail.
fn spawn_reader<R: Read + Send + 'static>(
    label: &'static str,
    stream: R,
    progress: ProgressSender,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines().map_while(Result::ok) {
            if let Some(raw) = parse_progress_line(&line) {
                progress.submit(raw);
                continue;
            }
            log::debug!("yt-dlp {}: {}", label, line);
            if let Some(ref tail) = tail {
                if let Ok(mut lines) = tail.lock() {
                    lines.push_back(line);
                    if lines.len() > STDERR_TAIL_LINES {
                        lines.pop_front();
                    }
                }
            }
        }
    })
}

impl Acquirer for YtDlpAcquirer {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn check_ready(&self) -> Result<(), AcquireError> {
        self.config.media_tools.ensure_ffmpeg()
    }

    fn probe(&self, url: &str) -> Result<ProbeResult, AcquireError> {
        let listing = self.dump_json(url, true)?;
        let playlist_entries = playlist_entries(&listing);

        // Qualities of the link itself, or of the first entry for playlists.
        let target = playlist_entries.first().map(|e| e.url.as_str()).unwrap_or(url);
        let heights = available_heights(&self.dump_json(target, false)?);

        log::info!(
            "Probe {}: {} playlist entries, heights {:?}",
            url,
            playlist_entries.len(),
            heights.iter().take(6).collect::<Vec<_>>()
        );
        Ok(ProbeResult {
            playlist_entries,
            heights,
        })
    }

    fn acquire(&self, request: &AcquireRequest, progress: &ProgressSender) -> Result<Vec<PathBuf>, AcquireError> {
        if self.config.telegram_compat {
            self.config.media_tools.ensure_ffmpeg()?;
        }
        fs_err::create_dir_all(&request.output_dir)?;
        log::info!(
            "yt-dlp: {} url(s) into {} max_height={:?} playlist_items={:?}",
            request.urls.len(),
            request.output_dir.display(),
            request.max_height,
            request.playlist_items
        );

        let selector = format_selector(request.max_height);
        match self.run(request, &selector, progress) {
            Err(AcquireError::FormatUnavailable(reason)) => {
                log::warn!("yt-dlp: format not available ({}), retrying with permissive selector", reason);
                self.run(request, PERMISSIVE_FORMAT, progress)?;
            }
            other => other?,
        }

        let files = collect_media_files(&request.output_dir)?;
        log::info!(
            "yt-dlp finished, {} media file(s): {}",
            files.len(),
            files
                .iter()
                .take(5)
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if self.config.telegram_compat && !files.is_empty() {
            return self
                .config
                .media_tools
                .make_compatible(&request.output_dir, files, progress);
        }
        Ok(files)
    }
}
