//! Telegram playback compatibility pass.
//!
//! Every produced video container is inspected with ffprobe. Files Telegram
//! clients play badly are rewritten with ffmpeg:
//! - no video stream: the audio is extracted to `.m4a`
//! - video that is not H.264: re-encoded to H.264/AAC mp4
//! - H.264 with a non-square sample aspect ratio: metadata fixed, no re-encode
//!
//! A failed rewrite keeps the original file.

use std::collections::HashMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::ytdlp::collect_media_files;
use super::AcquireError;
use crate::download::progress::{ProgressSender, RawProgress};

/// Timeout for one ffprobe call
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `-version` checks
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Containers that may carry a video stream.
const VIDEO_CONTAINERS: &[&str] = &["mp4", "mkv", "webm"];

/// Locations of ffmpeg and ffprobe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTools {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Upper bound for one ffmpeg rewrite
    pub timeout: Duration,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            timeout: Duration::from_secs(1800),
        }
    }
}

impl MediaTools {
    /// Resolves both tools from an `--ffmpeg-location` value.
    ///
    /// The location is either a directory holding both binaries or the ffmpeg
    /// binary itself, in which case ffprobe is looked up next to it.
    pub fn from_location(location: Option<&str>) -> Self {
        let Some(location) = location else {
            return Self::default();
        };
        let path = Path::new(location);
        if path.is_dir() {
            return Self {
                ffmpeg: path.join("ffmpeg").to_string_lossy().into_owned(),
                ffprobe: path.join("ffprobe").to_string_lossy().into_owned(),
                ..Self::default()
            };
        }
        let ffprobe = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join("ffprobe").to_string_lossy().into_owned())
            .unwrap_or_else(|| "ffprobe".to_string());
        Self {
            ffmpeg: location.to_string(),
            ffprobe,
            ..Self::default()
        }
    }

    /// Fails with [`AcquireError::ToolMissing`] when ffmpeg cannot be run.
    pub fn ensure_ffmpeg(&self) -> Result<(), AcquireError> {
        match run_with_timeout(Command::new(&self.ffmpeg).arg("-version"), VERSION_CHECK_TIMEOUT) {
            Ok(Some(output)) if output.status.success() => Ok(()),
            Ok(_) => Err(AcquireError::ToolMissing(self.ffmpeg.clone())),
            Err(e) => {
                log::debug!("ffmpeg -version failed: {}", e);
                Err(AcquireError::ToolMissing(self.ffmpeg.clone()))
            }
        }
    }

    /// Stream layout of `path`.
    ///
    /// Falls back to an ffmpeg presence check for video when ffprobe is unusable;
    /// audio presence is unknown in that case.
    pub fn probe_streams(&self, path: &Path) -> StreamInfo {
        if let Some(info) = self.ffprobe_streams(path) {
            return info;
        }
        StreamInfo {
            has_video: self.ffmpeg_sees_video(path),
            has_audio: None,
            ..StreamInfo::default()
        }
    }

    /// Display width and height of the first video stream.
    pub fn video_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        self.ffprobe_streams(path)?.display_dimensions()
    }

    fn ffprobe_streams(&self, path: &Path) -> Option<StreamInfo> {
        let output = match run_with_timeout(
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-show_streams", "-of", "json"])
                .arg(path),
            PROBE_TIMEOUT,
        ) {
            Ok(Some(output)) if output.status.success() => output,
            Ok(_) => {
                log::debug!("ffprobe failed or timed out for {}", path.display());
                return None;
            }
            Err(e) => {
                log::debug!("ffprobe not usable for {}: {}", path.display(), e);
                return None;
            }
        };
        match StreamInfo::from_ffprobe_json(&output.stdout) {
            Ok(info) => Some(info),
            Err(e) => {
                log::debug!("Unreadable ffprobe output for {}: {}", path.display(), e);
                None
            }
        }
    }

    fn ffmpeg_sees_video(&self, path: &Path) -> bool {
        match run_with_timeout(Command::new(&self.ffmpeg).arg("-hide_banner").arg("-i").arg(path), PROBE_TIMEOUT) {
            Ok(Some(output)) => {
                String::from_utf8_lossy(&output.stderr).contains("Video:")
                    || String::from_utf8_lossy(&output.stdout).contains("Video:")
            }
            // Unknown: leave the file alone.
            _ => true,
        }
    }

    /// Runs one rewrite and returns the new file. A partial output is removed on failure.
    fn rewrite(&self, rewrite: Rewrite, input: &Path) -> Result<PathBuf, AcquireError> {
        let output_path = rewrite.output_path(input);
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(input)
            .args(rewrite.ffmpeg_args())
            .arg(&output_path);

        let result = match run_with_timeout(&mut cmd, self.timeout) {
            Ok(Some(output)) if output.status.success() => Ok(output_path.clone()),
            Ok(Some(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
                Err(AcquireError::Process(format!("ffmpeg exited with {}: {}", output.status, reason.trim())))
            }
            Ok(None) => Err(AcquireError::Timeout(self.timeout)),
            Err(e) => Err(AcquireError::Io(e)),
        };
        if result.is_err() {
            let _ = fs_err::remove_file(&output_path);
        }
        result
    }

    /// Rewrites what needs rewriting and returns the refreshed file list of `dir`.
    ///
    /// Each rewrite reports [`RawProgress::Processing`]. When nothing needs a
    /// rewrite `files` is returned as is.
    pub fn make_compatible(
        &self,
        dir: &Path,
        files: Vec<PathBuf>,
        progress: &ProgressSender,
    ) -> Result<Vec<PathBuf>, AcquireError> {
        let mut rewritten_any = false;

        for path in files.iter().filter(|p| is_video_container(p)) {
            let info = self.probe_streams(path);
            let Some(rewrite) = Rewrite::plan(&info) else {
                continue;
            };
            log::warn!(
                "{:?} needed for {} (vcodec={:?} sar={:?})",
                rewrite,
                path.display(),
                info.video_codec,
                info.sample_aspect_ratio
            );
            rewritten_any = true;
            progress.submit(RawProgress::Processing);

            match self.rewrite(rewrite, path) {
                Ok(output) => {
                    log::info!("Rewrote {} -> {}", path.display(), output.display());
                    if let Err(e) = fs_err::remove_file(path) {
                        log::debug!("Could not remove original after rewrite: {}", e);
                    }
                }
                Err(e) => log::warn!("{:?} failed for {}, keeping original: {}", rewrite, path.display(), e),
            }
        }

        if !rewritten_any {
            return Ok(files);
        }
        collect_media_files(dir)
    }
}

fn is_video_container(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_CONTAINERS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Runs a command with piped output, killing it once `timeout` passes.
///
/// `Ok(None)` means the command timed out. Output is read after exit, which is
/// fine for the small outputs of ffprobe and `-loglevel error` ffmpeg.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<Option<Output>> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stdout = Vec::new();
                let mut stderr = Vec::new();
                if let Some(mut out) = child.stdout.take() {
                    let _ = out.read_to_end(&mut stdout);
                }
                if let Some(mut err) = child.stderr.take() {
                    let _ = err.read_to_end(&mut stderr);
                }
                return Ok(Some(Output { status, stdout, stderr }));
            }
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
    }
}

/// What ffprobe tells about one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub has_video: bool,
    /// `None` when only a presence check for video was possible
    pub has_audio: Option<bool>,
    /// Codec of the first video stream, lowercase
    pub video_codec: Option<String>,
    pub sample_aspect_ratio: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rotate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    sample_aspect_ratio: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl StreamInfo {
    /// Parses `ffprobe -show_streams -of json` output.
    ///
    /// Streams without a codec name are ignored.
    pub fn from_ffprobe_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        let probe: FfprobeOutput = serde_json::from_slice(json)?;
        let mut info = StreamInfo {
            has_audio: Some(false),
            ..StreamInfo::default()
        };

        for mut stream in probe.streams {
            let Some(codec) = stream.codec_name.take().filter(|c| !c.is_empty()) else {
                continue;
            };
            match stream.codec_type.as_deref() {
                Some("video") if !info.has_video => {
                    info.has_video = true;
                    info.video_codec = Some(codec.to_lowercase());
                    info.sample_aspect_ratio = stream.sample_aspect_ratio.filter(|s| !s.is_empty());
                    info.width = stream.width;
                    info.height = stream.height;
                    info.rotate = stream.tags.remove("rotate").filter(|r| !r.is_empty());
                }
                Some("audio") => info.has_audio = Some(true),
                _ => {}
            }
        }
        Ok(info)
    }

    /// Width and height as displayed, swapped for quarter-turn rotations.
    pub fn display_dimensions(&self) -> Option<(u32, u32)> {
        let width = self.width.filter(|w| *w > 0)?;
        let height = self.height.filter(|h| *h > 0)?;
        match self.rotate.as_deref().map(str::trim) {
            Some("90" | "270" | "-90") => Some((height, width)),
            _ => Some((width, height)),
        }
    }
}

/// One ffmpeg rewrite of a video container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// No video stream: keep only the audio as m4a
    ExtractAudio,
    /// Re-encode to H.264/AAC mp4
    Transcode,
    /// Set SAR to 1:1 in the H.264 bitstream without re-encoding
    SquarePixels,
}

impl Rewrite {
    /// Picks the rewrite a file needs, if any.
    pub fn plan(info: &StreamInfo) -> Option<Self> {
        if !info.has_video {
            // Unknown audio presence counts as present.
            return info.has_audio.unwrap_or(true).then_some(Rewrite::ExtractAudio);
        }
        match info.video_codec.as_deref() {
            Some("h264") => match info.sample_aspect_ratio.as_deref() {
                Some(sar) if sar != "1:1" => Some(Rewrite::SquarePixels),
                _ => None,
            },
            Some(_) => Some(Rewrite::Transcode),
            None => None,
        }
    }

    /// Where the rewritten file goes, next to the input.
    pub fn output_path(self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self {
            Rewrite::ExtractAudio => format!("{}.m4a", stem),
            Rewrite::Transcode => format!("{} [tg].mp4", stem),
            Rewrite::SquarePixels => format!("{} [sar].mp4", stem),
        };
        input.with_file_name(name)
    }

    /// ffmpeg arguments between the input and the output path.
    pub fn ffmpeg_args(self) -> &'static [&'static str] {
        match self {
            Rewrite::ExtractAudio => &["-vn", "-c:a", "aac", "-b:a", "128k"],
            Rewrite::Transcode => &[
                "-vf",
                "scale=trunc(iw/2)*2:trunc(ih/2)*2,setsar=1",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-crf",
                "23",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
            ],
            Rewrite::SquarePixels => &[
                "-c",
                "copy",
                "-bsf:v",
                "h264_metadata=sample_aspect_ratio=1/1",
                "-movflags",
                "+faststart",
            ],
        }
    }
}
