//! File delivery to Telegram.
//!
//! Files go out as video, audio or document depending on the extension and are
//! captioned with their file name. With a local Bot API server the file is not
//! uploaded; the server is handed a `file://` URI instead, optionally after
//! rewriting the path prefix to what the server sees. Videos carry their
//! display width and height when ffprobe can read them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::download::source::MediaTools;

/// Hands a produced file to the requesting chat.
#[async_trait]
pub trait FileDelivery: Send + Sync {
    async fn deliver(&self, chat_id: ChatId, path: &Path) -> AppResult<()>;
}

/// How a file is presented in the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "mp4" | "mkv" | "webm" => MediaKind::Video,
            "mp3" | "m4a" | "aac" | "wav" | "flac" | "ogg" => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

/// Path prefix rewrite between this process and a local Bot API server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalPathMap {
    pub from: Option<PathBuf>,
    pub to: Option<PathBuf>,
}

impl LocalPathMap {
    /// Rewrites `path` if it lies under `from`; otherwise returns it unchanged.
    pub fn map(&self, path: &Path) -> PathBuf {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) => match path.strip_prefix(from) {
                Ok(rel) => to.join(rel),
                Err(_) => {
                    log::debug!(
                        "Path {} is outside {}, sending unmapped",
                        path.display(),
                        from.display()
                    );
                    path.to_path_buf()
                }
            },
            _ => path.to_path_buf(),
        }
    }

    /// `file://` URI of the mapped path.
    pub fn file_uri(&self, path: &Path) -> AppResult<Url> {
        let mapped = self.map(path);
        Url::from_file_path(&mapped)
            .map_err(|_| AppError::Delivery(format!("not an absolute path: {}", mapped.display())))
    }
}

pub struct TelegramDelivery {
    bot: Bot,
    /// `Some` when files are passed to a local Bot API server by URI
    local: Option<LocalPathMap>,
    media_tools: MediaTools,
}

impl TelegramDelivery {
    pub fn new(bot: Bot, local: Option<LocalPathMap>, media_tools: MediaTools) -> Self {
        Self {
            bot,
            local,
            media_tools,
        }
    }

    pub fn from_env(bot: Bot) -> Self {
        let local = config::delivery::LOCAL_MODE.then(|| LocalPathMap {
            from: config::delivery::LOCAL_PATH_FROM.clone(),
            to: config::delivery::LOCAL_PATH_TO.clone(),
        });
        let media_tools = MediaTools::from_location(config::ytdlp::FFMPEG_LOCATION.as_deref());
        Self::new(bot, local, media_tools)
    }

    async fn video_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        let tools = self.media_tools.clone();
        let path = path.to_path_buf();
        let dims = tokio::task::spawn_blocking(move || tools.video_dimensions(&path))
            .await
            .ok()
            .flatten();
        log::debug!("Video dimensions: {:?}", dims);
        dims
    }
}

#[async_trait]
impl FileDelivery for TelegramDelivery {
    async fn deliver(&self, chat_id: ChatId, path: &Path) -> AppResult<()> {
        let abs_path = fs_err::tokio::canonicalize(path).await?;
        let caption = abs_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = MediaKind::from_path(&abs_path);

        let input = match self.local {
            Some(ref map) => {
                let uri = map.file_uri(&abs_path)?;
                log::info!("Sending via local file uri={}", uri);
                InputFile::url(uri)
            }
            None => InputFile::file(abs_path.clone()),
        };
        log::info!(
            "Sending {:?} chat_id={} path={} local_mode={}",
            kind,
            chat_id,
            abs_path.display(),
            self.local.is_some()
        );

        match kind {
            MediaKind::Video => {
                let mut request = self
                    .bot
                    .send_video(chat_id, input)
                    .caption(caption)
                    .supports_streaming(true);
                if let Some((width, height)) = self.video_dimensions(&abs_path).await {
                    request = request.width(width).height(height);
                }
                request.await?;
            }
            MediaKind::Audio => {
                self.bot.send_audio(chat_id, input).caption(caption).await?;
            }
            MediaKind::Document => {
                self.bot.send_document(chat_id, input).caption(caption).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_by_extension() {
        assert_eq!(MediaKind::from_path(Path::new("/d/clip.mp4")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("/d/clip.WEBM")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("/d/song.m4a")), MediaKind::Audio);
        assert_eq!(MediaKind::from_path(Path::new("/d/song.flac")), MediaKind::Audio);
        assert_eq!(MediaKind::from_path(Path::new("/d/readme.pdf")), MediaKind::Document);
        assert_eq!(MediaKind::from_path(Path::new("/d/noext")), MediaKind::Document);
    }

    #[test]
    fn test_local_path_mapping() {
        let map = LocalPathMap {
            from: Some(PathBuf::from("/srv/bot/downloads")),
            to: Some(PathBuf::from("/var/lib/telegram-bot-api/downloads")),
        };
        assert_eq!(
            map.map(Path::new("/srv/bot/downloads/session-1/a.mp4")),
            PathBuf::from("/var/lib/telegram-bot-api/downloads/session-1/a.mp4")
        );
        assert_eq!(map.map(Path::new("/other/a.mp4")), PathBuf::from("/other/a.mp4"));
    }

    #[test]
    fn test_mapping_needs_both_prefixes() {
        let map = LocalPathMap {
            from: Some(PathBuf::from("/srv")),
            to: None,
        };
        assert_eq!(map.map(Path::new("/srv/a.mp4")), PathBuf::from("/srv/a.mp4"));
    }

    #[test]
    fn test_file_uri_is_percent_encoded() {
        let map = LocalPathMap::default();
        let uri = map.file_uri(Path::new("/data/My Clip [abc].mp4")).unwrap();
        assert_eq!(uri.scheme(), "file");
        assert!(uri.as_str().starts_with("file:///data/My%20Clip"));
    }

    #[test]
    fn test_file_uri_rejects_relative_path() {
        let map = LocalPathMap::default();
        assert!(matches!(map.file_uri(Path::new("relative.mp4")), Err(AppError::Delivery(_))));
    }
}
