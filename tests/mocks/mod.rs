//! Fakes for driving the worker and the submission helpers without
//! Telegram or yt-dlp.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use linkdrop::core::error::{AppError, AppResult};
use linkdrop::download::progress::{ProgressSender, RawProgress};
use linkdrop::download::source::{AcquireError, AcquireRequest, Acquirer, ProbeResult};
use linkdrop::telegram::delivery::FileDelivery;
use linkdrop::telegram::status::{StatusSink, Tone};
use teloxide::types::{ChatId, MessageId};

/// What the scripted acquirer does on one `acquire` call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes these files into the output directory and reports progress
    Produce(Vec<&'static str>),
    /// Writes the files after blocking for a while
    Slow(Duration, Vec<&'static str>),
    /// Succeeds without producing anything
    Nothing,
    /// Fails as an unsupported link
    Unsupported,
    /// Fails as a broken tool run
    Crash,
    Panic,
}

/// Acquirer that follows a queue of scripts, one per call.
///
/// Once the queue is empty every call produces a single `video.mp4`.
pub struct ScriptedAcquirer {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<AcquireRequest>>,
    probe: Mutex<Option<ProbeResult>>,
}

impl ScriptedAcquirer {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            probe: Mutex::new(Some(ProbeResult::default())),
        })
    }

    pub fn set_probe(&self, probe: Option<ProbeResult>) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn requests(&self) -> Vec<AcquireRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn write_files(dir: &Path, names: &[&str], progress: &ProgressSender) -> Result<Vec<PathBuf>, AcquireError> {
        let mut files = Vec::new();
        for name in names {
            progress.submit(RawProgress::Downloading {
                key: name.to_string(),
                downloaded: Some(50),
                total: Some(100),
                percent_hint: None,
            });
            let path = dir.join(name);
            std::fs::write(&path, b"media")?;
            progress.submit(RawProgress::Finished {
                key: name.to_string(),
                total: Some(100),
            });
            files.push(path);
        }
        Ok(files)
    }
}

impl Acquirer for ScriptedAcquirer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn probe(&self, url: &str) -> Result<ProbeResult, AcquireError> {
        self.probe
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AcquireError::Unsupported(url.to_string()))
    }

    fn acquire(&self, request: &AcquireRequest, progress: &ProgressSender) -> Result<Vec<PathBuf>, AcquireError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Produce(vec!["video.mp4"]));

        match script {
            Script::Produce(names) => Self::write_files(&request.output_dir, &names, progress),
            Script::Slow(delay, names) => {
                std::thread::sleep(delay);
                Self::write_files(&request.output_dir, &names, progress)
            }
            Script::Nothing => Ok(Vec::new()),
            Script::Unsupported => Err(AcquireError::Unsupported("Unsupported URL".to_string())),
            Script::Crash => Err(AcquireError::Process("exit status 1".to_string())),
            Script::Panic => panic!("scripted acquirer panic"),
        }
    }
}

/// One recorded status edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Render {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub tone: Tone,
}

#[derive(Default)]
pub struct RecordingStatus {
    renders: Mutex<Vec<Render>>,
}

impl RecordingStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn renders(&self) -> Vec<Render> {
        self.renders.lock().unwrap().clone()
    }

    /// Texts rendered into one status message, oldest first.
    pub fn texts_for(&self, message_id: MessageId) -> Vec<String> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.message_id == message_id)
            .map(|r| r.text.clone())
            .collect()
    }

    pub fn last_for(&self, message_id: MessageId) -> Option<Render> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.message_id == message_id)
            .cloned()
    }
}

#[async_trait]
impl StatusSink for RecordingStatus {
    async fn render(&self, chat_id: ChatId, message_id: MessageId, text: &str, tone: Tone) -> AppResult<()> {
        self.renders.lock().unwrap().push(Render {
            chat_id,
            message_id,
            text: text.to_string(),
            tone,
        });
        Ok(())
    }
}

/// Records delivered files; optionally fails every delivery.
#[derive(Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<(ChatId, String)>>,
    fail: bool,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    /// `(chat, file name)` pairs in delivery order.
    pub fn delivered(&self) -> Vec<(ChatId, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileDelivery for RecordingDelivery {
    async fn deliver(&self, chat_id: ChatId, path: &Path) -> AppResult<()> {
        if self.fail {
            return Err(AppError::Delivery("upload rejected".to_string()));
        }
        if !path.exists() {
            return Err(AppError::Delivery(format!("missing file {}", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.delivered.lock().unwrap().push((chat_id, name));
        Ok(())
    }
}
