//! Rate-limited rendering of job progress into the status message.
//!
//! A [`ProgressPipeline`] runs two tasks per job: a pump that feeds raw
//! backend events through the [`ProgressAggregator`], and the reporter loop
//! ([`run_reporter`]) that turns coalesced events into status edits, including
//! stall notices when nothing arrives for a while.

use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::types::{ChatId, MessageId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::download::progress::{Phase, ProgressAggregator, ProgressEvent, ProgressSender, RawProgress};
use crate::telegram::status::{render_quietly, StatusSink, Tone};

pub const PROCESSING_TEXT: &str = "Processing...";
pub const DOWNLOADING_TEXT: &str = "Downloading...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig {
    /// At most one edit per this interval
    pub min_interval: Duration,
    /// No event for this long counts as a stall
    pub stall_interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            stall_interval: Duration::from_secs(10),
        }
    }
}

impl ReporterConfig {
    pub fn from_env() -> Self {
        Self {
            min_interval: config::progress::min_interval(),
            stall_interval: config::progress::stall_interval(),
        }
    }
}

pub fn downloading_text(percent: u8) -> String {
    format!("Downloading... {}%", percent)
}

/// Formats a duration as `M:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Text shown when no progress arrived within the stall window.
///
/// Before any non-zero percent was seen the download text carries no annotation.
pub fn stall_text(phase: Phase, last_percent: u8, stalled_for: Duration) -> String {
    match phase {
        Phase::Processing => format!("Processing... (no progress for {})", format_elapsed(stalled_for)),
        Phase::Downloading if last_percent == 0 => DOWNLOADING_TEXT.to_string(),
        Phase::Downloading => format!(
            "Downloading... {}% (no progress for {})",
            last_percent,
            format_elapsed(stalled_for)
        ),
    }
}

/// Renders progress for one status message until `cancel` fires.
pub async fn run_reporter(
    sink: Arc<dyn StatusSink>,
    chat_id: ChatId,
    message_id: MessageId,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    config: ReporterConfig,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = report(sink.as_ref(), chat_id, message_id, events, config) => {}
    }
    log::debug!("Reporter for chat_id={} stopped", chat_id);
}

async fn report(
    sink: &dyn StatusSink,
    chat_id: ChatId,
    message_id: MessageId,
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    config: ReporterConfig,
) {
    let mut phase = Phase::Downloading;
    let mut last_rendered_percent: Option<u8> = None;
    let mut last_render: Option<Instant> = None;
    let mut last_progress = Instant::now();
    let mut last_seen_percent: u8 = 0;

    loop {
        let next = tokio::time::timeout(config.stall_interval, events.recv()).await;
        let now = Instant::now();
        let may_render = last_render.is_none_or(|at| now.duration_since(at) >= config.min_interval);

        match next {
            Ok(Some(event)) => {
                last_progress = now;
                phase = event.phase;
                match event.phase {
                    Phase::Processing => {
                        if !may_render {
                            continue;
                        }
                        render_quietly(sink, chat_id, message_id, PROCESSING_TEXT, Tone::Italic).await;
                        last_render = Some(now);
                    }
                    Phase::Downloading => {
                        let Some(percent) = event.percent else {
                            continue;
                        };
                        last_seen_percent = last_seen_percent.max(percent);
                        if last_rendered_percent == Some(percent) || !may_render {
                            continue;
                        }
                        render_quietly(sink, chat_id, message_id, &downloading_text(percent), Tone::Italic).await;
                        last_rendered_percent = Some(percent);
                        last_render = Some(now);
                    }
                }
            }
            // Producer is gone; idle until cancelled.
            Ok(None) => std::future::pending::<()>().await,
            Err(_) => {
                if !may_render {
                    continue;
                }
                let text = stall_text(phase, last_seen_percent, now.duration_since(last_progress));
                render_quietly(sink, chat_id, message_id, &text, Tone::Italic).await;
                last_render = Some(now);
            }
        }
    }
}

/// Aggregator pump plus reporter for one job.
///
/// [`stop`](Self::stop) cancels both tasks and waits for them to finish.
/// Dropping the pipeline without stopping it aborts the tasks.
pub struct ProgressPipeline {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ProgressPipeline {
    /// Spawns the pump and the reporter; returns the handle the backend submits raw events through.
    pub fn start(
        sink: Arc<dyn StatusSink>,
        chat_id: ChatId,
        message_id: MessageId,
        config: ReporterConfig,
    ) -> (ProgressSender, Self) {
        let cancel = CancellationToken::new();
        let (sender, raw_rx) = ProgressSender::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump(raw_rx, event_tx, cancel.clone()));
        let reporter = tokio::spawn(run_reporter(sink, chat_id, message_id, event_rx, config, cancel.clone()));

        (
            sender,
            Self {
                cancel,
                tasks: vec![pump, reporter],
            },
        )
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    log::warn!("Progress task panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for ProgressPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn pump(
    mut raw: mpsc::UnboundedReceiver<RawProgress>,
    events: mpsc::UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
) {
    let mut aggregator = ProgressAggregator::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = raw.recv() => next,
        };
        let Some(raw) = next else { break };
        if let Some(event) = aggregator.ingest(raw) {
            if events.send(event).is_err() {
                break;
            }
        }
    }
}
