//! The single background worker.
//!
//! Pulls jobs from the [`JobQueue`] one at a time and drives each through
//! `Dequeued → Preparing → Acquiring → Delivering → Completed`, with `Failed`
//! reachable from every non-terminal state. Acquisition runs on a blocking
//! thread while the progress pipeline renders status edits. A failing or
//! panicking job never takes the loop down; only cancellation does.

use std::fmt;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::download::queue::{Job, JobQueue};
use crate::download::reporter::{ProgressPipeline, ReporterConfig};
use crate::download::session::SessionDir;
use crate::download::source::{AcquireRequest, Acquirer};
use crate::telegram::delivery::FileDelivery;
use crate::telegram::status::{render_quietly, StatusSink, Tone};

pub const STARTING_TEXT: &str = "Starting download... 0%";
pub const COMPLETED_TEXT: &str = "Download completed... 100%";
pub const DONE_TEXT: &str = "Done.";
pub const NO_OUTPUT_TEXT: &str = "Download finished, but the file was not found.";

/// Shown to waiting jobs and in the submission reply.
pub fn queue_position_text(position: usize) -> String {
    format!("In queue. Position: {}.\nPlease wait...", position)
}

pub fn uploading_text(index: usize, total: usize) -> String {
    if total > 1 {
        format!("Uploading file to Telegram ({}/{})...", index, total)
    } else {
        "Uploading file to Telegram...".to_string()
    }
}

/// Generic failure message, the same for every kind of failure.
pub fn failure_text(request_url: &str) -> String {
    format!(
        "This service cannot download from this URL:\n{}\n\nPlease try a different link.",
        request_url
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Session directories are created below this root
    pub download_root: PathBuf,
    pub reporter: ReporterConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            download_root: config::download_root(),
            reporter: ReporterConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Dequeued,
    Preparing,
    Acquiring,
    Delivering,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Dequeued => "dequeued",
            JobState::Preparing => "preparing",
            JobState::Acquiring => "acquiring",
            JobState::Delivering => "delivering",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How one job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// All files delivered and the session directory removed
    Completed { files: usize },
    /// Acquisition succeeded but produced nothing; the session directory is kept
    NoOutput,
    /// The job failed while in `state`; the session directory (if any) is kept
    Failed { state: JobState },
}

pub struct Worker {
    queue: Arc<JobQueue>,
    acquirer: Arc<dyn Acquirer>,
    delivery: Arc<dyn FileDelivery>,
    status: Arc<dyn StatusSink>,
    config: WorkerConfig,
}

/// Owned handle of the running worker task.
pub struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancels the worker and waits for the loop to exit.
    ///
    /// An in-flight job is abandoned as is, without cleanup.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                log::error!("Worker task panicked: {}", e);
            }
        }
    }
}

impl Worker {
    pub fn new(
        queue: Arc<JobQueue>,
        acquirer: Arc<dyn Acquirer>,
        delivery: Arc<dyn FileDelivery>,
        status: Arc<dyn StatusSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            acquirer,
            delivery,
            status,
            config,
        }
    }

    /// Starts the worker loop on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> WorkerHandle {
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { self.run(cancel).await }
        });
        log::info!("Worker task started");
        WorkerHandle { cancel, task }
    }

    /// Processes jobs until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("Worker loop started (acquirer: {})", self.acquirer.name());
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = self.queue.dequeue() => job,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Job {} abandoned by shutdown", job.id);
                    break;
                }
                outcome = self.process(&job) => {
                    log::info!("Job {} finished: {:?}", job.id, outcome);
                }
            }
        }
        log::info!("Worker loop cancelled");
    }

    /// Runs one job to completion, isolating every failure (panics included).
    pub async fn process(&self, job: &Job) -> JobOutcome {
        let mut state = JobState::Dequeued;
        let result = AssertUnwindSafe(self.execute(job, &mut state)).catch_unwind().await;

        let err = match result {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(e)) => e,
            Err(panic) => AppError::Internal(panic_message(panic.as_ref())),
        };

        if err.is_unsupported_input() {
            log::warn!("Job {} cannot be handled ({}): {}", job.id, job.request_url, err);
        } else {
            log::error!("Job {} failed in state {}: {}", job.id, state, err);
        }
        render_quietly(
            self.status.as_ref(),
            job.chat_id,
            job.status_message_id,
            &failure_text(&job.request_url),
            Tone::Plain,
        )
        .await;
        log::info!("Job {} {} -> {}", job.id, state, JobState::Failed);
        JobOutcome::Failed { state }
    }

    async fn execute(&self, job: &Job, state: &mut JobState) -> AppResult<JobOutcome> {
        self.broadcast_positions().await;

        self.enter(job, state, JobState::Preparing);
        self.render(job, STARTING_TEXT, Tone::Italic).await;
        log::info!(
            "Start job {} chat_id={} urls={} max_height={:?} request_url={}",
            job.id,
            job.chat_id,
            job.urls.len(),
            job.max_height,
            job.request_url
        );
        let session = SessionDir::create(&self.config.download_root).await?;

        self.enter(job, state, JobState::Acquiring);
        let (sender, pipeline) = ProgressPipeline::start(
            Arc::clone(&self.status),
            job.chat_id,
            job.status_message_id,
            self.config.reporter,
        );
        let request = AcquireRequest {
            urls: job.urls.clone(),
            output_dir: session.path().to_path_buf(),
            max_height: job.max_height,
            playlist_items: job.playlist_items.clone(),
        };
        let acquirer = Arc::clone(&self.acquirer);
        let acquired = tokio::task::spawn_blocking(move || acquirer.acquire(&request, &sender)).await;
        pipeline.stop().await;
        let files = acquired??;

        if files.is_empty() {
            log::warn!(
                "Job {} finished but no files found, session dir kept: {}",
                job.id,
                session.path().display()
            );
            self.render(job, NO_OUTPUT_TEXT, Tone::Plain).await;
            return Ok(JobOutcome::NoOutput);
        }

        self.render(job, COMPLETED_TEXT, Tone::Italic).await;

        self.enter(job, state, JobState::Delivering);
        let total = files.len();
        for (index, path) in files.iter().enumerate() {
            self.render(job, &uploading_text(index + 1, total), Tone::Italic).await;
            self.delivery.deliver(job.chat_id, path).await?;

            match fs_err::tokio::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to delete sent file: {}", e),
            }
        }

        self.enter(job, state, JobState::Completed);
        self.render(job, DONE_TEXT, Tone::Plain).await;
        log::info!("Job {} done chat_id={} files={}", job.id, job.chat_id, total);

        if let Err(e) = session.cleanup().await {
            log::warn!("Failed to clean up session dir {}: {}", session.path().display(), e);
        }
        Ok(JobOutcome::Completed { files: total })
    }

    /// Re-renders the 1-based position of every job still waiting.
    async fn broadcast_positions(&self) {
        let waiting = self.queue.snapshot().await;
        for (index, job) in waiting.iter().enumerate() {
            self.render(job, &queue_position_text(index + 1), Tone::Italic).await;
        }
    }

    async fn render(&self, job: &Job, text: &str, tone: Tone) {
        render_quietly(self.status.as_ref(), job.chat_id, job.status_message_id, text, tone).await;
    }

    fn enter(&self, job: &Job, state: &mut JobState, next: JobState) {
        log::info!("Job {} {} -> {}", job.id, state, next);
        *state = next;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}
