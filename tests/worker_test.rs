//! Worker integration tests with scripted acquisition, status and delivery.

mod mocks;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use linkdrop::core::services::{AppContext, Services};
use linkdrop::download::queue::{Job, JobQueue};
use linkdrop::download::reporter::ReporterConfig;
use linkdrop::download::worker::{
    failure_text, queue_position_text, JobOutcome, JobState, Worker, WorkerConfig, COMPLETED_TEXT, DONE_TEXT,
    NO_OUTPUT_TEXT, STARTING_TEXT,
};
use linkdrop::telegram::status::Tone;
use mocks::{RecordingDelivery, RecordingStatus, ScriptedAcquirer, Script};
use pretty_assertions::assert_eq;
use teloxide::types::{ChatId, MessageId};

fn config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        download_root: root.to_path_buf(),
        reporter: ReporterConfig {
            min_interval: Duration::ZERO,
            stall_interval: Duration::from_secs(10),
        },
    }
}

fn session_dirs(root: &Path) -> Vec<String> {
    match std::fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("session-"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn job(message_id: i32, url: &str) -> Job {
    Job::new(ChatId(100), url, MessageId(message_id))
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_successful_job_delivers_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let acquirer = ScriptedAcquirer::new(vec![Script::Produce(vec!["clip.mp4", "clip.m4a"])]);
    let status = RecordingStatus::new();
    let delivery = RecordingDelivery::new();
    let worker = Worker::new(
        Arc::new(JobQueue::new()),
        acquirer.clone(),
        delivery.clone(),
        status.clone(),
        config(root.path()),
    );

    let job = job(7, "https://example.com/watch?v=1").with_max_height(720);
    let outcome = worker.process(&job).await;

    assert_eq!(outcome, JobOutcome::Completed { files: 2 });
    assert_eq!(
        delivery.delivered(),
        vec![(ChatId(100), "clip.mp4".to_string()), (ChatId(100), "clip.m4a".to_string())]
    );
    assert!(session_dirs(root.path()).is_empty());

    let requests = acquirer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].urls, vec!["https://example.com/watch?v=1".to_string()]);
    assert_eq!(requests[0].max_height, Some(720));
    assert!(requests[0].output_dir.starts_with(root.path()));

    let texts = status.texts_for(MessageId(7));
    assert_eq!(texts.first().map(String::as_str), Some(STARTING_TEXT));
    assert!(texts.iter().any(|t| t == COMPLETED_TEXT));
    assert!(texts.iter().any(|t| t == "Uploading file to Telegram (2/2)..."));
    let last = status.last_for(MessageId(7)).unwrap();
    assert_eq!(last.text, DONE_TEXT);
    assert_eq!(last.tone, Tone::Plain);
}

#[tokio::test]
async fn test_progress_never_goes_backwards() {
    let root = tempfile::tempdir().unwrap();
    let acquirer = ScriptedAcquirer::new(vec![Script::Produce(vec!["a.mp4", "b.mp4"])]);
    let status = RecordingStatus::new();
    let worker = Worker::new(
        Arc::new(JobQueue::new()),
        acquirer,
        RecordingDelivery::new(),
        status.clone(),
        config(root.path()),
    );

    worker.process(&job(1, "https://example.com/p")).await;

    let percents: Vec<u32> = status
        .texts_for(MessageId(1))
        .iter()
        .filter_map(|t| t.strip_prefix("Downloading... "))
        .filter_map(|t| t.trim_end_matches('%').parse().ok())
        .collect();
    assert!(percents.windows(2).all(|w| w[0] < w[1]), "percents: {:?}", percents);
}

#[tokio::test]
async fn test_acquisition_failure_keeps_session_dir() {
    let root = tempfile::tempdir().unwrap();
    let status = RecordingStatus::new();
    let delivery = RecordingDelivery::new();
    let worker = Worker::new(
        Arc::new(JobQueue::new()),
        ScriptedAcquirer::new(vec![Script::Unsupported]),
        delivery.clone(),
        status.clone(),
        config(root.path()),
    );

    let outcome = worker.process(&job(3, "https://example.com/nope")).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed {
            state: JobState::Acquiring
        }
    );
    assert!(delivery.delivered().is_empty());
    assert_eq!(session_dirs(root.path()).len(), 1);
    let last = status.last_for(MessageId(3)).unwrap();
    assert_eq!(last.text, failure_text("https://example.com/nope"));
    assert_eq!(last.tone, Tone::Plain);
}

#[tokio::test]
async fn test_tool_failure_reports_same_message() {
    let root = tempfile::tempdir().unwrap();
    let status = RecordingStatus::new();
    let worker = Worker::new(
        Arc::new(JobQueue::new()),
        ScriptedAcquirer::new(vec![Script::Crash]),
        RecordingDelivery::new(),
        status.clone(),
        config(root.path()),
    );

    worker.process(&job(4, "https://example.com/x")).await;

    assert_eq!(
        status.last_for(MessageId(4)).unwrap().text,
        failure_text("https://example.com/x")
    );
}

#[tokio::test]
async fn test_no_output() {
    let root = tempfile::tempdir().unwrap();
    let status = RecordingStatus::new();
    let delivery = RecordingDelivery::new();
    let worker = Worker::new(
        Arc::new(JobQueue::new()),
        ScriptedAcquirer::new(vec![Script::Nothing]),
        delivery.clone(),
        status.clone(),
        config(root.path()),
    );

    let outcome = worker.process(&job(5, "https://example.com/empty")).await;

    assert_eq!(outcome, JobOutcome::NoOutput);
    assert!(delivery.delivered().is_empty());
    // Kept for inspection.
    assert_eq!(session_dirs(root.path()).len(), 1);
    let last = status.last_for(MessageId(5)).unwrap();
    assert_eq!(last.text, NO_OUTPUT_TEXT);
    assert_eq!(last.tone, Tone::Plain);
}

#[tokio::test]
async fn test_delivery_failure() {
    let root = tempfile::tempdir().unwrap();
    let status = RecordingStatus::new();
    let worker = Worker::new(
        Arc::new(JobQueue::new()),
        ScriptedAcquirer::new(vec![Script::Produce(vec!["clip.mp4"])]),
        RecordingDelivery::failing(),
        status.clone(),
        config(root.path()),
    );

    let outcome = worker.process(&job(6, "https://example.com/big")).await;

    assert_eq!(
        outcome,
        JobOutcome::Failed {
            state: JobState::Delivering
        }
    );
    assert_eq!(session_dirs(root.path()).len(), 1);
    assert_eq!(
        status.last_for(MessageId(6)).unwrap().text,
        failure_text("https://example.com/big")
    );
}

#[tokio::test]
async fn test_panicking_job_does_not_stop_the_worker() {
    let root = tempfile::tempdir().unwrap();
    let context = Arc::new(AppContext::new(Duration::from_secs(60)));
    let status = RecordingStatus::new();
    let delivery = RecordingDelivery::new();
    let worker = Worker::new(
        Arc::clone(&context.queue),
        ScriptedAcquirer::new(vec![Script::Panic, Script::Produce(vec!["ok.mp4"])]),
        delivery.clone(),
        status.clone(),
        config(root.path()),
    );
    let services = Services::start(Arc::clone(&context), worker, None);

    context.queue.enqueue(job(10, "https://example.com/boom")).await;
    context.queue.enqueue(job(11, "https://example.com/fine")).await;

    assert!(eventually(|| delivery.delivered().len() == 1).await);
    assert!(eventually(|| status.last_for(MessageId(11)).map(|r| r.text) == Some(DONE_TEXT.to_string())).await);
    assert_eq!(
        status.last_for(MessageId(10)).unwrap().text,
        failure_text("https://example.com/boom")
    );
    assert!(services.worker_running());

    services.shutdown().await;
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order_and_positions_are_rebroadcast() {
    let root = tempfile::tempdir().unwrap();
    let context = Arc::new(AppContext::new(Duration::from_secs(60)));
    let acquirer = ScriptedAcquirer::new(Vec::new());
    let status = RecordingStatus::new();
    let delivery = RecordingDelivery::new();

    assert_eq!(context.queue.enqueue(job(21, "https://example.com/a")).await, 1);
    assert_eq!(context.queue.enqueue(job(22, "https://example.com/b")).await, 2);
    assert_eq!(context.queue.enqueue(job(23, "https://example.com/c")).await, 3);

    let worker = Worker::new(
        Arc::clone(&context.queue),
        acquirer.clone(),
        delivery.clone(),
        status.clone(),
        config(root.path()),
    );
    let services = Services::start(Arc::clone(&context), worker, None);

    assert!(eventually(|| delivery.delivered().len() == 3).await);
    services.shutdown().await;

    let urls: Vec<String> = acquirer.requests().into_iter().flat_map(|r| r.urls).collect();
    assert_eq!(
        urls,
        vec![
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
            "https://example.com/c".to_string(),
        ]
    );

    let b = status.texts_for(MessageId(22));
    assert_eq!(b.first(), Some(&queue_position_text(1)));
    let c = status.texts_for(MessageId(23));
    assert_eq!(&c[..2], &[queue_position_text(2), queue_position_text(1)]);
    assert!(context.queue.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_abandons_in_flight_job() {
    let root = tempfile::tempdir().unwrap();
    let context = Arc::new(AppContext::new(Duration::from_secs(60)));
    let delivery = RecordingDelivery::new();
    let worker = Worker::new(
        Arc::clone(&context.queue),
        ScriptedAcquirer::new(vec![Script::Slow(Duration::from_millis(300), vec!["late.mp4"])]),
        delivery.clone(),
        RecordingStatus::new(),
        config(root.path()),
    );
    let services = Services::start(Arc::clone(&context), worker, Some(Duration::from_secs(60)));

    context.queue.enqueue(job(30, "https://example.com/slow")).await;
    assert!(eventually(|| session_dirs(root.path()).len() == 1).await);

    tokio::time::timeout(Duration::from_secs(2), services.shutdown())
        .await
        .expect("shutdown should not wait for the acquisition");
    assert!(delivery.delivered().is_empty());
    assert_eq!(session_dirs(root.path()).len(), 1);
}

#[tokio::test]
async fn test_shutdown_when_idle() {
    let root = tempfile::tempdir().unwrap();
    let context = Arc::new(AppContext::new(Duration::from_secs(60)));
    let worker = Worker::new(
        Arc::clone(&context.queue),
        ScriptedAcquirer::new(Vec::new()),
        RecordingDelivery::new(),
        RecordingStatus::new(),
        config(root.path()),
    );
    let services = Services::start(Arc::clone(&context), worker, Some(Duration::from_millis(10)));
    assert!(services.worker_running());

    tokio::time::timeout(Duration::from_secs(2), services.shutdown())
        .await
        .expect("idle shutdown");
}
