use log::info;
use std::collections::VecDeque;
use teloxide::types::{ChatId, MessageId};
use tokio::sync::{Mutex, Notify};

/// One user-originated download request.
///
/// Built by the submission surface at enqueue time and never mutated afterwards;
/// the worker drops it once the job has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Unique job identifier (UUID), used for log correlation
    pub id: String,
    /// Chat the request came from
    pub chat_id: ChatId,
    /// URL exactly as the user sent it
    pub request_url: String,
    /// Source URLs handed to the acquisition backend (usually just one)
    pub urls: Vec<String>,
    /// Optional video height cap, `None` means best available
    pub max_height: Option<u32>,
    /// Optional playlist item selector in string form, e.g. "3"
    pub playlist_items: Option<String>,
    /// Status message that is edited while the job progresses
    pub status_message_id: MessageId,
}

impl Job {
    /// Creates a job for a single URL with no height cap and no playlist selector.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use teloxide::types::{ChatId, MessageId};
    /// use linkdrop::download::queue::Job;
    ///
    /// let job = Job::new(ChatId(123456789), "https://example.com/watch?v=abc", MessageId(42))
    ///     .with_max_height(720);
    /// ```
    pub fn new(chat_id: ChatId, request_url: impl Into<String>, status_message_id: MessageId) -> Self {
        let request_url = request_url.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id,
            urls: vec![request_url.clone()],
            request_url,
            max_height: None,
            playlist_items: None,
            status_message_id,
        }
    }

    /// Replaces the resolved source URLs.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = Some(max_height);
        self
    }

    pub fn with_playlist_items(mut self, selector: impl Into<String>) -> Self {
        self.playlist_items = Some(selector.into());
        self
    }
}

/// Unbounded FIFO queue of jobs with a single consumer.
///
/// All operations take the same lock, so `snapshot` always observes a
/// state between two complete `enqueue`/`dequeue` calls, never a partial one.
/// Jobs are never reordered or dropped; `dequeue` is the only removal path.
pub struct JobQueue {
    items: Mutex<VecDeque<Job>>,
    available: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    /// Appends a job and returns the 1-based position it now occupies.
    pub async fn enqueue(&self, job: Job) -> usize {
        let position = {
            let mut items = self.items.lock().await;
            info!("Enqueue job {} chat_id={} url={}", job.id, job.chat_id, job.request_url);
            items.push_back(job);
            items.len()
        };
        // A stored permit wakes the consumer even if it is not waiting yet.
        self.available.notify_one();
        position
    }

    /// Removes and returns the oldest job, waiting until one is available.
    pub async fn dequeue(&self) -> Job {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(job) = items.pop_front() {
                    info!("Dequeued job {}, {} still waiting", job.id, items.len());
                    return job;
                }
            }
            self.available.notified().await;
        }
    }

    /// Returns a copy of all currently waiting jobs, oldest first.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Returns the current number of waiting jobs.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(n: i32) -> Job {
        Job::new(ChatId(n as i64), format!("http://example.com/{}", n), MessageId(n))
    }

    #[test]
    fn test_job_new_defaults() {
        let job = Job::new(ChatId(1), "http://x/a", MessageId(7));
        assert!(!job.id.is_empty());
        assert_eq!(job.urls, vec!["http://x/a".to_string()]);
        assert_eq!(job.request_url, "http://x/a");
        assert_eq!(job.max_height, None);
        assert_eq!(job.playlist_items, None);
        assert_eq!(job.status_message_id, MessageId(7));
    }

    #[test]
    fn test_job_builders() {
        let job = Job::new(ChatId(1), "http://x/list", MessageId(7))
            .with_max_height(720)
            .with_playlist_items("3")
            .with_urls(vec!["http://x/a".to_string(), "http://x/b".to_string()]);
        assert_eq!(job.max_height, Some(720));
        assert_eq!(job.playlist_items.as_deref(), Some("3"));
        assert_eq!(job.urls.len(), 2);
        assert_eq!(job.request_url, "http://x/list");
    }

    #[tokio::test]
    async fn test_enqueue_returns_positions() {
        let queue = JobQueue::new();
        assert_eq!(queue.enqueue(job(1)).await, 1);
        assert_eq!(queue.enqueue(job(2)).await, 2);
        assert_eq!(queue.enqueue(job(3)).await, 3);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let queue = JobQueue::new();
        for n in 1..=3 {
            queue.enqueue(job(n)).await;
        }
        assert_eq!(queue.dequeue().await.chat_id, ChatId(1));
        assert_eq!(queue.dequeue().await.chat_id, ChatId(2));
        assert_eq!(queue.dequeue().await.chat_id, ChatId(3));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_remove() {
        let queue = JobQueue::new();
        queue.enqueue(job(1)).await;
        queue.enqueue(job(2)).await;

        let snapshot = queue.snapshot().await;
        let chats: Vec<ChatId> = snapshot.iter().map(|j| j.chat_id).collect();
        assert_eq!(chats, vec![ChatId(1), ChatId(2)]);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(job(9)).await;
        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake up")
            .expect("consumer should not panic");
        assert_eq!(received.chat_id, ChatId(9));
    }

    #[tokio::test]
    async fn test_enqueue_before_wait_is_not_lost() {
        let queue = JobQueue::new();
        queue.enqueue(job(1)).await;
        // The stored permit plus the non-empty list must not make the second
        // dequeue return anything but a real job.
        assert_eq!(queue.dequeue().await.chat_id, ChatId(1));
        queue.enqueue(job(2)).await;
        assert_eq!(queue.dequeue().await.chat_id, ChatId(2));
    }
}
