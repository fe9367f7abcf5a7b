//! Short-lived selection sessions backing the interactive file/quality picker.
//!
//! Sessions are addressed by an opaque 16-hex-character token that fits into
//! inline-button callback data. Expiry is lazy: a lookup of an expired token
//! purges it and reports it as absent. Tokens that are never looked up again
//! stay in memory until the optional periodic sweep (see [`SelectionStore::spawn_sweeper`])
//! removes them, so without the sweep memory grows with the number of
//! abandoned sessions since start.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::types::{ChatId, MessageId, UserId};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::download::queue::Job;

/// One entry of a probed playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    /// 1-based position in the playlist
    pub index: u32,
    pub title: String,
    pub url: String,
    pub duration_secs: Option<u32>,
}

/// Picker state for one probed link.
#[derive(Debug, Clone)]
pub struct PendingSelection {
    pub chat_id: ChatId,
    /// Only this user may change the selection
    pub user_id: UserId,
    pub url: String,
    pub playlist_entries: Vec<PlaylistEntry>,
    pub selected_indices: BTreeSet<u32>,
    /// Available video heights, best first
    pub heights: Vec<u32>,
    /// `None` means "best"
    pub selected_height: Option<u32>,
    pub created_at: Instant,
}

impl PendingSelection {
    pub fn new(chat_id: ChatId, user_id: UserId, url: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id,
            url: url.into(),
            playlist_entries: Vec::new(),
            selected_indices: BTreeSet::new(),
            heights: Vec::new(),
            selected_height: None,
            created_at: Instant::now(),
        }
    }

    pub fn with_playlist(mut self, entries: Vec<PlaylistEntry>) -> Self {
        self.playlist_entries = entries;
        self
    }

    pub fn with_heights(mut self, heights: Vec<u32>) -> Self {
        self.heights = heights;
        self
    }

    /// Selects exactly one playlist entry.
    pub fn select_entry(&mut self, index: u32) {
        self.selected_indices.clear();
        self.selected_indices.insert(index);
    }

    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }

    /// Converts the finished selection into a queueable job.
    ///
    /// A playlist selection downloads the lowest selected entry (entry 1 when
    /// nothing was picked); a plain link downloads the URL as is.
    pub fn into_job(self, status_message_id: MessageId) -> Job {
        let mut job = Job::new(self.chat_id, self.url, status_message_id);
        if !self.playlist_entries.is_empty() {
            let chosen = self.selected_indices.iter().next().copied().unwrap_or(1);
            job = job.with_playlist_items(chosen.to_string());
        }
        if let Some(height) = self.selected_height {
            job = job.with_max_height(height);
        }
        job
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("selection session expired or unknown")]
    NotFound,
    #[error("selection belongs to another user")]
    NotOwner,
}

/// Generates a compact, unpredictable token (8 random bytes, hex-encoded).
pub fn new_token() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Keyed store of pending selections with TTL-based expiry.
pub struct SelectionStore {
    pending: RwLock<HashMap<String, PendingSelection>>,
    ttl: Duration,
}

impl SelectionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores the selection under a fresh token and returns the token.
    pub async fn create(&self, selection: PendingSelection) -> String {
        let mut pending = self.pending.write().await;
        let mut token = new_token();
        while pending.contains_key(&token) {
            token = new_token();
        }
        pending.insert(token.clone(), selection);
        token
    }

    /// Returns a copy of the selection, purging it if it has expired.
    pub async fn get(&self, token: &str) -> Option<PendingSelection> {
        let now = Instant::now();
        {
            let pending = self.pending.read().await;
            match pending.get(token) {
                None => return None,
                Some(selection) if !selection.is_expired(self.ttl, now) => return Some(selection.clone()),
                Some(_) => {}
            }
        }
        self.purge_if_expired(token, now).await;
        None
    }

    /// Removes and returns the selection unless it has expired.
    pub async fn take(&self, token: &str) -> Option<PendingSelection> {
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        let selection = pending.remove(token)?;
        if selection.is_expired(self.ttl, now) {
            log::debug!("Selection {} expired on take", token);
            return None;
        }
        Some(selection)
    }

    /// Applies `change` to the selection on behalf of `user_id`.
    ///
    /// Fails with [`SelectionError::NotOwner`] for anyone but the owning user
    /// and with [`SelectionError::NotFound`] for unknown or expired tokens.
    pub async fn update<F>(&self, token: &str, user_id: UserId, change: F) -> Result<PendingSelection, SelectionError>
    where
        F: FnOnce(&mut PendingSelection),
    {
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        let expired = match pending.get(token) {
            None => return Err(SelectionError::NotFound),
            Some(selection) => selection.is_expired(self.ttl, now),
        };
        if expired {
            pending.remove(token);
            return Err(SelectionError::NotFound);
        }
        let selection = pending.get_mut(token).ok_or(SelectionError::NotFound)?;
        if selection.user_id != user_id {
            return Err(SelectionError::NotOwner);
        }
        change(selection);
        Ok(selection.clone())
    }

    /// Removes every expired selection and returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, selection| !selection.is_expired(self.ttl, now));
        let removed = before - pending.len();
        if removed > 0 {
            log::debug!("Swept {} expired selections", removed);
        }
        removed
    }

    /// Number of stored selections, expired ones included.
    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }

    /// Runs [`sweep`](Self::sweep) every `every` until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            log::debug!("Selection sweeper stopped");
        })
    }

    async fn purge_if_expired(&self, token: &str, now: Instant) {
        let mut pending = self.pending.write().await;
        if pending.get(token).is_some_and(|s| s.is_expired(self.ttl, now)) {
            pending.remove(token);
            log::debug!("Selection {} expired", token);
        }
    }
}
