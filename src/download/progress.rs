//! Progress aggregation for a single job.
//!
//! The acquisition backend reports raw, per-stream events from a blocking
//! thread through a [`ProgressSender`]. On the coordination side a
//! [`ProgressAggregator`] folds them into a coalesced stream of
//! [`ProgressEvent`]s: percent is bounded to 0..=100, never goes backwards and
//! never repeats the same value twice in a row.

use std::collections::HashMap;

use tokio::sync::mpsc;

/// Stream key used when the backend does not name the stream.
pub const UNKNOWN_STREAM: &str = "__unknown__";

/// Low-level event as reported by the acquisition backend.
///
/// Validated once at the backend boundary; consumers never see loosely-typed payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProgress {
    /// Active transfer of one stream (video, audio, ...).
    Downloading {
        key: String,
        downloaded: Option<u64>,
        total: Option<u64>,
        /// Coarse percent reported by the backend, used when no totals are known
        percent_hint: Option<f64>,
    },
    /// One stream finished transferring.
    Finished { key: String, total: Option<u64> },
    /// Post-transfer work (merging, remuxing, transcoding).
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    Processing,
}

/// Coalesced event delivered to the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub percent: Option<u8>,
}

impl ProgressEvent {
    pub fn downloading(percent: u8) -> Self {
        Self {
            phase: Phase::Downloading,
            percent: Some(percent),
        }
    }

    pub fn processing() -> Self {
        Self {
            phase: Phase::Processing,
            percent: None,
        }
    }
}

/// Folds raw per-stream events into a monotonic percent/phase stream.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    downloaded: HashMap<String, u64>,
    totals: HashMap<String, u64>,
    last_percent: Option<u8>,
    processing_announced: bool,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last percent handed out, if any.
    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }

    /// Applies one raw event and returns the event to forward, if any.
    pub fn ingest(&mut self, raw: RawProgress) -> Option<ProgressEvent> {
        match raw {
            RawProgress::Processing => {
                if self.processing_announced {
                    return None;
                }
                self.processing_announced = true;
                Some(ProgressEvent::processing())
            }
            RawProgress::Finished { key, total } => {
                if let Some(total) = total.filter(|t| *t > 0) {
                    self.totals.insert(key.clone(), total);
                }
                // Saturate the stream; the next transfer event picks it up.
                if let Some(total) = self.totals.get(&key).copied() {
                    self.downloaded.insert(key, total);
                }
                None
            }
            RawProgress::Downloading {
                key,
                downloaded,
                total,
                percent_hint,
            } => {
                if let Some(total) = total.filter(|t| *t > 0) {
                    self.totals.insert(key.clone(), total);
                }
                if let Some(downloaded) = downloaded {
                    let clamped = match self.totals.get(&key) {
                        Some(total) => downloaded.min(*total),
                        None => downloaded,
                    };
                    self.downloaded.insert(key, clamped);
                }

                let percent = self.aggregate_percent().or_else(|| percent_hint.map(clamp_percent))?;
                self.advance(percent)
            }
        }
    }

    /// Percent over all streams with a known total, truncated toward zero.
    fn aggregate_percent(&self) -> Option<u8> {
        let sum_total: u128 = self.totals.values().map(|t| u128::from(*t)).sum();
        if sum_total == 0 {
            return None;
        }
        let sum_done: u128 = self
            .totals
            .iter()
            .map(|(key, total)| u128::from(self.downloaded.get(key).copied().unwrap_or(0).min(*total)))
            .sum();
        let percent = (sum_done * 100 / sum_total).min(100);
        u8::try_from(percent).ok()
    }

    fn advance(&mut self, percent: u8) -> Option<ProgressEvent> {
        match self.last_percent {
            Some(last) if percent <= last => None,
            _ => {
                self.last_percent = Some(percent);
                Some(ProgressEvent::downloading(percent))
            }
        }
    }
}

fn clamp_percent(hint: f64) -> u8 {
    if hint.is_nan() {
        return 0;
    }
    hint.clamp(0.0, 100.0) as u8
}

/// Cross-thread submission handle for raw events.
///
/// Sending never blocks and never fails loudly: once the receiving side is gone
/// (the job moved past acquisition) events are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<RawProgress>,
}

impl ProgressSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RawProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sender whose events go nowhere.
    pub fn disconnected() -> Self {
        let (sender, _rx) = Self::channel();
        sender
    }

    pub fn submit(&self, raw: RawProgress) {
        let _ = self.tx.send(raw);
    }
}
