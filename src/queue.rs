//! Offline queue of undelivered change notifications.
//!
//! Only broadcast notifications land here. The authoritative API call for the
//! change has already succeeded by the time anything is queued, so losing an
//! entry never loses data on the server, only the realtime hint to peers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use frames::Envelope;
use serde_json::Value;

/// What to do with queued notifications once the transport reconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OfflineFlush {
    /// Resend in enqueue order, skipping exact duplicates.
    #[default]
    Replay,
    /// Clear the queue without sending anything.
    Discard,
}

/// A notification that could not be delivered when it was produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingChange {
    pub kind: String,
    pub payload: Value,
    pub queued_at: DateTime<Utc>,
}

impl PendingChange {
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            queued_at: Utc::now(),
        }
    }

    /// Wire envelope, keeping the original production time.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::at(self.kind.clone(), self.payload.clone(), self.queued_at)
    }

    fn same_change(&self, other: &Self) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }
}

/// FIFO buffer of [`PendingChange`]s. It never retries or expires entries on
/// its own; the connection manager drains it when a connection opens.
#[derive(Clone, Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<PendingChange>,
}

impl OfflineQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter()
    }

    pub fn push(&mut self, change: PendingChange) {
        self.entries.push_back(change);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Empty the queue and return what should be resent under `policy`.
    ///
    /// `Replay` returns entries in enqueue order, collapsing runs of adjacent
    /// identical `(kind, payload)` pairs into one. `Discard` returns nothing.
    pub fn take_for_flush(&mut self, policy: OfflineFlush) -> Vec<PendingChange> {
        let drained: Vec<PendingChange> = self.entries.drain(..).collect();
        match policy {
            OfflineFlush::Discard => {
                if !drained.is_empty() {
                    tracing::warn!(count = drained.len(), "discarding queued offline changes");
                }
                Vec::new()
            }
            OfflineFlush::Replay => {
                let mut replay = drained;
                replay.dedup_by(|later, earlier| later.same_change(earlier));
                replay
            }
        }
    }

    /// Put changes that could not be resent back at the front, preserving order.
    pub fn requeue_front(&mut self, changes: Vec<PendingChange>) {
        for change in changes.into_iter().rev() {
            self.entries.push_front(change);
        }
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
