//! Connection manager: lifecycle of the push transport for the open board.
//!
//! SYSTEM CONTEXT
//! ==============
//! At most one logical connection exists, bound to the currently open board.
//! The manager owns the transport handle, the reconnect timer and the
//! offline queue. Every socket event and timer tick arrives as a
//! [`ConnectionEvent`] on one channel and is applied by [`ConnectionManager::handle_event`],
//! so state changes happen in one place.
//!
//! DESIGN
//! ======
//! Each `open` bumps a generation counter and tags its event sink with it.
//! Events from an older generation are stale and ignored, which makes
//! switching boards race-free. Reconnect timers carry their own attempt
//! number plus a cancellation token and are only honored when both still
//! match. Abnormal closes count consecutive failures; reaching the policy's
//! maximum moves to `Failed`, which only an explicit `connect` leaves.

use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{ReconnectPolicy, SyncConfig};
use crate::model::EntityId;
use crate::queue::{OfflineFlush, OfflineQueue, PendingChange};
use crate::transport::{
    ConnectionEvent, Connector, EventSink, NORMAL_CLOSE, TransportError, TransportEvent, TransportHandle,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Human-readable status line.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting...",
            Self::Failed => "Connection failed",
        }
    }

    /// True while an open or a reconnect is in flight and more events will follow.
    #[must_use]
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

/// Outcome of [`ConnectionManager::handle_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    /// Event belonged to a superseded connection or a cancelled timer.
    Stale,
    /// Transport opened; `replayed` queued changes were flushed.
    Opened { replayed: usize },
    /// Inbound text frame for the message router.
    Inbound(String),
    /// Server closed normally. No reconnect.
    Closed,
    /// Abnormal close; retry `attempt` is scheduled.
    Reconnecting { attempt: u32 },
    /// A retry timer fired and a new transport is being opened.
    Connecting,
    /// Retry budget exhausted. Reported once per failure episode.
    Failed,
    /// Nothing the caller needs to act on.
    Nothing,
}

/// Outcome of [`ConnectionManager::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Held in the offline queue. `went_offline` is true for the first
    /// change queued since the queue was last empty.
    Queued { went_offline: bool },
}

#[derive(Debug)]
struct PendingRetry {
    attempt: u64,
    token: CancellationToken,
}

pub struct ConnectionManager {
    policy: ReconnectPolicy,
    flush: OfflineFlush,
    ws_url: String,
    token: Option<String>,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    state: ConnectionState,
    board_id: Option<EntityId>,
    retry_count: u32,
    generation: u64,
    handle: Option<TransportHandle>,
    pending_retry: Option<PendingRetry>,
    next_attempt: u64,
    failure_reported: bool,
    queue: OfflineQueue,
}

impl ConnectionManager {
    /// Build a manager plus the receiver its transports and timers report to.
    #[must_use]
    pub fn new(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            policy: config.reconnect,
            flush: config.offline_flush,
            ws_url: config.ws_url.clone(),
            token: config.token.clone(),
            connector,
            events_tx,
            state: ConnectionState::Disconnected,
            board_id: None,
            retry_count: 0,
            generation: 0,
            handle: None,
            pending_retry: None,
            next_attempt: 0,
            failure_reported: false,
            queue: OfflineQueue::new(),
        };
        (manager, events_rx)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn board_id(&self) -> Option<&EntityId> {
        self.board_id.as_ref()
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Transport URL for `board_id`: `{ws_url}/{board_id}?token={token}`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingToken`] without a token and
    /// [`TransportError::InvalidUrl`] when the base URL cannot carry a path.
    pub fn connect_url(&self, board_id: &EntityId) -> Result<Url, TransportError> {
        let token = self.token.as_deref().ok_or(TransportError::MissingToken)?;
        let mut url = Url::parse(&self.ws_url).map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", self.ws_url)))?;
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl(self.ws_url.clone()))?
            .pop_if_empty()
            .push(board_id.as_str());
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Open a connection for `board_id`, replacing any existing one.
    ///
    /// Already connected to the same board is a no-op. Otherwise the old
    /// transport is closed normally, pending retries are cancelled and the
    /// retry counter starts from zero.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport URL cannot be built; the manager
    /// is left `Disconnected`.
    pub fn connect(&mut self, board_id: &EntityId) -> Result<(), TransportError> {
        if self.state == ConnectionState::Connected && self.board_id.as_ref() == Some(board_id) {
            tracing::debug!(board_id = %board_id, "already connected");
            return Ok(());
        }
        self.teardown();
        self.board_id = Some(board_id.clone());
        self.retry_count = 0;
        self.failure_reported = false;
        self.open()
    }

    /// Close the connection normally and forget the board. Queued changes are kept.
    pub fn close(&mut self) {
        self.teardown();
        if let Some(board_id) = self.board_id.take() {
            tracing::info!(board_id = %board_id, "connection closed");
        }
        self.state = ConnectionState::Disconnected;
        self.retry_count = 0;
        self.failure_reported = false;
    }

    /// Close and drop all queued changes.
    pub fn reset(&mut self) {
        self.close();
        self.queue.clear();
    }

    /// Send a change now when connected, otherwise queue it.
    pub fn send(&mut self, kind: &str, payload: Value) -> SendOutcome {
        let change = PendingChange::new(kind, payload);
        if self.state == ConnectionState::Connected
            && let Some(handle) = &self.handle
        {
            match handle.send_text(frames::encode_envelope(&change.to_envelope())) {
                Ok(()) => {
                    tracing::debug!(kind, "change sent");
                    return SendOutcome::Sent;
                }
                Err(e) => tracing::warn!(kind, error = %e, "send failed; queueing change"),
            }
        }
        let went_offline = self.queue.is_empty();
        self.queue.push(change);
        tracing::debug!(kind, queued = self.queue.len(), "change queued");
        SendOutcome::Queued { went_offline }
    }

    /// Apply one transport or timer event.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Handled {
        match event {
            ConnectionEvent::Transport { generation, event } => {
                if generation != self.generation {
                    tracing::debug!(generation, current = self.generation, "stale transport event");
                    return Handled::Stale;
                }
                self.on_transport(event)
            }
            ConnectionEvent::RetryDue { attempt } => self.on_retry_due(attempt),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn on_transport(&mut self, event: TransportEvent) -> Handled {
        match event {
            TransportEvent::Opened => {
                self.state = ConnectionState::Connected;
                self.retry_count = 0;
                self.failure_reported = false;
                let replayed = self.flush_queue();
                tracing::info!(board_id = ?self.board_id, replayed, "connected");
                Handled::Opened { replayed }
            }
            TransportEvent::Message(text) => Handled::Inbound(text),
            TransportEvent::Closed { code } => {
                self.handle = None;
                if code == Some(NORMAL_CLOSE) {
                    self.state = ConnectionState::Disconnected;
                    tracing::info!(board_id = ?self.board_id, "server closed connection");
                    Handled::Closed
                } else {
                    tracing::warn!(board_id = ?self.board_id, ?code, "connection lost");
                    self.on_abnormal_close()
                }
            }
        }
    }

    fn on_abnormal_close(&mut self) -> Handled {
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count >= self.policy.max_attempts {
            self.cancel_retry();
            self.state = ConnectionState::Failed;
            if self.failure_reported {
                return Handled::Nothing;
            }
            self.failure_reported = true;
            tracing::error!(attempts = self.retry_count, "reconnect budget exhausted");
            return Handled::Failed;
        }
        self.state = ConnectionState::Reconnecting;
        self.schedule_retry();
        Handled::Reconnecting { attempt: self.retry_count }
    }

    fn on_retry_due(&mut self, attempt: u64) -> Handled {
        let Some(pending) = self.pending_retry.take_if(|p| p.attempt == attempt) else {
            tracing::debug!(attempt, "stale retry timer");
            return Handled::Stale;
        };
        if pending.token.is_cancelled() || self.state != ConnectionState::Reconnecting {
            return Handled::Stale;
        }
        tracing::info!(attempt = self.retry_count, "reconnecting");
        match self.open() {
            Ok(()) => Handled::Connecting,
            Err(e) => {
                tracing::error!(error = %e, "reconnect aborted");
                Handled::Nothing
            }
        }
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let Some(board_id) = self.board_id.clone() else {
            return Ok(());
        };
        let url = match self.connect_url(&board_id) {
            Ok(url) => url,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        let sink = EventSink::new(self.generation, self.events_tx.clone());
        tracing::debug!(board_id = %board_id, generation = self.generation, "opening transport");
        self.handle = Some(self.connector.open(&url, sink));
        Ok(())
    }

    /// Cancel timers, close the live transport and invalidate its events.
    fn teardown(&mut self) {
        self.cancel_retry();
        if let Some(handle) = self.handle.take() {
            handle.close(NORMAL_CLOSE);
        }
        self.generation += 1;
    }

    fn cancel_retry(&mut self) {
        if let Some(pending) = self.pending_retry.take() {
            pending.token.cancel();
        }
    }

    fn schedule_retry(&mut self) {
        self.cancel_retry();
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let token = CancellationToken::new();
        let timer_token = token.clone();
        let tx = self.events_tx.clone();
        let interval = self.policy.interval;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::select! {
                        () = timer_token.cancelled() => {}
                        () = tokio::time::sleep(interval) => {
                            if !timer_token.is_cancelled() {
                                let _ = tx.send(ConnectionEvent::RetryDue { attempt });
                            }
                        }
                    }
                });
            }
            Err(_) => tracing::error!("no async runtime; reconnect timer not started"),
        }
        self.pending_retry = Some(PendingRetry { attempt, token });
    }

    fn flush_queue(&mut self) -> usize {
        let pending = self.queue.take_for_flush(self.flush);
        let Some(handle) = &self.handle else {
            self.queue.requeue_front(pending);
            return 0;
        };
        for (idx, change) in pending.iter().enumerate() {
            if let Err(e) = handle.send_text(frames::encode_envelope(&change.to_envelope())) {
                tracing::warn!(error = %e, remaining = pending.len() - idx, "replay interrupted");
                self.queue.requeue_front(pending[idx..].to_vec());
                return idx;
            }
        }
        pending.len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
