//! Push-transport plumbing: the connector seam and the websocket connector.
//!
//! SYSTEM CONTEXT
//! ==============
//! A [`Connector`] opens one socket and runs it on its own task. The task
//! never touches engine state; it reports [`TransportEvent`]s through an
//! [`EventSink`] and reads [`Outbound`] commands from the channel behind the
//! returned [`TransportHandle`]. The connection manager consumes the events
//! on the session's single logical thread.
//!
//! ERROR HANDLING
//! ==============
//! Connect, read and write failures all surface as `Closed { code: None }`,
//! which the connection manager treats as an abnormal close and backs off.

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::error::ErrorCode;

/// Close code for an intentional shutdown; never triggers a reconnect.
pub const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no auth token configured for the push transport")]
    MissingToken,
    #[error("invalid transport URL: {0}")]
    InvalidUrl(String),
    #[error("transport channel closed")]
    ChannelClosed,
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "E_TRANSPORT_TOKEN",
            Self::InvalidUrl(_) => "E_TRANSPORT_URL",
            Self::ChannelClosed => "E_TRANSPORT_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

/// Something that happened on one socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// One inbound text frame, undecoded.
    Message(String),
    /// The socket is gone. `None` means no close code was received (drop,
    /// handshake failure, read error).
    Closed { code: Option<u16> },
}

/// Command for the socket task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame with this code and stop.
    Close(u16),
}

/// Event delivered to the connection manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A socket event, tagged with the connection generation that produced it.
    Transport { generation: u64, event: TransportEvent },
    /// A reconnect timer fired.
    RetryDue { attempt: u64 },
}

/// Where a socket task reports its events.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(ConnectionEvent::Transport { generation: self.generation, event })
            .is_ok()
    }
}

/// Sending half for one open socket.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    /// Queue a text frame for the socket task.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChannelClosed`] when the socket task has exited.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Ask the socket task to close with `code`. A task that already exited is fine.
    pub fn close(&self, code: u16) {
        let _ = self.outbound.send(Outbound::Close(code));
    }
}

/// Opens push-transport connections.
pub trait Connector: Send + Sync {
    /// Start connecting to `url`. Progress and failure are reported through
    /// `events`; this call itself never blocks.
    fn open(&self, url: &Url, events: EventSink) -> TransportHandle;
}

/// Websocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &Url, events: EventSink) -> TransportHandle {
        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
        tokio::spawn(run_socket(url.to_string(), events, rx));
        TransportHandle::new(tx)
    }
}

/// Connect and pump frames until either side closes.
async fn run_socket(url: String, events: EventSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let generation = events.generation();
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!(generation, error = %e, "websocket connect failed");
            events.emit(TransportEvent::Closed { code: None });
            return;
        }
    };
    events.emit(TransportEvent::Opened);

    let (mut ws_write, mut ws_read) = stream.split();
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        tracing::warn!(generation, error = %e, "websocket send failed");
                        events.emit(TransportEvent::Closed { code: None });
                        break;
                    }
                }
                Some(Outbound::Close(code)) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
                    let _ = ws_write.send(Message::Close(Some(frame))).await;
                    tracing::debug!(generation, code, "websocket closed by client");
                    break;
                }
                // Handle dropped without an explicit close: treat as intentional.
                None => {
                    let _ = ws_write.close().await;
                    break;
                }
            },
            message = ws_read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !events.emit(TransportEvent::Message(text.as_str().to_owned())) {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    events.emit(TransportEvent::Closed { code });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(generation, error = %e, "websocket recv error");
                    events.emit(TransportEvent::Closed { code: None });
                    break;
                }
                None => {
                    events.emit(TransportEvent::Closed { code: None });
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
