//! Client-side realtime sync engine for list/card boards.
//!
//! SYSTEM CONTEXT
//! ==============
//! A [`Session`] holds the local picture of the open board. Mutations go to
//! the authoritative REST API ([`api`]), are applied to the in-memory
//! [`EntityStore`] and broadcast over a per-board push transport managed by
//! [`ConnectionManager`]. Changes from other clients arrive on the same
//! transport and are normalized by the [`router`] before they touch the store.
//!
//! The library never installs a `tracing` subscriber; binaries decide how to
//! render diagnostics.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod queue;
pub mod recency;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;

pub use api::{ApiError, BoardApi, HttpBoardApi};
pub use config::{ConfigError, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::ErrorCode;
pub use model::{Board, BoardSummary, Card, EntityId, List, User};
pub use recency::{JsonFileStore, KeyValueStore, MemoryStore, RecencyTracker};
pub use session::{CardDraft, Notice, NoticeLevel, Session, SessionEvent};
pub use store::{Applied, EntityStore, Patch};
pub use transport::{Connector, TransportError, WsConnector};
