//! Error plumbing shared across the engine.
//!
//! Each concern owns its own `thiserror` enum (`ApiError`, `TransportError`,
//! `StorageError`, `ConfigError`); this module holds the trait that gives all
//! of them a grepable code for logs and notices.

/// Grepable error code and retryable flag for structured diagnostics.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
