//! Session error taxonomy.
//!
//! Transport loss is deliberately NOT an error value — it is a state
//! transition visible on the session's connectedness watch channel.
//! Stale-room frames and duplicate messages or typing signals are absorbed
//! silently by the idempotent component semantics.

use thiserror::Error;

/// Errors surfaced by [`crate::session::SessionHandle`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session task has shut down (explicit disconnect, fatal auth
    /// rejection, or all handles dropped).
    #[error("session is closed")]
    Closed,
}

/// Errors establishing the live connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server rejected the identity credential. Fatal for the session;
    /// never retried.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The server could not be reached. Recoverable; retried with bounded
    /// exponential backoff.
    #[error("server unreachable: {0}")]
    Unreachable(String),
}
