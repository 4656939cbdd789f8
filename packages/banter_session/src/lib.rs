//! Real-time chat session layer.
//!
//! A session multiplexes every joined room over one live WebSocket
//! connection. Per room it keeps a merged message sequence (REST history
//! reconciled with live pushes, deduplicated by id), a typing set with a
//! 3-second debounce, and a last-write-wins presence snapshot. Transport
//! loss is a state, not an error: the session reconnects with bounded
//! exponential backoff, rejoins every room, and flushes intents queued
//! while offline.
//!
//! Entry point: [`SessionHandle::connect`] with a [`Connector`] —
//! [`WsConnector`] in production, [`ChannelConnector`] for tests.

pub mod config;
pub mod error;
pub mod merge;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod typing;

pub use config::SessionConfig;
pub use error::{ConnectError, SessionError};
pub use presence::PresenceSnapshot;
pub use protocol::{ChatMessage, Frame, Identity, Intent, MessageId, MessageKind, RoomId, Sender};
pub use registry::RoomHandlers;
pub use session::{ConnectionState, SessionHandle};
pub use transport::{ChannelConnector, Connector, ServerEnd, Transport, TransportEvent, WsConnector};
