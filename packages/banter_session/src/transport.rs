//! Transport seam for the live connection.
//!
//! The session manager talks to an abstract [`Connector`] so the same
//! lifecycle logic runs over a real WebSocket ([`WsConnector`]) or an
//! in-memory channel pair ([`ChannelConnector`], used by tests and local
//! demos). A connector hands back one [`Transport`] per successful attempt;
//! dropping the transport tears the underlying connection down.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, warn};

use crate::error::ConnectError;
use crate::protocol::{Frame, Identity, Intent};

/// Events delivered by a live transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed inbound frame.
    Frame(Frame),
    /// The server rejected our credential mid-session. Fatal.
    AuthRejected(String),
    /// The transport dropped. Recoverable via reconnect.
    Lost(String),
}

/// One established live connection: an outbound intent sink and an inbound
/// event stream. Closing either side ends the connection.
#[derive(Debug)]
pub struct Transport {
    pub outbound: mpsc::Sender<Intent>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Establishes live connections on behalf of the session manager.
pub trait Connector: Send + 'static {
    fn connect(
        &mut self,
        identity: Identity,
    ) -> impl Future<Output = Result<Transport, ConnectError>> + Send;
}

/// WebSocket close codes the server uses for credential problems.
/// 4401: unauthenticated, 4003: forbidden.
const CLOSE_UNAUTHENTICATED: u16 = 4401;
const CLOSE_FORBIDDEN: u16 = 4003;

/// Production connector: JSON over WebSocket via tokio-tungstenite.
///
/// The identity token rides the connection URL once; frames and intents are
/// pumped by two spawned tasks that die with the connection.
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// Base WebSocket URL, e.g. `ws://localhost:8080/ws`.
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    async fn connect(&mut self, identity: Identity) -> Result<Transport, ConnectError> {
        let url = format!("{}?token={}", self.url, identity.token);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(classify_handshake_error)?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Intent>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(256);

        // Write pump: serialize intents onto the socket until the session
        // drops its sender.
        tokio::spawn(async move {
            while let Some(intent) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&intent) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to serialize intent: {}", e);
                        continue;
                    }
                };
                if ws_write
                    .send(tungstenite::Message::Text(json.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        // Read pump: parse frames off the socket until it closes or the
        // session stops listening.
        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(tungstenite::Message::Text(text)) => {
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => {
                                if inbound_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!("dropping unparseable frame: {}", e);
                            }
                        }
                    }
                    Ok(tungstenite::Message::Close(close)) => {
                        let event = match close {
                            Some(frame)
                                if matches!(
                                    u16::from(frame.code),
                                    CLOSE_UNAUTHENTICATED | CLOSE_FORBIDDEN
                                ) =>
                            {
                                TransportEvent::AuthRejected(frame.reason.to_string())
                            }
                            Some(frame) => TransportEvent::Lost(frame.reason.to_string()),
                            None => TransportEvent::Lost("connection closed".to_string()),
                        };
                        let _ = inbound_tx.send(event).await;
                        return;
                    }
                    Ok(_) => {} // ping/pong/binary: nothing to route
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Lost(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = inbound_tx
                .send(TransportEvent::Lost("stream ended".to_string()))
                .await;
        });

        Ok(Transport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// An auth failure during the HTTP upgrade is fatal; everything else is a
/// reachability problem worth retrying.
fn classify_handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            ConnectError::AuthRejected(format!("handshake returned {}", response.status()))
        }
        other => ConnectError::Unreachable(other.to_string()),
    }
}

/// The far side of a [`ChannelConnector`] connection: what a test (playing
/// the server) uses to push frames and observe intents.
#[derive(Debug)]
pub struct ServerEnd {
    pub identity: Identity,
    pub events: mpsc::Sender<TransportEvent>,
    pub intents: mpsc::Receiver<Intent>,
}

/// In-memory connector. Each successful `connect` hands a [`ServerEnd`] to
/// the acceptor channel returned by [`ChannelConnector::new`].
#[derive(Debug)]
pub struct ChannelConnector {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    refusals: u32,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refusals: 0,
            },
            accept_rx,
        )
    }

    /// Make the next `n` connect attempts fail as unreachable.
    pub fn refuse_next(&mut self, n: u32) {
        self.refusals = n;
    }
}

impl Connector for ChannelConnector {
    async fn connect(&mut self, identity: Identity) -> Result<Transport, ConnectError> {
        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(ConnectError::Unreachable("connection refused".to_string()));
        }
        let (event_tx, event_rx) = mpsc::channel(256);
        let (intent_tx, intent_rx) = mpsc::channel(64);
        self.accept_tx
            .send(ServerEnd {
                identity,
                events: event_tx,
                intents: intent_rx,
            })
            .map_err(|_| ConnectError::Unreachable("acceptor dropped".to_string()))?;
        Ok(Transport {
            outbound: intent_tx,
            inbound: event_rx,
        })
    }
}
