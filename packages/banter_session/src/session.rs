//! Session connection manager.
//!
//! One session owns one live connection and everything scoped to it: the
//! room subscription registry, per-room merge buffers and typing trackers,
//! the presence store, and the outbound intent queue. It runs as a single
//! spawned task with one `select!` loop, so frame handlers run to completion
//! and frames for the same room never interleave.
//!
//! Views talk to the task through a cloneable [`SessionHandle`]: commands go
//! over an mpsc channel, snapshot queries get oneshot replies, and
//! connectedness is a `watch` channel.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ConnectError, SessionError};
use crate::presence::{PresenceSnapshot, PresenceTracker};
use crate::protocol::{ChatMessage, Frame, Identity, Intent, MessageKind, RoomId};
use crate::registry::{JoinState, Registry, RoomHandlers};
use crate::transport::{Connector, Transport, TransportEvent};

/// Connection lifecycle, observable on the session's watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Establishing the first connection; operations are buffered.
    Connecting,
    Connected,
    /// Transport dropped; re-establishing with backoff. Buffering again.
    Reconnecting,
    /// Terminal: explicit disconnect or all handles dropped.
    Disconnected,
    /// Terminal: the server rejected the identity credential. Not retried.
    AuthRejected,
}

enum Command {
    Join {
        room_id: RoomId,
        handlers: RoomHandlers,
    },
    Leave {
        room_id: RoomId,
    },
    PostMessage {
        room_id: RoomId,
        body: String,
        kind: MessageKind,
    },
    SignalTyping {
        room_id: RoomId,
        display_name: String,
        is_typing: bool,
    },
    SeedHistory {
        room_id: RoomId,
        newest_first: Vec<ChatMessage>,
    },
    Messages {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    Typing {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<String>>,
    },
    Presence {
        room_id: RoomId,
        reply: oneshot::Sender<PresenceSnapshot>,
    },
    Disconnect,
}

/// Cheap-to-clone handle onto a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Start a session for `identity`. Returns immediately; connection
    /// establishment proceeds in the background and every operation issued
    /// before it completes is buffered, not dropped.
    pub fn connect<C: Connector>(
        identity: Identity,
        connector: C,
        config: SessionConfig,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let core = SessionCore {
            identity,
            config,
            state_tx,
            registry: Registry::new(),
            presence: PresenceTracker::new(),
            queue: VecDeque::new(),
        };
        tokio::spawn(run(connector, cmd_rx, core));
        SessionHandle { cmd_tx, state_rx }
    }

    /// The connectedness signal.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected
    }

    /// Join a room, attaching callbacks. Joining an already-joined room
    /// replaces the callback set without re-issuing a network join.
    pub async fn join(
        &self,
        room_id: RoomId,
        handlers: RoomHandlers,
    ) -> Result<(), SessionError> {
        self.send(Command::Join { room_id, handlers }).await
    }

    /// Leave a room, releasing every resource scoped to it.
    pub async fn leave(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.send(Command::Leave { room_id }).await
    }

    /// Post a message. Fire-and-forget: buffered while disconnected,
    /// discarded on explicit disconnect.
    pub async fn post_message(
        &self,
        room_id: RoomId,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> Result<(), SessionError> {
        self.send(Command::PostMessage {
            room_id,
            body: body.into(),
            kind,
        })
        .await
    }

    /// Signal that the local user started or stopped typing.
    pub async fn signal_typing(
        &self,
        room_id: RoomId,
        display_name: impl Into<String>,
        is_typing: bool,
    ) -> Result<(), SessionError> {
        self.send(Command::SignalTyping {
            room_id,
            display_name: display_name.into(),
            is_typing,
        })
        .await
    }

    /// Seed a room's merge buffer with a REST-fetched history page
    /// (newest-first, as the collaborator returns it). Idempotent; live
    /// messages that raced the fetch are preserved.
    pub async fn seed_history(
        &self,
        room_id: RoomId,
        newest_first: Vec<ChatMessage>,
    ) -> Result<(), SessionError> {
        self.send(Command::SeedHistory {
            room_id,
            newest_first,
        })
        .await
    }

    /// Snapshot of a room's merged message sequence, chronological.
    pub async fn messages(&self, room_id: RoomId) -> Result<Vec<ChatMessage>, SessionError> {
        self.query(|reply| Command::Messages { room_id, reply }).await
    }

    /// Display names currently typing in a room, in activation order.
    pub async fn typing(&self, room_id: RoomId) -> Result<Vec<String>, SessionError> {
        self.query(|reply| Command::Typing { room_id, reply }).await
    }

    /// Latest presence snapshot for a room (zero default before the first).
    pub async fn presence(&self, room_id: RoomId) -> Result<PresenceSnapshot, SessionError> {
        self.query(|reply| Command::Presence { room_id, reply }).await
    }

    /// Tear the session down: discard queued intents, detach all rooms,
    /// cancel all typing deadlines, drop the transport.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }

    async fn send(&self, cmd: Command) -> Result<(), SessionError> {
        self.cmd_tx.send(cmd).await.map_err(|_| SessionError::Closed)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

/// What a command handler tells the run loop to do next.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The transport rejected a send; reconnect.
    Lost,
    /// Terminal state reached; end the task.
    Shutdown,
}

struct SessionCore {
    identity: Identity,
    config: SessionConfig,
    state_tx: watch::Sender<ConnectionState>,
    registry: Registry,
    presence: PresenceTracker,
    /// Outbound intents awaiting a live transport, FIFO. Owned exclusively
    /// by the session task.
    queue: VecDeque<Intent>,
}

async fn run<C: Connector>(
    mut connector: C,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut core: SessionCore,
) {
    let mut rejoin = false;
    'session: loop {
        // ---- connect / reconnect phase ----
        // Commands keep flowing while we dial and while we back off; joins
        // and sends are buffered, queries answered from local state.
        let mut attempt: u32 = 0;
        let transport = 'connect: loop {
            if let Some(max) = core.config.max_reconnect_attempts {
                if attempt >= max {
                    warn!(attempts = attempt, "giving up on reconnection");
                    core.shutdown(ConnectionState::Disconnected);
                    break 'session;
                }
            }

            let connect_fut = connector.connect(core.identity.clone());
            tokio::pin!(connect_fut);
            let outcome = loop {
                tokio::select! {
                    res = &mut connect_fut => break res,
                    maybe_cmd = cmd_rx.recv() => {
                        if core.offline_command(maybe_cmd) == Flow::Shutdown {
                            break 'session;
                        }
                    }
                }
            };

            match outcome {
                Ok(transport) => break 'connect transport,
                Err(ConnectError::AuthRejected(reason)) => {
                    warn!(%reason, "authentication rejected");
                    core.shutdown(ConnectionState::AuthRejected);
                    break 'session;
                }
                Err(ConnectError::Unreachable(reason)) => {
                    let delay = core.config.backoff_delay(attempt);
                    attempt += 1;
                    debug!(%reason, ?delay, "connect failed, backing off");
                    let wake = Instant::now() + delay;
                    loop {
                        tokio::select! {
                            _ = time::sleep_until(wake) => break,
                            maybe_cmd = cmd_rx.recv() => {
                                if core.offline_command(maybe_cmd) == Flow::Shutdown {
                                    break 'session;
                                }
                            }
                        }
                    }
                }
            }
        };

        // ---- connected ----
        let Transport {
            outbound,
            mut inbound,
        } = transport;
        core.set_state(ConnectionState::Connected);
        info!("live connection established");

        // Server-side subscriptions don't survive a dropped transport:
        // re-issue a join for every room we were in, then flush whatever
        // queued up while offline, in order.
        if rejoin {
            // The rejoin pass covers every subscribed room, including ones
            // joined while offline; their queued joins would go out twice.
            core.queue
                .retain(|intent| !matches!(intent, Intent::Join { .. }));
            if core.rejoin_rooms(&outbound).await == Flow::Lost {
                core.on_transport_lost();
                continue 'session;
            }
        }
        rejoin = true;
        if core.flush_queue(&outbound).await == Flow::Lost {
            core.on_transport_lost();
            continue 'session;
        }

        loop {
            let typing_deadline = core.registry.next_typing_deadline();
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    let flow = match maybe_cmd {
                        Some(cmd) => core.online_command(cmd, &outbound).await,
                        None => {
                            core.shutdown(ConnectionState::Disconnected);
                            Flow::Shutdown
                        }
                    };
                    match flow {
                        Flow::Continue => {}
                        Flow::Shutdown => break 'session,
                        Flow::Lost => {
                            core.on_transport_lost();
                            continue 'session;
                        }
                    }
                }
                event = inbound.recv() => {
                    match event {
                        Some(TransportEvent::Frame(frame)) => core.handle_frame(frame),
                        Some(TransportEvent::AuthRejected(reason)) => {
                            warn!(%reason, "authentication rejected mid-session");
                            core.shutdown(ConnectionState::AuthRejected);
                            break 'session;
                        }
                        Some(TransportEvent::Lost(reason)) => {
                            info!(%reason, "transport lost");
                            core.on_transport_lost();
                            continue 'session;
                        }
                        None => {
                            info!("transport closed");
                            core.on_transport_lost();
                            continue 'session;
                        }
                    }
                }
                _ = time::sleep_until(typing_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60))),
                        if typing_deadline.is_some() => {
                    core.expire_typing(Instant::now());
                }
            }
        }
    }
}

impl SessionCore {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Release everything and park the watch at a terminal state.
    fn shutdown(&mut self, state: ConnectionState) {
        self.queue.clear();
        self.registry.clear();
        self.presence.clear();
        self.set_state(state);
    }

    /// Transport dropped: typing state is no longer trustworthy, so clear
    /// it everywhere (views observe the cleared set) and mark every room
    /// as needing a fresh join.
    fn on_transport_lost(&mut self) {
        self.set_state(ConnectionState::Reconnecting);
        for (_, sub) in self.registry.iter_mut() {
            sub.join_state = JoinState::Pending;
            if sub.typing.clear() {
                (sub.handlers.on_typing_changed)(&[]);
            }
        }
    }

    fn offline_command(&mut self, maybe_cmd: Option<Command>) -> Flow {
        let Some(cmd) = maybe_cmd else {
            // Every handle is gone; nobody can ever talk to us again.
            self.shutdown(ConnectionState::Disconnected);
            return Flow::Shutdown;
        };
        match cmd {
            Command::Join { room_id, handlers } => {
                if self.subscribe(room_id, handlers) {
                    self.queue.push_back(Intent::Join { room_id });
                }
                Flow::Continue
            }
            Command::Leave { room_id } => {
                if self.registry.leave(room_id).is_some() {
                    self.presence.remove(room_id);
                    // Buffered intents scoped to the room die with it. No
                    // leave intent either: the server-side subscription is
                    // gone already (never sent, or died with the transport).
                    self.queue.retain(|intent| intent.room_id() != room_id);
                }
                Flow::Continue
            }
            Command::PostMessage {
                room_id,
                body,
                kind,
            } => {
                self.queue.push_back(Intent::PostMessage {
                    room_id,
                    body,
                    kind,
                });
                Flow::Continue
            }
            Command::SignalTyping {
                room_id,
                display_name,
                is_typing,
            } => {
                self.queue.push_back(Intent::TypingSignal {
                    room_id,
                    display_name,
                    is_typing,
                });
                Flow::Continue
            }
            Command::Disconnect => {
                self.shutdown(ConnectionState::Disconnected);
                Flow::Shutdown
            }
            other => self.local_command(other),
        }
    }

    async fn online_command(&mut self, cmd: Command, outbound: &mpsc::Sender<Intent>) -> Flow {
        match cmd {
            Command::Join { room_id, handlers } => {
                if !self.subscribe(room_id, handlers) {
                    return Flow::Continue;
                }
                if outbound.send(Intent::Join { room_id }).await.is_err() {
                    // Room stays Pending; the rejoin pass covers it.
                    return Flow::Lost;
                }
                if let Some(sub) = self.registry.get_mut(room_id) {
                    sub.join_state = JoinState::Joined;
                }
                Flow::Continue
            }
            Command::Leave { room_id } => {
                let Some(sub) = self.registry.leave(room_id) else {
                    return Flow::Continue;
                };
                self.presence.remove(room_id);
                self.queue.retain(|intent| intent.room_id() != room_id);
                if sub.join_state == JoinState::Joined
                    && outbound.send(Intent::Leave { room_id }).await.is_err()
                {
                    return Flow::Lost;
                }
                Flow::Continue
            }
            Command::PostMessage {
                room_id,
                body,
                kind,
            } => {
                self.dispatch(
                    outbound,
                    Intent::PostMessage {
                        room_id,
                        body,
                        kind,
                    },
                )
                .await
            }
            Command::SignalTyping {
                room_id,
                display_name,
                is_typing,
            } => {
                self.dispatch(
                    outbound,
                    Intent::TypingSignal {
                        room_id,
                        display_name,
                        is_typing,
                    },
                )
                .await
            }
            Command::Disconnect => {
                self.shutdown(ConnectionState::Disconnected);
                Flow::Shutdown
            }
            other => self.local_command(other),
        }
    }

    /// Commands that never touch the wire: seeding and snapshot queries.
    fn local_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::SeedHistory {
                room_id,
                newest_first,
            } => match self.registry.get_mut(room_id) {
                Some(sub) => sub.merge.seed(newest_first),
                None => debug!(room = room_id, "seed for room without subscription dropped"),
            },
            Command::Messages { room_id, reply } => {
                let messages = self
                    .registry
                    .get(room_id)
                    .map(|sub| sub.merge.messages().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(messages);
            }
            Command::Typing { room_id, reply } => {
                let names = self
                    .registry
                    .get(room_id)
                    .map(|sub| sub.typing.active_names())
                    .unwrap_or_default();
                let _ = reply.send(names);
            }
            Command::Presence { room_id, reply } => {
                let _ = reply.send(self.presence.get(room_id));
            }
            // Wire commands never reach here.
            _ => unreachable!("local_command only handles local commands"),
        }
        Flow::Continue
    }

    fn subscribe(&mut self, room_id: RoomId, handlers: RoomHandlers) -> bool {
        self.registry.join(
            room_id,
            handlers,
            self.config.retention_cap,
            self.config.typing_ttl,
        )
    }

    async fn dispatch(&mut self, outbound: &mpsc::Sender<Intent>, intent: Intent) -> Flow {
        if outbound.send(intent.clone()).await.is_err() {
            // Not lost for good: it flushes after reconnection.
            self.queue.push_back(intent);
            return Flow::Lost;
        }
        Flow::Continue
    }

    async fn rejoin_rooms(&mut self, outbound: &mpsc::Sender<Intent>) -> Flow {
        for room_id in self.registry.room_ids() {
            if outbound.send(Intent::Join { room_id }).await.is_err() {
                return Flow::Lost;
            }
            if let Some(sub) = self.registry.get_mut(room_id) {
                sub.join_state = JoinState::Joined;
            }
        }
        Flow::Continue
    }

    async fn flush_queue(&mut self, outbound: &mpsc::Sender<Intent>) -> Flow {
        while let Some(intent) = self.queue.pop_front() {
            let joined_room = match &intent {
                Intent::Join { room_id } => Some(*room_id),
                _ => None,
            };
            if outbound.send(intent.clone()).await.is_err() {
                self.queue.push_front(intent);
                return Flow::Lost;
            }
            if let Some(room_id) = joined_room {
                if let Some(sub) = self.registry.get_mut(room_id) {
                    sub.join_state = JoinState::Joined;
                }
            }
        }
        Flow::Continue
    }

    /// Demultiplex one inbound frame to its room's components. Frames for a
    /// room we are not subscribed to are dropped silently — the room was
    /// left before the frame arrived, which is not an error.
    fn handle_frame(&mut self, frame: Frame) {
        let room_id = frame.room_id();
        let Some(sub) = self.registry.get_mut(room_id) else {
            debug!(room = room_id, "frame for unsubscribed room dropped");
            return;
        };
        match frame {
            Frame::MessageCreated { message, .. } => {
                if sub.merge.insert_live(message.clone()) {
                    (sub.handlers.on_message)(&message);
                }
            }
            Frame::MessageDeleted { message_id, .. } => {
                sub.merge.remove(message_id);
            }
            Frame::ReactionUpdated {
                message_id, count, ..
            } => {
                sub.merge.update_reaction_count(message_id, count);
            }
            Frame::TypingChanged {
                user_id,
                display_name,
                is_typing,
                ..
            } => {
                // Our own signals echo back from the server; the local user
                // never appears in their own typing set.
                if user_id == self.identity.user_id {
                    return;
                }
                if sub
                    .typing
                    .signal(&user_id, &display_name, is_typing, Instant::now())
                {
                    let names = sub.typing.active_names();
                    (sub.handlers.on_typing_changed)(&names);
                }
            }
            Frame::PresenceChanged {
                online_count,
                online_users,
                ..
            } => {
                let snapshot = PresenceSnapshot {
                    online_count,
                    online_users,
                };
                self.presence.update(room_id, snapshot.clone());
                (sub.handlers.on_presence_changed)(&snapshot);
            }
        }
    }

    fn expire_typing(&mut self, now: Instant) {
        for (_, sub) in self.registry.iter_mut() {
            if sub.typing.expire(now) {
                let names = sub.typing.active_names();
                (sub.handlers.on_typing_changed)(&names);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Sender;

    fn test_core() -> (SessionCore, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        (
            SessionCore {
                identity: Identity {
                    user_id: "me".to_string(),
                    token: "tok".to_string(),
                    display_name: "Me".to_string(),
                },
                config: SessionConfig::default(),
                state_tx,
                registry: Registry::new(),
                presence: PresenceTracker::new(),
                queue: VecDeque::new(),
            },
            state_rx,
        )
    }

    fn message(room_id: RoomId, id: i64, created_at: i64) -> ChatMessage {
        ChatMessage {
            id,
            room_id,
            sender: Sender {
                user_id: "u2".to_string(),
                display_name: "Bob".to_string(),
                is_admin: false,
            },
            body: "hi".to_string(),
            kind: MessageKind::Text,
            created_at,
            reaction_count: 0,
        }
    }

    #[tokio::test]
    async fn offline_join_queues_a_single_join_intent() {
        let (mut core, _state) = test_core();
        core.offline_command(Some(Command::Join {
            room_id: 7,
            handlers: RoomHandlers::noop(),
        }));
        // Second view on the same room: callbacks replaced, no second join
        core.offline_command(Some(Command::Join {
            room_id: 7,
            handlers: RoomHandlers::noop(),
        }));
        assert_eq!(core.queue.len(), 1);
        assert!(matches!(core.queue[0], Intent::Join { room_id: 7 }));
    }

    #[tokio::test]
    async fn offline_leave_purges_room_scoped_intents() {
        let (mut core, _state) = test_core();
        core.offline_command(Some(Command::Join {
            room_id: 7,
            handlers: RoomHandlers::noop(),
        }));
        core.offline_command(Some(Command::PostMessage {
            room_id: 7,
            body: "pending".to_string(),
            kind: MessageKind::Text,
        }));
        core.offline_command(Some(Command::PostMessage {
            room_id: 8,
            body: "other room".to_string(),
            kind: MessageKind::Text,
        }));

        core.offline_command(Some(Command::Leave { room_id: 7 }));

        assert_eq!(core.queue.len(), 1);
        assert_eq!(core.queue[0].room_id(), 8);
        assert!(core.registry.get(7).is_none());
    }

    #[tokio::test]
    async fn disconnect_discards_queue_and_parks_state() {
        let (mut core, state) = test_core();
        core.offline_command(Some(Command::PostMessage {
            room_id: 7,
            body: "never sent".to_string(),
            kind: MessageKind::Text,
        }));
        let flow = core.offline_command(Some(Command::Disconnect));
        assert_eq!(flow, Flow::Shutdown);
        assert!(core.queue.is_empty());
        assert!(core.registry.is_empty());
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn frame_for_unsubscribed_room_is_dropped() {
        let (mut core, _state) = test_core();
        // Must not panic or create state
        core.handle_frame(Frame::MessageCreated {
            room_id: 99,
            message: message(99, 1, 100),
        });
        assert!(core.registry.is_empty());
    }

    #[tokio::test]
    async fn own_typing_signals_are_ignored() {
        let (mut core, _state) = test_core();
        core.subscribe(7, RoomHandlers::noop());
        core.handle_frame(Frame::TypingChanged {
            room_id: 7,
            user_id: "me".to_string(),
            display_name: "Me".to_string(),
            is_typing: true,
        });
        assert!(core.registry.get(7).unwrap().typing.is_empty());
    }

    #[tokio::test]
    async fn transport_loss_clears_typing_and_marks_rooms_pending() {
        let (mut core, state) = test_core();
        core.subscribe(7, RoomHandlers::noop());
        if let Some(sub) = core.registry.get_mut(7) {
            sub.join_state = JoinState::Joined;
        }
        core.handle_frame(Frame::TypingChanged {
            room_id: 7,
            user_id: "u2".to_string(),
            display_name: "Bob".to_string(),
            is_typing: true,
        });

        core.on_transport_lost();

        assert_eq!(*state.borrow(), ConnectionState::Reconnecting);
        let sub = core.registry.get(7).unwrap();
        assert!(sub.typing.is_empty());
        assert_eq!(sub.join_state, JoinState::Pending);
    }

    #[tokio::test]
    async fn flush_marks_queued_joins_as_joined() {
        let (mut core, _state) = test_core();
        core.offline_command(Some(Command::Join {
            room_id: 7,
            handlers: RoomHandlers::noop(),
        }));
        let (tx, mut rx) = mpsc::channel::<Intent>(8);
        assert_eq!(core.flush_queue(&tx).await, Flow::Continue);
        assert!(matches!(rx.try_recv().unwrap(), Intent::Join { room_id: 7 }));
        assert_eq!(
            core.registry.get(7).unwrap().join_state,
            JoinState::Joined
        );
    }
}
