//! Live-connection wire types.
//!
//! Every inbound frame and outbound intent is a JSON object tagged with
//! `"type"` and scoped to a single room. Identity is attached once at
//! connect time (see [`crate::transport`]), never per-frame.

use serde::{Deserialize, Serialize};

/// Room (channel) identifier, assigned by the server.
pub type RoomId = i64;

/// Message identifier, unique and monotonically assigned by the server.
pub type MessageId = i64;

/// The authenticated identity a session runs as.
///
/// `user_id` is used to suppress the local user's own typing signals;
/// `token` is the credential attached at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub token: String,
    pub display_name: String,
}

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Message body kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Text,
    File,
}

/// A chat message as stored in a room's merged sequence.
///
/// Immutable except `reaction_count` (updated in place) and existence
/// (a delete removes it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: Sender,
    pub body: String,
    pub kind: MessageKind,
    /// Creation time, unix milliseconds. Orders the merged sequence,
    /// ties broken by `id`.
    pub created_at: i64,
    #[serde(default)]
    pub reaction_count: u32,
}

/// Frames pushed FROM the server TO the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// A new message was created in a room.
    MessageCreated { room_id: RoomId, message: ChatMessage },
    /// A message was deleted.
    MessageDeleted {
        room_id: RoomId,
        message_id: MessageId,
    },
    /// A message's reaction count changed.
    ReactionUpdated {
        room_id: RoomId,
        message_id: MessageId,
        count: u32,
    },
    /// Another user started or stopped typing.
    TypingChanged {
        room_id: RoomId,
        user_id: String,
        display_name: String,
        is_typing: bool,
    },
    /// Full presence snapshot for a room; replaces any previous one.
    PresenceChanged {
        room_id: RoomId,
        online_count: u32,
        #[serde(default)]
        online_users: Vec<String>,
    },
}

impl Frame {
    /// The room this frame is scoped to, used for demultiplexing.
    pub fn room_id(&self) -> RoomId {
        match self {
            Frame::MessageCreated { room_id, .. }
            | Frame::MessageDeleted { room_id, .. }
            | Frame::ReactionUpdated { room_id, .. }
            | Frame::TypingChanged { room_id, .. }
            | Frame::PresenceChanged { room_id, .. } => *room_id,
        }
    }
}

/// Intents sent FROM the client TO the server.
///
/// Fire-and-forget: intents queued while disconnected are flushed in FIFO
/// order on (re)connection, or discarded on explicit disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Intent {
    /// Subscribe to a room's frames.
    Join { room_id: RoomId },
    /// Unsubscribe from a room.
    Leave { room_id: RoomId },
    /// Post a new message to a room.
    PostMessage {
        room_id: RoomId,
        body: String,
        kind: MessageKind,
    },
    /// Signal that the local user started or stopped typing.
    TypingSignal {
        room_id: RoomId,
        display_name: String,
        is_typing: bool,
    },
}

impl Intent {
    /// The room this intent is scoped to.
    pub fn room_id(&self) -> RoomId {
        match self {
            Intent::Join { room_id }
            | Intent::Leave { room_id }
            | Intent::PostMessage { room_id, .. }
            | Intent::TypingSignal { room_id, .. } => *room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: MessageId) -> ChatMessage {
        ChatMessage {
            id,
            room_id: 7,
            sender: Sender {
                user_id: "u1".to_string(),
                display_name: "Alice".to_string(),
                is_admin: false,
            },
            body: "hello".to_string(),
            kind: MessageKind::Text,
            created_at: 1_700_000_000_000,
            reaction_count: 0,
        }
    }

    #[test]
    fn frame_message_created_roundtrip() {
        let frame = Frame::MessageCreated {
            room_id: 7,
            message: message(12),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"message-created\""));

        let decoded: Frame = serde_json::from_str(&json).unwrap();
        match decoded {
            Frame::MessageCreated { room_id, message } => {
                assert_eq!(room_id, 7);
                assert_eq!(message.id, 12);
                assert_eq!(message.kind, MessageKind::Text);
            }
            _ => panic!("Expected MessageCreated"),
        }
    }

    #[test]
    fn frame_typing_changed_from_raw_json() {
        let json = r#"{"type":"typing-changed","room_id":3,"user_id":"u2","display_name":"Bob","is_typing":true}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::TypingChanged {
                room_id,
                user_id,
                display_name,
                is_typing,
            } => {
                assert_eq!(room_id, 3);
                assert_eq!(user_id, "u2");
                assert_eq!(display_name, "Bob");
                assert!(is_typing);
            }
            _ => panic!("Expected TypingChanged"),
        }
    }

    #[test]
    fn frame_presence_users_default_to_empty() {
        let json = r#"{"type":"presence-changed","room_id":3,"online_count":5}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::PresenceChanged {
                online_count,
                online_users,
                ..
            } => {
                assert_eq!(online_count, 5);
                assert!(online_users.is_empty());
            }
            _ => panic!("Expected PresenceChanged"),
        }
    }

    #[test]
    fn frame_room_id_covers_all_variants() {
        let frames = vec![
            Frame::MessageCreated {
                room_id: 1,
                message: message(9),
            },
            Frame::MessageDeleted {
                room_id: 1,
                message_id: 9,
            },
            Frame::ReactionUpdated {
                room_id: 1,
                message_id: 9,
                count: 2,
            },
            Frame::TypingChanged {
                room_id: 1,
                user_id: "u".into(),
                display_name: "U".into(),
                is_typing: false,
            },
            Frame::PresenceChanged {
                room_id: 1,
                online_count: 0,
                online_users: vec![],
            },
        ];
        for frame in frames {
            assert_eq!(frame.room_id(), 1);
        }
    }

    #[test]
    fn frame_unknown_type_is_rejected() {
        let json = r#"{"type":"room-renamed","room_id":1}"#;
        let result: Result<Frame, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn intent_join_serializes_with_kebab_tag() {
        let intent = Intent::Join { room_id: 42 };
        let json = serde_json::to_string(&intent).unwrap();
        assert_eq!(json, r#"{"type":"join","room_id":42}"#);
    }

    #[test]
    fn intent_post_message_roundtrip() {
        let intent = Intent::PostMessage {
            room_id: 7,
            body: "hi there".to_string(),
            kind: MessageKind::File,
        };
        let json = serde_json::to_string(&intent).unwrap();
        assert!(json.contains("\"type\":\"post-message\""));
        assert!(json.contains("\"kind\":\"FILE\""));

        let decoded: Intent = serde_json::from_str(&json).unwrap();
        match decoded {
            Intent::PostMessage { room_id, body, kind } => {
                assert_eq!(room_id, 7);
                assert_eq!(body, "hi there");
                assert_eq!(kind, MessageKind::File);
            }
            _ => panic!("Expected PostMessage"),
        }
    }

    #[test]
    fn message_kind_matches_rest_collaborator_casing() {
        assert_eq!(serde_json::to_string(&MessageKind::Text).unwrap(), "\"TEXT\"");
        assert_eq!(serde_json::to_string(&MessageKind::File).unwrap(), "\"FILE\"");
    }

    #[test]
    fn chat_message_reaction_count_defaults_to_zero() {
        let json = r#"{
            "id": 10,
            "room_id": 7,
            "sender": {"user_id": "u1", "display_name": "Alice"},
            "body": "hey",
            "kind": "TEXT",
            "created_at": 1700000000000
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.reaction_count, 0);
        assert!(!msg.sender.is_admin);
    }
}
