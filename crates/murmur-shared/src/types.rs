use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SharedError;

/// Opaque identifier the backend assigns to a peer for one room session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(raw: impl Into<String>) -> Result<Self, SharedError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(SharedError::EmptyIdentity);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote participant currently present in the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub identity: PeerIdentity,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    User,
    SystemJoin,
    SystemLeft,
}

impl MessageKind {
    pub fn is_system(self) -> bool {
        !matches!(self, MessageKind::User)
    }

    fn tag(self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::SystemJoin => "system-join",
            MessageKind::SystemLeft => "system-left",
        }
    }
}

/// Stable timeline key for a message.
///
/// Derived from the sender, the local receipt time, the local sequence number
/// and the content, so two entries created from the same event are still
/// distinct if they were sequenced separately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn derive(
        kind: MessageKind,
        sender: &PeerIdentity,
        timestamp: DateTime<Utc>,
        sequence: u64,
        content: &str,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.tag().as_bytes());
        hasher.update(&[0]);
        hasher.update(sender.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&timestamp.timestamp_millis().to_le_bytes());
        hasher.update(&sequence.to_le_bytes());
        hasher.update(content.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the chat timeline. Immutable once created.
///
/// For system entries `content` is empty and `sender_name` carries the name
/// of the peer that joined or left.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: PeerIdentity,
    pub sender_name: String,
    pub content: String,
    /// Local receipt time.
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl Message {
    pub fn user(
        sender: PeerIdentity,
        sender_name: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        let content = content.into();
        Self {
            id: MessageId::derive(MessageKind::User, &sender, timestamp, sequence, &content),
            sender,
            sender_name: sender_name.into(),
            content,
            timestamp,
            kind: MessageKind::User,
        }
    }

    pub fn system(
        kind: MessageKind,
        peer: &Peer,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id: MessageId::derive(kind, &peer.identity, timestamp, sequence, ""),
            sender: peer.identity.clone(),
            sender_name: peer.display_name.clone(),
            content: String::new(),
            timestamp,
            kind,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind.is_system()
    }
}

/// Absolute distance between two instants in milliseconds.
pub fn millis_apart(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_milliseconds().abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert_eq!(PeerIdentity::new(""), Err(SharedError::EmptyIdentity));
    }

    #[test]
    fn test_message_id_depends_on_sequence() {
        let alice = PeerIdentity::new("alice").unwrap();
        let a = Message::user(alice.clone(), "Alice", "hi", ts(1_000), 1);
        let b = Message::user(alice, "Alice", "hi", ts(1_000), 2);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_system_and_user_ids_never_collide() {
        let peer = Peer {
            identity: PeerIdentity::new("bob").unwrap(),
            display_name: "Bob".into(),
        };
        let sys = Message::system(MessageKind::SystemJoin, &peer, ts(5), 3);
        let user = Message::user(peer.identity.clone(), "Bob", "", ts(5), 3);
        assert_ne!(sys.id, user.id);
        assert!(sys.is_system());
        assert!(!user.is_system());
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&MessageKind::SystemLeft).unwrap();
        assert_eq!(json, "\"system-left\"");
    }

    #[test]
    fn test_millis_apart_is_symmetric() {
        assert_eq!(millis_apart(ts(100), ts(2_100)), 2_000);
        assert_eq!(millis_apart(ts(2_100), ts(100)), 2_000);
    }
}
