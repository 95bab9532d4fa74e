//! Inbound transport events and outbound user notices.

use serde::Serialize;

use murmur_shared::i18n::translate;
use murmur_shared::{Fingerprint, Language, Message, MessageKind, PeerIdentity};

use crate::error::{ClientError, TransportError};

/// Generation counter of room sessions. Every connect and every teardown
/// moves it forward, so events stamped with an older value are recognised
/// as belonging to a superseded session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionEpoch(pub u64);

impl SessionEpoch {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message {
        sender: PeerIdentity,
        sender_name: String,
        content: String,
    },
    PeerJoin {
        identity: PeerIdentity,
        display_name: String,
        fingerprint: Option<Fingerprint>,
    },
    PeerLeft {
        identity: PeerIdentity,
    },
    /// The backend itself detected a key change against a pin it was given.
    KeyMismatch {
        identity: PeerIdentity,
        display_name: String,
        expected: Fingerprint,
        received: Fingerprint,
    },
    RoomError {
        message: String,
    },
    SelfIdentity {
        identity: PeerIdentity,
    },
    /// The connection attempt or an established connection failed.
    ConnectionFailed {
        reason: String,
    },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Message { .. } => "message",
            TransportEvent::PeerJoin { .. } => "peerJoin",
            TransportEvent::PeerLeft { .. } => "peerLeft",
            TransportEvent::KeyMismatch { .. } => "keyMismatch",
            TransportEvent::RoomError { .. } => "roomError",
            TransportEvent::SelfIdentity { .. } => "selfIdentity",
            TransportEvent::ConnectionFailed { .. } => "connectionFailed",
        }
    }
}

/// A transport event stamped with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub epoch: SessionEpoch,
    pub event: TransportEvent,
}

impl SessionEvent {
    pub fn new(epoch: SessionEpoch, event: TransportEvent) -> Self {
        Self { epoch, event }
    }
}

/// User-visible notices. Only connection, credential, delivery, security
/// and storage problems ever reach the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notice {
    ConnectionFailed {
        reason: String,
    },
    InvalidCredentials {
        message: String,
    },
    SendFailed {
        reason: String,
    },
    KeyMismatch {
        identity: PeerIdentity,
        display_name: String,
        expected: Fingerprint,
        received: Fingerprint,
    },
    StorageDegraded {
        pending: usize,
    },
}

impl Notice {
    /// Notices the user must acknowledge before continuing.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Notice::KeyMismatch { .. })
    }

    /// Notice for a failed `connect`, if the failure is user-meaningful.
    pub fn from_connect_error(error: &ClientError) -> Option<Self> {
        match error {
            ClientError::Transport(TransportError::AuthenticationFailed) => {
                Some(Notice::InvalidCredentials {
                    message: error.to_string(),
                })
            }
            ClientError::Transport(e) => Some(Notice::ConnectionFailed {
                reason: e.to_string(),
            }),
            _ => None,
        }
    }

    /// Notice for a failed `send_message`, if the failure is user-meaningful.
    pub fn from_send_error(error: &ClientError) -> Option<Self> {
        match error {
            ClientError::Transport(e) => Some(Notice::SendFailed {
                reason: e.to_string(),
            }),
            _ => None,
        }
    }

    /// One-line text in `lang`.
    pub fn render(&self, lang: Language) -> String {
        match self {
            Notice::ConnectionFailed { .. } => translate(lang, "errors.connectionFailed").to_string(),
            Notice::InvalidCredentials { .. } => translate(lang, "errors.invalidPassword").to_string(),
            Notice::SendFailed { .. } => translate(lang, "errors.sendFailed").to_string(),
            Notice::KeyMismatch {
                display_name,
                expected,
                received,
                ..
            } => format!(
                "{} {}\n{}: {}\n{}: {}",
                translate(lang, "security.keyMismatch"),
                display_name,
                translate(lang, "security.expected"),
                expected,
                translate(lang, "security.received"),
                received,
            ),
            Notice::StorageDegraded { .. } => translate(lang, "errors.storageDegraded").to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Display text of a synthesized timeline entry; `None` for user messages.
pub fn render_system(message: &Message, lang: Language) -> Option<String> {
    let key = match message.kind {
        MessageKind::SystemJoin => "chat.userJoined",
        MessageKind::SystemLeft => "chat.userLeft",
        MessageKind::User => return None,
    };
    Some(format!("{} {}", message.sender_name, translate(lang, key)))
}
