use thiserror::Error;

use murmur_store::StoreError;

use crate::session::ConnectionState;

/// Failures reported by the transport collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Room rejected the credentials")]
    AuthenticationFailed,

    #[error("Message rejected: {0}")]
    SendRejected(String),

    #[error("Transport closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected to a room")]
    NotConnected,

    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: ConnectionState,
        action: &'static str,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shared state lock poisoned")]
    LockPoisoned,

    #[error("Session task stopped")]
    SessionClosed,
}
