//! Types shared by every murmur crate: peer identities, key fingerprints,
//! the message model, localisation tables and reconciliation constants.

pub mod constants;
pub mod error;
pub mod fingerprint;
pub mod i18n;
pub mod room;
pub mod types;

pub use error::SharedError;
pub use fingerprint::Fingerprint;
pub use i18n::Language;
pub use types::{Message, MessageId, MessageKind, Peer, PeerIdentity};
