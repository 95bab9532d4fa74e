//! Outbound contract with the transport / crypto backend.
//!
//! The backend owns sockets, key exchange and encryption. Its notifications
//! come back as [`crate::events::SessionEvent`]s stamped with the epoch handed
//! to [`Transport::connect`].

use murmur_shared::room::generate_room_id;
use murmur_shared::{Fingerprint, PeerIdentity};

use crate::error::TransportError;
use crate::events::SessionEpoch;

/// Parameters of a connect or create-room request.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub server_address: String,
    pub room_id: String,
    pub display_name: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("server_address", &self.server_address)
            .field("room_id", &self.room_id)
            .field("display_name", &self.display_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait Transport: Send {
    /// Start joining a room. Events for this attempt must carry `epoch`.
    fn connect(&mut self, epoch: SessionEpoch, request: &ConnectRequest)
        -> Result<(), TransportError>;

    fn send_message(&mut self, content: &str) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn generate_room_identifier(&self) -> String {
        generate_room_id()
    }

    /// Tell the backend which fingerprint we expect for `identity`.
    fn pin_peer_fingerprint(&mut self, identity: &PeerIdentity, fingerprint: &Fingerprint);

    fn own_fingerprint(&self) -> Option<Fingerprint>;

    /// Fingerprint of the key the backend currently holds for `identity`.
    fn peer_fingerprint(&self, identity: &PeerIdentity) -> Option<Fingerprint>;
}
