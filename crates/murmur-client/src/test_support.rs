use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use murmur_shared::{Fingerprint, PeerIdentity};
use murmur_store::{shared, KvStore, MemoryStore, SharedKv, StoreError};

use crate::clock::ManualClock;
use crate::config::ReconcileLimits;
use crate::error::TransportError;
use crate::events::SessionEpoch;
use crate::session::ClientContext;
use crate::transport::{ConnectRequest, Transport};

/// Transport that records every outbound call.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connects: Vec<(SessionEpoch, ConnectRequest)>,
    pub sent: Vec<String>,
    pub disconnects: usize,
    pub pins: Vec<(PeerIdentity, Fingerprint)>,
    pub fail_connect: Option<TransportError>,
    pub fail_send: Option<TransportError>,
    pub own: Option<Fingerprint>,
    pub peer_keys: HashMap<PeerIdentity, Fingerprint>,
}

impl Transport for MockTransport {
    fn connect(
        &mut self,
        epoch: SessionEpoch,
        request: &ConnectRequest,
    ) -> Result<(), TransportError> {
        if let Some(e) = self.fail_connect.clone() {
            return Err(e);
        }
        self.connects.push((epoch, request.clone()));
        Ok(())
    }

    fn send_message(&mut self, content: &str) -> Result<(), TransportError> {
        if let Some(e) = self.fail_send.clone() {
            return Err(e);
        }
        self.sent.push(content.to_string());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnects += 1;
        Ok(())
    }

    fn generate_room_identifier(&self) -> String {
        "room-generated".to_string()
    }

    fn pin_peer_fingerprint(&mut self, identity: &PeerIdentity, fingerprint: &Fingerprint) {
        self.pins.push((identity.clone(), fingerprint.clone()));
    }

    fn own_fingerprint(&self) -> Option<Fingerprint> {
        self.own.clone()
    }

    fn peer_fingerprint(&self, identity: &PeerIdentity) -> Option<Fingerprint> {
        self.peer_keys.get(identity).cloned()
    }
}

/// Memory store whose writes fail while `failing` is set.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub failing: Arc<AtomicBool>,
}

impl KvStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.put(key, value)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.inner.scan_prefix(prefix)
    }
}

pub fn id(s: &str) -> PeerIdentity {
    PeerIdentity::new(s).unwrap()
}

pub fn fp(s: &str) -> Fingerprint {
    Fingerprint::parse(s).unwrap()
}

pub fn request(room: &str) -> ConnectRequest {
    ConnectRequest {
        server_address: "localhost:8080".into(),
        room_id: room.into(),
        display_name: "Me".into(),
        password: String::new(),
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()))
}

pub fn context_with(kv: SharedKv, clock: Arc<ManualClock>) -> ClientContext {
    ClientContext::with_store(kv, clock, ReconcileLimits::default()).unwrap()
}

pub fn context(clock: Arc<ManualClock>) -> ClientContext {
    context_with(shared(MemoryStore::new()), clock)
}
