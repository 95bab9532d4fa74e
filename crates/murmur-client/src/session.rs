//! Top-level session state machine.
//!
//! ```text
//! Disconnected --connect--> Connecting --selfIdentity--> Connected
//!      ^                        |                            |
//!      +---- failure / roomError / disconnect ---------------+
//! ```
//!
//! Every connect and every teardown advances the [`SessionEpoch`]; events
//! stamped with any other epoch are dropped, so a late event from a
//! superseded session can never repopulate cleared state.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use murmur_shared::{Fingerprint, Language, Message, Peer, PeerIdentity};
use murmur_store::{
    shared, Database, FingerprintStore, Observation, Settings, SharedFingerprintStore, SharedKv,
};

use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ReconcileLimits};
use crate::dedup::MessageDeduplicator;
use crate::error::ClientError;
use crate::events::{Notice, SessionEpoch, SessionEvent, TransportEvent};
use crate::roster::{RosterDelta, RosterManager};
use crate::timeline::TimelineBuilder;
use crate::transport::{ConnectRequest, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Process-scoped collaborators shared by every session.
#[derive(Clone)]
pub struct ClientContext {
    pub fingerprints: SharedFingerprintStore,
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub limits: ReconcileLimits,
}

impl ClientContext {
    /// Open the on-disk store named by `config` and load pinned fingerprints.
    pub fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let db = match &config.data_dir {
            Some(dir) => Database::open_in(dir)?,
            None => Database::new()?,
        };
        Self::with_store(shared(db), Arc::new(SystemClock), config.limits)
    }

    pub fn with_store(
        kv: SharedKv,
        clock: Arc<dyn Clock>,
        limits: ReconcileLimits,
    ) -> Result<Self, ClientError> {
        let fingerprints = FingerprintStore::load(kv.clone())?.into_shared();
        Ok(Self {
            fingerprints,
            settings: Settings::new(kv),
            clock,
            limits,
        })
    }
}

/// Read-only view of the session for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Increases on every change to the session.
    pub version: u64,
    pub epoch: SessionEpoch,
    pub state: ConnectionState,
    pub room_id: Option<String>,
    pub self_identity: Option<PeerIdentity>,
    pub peers: Vec<Peer>,
    pub timeline: Vec<Message>,
}

impl SessionSnapshot {
    pub fn is_own_message(&self, message: &Message) -> bool {
        !message.is_system() && self.self_identity.as_ref() == Some(&message.sender)
    }

    /// Peers plus ourselves while connected.
    pub fn online_count(&self) -> usize {
        match self.state {
            ConnectionState::Connected => self.peers.len() + 1,
            _ => 0,
        }
    }
}

pub struct SessionController<T: Transport> {
    transport: T,
    context: ClientContext,
    language: Language,
    state: ConnectionState,
    epoch: SessionEpoch,
    room_id: Option<String>,
    display_name: String,
    roster: RosterManager,
    dedup: MessageDeduplicator,
    timeline: TimelineBuilder,
    /// Local counter shared by user and system entries.
    sequence: u64,
    version: u64,
    /// Mismatches already shown this session, keyed by received value.
    reported_mismatches: HashSet<(PeerIdentity, Fingerprint)>,
    /// Fingerprints announced before our own identity is known. Checked
    /// once it is, so our own key is never pinned.
    deferred_observations: Vec<(PeerIdentity, String, Fingerprint)>,
    storage_degraded: bool,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: T, context: ClientContext) -> Self {
        let language = context.settings.language().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read language setting");
            Language::default()
        });
        let limits = context.limits;

        Self {
            transport,
            context,
            language,
            state: ConnectionState::Disconnected,
            epoch: SessionEpoch::default(),
            room_id: None,
            display_name: String::new(),
            roster: RosterManager::new(),
            dedup: MessageDeduplicator::new(&limits),
            timeline: TimelineBuilder::new(&limits),
            sequence: 0,
            version: 0,
            reported_mismatches: HashSet::new(),
            deferred_observations: Vec::new(),
            storage_degraded: false,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start joining a room. Any current session is torn down first.
    pub fn connect(&mut self, request: ConnectRequest) -> Result<SessionEpoch, ClientError> {
        if self.state != ConnectionState::Disconnected {
            info!(room = ?self.room_id, "Leaving current room before connecting");
            self.teardown();
        }

        self.epoch = self.epoch.next();
        self.state = ConnectionState::Connecting;
        self.room_id = Some(request.room_id.clone());
        self.display_name = request.display_name.clone();
        self.touch();

        info!(
            epoch = %self.epoch,
            room = %request.room_id,
            server = %request.server_address,
            "Connecting to room"
        );

        if let Err(e) = self.transport.connect(self.epoch, &request) {
            warn!(error = %e, room = %request.room_id, "Connection attempt failed");
            self.epoch = self.epoch.next();
            self.reset_session();
            return Err(e.into());
        }

        Ok(self.epoch)
    }

    /// Generate a fresh room identifier and connect to it.
    pub fn create_room(
        &mut self,
        server_address: &str,
        display_name: &str,
        password: &str,
    ) -> Result<(String, SessionEpoch), ClientError> {
        let room_id = self.transport.generate_room_identifier();
        let epoch = self.connect(ConnectRequest {
            server_address: server_address.to_string(),
            room_id: room_id.clone(),
            display_name: display_name.to_string(),
            password: password.to_string(),
        })?;
        Ok((room_id, epoch))
    }

    /// Leave the room and clear all session state. Pinned fingerprints are
    /// kept. The state is cleared even if the transport reports an error.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }

        // Stop accepting events of this session before anything is cleared.
        self.epoch = self.epoch.next();
        info!(epoch = %self.epoch, room = ?self.room_id, "Disconnecting");

        let closed = self.transport.disconnect();
        self.reset_session();

        closed.map_err(|e| {
            warn!(error = %e, "Transport reported an error while disconnecting");
            e.into()
        })
    }

    fn teardown(&mut self) {
        // disconnect() already logged the failure.
        let _ = self.disconnect();
    }

    fn reset_session(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.room_id = None;
        self.roster.clear();
        self.dedup.clear();
        self.timeline.clear();
        self.reported_mismatches.clear();
        self.deferred_observations.clear();
        self.touch();
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Apply one transport event. Returns the notices it produced.
    pub fn handle(&mut self, envelope: SessionEvent) -> Vec<Notice> {
        if envelope.epoch != self.epoch || self.state == ConnectionState::Disconnected {
            debug!(
                event = envelope.event.name(),
                event_epoch = %envelope.epoch,
                current_epoch = %self.epoch,
                "Ignoring event outside the current session"
            );
            return Vec::new();
        }

        match envelope.event {
            TransportEvent::Message {
                sender,
                sender_name,
                content,
            } => {
                self.ingest(sender, sender_name, content);
                Vec::new()
            }
            TransportEvent::PeerJoin {
                identity,
                display_name,
                fingerprint,
            } => self.on_peer_join(identity, display_name, fingerprint),
            TransportEvent::PeerLeft { identity } => {
                let delta = self.roster.on_peer_leave(&identity);
                self.apply_delta(&delta);
                Vec::new()
            }
            TransportEvent::KeyMismatch {
                identity,
                display_name,
                expected,
                received,
            } => self
                .mismatch_notice(identity, display_name, expected, received)
                .into_iter()
                .collect(),
            TransportEvent::RoomError { message } => {
                warn!(room = ?self.room_id, error = %message, "Room rejected the session");
                self.teardown();
                vec![Notice::InvalidCredentials { message }]
            }
            TransportEvent::SelfIdentity { identity } => self.on_self_identity(identity),
            TransportEvent::ConnectionFailed { reason } => {
                warn!(room = ?self.room_id, error = %reason, "Connection failed");
                self.teardown();
                vec![Notice::ConnectionFailed { reason }]
            }
        }
    }

    fn on_self_identity(&mut self, identity: PeerIdentity) -> Vec<Notice> {
        let mut notices = Vec::new();
        match self.state {
            ConnectionState::Connecting => {
                if self.roster.mark_loaded(identity.clone()).is_some() {
                    debug!(identity = %identity, "Removed own identity from initial roster");
                }
                self.state = ConnectionState::Connected;
                self.touch();

                info!(
                    identity = %identity,
                    epoch = %self.epoch,
                    room = ?self.room_id,
                    peers = self.roster.len(),
                    "Connected to room"
                );

                self.push_pins_to_transport();

                for (peer, name, fingerprint) in std::mem::take(&mut self.deferred_observations) {
                    if peer == identity {
                        debug!(identity = %identity, "Skipping own fingerprint from initial roster");
                        continue;
                    }
                    notices.extend(self.observe_fingerprint(&peer, &name, fingerprint));
                }
            }
            ConnectionState::Connected => {
                if !self.roster.is_self(&identity) {
                    warn!(identity = %identity, "Ignoring reassignment of own identity");
                }
            }
            ConnectionState::Disconnected => {}
        }
        notices
    }

    fn on_peer_join(
        &mut self,
        identity: PeerIdentity,
        display_name: String,
        fingerprint: Option<Fingerprint>,
    ) -> Vec<Notice> {
        let mut notices = Vec::new();

        match fingerprint {
            Some(fingerprint) if !self.roster.is_loaded() => {
                self.deferred_observations
                    .push((identity.clone(), display_name.clone(), fingerprint));
            }
            Some(fingerprint) if !self.roster.is_self(&identity) => {
                notices.extend(self.observe_fingerprint(&identity, &display_name, fingerprint));
            }
            _ => {}
        }

        let delta = self.roster.on_peer_join(&identity, &display_name);
        self.apply_delta(&delta);

        notices
    }

    /// TOFU check of an announced fingerprint. A store failure never blocks
    /// the roster update that follows.
    fn observe_fingerprint(
        &mut self,
        identity: &PeerIdentity,
        display_name: &str,
        fingerprint: Fingerprint,
    ) -> Vec<Notice> {
        let (observation, pending) = match self.context.fingerprints.lock() {
            Ok(mut store) => {
                let observation = store.observe(identity, &fingerprint);
                (observation, store.pending_writes())
            }
            Err(_) => {
                warn!(identity = %identity, "Fingerprint store unavailable, skipping check");
                return Vec::new();
            }
        };

        let mut notices = Vec::new();
        match observation {
            Observation::Pinned | Observation::Confirmed => {
                self.transport.pin_peer_fingerprint(identity, &fingerprint);
            }
            Observation::Mismatch { expected, received } => {
                notices.extend(self.mismatch_notice(
                    identity.clone(),
                    display_name.to_string(),
                    expected,
                    received,
                ));
            }
        }
        notices.extend(self.storage_notice(pending));
        notices
    }

    fn mismatch_notice(
        &mut self,
        identity: PeerIdentity,
        display_name: String,
        expected: Fingerprint,
        received: Fingerprint,
    ) -> Option<Notice> {
        if !self
            .reported_mismatches
            .insert((identity.clone(), received.clone()))
        {
            debug!(identity = %identity, "Key mismatch already reported");
            return None;
        }

        warn!(
            identity = %identity,
            name = %display_name,
            expected = %expected,
            received = %received,
            "SECURITY: peer key fingerprint mismatch"
        );

        Some(Notice::KeyMismatch {
            identity,
            display_name,
            expected,
            received,
        })
    }

    fn storage_notice(&mut self, pending: usize) -> Option<Notice> {
        if pending == 0 {
            self.storage_degraded = false;
            return None;
        }
        if self.storage_degraded {
            return None;
        }
        self.storage_degraded = true;
        Some(Notice::StorageDegraded { pending })
    }

    fn push_pins_to_transport(&mut self) {
        let pins = match self.context.fingerprints.lock() {
            Ok(store) => store.all_pins(),
            Err(_) => {
                warn!("Fingerprint store unavailable, not seeding transport pins");
                return;
            }
        };
        debug!(count = pins.len(), "Seeding transport with pinned fingerprints");
        for (identity, fingerprint) in &pins {
            self.transport.pin_peer_fingerprint(identity, fingerprint);
        }
    }

    fn apply_delta(&mut self, delta: &RosterDelta) {
        if *delta == RosterDelta::Unchanged {
            return;
        }
        self.touch();

        if let Some((kind, peer)) = delta.announcement() {
            let message = Message::system(kind, peer, self.context.clock.now(), self.next_sequence());
            if self.timeline.announce(message) {
                info!(identity = %peer.identity, name = %peer.display_name, kind = ?kind, "Roster change");
            }
        }
    }

    /// Run a user message through deduplication and onto the timeline.
    fn ingest(&mut self, sender: PeerIdentity, sender_name: String, content: String) -> bool {
        let now = self.context.clock.now();
        let sequence = self.next_sequence();

        if !self
            .dedup
            .admit(self.timeline.entries(), &sender, &content, now, sequence)
        {
            return false;
        }

        let appended = self
            .timeline
            .push(Message::user(sender, sender_name, content, now, sequence));
        if appended {
            self.touch();
        }
        appended
    }

    // -----------------------------------------------------------------------
    // Outbound actions
    // -----------------------------------------------------------------------

    /// Send `content` to the room and echo it locally. Blank content is
    /// ignored. Returns whether the echo reached the timeline.
    pub fn send_message(&mut self, content: &str) -> Result<bool, ClientError> {
        if content.trim().is_empty() {
            return Ok(false);
        }

        let own = match (self.state, self.roster.self_identity()) {
            (ConnectionState::Connected, Some(own)) => own.clone(),
            (ConnectionState::Disconnected, _) => return Err(ClientError::NotConnected),
            (from, _) => {
                return Err(ClientError::InvalidTransition {
                    from,
                    action: "send a message",
                })
            }
        };

        if let Err(e) = self.transport.send_message(content) {
            warn!(error = %e, "Message was not sent");
            return Err(e.into());
        }

        let name = self.display_name.clone();
        Ok(self.ingest(own, name, content.to_string()))
    }

    /// Explicitly move the pin for `identity`, e.g. after the user verified
    /// a rotated key out of band. Returns the previous pin.
    pub fn replace_pin(
        &mut self,
        identity: &PeerIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Fingerprint>, ClientError> {
        let previous = {
            let mut store = self
                .context
                .fingerprints
                .lock()
                .map_err(|_| ClientError::LockPoisoned)?;
            store.replace_pin(identity, fingerprint)
        };

        self.reported_mismatches.retain(|(id, _)| id != identity);
        if self.state != ConnectionState::Disconnected {
            self.transport.pin_peer_fingerprint(identity, fingerprint);
        }
        Ok(previous)
    }

    /// Re-attempt failed pin writes.
    pub fn retry_pending_pins(&mut self) -> Option<Notice> {
        let remaining = match self.context.fingerprints.lock() {
            Ok(mut store) => store.retry_pending(),
            Err(_) => return None,
        };
        self.storage_notice(remaining)
    }

    pub fn set_language(&mut self, language: Language) -> Result<(), ClientError> {
        self.context.settings.set_language(language)?;
        self.language = language;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn own_fingerprint(&self) -> Option<Fingerprint> {
        match self.state {
            ConnectionState::Disconnected => None,
            _ => self.transport.own_fingerprint(),
        }
    }

    /// Fingerprint of the key the backend holds for `identity` right now.
    pub fn peer_fingerprint(&self, identity: &PeerIdentity) -> Option<Fingerprint> {
        match self.state {
            ConnectionState::Disconnected => None,
            _ => self.transport.peer_fingerprint(identity),
        }
    }

    /// The pinned fingerprint for `identity`, from any session.
    pub fn known_fingerprint(
        &self,
        identity: &PeerIdentity,
    ) -> Result<Option<Fingerprint>, ClientError> {
        let store = self
            .context
            .fingerprints
            .lock()
            .map_err(|_| ClientError::LockPoisoned)?;
        Ok(store.pinned(identity).cloned())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: self.version,
            epoch: self.epoch,
            state: self.state,
            room_id: self.room_id.clone(),
            self_identity: self.roster.self_identity().cloned(),
            peers: self.roster.peers(),
            timeline: self.timeline.entries().to_vec(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.epoch
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn roster(&self) -> &RosterManager {
        &self.roster
    }

    pub fn timeline(&self) -> &[Message] {
        self.timeline.entries()
    }

    pub fn tracked_message_keys(&self) -> usize {
        self.dedup.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::Ordering;

    use crate::test_support::{
        context, context_with, fp, id, manual_clock, request, FlakyStore, MockTransport,
    };
    use murmur_shared::MessageKind;
    use murmur_store::MemoryStore;

    fn connected(controller: &mut SessionController<MockTransport>, me: &str) -> SessionEpoch {
        let epoch = controller.connect(request("room-1")).unwrap();
        controller.handle(SessionEvent::new(
            epoch,
            TransportEvent::SelfIdentity { identity: id(me) },
        ));
        epoch
    }

    fn join(epoch: SessionEpoch, who: &str, fingerprint: Option<&str>) -> SessionEvent {
        SessionEvent::new(
            epoch,
            TransportEvent::PeerJoin {
                identity: id(who),
                display_name: who.to_uppercase(),
                fingerprint: fingerprint.map(fp),
            },
        )
    }

    fn message(epoch: SessionEpoch, who: &str, content: &str) -> SessionEvent {
        SessionEvent::new(
            epoch,
            TransportEvent::Message {
                sender: id(who),
                sender_name: who.to_uppercase(),
                content: content.to_string(),
            },
        )
    }

    #[test]
    fn test_connect_moves_through_states() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        assert_eq!(c.state(), ConnectionState::Disconnected);

        let epoch = c.connect(request("room-1")).unwrap();
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert_eq!(c.room_id(), Some("room-1"));
        assert_eq!(c.transport().connects.len(), 1);

        c.handle(SessionEvent::new(
            epoch,
            TransportEvent::SelfIdentity { identity: id("me") },
        ));
        assert_eq!(c.state(), ConnectionState::Connected);
        assert_eq!(c.roster().self_identity(), Some(&id("me")));
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let transport = MockTransport {
            fail_connect: Some(TransportError::ConnectionFailed("refused".into())),
            ..Default::default()
        };
        let mut c = SessionController::new(transport, context(manual_clock()));

        let err = c.connect(request("room-1")).unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::ConnectionFailed(_))));
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.room_id(), None);
        assert_eq!(
            Notice::from_connect_error(&err),
            Some(Notice::ConnectionFailed { reason: "Connection failed: refused".into() })
        );
    }

    #[test]
    fn test_initial_roster_is_not_narrated() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = c.connect(request("room-1")).unwrap();

        for who in ["a", "b", "c", "d", "e"] {
            c.handle(join(epoch, who, None));
        }
        c.handle(SessionEvent::new(
            epoch,
            TransportEvent::SelfIdentity { identity: id("me") },
        ));

        assert_eq!(c.roster().len(), 5);
        assert!(c.timeline().is_empty());
    }

    #[test]
    fn test_own_identity_is_evicted_from_initial_roster() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = c.connect(request("room-1")).unwrap();

        c.handle(join(epoch, "me", None));
        c.handle(join(epoch, "bob", None));
        c.handle(SessionEvent::new(
            epoch,
            TransportEvent::SelfIdentity { identity: id("me") },
        ));

        assert!(!c.roster().contains(&id("me")));
        assert!(c.roster().contains(&id("bob")));
        assert_eq!(c.snapshot().online_count(), 2);
    }

    #[test]
    fn test_join_after_load_pins_and_announces() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = connected(&mut c, "me");

        let notices = c.handle(join(epoch, "bob", Some("aaaa")));
        assert!(notices.is_empty());

        assert_eq!(c.timeline().len(), 1);
        assert_eq!(c.timeline()[0].kind, MessageKind::SystemJoin);
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), Some(fp("aaaa")));
        assert_eq!(c.transport().pins, vec![(id("bob"), fp("aaaa"))]);
    }

    #[test]
    fn test_self_join_is_never_pinned() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = connected(&mut c, "me");

        c.handle(join(epoch, "me", Some("aaaa")));

        assert_eq!(c.known_fingerprint(&id("me")).unwrap(), None);
        assert!(c.timeline().is_empty());
        assert!(c.roster().is_empty());
    }

    #[test]
    fn test_own_key_in_initial_roster_is_not_pinned() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = c.connect(request("room-1")).unwrap();

        c.handle(join(epoch, "me", Some("aaaa")));
        c.handle(join(epoch, "bob", Some("bbbb")));
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), None);

        let notices = c.handle(SessionEvent::new(
            epoch,
            TransportEvent::SelfIdentity { identity: id("me") },
        ));
        assert!(notices.is_empty());

        assert_eq!(c.known_fingerprint(&id("me")).unwrap(), None);
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), Some(fp("bbbb")));
        assert_eq!(c.transport().pins, vec![(id("bob"), fp("bbbb"))]);
    }

    #[test]
    fn test_initial_roster_mismatch_is_reported_on_load() {
        let kv = murmur_store::shared(MemoryStore::new());
        kv.lock()
            .unwrap()
            .put(&murmur_store::fingerprints::pin_key(&id("bob")), "aaaa")
            .unwrap();
        let mut c =
            SessionController::new(MockTransport::default(), context_with(kv, manual_clock()));
        let epoch = c.connect(request("room-1")).unwrap();

        assert!(c.handle(join(epoch, "bob", Some("bbbb"))).is_empty());

        let notices = c.handle(SessionEvent::new(
            epoch,
            TransportEvent::SelfIdentity { identity: id("me") },
        ));
        assert!(matches!(
            notices.as_slice(),
            [Notice::KeyMismatch { expected, received, .. }]
                if *expected == fp("aaaa") && *received == fp("bbbb")
        ));
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), Some(fp("aaaa")));
    }

    #[test]
    fn test_initial_roster_observations_dropped_on_disconnect() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let old = c.connect(request("room-1")).unwrap();
        c.handle(join(old, "bob", Some("bbbb")));
        c.disconnect().unwrap();

        connected(&mut c, "me");
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), None);
    }

    #[test]
    fn test_changed_key_raises_one_blocking_notice() {
        let clock = manual_clock();
        let mut c = SessionController::new(MockTransport::default(), context(clock.clone()));
        let epoch = connected(&mut c, "me");

        c.handle(join(epoch, "bob", Some("aaaa")));
        c.handle(SessionEvent::new(epoch, TransportEvent::PeerLeft { identity: id("bob") }));

        clock.advance_ms(10_000);
        let notices = c.handle(join(epoch, "bob", Some("bbbb")));
        assert_eq!(
            notices,
            vec![Notice::KeyMismatch {
                identity: id("bob"),
                display_name: "BOB".into(),
                expected: fp("aaaa"),
                received: fp("bbbb"),
            }]
        );
        assert!(notices[0].is_blocking());
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), Some(fp("aaaa")));

        // The backend's own report of the same mismatch is folded in.
        let again = c.handle(SessionEvent::new(
            epoch,
            TransportEvent::KeyMismatch {
                identity: id("bob"),
                display_name: "BOB".into(),
                expected: fp("aaaa"),
                received: fp("bbbb"),
            },
        ));
        assert!(again.is_empty());
    }

    #[test]
    fn test_replace_pin_accepts_the_new_key() {
        let clock = manual_clock();
        let mut c = SessionController::new(MockTransport::default(), context(clock.clone()));
        let epoch = connected(&mut c, "me");
        c.handle(join(epoch, "bob", Some("aaaa")));

        let previous = c.replace_pin(&id("bob"), &fp("bbbb")).unwrap();
        assert_eq!(previous, Some(fp("aaaa")));

        c.handle(SessionEvent::new(epoch, TransportEvent::PeerLeft { identity: id("bob") }));
        clock.advance_ms(10_000);
        assert!(c.handle(join(epoch, "bob", Some("bbbb"))).is_empty());
    }

    #[test]
    fn test_redelivered_message_is_dropped() {
        let clock = manual_clock();
        let mut c = SessionController::new(MockTransport::default(), context(clock.clone()));
        let epoch = connected(&mut c, "me");

        c.handle(message(epoch, "bob", "hi"));
        clock.advance_ms(500);
        c.handle(message(epoch, "bob", "hi"));
        assert_eq!(c.timeline().len(), 1);

        clock.advance_ms(2_000);
        c.handle(message(epoch, "bob", "hi"));
        assert_eq!(c.timeline().len(), 2);
    }

    #[test]
    fn test_send_echoes_locally_and_swallows_backend_echo() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = connected(&mut c, "me");

        assert!(c.send_message("hello").unwrap());
        assert_eq!(c.transport().sent, vec!["hello".to_string()]);

        c.handle(message(epoch, "me", "hello"));
        let snapshot = c.snapshot();
        assert_eq!(snapshot.timeline.len(), 1);
        assert!(snapshot.is_own_message(&snapshot.timeline[0]));
    }

    #[test]
    fn test_send_requires_a_connected_session() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        assert!(!c.send_message("   ").unwrap());
        assert!(matches!(c.send_message("hi"), Err(ClientError::NotConnected)));

        c.connect(request("room-1")).unwrap();
        assert!(matches!(
            c.send_message("hi"),
            Err(ClientError::InvalidTransition { from: ConnectionState::Connecting, .. })
        ));
        assert!(c.transport().sent.is_empty());
    }

    #[test]
    fn test_rejected_send_leaves_timeline_untouched() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        connected(&mut c, "me");
        c.transport.fail_send = Some(TransportError::SendRejected("too large".into()));

        let err = c.send_message("hello").unwrap_err();
        assert!(c.timeline().is_empty());
        assert_eq!(
            Notice::from_send_error(&err),
            Some(Notice::SendFailed { reason: "Message rejected: too large".into() })
        );
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let old = connected(&mut c, "me");
        c.disconnect().unwrap();
        let new = c.connect(request("room-2")).unwrap();
        assert_ne!(old, new);

        c.handle(join(old, "ghost", None));
        c.handle(message(old, "ghost", "boo"));

        assert!(c.roster().is_empty());
        assert!(c.timeline().is_empty());
    }

    #[test]
    fn test_events_while_disconnected_are_ignored() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let notices = c.handle(message(c.epoch(), "bob", "hi"));
        assert!(notices.is_empty());
        assert!(c.timeline().is_empty());
    }

    #[test]
    fn test_disconnect_clears_session_but_keeps_pins() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = connected(&mut c, "me");
        c.handle(join(epoch, "bob", Some("aaaa")));
        c.handle(message(epoch, "bob", "hi"));

        c.disconnect().unwrap();

        let snapshot = c.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.peers.is_empty());
        assert!(snapshot.timeline.is_empty());
        assert_eq!(snapshot.room_id, None);
        assert_eq!(snapshot.self_identity, None);
        assert_eq!(c.tracked_message_keys(), 0);
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), Some(fp("aaaa")));
        assert_eq!(c.transport().disconnects, 1);
    }

    #[test]
    fn test_connecting_again_tears_down_the_old_room() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = connected(&mut c, "me");
        c.handle(join(epoch, "bob", None));

        c.connect(request("room-2")).unwrap();
        assert_eq!(c.transport().disconnects, 1);
        assert!(c.roster().is_empty());
        assert_eq!(c.room_id(), Some("room-2"));
    }

    #[test]
    fn test_room_error_tears_down_with_credentials_notice() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = c.connect(request("room-1")).unwrap();

        let notices = c.handle(SessionEvent::new(
            epoch,
            TransportEvent::RoomError { message: "Invalid room password".into() },
        ));
        assert_eq!(
            notices,
            vec![Notice::InvalidCredentials { message: "Invalid room password".into() }]
        );
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_async_connection_failure_tears_down() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let epoch = connected(&mut c, "me");

        let notices = c.handle(SessionEvent::new(
            epoch,
            TransportEvent::ConnectionFailed { reason: "reset".into() },
        ));
        assert_eq!(notices, vec![Notice::ConnectionFailed { reason: "reset".into() }]);
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stored_pins_are_pushed_after_connecting() {
        let kv = murmur_store::shared(MemoryStore::new());
        kv.lock()
            .unwrap()
            .put(&murmur_store::fingerprints::pin_key(&id("carol")), "cccc")
            .unwrap();

        let mut c = SessionController::new(MockTransport::default(), context_with(kv, manual_clock()));
        connected(&mut c, "me");

        assert_eq!(c.transport().pins, vec![(id("carol"), fp("cccc"))]);
    }

    #[test]
    fn test_storage_failure_is_reported_once_and_rearms() {
        let flaky = FlakyStore::default();
        let failing = flaky.failing.clone();
        let kv = murmur_store::shared(flaky);
        let mut c = SessionController::new(
            MockTransport::default(),
            context_with(kv.clone(), manual_clock()),
        );
        let epoch = connected(&mut c, "me");

        failing.store(true, Ordering::SeqCst);
        let first = c.handle(join(epoch, "bob", Some("aaaa")));
        assert_eq!(first, vec![Notice::StorageDegraded { pending: 1 }]);
        // The pin holds in memory for this process.
        assert_eq!(c.known_fingerprint(&id("bob")).unwrap(), Some(fp("aaaa")));

        assert!(c.handle(join(epoch, "carol", Some("cccc"))).is_empty());
        assert_eq!(c.retry_pending_pins(), None);

        failing.store(false, Ordering::SeqCst);
        assert_eq!(c.retry_pending_pins(), None);
        let stored = kv
            .lock()
            .unwrap()
            .get(&murmur_store::fingerprints::pin_key(&id("carol")))
            .unwrap();
        assert_eq!(stored.as_deref(), Some("cccc"));

        failing.store(true, Ordering::SeqCst);
        let again = c.handle(join(epoch, "dave", Some("dddd")));
        assert_eq!(again, vec![Notice::StorageDegraded { pending: 1 }]);
    }

    #[test]
    fn test_create_room_connects_to_generated_id() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));

        let (room, epoch) = c.create_room("localhost:8080", "Me", "secret").unwrap();

        assert_eq!(room, c.transport().generate_room_identifier());
        assert_eq!(c.room_id(), Some(room.as_str()));
        assert_eq!(c.state(), ConnectionState::Connecting);

        let (recorded_epoch, sent) = &c.transport().connects[0];
        assert_eq!(*recorded_epoch, epoch);
        assert_eq!(sent.room_id, room);
        assert_eq!(sent.display_name, "Me");
        assert_eq!(sent.password, "secret");
    }

    #[test]
    fn test_create_room_failure_leaves_no_room() {
        let transport = MockTransport {
            fail_connect: Some(TransportError::AuthenticationFailed),
            ..Default::default()
        };
        let mut c = SessionController::new(transport, context(manual_clock()));

        assert!(c.create_room("localhost:8080", "Me", "wrong").is_err());
        assert_eq!(c.room_id(), None);
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_snapshot_version_tracks_changes() {
        let mut c = SessionController::new(MockTransport::default(), context(manual_clock()));
        let before = c.snapshot().version;
        let epoch = connected(&mut c, "me");
        let mid = c.snapshot().version;
        assert!(mid > before);

        c.handle(join(epoch, "bob", None));
        assert!(c.snapshot().version > mid);

        let stable = c.snapshot().version;
        c.handle(join(epoch, "bob", None));
        assert_eq!(c.snapshot().version, stable);
    }

    #[test]
    fn test_fingerprint_queries_need_a_session() {
        let transport = MockTransport {
            own: Some(fp("0123")),
            ..Default::default()
        };
        let mut c = SessionController::new(transport, context(manual_clock()));
        assert_eq!(c.own_fingerprint(), None);

        connected(&mut c, "me");
        assert_eq!(c.own_fingerprint(), Some(fp("0123")));
    }

    #[test]
    fn test_language_setting_round_trips() {
        let kv = murmur_store::shared(MemoryStore::new());
        let clock = manual_clock();
        let mut c =
            SessionController::new(MockTransport::default(), context_with(kv.clone(), clock.clone()));
        assert_eq!(c.language(), Language::En);

        c.set_language(Language::Ru).unwrap();
        let reopened = SessionController::new(MockTransport::default(), context_with(kv, clock));
        assert_eq!(reopened.language(), Language::Ru);
    }
}
