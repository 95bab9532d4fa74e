//! Authoritative set of peers present in the room.
//!
//! Until the backend assigns our own identity the roster is in its initial
//! load: joins and leaves update the set silently, because the backend
//! replays the existing membership as a burst of joins. After that, changes
//! are announced so the session can narrate them on the timeline.

use std::collections::HashMap;

use tracing::debug;

use murmur_shared::{MessageKind, Peer, PeerIdentity};

/// Result of applying a join or leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterDelta {
    Unchanged,
    Joined { peer: Peer, announce: bool },
    Left { peer: Peer, announce: bool },
}

impl RosterDelta {
    /// The system message this change should produce, if any.
    pub fn announcement(&self) -> Option<(MessageKind, &Peer)> {
        match self {
            RosterDelta::Joined {
                peer,
                announce: true,
            } => Some((MessageKind::SystemJoin, peer)),
            RosterDelta::Left {
                peer,
                announce: true,
            } => Some((MessageKind::SystemLeft, peer)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct RosterEntry {
    peer: Peer,
    order: u64,
}

/// Peers present in the current room, excluding ourselves.
#[derive(Debug, Default)]
pub struct RosterManager {
    peers: HashMap<PeerIdentity, RosterEntry>,
    next_order: u64,
    self_identity: Option<PeerIdentity>,
    loaded: bool,
}

impl RosterManager {
    /// Empty roster in its initial-load phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Joins for ourselves or a present peer are no-ops.
    pub fn on_peer_join(&mut self, identity: &PeerIdentity, display_name: &str) -> RosterDelta {
        if self.is_self(identity) {
            debug!(identity = %identity, "Ignoring join for own identity");
            return RosterDelta::Unchanged;
        }
        if self.peers.contains_key(identity) {
            debug!(identity = %identity, "Peer already present");
            return RosterDelta::Unchanged;
        }

        let peer = Peer {
            identity: identity.clone(),
            display_name: display_name.to_string(),
        };
        self.peers.insert(
            identity.clone(),
            RosterEntry {
                peer: peer.clone(),
                order: self.next_order,
            },
        );
        self.next_order += 1;

        debug!(identity = %identity, name = %display_name, loaded = self.loaded, "Peer joined");

        RosterDelta::Joined {
            peer,
            announce: self.loaded,
        }
    }

    /// Remove a peer, keeping its last display name in the delta.
    pub fn on_peer_leave(&mut self, identity: &PeerIdentity) -> RosterDelta {
        let Some(entry) = self.peers.remove(identity) else {
            debug!(identity = %identity, "Leave for unknown peer");
            return RosterDelta::Unchanged;
        };

        debug!(identity = %identity, loaded = self.loaded, "Peer left");

        RosterDelta::Left {
            announce: self.loaded && !self.is_self(identity),
            peer: entry.peer,
        }
    }

    /// End the initial load. Records our own identity and drops it from the
    /// set if the snapshot burst listed it.
    pub fn mark_loaded(&mut self, self_identity: PeerIdentity) -> Option<Peer> {
        let evicted = self.peers.remove(&self_identity).map(|entry| entry.peer);
        self.self_identity = Some(self_identity);
        self.loaded = true;
        evicted
    }

    /// True once our own identity has been assigned.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Our own identity, once assigned.
    pub fn self_identity(&self) -> Option<&PeerIdentity> {
        self.self_identity.as_ref()
    }

    /// Whether `identity` is ours.
    pub fn is_self(&self, identity: &PeerIdentity) -> bool {
        self.self_identity.as_ref() == Some(identity)
    }

    /// Whether `identity` is currently present.
    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.peers.contains_key(identity)
    }

    /// The present peer with `identity`.
    pub fn get(&self, identity: &PeerIdentity) -> Option<&Peer> {
        self.peers.get(identity).map(|entry| &entry.peer)
    }

    /// Peers in the order they joined.
    pub fn peers(&self) -> Vec<Peer> {
        let mut entries: Vec<&RosterEntry> = self.peers.values().collect();
        entries.sort_by_key(|entry| entry.order);
        entries.into_iter().map(|entry| entry.peer.clone()).collect()
    }

    /// Number of peers, not counting ourselves.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no other peer is present.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget everything, including the loaded flag and own identity.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
