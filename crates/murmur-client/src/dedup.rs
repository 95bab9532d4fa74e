//! Duplicate suppression for incoming chat messages.
//!
//! Two filters must both pass. The proximity filter drops a message whose
//! sender and content match a held message received less than the duplicate
//! window earlier or later. The key filter drops an exact repeat of an
//! admitted `(sender, timestamp, sequence, content)` key. The key set is
//! bounded; the oldest keys are evicted first.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use murmur_shared::types::millis_apart;
use murmur_shared::{Message, MessageKind, PeerIdentity};

use crate::config::ReconcileLimits;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AdmissionKey {
    sender: PeerIdentity,
    timestamp_ms: i64,
    sequence: u64,
    content: String,
}

/// Admission filter for one room session.
#[derive(Debug)]
pub struct MessageDeduplicator {
    admitted: HashSet<AdmissionKey>,
    order: VecDeque<AdmissionKey>,
    window_ms: i64,
    capacity: usize,
}

impl MessageDeduplicator {
    /// Empty filter using the window and capacity from `limits`.
    pub fn new(limits: &ReconcileLimits) -> Self {
        Self {
            admitted: HashSet::new(),
            order: VecDeque::new(),
            window_ms: limits.duplicate_window_ms,
            capacity: limits.max_tracked_messages.max(1),
        }
    }

    /// Decide whether a message is new. `held` is the current timeline;
    /// `sequence` is the local counter value assigned to this delivery.
    pub fn admit(
        &mut self,
        held: &[Message],
        sender: &PeerIdentity,
        content: &str,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> bool {
        if self.is_redelivery(held, sender, content, timestamp) {
            debug!(sender = %sender, "Dropping redelivered message");
            return false;
        }

        let key = AdmissionKey {
            sender: sender.clone(),
            timestamp_ms: timestamp.timestamp_millis(),
            sequence,
            content: content.to_string(),
        };
        if self.admitted.contains(&key) {
            debug!(sender = %sender, sequence, "Dropping already admitted message");
            return false;
        }

        self.remember(key);
        true
    }

    /// Proximity filter alone.
    pub fn is_redelivery(
        &self,
        held: &[Message],
        sender: &PeerIdentity,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> bool {
        held.iter().any(|m| {
            m.kind == MessageKind::User
                && &m.sender == sender
                && m.content == content
                && millis_apart(m.timestamp, timestamp) < self.window_ms
        })
    }

    fn remember(&mut self, key: AdmissionKey) {
        self.order.push_back(key.clone());
        self.admitted.insert(key);

        while self.admitted.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.admitted.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Number of tracked admission keys.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    /// True when no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Forget every admitted key.
    pub fn clear(&mut self) {
        self.admitted.clear();
        self.order.clear();
    }
}
