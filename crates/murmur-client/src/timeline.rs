//! Append-only display sequence of user and system messages.
//!
//! Entries stay in arrival order. Receipt timestamps are local to this
//! client, so sorting by them would not yield a truer order.

use std::collections::HashSet;

use tracing::debug;

use murmur_shared::types::millis_apart;
use murmur_shared::{Message, MessageId};

use crate::config::ReconcileLimits;

/// Ordered, id-unique message list of one room session.
#[derive(Debug)]
pub struct TimelineBuilder {
    entries: Vec<Message>,
    ids: HashSet<MessageId>,
    system_window_ms: i64,
}

impl TimelineBuilder {
    /// Empty timeline using the system-event window from `limits`.
    pub fn new(limits: &ReconcileLimits) -> Self {
        Self {
            entries: Vec::new(),
            ids: HashSet::new(),
            system_window_ms: limits.system_event_window_ms,
        }
    }

    /// Append `message` and return the whole sequence.
    pub fn append(&mut self, message: Message) -> &[Message] {
        self.push(message);
        &self.entries
    }

    /// Append unless an entry with the same id exists. Returns whether the
    /// timeline grew.
    pub fn push(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            debug!(id = %message.id, "Timeline already holds message");
            return false;
        }
        self.entries.push(message);
        true
    }

    /// Append a join/leave entry unless the same transition for the same
    /// peer was narrated within the system-event window.
    pub fn announce(&mut self, message: Message) -> bool {
        let repeated = self.entries.iter().rev().any(|m| {
            m.kind == message.kind
                && m.sender == message.sender
                && millis_apart(m.timestamp, message.timestamp) < self.system_window_ms
        });
        if repeated {
            debug!(peer = %message.sender, kind = ?message.kind, "Suppressing repeated announcement");
            return false;
        }
        self.push(message)
    }

    /// Entries in arrival order.
    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }
}
