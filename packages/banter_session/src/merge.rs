//! Per-room message merge buffer.
//!
//! Reconciles a REST-fetched history page with live-pushed arrivals into one
//! ordered, deduplicated sequence. The invariant: messages are unique by id
//! and sorted by `(created_at, id)` ascending.

use std::collections::HashSet;

use crate::protocol::{ChatMessage, MessageId};

/// Ordered, deduplicated message sequence for one room.
#[derive(Debug)]
pub struct MergeBuffer {
    messages: Vec<ChatMessage>,
    /// Ids currently present, for O(1) duplicate checks.
    ids: HashSet<MessageId>,
    /// Ids that arrived via `insert_live`, retained across a re-seed.
    live_ids: HashSet<MessageId>,
    cap: Option<usize>,
}

impl MergeBuffer {
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            live_ids: HashSet::new(),
            cap,
        }
    }

    /// Seed with a REST-fetched history page, given newest-first by the
    /// collaborator API.
    ///
    /// Idempotent: the sequence is replaced, not appended. Live messages
    /// inserted before this call (the live frame can beat the REST page)
    /// are re-applied unless the new page already contains them.
    pub fn seed(&mut self, newest_first: Vec<ChatMessage>) {
        let previous = std::mem::take(&mut self.messages);
        self.ids.clear();

        self.messages = newest_first;
        self.messages.reverse();
        // The collaborator promises newest-first, but the invariant is ours
        // to hold regardless of what actually arrived.
        self.messages
            .sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        self.messages.retain(|m| self.ids.insert(m.id));

        let retained_live: Vec<ChatMessage> = previous
            .into_iter()
            .filter(|m| self.live_ids.contains(&m.id))
            .collect();
        self.live_ids.clear();
        for message in retained_live {
            self.insert_live(message);
        }
        self.enforce_cap();
    }

    /// Insert a live-pushed message, preserving the ordering invariant.
    ///
    /// Returns `false` (a no-op) if a message with this id is already
    /// present — duplicate delivery or a frame racing the history page.
    pub fn insert_live(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.live_ids.insert(message.id);
        let key = (message.created_at, message.id);
        let at = self
            .messages
            .partition_point(|m| (m.created_at, m.id) < key);
        self.messages.insert(at, message);
        self.enforce_cap();
        true
    }

    /// Delete by id; no-op if absent (deletes can arrive twice, or after the
    /// message already left the retained window).
    pub fn remove(&mut self, id: MessageId) -> bool {
        if !self.ids.remove(&id) {
            return false;
        }
        self.live_ids.remove(&id);
        self.messages.retain(|m| m.id != id);
        true
    }

    /// Update a message's reaction count in place; no-op if absent.
    pub fn update_reaction_count(&mut self, id: MessageId, count: u32) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.reaction_count = count;
                true
            }
            None => false,
        }
    }

    /// The merged sequence, chronological.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn enforce_cap(&mut self) {
        let Some(cap) = self.cap else { return };
        while self.messages.len() > cap {
            let evicted = self.messages.remove(0);
            self.ids.remove(&evicted.id);
            self.live_ids.remove(&evicted.id);
        }
    }
}
