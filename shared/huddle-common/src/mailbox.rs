//! Per-recipient signal mailbox.

use std::collections::{HashMap, VecDeque};

use tracing::warn;
use uuid::Uuid;

use crate::protocol::SignalEnvelope;

/// Default number of undelivered envelopes kept per recipient.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// FIFO mailboxes keyed by recipient. Oldest envelopes are dropped once a
/// recipient's box is full.
#[derive(Debug, Clone)]
pub struct SignalMailbox {
    capacity: usize,
    boxes: HashMap<Uuid, VecDeque<SignalEnvelope>>,
}

impl Default for SignalMailbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl SignalMailbox {
    /// Create mailboxes holding at most `capacity` envelopes per recipient.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            boxes: HashMap::new(),
        }
    }

    /// Queue an envelope for its recipient.
    pub fn push(&mut self, envelope: SignalEnvelope) {
        let queue = self.boxes.entry(envelope.to).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
            warn!(to = %envelope.to, "Signal mailbox full, dropped oldest envelope");
        }
        queue.push_back(envelope);
    }

    /// Take every queued envelope for `user_id`, oldest first.
    pub fn drain(&mut self, user_id: Uuid) -> Vec<SignalEnvelope> {
        self.boxes
            .remove(&user_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Number of envelopes waiting for `user_id`.
    #[must_use]
    pub fn pending(&self, user_id: Uuid) -> usize {
        self.boxes.get(&user_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalPayload;

    fn candidate(to: Uuid, n: usize) -> SignalEnvelope {
        SignalEnvelope {
            from: Uuid::nil(),
            to,
            room_id: Uuid::nil(),
            payload: SignalPayload::Candidate {
                candidate: n.to_string(),
            },
        }
    }

    #[test]
    fn test_drain_is_fifo_and_empties() {
        let mut mailbox = SignalMailbox::default();
        let to = Uuid::new_v4();
        mailbox.push(candidate(to, 1));
        mailbox.push(candidate(to, 2));

        let drained = mailbox.drain(to);
        assert_eq!(drained, vec![candidate(to, 1), candidate(to, 2)]);
        assert_eq!(mailbox.pending(to), 0);
        assert!(mailbox.drain(to).is_empty());
    }

    #[test]
    fn test_full_mailbox_drops_oldest() {
        let mut mailbox = SignalMailbox::with_capacity(2);
        let to = Uuid::new_v4();
        for n in 0..3 {
            mailbox.push(candidate(to, n));
        }
        assert_eq!(mailbox.drain(to), vec![candidate(to, 1), candidate(to, 2)]);
    }

    #[test]
    fn test_mailboxes_are_per_recipient() {
        let mut mailbox = SignalMailbox::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        mailbox.push(candidate(a, 1));

        assert!(mailbox.drain(b).is_empty());
        assert_eq!(mailbox.pending(a), 1);
    }
}
