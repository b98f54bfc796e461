//! Per-peer inventory bookkeeping.
//!
//! Tracks what the remote peer is assumed to know and where every object of
//! interest sits in its request lifecycle:
//!
//! ```text
//! to_request ──start_request──> in_flight ──receive──> processing ──finish──> (gone)
//!                                   │                       ▲
//!                                   └──expire──> that_flew ─┘ (late delivery)
//! ```

use indexmap::IndexSet;
use meridian_network::InvVector;
use std::collections::HashSet;

/// Where an arriving object stood in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Never requested, or already received.
    Unsolicited,
    /// Arrived after its request window closed.
    Late,
    /// Accepted; more requested objects are outstanding.
    MoreExpected,
    /// Accepted; nothing else is in flight.
    Drained,
}

impl ReceiveOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Unsolicited)
    }
}

/// Known objects and request queues for one peer.
#[derive(Debug, Default)]
pub struct InventoryIndex {
    known: HashSet<InvVector>,
    to_request: IndexSet<InvVector>,
    in_flight: HashSet<InvVector>,
    that_flew: HashSet<InvVector>,
    processing: HashSet<InvVector>,
}

impl InventoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the peer holds `vector`.
    pub fn note_known(&mut self, vector: InvVector) -> bool {
        self.known.insert(vector)
    }

    pub fn knows(&self, vector: &InvVector) -> bool {
        self.known.contains(vector)
    }

    /// Queued, in flight or processing.
    pub fn is_pending(&self, vector: &InvVector) -> bool {
        self.to_request.contains(vector)
            || self.in_flight.contains(vector)
            || self.processing.contains(vector)
    }

    /// Queue `vector` for the next fetch; returns false if it is already pending.
    pub fn queue(&mut self, vector: InvVector) -> bool {
        if self.in_flight.contains(&vector) || self.processing.contains(&vector) {
            return false;
        }
        self.that_flew.remove(&vector);
        self.to_request.insert(vector)
    }

    /// Move up to `max` queued vectors in flight.
    ///
    /// Returns `None` while a previous fetch is still outstanding or when
    /// nothing is queued.
    pub fn start_request(&mut self, max: usize) -> Option<Vec<InvVector>> {
        if !self.in_flight.is_empty() || self.to_request.is_empty() {
            return None;
        }
        let count = max.min(self.to_request.len());
        let batch: Vec<InvVector> = self.to_request.drain(..count).collect();
        self.in_flight.extend(batch.iter().copied());
        Some(batch)
    }

    /// Accept an arriving object into `processing`.
    pub fn receive(&mut self, vector: &InvVector) -> ReceiveOutcome {
        if self.in_flight.remove(vector) {
            self.processing.insert(*vector);
            if self.in_flight.is_empty() {
                ReceiveOutcome::Drained
            } else {
                ReceiveOutcome::MoreExpected
            }
        } else if self.that_flew.remove(vector) {
            self.processing.insert(*vector);
            ReceiveOutcome::Late
        } else {
            ReceiveOutcome::Unsolicited
        }
    }

    /// Release an in-flight vector the peer reported as not found.
    pub fn release(&mut self, vector: &InvVector) -> bool {
        self.in_flight.remove(vector)
    }

    pub fn was_requested(&self, vector: &InvVector) -> bool {
        self.in_flight.contains(vector) || self.that_flew.contains(vector)
    }

    /// Close the request window: everything in flight becomes late.
    pub fn expire_in_flight(&mut self) -> usize {
        let count = self.in_flight.len();
        self.that_flew.extend(self.in_flight.drain());
        count
    }

    /// Processing finished; returns true if this drained `processing`.
    pub fn finish_processing(&mut self, vector: &InvVector) -> bool {
        self.processing.remove(vector) && self.processing.is_empty()
    }

    pub fn is_processing(&self, vector: &InvVector) -> bool {
        self.processing.contains(vector)
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn to_request_count(&self) -> usize {
        self.to_request.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn that_flew_count(&self) -> usize {
        self.that_flew.len()
    }

    pub fn processing_count(&self) -> usize {
        self.processing.len()
    }

    /// Nothing queued, in flight or processing.
    pub fn is_idle(&self) -> bool {
        self.to_request.is_empty() && self.in_flight.is_empty() && self.processing.is_empty()
    }

    /// Drop all state on teardown.
    pub fn clear(&mut self) {
        self.known.clear();
        self.to_request.clear();
        self.in_flight.clear();
        self.that_flew.clear();
        self.processing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_chain::Hash;

    fn block(n: u8) -> InvVector {
        InvVector::block(Hash::digest(&[n]))
    }

    #[test]
    fn test_request_lifecycle() {
        let mut index = InventoryIndex::new();
        assert!(index.queue(block(1)));
        assert!(index.queue(block(2)));
        assert!(!index.queue(block(1)));

        let batch = index.start_request(10).unwrap();
        assert_eq!(batch, vec![block(1), block(2)]);
        assert!(index.start_request(10).is_none());
        assert!(!index.queue(block(1)));

        assert_eq!(index.receive(&block(1)), ReceiveOutcome::MoreExpected);
        assert_eq!(index.receive(&block(1)), ReceiveOutcome::Unsolicited);
        assert_eq!(index.receive(&block(2)), ReceiveOutcome::Drained);

        assert!(!index.finish_processing(&block(1)));
        assert!(index.finish_processing(&block(2)));
        assert!(index.is_idle());
    }

    #[test]
    fn test_batch_respects_max_and_order() {
        let mut index = InventoryIndex::new();
        for n in 0..5 {
            index.queue(block(n));
        }
        assert_eq!(index.start_request(3).unwrap(), vec![block(0), block(1), block(2)]);
        assert_eq!(index.to_request_count(), 2);
    }

    #[test]
    fn test_expired_vectors_accepted_late() {
        let mut index = InventoryIndex::new();
        index.queue(block(1));
        index.queue(block(2));
        index.start_request(10);

        assert_eq!(index.expire_in_flight(), 2);
        assert_eq!(index.in_flight_count(), 0);
        assert_eq!(index.that_flew_count(), 2);
        assert!(index.was_requested(&block(1)));

        assert_eq!(index.receive(&block(1)), ReceiveOutcome::Late);
        assert!(index.is_processing(&block(1)));
        assert_eq!(index.that_flew_count(), 1);
    }

    #[test]
    fn test_requeue_clears_that_flew() {
        let mut index = InventoryIndex::new();
        index.queue(block(1));
        index.start_request(10);
        index.expire_in_flight();
        assert!(index.queue(block(1)));
        assert!(!index.was_requested(&block(1)));
    }
}
