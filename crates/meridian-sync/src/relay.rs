//! Outbound inventory batching.

use indexmap::{IndexMap, IndexSet};
use meridian_network::InvVector;

/// Queues of transaction announcements waiting for their relay timer.
///
/// Transactions paying the minimum relay fee go to the regular queue. Free
/// transactions go to a separate queue flushed against a byte budget, so a
/// flood of them cannot delay paying ones.
#[derive(Debug, Default)]
pub struct RelayScheduler {
    waiting: IndexSet<InvVector>,
    waiting_free: IndexMap<InvVector, usize>,
}

impl RelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transaction announcement.
    pub fn enqueue_transaction(&mut self, vector: InvVector, size: usize, free: bool) {
        if free {
            self.waiting_free.entry(vector).or_insert(size);
        } else {
            self.waiting.insert(vector);
        }
    }

    /// Drop a queued announcement; returns whether it was queued.
    pub fn remove(&mut self, vector: &InvVector) -> bool {
        let regular = self.waiting.shift_remove(vector);
        let free = self.waiting_free.shift_remove(vector).is_some();
        regular || free
    }

    /// Block announcement batch: the block first, then pending regular
    /// transactions up to `max` vectors in total.
    pub fn announce_block(&mut self, block: InvVector, max: usize) -> Vec<InvVector> {
        let mut vectors = vec![block];
        vectors.extend(self.take_transactions(max.saturating_sub(1)));
        vectors
    }

    /// Oldest regular transactions, at most `max`.
    pub fn take_transactions(&mut self, max: usize) -> Vec<InvVector> {
        let count = max.min(self.waiting.len());
        self.waiting.drain(..count).collect()
    }

    /// Oldest free transactions until `budget` bytes are reached.
    ///
    /// The budget is soft: the transaction crossing it is still taken.
    /// Whatever does not fit stays queued for a later interval.
    pub fn take_free_transactions(&mut self, max: usize, budget: usize) -> Vec<InvVector> {
        let mut vectors = Vec::new();
        let mut size = 0usize;
        while size < budget && vectors.len() < max {
            match self.waiting_free.shift_remove_index(0) {
                Some((vector, tx_size)) => {
                    size = size.saturating_add(tx_size);
                    vectors.push(vector);
                }
                None => break,
            }
        }
        vectors
    }

    pub fn pending_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn pending_free_count(&self) -> usize {
        self.waiting_free.len()
    }

    pub fn clear(&mut self) {
        self.waiting.clear();
        self.waiting_free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_chain::Hash;

    fn tx(n: u8) -> InvVector {
        InvVector::transaction(Hash::digest(&[n]))
    }

    #[test]
    fn test_block_batch_carries_pending_transactions() {
        let mut relay = RelayScheduler::new();
        for n in 0..5 {
            relay.enqueue_transaction(tx(n), 100, false);
        }
        let block = InvVector::block(Hash::digest(b"block"));
        let batch = relay.announce_block(block, 3);
        assert_eq!(batch, vec![block, tx(0), tx(1)]);
        assert_eq!(relay.pending_count(), 3);
    }

    #[test]
    fn test_free_budget_is_soft() {
        let mut relay = RelayScheduler::new();
        relay.enqueue_transaction(tx(1), 600, true);
        relay.enqueue_transaction(tx(2), 600, true);
        relay.enqueue_transaction(tx(3), 600, true);

        assert_eq!(relay.take_free_transactions(100, 1000), vec![tx(1), tx(2)]);
        assert_eq!(relay.pending_free_count(), 1);
        assert_eq!(relay.take_free_transactions(100, 1000), vec![tx(3)]);
    }

    #[test]
    fn test_remove_from_either_queue() {
        let mut relay = RelayScheduler::new();
        relay.enqueue_transaction(tx(1), 100, false);
        relay.enqueue_transaction(tx(2), 100, true);
        assert!(relay.remove(&tx(1)));
        assert!(relay.remove(&tx(2)));
        assert!(!relay.remove(&tx(2)));
        assert_eq!(relay.pending_count() + relay.pending_free_count(), 0);
    }
}
