//! Property-based tests using proptest.
//!
//! The inventory index is checked against a simple per-vector state model;
//! relay batching and locator construction against their ordering and
//! size bounds.

use meridian_chain::Hash;
use meridian_network::{InvVector, LOCATORS_MAX_COUNT};
use meridian_sync::{block_locators, InventoryIndex, ReceiveOutcome, RelayScheduler};
use proptest::prelude::*;
use std::collections::HashMap;

// ============================================================================
// Strategies
// ============================================================================

const UNIVERSE: u8 = 6;

fn vector(n: u8) -> InvVector {
    let hash = Hash::digest(&[n]);
    if n % 2 == 0 {
        InvVector::block(hash)
    } else {
        InvVector::transaction(hash)
    }
}

#[derive(Debug, Clone)]
enum Op {
    Queue(u8),
    Start(usize),
    Receive(u8),
    Expire,
    Finish(u8),
    Release(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..UNIVERSE).prop_map(Op::Queue),
        2 => (1usize..5).prop_map(Op::Start),
        3 => (0..UNIVERSE).prop_map(Op::Receive),
        1 => Just(Op::Expire),
        2 => (0..UNIVERSE).prop_map(Op::Finish),
        1 => (0..UNIVERSE).prop_map(Op::Release),
    ]
}

fn arb_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5_000, 0..30)
}

// ============================================================================
// Inventory model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    ToRequest,
    InFlight,
    Flew,
    Processing,
}

#[derive(Default)]
struct Model {
    slots: HashMap<InvVector, Slot>,
}

impl Model {
    fn count(&self, slot: Slot) -> usize {
        self.slots.values().filter(|s| **s == slot).count()
    }

    fn slot(&self, vector: &InvVector) -> Option<Slot> {
        self.slots.get(vector).copied()
    }
}

fn apply(index: &mut InventoryIndex, model: &mut Model, op: &Op) -> Result<(), TestCaseError> {
    match *op {
        Op::Queue(n) => {
            let v = vector(n);
            let expected = matches!(model.slot(&v), None | Some(Slot::Flew));
            prop_assert_eq!(index.queue(v), expected);
            if expected {
                model.slots.insert(v, Slot::ToRequest);
            }
        }
        Op::Start(max) => {
            let waiting = model.count(Slot::ToRequest);
            let batch = index.start_request(max);
            if model.count(Slot::InFlight) > 0 || waiting == 0 {
                prop_assert!(batch.is_none());
            } else {
                let batch = batch.ok_or_else(|| TestCaseError::fail("expected a batch"))?;
                prop_assert_eq!(batch.len(), max.min(waiting));
                for v in batch {
                    prop_assert_eq!(model.slot(&v), Some(Slot::ToRequest));
                    model.slots.insert(v, Slot::InFlight);
                }
            }
        }
        Op::Receive(n) => {
            let v = vector(n);
            let outcome = index.receive(&v);
            match model.slot(&v) {
                Some(Slot::InFlight) => {
                    model.slots.insert(v, Slot::Processing);
                    let expected = if model.count(Slot::InFlight) == 0 {
                        ReceiveOutcome::Drained
                    } else {
                        ReceiveOutcome::MoreExpected
                    };
                    prop_assert_eq!(outcome, expected);
                }
                Some(Slot::Flew) => {
                    model.slots.insert(v, Slot::Processing);
                    prop_assert_eq!(outcome, ReceiveOutcome::Late);
                }
                _ => {
                    prop_assert_eq!(outcome, ReceiveOutcome::Unsolicited);
                }
            }
        }
        Op::Expire => {
            let in_flight = model.count(Slot::InFlight);
            prop_assert_eq!(index.expire_in_flight(), in_flight);
            for slot in model.slots.values_mut() {
                if *slot == Slot::InFlight {
                    *slot = Slot::Flew;
                }
            }
        }
        Op::Finish(n) => {
            let v = vector(n);
            let was_processing = model.slot(&v) == Some(Slot::Processing);
            if was_processing {
                model.slots.remove(&v);
            }
            let expected = was_processing && model.count(Slot::Processing) == 0;
            prop_assert_eq!(index.finish_processing(&v), expected);
        }
        Op::Release(n) => {
            let v = vector(n);
            let was_in_flight = model.slot(&v) == Some(Slot::InFlight);
            if was_in_flight {
                model.slots.remove(&v);
            }
            prop_assert_eq!(index.release(&v), was_in_flight);
        }
    }
    Ok(())
}

proptest! {
    /// Every vector sits in at most one of the request sets, whatever the
    /// order of operations.
    #[test]
    fn inventory_matches_model(ops in prop::collection::vec(arb_op(), 1..80)) {
        let mut index = InventoryIndex::new();
        let mut model = Model::default();

        for op in &ops {
            apply(&mut index, &mut model, op)?;

            prop_assert_eq!(index.to_request_count(), model.count(Slot::ToRequest));
            prop_assert_eq!(index.in_flight_count(), model.count(Slot::InFlight));
            prop_assert_eq!(index.that_flew_count(), model.count(Slot::Flew));
            prop_assert_eq!(index.processing_count(), model.count(Slot::Processing));
            let idle = model.slots.values().all(|s| *s == Slot::Flew);
            prop_assert_eq!(index.is_idle(), idle);
        }
    }

    /// Membership queries agree with the model for every vector.
    #[test]
    fn inventory_queries_agree(ops in prop::collection::vec(arb_op(), 1..60)) {
        let mut index = InventoryIndex::new();
        let mut model = Model::default();
        for op in &ops {
            apply(&mut index, &mut model, op)?;
        }

        for n in 0..UNIVERSE {
            let v = vector(n);
            let slot = model.slot(&v);
            prop_assert_eq!(
                index.is_pending(&v),
                matches!(slot, Some(Slot::ToRequest | Slot::InFlight | Slot::Processing))
            );
            prop_assert_eq!(
                index.was_requested(&v),
                matches!(slot, Some(Slot::InFlight | Slot::Flew))
            );
            prop_assert_eq!(index.is_processing(&v), slot == Some(Slot::Processing));
        }
    }
}

// ============================================================================
// Relay Property Tests
// ============================================================================

proptest! {
    /// Free transactions leave in arrival order and stop once the byte
    /// budget is reached; only the last one may overshoot it.
    #[test]
    fn free_relay_respects_soft_budget(
        sizes in arb_sizes(),
        budget in 1usize..20_000,
        max in 1usize..40,
    ) {
        let mut relay = RelayScheduler::new();
        let vectors: Vec<InvVector> = (0..sizes.len())
            .map(|i| InvVector::transaction(Hash::digest(&(i as u32).to_be_bytes())))
            .collect();
        for (v, size) in vectors.iter().zip(&sizes) {
            relay.enqueue_transaction(*v, *size, true);
        }

        let taken = relay.take_free_transactions(max, budget);

        prop_assert!(taken.len() <= max);
        prop_assert_eq!(&taken[..], &vectors[..taken.len()]);
        prop_assert_eq!(relay.pending_free_count(), vectors.len() - taken.len());

        let total: usize = sizes[..taken.len()].iter().sum();
        if let Some(last) = taken.len().checked_sub(1) {
            prop_assert!(total - sizes[last] < budget);
        }
        if taken.len() < max && taken.len() < vectors.len() {
            prop_assert!(total >= budget);
        }
    }

    /// Paying transactions are taken in order, up to the cap.
    #[test]
    fn paying_relay_preserves_order(count in 0usize..30, max in 0usize..40) {
        let mut relay = RelayScheduler::new();
        let vectors: Vec<InvVector> = (0..count)
            .map(|i| InvVector::transaction(Hash::digest(&(i as u32).to_be_bytes())))
            .collect();
        for v in &vectors {
            relay.enqueue_transaction(*v, 250, false);
        }

        let taken = relay.take_transactions(max);

        prop_assert_eq!(taken.len(), max.min(count));
        prop_assert_eq!(&taken[..], &vectors[..taken.len()]);
        prop_assert_eq!(relay.pending_count(), count - taken.len());
    }
}

// ============================================================================
// Locator Property Tests
// ============================================================================

fn height_hash(height: u32) -> Hash {
    Hash::digest(&height.to_be_bytes())
}

proptest! {
    /// Locators run from the head down to genesis, strictly descending and
    /// within the message limit.
    #[test]
    fn locators_descend_from_head_to_genesis(head in 0u32..20_000) {
        let locators = block_locators(head, |h| Some(height_hash(h)), height_hash(0));

        prop_assert!(!locators.is_empty());
        prop_assert!(locators.len() <= LOCATORS_MAX_COUNT);
        prop_assert_eq!(locators[0], height_hash(head));
        prop_assert_eq!(*locators.last().unwrap(), height_hash(0));

        let heights: HashMap<Hash, u32> = (0..=head).map(|h| (height_hash(h), h)).collect();
        let resolved: Vec<u32> = locators.iter().map(|hash| heights[hash]).collect();
        prop_assert!(resolved.windows(2).all(|w| w[0] > w[1]));

        let dense = head.min(10) as usize;
        for (i, height) in resolved.iter().take(dense).enumerate() {
            prop_assert_eq!(*height, head - i as u32);
        }
    }
}
