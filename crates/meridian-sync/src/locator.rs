//! Block locator construction.
//!
//! A locator lists our chain from the head backwards: the top ten hashes one
//! by one, then at exponentially growing distances, always ending with the
//! genesis hash. The peer answers from the first locator it has on its
//! main chain.

use crate::chain::Blockchain;
use meridian_chain::Hash;
use meridian_network::LOCATORS_MAX_COUNT;

/// Number of most recent blocks listed without gaps.
const DENSE_LOCATORS: u32 = 10;

/// Build locators for a chain of height `head_height`.
///
/// `hash_at` resolves main chain heights; heights it cannot resolve are
/// skipped.
pub fn block_locators<F>(head_height: u32, hash_at: F, genesis_hash: Hash) -> Vec<Hash>
where
    F: Fn(u32) -> Option<Hash>,
{
    let mut locators = Vec::new();

    let dense_floor = head_height.saturating_sub(DENSE_LOCATORS);
    let mut height = head_height;
    while height > dense_floor && height > 0 {
        if let Some(hash) = hash_at(height) {
            locators.push(hash);
        }
        height -= 1;
    }

    let mut step = 2u32;
    let mut height = i64::from(head_height) - i64::from(DENSE_LOCATORS) - i64::from(step);
    while height > 0 && locators.len() < LOCATORS_MAX_COUNT {
        if let Some(hash) = u32::try_from(height).ok().and_then(&hash_at) {
            locators.push(hash);
        }
        step = step.saturating_mul(2);
        height -= i64::from(step);
    }

    if locators.last() != Some(&genesis_hash) {
        if locators.len() >= LOCATORS_MAX_COUNT {
            locators.pop();
        }
        locators.push(genesis_hash);
    }
    locators
}

/// Locators for the live chain.
pub fn chain_locators(chain: &dyn Blockchain) -> Vec<Hash> {
    block_locators(
        chain.height(),
        |height| chain.get_block_at(height, false).map(|b| b.hash()),
        chain.genesis_hash(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(height: u32) -> Hash {
        Hash::digest(&height.to_be_bytes())
    }

    #[test]
    fn test_short_chain_lists_everything() {
        let locators = block_locators(4, |h| Some(hash(h)), hash(1));
        assert_eq!(locators, vec![hash(4), hash(3), hash(2), hash(1)]);
    }

    #[test]
    fn test_long_chain_backs_off() {
        let locators = block_locators(100, |h| Some(hash(h)), hash(1));
        let expected_dense: Vec<Hash> = (91..=100).rev().map(hash).collect();
        assert_eq!(&locators[..10], &expected_dense[..]);
        // 88, 84, 76, 60, 28
        assert_eq!(
            &locators[10..],
            &[hash(88), hash(84), hash(76), hash(60), hash(28), hash(1)]
        );
    }

    #[test]
    fn test_genesis_not_duplicated() {
        let locators = block_locators(1, |h| Some(hash(h)), hash(1));
        assert_eq!(locators, vec![hash(1)]);
    }
}
