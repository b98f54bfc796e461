//! Protocol-wide constants.

use std::time::Duration;

/// Height of the genesis block.
pub const GENESIS_HEIGHT: u32 = 1;

/// Number of trailing full blocks a light node verifies after a chain proof.
///
/// Also the height gap below which a peer is caught up block by block
/// instead of through a chain proof.
pub const NUM_BLOCKS_VERIFICATION: u32 = 250;

/// Target block interval.
pub const BLOCK_TIME: Duration = Duration::from_secs(60);

/// Maximum drift of a block timestamp into the future.
pub const TIMESTAMP_DRIFT_MAX: Duration = Duration::from_secs(600);

/// Highest interlink level tracked.
pub const INTERLINK_LEVEL_MAX: u32 = 32;
