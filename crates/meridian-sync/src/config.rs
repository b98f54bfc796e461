//! Sync configuration.

use crate::{SyncError, SyncResult, GET_BLOCKS_VECTORS_MAX, REQUEST_THRESHOLD};
use meridian_chain::policy::NUM_BLOCKS_VERIFICATION;
use meridian_network::{Subscription, VECTORS_MAX_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of a peer session.
///
/// Durations are stored in milliseconds so the TOML form stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Queued unknown objects that trigger an immediate get-data.
    pub request_threshold: usize,
    /// Delay before requesting a small batch of unknown objects.
    pub request_throttle_ms: u64,
    /// Get-data and get-blocks response window.
    pub request_timeout_ms: u64,
    /// Flush interval for transactions paying the relay fee.
    pub transaction_relay_interval_ms: u64,
    /// Flush interval for free transactions.
    pub free_transaction_relay_interval_ms: u64,
    /// Soft byte budget of free transactions per flush.
    pub free_transaction_size_per_interval: usize,
    /// Minimum fee per byte for a transaction not to count as free.
    pub transaction_relay_fee_min: u64,
    /// Maximum inventory vectors per message.
    pub vectors_max_count: usize,
    /// Maximum inventory vectors returned for a get-blocks request.
    pub get_blocks_vectors_max: u32,
    /// Served get-blocks requests per minute.
    pub get_blocks_rate_limit: usize,
    /// Maximum receipts returned for a receipts request.
    pub transaction_receipts_max: u16,
    /// Tolerance for objects outside a freshly changed local subscription.
    pub subscription_change_grace_period_ms: u64,
    /// Failure count at which the peer is banned.
    pub max_sync_attempts: u32,
    /// Failure count added by a cryptographically invalid proof.
    pub invalid_proof_failure_weight: u32,
    /// Height gap up to which a peer is caught up block by block.
    pub verification_window: u32,
    pub header_request_timeout_ms: u64,
    pub chain_proof_request_timeout_ms: u64,
    pub accounts_tree_chunk_request_timeout_ms: u64,
    pub accounts_proof_request_timeout_ms: u64,
    pub block_proof_request_timeout_ms: u64,
    pub transactions_proof_request_timeout_ms: u64,
    pub transaction_receipts_request_timeout_ms: u64,
    /// Poll interval while the chain reports itself busy.
    pub sync_retry_interval_ms: u64,
    /// Subscription announced to the peer at session start.
    pub local_subscription: Subscription,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_threshold: REQUEST_THRESHOLD,
            request_throttle_ms: 500,
            request_timeout_ms: 10_000,
            transaction_relay_interval_ms: 5_000,
            free_transaction_relay_interval_ms: 6_000,
            free_transaction_size_per_interval: 15_000,
            transaction_relay_fee_min: 1,
            vectors_max_count: VECTORS_MAX_COUNT,
            get_blocks_vectors_max: GET_BLOCKS_VECTORS_MAX,
            get_blocks_rate_limit: 30,
            transaction_receipts_max: 500,
            subscription_change_grace_period_ms: 2_000,
            max_sync_attempts: 5,
            invalid_proof_failure_weight: 2,
            verification_window: NUM_BLOCKS_VERIFICATION,
            header_request_timeout_ms: 10_000,
            chain_proof_request_timeout_ms: 45_000,
            accounts_tree_chunk_request_timeout_ms: 8_000,
            accounts_proof_request_timeout_ms: 5_000,
            block_proof_request_timeout_ms: 10_000,
            transactions_proof_request_timeout_ms: 10_000,
            transaction_receipts_request_timeout_ms: 15_000,
            sync_retry_interval_ms: 1_000,
            local_subscription: Subscription::Any,
        }
    }
}

impl SyncConfig {
    /// Parse from TOML; missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> SyncResult<Self> {
        let config: SyncConfig =
            toml::from_str(input).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject values the session cannot work with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.vectors_max_count == 0 || self.vectors_max_count > VECTORS_MAX_COUNT {
            return Err(SyncError::Config(format!(
                "vectors_max_count must be in 1..={}",
                VECTORS_MAX_COUNT
            )));
        }
        if self.get_blocks_vectors_max == 0 || self.get_blocks_vectors_max > u32::from(u16::MAX) {
            return Err(SyncError::Config(
                "get_blocks_vectors_max must fit a non-zero u16".into(),
            ));
        }
        if self.max_sync_attempts == 0 {
            return Err(SyncError::Config("max_sync_attempts must be positive".into()));
        }
        if self.request_threshold == 0 {
            return Err(SyncError::Config("request_threshold must be positive".into()));
        }
        Ok(())
    }

    pub fn request_throttle(&self) -> Duration {
        Duration::from_millis(self.request_throttle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn transaction_relay_interval(&self) -> Duration {
        Duration::from_millis(self.transaction_relay_interval_ms)
    }

    pub fn free_transaction_relay_interval(&self) -> Duration {
        Duration::from_millis(self.free_transaction_relay_interval_ms)
    }

    pub fn subscription_change_grace_period(&self) -> Duration {
        Duration::from_millis(self.subscription_change_grace_period_ms)
    }

    pub fn header_request_timeout(&self) -> Duration {
        Duration::from_millis(self.header_request_timeout_ms)
    }

    pub fn chain_proof_request_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_proof_request_timeout_ms)
    }

    pub fn accounts_tree_chunk_request_timeout(&self) -> Duration {
        Duration::from_millis(self.accounts_tree_chunk_request_timeout_ms)
    }

    pub fn accounts_proof_request_timeout(&self) -> Duration {
        Duration::from_millis(self.accounts_proof_request_timeout_ms)
    }

    pub fn block_proof_request_timeout(&self) -> Duration {
        Duration::from_millis(self.block_proof_request_timeout_ms)
    }

    pub fn transactions_proof_request_timeout(&self) -> Duration {
        Duration::from_millis(self.transactions_proof_request_timeout_ms)
    }

    pub fn transaction_receipts_request_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_receipts_request_timeout_ms)
    }

    pub fn sync_retry_interval(&self) -> Duration {
        Duration::from_millis(self.sync_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.request_threshold, 50);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.chain_proof_request_timeout(), Duration::from_secs(45));
        assert_eq!(config.verification_window, NUM_BLOCKS_VERIFICATION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            request_threshold = 10
            local_subscription = { MinFee = 3 }
            "#,
        )
        .unwrap();
        assert_eq!(config.request_threshold, 10);
        assert_eq!(config.local_subscription, Subscription::MinFee(3));
        assert_eq!(config.max_sync_attempts, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SyncConfig::from_toml_str("vectors_max_count = 0"),
            Err(SyncError::Config(_))
        ));
        assert!(SyncConfig::from_toml_str("max_sync_attempts = 0").is_err());
        assert!(SyncConfig::from_toml_str("request_threshold = \"many\"").is_err());
    }
}
