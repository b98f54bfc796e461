//! Close and ban reasons for peer connections.
//!
//! Every disconnect initiated by the sync core carries one of these reasons.
//! The numeric code is what goes on the wire; banning reasons additionally
//! keep the peer out for the connection manager's ban period.

/// Reason for closing a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    // ========== Bans ==========
    /// Peer sent a block that failed validation.
    InvalidBlock,
    /// Peer exhausted its sync attempts.
    BlockchainSyncFailed,
    /// Peer sent a message that failed structural checks.
    MalformedMessage,

    // ========== Protocol violations ==========
    /// Peer relayed a transaction outside our subscription after the grace period.
    TransactionNotMatchingSubscription,
    /// Peer announced two fork blocks that do not follow each other.
    ConspicuousFork,
    /// Header response does not match the request.
    ReceivedWrongHeader,
    /// Block proof failed verification.
    InvalidBlockProof,
    /// Transactions proof failed verification.
    InvalidTransactionsProof,
    /// Accounts proof failed verification.
    InvalidAccountsProof,

    // ========== Timeouts ==========
    GetHeaderTimeout,
    GetChainProofTimeout,
    GetAccountsTreeChunkTimeout,
    GetAccountsProofTimeout,
    GetBlockProofTimeout,
    GetTransactionsProofTimeout,
    GetTransactionReceiptsTimeout,
}

impl CloseReason {
    /// Wire code.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidBlock => 1,
            Self::BlockchainSyncFailed => 2,
            Self::MalformedMessage => 3,
            Self::TransactionNotMatchingSubscription => 10,
            Self::ConspicuousFork => 11,
            Self::ReceivedWrongHeader => 12,
            Self::InvalidBlockProof => 13,
            Self::InvalidTransactionsProof => 14,
            Self::InvalidAccountsProof => 15,
            Self::GetHeaderTimeout => 20,
            Self::GetChainProofTimeout => 21,
            Self::GetAccountsTreeChunkTimeout => 22,
            Self::GetAccountsProofTimeout => 23,
            Self::GetBlockProofTimeout => 24,
            Self::GetTransactionsProofTimeout => 25,
            Self::GetTransactionReceiptsTimeout => 26,
        }
    }

    /// Whether the peer should be banned rather than just disconnected.
    pub fn is_ban(&self) -> bool {
        matches!(
            self,
            Self::InvalidBlock | Self::BlockchainSyncFailed | Self::MalformedMessage
        )
    }

    /// Whether the reason is a response timeout.
    pub fn is_timeout(&self) -> bool {
        self.code() >= 20
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBlock => write!(f, "received invalid block"),
            Self::BlockchainSyncFailed => write!(f, "blockchain sync failed"),
            Self::MalformedMessage => write!(f, "malformed message"),
            Self::TransactionNotMatchingSubscription => {
                write!(f, "received transaction not matching our subscription")
            }
            Self::ConspicuousFork => write!(f, "conspicuous fork"),
            Self::ReceivedWrongHeader => write!(f, "received wrong header"),
            Self::InvalidBlockProof => write!(f, "invalid block proof"),
            Self::InvalidTransactionsProof => write!(f, "invalid transactions proof"),
            Self::InvalidAccountsProof => write!(f, "invalid accounts proof"),
            Self::GetHeaderTimeout => write!(f, "get-header timeout"),
            Self::GetChainProofTimeout => write!(f, "get-chain-proof timeout"),
            Self::GetAccountsTreeChunkTimeout => write!(f, "get-accounts-tree-chunk timeout"),
            Self::GetAccountsProofTimeout => write!(f, "get-accounts-proof timeout"),
            Self::GetBlockProofTimeout => write!(f, "get-block-proof timeout"),
            Self::GetTransactionsProofTimeout => write!(f, "get-transactions-proof timeout"),
            Self::GetTransactionReceiptsTimeout => {
                write!(f, "get-transaction-receipts timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ban_reasons() {
        assert!(CloseReason::InvalidBlock.is_ban());
        assert!(CloseReason::BlockchainSyncFailed.is_ban());
        assert!(!CloseReason::ConspicuousFork.is_ban());
        assert!(!CloseReason::GetChainProofTimeout.is_ban());
    }

    #[test]
    fn test_timeouts_are_grouped() {
        assert!(CloseReason::GetHeaderTimeout.is_timeout());
        assert!(CloseReason::GetTransactionReceiptsTimeout.is_timeout());
        assert!(!CloseReason::InvalidBlockProof.is_timeout());
    }

    #[test]
    fn test_codes_are_unique() {
        let all = [
            CloseReason::InvalidBlock,
            CloseReason::BlockchainSyncFailed,
            CloseReason::MalformedMessage,
            CloseReason::TransactionNotMatchingSubscription,
            CloseReason::ConspicuousFork,
            CloseReason::ReceivedWrongHeader,
            CloseReason::InvalidBlockProof,
            CloseReason::InvalidTransactionsProof,
            CloseReason::InvalidAccountsProof,
            CloseReason::GetHeaderTimeout,
            CloseReason::GetChainProofTimeout,
            CloseReason::GetAccountsTreeChunkTimeout,
            CloseReason::GetAccountsProofTimeout,
            CloseReason::GetBlockProofTimeout,
            CloseReason::GetTransactionsProofTimeout,
            CloseReason::GetTransactionReceiptsTimeout,
        ];
        let codes: std::collections::HashSet<u16> = all.iter().map(CloseReason::code).collect();
        assert_eq!(codes.len(), all.len());
    }
}
