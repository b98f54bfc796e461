//! Single-outstanding request slots.

use crate::{SyncError, SyncResult};
use std::fmt;
use tokio::sync::oneshot;

/// Kinds of request a session issues to its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GetData,
    GetBlocks,
    Header,
    ChainProof,
    AccountsTreeChunk,
    AccountsProof,
    BlockProof,
    TransactionsProof,
    TransactionReceipts,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetData => "get-data",
            Self::GetBlocks => "get-blocks",
            Self::Header => "get-header",
            Self::ChainProof => "get-chain-proof",
            Self::AccountsTreeChunk => "get-accounts-tree-chunk",
            Self::AccountsProof => "get-accounts-proof",
            Self::BlockProof => "get-block-proof",
            Self::TransactionsProof => "get-transactions-proof",
            Self::TransactionReceipts => "get-transaction-receipts",
        };
        f.write_str(name)
    }
}

/// A request awaiting the peer's answer, with the caller waiting on `responder`.
#[derive(Debug)]
pub struct PendingRequest<P, T> {
    pub params: P,
    responder: oneshot::Sender<SyncResult<T>>,
}

impl<P, T> PendingRequest<P, T> {
    pub fn resolve(self, value: T) {
        // The caller may have given up waiting.
        let _ = self.responder.send(Ok(value));
    }

    pub fn reject(self, error: SyncError) {
        let _ = self.responder.send(Err(error));
    }
}

/// Holds at most one outstanding request of one kind.
#[derive(Debug)]
pub struct RequestSlot<P, T> {
    kind: RequestKind,
    pending: Option<PendingRequest<P, T>>,
}

impl<P, T> RequestSlot<P, T> {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            pending: None,
        }
    }

    /// Occupy the slot.
    ///
    /// # Panics
    ///
    /// Panics if a request of this kind is already outstanding; callers
    /// serialize requests per kind.
    pub fn begin(&mut self, params: P, responder: oneshot::Sender<SyncResult<T>>) {
        assert!(
            self.pending.is_none(),
            "Duplicate {} request while one is outstanding",
            self.kind
        );
        self.pending = Some(PendingRequest { params, responder });
    }

    /// Free the slot, handing back the pending request.
    pub fn take(&mut self) -> Option<PendingRequest<P, T>> {
        self.pending.take()
    }

    pub fn params(&self) -> Option<&P> {
        self.pending.as_ref().map(|p| &p.params)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_resolves_caller() {
        let mut slot: RequestSlot<u32, String> = RequestSlot::new(RequestKind::BlockProof);
        let (tx, rx) = oneshot::channel();
        slot.begin(7, tx);
        assert!(slot.is_pending());
        assert_eq!(slot.params(), Some(&7));

        slot.take().unwrap().resolve("proof".into());
        assert!(!slot.is_pending());
        assert_eq!(rx.await.unwrap(), Ok("proof".to_string()));
    }

    #[tokio::test]
    async fn test_slot_rejects_caller() {
        let mut slot: RequestSlot<(), ()> = RequestSlot::new(RequestKind::TransactionsProof);
        let (tx, rx) = oneshot::channel();
        slot.begin((), tx);
        slot.take()
            .unwrap()
            .reject(SyncError::Timeout(RequestKind::TransactionsProof));
        assert_eq!(
            rx.await.unwrap(),
            Err(SyncError::Timeout(RequestKind::TransactionsProof))
        );
    }

    #[test]
    #[should_panic(expected = "Duplicate get-block-proof request")]
    fn test_second_request_panics() {
        let mut slot: RequestSlot<(), ()> = RequestSlot::new(RequestKind::BlockProof);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        slot.begin((), tx1);
        slot.begin((), tx2);
    }
}
