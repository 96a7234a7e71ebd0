//! Chain client abstraction.
//!
//! The client submits signed transactions, reports receipts and code, and
//! delivers contract logs. Implementations may talk to a JSON-RPC node or
//! simulate a chain in process.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use dst_node_core::{match_code, Address, Hash256, MatchStatus};

use crate::error::{ChainError, Result};
use crate::events::{EventKind, EventLog};
use crate::tx::{SignedTx, TxReceipt};

/// Interval between receipt polls while waiting for mining.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Selects the logs of one event kind emitted by one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub address: Address,
    pub kind: EventKind,
}

impl LogFilter {
    pub fn matches(&self, log: &EventLog) -> bool {
        log.address == self.address && log.event.kind() == self.kind
    }
}

/// A live log subscription.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct LogSubscription {
    rx: mpsc::UnboundedReceiver<Result<EventLog>>,
}

impl LogSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<EventLog>>) -> Self {
        Self { rx }
    }

    /// Next matching log or subscription error; `None` once the
    /// subscription has ended.
    pub async fn next(&mut self) -> Option<Result<EventLog>> {
        self.rx.recv().await
    }
}

/// Read-only contract queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadCall {
    /// `VPC.states(id)`.
    VpcStates { id: Hash256 },
}

/// On-chain record of a VPC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcOnChainState {
    pub cash_sender: u128,
    pub cash_receiver: u128,
    pub seq_no: u64,
    /// Unix time after which the first submitted state becomes final.
    pub validity: u64,
    pub extended_validity: u64,
    pub open: bool,
    pub waiting_for_sender: bool,
    pub waiting_for_receiver: bool,
    pub init: bool,
}

impl VpcOnChainState {
    /// Whether both parties have submitted and the balances are final.
    pub fn is_closed(&self) -> bool {
        self.init && !self.open
    }
}

/// Values returned by [`ReadCall`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadValue {
    VpcState(VpcOnChainState),
}

/// Chain client trait.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next nonce of `address`.
    async fn nonce(&self, address: &Address) -> Result<u64>;

    /// Submit a signed transaction, returning its hash.
    async fn send_transaction(&self, tx: SignedTx) -> Result<Hash256>;

    /// Receipt of a transaction, `None` while it is pending.
    async fn transaction_receipt(&self, tx_hash: &Hash256) -> Result<Option<TxReceipt>>;

    /// Runtime bytecode at `address`, empty when there is none.
    async fn code_at(&self, address: &Address) -> Result<Vec<u8>>;

    /// Execute a read-only call.
    async fn call(&self, to: &Address, call: ReadCall) -> Result<ReadValue>;

    /// Subscribe to future logs matching `filter`.
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription>;

    /// Past logs matching `filter`, starting at `from_block`.
    async fn filter_logs(&self, filter: LogFilter, from_block: u64) -> Result<Vec<EventLog>>;

    /// Compare the code at `address` with an expected runtime hash.
    async fn verify_code_at(
        &self,
        address: &Address,
        expected: &Hash256,
        is_library: bool,
    ) -> Result<MatchStatus> {
        let code = self.code_at(address).await?;
        Ok(match_code(&code, expected, is_library))
    }

    /// Poll for the receipt of `tx_hash` until it appears or `timeout`
    /// elapses.
    async fn wait_till_tx_mined(&self, tx_hash: &Hash256, timeout: Duration) -> Result<TxReceipt> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::MiningTimeout(*tx_hash));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client whose receipt shows up after a number of polls.
    struct SlowMiner {
        polls: AtomicUsize,
        ready_after: usize,
        code: Vec<u8>,
    }

    #[async_trait]
    impl ChainClient for SlowMiner {
        async fn nonce(&self, _: &Address) -> Result<u64> {
            Ok(0)
        }

        async fn send_transaction(&self, _: SignedTx) -> Result<Hash256> {
            Ok(Hash256::ZERO)
        }

        async fn transaction_receipt(&self, tx_hash: &Hash256) -> Result<Option<TxReceipt>> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((n >= self.ready_after).then(|| TxReceipt {
                tx_hash: *tx_hash,
                block_number: 1,
                status: 1,
                contract_address: None,
                gas_used: 21_000,
            }))
        }

        async fn code_at(&self, _: &Address) -> Result<Vec<u8>> {
            Ok(self.code.clone())
        }

        async fn call(&self, _: &Address, _: ReadCall) -> Result<ReadValue> {
            Ok(ReadValue::VpcState(VpcOnChainState::default()))
        }

        async fn subscribe_logs(&self, _: LogFilter) -> Result<LogSubscription> {
            Err(ChainError::Subscription("unsupported".into()))
        }

        async fn filter_logs(&self, _: LogFilter, _: u64) -> Result<Vec<EventLog>> {
            Ok(Vec::new())
        }
    }

    fn miner(ready_after: usize) -> SlowMiner {
        SlowMiner {
            polls: AtomicUsize::new(0),
            ready_after,
            code: b"runtime".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_wait_till_tx_mined_polls() {
        let client = miner(3);
        let receipt = client
            .wait_till_tx_mined(&Hash256::from_bytes([5; 32]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(receipt.succeeded());
        assert_eq!(client.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_till_tx_mined_times_out() {
        let client = miner(usize::MAX);
        let err = client
            .wait_till_tx_mined(&Hash256::ZERO, Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::MiningTimeout(_)));
    }

    #[tokio::test]
    async fn test_verify_code_at_is_idempotent() {
        let client = miner(1);
        let expected = dst_node_core::runtime_code_hash(b"runtime", false);
        let addr = Address::from_bytes([1; 20]);
        for _ in 0..3 {
            assert_eq!(
                client.verify_code_at(&addr, &expected, false).await.unwrap(),
                MatchStatus::Match
            );
        }
        assert_eq!(
            client.verify_code_at(&addr, &Hash256::ZERO, false).await.unwrap(),
            MatchStatus::NoMatch
        );
    }
}
