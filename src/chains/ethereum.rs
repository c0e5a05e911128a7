//! Ethereum escrow client, simulated.
//!
//! The live escrow contract client is an external adapter wired in at the
//! composition root; this deterministic in-process implementation backs
//! dry runs and tests. It keeps an escrow ledger in memory, hands out
//! stable synthetic transaction hashes, and enforces the same semantics
//! the contract would: redeem needs the matching preimage, refund needs
//! the timelock to have expired.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::models::{
    unix_now, Amount, ChainId, CrossChainSwapState, EscrowSide, ExecutedTransaction, Secret,
    SecretHash, TxStatus,
};

use super::EthereumChainClient;

#[derive(Debug, Clone)]
struct EscrowRecord {
    order_id: String,
    side: EscrowSide,
    amount: Amount,
    secret_hash: SecretHash,
    timelock: u64,
    redeemed: bool,
    refunded: bool,
}

#[derive(Default)]
struct LedgerState {
    escrows: HashMap<String, EscrowRecord>,
    tx_log: HashSet<String>,
    nonce: u64,
}

pub struct SimulatedEscrowClient {
    chain_id: ChainId,
    confirmations: u32,
    state: Mutex<LedgerState>,
    fail_fund_sides: Mutex<HashSet<EscrowSide>>,
}

impl SimulatedEscrowClient {
    pub fn new(chain_id: ChainId, confirmations: u32) -> Self {
        SimulatedEscrowClient {
            chain_id,
            confirmations,
            state: Mutex::new(LedgerState::default()),
            fail_fund_sides: Mutex::new(HashSet::new()),
        }
    }

    /// Make funding of `side` fail permanently, for failure-path tests.
    pub fn fail_funding_of(&self, side: EscrowSide, enabled: bool) {
        let mut fails = self.fail_fund_sides.lock();
        if enabled {
            fails.insert(side);
        } else {
            fails.remove(&side);
        }
    }

    pub fn escrow_exists(&self, funding_tx_hash: &str) -> bool {
        self.state.lock().escrows.contains_key(funding_tx_hash)
    }

    pub fn escrow_redeemed(&self, funding_tx_hash: &str) -> bool {
        self.state
            .lock()
            .escrows
            .get(funding_tx_hash)
            .map(|e| e.redeemed)
            .unwrap_or(false)
    }

    fn synthetic_hash(&self, tag: &str, order_id: &str, nonce: u64) -> String {
        let digest = Sha256::digest(format!("{}:{}:{}:{}", self.chain_id, tag, order_id, nonce));
        format!("0x{}", hex::encode(digest))
    }

    fn executed(&self, tx_hash: String) -> ExecutedTransaction {
        let mut tx = ExecutedTransaction::pending(self.chain_id, tx_hash, self.confirmations);
        tx.fee = Amount::new(21_000 * 20_000_000_000);
        tx
    }
}

#[async_trait]
impl EthereumChainClient for SimulatedEscrowClient {
    async fn fund_escrow(
        &self,
        order: &CrossChainSwapState,
        side: EscrowSide,
    ) -> Result<ExecutedTransaction> {
        if self.fail_fund_sides.lock().contains(&side) {
            bail!("escrow creation reverted: simulated permanent failure");
        }
        let mut state = self.state.lock();
        state.nonce += 1;
        let tx_hash = self.synthetic_hash("fund", &order.order_id, state.nonce);
        state.escrows.insert(
            tx_hash.clone(),
            EscrowRecord {
                order_id: order.order_id.clone(),
                side,
                amount: order.amount(side),
                secret_hash: order.secret_hash,
                timelock: order.timelock(side),
                redeemed: false,
                refunded: false,
            },
        );
        state.tx_log.insert(tx_hash.clone());
        Ok(self.executed(tx_hash))
    }

    async fn redeem_escrow(
        &self,
        order: &CrossChainSwapState,
        funding_tx_hash: &str,
        secret: &Secret,
    ) -> Result<ExecutedTransaction> {
        let mut state = self.state.lock();
        let escrow = state
            .escrows
            .get_mut(funding_tx_hash)
            .with_context(|| format!("no escrow funded by {}", funding_tx_hash))?;
        if escrow.order_id != order.order_id {
            bail!("escrow {} belongs to another order", funding_tx_hash);
        }
        if secret.hash() != escrow.secret_hash {
            bail!("invalid secret: preimage does not match escrow hash");
        }
        if escrow.refunded {
            bail!("escrow {} was already refunded", funding_tx_hash);
        }
        escrow.redeemed = true;
        state.nonce += 1;
        let tx_hash = self.synthetic_hash("redeem", &order.order_id, state.nonce);
        state.tx_log.insert(tx_hash.clone());
        Ok(self.executed(tx_hash))
    }

    async fn refund_escrow(
        &self,
        order: &CrossChainSwapState,
        funding_tx_hash: &str,
    ) -> Result<ExecutedTransaction> {
        let mut state = self.state.lock();
        let escrow = state
            .escrows
            .get_mut(funding_tx_hash)
            .with_context(|| format!("no escrow funded by {}", funding_tx_hash))?;
        if escrow.redeemed {
            bail!("escrow {} was already redeemed", funding_tx_hash);
        }
        if unix_now() < escrow.timelock {
            bail!(
                "refund locked until {}, now {}",
                escrow.timelock,
                unix_now()
            );
        }
        escrow.refunded = true;
        state.nonce += 1;
        let tx_hash = self.synthetic_hash("refund", &order.order_id, state.nonce);
        state.tx_log.insert(tx_hash.clone());
        Ok(self.executed(tx_hash))
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        confirmations: u32,
        _timeout: Duration,
    ) -> Result<ExecutedTransaction> {
        let known = self.state.lock().tx_log.contains(tx_hash);
        if !known {
            bail!("unknown transaction {}", tx_hash);
        }
        let mut tx =
            ExecutedTransaction::pending(self.chain_id, tx_hash.to_string(), confirmations);
        tx.confirmations = confirmations;
        tx.status = TxStatus::Confirmed;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChainRef, SwapAmounts, SwapStatus, SwapTimelocks};

    fn order(secret: &Secret) -> CrossChainSwapState {
        let now = unix_now();
        CrossChainSwapState {
            order_id: "o1".to_string(),
            maker: "0xmaker".to_string(),
            source_chain: ChainRef::native(ChainId::EthereumMainnet),
            destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
            amounts: SwapAmounts {
                source: Amount::new(1_000_000_000_000_000_000),
                destination: Amount::new(4_000_000),
            },
            timelocks: SwapTimelocks {
                source: now + 7200,
                destination: now + 3600,
            },
            secret_hash: secret.hash(),
            status: SwapStatus::ResolverSelected,
            secret: None,
        }
    }

    #[tokio::test]
    async fn fund_then_redeem_with_correct_secret() {
        let secret = Secret::from_bytes([3u8; 32]);
        let client = SimulatedEscrowClient::new(ChainId::EthereumMainnet, 2);
        let order = order(&secret);

        let funded = client.fund_escrow(&order, EscrowSide::Source).await.unwrap();
        assert!(client.escrow_exists(&funded.tx_hash));
        client
            .wait_for_confirmation(&funded.tx_hash, 2, Duration::from_secs(1))
            .await
            .unwrap();

        let wrong = Secret::from_bytes([4u8; 32]);
        let err = client
            .redeem_escrow(&order, &funded.tx_hash, &wrong)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid secret"));

        client
            .redeem_escrow(&order, &funded.tx_hash, &secret)
            .await
            .unwrap();
        assert!(client.escrow_redeemed(&funded.tx_hash));
    }

    #[tokio::test]
    async fn refund_respects_timelock() {
        let secret = Secret::from_bytes([3u8; 32]);
        let client = SimulatedEscrowClient::new(ChainId::EthereumMainnet, 2);
        let order = order(&secret);
        let funded = client.fund_escrow(&order, EscrowSide::Source).await.unwrap();
        let err = client
            .refund_escrow(&order, &funded.tx_hash)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refund locked"));
    }

    #[tokio::test]
    async fn injected_failure_is_permanent() {
        let secret = Secret::from_bytes([3u8; 32]);
        let client = SimulatedEscrowClient::new(ChainId::EthereumMainnet, 2);
        client.fail_funding_of(EscrowSide::Destination, true);
        let err = client
            .fund_escrow(&order(&secret), EscrowSide::Destination)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reverted"));
        // Source side is unaffected
        assert!(client
            .fund_escrow(&order(&secret), EscrowSide::Source)
            .await
            .is_ok());
    }
}
