//! Chain-client adapter boundary.
//!
//! The executor drives both legs of a swap through these traits. Live
//! implementations talk to real nodes; the simulated clients in
//! [`mock`] settle against in-memory ledgers so dry runs and tests can
//! exercise the full state machine deterministically.

pub mod bitcoin;
pub mod ethereum;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{Amount, CrossChainSwapState, EscrowSide, ExecutedTransaction, Secret};

pub use self::bitcoin::htlc::{HtlcOutput, HtlcParams};

/// An unspent output usable as transaction input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: Amount,
    pub confirmations: u32,
}

/// Ethereum-side escrow operations.
#[async_trait]
pub trait EthereumChainClient: Send + Sync {
    /// Create and fund the escrow for one side of the order.
    async fn fund_escrow(
        &self,
        order: &CrossChainSwapState,
        side: EscrowSide,
    ) -> Result<ExecutedTransaction>;

    /// Claim an escrow by presenting the hash preimage.
    async fn redeem_escrow(
        &self,
        order: &CrossChainSwapState,
        funding_tx_hash: &str,
        secret: &Secret,
    ) -> Result<ExecutedTransaction>;

    /// Recover an escrow after its timelock expired.
    async fn refund_escrow(
        &self,
        order: &CrossChainSwapState,
        funding_tx_hash: &str,
    ) -> Result<ExecutedTransaction>;

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        confirmations: u32,
        timeout: Duration,
    ) -> Result<ExecutedTransaction>;
}

/// Bitcoin-side HTLC operations.
#[async_trait]
pub trait BitcoinChainClient: Send + Sync {
    /// Build the P2WSH hash-timelock output for the given parameters.
    /// Deterministic: identical params yield identical bytes.
    fn build_htlc(&self, params: &HtlcParams) -> Result<HtlcOutput>;

    async fn get_utxos(&self, address: &str, min_confirmations: u32) -> Result<Vec<Utxo>>;

    /// Fund the HTLC output with `amount`. The HTLC is always placed at
    /// output index 0 of the funding transaction.
    async fn fund_htlc(&self, output: &HtlcOutput, amount: Amount) -> Result<ExecutedTransaction>;

    /// Spend the HTLC through the secret path, revealing the preimage in
    /// the witness.
    async fn redeem_htlc(
        &self,
        funding_tx_hash: &str,
        output: &HtlcOutput,
        amount: Amount,
        secret: &Secret,
    ) -> Result<ExecutedTransaction>;

    /// Spend the HTLC through the timelock path. Only valid once the
    /// chain's median time passes `timelock`.
    async fn refund_htlc(
        &self,
        funding_tx_hash: &str,
        output: &HtlcOutput,
        amount: Amount,
        timelock: u64,
    ) -> Result<ExecutedTransaction>;

    async fn broadcast(&self, tx_hex: &str) -> Result<String>;

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        confirmations: u32,
        timeout: Duration,
    ) -> Result<ExecutedTransaction>;

    /// Pull the 32-byte preimage out of a redemption transaction's
    /// witness, if the transaction spends the given witness script.
    fn extract_secret(&self, tx_hex: &str, redeem_script: &[u8]) -> Option<Secret>;
}
