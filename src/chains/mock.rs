//! Simulated Bitcoin chain.
//!
//! Backs dry runs and tests with an in-memory chain that still runs the
//! real script builder, transaction assembly, and signing code. Broadcast
//! transactions are stored as wire-format hex, so secret extraction and
//! witness checks operate on genuine bytes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bitcoin::Network;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::models::{unix_now, Amount, ChainId, ExecutedTransaction, Secret, TxStatus};

use super::bitcoin::htlc::{build_htlc_output, extract_secret_from_tx, HtlcOutput, HtlcParams};
use super::bitcoin::wallet::{
    build_funding_transaction, build_redeem_transaction, build_refund_transaction, select_utxos,
    tx_hex, WalletKey,
};
use super::{BitcoinChainClient, Utxo};

/// Well-known regtest key; never use outside tests and dry runs.
const SIM_WALLET_KEY: &str = "1111111111111111111111111111111111111111111111111111111111111111";

#[derive(Default)]
struct ChainState {
    wallet_utxos: Vec<Utxo>,
    /// txid -> raw hex of everything broadcast.
    transactions: HashMap<String, String>,
}

pub struct SimulatedBitcoinClient {
    network: Network,
    chain_id: ChainId,
    key: WalletKey,
    fee_rate: u64,
    wallet_address: String,
    state: Mutex<ChainState>,
    fail_funding: AtomicBool,
}

impl SimulatedBitcoinClient {
    /// A regtest chain whose wallet starts with one UTXO of
    /// `initial_sats`.
    pub fn new(initial_sats: u128) -> Self {
        let network = Network::Regtest;
        let key = WalletKey::from_hex(SIM_WALLET_KEY).expect("static key is valid");
        let wallet_address = key
            .p2wpkh_address(network)
            .expect("static key is compressed")
            .to_string();

        let genesis_txid = hex::encode(Sha256::digest(b"swapbot-sim-genesis"));
        let state = ChainState {
            wallet_utxos: vec![Utxo {
                txid: genesis_txid,
                vout: 0,
                value: Amount::new(initial_sats),
                confirmations: 100,
            }],
            transactions: HashMap::new(),
        };

        SimulatedBitcoinClient {
            network,
            chain_id: ChainId::BitcoinRegtest,
            key,
            fee_rate: 10,
            wallet_address,
            state: Mutex::new(state),
            fail_funding: AtomicBool::new(false),
        }
    }

    /// Make HTLC funding fail permanently, for failure-path tests.
    pub fn set_fail_funding(&self, enabled: bool) {
        self.fail_funding.store(enabled, Ordering::Relaxed);
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    pub fn resolver_pubkey(&self) -> Vec<u8> {
        self.key.pubkey_bytes()
    }

    /// Raw hex of a broadcast transaction, as a block explorer would
    /// serve it.
    pub fn raw_transaction(&self, txid: &str) -> Option<String> {
        self.state.lock().transactions.get(txid).cloned()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Standard HTLC parameters with the simulated wallet playing both
    /// roles, used by dry runs.
    pub fn htlc_params(&self, secret_hash: crate::models::SecretHash, timelock: u64) -> HtlcParams {
        HtlcParams {
            secret_hash,
            user_pubkey: self.key.pubkey_bytes(),
            resolver_pubkey: self.key.pubkey_bytes(),
            timelock,
        }
    }
}

#[async_trait]
impl BitcoinChainClient for SimulatedBitcoinClient {
    fn build_htlc(&self, params: &HtlcParams) -> Result<HtlcOutput> {
        build_htlc_output(params, self.network)
    }

    async fn get_utxos(&self, address: &str, _min_confirmations: u32) -> Result<Vec<Utxo>> {
        let state = self.state.lock();
        if address == self.wallet_address {
            Ok(state.wallet_utxos.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn fund_htlc(&self, output: &HtlcOutput, amount: Amount) -> Result<ExecutedTransaction> {
        if self.fail_funding.load(Ordering::Relaxed) {
            bail!("funding rejected by consensus rules: simulated permanent failure");
        }

        let mut state = self.state.lock();
        let (selected, _) = select_utxos(&state.wallet_utxos, amount, self.fee_rate)?;
        let (tx, fee) = build_funding_transaction(
            output,
            amount,
            &selected,
            &self.key,
            &self.wallet_address,
            self.fee_rate,
            self.network,
        )?;
        let txid = tx.txid().to_string();

        // Spend the inputs; credit any change back to the wallet
        state.wallet_utxos.retain(|u| {
            !selected
                .iter()
                .any(|s| s.txid == u.txid && s.vout == u.vout)
        });
        if tx.output.len() > 1 {
            state.wallet_utxos.push(Utxo {
                txid: txid.clone(),
                vout: 1,
                value: Amount::new(tx.output[1].value as u128),
                confirmations: 1,
            });
        }
        state.transactions.insert(txid.clone(), tx_hex(&tx));

        let mut executed = ExecutedTransaction::pending(self.chain_id, txid, 0);
        executed.fee = fee;
        Ok(executed)
    }

    async fn redeem_htlc(
        &self,
        funding_tx_hash: &str,
        output: &HtlcOutput,
        amount: Amount,
        secret: &Secret,
    ) -> Result<ExecutedTransaction> {
        {
            let state = self.state.lock();
            if !state.transactions.contains_key(funding_tx_hash) {
                bail!("unknown funding transaction {}", funding_tx_hash);
            }
        }
        let (tx, fee) = build_redeem_transaction(
            funding_tx_hash,
            output,
            amount,
            secret,
            &self.key,
            &self.wallet_address,
            self.fee_rate,
            self.network,
        )?;
        let txid = tx.txid().to_string();
        let mut state = self.state.lock();
        state.transactions.insert(txid.clone(), tx_hex(&tx));

        let mut executed = ExecutedTransaction::pending(self.chain_id, txid, 0);
        executed.fee = fee;
        Ok(executed)
    }

    async fn refund_htlc(
        &self,
        funding_tx_hash: &str,
        output: &HtlcOutput,
        amount: Amount,
        timelock: u64,
    ) -> Result<ExecutedTransaction> {
        if unix_now() < timelock {
            bail!("non-final transaction: locktime {} not reached", timelock);
        }
        {
            let state = self.state.lock();
            if !state.transactions.contains_key(funding_tx_hash) {
                bail!("unknown funding transaction {}", funding_tx_hash);
            }
        }
        let (tx, fee) = build_refund_transaction(
            funding_tx_hash,
            output,
            amount,
            timelock,
            &self.key,
            &self.wallet_address,
            self.fee_rate,
            self.network,
        )?;
        let txid = tx.txid().to_string();
        let mut state = self.state.lock();
        state.transactions.insert(txid.clone(), tx_hex(&tx));

        let mut executed = ExecutedTransaction::pending(self.chain_id, txid, 0);
        executed.fee = fee;
        Ok(executed)
    }

    async fn broadcast(&self, raw: &str) -> Result<String> {
        let bytes = hex::decode(raw.trim()).context("broadcast payload is not hex")?;
        let tx: bitcoin::Transaction = bitcoin::consensus::encode::deserialize(&bytes)
            .context("broadcast payload is not a valid transaction")?;
        let txid = tx.txid().to_string();
        self.state
            .lock()
            .transactions
            .insert(txid.clone(), raw.to_string());
        Ok(txid)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        confirmations: u32,
        _timeout: Duration,
    ) -> Result<ExecutedTransaction> {
        let known = self.state.lock().transactions.contains_key(tx_hash);
        if !known {
            bail!("unknown transaction {}", tx_hash);
        }
        let mut tx =
            ExecutedTransaction::pending(self.chain_id, tx_hash.to_string(), confirmations);
        tx.confirmations = confirmations;
        tx.status = TxStatus::Confirmed;
        Ok(tx)
    }

    fn extract_secret(&self, raw: &str, redeem_script: &[u8]) -> Option<Secret> {
        extract_secret_from_tx(raw, redeem_script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::validate_secret;

    #[tokio::test]
    async fn full_htlc_lifecycle_on_sim_chain() {
        let chain = SimulatedBitcoinClient::new(100_000_000);
        let secret = Secret::from_bytes([42u8; 32]);
        let params = chain.htlc_params(secret.hash(), 1_700_000_000);
        let htlc = chain.build_htlc(&params).unwrap();

        let funded = chain.fund_htlc(&htlc, Amount::new(4_000_000)).await.unwrap();
        chain
            .wait_for_confirmation(&funded.tx_hash, 1, Duration::from_secs(1))
            .await
            .unwrap();

        let redeemed = chain
            .redeem_htlc(&funded.tx_hash, &htlc, Amount::new(4_000_000), &secret)
            .await
            .unwrap();

        // The broadcast redemption carries the preimage in its witness
        let raw = chain.raw_transaction(&redeemed.tx_hash).unwrap();
        let extracted = chain.extract_secret(&raw, &htlc.redeem_script).unwrap();
        assert!(validate_secret(&extracted, &secret.hash()));
    }

    #[tokio::test]
    async fn change_returns_to_wallet() {
        let chain = SimulatedBitcoinClient::new(100_000_000);
        let secret = Secret::from_bytes([42u8; 32]);
        let htlc = chain
            .build_htlc(&chain.htlc_params(secret.hash(), 1_700_000_000))
            .unwrap();
        chain.fund_htlc(&htlc, Amount::new(4_000_000)).await.unwrap();

        let utxos = chain.get_utxos(chain.wallet_address(), 1).await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert!(utxos[0].value > Amount::new(95_000_000));
    }

    #[tokio::test]
    async fn refund_rejected_before_timelock() {
        let chain = SimulatedBitcoinClient::new(100_000_000);
        let secret = Secret::from_bytes([42u8; 32]);
        let future_timelock = unix_now() + 3_600;
        let htlc = chain
            .build_htlc(&chain.htlc_params(secret.hash(), future_timelock))
            .unwrap();
        let funded = chain.fund_htlc(&htlc, Amount::new(4_000_000)).await.unwrap();

        let err = chain
            .refund_htlc(&funded.tx_hash, &htlc, Amount::new(4_000_000), future_timelock)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-final"));
    }

    #[tokio::test]
    async fn injected_funding_failure() {
        let chain = SimulatedBitcoinClient::new(100_000_000);
        chain.set_fail_funding(true);
        let secret = Secret::from_bytes([42u8; 32]);
        let htlc = chain
            .build_htlc(&chain.htlc_params(secret.hash(), 1_700_000_000))
            .unwrap();
        let err = chain
            .fund_htlc(&htlc, Amount::new(4_000_000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected by consensus rules"));
    }
}
