//! Bitcoin HTLC client.
//!
//! Composes the script builder, the wallet transaction assembly, and the
//! Core RPC client into the [`BitcoinChainClient`] boundary the executor
//! drives.

pub mod htlc;
pub mod rpc;
pub mod wallet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bitcoin::Network;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::BitcoinConfig;
use crate::models::{Amount, ChainId, ExecutedTransaction, Secret, TxStatus};

use super::{BitcoinChainClient, Utxo};
use htlc::{build_htlc_output, extract_secret_from_tx, HtlcOutput, HtlcParams};
use rpc::BitcoinRpcClient;
use wallet::{
    build_funding_transaction, build_redeem_transaction, build_refund_transaction, select_utxos,
    tx_hex, WalletKey,
};

/// How often confirmation polling hits the node.
const CONFIRMATION_POLL_SECS: u64 = 10;

pub fn network_from_config(name: &str) -> Result<Network> {
    match name {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        other => bail!("unsupported bitcoin network {:?}", other),
    }
}

pub fn chain_id_for_network(network: Network) -> ChainId {
    match network {
        Network::Bitcoin => ChainId::BitcoinMainnet,
        Network::Regtest => ChainId::BitcoinRegtest,
        _ => ChainId::BitcoinTestnet,
    }
}

pub struct BitcoinHtlcClient {
    rpc: BitcoinRpcClient,
    key: WalletKey,
    network: Network,
    chain_id: ChainId,
    fee_rate: u64,
    wallet_address: String,
}

impl BitcoinHtlcClient {
    pub fn new(config: &BitcoinConfig) -> Result<Self> {
        let network = network_from_config(&config.network)?;
        let key = WalletKey::from_hex(&config.private_key)
            .context("bitcoin private key is invalid")?;
        let wallet_address = key.p2wpkh_address(network)?.to_string();
        Ok(BitcoinHtlcClient {
            rpc: BitcoinRpcClient::new(config),
            key,
            network,
            chain_id: chain_id_for_network(network),
            fee_rate: config.fee_rate.max(1),
            wallet_address,
        })
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    pub fn resolver_pubkey(&self) -> Vec<u8> {
        self.key.pubkey_bytes()
    }
}

#[async_trait]
impl BitcoinChainClient for BitcoinHtlcClient {
    fn build_htlc(&self, params: &HtlcParams) -> Result<HtlcOutput> {
        build_htlc_output(params, self.network)
    }

    async fn get_utxos(&self, address: &str, min_confirmations: u32) -> Result<Vec<Utxo>> {
        self.rpc.list_unspent(address, min_confirmations).await
    }

    async fn fund_htlc(&self, output: &HtlcOutput, amount: Amount) -> Result<ExecutedTransaction> {
        let utxos = self
            .get_utxos(&self.wallet_address, 1)
            .await
            .context("failed to list wallet UTXOs")?;
        let (selected, _) = select_utxos(&utxos, amount, self.fee_rate)?;
        let (tx, fee) = build_funding_transaction(
            output,
            amount,
            &selected,
            &self.key,
            &self.wallet_address,
            self.fee_rate,
            self.network,
        )?;
        let txid = self.broadcast(&tx_hex(&tx)).await?;
        info!(txid, %amount, address = %output.address, "HTLC funded");
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
        let txid = self.broadcast(&tx_hex(&tx)).await?;
        info!(txid, funding_tx_hash, "HTLC redeemed via secret path");
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
        let txid = self.broadcast(&tx_hex(&tx)).await?;
        info!(txid, funding_tx_hash, timelock, "HTLC refunded via timelock path");
        let mut executed = ExecutedTransaction::pending(self.chain_id, txid, 0);
        executed.fee = fee;
        Ok(executed)
    }

    async fn broadcast(&self, raw: &str) -> Result<String> {
        self.rpc.send_raw_transaction(raw).await
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        confirmations: u32,
        timeout: Duration,
    ) -> Result<ExecutedTransaction> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.rpc.get_confirmations(tx_hash).await?;
            let current = seen.unwrap_or(0);
            debug!(tx_hash, current, confirmations, "confirmation poll");
            if current >= confirmations {
                let mut executed =
                    ExecutedTransaction::pending(self.chain_id, tx_hash.to_string(), confirmations);
                executed.confirmations = current;
                executed.status = TxStatus::Confirmed;
                return Ok(executed);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "timeout waiting for {} confirmations of {}",
                    confirmations,
                    tx_hash
                );
            }
            sleep(Duration::from_secs(CONFIRMATION_POLL_SECS)).await;
        }
    }

    fn extract_secret(&self, raw: &str, redeem_script: &[u8]) -> Option<Secret> {
        extract_secret_from_tx(raw, redeem_script)
    }
}
