//! Bitcoin Core JSON-RPC client.
//!
//! Thin async wrapper over the node RPC surface the HTLC client needs:
//! broadcast, UTXO listing, and confirmation lookups.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::BitcoinConfig;
use crate::models::Amount;

use crate::chains::Utxo;

pub struct BitcoinRpcClient {
    http: Client,
    url: String,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListUnspentEntry {
    txid: String,
    vout: u32,
    /// BTC, not sats.
    amount: f64,
    confirmations: u32,
}

impl BitcoinRpcClient {
    pub fn new(config: &BitcoinConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        BitcoinRpcClient {
            http,
            url: config.rpc_url.clone(),
            user: config.rpc_user.clone(),
            password: config.rpc_password.clone(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        debug!(method, "bitcoin rpc call");
        let body = json!({
            "jsonrpc": "1.0",
            "id": "swapbot",
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("bitcoin rpc {} failed", method))?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 500 {
            // Core answers RPC-level errors with 500 and a JSON body
            bail!("bitcoin rpc {} returned HTTP {}", method, status);
        }
        let parsed: RpcResponse = response
            .json()
            .await
            .with_context(|| format!("bitcoin rpc {} returned invalid JSON", method))?;
        if let Some(error) = parsed.error {
            if !error.is_null() {
                bail!("bitcoin rpc {} error: {}", method, error);
            }
        }
        parsed
            .result
            .with_context(|| format!("bitcoin rpc {} returned no result", method))
    }

    pub async fn send_raw_transaction(&self, tx_hex: &str) -> Result<String> {
        let result = self
            .call("sendrawtransaction", json!([tx_hex]))
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .context("sendrawtransaction returned a non-string txid")
    }

    pub async fn list_unspent(&self, address: &str, min_confirmations: u32) -> Result<Vec<Utxo>> {
        let result = self
            .call(
                "listunspent",
                json!([min_confirmations, 9_999_999, [address]]),
            )
            .await?;
        let entries: Vec<ListUnspentEntry> =
            serde_json::from_value(result).context("listunspent returned unexpected shape")?;
        Ok(entries
            .into_iter()
            .map(|e| Utxo {
                txid: e.txid,
                vout: e.vout,
                value: Amount::new((e.amount * 100_000_000.0).round() as u128),
                confirmations: e.confirmations,
            })
            .collect())
    }

    /// Confirmations for a transaction, or `None` while unconfirmed or
    /// unknown to the node.
    pub async fn get_confirmations(&self, txid: &str) -> Result<Option<u32>> {
        let result = self
            .call("getrawtransaction", json!([txid, true]))
            .await?;
        Ok(result
            .get("confirmations")
            .and_then(|c| c.as_u64())
            .map(|c| c as u32))
    }

    pub async fn get_block_count(&self) -> Result<u64> {
        let result = self.call("getblockcount", json!([])).await?;
        result
            .as_u64()
            .context("getblockcount returned a non-integer")
    }
}
