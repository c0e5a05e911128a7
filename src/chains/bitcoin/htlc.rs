//! Hash-timelock contract construction.
//!
//! The HTLC is a P2WSH output whose witness script allows either spend
//! path: present the SHA-256 preimage and a signature from the user key,
//! or wait past the absolute timelock and sign with the resolver key.
//!
//! ```text
//! OP_IF
//!   OP_SHA256 <secret_hash> OP_EQUALVERIFY <user_pubkey> OP_CHECKSIG
//! OP_ELSE
//!   <timelock> OP_CHECKLOCKTIMEVERIFY OP_DROP <resolver_pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```

use anyhow::{Context, Result};
use bitcoin::blockdata::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_IF, OP_SHA256,
};
use bitcoin::blockdata::script::Builder;
use bitcoin::script::PushBytesBuf;
use bitcoin::{Address, Network, ScriptBuf, Transaction};
use serde::{Deserialize, Serialize};

use crate::models::{Secret, SecretHash};

/// Estimated virtual size of a secret-path spend.
pub const REDEEM_TX_VBYTES: u64 = 150;
/// Estimated virtual size of a timelock-path spend.
pub const REFUND_TX_VBYTES: u64 = 140;

/// Estimated virtual size of a funding transaction.
pub fn funding_tx_vbytes(inputs: usize, outputs: usize) -> u64 {
    68 * inputs as u64 + 34 * outputs as u64 + 10 + 2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcParams {
    pub secret_hash: SecretHash,
    /// 33-byte compressed or 65-byte uncompressed secp256k1 key.
    pub user_pubkey: Vec<u8>,
    pub resolver_pubkey: Vec<u8>,
    /// Absolute Unix-seconds (or block-height) locktime for the refund
    /// path.
    pub timelock: u64,
}

impl HtlcParams {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            matches!(self.user_pubkey.len(), 33 | 65),
            "user pubkey must be 33 or 65 bytes, got {}",
            self.user_pubkey.len()
        );
        anyhow::ensure!(
            matches!(self.resolver_pubkey.len(), 33 | 65),
            "resolver pubkey must be 33 or 65 bytes, got {}",
            self.resolver_pubkey.len()
        );
        anyhow::ensure!(
            self.timelock > 0 && self.timelock < u32::MAX as u64,
            "timelock {} outside valid locktime range",
            self.timelock
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcOutput {
    /// `OP_0 <sha256(witness_script)>`
    pub script_pubkey: Vec<u8>,
    pub address: String,
    pub redeem_script: Vec<u8>,
}

/// Build the witness script for the two spend paths.
pub fn build_witness_script(params: &HtlcParams) -> Result<ScriptBuf> {
    params.validate()?;
    let secret_hash = PushBytesBuf::try_from(params.secret_hash.as_bytes().to_vec())
        .context("secret hash push")?;
    let user_key =
        PushBytesBuf::try_from(params.user_pubkey.clone()).context("user pubkey push")?;
    let resolver_key =
        PushBytesBuf::try_from(params.resolver_pubkey.clone()).context("resolver pubkey push")?;

    let script = Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_SHA256)
        .push_slice(secret_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_slice(user_key)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(params.timelock as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_slice(resolver_key)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .into_script();
    Ok(script)
}

/// Build the full P2WSH output: scriptPubKey, address, and witness
/// script.
pub fn build_htlc_output(params: &HtlcParams, network: Network) -> Result<HtlcOutput> {
    let witness_script = build_witness_script(params)?;
    let script_pubkey = ScriptBuf::new_v0_p2wsh(&witness_script.wscript_hash());
    let address = Address::p2wsh(&witness_script, network);
    Ok(HtlcOutput {
        script_pubkey: script_pubkey.to_bytes(),
        address: address.to_string(),
        redeem_script: witness_script.to_bytes(),
    })
}

/// Witness stack for the secret path: `[signature, secret, 0x01,
/// witness_script]`. The `0x01` selects the IF branch.
pub fn redeem_witness(signature: Vec<u8>, secret: &Secret, witness_script: &[u8]) -> Vec<Vec<u8>> {
    vec![
        signature,
        secret.as_bytes().to_vec(),
        vec![0x01],
        witness_script.to_vec(),
    ]
}

/// Witness stack for the timelock path: `[signature, <empty>,
/// witness_script]`. The empty element selects the ELSE branch.
pub fn refund_witness(signature: Vec<u8>, witness_script: &[u8]) -> Vec<Vec<u8>> {
    vec![signature, Vec::new(), witness_script.to_vec()]
}

/// Scan a redemption transaction for the input spending
/// `redeem_script` and return the 32-byte preimage from its witness.
pub fn extract_secret_from_tx(tx_hex: &str, redeem_script: &[u8]) -> Option<Secret> {
    let raw = hex::decode(tx_hex.trim()).ok()?;
    let tx: Transaction = bitcoin::consensus::encode::deserialize(&raw).ok()?;
    for input in &tx.input {
        let witness: Vec<&[u8]> = input.witness.iter().collect();
        if witness.len() < 3 {
            continue;
        }
        if witness.last().copied() != Some(redeem_script) {
            continue;
        }
        // Stack layout of the secret path puts the preimage second
        let candidate = witness[1];
        if candidate.len() == 32 {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(candidate);
            return Some(Secret::from_bytes(bytes));
        }
    }
    None
}
