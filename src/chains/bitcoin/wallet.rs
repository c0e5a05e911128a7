//! Bitcoin transaction assembly and signing.
//!
//! Builds and signs the three transactions of the HTLC lifecycle: funding
//! (wallet P2WPKH inputs into the HTLC output), redemption (secret path),
//! and refund (timelock path with CLTV). The wallet key is a raw secp256k1
//! private key; wallet UTXOs are assumed to be P2WPKH outputs of that key.

use anyhow::{bail, Context, Result};
use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Address, Network, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::str::FromStr;

use crate::models::{Amount, Secret};

use super::htlc::{
    funding_tx_vbytes, redeem_witness, refund_witness, HtlcOutput, REDEEM_TX_VBYTES,
    REFUND_TX_VBYTES,
};
use crate::chains::Utxo;

/// Minimum change worth keeping; smaller remainders fold into the fee.
const DUST_LIMIT_SATS: u64 = 546;

pub struct WalletKey {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl WalletKey {
    /// Parse a 32-byte hex private key; the public key is compressed.
    pub fn from_hex(private_key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(private_key_hex.trim().trim_start_matches("0x"))
            .context("private key is not valid hex")?;
        let secret = SecretKey::from_slice(&bytes).context("invalid secp256k1 private key")?;
        let secp = Secp256k1::new();
        let public = PublicKey::new(secret.public_key(&secp));
        Ok(WalletKey { secret, public })
    }

    pub fn p2wpkh_address(&self, network: Network) -> Result<Address> {
        Address::p2wpkh(&self.public, network).context("key is not compressed")
    }

    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public.to_bytes()
    }
}

/// Pick UTXOs (largest first) covering `amount` plus the funding fee at
/// `fee_rate` sat/vbyte. Returns the selection and the fee it implies.
pub fn select_utxos(utxos: &[Utxo], amount: Amount, fee_rate: u64) -> Result<(Vec<Utxo>, Amount)> {
    let mut sorted: Vec<Utxo> = utxos.to_vec();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total = Amount::ZERO;
    for utxo in sorted {
        selected.push(utxo.clone());
        total = total.saturating_add(utxo.value);
        let fee = Amount::new((funding_tx_vbytes(selected.len(), 2) * fee_rate) as u128);
        if total >= amount.saturating_add(fee) {
            return Ok((selected, fee));
        }
    }
    bail!(
        "insufficient funds: {} available, {} required before fees",
        total,
        amount
    )
}

fn to_sats(amount: Amount) -> Result<u64> {
    u64::try_from(amount.as_u128()).context("amount exceeds 21M BTC in sats")
}

fn parse_txid(tx_hash: &str) -> Result<Txid> {
    Txid::from_str(tx_hash.trim()).with_context(|| format!("invalid txid {}", tx_hash))
}

fn parse_address(address: &str, network: Network) -> Result<Address> {
    Address::from_str(address)
        .with_context(|| format!("invalid address {}", address))?
        .require_network(network)
        .with_context(|| format!("address {} is for another network", address))
}

fn sign_input(
    secp: &Secp256k1<All>,
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    script_code: &ScriptBuf,
    value_sats: u64,
    key: &SecretKey,
) -> Result<Vec<u8>> {
    let sighash = cache
        .segwit_signature_hash(index, script_code, value_sats, EcdsaSighashType::All)
        .context("sighash computation failed")?;
    let message = Message::from_slice(sighash.as_ref()).context("sighash is not 32 bytes")?;
    let signature = secp.sign_ecdsa(&message, key);
    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(EcdsaSighashType::All as u8);
    Ok(bytes)
}

/// Assemble and sign the funding transaction: selected wallet UTXOs in,
/// the HTLC output at index 0, change (if above dust) back to the wallet.
pub fn build_funding_transaction(
    htlc: &HtlcOutput,
    amount: Amount,
    utxos: &[Utxo],
    key: &WalletKey,
    change_address: &str,
    fee_rate: u64,
    network: Network,
) -> Result<(Transaction, Amount)> {
    anyhow::ensure!(!utxos.is_empty(), "no UTXOs supplied for funding");
    let change = parse_address(change_address, network)?;

    let fee = Amount::new((funding_tx_vbytes(utxos.len(), 2) * fee_rate) as u128);
    let total_in: Amount = utxos
        .iter()
        .fold(Amount::ZERO, |acc, u| acc.saturating_add(u.value));
    let needed = amount.saturating_add(fee);
    anyhow::ensure!(
        total_in >= needed,
        "selected UTXOs cover {} but {} is needed",
        total_in,
        needed
    );

    let input: Vec<TxIn> = utxos
        .iter()
        .map(|utxo| {
            Ok(TxIn {
                previous_output: OutPoint::new(parse_txid(&utxo.txid)?, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
        })
        .collect::<Result<_>>()?;

    let mut output = vec![TxOut {
        value: to_sats(amount)?,
        script_pubkey: ScriptBuf::from(htlc.script_pubkey.clone()),
    }];
    let change_sats = to_sats(total_in.saturating_sub(needed))?;
    if change_sats >= DUST_LIMIT_SATS {
        output.push(TxOut {
            value: change_sats,
            script_pubkey: change.script_pubkey(),
        });
    }

    let mut tx = Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    // P2WPKH signing: the script code is the key's P2PKH script
    let secp = Secp256k1::new();
    let script_code = ScriptBuf::new_p2pkh(&key.public.pubkey_hash());
    let signatures: Vec<Vec<u8>> = {
        let mut cache = SighashCache::new(&tx);
        utxos
            .iter()
            .enumerate()
            .map(|(i, utxo)| {
                sign_input(
                    &secp,
                    &mut cache,
                    i,
                    &script_code,
                    to_sats(utxo.value)?,
                    &key.secret,
                )
            })
            .collect::<Result<_>>()?
    };
    for (txin, signature) in tx.input.iter_mut().zip(signatures) {
        let mut witness = Witness::new();
        witness.push(&signature);
        witness.push(key.pubkey_bytes());
        txin.witness = witness;
    }

    Ok((tx, fee))
}

/// Spend the HTLC through the secret path to `dest_address`. The preimage
/// lands in the witness, which is what reveals it on-chain.
pub fn build_redeem_transaction(
    funding_tx_hash: &str,
    htlc: &HtlcOutput,
    htlc_value: Amount,
    secret: &Secret,
    key: &WalletKey,
    dest_address: &str,
    fee_rate: u64,
    network: Network,
) -> Result<(Transaction, Amount)> {
    let dest = parse_address(dest_address, network)?;
    let fee = Amount::new((REDEEM_TX_VBYTES * fee_rate) as u128);
    let payout = htlc_value
        .checked_sub(fee)
        .context("HTLC value does not cover the redeem fee")?;

    let mut tx = Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(parse_txid(funding_tx_hash)?, 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: to_sats(payout)?,
            script_pubkey: dest.script_pubkey(),
        }],
    };

    let witness_script = ScriptBuf::from(htlc.redeem_script.clone());
    let secp = Secp256k1::new();
    let signature = {
        let mut cache = SighashCache::new(&tx);
        sign_input(
            &secp,
            &mut cache,
            0,
            &witness_script,
            to_sats(htlc_value)?,
            &key.secret,
        )?
    };

    let mut witness = Witness::new();
    for item in redeem_witness(signature, secret, &htlc.redeem_script) {
        witness.push(&item);
    }
    tx.input[0].witness = witness;

    Ok((tx, fee))
}

/// Spend the HTLC through the timelock path. The transaction locktime is
/// set to the HTLC timelock and the input sequence is lowered so
/// OP_CHECKLOCKTIMEVERIFY is enforced.
pub fn build_refund_transaction(
    funding_tx_hash: &str,
    htlc: &HtlcOutput,
    htlc_value: Amount,
    timelock: u64,
    key: &WalletKey,
    dest_address: &str,
    fee_rate: u64,
    network: Network,
) -> Result<(Transaction, Amount)> {
    anyhow::ensure!(
        timelock > 0 && timelock < u32::MAX as u64,
        "timelock {} outside valid locktime range",
        timelock
    );
    let dest = parse_address(dest_address, network)?;
    let fee = Amount::new((REFUND_TX_VBYTES * fee_rate) as u128);
    let payout = htlc_value
        .checked_sub(fee)
        .context("HTLC value does not cover the refund fee")?;

    let mut tx = Transaction {
        version: 2,
        lock_time: LockTime::from_consensus(timelock as u32),
        input: vec![TxIn {
            previous_output: OutPoint::new(parse_txid(funding_tx_hash)?, 0),
            script_sig: ScriptBuf::new(),
            // Any value below 0xFFFFFFFF enables locktime enforcement
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: to_sats(payout)?,
            script_pubkey: dest.script_pubkey(),
        }],
    };

    let witness_script = ScriptBuf::from(htlc.redeem_script.clone());
    let secp = Secp256k1::new();
    let signature = {
        let mut cache = SighashCache::new(&tx);
        sign_input(
            &secp,
            &mut cache,
            0,
            &witness_script,
            to_sats(htlc_value)?,
            &key.secret,
        )?
    };

    let mut witness = Witness::new();
    for item in refund_witness(signature, &htlc.redeem_script) {
        witness.push(&item);
    }
    tx.input[0].witness = witness;

    Ok((tx, fee))
}

pub fn tx_hex(tx: &Transaction) -> String {
    bitcoin::consensus::encode::serialize_hex(tx)
}
