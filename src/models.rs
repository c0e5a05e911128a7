//! Core data model shared by every resolver subsystem.
//!
//! Amounts are exact integers in the smallest indivisible unit of a token
//! (wei, satoshis). Floating point is only reachable through
//! [`Amount::to_f64_for_score`], used for margins/confidence/risk scalars.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Non-negative token amount in smallest units (wei on Ethereum, sats on
/// Bitcoin). Serialized as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(units: u128) -> Self {
        Amount(units)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Subtraction floored at zero. Exposure bookkeeping must never go
    /// negative even if release events arrive out of order.
    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn min(self, other: Amount) -> Amount {
        Amount(self.0.min(other.0))
    }

    /// Lossy conversion for score/ratio math only. Never feed the result
    /// back into amount arithmetic.
    pub fn to_f64_for_score(&self) -> f64 {
        self.0 as f64
    }

    /// Whole-token value given the token's decimals, for pricing math.
    pub fn to_tokens_for_score(&self, decimals: u8) -> f64 {
        self.0 as f64 / 10f64.powi(decimals as i32)
    }

    /// Convert a USD value into smallest units at `price_usd` per whole
    /// token. Floors toward zero; returns zero for non-positive inputs.
    pub fn from_usd_at_price(usd: f64, price_usd: f64, decimals: u8) -> Amount {
        if usd <= 0.0 || price_usd <= 0.0 {
            return Amount::ZERO;
        }
        let units = (usd / price_usd) * 10f64.powi(decimals as i32);
        Amount(units.floor().max(0.0) as u128)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(Amount)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> de::Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal string or non-negative integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(|_| E::custom("invalid amount string"))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(v as u128))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u128::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom("amount cannot be negative"))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
                Ok(Amount(v))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Closed set of supported chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainId {
    EthereumMainnet,
    EthereumSepolia,
    BitcoinMainnet,
    BitcoinTestnet,
    BitcoinRegtest,
}

impl ChainId {
    pub fn is_bitcoin(&self) -> bool {
        matches!(
            self,
            ChainId::BitcoinMainnet | ChainId::BitcoinTestnet | ChainId::BitcoinRegtest
        )
    }

    pub fn is_ethereum(&self) -> bool {
        !self.is_bitcoin()
    }

    pub fn native_token(&self) -> &'static str {
        if self.is_bitcoin() {
            "btc"
        } else {
            "eth"
        }
    }

    pub fn native_decimals(&self) -> u8 {
        if self.is_bitcoin() {
            8
        } else {
            18
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::EthereumMainnet => "ethereum_mainnet",
            ChainId::EthereumSepolia => "ethereum_sepolia",
            ChainId::BitcoinMainnet => "bitcoin_mainnet",
            ChainId::BitcoinTestnet => "bitcoin_testnet",
            ChainId::BitcoinRegtest => "bitcoin_regtest",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 32-byte hash-lock preimage. Debug output never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Secret(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Secret(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hash(&self) -> SecretHash {
        SecretHash::of(self)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<32 bytes>)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("secret must be exactly 32 bytes"))?;
        Ok(Secret(arr))
    }
}

/// SHA-256 of a [`Secret`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretHash([u8; 32]);

impl SecretHash {
    pub fn of(secret: &Secret) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        SecretHash(digest.into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SecretHash(bytes)
    }

    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("secret hash must be exactly 32 bytes"))?;
        Ok(SecretHash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for SecretHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SecretHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SecretHash::from_hex(&s).map_err(de::Error::custom)
    }
}

/// True iff `SHA-256(secret) == hash`.
pub fn validate_secret(secret: &Secret, hash: &SecretHash) -> bool {
    &secret.hash() == hash
}

/// One leg of a swap: a chain plus the token traded on it. Token addresses
/// are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainRef {
    pub chain_id: ChainId,
    pub token: String,
}

impl ChainRef {
    pub fn new(chain_id: ChainId, token: &str) -> Self {
        ChainRef {
            chain_id,
            token: token.to_lowercase(),
        }
    }

    pub fn native(chain_id: ChainId) -> Self {
        ChainRef {
            chain_id,
            token: chain_id.native_token().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwapAmounts {
    pub source: Amount,
    pub destination: Amount,
}

/// Absolute Unix-second deadlines for each refund path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwapTimelocks {
    pub source: u64,
    pub destination: u64,
}

/// Order lifecycle as published by the relayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Created,
    AuctionStarted,
    ResolverSelected,
    SourceFunded,
    DestinationFunded,
    BothFunded,
    Completed,
    Failed,
    Refunded,
    Expired,
}

impl SwapStatus {
    /// Statuses during which the resolver carries exposure for the order.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SwapStatus::AuctionStarted
                | SwapStatus::ResolverSelected
                | SwapStatus::SourceFunded
                | SwapStatus::DestinationFunded
                | SwapStatus::BothFunded
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Refunded | SwapStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Created => "created",
            SwapStatus::AuctionStarted => "auction_started",
            SwapStatus::ResolverSelected => "resolver_selected",
            SwapStatus::SourceFunded => "source_funded",
            SwapStatus::DestinationFunded => "destination_funded",
            SwapStatus::BothFunded => "both_funded",
            SwapStatus::Completed => "completed",
            SwapStatus::Failed => "failed",
            SwapStatus::Refunded => "refunded",
            SwapStatus::Expired => "expired",
        }
    }
}

/// The shared cross-chain order record. Treated as immutable input:
/// executed transactions and revealed secrets live on the execution record,
/// never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainSwapState {
    pub order_id: String,
    /// Counterparty address on the source side.
    pub maker: String,
    pub source_chain: ChainRef,
    pub destination_chain: ChainRef,
    pub amounts: SwapAmounts,
    pub timelocks: SwapTimelocks,
    pub secret_hash: SecretHash,
    pub status: SwapStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
}

impl CrossChainSwapState {
    /// Structural checks every order must pass before participation.
    ///
    /// The source refund path must open strictly later than the
    /// destination one (plus a configured safety gap), so whichever side
    /// the resolver funds first can always be recovered before the
    /// counterparty's refund window opens.
    pub fn validation_errors(&self, timelock_safety_gap_secs: u64) -> Vec<String> {
        let mut errors = Vec::new();

        if self.amounts.source.is_zero() || self.amounts.destination.is_zero() {
            errors.push("order amounts must both be positive".to_string());
        }
        if self.timelocks.source <= self.timelocks.destination + timelock_safety_gap_secs {
            errors.push(format!(
                "timelock ordering violated: source {} must exceed destination {} by more than {}s",
                self.timelocks.source, self.timelocks.destination, timelock_safety_gap_secs
            ));
        }
        if self.source_chain.chain_id == self.destination_chain.chain_id {
            errors.push("source and destination chain must differ".to_string());
        }
        if self.maker.trim().is_empty() {
            errors.push("maker address is empty".to_string());
        }

        errors
    }

    pub fn validate(&self, timelock_safety_gap_secs: u64) -> anyhow::Result<()> {
        let errors = self.validation_errors(timelock_safety_gap_secs);
        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid order {}: {}", self.order_id, errors.join("; "))
        }
    }

    /// The leg settled on a Bitcoin-family chain, if any.
    pub fn bitcoin_leg(&self) -> Option<EscrowSide> {
        if self.source_chain.chain_id.is_bitcoin() {
            Some(EscrowSide::Source)
        } else if self.destination_chain.chain_id.is_bitcoin() {
            Some(EscrowSide::Destination)
        } else {
            None
        }
    }

    pub fn chain_ref(&self, side: EscrowSide) -> &ChainRef {
        match side {
            EscrowSide::Source => &self.source_chain,
            EscrowSide::Destination => &self.destination_chain,
        }
    }

    pub fn amount(&self, side: EscrowSide) -> Amount {
        match side {
            EscrowSide::Source => self.amounts.source,
            EscrowSide::Destination => self.amounts.destination,
        }
    }

    pub fn timelock(&self, side: EscrowSide) -> u64 {
        match side {
            EscrowSide::Source => self.timelocks.source,
            EscrowSide::Destination => self.timelocks.destination,
        }
    }
}

/// Which side of the swap a chain operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowSide {
    Source,
    Destination,
}

impl EscrowSide {
    pub fn other(&self) -> EscrowSide {
        match self {
            EscrowSide::Source => EscrowSide::Destination,
            EscrowSide::Destination => EscrowSide::Source,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowSide::Source => "source",
            EscrowSide::Destination => "destination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A transaction the resolver submitted to either chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedTransaction {
    pub chain_id: ChainId,
    pub tx_hash: String,
    pub block_height: Option<u64>,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub status: TxStatus,
    pub fee: Amount,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl ExecutedTransaction {
    pub fn pending(chain_id: ChainId, tx_hash: String, required_confirmations: u32) -> Self {
        ExecutedTransaction {
            chain_id,
            tx_hash,
            block_height: None,
            confirmations: 0,
            required_confirmations,
            status: TxStatus::Pending,
            fee: Amount::ZERO,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed && self.confirmations >= self.required_confirmations
    }
}

pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order(source_timelock: u64, dest_timelock: u64) -> CrossChainSwapState {
        CrossChainSwapState {
            order_id: "order-1".to_string(),
            maker: "0xmaker".to_string(),
            source_chain: ChainRef::native(ChainId::EthereumMainnet),
            destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
            amounts: SwapAmounts {
                source: Amount::new(1_000_000_000_000_000_000),
                destination: Amount::new(4_000_000),
            },
            timelocks: SwapTimelocks {
                source: source_timelock,
                destination: dest_timelock,
            },
            secret_hash: Secret::from_bytes([0u8; 32]).hash(),
            status: SwapStatus::AuctionStarted,
            secret: None,
        }
    }

    #[test]
    fn amount_round_trips_as_decimal_string() {
        let amount = Amount::new(1_000_000_000_000_000_000);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn amount_usd_conversion_floors() {
        // $50 of BTC at $50k/BTC = 0.001 BTC = 100_000 sats
        let sats = Amount::from_usd_at_price(50.0, 50_000.0, 8);
        assert_eq!(sats, Amount::new(100_000));
        assert_eq!(Amount::from_usd_at_price(-1.0, 50_000.0, 8), Amount::ZERO);
    }

    #[test]
    fn secret_hash_round_trip() {
        let secret = Secret::generate();
        let hash = secret.hash();
        assert!(validate_secret(&secret, &hash));
        let other = Secret::generate();
        assert!(!validate_secret(&other, &hash));
    }

    #[test]
    fn known_secret_hash_vector() {
        // SHA-256 of 32 zero bytes
        let secret = Secret::from_bytes([0u8; 32]);
        assert_eq!(
            secret.hash().to_string(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn timelock_ordering_enforced() {
        let now = unix_now();
        let ok = sample_order(now + 7200, now + 3600);
        assert!(ok.validation_errors(1800).is_empty());

        // Equal timelocks: destination refund would not open first
        let bad = sample_order(now + 7200, now + 7200);
        let errors = bad.validation_errors(1800);
        assert!(errors.iter().any(|e| e.contains("timelock ordering")));

        // Gap present but inside the safety margin
        let tight = sample_order(now + 7200, now + 7200 - 600);
        assert!(!tight.validation_errors(1800).is_empty());
    }

    #[test]
    fn zero_amounts_rejected() {
        let mut order = sample_order(unix_now() + 7200, unix_now() + 3600);
        order.amounts.source = Amount::ZERO;
        assert!(!order.validation_errors(0).is_empty());
    }

    #[test]
    fn bitcoin_leg_detection() {
        let order = sample_order(unix_now() + 7200, unix_now() + 3600);
        assert_eq!(order.bitcoin_leg(), Some(EscrowSide::Destination));
        assert!(ChainId::BitcoinRegtest.is_bitcoin());
        assert!(!ChainId::EthereumMainnet.is_bitcoin());
        assert_eq!(ChainId::EthereumMainnet.native_decimals(), 18);
        assert_eq!(ChainId::BitcoinMainnet.native_decimals(), 8);
    }
}
