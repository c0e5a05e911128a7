//! Resolver configuration.
//!
//! Loaded from a TOML file, with environment variables overriding the
//! operationally sensitive values (relayer URL, addresses, keys). Every
//! section has working defaults so the bot can boot in dry-run mode with no
//! config file at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::Amount;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub relayer_url: String,
    pub resolver_address: String,
    /// Seconds a submitted bid stays valid.
    pub bid_timeout_secs: u64,
    pub max_concurrent_auctions: usize,
    pub bidding_strategies: Vec<BiddingStrategyConfig>,
    pub monitoring: MonitoringConfig,
    pub networking: NetworkingConfig,
    pub strategy: StrategyEngineConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    /// When set, chain clients are replaced by deterministic in-process
    /// implementations and nothing touches a real node.
    pub dry_run: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            relayer_url: "http://127.0.0.1:3000".to_string(),
            resolver_address: "0x0000000000000000000000000000000000000000".to_string(),
            bid_timeout_secs: 300,
            max_concurrent_auctions: 5,
            bidding_strategies: vec![BiddingStrategyConfig::default()],
            monitoring: MonitoringConfig::default(),
            networking: NetworkingConfig::default(),
            strategy: StrategyEngineConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            dry_run: true,
        }
    }
}

impl ResolverConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?
            }
            None => ResolverConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("RELAYER_URL") {
            self.relayer_url = url;
        }
        if let Ok(addr) = std::env::var("RESOLVER_ADDRESS") {
            self.resolver_address = addr;
        }
        if let Ok(url) = std::env::var("ETHEREUM_RPC_URL") {
            self.execution.ethereum.rpc_url = url;
        }
        if let Ok(key) = std::env::var("ETHEREUM_PRIVATE_KEY") {
            self.execution.ethereum.private_key = key;
        }
        if let Ok(url) = std::env::var("BITCOIN_RPC_URL") {
            self.execution.bitcoin.rpc_url = url;
        }
        if let Ok(user) = std::env::var("BITCOIN_RPC_USER") {
            self.execution.bitcoin.rpc_user = user;
        }
        if let Ok(pass) = std::env::var("BITCOIN_RPC_PASSWORD") {
            self.execution.bitcoin.rpc_password = pass;
        }
        if let Ok(key) = std::env::var("BITCOIN_PRIVATE_KEY") {
            self.execution.bitcoin.private_key = key;
        }
        if let Ok(v) = std::env::var("DRY_RUN") {
            self.dry_run = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_concurrent_auctions > 0,
            "max_concurrent_auctions must be positive"
        );
        anyhow::ensure!(
            self.bidding_strategies.iter().any(|s| s.enabled),
            "at least one bidding strategy must be enabled"
        );
        anyhow::ensure!(
            self.strategy.strategies.iter().any(|s| s.enabled),
            "at least one analysis strategy must be enabled"
        );
        anyhow::ensure!(
            !self.relayer_url.trim().is_empty(),
            "relayer_url must not be empty"
        );
        Ok(())
    }
}

/// Timing of a bid relative to auction progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStrategy {
    Early,
    Middle,
    Late,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiddingStrategyConfig {
    pub name: String,
    pub enabled: bool,
    /// Higher priority strategies are considered first.
    pub priority: u32,
    pub params: BiddingParams,
}

impl Default for BiddingStrategyConfig {
    fn default() -> Self {
        BiddingStrategyConfig {
            name: "balanced".to_string(),
            enabled: true,
            priority: 10,
            params: BiddingParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiddingParams {
    /// Hard cap on any single bid, in destination-chain smallest units.
    pub max_bid_price: Amount,
    /// Minimum acceptable profit margin in percent.
    pub min_profit_margin: f64,
    /// 0..1, scales how far above the current Dutch price we bid.
    pub aggressiveness: f64,
    /// Fraction of available liquidity a single order may consume.
    pub reserve_ratio: f64,
    pub time_strategy: TimeStrategy,
    /// Maximum tolerated risk score (0..100).
    pub risk_tolerance: f64,
}

impl Default for BiddingParams {
    fn default() -> Self {
        BiddingParams {
            max_bid_price: Amount::new(u64::MAX as u128),
            min_profit_margin: 1.0,
            aggressiveness: 0.5,
            reserve_ratio: 0.5,
            time_strategy: TimeStrategy::Dynamic,
            risk_tolerance: 70.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub poll_interval_ms: u64,
    pub price_update_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            poll_interval_ms: 5_000,
            price_update_interval_ms: 2_000,
            reconnect_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkingConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        NetworkingConfig {
            max_retries: 3,
            retry_delay_ms: 1_000,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyEngineConfig {
    pub strategies: Vec<StrategyConfig>,
    pub default_gas_estimates: GasEstimateConfig,
    pub update_interval_ms: u64,
    pub max_analysis_time_ms: u64,
}

impl Default for StrategyEngineConfig {
    fn default() -> Self {
        StrategyEngineConfig {
            strategies: vec![
                StrategyConfig::named("market_making", 1.0),
                StrategyConfig::named("arbitrage", 1.0),
                StrategyConfig::named("risk_averse", 0.5),
            ],
            default_gas_estimates: GasEstimateConfig::default(),
            update_interval_ms: 30_000,
            max_analysis_time_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub name: String,
    pub enabled: bool,
    /// Ensemble weight; normalized over the enabled set.
    pub weight: f64,
    pub params: StrategyParams,
}

impl StrategyConfig {
    pub fn named(name: &str, weight: f64) -> Self {
        StrategyConfig {
            name: name.to_string(),
            enabled: true,
            weight,
            params: StrategyParams::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::named("market_making", 1.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Minimum acceptable profit margin, percent.
    pub min_profit_margin: f64,
    /// Maximum tolerated risk score, 0..100.
    pub max_risk_score: f64,
    /// Minimum ensemble confidence for an accept, 0..1.
    pub confidence_threshold: f64,
    /// Multiplier applied to gas estimates as a safety cushion.
    pub gas_buffer: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            min_profit_margin: 0.5,
            max_risk_score: 75.0,
            confidence_threshold: 0.5,
            gas_buffer: 1.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GasEstimateConfig {
    /// Estimated total Ethereum-side fee in wei.
    pub ethereum_wei: Amount,
    /// Estimated total Bitcoin-side fee in sats.
    pub bitcoin_sats: Amount,
}

impl Default for GasEstimateConfig {
    fn default() -> Self {
        GasEstimateConfig {
            ethereum_wei: Amount::new(3_000_000_000_000_000), // ~0.003 ETH
            bitcoin_sats: Amount::new(5_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub profile: RiskProfile,
    pub circuit_breakers: Vec<CircuitBreakerConfig>,
    pub volatility_thresholds: VolatilityThresholds,
    pub position_sizing: PositionSizingConfig,
    /// Minimum seconds the source timelock must exceed the destination one.
    pub timelock_safety_gap_secs: u64,
    /// Utilization ratio at which an exposure alert event fires.
    pub exposure_alert_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            profile: RiskProfile::default(),
            circuit_breakers: vec![
                CircuitBreakerConfig {
                    name: "chain_exposure".to_string(),
                    enabled: true,
                    condition: BreakerConditionConfig {
                        kind: "exposure_threshold".to_string(),
                        threshold: 0.9,
                        time_window_secs: 300,
                    },
                    action: BreakerActionConfig {
                        kind: "reduce_limits".to_string(),
                        duration_secs: 600,
                        reduction_factor: 0.5,
                    },
                },
                CircuitBreakerConfig {
                    name: "assessment_error_rate".to_string(),
                    enabled: true,
                    condition: BreakerConditionConfig {
                        kind: "error_rate".to_string(),
                        threshold: 0.8,
                        time_window_secs: 600,
                    },
                    action: BreakerActionConfig {
                        kind: "pause".to_string(),
                        duration_secs: 300,
                        reduction_factor: 0.5,
                    },
                },
            ],
            volatility_thresholds: VolatilityThresholds::default(),
            position_sizing: PositionSizingConfig::default(),
            timelock_safety_gap_secs: 1_800,
            exposure_alert_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskProfile {
    /// Per-chain exposure ceiling, smallest units of the chain's asset.
    pub max_exposure_per_chain: Amount,
    pub max_exposure_per_token: Amount,
    pub max_single_order_size: Amount,
    /// Daily completed volume ceiling, source-asset smallest units.
    pub max_daily_volume: Amount,
    pub max_concurrent_orders: usize,
    pub allowed_counterparties: Vec<String>,
    pub blocked_counterparties: Vec<String>,
    /// 0..100
    pub min_confidence_score: f64,
    /// 0..100
    pub max_risk_score: f64,
    pub max_exposure_per_counterparty: Amount,
}

impl Default for RiskProfile {
    fn default() -> Self {
        RiskProfile {
            max_exposure_per_chain: Amount::new(10_000_000_000_000_000_000), // 10 ETH
            max_exposure_per_token: Amount::new(10_000_000_000_000_000_000),
            max_single_order_size: Amount::new(5_000_000_000_000_000_000),
            max_daily_volume: Amount::new(50_000_000_000_000_000_000),
            max_concurrent_orders: 10,
            allowed_counterparties: Vec::new(),
            blocked_counterparties: Vec::new(),
            min_confidence_score: 30.0,
            max_risk_score: 80.0,
            max_exposure_per_counterparty: Amount::new(5_000_000_000_000_000_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub enabled: bool,
    pub condition: BreakerConditionConfig,
    pub action: BreakerActionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConditionConfig {
    /// One of: exposure_threshold, volume_spike, error_rate,
    /// market_volatility, confidence_drop.
    pub kind: String,
    pub threshold: f64,
    pub time_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerActionConfig {
    /// One of: pause, reduce_limits, alert, emergency_stop.
    pub kind: String,
    pub duration_secs: u64,
    pub reduction_factor: f64,
}

impl Default for BreakerActionConfig {
    fn default() -> Self {
        BreakerActionConfig {
            kind: "alert".to_string(),
            duration_secs: 300,
            reduction_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for VolatilityThresholds {
    fn default() -> Self {
        VolatilityThresholds {
            low: 0.02,
            medium: 0.05,
            high: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSizingConfig {
    pub base_size: Amount,
    pub max_size: Amount,
    pub confidence_multiplier: f64,
    pub risk_divisor: f64,
}

impl Default for PositionSizingConfig {
    fn default() -> Self {
        PositionSizingConfig {
            base_size: Amount::new(1_000_000_000_000_000_000),
            max_size: Amount::new(5_000_000_000_000_000_000),
            confidence_multiplier: 1.0,
            risk_divisor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub ethereum: EthereumConfig,
    pub bitcoin: BitcoinConfig,
    pub execution: ExecutionTuning,
    pub monitoring: ExecutionMonitoring,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            ethereum: EthereumConfig::default(),
            bitcoin: BitcoinConfig::default(),
            execution: ExecutionTuning::default(),
            monitoring: ExecutionMonitoring::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthereumConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: String,
    pub gas_limit: u64,
    /// Wei per gas unit.
    pub gas_price: Amount,
    pub confirmations: u32,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        EthereumConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 1,
            private_key: String::new(),
            gas_limit: 300_000,
            gas_price: Amount::new(20_000_000_000),
            confirmations: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    /// One of: mainnet, testnet, regtest.
    pub network: String,
    /// 32-byte hex secp256k1 private key.
    pub private_key: String,
    /// Sats per vbyte.
    pub fee_rate: u64,
    pub confirmations: u32,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        BitcoinConfig {
            rpc_url: "http://127.0.0.1:18443".to_string(),
            rpc_user: "bitcoin".to_string(),
            rpc_password: "password".to_string(),
            network: "regtest".to_string(),
            private_key: String::new(),
            fee_rate: 10,
            confirmations: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionTuning {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: f64,
    pub transaction_timeout_secs: u64,
    /// Safety window between both fundings confirming and the secret
    /// reveal going out.
    pub secret_reveal_delay_secs: u64,
    pub max_concurrent_executions: usize,
}

impl Default for ExecutionTuning {
    fn default() -> Self {
        ExecutionTuning {
            max_retries: 3,
            retry_delay_ms: 2_000,
            retry_backoff: 2.0,
            transaction_timeout_secs: 600,
            secret_reveal_delay_secs: 5,
            max_concurrent_executions: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionMonitoring {
    pub poll_interval_ms: u64,
    pub confirmation_threshold: u32,
    pub stale_transaction_timeout_secs: u64,
}

impl Default for ExecutionMonitoring {
    fn default() -> Self {
        ExecutionMonitoring {
            poll_interval_ms: 2_000,
            confirmation_threshold: 6,
            stale_transaction_timeout_secs: 3_600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.dry_run);
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            relayer_url = "http://relayer.example:3000"
            max_concurrent_auctions = 3

            [risk.profile]
            max_concurrent_orders = 4

            [[bidding_strategies]]
            name = "sniper"
            enabled = true
            priority = 20

            [bidding_strategies.params]
            time_strategy = "late"
            aggressiveness = 0.9
        "#;
        let config: ResolverConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.relayer_url, "http://relayer.example:3000");
        assert_eq!(config.max_concurrent_auctions, 3);
        assert_eq!(config.risk.profile.max_concurrent_orders, 4);
        assert_eq!(config.bidding_strategies[0].name, "sniper");
        assert_eq!(
            config.bidding_strategies[0].params.time_strategy,
            TimeStrategy::Late
        );
        // Untouched sections keep defaults
        assert_eq!(config.networking.max_retries, 3);
    }

    #[test]
    fn rejects_config_without_enabled_strategies() {
        let mut config = ResolverConfig::default();
        for s in &mut config.bidding_strategies {
            s.enabled = false;
        }
        assert!(config.validate().is_err());
    }
}
