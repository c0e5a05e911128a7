//! Profitability analysis engine.
//!
//! Runs every enabled strategy over an order and combines their outputs
//! into one weighted ensemble recommendation. A strategy that errors is
//! logged and skipped; analysis succeeds as long as one strategy
//! completes.

pub mod arbitrage;
pub mod market_making;
pub mod risk_averse;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{GasEstimateConfig, StrategyEngineConfig, StrategyParams};
use crate::market_data::{MarketData, MarketDataCache};
use crate::models::{Amount, ChainId, CrossChainSwapState};

pub use arbitrage::ArbitrageStrategy;
pub use market_making::MarketMakingStrategy;
pub use risk_averse::RiskAverseStrategy;

/// Confidence half-life for aging market data, seconds.
pub(crate) const DATA_AGE_HALF_LIFE_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Reject,
    Monitor,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasEstimate {
    /// Ethereum-side fee estimate in wei.
    pub ethereum: Amount,
    /// Bitcoin-side fee estimate in sats.
    pub bitcoin: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitabilityAnalysis {
    pub order_id: String,
    pub strategy: String,
    pub expected_profit_usd: f64,
    /// Percent of order notional.
    pub profit_margin: f64,
    /// 0..100, higher is riskier.
    pub risk_score: f64,
    /// 0..1
    pub confidence: f64,
    pub gas_estimate: GasEstimate,
    pub net_profit_usd: f64,
    /// Destination-asset USD price at which the order breaks even.
    pub break_even_price: f64,
    pub recommendation: Recommendation,
    pub reasoning: Vec<String>,
}

/// A pure analysis strategy: order + market snapshots in, analysis out.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn weight(&self) -> f64;
    fn params(&self) -> &StrategyParams;
    fn analyze(
        &self,
        order: &CrossChainSwapState,
        src_md: Option<&MarketData>,
        dst_md: Option<&MarketData>,
    ) -> Result<ProfitabilityAnalysis>;
}

pub struct StrategyEngine {
    strategies: Vec<Box<dyn Strategy>>,
    market_data: Arc<MarketDataCache>,
    gas_estimates: GasEstimateConfig,
}

impl StrategyEngine {
    pub fn new(config: &StrategyEngineConfig, market_data: Arc<MarketDataCache>) -> Self {
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        for entry in config.strategies.iter().filter(|s| s.enabled) {
            match entry.name.as_str() {
                "market_making" => strategies.push(Box::new(MarketMakingStrategy::new(
                    entry.weight,
                    entry.params,
                    config.default_gas_estimates,
                ))),
                "arbitrage" => strategies.push(Box::new(ArbitrageStrategy::new(
                    entry.weight,
                    entry.params,
                    config.default_gas_estimates,
                ))),
                "risk_averse" => strategies.push(Box::new(RiskAverseStrategy::new(
                    entry.weight,
                    entry.params,
                    config.default_gas_estimates,
                ))),
                other => warn!(strategy = other, "unknown analysis strategy in config, skipping"),
            }
        }
        StrategyEngine {
            strategies,
            market_data,
            gas_estimates: config.default_gas_estimates,
        }
    }

    /// Run every enabled strategy and combine the survivors into one
    /// weighted analysis.
    pub fn analyze(&self, order: &CrossChainSwapState) -> Result<ProfitabilityAnalysis> {
        let src_md = self
            .market_data
            .get(order.source_chain.chain_id, &order.source_chain.token);
        let dst_md = self.market_data.get(
            order.destination_chain.chain_id,
            &order.destination_chain.token,
        );

        let mut results: Vec<(f64, ProfitabilityAnalysis)> = Vec::new();
        for strategy in &self.strategies {
            match strategy.analyze(order, src_md.as_ref(), dst_md.as_ref()) {
                Ok(analysis) => {
                    debug!(
                        order_id = %order.order_id,
                        strategy = strategy.name(),
                        profit = analysis.expected_profit_usd,
                        risk = analysis.risk_score,
                        "strategy analysis complete"
                    );
                    results.push((strategy.weight().max(0.0), analysis));
                }
                Err(e) => {
                    warn!(
                        order_id = %order.order_id,
                        strategy = strategy.name(),
                        error = %e,
                        "strategy failed, skipping"
                    );
                }
            }
        }

        anyhow::ensure!(
            !results.is_empty(),
            "no analysis strategy completed for order {}",
            order.order_id
        );

        let total_weight: f64 = results.iter().map(|(w, _)| w).sum();
        anyhow::ensure!(total_weight > 0.0, "all strategy weights are zero");

        let mut expected_profit = 0.0;
        let mut margin = 0.0;
        let mut risk = 0.0;
        let mut confidence = 0.0;
        let mut reasoning = Vec::new();
        for (weight, analysis) in &results {
            let w = weight / total_weight;
            expected_profit += w * analysis.expected_profit_usd;
            margin += w * analysis.profit_margin;
            risk += w * analysis.risk_score;
            confidence += w * analysis.confidence;
            reasoning.push(format!(
                "{}: profit ${:.2}, margin {:.2}%, risk {:.0}, confidence {:.2}",
                analysis.strategy,
                analysis.expected_profit_usd,
                analysis.profit_margin,
                analysis.risk_score,
                analysis.confidence
            ));
        }

        let gas_cost_usd = self
            .total_gas_cost_usd(order, src_md.as_ref(), dst_md.as_ref())
            .context("failed to price gas cost")?;
        let net_profit = expected_profit - gas_cost_usd;

        // Thresholds come from the strictest of the enabled strategies.
        let min_margin = self
            .strategies
            .iter()
            .map(|s| s.params().min_profit_margin)
            .fold(f64::INFINITY, f64::min);
        let max_risk = self
            .strategies
            .iter()
            .map(|s| s.params().max_risk_score)
            .fold(f64::NEG_INFINITY, f64::max);
        let min_confidence = self
            .strategies
            .iter()
            .map(|s| s.params().confidence_threshold)
            .fold(f64::INFINITY, f64::min);

        let recommendation = recommend(
            net_profit,
            margin,
            risk,
            confidence,
            min_margin,
            max_risk,
            min_confidence,
            &mut reasoning,
        );

        let break_even = results
            .first()
            .map(|(_, a)| a.break_even_price)
            .unwrap_or(0.0);

        Ok(ProfitabilityAnalysis {
            order_id: order.order_id.clone(),
            strategy: "ensemble".to_string(),
            expected_profit_usd: expected_profit,
            profit_margin: margin,
            risk_score: risk,
            confidence,
            gas_estimate: GasEstimate {
                ethereum: self.gas_estimates.ethereum_wei,
                bitcoin: self.gas_estimates.bitcoin_sats,
            },
            net_profit_usd: net_profit,
            break_even_price: break_even,
            recommendation,
            reasoning,
        })
    }

    /// USD value of the estimated fees on both legs, priced from the
    /// current market-data snapshot.
    fn total_gas_cost_usd(
        &self,
        order: &CrossChainSwapState,
        src_md: Option<&MarketData>,
        dst_md: Option<&MarketData>,
    ) -> Result<f64> {
        let price_of = |chain: ChainId| -> f64 {
            let native = chain.native_token();
            let from_leg = [src_md, dst_md].into_iter().flatten().find(|md| {
                md.chain_id.native_token() == native && md.token == native
            });
            if let Some(md) = from_leg {
                return md.price_usd;
            }
            self.market_data
                .get(chain, native)
                .map(|md| md.price_usd)
                .unwrap_or(0.0)
        };

        let eth_chain = if order.source_chain.chain_id.is_ethereum() {
            order.source_chain.chain_id
        } else {
            order.destination_chain.chain_id
        };
        let btc_chain = if order.source_chain.chain_id.is_bitcoin() {
            Some(order.source_chain.chain_id)
        } else if order.destination_chain.chain_id.is_bitcoin() {
            Some(order.destination_chain.chain_id)
        } else {
            None
        };

        let eth_usd = self
            .gas_estimates
            .ethereum_wei
            .to_tokens_for_score(18)
            * price_of(eth_chain);
        let btc_usd = match btc_chain {
            Some(chain) => self.gas_estimates.bitcoin_sats.to_tokens_for_score(8) * price_of(chain),
            None => 0.0,
        };
        Ok(eth_usd + btc_usd)
    }
}

/// Ordered recommendation rules shared by the ensemble and the individual
/// strategies.
#[allow(clippy::too_many_arguments)]
pub(crate) fn recommend(
    net_profit: f64,
    margin: f64,
    risk: f64,
    confidence: f64,
    min_margin: f64,
    max_risk: f64,
    min_confidence: f64,
    reasoning: &mut Vec<String>,
) -> Recommendation {
    if net_profit <= 0.0 {
        reasoning.push(format!("net profit ${:.2} is not positive", net_profit));
        Recommendation::Reject
    } else if margin < min_margin {
        reasoning.push(format!(
            "margin {:.2}% below minimum {:.2}%",
            margin, min_margin
        ));
        Recommendation::Reject
    } else if risk > max_risk {
        reasoning.push(format!("risk {:.0} above maximum {:.0}", risk, max_risk));
        Recommendation::Reject
    } else if confidence < min_confidence {
        reasoning.push(format!(
            "confidence {:.2} below threshold {:.2}, monitoring",
            confidence, min_confidence
        ));
        Recommendation::Monitor
    } else {
        Recommendation::Accept
    }
}

/// Confidence decay for aging market data: 5-minute half-life.
pub(crate) fn freshness_factor(md: &MarketData) -> f64 {
    let age = md.age_secs(Utc::now()) as f64;
    0.5f64.powf(age / DATA_AGE_HALF_LIFE_SECS)
}

/// Economics shared by the strategies: value both legs in USD and derive
/// the exchange-rate spread the order offers over the market rate.
pub(crate) struct OrderEconomics {
    /// USD value of the source leg.
    pub src_value_usd: f64,
    /// Destination units offered per source unit by the order.
    pub order_ratio: f64,
    /// Destination units per source unit at market prices.
    pub market_ratio: f64,
    /// Relative edge of the order over the market rate; positive means the
    /// resolver pays out less than the source leg is worth.
    pub spread: f64,
    /// Destination USD price at which the edge vanishes.
    pub break_even_price: f64,
}

pub(crate) fn order_economics(
    order: &CrossChainSwapState,
    src_md: &MarketData,
    dst_md: &MarketData,
) -> Option<OrderEconomics> {
    let src_tokens = order
        .amounts
        .source
        .to_tokens_for_score(order.source_chain.chain_id.native_decimals());
    let dst_tokens = order
        .amounts
        .destination
        .to_tokens_for_score(order.destination_chain.chain_id.native_decimals());
    if src_tokens <= 0.0 || dst_tokens <= 0.0 || src_md.price_usd <= 0.0 || dst_md.price_usd <= 0.0
    {
        return None;
    }

    let order_ratio = dst_tokens / src_tokens;
    let market_ratio = src_md.price_usd / dst_md.price_usd;
    let spread = (market_ratio - order_ratio) / market_ratio;
    let src_value_usd = src_tokens * src_md.price_usd;
    let break_even_price = src_value_usd / dst_tokens;

    Some(OrderEconomics {
        src_value_usd,
        order_ratio,
        market_ratio,
        spread,
        break_even_price,
    })
}

/// Fallback analysis when market data for a leg is missing: no profit
/// claim, high risk, minimal confidence.
pub(crate) fn degraded_analysis(
    order: &CrossChainSwapState,
    strategy: &str,
    gas: GasEstimateConfig,
) -> ProfitabilityAnalysis {
    ProfitabilityAnalysis {
        order_id: order.order_id.clone(),
        strategy: strategy.to_string(),
        expected_profit_usd: 0.0,
        profit_margin: 0.0,
        risk_score: 85.0,
        confidence: 0.1,
        gas_estimate: GasEstimate {
            ethereum: gas.ethereum_wei,
            bitcoin: gas.bitcoin_sats,
        },
        net_profit_usd: 0.0,
        break_even_price: 0.0,
        recommendation: Recommendation::Reject,
        reasoning: vec!["market data unavailable for one or both legs".to_string()],
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::models::{ChainRef, Secret, SwapAmounts, SwapStatus, SwapTimelocks};

    pub fn eth_btc_order(dest_sats: u128) -> CrossChainSwapState {
        let now = crate::models::unix_now();
        CrossChainSwapState {
            order_id: "test-order".to_string(),
            maker: "0xmaker".to_string(),
            source_chain: ChainRef::native(ChainId::EthereumMainnet),
            destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
            amounts: SwapAmounts {
                source: Amount::new(1_000_000_000_000_000_000),
                destination: Amount::new(dest_sats),
            },
            timelocks: SwapTimelocks {
                source: now + 7200,
                destination: now + 3600,
            },
            secret_hash: Secret::from_bytes([0u8; 32]).hash(),
            status: SwapStatus::AuctionStarted,
            secret: None,
        }
    }

    pub fn quote(chain_id: ChainId, price: f64, spread: f64, volatility: f64) -> MarketData {
        MarketData {
            chain_id,
            token: chain_id.native_token().to_string(),
            price_usd: price,
            liquidity: Amount::new(10u128.pow(chain_id.native_decimals() as u32 + 3)),
            spread,
            volatility,
            last_updated: Utc::now(),
        }
    }

    pub fn seeded_cache() -> Arc<MarketDataCache> {
        let cache = Arc::new(MarketDataCache::new());
        cache.put(quote(ChainId::EthereumMainnet, 3_000.0, 0.001, 0.02));
        cache.put(quote(ChainId::BitcoinMainnet, 60_000.0, 0.001, 0.02));
        cache
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::config::StrategyEngineConfig;

    fn engine() -> StrategyEngine {
        StrategyEngine::new(&StrategyEngineConfig::default(), seeded_cache())
    }

    #[test]
    fn profitable_order_accepted() {
        // 1 ETH ($3000) in exchange for 0.004 BTC ($240): wide edge
        let analysis = engine().analyze(&eth_btc_order(400_000)).unwrap();
        assert!(analysis.expected_profit_usd > 0.0);
        assert!(analysis.net_profit_usd > 0.0);
        assert_eq!(analysis.recommendation, Recommendation::Accept);
    }

    #[test]
    fn unprofitable_order_rejected() {
        // Paying out 0.06 BTC ($3600) for 1 ETH ($3000): negative edge
        let analysis = engine().analyze(&eth_btc_order(6_000_000)).unwrap();
        assert_eq!(analysis.recommendation, Recommendation::Reject);
    }

    #[test]
    fn missing_market_data_never_accepts() {
        let cache = Arc::new(MarketDataCache::new());
        let engine = StrategyEngine::new(&StrategyEngineConfig::default(), cache);
        let analysis = engine.analyze(&eth_btc_order(400_000)).unwrap();
        assert_ne!(analysis.recommendation, Recommendation::Accept);
    }

    #[test]
    fn recommendation_does_not_regress_as_inputs_improve() {
        let rank = |r: Recommendation| match r {
            Recommendation::Reject => 0,
            Recommendation::Monitor => 1,
            Recommendation::Accept => 2,
        };
        // Destination payouts from terrible to great; the recommendation
        // must be monotonically non-decreasing as profitability improves.
        let payouts = [6_000_000u128, 5_000_000, 4_800_000, 3_000_000, 400_000];
        let engine = engine();
        let mut last = 0;
        let mut first = true;
        for sats in payouts {
            let analysis = engine.analyze(&eth_btc_order(sats)).unwrap();
            let r = rank(analysis.recommendation);
            if !first {
                assert!(
                    r >= last,
                    "recommendation regressed at payout {} ({} < {})",
                    sats,
                    r,
                    last
                );
            }
            last = r;
            first = false;
        }
    }

    #[test]
    fn gas_cost_reduces_net_profit() {
        let analysis = engine().analyze(&eth_btc_order(400_000)).unwrap();
        assert!(analysis.net_profit_usd < analysis.expected_profit_usd);
    }
}
