//! Risk-averse strategy.
//!
//! Haircuts gross profit by a fixed buffer before judging it, demands a
//! wide timelock margin, and never reports confidence above 0.8.

use anyhow::Result;

use crate::config::{GasEstimateConfig, StrategyParams};
use crate::market_data::MarketData;
use crate::models::{unix_now, CrossChainSwapState};

use super::market_making::estimated_gas_usd;
use super::{
    degraded_analysis, freshness_factor, order_economics, recommend, GasEstimate,
    ProfitabilityAnalysis, Strategy,
};

/// Fraction of gross profit surrendered as a safety buffer.
const PROFIT_BUFFER: f64 = 0.20;
/// Minimum seconds of destination-timelock headroom demanded.
const MIN_TIMELOCK_MARGIN_SECS: u64 = 7_200;
const CONFIDENCE_CAP: f64 = 0.8;

pub struct RiskAverseStrategy {
    weight: f64,
    params: StrategyParams,
    gas: GasEstimateConfig,
}

impl RiskAverseStrategy {
    pub fn new(weight: f64, params: StrategyParams, gas: GasEstimateConfig) -> Self {
        RiskAverseStrategy {
            weight,
            params,
            gas,
        }
    }
}

impl Strategy for RiskAverseStrategy {
    fn name(&self) -> &str {
        "risk_averse"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn analyze(
        &self,
        order: &CrossChainSwapState,
        src_md: Option<&MarketData>,
        dst_md: Option<&MarketData>,
    ) -> Result<ProfitabilityAnalysis> {
        let (src_md, dst_md) = match (src_md, dst_md) {
            (Some(s), Some(d)) => (s, d),
            _ => return Ok(degraded_analysis(order, self.name(), self.gas)),
        };
        let economics = match order_economics(order, src_md, dst_md) {
            Some(e) => e,
            None => return Ok(degraded_analysis(order, self.name(), self.gas)),
        };

        let gross_profit = (economics.spread * economics.src_value_usd).max(0.0);
        let expected_profit = gross_profit * (1.0 - PROFIT_BUFFER);
        let margin = if economics.src_value_usd > 0.0 {
            expected_profit / economics.src_value_usd * 100.0
        } else {
            0.0
        };

        let mut reasoning = vec![format!(
            "gross profit ${:.2} buffered to ${:.2}",
            gross_profit, expected_profit
        )];

        let timelock_margin = order.timelocks.destination.saturating_sub(unix_now());
        let avg_volatility = (src_md.volatility + dst_md.volatility) / 2.0;
        let mut risk_score = 15.0 + (avg_volatility * 300.0).min(30.0);
        if timelock_margin < MIN_TIMELOCK_MARGIN_SECS {
            risk_score += 45.0;
            reasoning.push(format!(
                "timelock margin {}s below required {}s",
                timelock_margin, MIN_TIMELOCK_MARGIN_SECS
            ));
        }
        let risk_score = risk_score.min(100.0);

        let confidence = (0.9 * freshness_factor(src_md) * freshness_factor(dst_md))
            .min(CONFIDENCE_CAP)
            .clamp(0.0, CONFIDENCE_CAP);

        let buffered_gas = estimated_gas_usd(&self.gas, src_md, dst_md) * self.params.gas_buffer;
        let net_profit = expected_profit - buffered_gas;

        let recommendation = recommend(
            net_profit,
            margin,
            risk_score,
            confidence,
            self.params.min_profit_margin,
            self.params.max_risk_score,
            self.params.confidence_threshold,
            &mut reasoning,
        );

        Ok(ProfitabilityAnalysis {
            order_id: order.order_id.clone(),
            strategy: self.name().to_string(),
            expected_profit_usd: expected_profit,
            profit_margin: margin,
            risk_score,
            confidence,
            gas_estimate: GasEstimate {
                ethereum: self.gas.ethereum_wei,
                bitcoin: self.gas.bitcoin_sats,
            },
            net_profit_usd: net_profit,
            break_even_price: economics.break_even_price,
            recommendation,
            reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::models::ChainId;

    fn strategy() -> RiskAverseStrategy {
        RiskAverseStrategy::new(0.5, StrategyParams::default(), GasEstimateConfig::default())
    }

    #[test]
    fn profit_is_buffered() {
        let order = eth_btc_order(400_000);
        let src = quote(ChainId::EthereumMainnet, 3_000.0, 0.001, 0.02);
        let dst = quote(ChainId::BitcoinMainnet, 60_000.0, 0.001, 0.02);
        let cautious = strategy().analyze(&order, Some(&src), Some(&dst)).unwrap();

        let gross = gross_profit(&order, &src, &dst);
        assert!(cautious.expected_profit_usd < gross);
        assert!(cautious.expected_profit_usd > 0.0);
    }

    #[test]
    fn confidence_never_exceeds_cap() {
        let order = eth_btc_order(400_000);
        let src = quote(ChainId::EthereumMainnet, 3_000.0, 0.0001, 0.001);
        let dst = quote(ChainId::BitcoinMainnet, 60_000.0, 0.0001, 0.001);
        let analysis = strategy().analyze(&order, Some(&src), Some(&dst)).unwrap();
        assert!(analysis.confidence <= CONFIDENCE_CAP);
    }

    #[test]
    fn short_timelock_margin_spikes_risk() {
        let now = crate::models::unix_now();
        let mut order = eth_btc_order(400_000);
        order.timelocks.destination = now + 1800;
        order.timelocks.source = now + 14_400;
        let src = quote(ChainId::EthereumMainnet, 3_000.0, 0.001, 0.02);
        let dst = quote(ChainId::BitcoinMainnet, 60_000.0, 0.001, 0.02);
        let analysis = strategy().analyze(&order, Some(&src), Some(&dst)).unwrap();
        assert!(analysis.risk_score >= 60.0);
    }

    fn gross_profit(order: &CrossChainSwapState, src: &MarketData, dst: &MarketData) -> f64 {
        let economics = order_economics(order, src, dst).unwrap();
        (economics.spread * economics.src_value_usd).max(0.0)
    }
}
