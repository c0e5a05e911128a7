//! Arbitrage strategy.
//!
//! Pure exchange-rate play: compares the rate the order offers against the
//! market rate and books the difference as profit. Execution risk grows as
//! the source timelock approaches, since a slow fill leaves no room for
//! the refund path.

use anyhow::Result;

use crate::config::{GasEstimateConfig, StrategyParams};
use crate::market_data::MarketData;
use crate::models::{unix_now, CrossChainSwapState};

use super::market_making::estimated_gas_usd;
use super::{
    degraded_analysis, freshness_factor, order_economics, recommend, GasEstimate,
    ProfitabilityAnalysis, Strategy,
};

pub struct ArbitrageStrategy {
    weight: f64,
    params: StrategyParams,
    gas: GasEstimateConfig,
}

impl ArbitrageStrategy {
    pub fn new(weight: f64, params: StrategyParams, gas: GasEstimateConfig) -> Self {
        ArbitrageStrategy {
            weight,
            params,
            gas,
        }
    }

    fn execution_risk(&self, order: &CrossChainSwapState) -> f64 {
        let now = unix_now();
        let remaining = order.timelocks.source.saturating_sub(now);
        match remaining {
            0..=1799 => 30.0,
            1800..=3599 => 20.0,
            3600..=7199 => 10.0,
            _ => 5.0,
        }
    }
}

impl Strategy for ArbitrageStrategy {
    fn name(&self) -> &str {
        "arbitrage"
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

        let expected_profit = (economics.spread * economics.src_value_usd).max(0.0);
        let margin = if economics.src_value_usd > 0.0 {
            expected_profit / economics.src_value_usd * 100.0
        } else {
            0.0
        };

        let avg_volatility = (src_md.volatility + dst_md.volatility) / 2.0;
        let risk_score =
            (10.0 + (avg_volatility * 300.0).min(35.0) + self.execution_risk(order)).min(100.0);

        // Thin edges are noise; confidence scales with how far the spread
        // clears the volatility band.
        let edge_factor = (economics.spread / (avg_volatility + 0.01)).clamp(0.0, 1.0);
        let confidence = (0.85
            * freshness_factor(src_md)
            * freshness_factor(dst_md)
            * (0.4 + 0.6 * edge_factor))
            .clamp(0.0, 1.0);

        let buffered_gas = estimated_gas_usd(&self.gas, src_md, dst_md) * self.params.gas_buffer;
        let net_profit = expected_profit - buffered_gas;

        let mut reasoning = vec![format!(
            "order rate {:.6} vs market {:.6}: spread {:.4}",
            economics.order_ratio, economics.market_ratio, economics.spread
        )];
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
    use super::super::Recommendation;
    use super::*;
    use crate::models::ChainId;

    fn strategy() -> ArbitrageStrategy {
        ArbitrageStrategy::new(1.0, StrategyParams::default(), GasEstimateConfig::default())
    }

    #[test]
    fn positive_spread_books_profit() {
        let order = eth_btc_order(400_000); // $3000 in, $240 out
        let src = quote(ChainId::EthereumMainnet, 3_000.0, 0.001, 0.02);
        let dst = quote(ChainId::BitcoinMainnet, 60_000.0, 0.001, 0.02);
        let analysis = strategy().analyze(&order, Some(&src), Some(&dst)).unwrap();
        assert!(analysis.expected_profit_usd > 2_500.0);
        assert_eq!(analysis.recommendation, Recommendation::Accept);
    }

    #[test]
    fn negative_spread_books_nothing() {
        let order = eth_btc_order(6_000_000); // $3600 out for $3000 in
        let src = quote(ChainId::EthereumMainnet, 3_000.0, 0.001, 0.02);
        let dst = quote(ChainId::BitcoinMainnet, 60_000.0, 0.001, 0.02);
        let analysis = strategy().analyze(&order, Some(&src), Some(&dst)).unwrap();
        assert_eq!(analysis.expected_profit_usd, 0.0);
        assert_eq!(analysis.recommendation, Recommendation::Reject);
    }

    #[test]
    fn imminent_timelock_raises_risk() {
        let now = crate::models::unix_now();
        let mut soon = eth_btc_order(400_000);
        soon.timelocks.source = now + 1200;
        soon.timelocks.destination = now + 600;
        let relaxed = eth_btc_order(400_000);

        let src = quote(ChainId::EthereumMainnet, 3_000.0, 0.001, 0.02);
        let dst = quote(ChainId::BitcoinMainnet, 60_000.0, 0.001, 0.02);
        let s = strategy();
        let soon_analysis = s.analyze(&soon, Some(&src), Some(&dst)).unwrap();
        let relaxed_analysis = s.analyze(&relaxed, Some(&src), Some(&dst)).unwrap();
        assert!(soon_analysis.risk_score > relaxed_analysis.risk_score);
    }
}
