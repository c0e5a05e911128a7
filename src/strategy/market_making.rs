//! Market-making strategy.
//!
//! Profit is the sum of the captured bid/ask spread on both legs plus any
//! positive edge the order's exchange rate offers over the market rate.
//! Risk follows volatility and how deep the order digs into available
//! liquidity; confidence decays with data age and volatility.

use anyhow::Result;

use crate::config::{GasEstimateConfig, StrategyParams};
use crate::market_data::MarketData;
use crate::models::CrossChainSwapState;

use super::{
    degraded_analysis, freshness_factor, order_economics, recommend, GasEstimate,
    ProfitabilityAnalysis, Strategy,
};

pub struct MarketMakingStrategy {
    weight: f64,
    params: StrategyParams,
    gas: GasEstimateConfig,
}

impl MarketMakingStrategy {
    pub fn new(weight: f64, params: StrategyParams, gas: GasEstimateConfig) -> Self {
        MarketMakingStrategy {
            weight,
            params,
            gas,
        }
    }
}

impl Strategy for MarketMakingStrategy {
    fn name(&self) -> &str {
        "market_making"
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

        let avg_spread = (src_md.spread + dst_md.spread) / 2.0;
        let spread_profit = economics.src_value_usd * avg_spread;
        let arbitrage_profit = (economics.spread * economics.src_value_usd).max(0.0);
        let expected_profit = spread_profit + arbitrage_profit;
        let margin = if economics.src_value_usd > 0.0 {
            expected_profit / economics.src_value_usd * 100.0
        } else {
            0.0
        };

        // Volatility dominates; shallow liquidity on either leg adds more.
        let avg_volatility = (src_md.volatility + dst_md.volatility) / 2.0;
        let depth_ratio = order.amounts.source.to_f64_for_score()
            / src_md.liquidity.to_f64_for_score().max(1.0);
        let volatility_risk = (avg_volatility * 400.0).min(40.0);
        let liquidity_risk = (depth_ratio * 60.0).min(30.0);
        let risk_score = (10.0 + volatility_risk + liquidity_risk).min(100.0);

        let confidence = (0.9
            * freshness_factor(src_md)
            * freshness_factor(dst_md)
            * (1.0 - avg_volatility * 2.0).clamp(0.3, 1.0))
        .clamp(0.0, 1.0);

        let buffered_gas = estimated_gas_usd(&self.gas, src_md, dst_md) * self.params.gas_buffer;
        let net_profit = expected_profit - buffered_gas;

        let mut reasoning = vec![
            format!(
                "spread profit ${:.2} at avg spread {:.4}",
                spread_profit, avg_spread
            ),
            format!(
                "rate edge {:.4} adds ${:.2}",
                economics.spread, arbitrage_profit
            ),
        ];
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

/// USD fees for both legs at the snapshot prices. Legs whose native asset
/// has no quote price out at zero.
pub(crate) fn estimated_gas_usd(
    gas: &GasEstimateConfig,
    src_md: &MarketData,
    dst_md: &MarketData,
) -> f64 {
    let price_for = |is_bitcoin: bool| -> f64 {
        [src_md, dst_md]
            .into_iter()
            .find(|md| md.chain_id.is_bitcoin() == is_bitcoin)
            .map(|md| md.price_usd)
            .unwrap_or(0.0)
    };
    gas.ethereum_wei.to_tokens_for_score(18) * price_for(false)
        + gas.bitcoin_sats.to_tokens_for_score(8) * price_for(true)
}
