//! Risk manager.
//!
//! Two jobs: pre-trade assessment of an order before the resolver bids,
//! and live exposure accounting while swaps are in flight. Circuit
//! breakers run after every assessment and on a periodic sweep; an
//! emergency stop rejects all new assessments until cleared.

pub mod breakers;
pub mod exposure;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::events::{EventBus, ResolverEvent};
use crate::market_data::MarketDataCache;
use crate::models::{Amount, CrossChainSwapState, SwapStatus};

pub use breakers::{BreakerEffect, BreakerEngine, BreakerInputs, CircuitBreaker};
pub use exposure::{ExposureImpact, ExposureKind, ExposureLimit, ExposureTracker};

/// Score added for a structural or validity violation.
const VALIDITY_PENALTY: f64 = 30.0;
/// Score added per exposure-limit overshoot.
const EXPOSURE_PENALTY: f64 = 25.0;
/// Score added for an unrecognized counterparty.
const UNKNOWN_COUNTERPARTY_PENALTY: f64 = 10.0;
/// Score added for a malformed counterparty address.
const INVALID_ADDRESS_PENALTY: f64 = 25.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub order_id: String,
    /// 0..100, higher is riskier.
    pub risk_score: f64,
    /// 0..100.
    pub confidence_score: f64,
    pub approved: bool,
    pub rejection_reasons: Vec<String>,
    pub exposure_impact: ExposureImpact,
    pub recommendations: Vec<String>,
    pub position_size: Amount,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub total_assessments: u64,
    pub rejected_orders: u64,
    pub active_orders: usize,
}

struct RiskState {
    exposure: ExposureTracker,
    breakers: BreakerEngine,
    metrics: RiskMetrics,
    seen_counterparties: HashSet<String>,
}

pub struct RiskManager {
    config: RiskConfig,
    market_data: Arc<MarketDataCache>,
    events: EventBus,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, market_data: Arc<MarketDataCache>, events: EventBus) -> Self {
        let state = RiskState {
            exposure: ExposureTracker::new(&config.profile),
            breakers: BreakerEngine::from_config(&config.circuit_breakers),
            metrics: RiskMetrics::default(),
            seen_counterparties: HashSet::new(),
        };
        RiskManager {
            config,
            market_data,
            events,
            state: Mutex::new(state),
        }
    }

    /// Pre-trade assessment. `confidence` is the analysis confidence in
    /// 0..1 (typically from the strategy engine); defaults to 0.5.
    pub fn assess_order(
        &self,
        order: &CrossChainSwapState,
        confidence: Option<f64>,
    ) -> RiskAssessment {
        let confidence_pct = (confidence.unwrap_or(0.5).clamp(0.0, 1.0)) * 100.0;
        let mut state = self.state.lock();
        state.metrics.total_assessments += 1;

        if state.breakers.is_emergency_stopped() {
            state.metrics.rejected_orders += 1;
            let assessment = RiskAssessment {
                order_id: order.order_id.clone(),
                risk_score: 100.0,
                confidence_score: confidence_pct,
                approved: false,
                rejection_reasons: vec!["emergency stop active".to_string()],
                exposure_impact: ExposureImpact::default(),
                recommendations: vec!["reset the emergency stop before trading".to_string()],
                position_size: Amount::ZERO,
                timestamp: Utc::now(),
            };
            drop(state);
            self.emit_assessment(&assessment);
            return assessment;
        }

        let mut risk_score: f64 = 0.0;
        let mut rejection_reasons = Vec::new();
        let mut recommendations = Vec::new();

        // Structural order validity
        let structural = order.validation_errors(self.config.timelock_safety_gap_secs);
        if !structural.is_empty() {
            risk_score += VALIDITY_PENALTY;
            rejection_reasons.extend(structural);
        }

        // Order size, concurrency, counterparty lists
        if order.amounts.source > self.config.profile.max_single_order_size {
            risk_score += VALIDITY_PENALTY;
            rejection_reasons.push(format!(
                "order size {} exceeds single-order limit {}",
                order.amounts.source, self.config.profile.max_single_order_size
            ));
        }
        if state.exposure.active_count() >= self.config.profile.max_concurrent_orders {
            risk_score += VALIDITY_PENALTY;
            rejection_reasons.push(format!(
                "concurrent order limit {} reached",
                self.config.profile.max_concurrent_orders
            ));
        }
        let maker = order.maker.to_lowercase();
        if self
            .config
            .profile
            .blocked_counterparties
            .iter()
            .any(|c| c.to_lowercase() == maker)
        {
            risk_score += VALIDITY_PENALTY;
            rejection_reasons.push(format!("counterparty {} is blocked", order.maker));
        }
        if !self.config.profile.allowed_counterparties.is_empty()
            && !self
                .config
                .profile
                .allowed_counterparties
                .iter()
                .any(|c| c.to_lowercase() == maker)
        {
            risk_score += VALIDITY_PENALTY;
            rejection_reasons.push(format!("counterparty {} is not allowlisted", order.maker));
        }

        // Exposure pre-check
        let (exposure_reasons, exposure_impact) = state.exposure.pre_check(order);
        risk_score += EXPOSURE_PENALTY * exposure_reasons.len() as f64;
        rejection_reasons.extend(exposure_reasons);

        // Counterparty familiarity
        if maker.len() < 6 {
            risk_score += INVALID_ADDRESS_PENALTY;
            rejection_reasons.push(format!("counterparty address {:?} is malformed", order.maker));
        } else if !state.seen_counterparties.contains(&maker) {
            risk_score += UNKNOWN_COUNTERPARTY_PENALTY;
            recommendations.push(format!(
                "first order from counterparty {}; sizing conservatively",
                order.maker
            ));
        }

        // Market risk: bridge legs, time pressure, volatility band
        let mut market_volatility: f64 = 0.0;
        if order.source_chain.chain_id.is_bitcoin() || order.destination_chain.chain_id.is_bitcoin()
        {
            risk_score += 10.0;
        }
        let now = crate::models::unix_now();
        let remaining = order.timelocks.source.saturating_sub(now);
        risk_score += if remaining < 3_600 {
            20.0
        } else if remaining < 7_200 {
            10.0
        } else {
            2.0
        };
        for chain_ref in [&order.source_chain, &order.destination_chain] {
            if let Some(md) = self.market_data.get(chain_ref.chain_id, &chain_ref.token) {
                market_volatility = market_volatility.max(md.volatility);
                let thresholds = self.config.volatility_thresholds;
                risk_score += if md.volatility > thresholds.high {
                    15.0
                } else if md.volatility > thresholds.medium {
                    8.0
                } else if md.volatility > thresholds.low {
                    3.0
                } else {
                    0.0
                };
                // Technical risk: congestion shows up as widened spreads
                if md.spread > 0.01 {
                    risk_score += 5.0;
                }
            } else {
                recommendations.push(format!(
                    "no market data for {} {}; volatility unknown",
                    chain_ref.chain_id, chain_ref.token
                ));
                risk_score += 5.0;
            }
        }

        let risk_score = risk_score.min(100.0);

        // Position sizing: base scaled by confidence, shrunk by risk
        let sizing = self.config.position_sizing;
        let conf_mult = 0.5 + confidence_pct / 100.0;
        let risk_div = (1.0 - risk_score / 100.0 * 0.9).max(0.1);
        let scaled =
            (sizing.base_size.to_f64_for_score() * conf_mult * risk_div).floor().max(0.0) as u128;
        let position_size = Amount::new(scaled)
            .min(sizing.max_size)
            .min(order.amounts.source);

        let approved = rejection_reasons.is_empty()
            && risk_score <= self.config.profile.max_risk_score
            && confidence_pct >= self.config.profile.min_confidence_score;
        if !approved {
            state.metrics.rejected_orders += 1;
            if rejection_reasons.is_empty() {
                rejection_reasons.push(format!(
                    "risk {:.0} or confidence {:.0} outside profile bounds",
                    risk_score, confidence_pct
                ));
            }
        } else {
            state.seen_counterparties.insert(maker);
        }

        let assessment = RiskAssessment {
            order_id: order.order_id.clone(),
            risk_score,
            confidence_score: confidence_pct,
            approved,
            rejection_reasons,
            exposure_impact,
            recommendations,
            position_size,
            timestamp: Utc::now(),
        };

        // Breakers run after every assessment
        let inputs = BreakerInputs {
            max_chain_utilization: state.exposure.max_chain_utilization(),
            daily_volume_ratio: state.exposure.daily_volume_ratio(),
            error_rate: error_rate(&state.metrics),
            market_volatility,
            last_confidence: confidence_pct / 100.0,
        };
        let effects = state.breakers.evaluate(&inputs);
        self.apply_breaker_effects(&mut state, effects);

        drop(state);
        self.emit_assessment(&assessment);
        assessment
    }

    /// Register an order status transition for exposure accounting.
    pub fn update_order_status(&self, order: &CrossChainSwapState) {
        let mut state = self.state.lock();
        if order.status.is_active() {
            if state.exposure.activate(order) {
                info!(order_id = %order.order_id, status = order.status.as_str(), "exposure activated");
                let alert_threshold = self.config.exposure_alert_threshold;
                let alerts: Vec<ExposureLimit> = state
                    .exposure
                    .utilization_report()
                    .into_iter()
                    .filter(|l| l.utilization_rate >= alert_threshold)
                    .collect();
                for limit in alerts {
                    self.events.emit(ResolverEvent::ExposureLimitReached {
                        kind: limit.kind.as_str().to_string(),
                        identifier: limit.identifier.clone(),
                        utilization: limit.utilization_rate,
                    });
                }
            }
        } else if order.status.is_terminal() {
            if state.exposure.deactivate(&order.order_id) {
                info!(order_id = %order.order_id, status = order.status.as_str(), "exposure released");
            }
            if order.status == SwapStatus::Completed {
                state.exposure.record_completed(order);
            }
        }
        state.metrics.active_orders = state.exposure.active_count();
        let metrics = state.metrics;
        drop(state);
        self.events.emit(ResolverEvent::RiskMetricsUpdated {
            total_assessments: metrics.total_assessments,
            rejected_orders: metrics.rejected_orders,
        });
    }

    /// Periodic breaker sweep, independent of assessments.
    pub fn evaluate_circuit_breakers(&self) {
        let mut state = self.state.lock();
        let inputs = BreakerInputs {
            max_chain_utilization: state.exposure.max_chain_utilization(),
            daily_volume_ratio: state.exposure.daily_volume_ratio(),
            error_rate: error_rate(&state.metrics),
            market_volatility: 0.0,
            last_confidence: 1.0,
        };
        let effects = state.breakers.evaluate(&inputs);
        self.apply_breaker_effects(&mut state, effects);
    }

    fn apply_breaker_effects(&self, state: &mut RiskState, effects: Vec<BreakerEffect>) {
        for effect in effects {
            match effect {
                BreakerEffect::Triggered { name } => {
                    warn!(breaker = %name, "circuit breaker triggered");
                    self.events
                        .emit(ResolverEvent::CircuitBreakerTriggered { name });
                }
                BreakerEffect::Reset { name } => {
                    info!(breaker = %name, "circuit breaker reset");
                    self.events.emit(ResolverEvent::CircuitBreakerReset { name });
                }
                BreakerEffect::ReduceLimits { name, factor } => {
                    warn!(breaker = %name, factor, "reducing exposure limits");
                    state.exposure.reduce_limits(factor);
                }
                BreakerEffect::EmergencyStop { name } => {
                    warn!(breaker = %name, "EMERGENCY STOP");
                    self.events.emit(ResolverEvent::EmergencyStop {
                        reason: format!("circuit breaker {}", name),
                    });
                }
            }
        }
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.state.lock().breakers.is_emergency_stopped()
    }

    pub fn reset_emergency_stop(&self) -> bool {
        self.state.lock().breakers.reset_emergency_stop()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().breakers.is_paused()
    }

    pub fn metrics(&self) -> RiskMetrics {
        self.state.lock().metrics
    }

    pub fn exposure_limit(&self, kind: ExposureKind, identifier: &str) -> ExposureLimit {
        self.state.lock().exposure.limit_snapshot(kind, identifier)
    }

    pub fn breaker_snapshot(&self) -> Vec<CircuitBreaker> {
        self.state.lock().breakers.snapshot()
    }

    fn emit_assessment(&self, assessment: &RiskAssessment) {
        self.events.emit(ResolverEvent::RiskAssessmentCompleted {
            order_id: assessment.order_id.clone(),
            approved: assessment.approved,
            risk_score: assessment.risk_score,
        });
    }
}

fn error_rate(metrics: &RiskMetrics) -> f64 {
    if metrics.total_assessments == 0 {
        0.0
    } else {
        metrics.rejected_orders as f64 / metrics.total_assessments as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BreakerActionConfig, BreakerConditionConfig, CircuitBreakerConfig, RiskProfile,
    };
    use crate::models::{ChainId, ChainRef, Secret, SwapAmounts, SwapTimelocks};

    fn order(id: &str, source_eth_wei: u128, dest_sats: u128) -> CrossChainSwapState {
        let now = crate::models::unix_now();
        CrossChainSwapState {
            order_id: id.to_string(),
            maker: "0xabcdef1234".to_string(),
            source_chain: ChainRef::native(ChainId::EthereumMainnet),
            destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
            amounts: SwapAmounts {
                source: Amount::new(source_eth_wei),
                destination: Amount::new(dest_sats),
            },
            timelocks: SwapTimelocks {
                source: now + 14_400,
                destination: now + 7_200,
            },
            secret_hash: Secret::from_bytes([1u8; 32]).hash(),
            status: SwapStatus::AuctionStarted,
            secret: None,
        }
    }

    fn manager(config: RiskConfig) -> RiskManager {
        RiskManager::new(config, Arc::new(MarketDataCache::new()), EventBus::new())
    }

    const ONE_ETH: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn clean_order_is_approved() {
        let rm = manager(RiskConfig::default());
        let assessment = rm.assess_order(&order("a", ONE_ETH, 4_000_000), Some(0.8));
        assert!(assessment.approved, "reasons: {:?}", assessment.rejection_reasons);
        assert!(assessment.risk_score < 50.0);
        assert!(!assessment.position_size.is_zero());
    }

    #[test]
    fn timelock_violation_is_rejected() {
        let rm = manager(RiskConfig::default());
        let mut bad = order("a", ONE_ETH, 4_000_000);
        bad.timelocks.destination = bad.timelocks.source;
        let assessment = rm.assess_order(&bad, Some(0.8));
        assert!(!assessment.approved);
        assert!(assessment
            .rejection_reasons
            .iter()
            .any(|r| r.contains("timelock ordering")));
    }

    #[test]
    fn oversized_order_is_rejected() {
        let mut config = RiskConfig::default();
        config.profile.max_single_order_size = Amount::new(ONE_ETH / 2);
        let rm = manager(config);
        let assessment = rm.assess_order(&order("a", ONE_ETH, 4_000_000), Some(0.8));
        assert!(!assessment.approved);
        assert!(assessment
            .rejection_reasons
            .iter()
            .any(|r| r.contains("single-order limit")));
    }

    #[test]
    fn blocked_counterparty_is_rejected() {
        let mut config = RiskConfig::default();
        config.profile.blocked_counterparties = vec!["0xABCDEF1234".to_string()];
        let rm = manager(config);
        let assessment = rm.assess_order(&order("a", ONE_ETH, 4_000_000), Some(0.8));
        assert!(!assessment.approved);
        assert!(assessment
            .rejection_reasons
            .iter()
            .any(|r| r.contains("blocked")));
    }

    #[test]
    fn exposure_returns_to_zero_after_terminal_states() {
        let rm = manager(RiskConfig::default());
        let mut a = order("a", ONE_ETH, 4_000_000);
        let mut b = order("b", ONE_ETH, 4_000_000);
        rm.update_order_status(&a);
        rm.update_order_status(&b);
        assert_eq!(rm.metrics().active_orders, 2);

        a.status = SwapStatus::Completed;
        b.status = SwapStatus::Failed;
        rm.update_order_status(&a);
        rm.update_order_status(&b);

        assert_eq!(rm.metrics().active_orders, 0);
        let chain = rm.exposure_limit(ExposureKind::Chain, "ethereum_mainnet");
        assert_eq!(chain.current_exposure, Amount::ZERO);
        let token = rm.exposure_limit(ExposureKind::Token, "bitcoin_mainnet:btc");
        assert_eq!(token.current_exposure, Amount::ZERO);
    }

    #[test]
    fn exposure_breaker_halves_limits() {
        let mut config = RiskConfig::default();
        config.profile.max_exposure_per_chain = Amount::new(10 * ONE_ETH);
        config.circuit_breakers = vec![CircuitBreakerConfig {
            name: "chain_exposure".to_string(),
            enabled: true,
            condition: BreakerConditionConfig {
                kind: "exposure_threshold".to_string(),
                threshold: 0.5,
                time_window_secs: 300,
            },
            action: BreakerActionConfig {
                kind: "reduce_limits".to_string(),
                duration_secs: 600,
                reduction_factor: 0.5,
            },
        }];
        let rm = manager(config);

        // Two active orders at 30% of chain capacity each
        rm.update_order_status(&order("a", 3 * ONE_ETH, 4_000_000));
        rm.update_order_status(&order("b", 3 * ONE_ETH, 4_000_000));

        // The sweep after the next assessment sees 60% utilization
        rm.assess_order(&order("probe", ONE_ETH, 4_000_000), Some(0.8));

        let limit = rm.exposure_limit(ExposureKind::Chain, "ethereum_mainnet");
        assert_eq!(limit.max_exposure, Amount::new(5 * ONE_ETH));
        let snapshot = rm.breaker_snapshot();
        assert!(snapshot[0].triggered);
        assert_eq!(snapshot[0].trigger_count, 1);
    }

    #[test]
    fn emergency_stop_rejects_everything() {
        let mut config = RiskConfig::default();
        config.circuit_breakers = vec![CircuitBreakerConfig {
            name: "panic".to_string(),
            enabled: true,
            condition: BreakerConditionConfig {
                kind: "confidence_drop".to_string(),
                threshold: 0.2,
                time_window_secs: 60,
            },
            action: BreakerActionConfig {
                kind: "emergency_stop".to_string(),
                duration_secs: 0,
                reduction_factor: 0.5,
            },
        }];
        let rm = manager(config);

        rm.assess_order(&order("a", ONE_ETH, 4_000_000), Some(0.05));
        assert!(rm.is_emergency_stopped());

        let assessment = rm.assess_order(&order("b", ONE_ETH, 4_000_000), Some(0.9));
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_score, 100.0);

        assert!(rm.reset_emergency_stop());
        let assessment = rm.assess_order(&order("c", ONE_ETH, 4_000_000), Some(0.9));
        assert!(assessment.approved);
    }

    #[test]
    fn position_size_shrinks_with_risk() {
        let rm = manager(RiskConfig::default());
        let calm = rm.assess_order(&order("a", ONE_ETH, 4_000_000), Some(0.9));
        let mut rushed = order("b", ONE_ETH, 4_000_000);
        let now = crate::models::unix_now();
        rushed.timelocks.source = now + 3_000;
        rushed.timelocks.destination = now + 600;
        let risky = rm.assess_order(&rushed, Some(0.9));
        assert!(risky.position_size <= calm.position_size);
    }
}
