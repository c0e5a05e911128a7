//! Exposure accounting.
//!
//! Tracks how much capital is committed per chain, per `(chain, token)`
//! pair, per counterparty, and per UTC day, against configurable ceilings.
//! Orders add exposure when they enter an active status and subtract it on
//! any terminal status; daily volume only grows on completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::RiskProfile;
use crate::models::{Amount, ChainId, CrossChainSwapState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureKind {
    Chain,
    Token,
    Counterparty,
    DailyVolume,
    SingleOrder,
}

impl ExposureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureKind::Chain => "chain",
            ExposureKind::Token => "token",
            ExposureKind::Counterparty => "counterparty",
            ExposureKind::DailyVolume => "daily_volume",
            ExposureKind::SingleOrder => "single_order",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureLimit {
    pub kind: ExposureKind,
    pub identifier: String,
    pub current_exposure: Amount,
    pub max_exposure: Amount,
    pub utilization_rate: f64,
    pub last_updated: DateTime<Utc>,
}

/// Relative impact an order would have on each limit family, 0..1.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExposureImpact {
    pub chain: f64,
    pub token: f64,
    pub counterparty: f64,
    pub volume: f64,
}

#[derive(Debug, Clone)]
struct ActiveExposure {
    source_chain: ChainId,
    source_token: String,
    source_amount: Amount,
    dest_chain: ChainId,
    dest_token: String,
    dest_amount: Amount,
    maker: String,
}

#[derive(Debug)]
pub struct ExposureTracker {
    current: HashMap<(ExposureKind, String), Amount>,
    /// Effective ceiling per kind; shrunk in place by `reduce_limits`.
    defaults: HashMap<ExposureKind, Amount>,
    active: HashMap<String, ActiveExposure>,
    last_updated: DateTime<Utc>,
}

impl ExposureTracker {
    pub fn new(profile: &RiskProfile) -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(ExposureKind::Chain, profile.max_exposure_per_chain);
        defaults.insert(ExposureKind::Token, profile.max_exposure_per_token);
        defaults.insert(
            ExposureKind::Counterparty,
            profile.max_exposure_per_counterparty,
        );
        defaults.insert(ExposureKind::DailyVolume, profile.max_daily_volume);
        defaults.insert(ExposureKind::SingleOrder, profile.max_single_order_size);
        ExposureTracker {
            current: HashMap::new(),
            defaults,
            active: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    fn token_key(chain: ChainId, token: &str) -> String {
        format!("{}:{}", chain.as_str(), token.to_lowercase())
    }

    fn today_key() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    pub fn max_for(&self, kind: ExposureKind) -> Amount {
        self.defaults.get(&kind).copied().unwrap_or(Amount::ZERO)
    }

    pub fn current_for(&self, kind: ExposureKind, identifier: &str) -> Amount {
        self.current
            .get(&(kind, identifier.to_string()))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    pub fn limit_snapshot(&self, kind: ExposureKind, identifier: &str) -> ExposureLimit {
        let current = self.current_for(kind, identifier);
        let max = self.max_for(kind);
        ExposureLimit {
            kind,
            identifier: identifier.to_string(),
            current_exposure: current,
            max_exposure: max,
            utilization_rate: ratio(current, max),
            last_updated: self.last_updated,
        }
    }

    /// Would this order overshoot any ceiling? Returns the violated limits
    /// as human-readable reasons plus the projected impact ratios.
    pub fn pre_check(&self, order: &CrossChainSwapState) -> (Vec<String>, ExposureImpact) {
        let mut reasons = Vec::new();
        let mut impact = ExposureImpact::default();

        let legs = [
            (
                order.source_chain.chain_id,
                order.source_chain.token.clone(),
                order.amounts.source,
            ),
            (
                order.destination_chain.chain_id,
                order.destination_chain.token.clone(),
                order.amounts.destination,
            ),
        ];

        for (chain, token, amount) in &legs {
            let chain_new = self
                .current_for(ExposureKind::Chain, chain.as_str())
                .saturating_add(*amount);
            let chain_max = self.max_for(ExposureKind::Chain);
            impact.chain = impact.chain.max(ratio(chain_new, chain_max));
            if chain_new > chain_max {
                reasons.push(format!(
                    "chain exposure limit exceeded on {}: {} > {}",
                    chain, chain_new, chain_max
                ));
            }

            let token_id = Self::token_key(*chain, token);
            let token_new = self
                .current_for(ExposureKind::Token, &token_id)
                .saturating_add(*amount);
            let token_max = self.max_for(ExposureKind::Token);
            impact.token = impact.token.max(ratio(token_new, token_max));
            if token_new > token_max {
                reasons.push(format!(
                    "token exposure limit exceeded on {}: {} > {}",
                    token_id, token_new, token_max
                ));
            }
        }

        let maker = order.maker.to_lowercase();
        let cp_new = self
            .current_for(ExposureKind::Counterparty, &maker)
            .saturating_add(order.amounts.source);
        let cp_max = self.max_for(ExposureKind::Counterparty);
        impact.counterparty = ratio(cp_new, cp_max);
        if cp_new > cp_max {
            reasons.push(format!(
                "counterparty exposure limit exceeded for {}: {} > {}",
                maker, cp_new, cp_max
            ));
        }

        let today = Self::today_key();
        let vol_new = self
            .current_for(ExposureKind::DailyVolume, &today)
            .saturating_add(order.amounts.source);
        let vol_max = self.max_for(ExposureKind::DailyVolume);
        impact.volume = ratio(vol_new, vol_max);
        if vol_new > vol_max {
            reasons.push(format!(
                "daily volume limit exceeded: {} > {}",
                vol_new, vol_max
            ));
        }

        (reasons, impact)
    }

    /// Start carrying exposure for an order. Idempotent per order id: a
    /// second activation (a later active status) changes nothing.
    pub fn activate(&mut self, order: &CrossChainSwapState) -> bool {
        if self.active.contains_key(&order.order_id) {
            return false;
        }
        let entry = ActiveExposure {
            source_chain: order.source_chain.chain_id,
            source_token: order.source_chain.token.clone(),
            source_amount: order.amounts.source,
            dest_chain: order.destination_chain.chain_id,
            dest_token: order.destination_chain.token.clone(),
            dest_amount: order.amounts.destination,
            maker: order.maker.to_lowercase(),
        };
        self.add(ExposureKind::Chain, entry.source_chain.as_str(), entry.source_amount);
        self.add(ExposureKind::Chain, entry.dest_chain.as_str(), entry.dest_amount);
        self.add(
            ExposureKind::Token,
            &Self::token_key(entry.source_chain, &entry.source_token),
            entry.source_amount,
        );
        self.add(
            ExposureKind::Token,
            &Self::token_key(entry.dest_chain, &entry.dest_token),
            entry.dest_amount,
        );
        self.add(ExposureKind::Counterparty, &entry.maker, entry.source_amount);
        self.active.insert(order.order_id.clone(), entry);
        self.last_updated = Utc::now();
        true
    }

    /// Stop carrying exposure for an order. Idempotent: unknown ids are
    /// ignored.
    pub fn deactivate(&mut self, order_id: &str) -> bool {
        let Some(entry) = self.active.remove(order_id) else {
            return false;
        };
        self.sub(ExposureKind::Chain, entry.source_chain.as_str(), entry.source_amount);
        self.sub(ExposureKind::Chain, entry.dest_chain.as_str(), entry.dest_amount);
        self.sub(
            ExposureKind::Token,
            &Self::token_key(entry.source_chain, &entry.source_token),
            entry.source_amount,
        );
        self.sub(
            ExposureKind::Token,
            &Self::token_key(entry.dest_chain, &entry.dest_token),
            entry.dest_amount,
        );
        self.sub(ExposureKind::Counterparty, &entry.maker, entry.source_amount);
        self.last_updated = Utc::now();
        true
    }

    /// Book completed volume against today's ceiling.
    pub fn record_completed(&mut self, order: &CrossChainSwapState) {
        let today = Self::today_key();
        self.add(ExposureKind::DailyVolume, &today, order.amounts.source);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_order_active(&self, order_id: &str) -> bool {
        self.active.contains_key(order_id)
    }

    /// Shrink every ceiling by `factor`. Applied by the reduce-limits
    /// circuit-breaker action.
    pub fn reduce_limits(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        for max in self.defaults.values_mut() {
            let reduced = (max.to_f64_for_score() * factor).floor().max(0.0) as u128;
            *max = Amount::new(reduced);
        }
        self.last_updated = Utc::now();
    }

    /// Highest chain-utilization ratio across all chains with exposure.
    pub fn max_chain_utilization(&self) -> f64 {
        let max = self.max_for(ExposureKind::Chain);
        self.current
            .iter()
            .filter(|((kind, _), _)| *kind == ExposureKind::Chain)
            .map(|(_, amount)| ratio(*amount, max))
            .fold(0.0, f64::max)
    }

    pub fn daily_volume_ratio(&self) -> f64 {
        let today = Self::today_key();
        ratio(
            self.current_for(ExposureKind::DailyVolume, &today),
            self.max_for(ExposureKind::DailyVolume),
        )
    }

    /// Every limit snapshot with non-zero exposure, for alerting.
    pub fn utilization_report(&self) -> Vec<ExposureLimit> {
        self.current
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|((kind, id), _)| self.limit_snapshot(*kind, id))
            .collect()
    }

    fn add(&mut self, kind: ExposureKind, identifier: &str, amount: Amount) {
        let entry = self
            .current
            .entry((kind, identifier.to_string()))
            .or_insert(Amount::ZERO);
        *entry = entry.saturating_add(amount);
    }

    fn sub(&mut self, kind: ExposureKind, identifier: &str, amount: Amount) {
        if let Some(entry) = self.current.get_mut(&(kind, identifier.to_string())) {
            *entry = entry.saturating_sub(amount);
        }
    }
}

fn ratio(current: Amount, max: Amount) -> f64 {
    if max.is_zero() {
        if current.is_zero() {
            0.0
        } else {
            1.0
        }
    } else {
        (current.to_f64_for_score() / max.to_f64_for_score()).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChainRef, Secret, SwapAmounts, SwapStatus, SwapTimelocks};

    fn profile() -> RiskProfile {
        RiskProfile {
            max_exposure_per_chain: Amount::new(10_000),
            max_exposure_per_token: Amount::new(10_000),
            max_exposure_per_counterparty: Amount::new(6_000),
            max_daily_volume: Amount::new(20_000),
            max_single_order_size: Amount::new(5_000),
            ..RiskProfile::default()
        }
    }

    fn order(id: &str, source: u128, dest: u128) -> CrossChainSwapState {
        let now = crate::models::unix_now();
        CrossChainSwapState {
            order_id: id.to_string(),
            maker: "0xMaker".to_string(),
            source_chain: ChainRef::native(ChainId::EthereumMainnet),
            destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
            amounts: SwapAmounts {
                source: Amount::new(source),
                destination: Amount::new(dest),
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

    #[test]
    fn activation_and_deactivation_conserve_exposure() {
        let mut tracker = ExposureTracker::new(&profile());
        let a = order("a", 3_000, 1_000);
        let b = order("b", 2_000, 500);

        assert!(tracker.activate(&a));
        assert!(tracker.activate(&b));
        // Re-activation on a later active status is a no-op
        assert!(!tracker.activate(&a));

        assert_eq!(
            tracker.current_for(ExposureKind::Chain, "ethereum_mainnet"),
            Amount::new(5_000)
        );
        assert_eq!(
            tracker.current_for(ExposureKind::Counterparty, "0xmaker"),
            Amount::new(5_000)
        );

        tracker.deactivate("a");
        tracker.deactivate("b");
        tracker.deactivate("b");

        assert_eq!(
            tracker.current_for(ExposureKind::Chain, "ethereum_mainnet"),
            Amount::ZERO
        );
        assert_eq!(
            tracker.current_for(ExposureKind::Chain, "bitcoin_mainnet"),
            Amount::ZERO
        );
        assert_eq!(
            tracker.current_for(ExposureKind::Counterparty, "0xmaker"),
            Amount::ZERO
        );
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn pre_check_flags_overshoot() {
        let mut tracker = ExposureTracker::new(&profile());
        tracker.activate(&order("a", 9_000, 1_000));
        let (reasons, impact) = tracker.pre_check(&order("b", 2_000, 500));
        assert!(reasons.iter().any(|r| r.contains("chain exposure")));
        assert!(impact.chain >= 1.0);
    }

    #[test]
    fn daily_volume_only_counts_completions() {
        let mut tracker = ExposureTracker::new(&profile());
        let a = order("a", 3_000, 1_000);
        tracker.activate(&a);
        assert_eq!(tracker.daily_volume_ratio(), 0.0);
        tracker.deactivate("a");
        tracker.record_completed(&a);
        assert!(tracker.daily_volume_ratio() > 0.0);
    }

    #[test]
    fn reduce_limits_halves_ceilings() {
        let mut tracker = ExposureTracker::new(&profile());
        tracker.reduce_limits(0.5);
        assert_eq!(tracker.max_for(ExposureKind::Chain), Amount::new(5_000));
        assert_eq!(
            tracker.max_for(ExposureKind::SingleOrder),
            Amount::new(2_500)
        );
    }

    #[test]
    fn utilization_tracks_largest_chain() {
        let mut tracker = ExposureTracker::new(&profile());
        tracker.activate(&order("a", 6_000, 100));
        assert!((tracker.max_chain_utilization() - 0.6).abs() < 1e-9);
    }
}
