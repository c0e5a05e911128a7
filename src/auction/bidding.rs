//! Bid decisions and scheduling.
//!
//! Given an auction snapshot and a profitability analysis, decide whether
//! to bid now, later, or not at all. The expected profit is converted into
//! destination-chain units by the caller; all price math here stays in
//! those units. Deferred bids live in a due-time priority queue; replacing
//! or cancelling a scheduled bid invalidates the old heap entry by
//! generation.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::config::{BiddingStrategyConfig, TimeStrategy};
use crate::models::Amount;
use crate::strategy::ProfitabilityAnalysis;

use super::AuctionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidTiming {
    Immediate,
    Scheduled,
    Wait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidDecision {
    pub should_bid: bool,
    pub bid_price: Amount,
    pub confidence: f64,
    pub strategy: String,
    pub reasoning: Vec<String>,
    pub timing: BidTiming,
    /// Unix seconds; set when `timing == Scheduled`.
    pub scheduled_at: Option<u64>,
}

impl BidDecision {
    fn wait(strategy: &str, reason: String) -> Self {
        BidDecision {
            should_bid: false,
            bid_price: Amount::ZERO,
            confidence: 0.0,
            strategy: strategy.to_string(),
            reasoning: vec![reason],
            timing: BidTiming::Wait,
            scheduled_at: None,
        }
    }
}

/// Decide a bid for `auction` under `strategy`.
///
/// `expected_profit` is the analysis profit converted to destination-chain
/// smallest units at the current market price. The acceptable ceiling is
/// the destination amount minus that profit: paying more would eat into
/// the edge the analysis promised.
pub fn decide_bid(
    auction: &AuctionInfo,
    strategy: &BiddingStrategyConfig,
    analysis: &ProfitabilityAnalysis,
    expected_profit: Amount,
    now: u64,
) -> BidDecision {
    let name = strategy.name.as_str();
    let progress = auction.progress(now);
    let current_price = auction.current_price;

    let max_acceptable = auction
        .order
        .amounts
        .destination
        .saturating_sub(expected_profit);
    if max_acceptable.is_zero() {
        return BidDecision::wait(
            name,
            "expected profit leaves no acceptable bid range".to_string(),
        );
    }
    if current_price > max_acceptable {
        return BidDecision::wait(
            name,
            format!(
                "current price {} above acceptable ceiling {}",
                current_price, max_acceptable
            ),
        );
    }

    let mut reasoning = Vec::new();
    let window = auction.end_time.saturating_sub(auction.start_time);
    let profit_units = expected_profit.to_f64_for_score();

    let (mut bid_price, timing, scheduled_at) = match strategy.params.time_strategy {
        TimeStrategy::Early => {
            if progress < 0.3 {
                let price = current_price.to_f64_for_score() + 0.1 * profit_units;
                reasoning.push("early entry while competition is thin".to_string());
                (Amount::new(price as u128), BidTiming::Immediate, None)
            } else {
                return BidDecision::wait(name, "early window has passed".to_string());
            }
        }
        TimeStrategy::Late => {
            if progress > 0.8 {
                reasoning.push("late sniping at the current level".to_string());
                (current_price, BidTiming::Immediate, None)
            } else {
                let due = auction.start_time + (window as f64 * 0.8) as u64;
                reasoning.push(format!("deferring until late window at {}", due));
                (current_price, BidTiming::Scheduled, Some(due))
            }
        }
        TimeStrategy::Middle => {
            if (0.4..=0.7).contains(&progress) {
                reasoning.push("mid-auction entry".to_string());
                (current_price, BidTiming::Immediate, None)
            } else if progress < 0.4 {
                let due = auction.start_time + (window as f64 * 0.5) as u64;
                reasoning.push(format!("deferring until mid window at {}", due));
                (current_price, BidTiming::Scheduled, Some(due))
            } else {
                return BidDecision::wait(name, "mid window has passed".to_string());
            }
        }
        TimeStrategy::Dynamic => {
            let aggressiveness = strategy.params.aggressiveness.clamp(0.0, 1.0);
            let price = current_price.to_f64_for_score() + aggressiveness * 0.2 * profit_units;
            reasoning.push(format!(
                "dynamic pricing at aggressiveness {:.2}",
                aggressiveness
            ));
            (Amount::new(price as u128), BidTiming::Immediate, None)
        }
    };

    if bid_price > strategy.params.max_bid_price {
        reasoning.push(format!(
            "clamped to strategy cap {}",
            strategy.params.max_bid_price
        ));
        bid_price = strategy.params.max_bid_price;
    }
    if bid_price > max_acceptable {
        reasoning.push(format!("clamped to acceptable ceiling {}", max_acceptable));
        bid_price = max_acceptable;
    }

    let time_confidence = 1.0 - progress;
    let price_confidence = if max_acceptable.is_zero() {
        0.0
    } else {
        max_acceptable
            .saturating_sub(current_price)
            .to_f64_for_score()
            / max_acceptable.to_f64_for_score()
    };
    let confidence = (time_confidence + price_confidence + analysis.confidence) / 3.0;
    let should_bid = !bid_price.is_zero() && confidence > 0.5;

    BidDecision {
        should_bid,
        bid_price,
        confidence,
        strategy: name.to_string(),
        reasoning,
        timing,
        scheduled_at,
    }
}

/// Pick the highest-priority enabled bidding strategy whose parameters the
/// analysis satisfies.
pub fn select_strategy<'a>(
    strategies: &'a [BiddingStrategyConfig],
    analysis: &ProfitabilityAnalysis,
) -> Option<&'a BiddingStrategyConfig> {
    let mut ranked: Vec<&BiddingStrategyConfig> =
        strategies.iter().filter(|s| s.enabled).collect();
    ranked.sort_by(|a, b| b.priority.cmp(&a.priority));
    ranked.into_iter().find(|s| {
        analysis.profit_margin >= s.params.min_profit_margin
            && analysis.risk_score <= s.params.risk_tolerance
            && analysis.expected_profit_usd > 0.0
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    due_at: u64,
    generation: u64,
    order_id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Deferred-bid queue keyed by due time. One live entry per order;
/// re-scheduling bumps a generation counter so the superseded heap entry
/// is ignored when it surfaces.
#[derive(Debug, Default)]
pub struct BidScheduler {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    live: HashMap<String, u64>,
    next_generation: u64,
}

impl BidScheduler {
    pub fn new() -> Self {
        BidScheduler::default()
    }

    pub fn schedule(&mut self, order_id: &str, due_at: u64) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.live.insert(order_id.to_string(), generation);
        self.heap.push(Reverse(HeapEntry {
            due_at,
            generation,
            order_id: order_id.to_string(),
        }));
    }

    pub fn cancel(&mut self, order_id: &str) -> bool {
        self.live.remove(order_id).is_some()
    }

    pub fn is_scheduled(&self, order_id: &str) -> bool {
        self.live.contains_key(order_id)
    }

    /// Pop every order whose deferred bid is due.
    pub fn due(&mut self, now: u64) -> Vec<String> {
        let mut ready = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due_at > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry exists");
            match self.live.get(&entry.order_id) {
                Some(generation) if *generation == entry.generation => {
                    self.live.remove(&entry.order_id);
                    ready.push(entry.order_id);
                }
                _ => {} // cancelled or superseded
            }
        }
        ready
    }

    pub fn next_due(&mut self, now: u64) -> Option<u64> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            let is_live = self
                .live
                .get(&entry.order_id)
                .map(|g| *g == entry.generation)
                .unwrap_or(false);
            if is_live {
                return Some(entry.due_at.max(now));
            }
            self.heap.pop();
        }
        None
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
