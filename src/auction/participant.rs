//! Auction participant.
//!
//! Discovers active auctions, gates each through liquidity, strategy, and
//! risk checks, reserves inventory, times and submits bids, and reconciles
//! outcomes. Won auctions are handed off to the swap executor together
//! with their reservation; every other exit releases the reservation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::events::{EventBus, ResolverEvent};
use crate::liquidity::LiquidityManager;
use crate::market_data::MarketDataCache;
use crate::models::{unix_now, CrossChainSwapState};
use crate::risk::RiskManager;
use crate::strategy::{Recommendation, StrategyEngine};

use super::bidding::{decide_bid, select_strategy, BidScheduler, BidTiming};
use super::relayer::RelayerApi;
use super::{
    AuctionBid, AuctionInfo, AuctionParticipation, AuctionStatus, ParticipationStatus,
};

/// Reservation kept alive one hour past auction end before the reaper may
/// reclaim it.
const RESERVATION_GRACE_SECS: u64 = 3_600;

/// A won auction ready for execution.
#[derive(Debug)]
pub struct ExecutionHandoff {
    pub order: CrossChainSwapState,
    pub reservation_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParticipantMetrics {
    pub bids_placed: u64,
    pub auctions_won: u64,
    pub auctions_lost: u64,
}

#[derive(Default)]
struct ParticipantState {
    active_auctions: std::collections::HashMap<String, AuctionInfo>,
    participations: std::collections::HashMap<String, AuctionParticipation>,
}

pub struct AuctionParticipant {
    config: Arc<ResolverConfig>,
    relayer: Arc<dyn RelayerApi>,
    strategy_engine: Arc<StrategyEngine>,
    risk: Arc<RiskManager>,
    liquidity: Arc<LiquidityManager>,
    market_data: Arc<MarketDataCache>,
    events: EventBus,
    state: RwLock<ParticipantState>,
    scheduler: Mutex<BidScheduler>,
    metrics: Mutex<ParticipantMetrics>,
    shutting_down: AtomicBool,
    exec_tx: mpsc::Sender<ExecutionHandoff>,
}

impl AuctionParticipant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ResolverConfig>,
        relayer: Arc<dyn RelayerApi>,
        strategy_engine: Arc<StrategyEngine>,
        risk: Arc<RiskManager>,
        liquidity: Arc<LiquidityManager>,
        market_data: Arc<MarketDataCache>,
        events: EventBus,
    ) -> (Self, mpsc::Receiver<ExecutionHandoff>) {
        let (exec_tx, exec_rx) = mpsc::channel(64);
        let participant = AuctionParticipant {
            config,
            relayer,
            strategy_engine,
            risk,
            liquidity,
            market_data,
            events,
            state: RwLock::new(ParticipantState::default()),
            scheduler: Mutex::new(BidScheduler::new()),
            metrics: Mutex::new(ParticipantMetrics::default()),
            shutting_down: AtomicBool::new(false),
            exec_tx,
        };
        (participant, exec_rx)
    }

    /// Cooperative main loop: discovery/status on one cadence, price
    /// refresh and deferred bids on another. Runs until `shutdown`.
    pub async fn run(&self) {
        let mut poll = tokio::time::interval(Duration::from_millis(
            self.config.monitoring.poll_interval_ms.max(100),
        ));
        let mut price = tokio::time::interval(Duration::from_millis(
            self.config.monitoring.price_update_interval_ms.max(100),
        ));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        price.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("auction participant started");
        loop {
            if self.shutting_down.load(Ordering::Relaxed) {
                break;
            }
            tokio::select! {
                _ = poll.tick() => {
                    self.poll_auctions().await;
                    self.liquidity.reap_expired(unix_now());
                    self.risk.evaluate_circuit_breakers();
                }
                _ = price.tick() => {
                    self.update_prices().await;
                    self.fire_due_bids().await;
                }
            }
        }
        info!("auction participant stopped");
    }

    /// Discovery plus outcome reconciliation.
    pub async fn poll_auctions(&self) {
        let listed = match self.relayer.list_active_auctions().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "failed to list active auctions");
                return;
            }
        };

        let known: Vec<String> = {
            let state = self.state.read().await;
            state.participations.keys().cloned().collect()
        };

        for auction in listed {
            if auction.status != AuctionStatus::Active {
                continue;
            }
            let is_new = {
                let state = self.state.read().await;
                !state.active_auctions.contains_key(&auction.order_id)
                    && !state.participations.contains_key(&auction.order_id)
            };
            if is_new {
                self.events.emit(ResolverEvent::AuctionDiscovered {
                    order_id: auction.order_id.clone(),
                });
                self.evaluate_new_auction(auction).await;
            } else {
                let mut state = self.state.write().await;
                if let Some(existing) = state.active_auctions.get_mut(&auction.order_id) {
                    existing.current_price = auction.current_price;
                    existing.status = auction.status;
                    existing.last_update = Utc::now();
                }
            }
        }

        // Outcomes for everything we entered
        for order_id in known {
            self.check_outcome(&order_id).await;
        }
    }

    /// Gate a newly discovered auction and enter it if everything passes.
    async fn evaluate_new_auction(&self, auction: AuctionInfo) {
        let order_id = auction.order_id.clone();
        if self.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        if self.risk.is_emergency_stopped() || self.risk.is_paused() {
            debug!(order_id, "risk manager is halted; not entering auction");
            return;
        }

        let active_count = {
            let state = self.state.read().await;
            state
                .participations
                .values()
                .filter(|p| {
                    matches!(
                        p.status,
                        ParticipationStatus::Monitoring | ParticipationStatus::Bidding
                    )
                })
                .count()
        };
        if active_count >= self.config.max_concurrent_auctions {
            debug!(order_id, active_count, "concurrent auction limit reached");
            return;
        }

        let liquidity = self.liquidity.check(&auction.order);
        if !liquidity.available {
            debug!(
                order_id,
                reason = liquidity.reason.as_deref().unwrap_or("unknown"),
                "insufficient liquidity for auction"
            );
            return;
        }

        let analysis = match self.strategy_engine.analyze(&auction.order) {
            Ok(a) => a,
            Err(e) => {
                warn!(order_id, error = %e, "profitability analysis failed");
                return;
            }
        };
        if analysis.recommendation != Recommendation::Accept {
            debug!(
                order_id,
                recommendation = ?analysis.recommendation,
                "analysis did not recommend entering"
            );
            return;
        }

        let assessment = self
            .risk
            .assess_order(&auction.order, Some(analysis.confidence));
        if !assessment.approved {
            info!(
                order_id,
                reasons = ?assessment.rejection_reasons,
                "risk assessment rejected order"
            );
            return;
        }

        let Some(strategy) = select_strategy(&self.config.bidding_strategies, &analysis) else {
            debug!(order_id, "no bidding strategy accepts this order");
            return;
        };
        let strategy_name = strategy.name.clone();

        let reservation_id = match self.liquidity.reserve(
            &order_id,
            auction.order.destination_chain.chain_id,
            &auction.order.destination_chain.token,
            auction.order.amounts.destination,
            auction.end_time + RESERVATION_GRACE_SECS,
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!(order_id, error = %e, "liquidity reservation failed");
                return;
            }
        };

        let participation = AuctionParticipation {
            auction_id: order_id.clone(),
            order_id: order_id.clone(),
            status: ParticipationStatus::Monitoring,
            my_bids: Vec::new(),
            best_bid: None,
            strategy: strategy_name,
            analysis: Some(analysis),
            reservation_id: Some(reservation_id),
            started_at: Utc::now(),
            last_activity: Utc::now(),
        };

        {
            let mut state = self.state.write().await;
            state.active_auctions.insert(order_id.clone(), auction);
            state.participations.insert(order_id.clone(), participation);
        }
        info!(order_id, "entered auction");
        self.try_bid(&order_id).await;
    }

    /// Refresh Dutch prices and re-evaluate bids for monitored auctions.
    pub async fn update_prices(&self) {
        let auction_ids: Vec<String> = {
            let state = self.state.read().await;
            state.active_auctions.keys().cloned().collect()
        };

        for order_id in auction_ids {
            match self.relayer.get_auction_price(&order_id).await {
                Ok(price) => {
                    let changed = {
                        let mut state = self.state.write().await;
                        match state.active_auctions.get_mut(&order_id) {
                            Some(auction) if auction.current_price != price => {
                                auction.current_price = price;
                                auction.last_update = Utc::now();
                                true
                            }
                            _ => false,
                        }
                    };
                    if changed {
                        self.events.emit(ResolverEvent::PriceUpdated {
                            order_id: order_id.clone(),
                            price,
                        });
                        self.try_bid(&order_id).await;
                    }
                }
                Err(e) => debug!(order_id, error = %e, "price refresh failed"),
            }
        }
    }

    /// Submit every deferred bid whose time has come.
    pub async fn fire_due_bids(&self) {
        let due = self.scheduler.lock().due(unix_now());
        for order_id in due {
            debug!(order_id, "scheduled bid due");
            self.try_bid(&order_id).await;
        }
    }

    /// Evaluate the bid decision for a monitored auction and act on it.
    async fn try_bid(&self, order_id: &str) {
        if self.shutting_down.load(Ordering::Relaxed) || self.risk.is_emergency_stopped() {
            return;
        }

        let (auction, analysis, strategy_name) = {
            let state = self.state.read().await;
            let Some(participation) = state.participations.get(order_id) else {
                return;
            };
            if participation.status != ParticipationStatus::Monitoring {
                return;
            }
            let Some(auction) = state.active_auctions.get(order_id) else {
                return;
            };
            let Some(analysis) = participation.analysis.clone() else {
                return;
            };
            (auction.clone(), analysis, participation.strategy.clone())
        };

        let Some(strategy) = self
            .config
            .bidding_strategies
            .iter()
            .find(|s| s.name == strategy_name)
        else {
            return;
        };

        // Expected profit in destination-chain units at the current quote
        let dest_chain = auction.order.destination_chain.chain_id;
        let Some(dest_md) = self
            .market_data
            .get(dest_chain, dest_chain.native_token())
        else {
            debug!(order_id, "no destination market data; deferring bid");
            return;
        };
        let expected_profit = crate::models::Amount::from_usd_at_price(
            analysis.expected_profit_usd,
            dest_md.price_usd,
            dest_chain.native_decimals(),
        );

        let decision = decide_bid(&auction, strategy, &analysis, expected_profit, unix_now());
        debug!(
            order_id,
            timing = ?decision.timing,
            price = %decision.bid_price,
            confidence = decision.confidence,
            "bid decision"
        );

        match decision.timing {
            BidTiming::Immediate if decision.should_bid => {
                self.submit_bid(order_id, decision.bid_price).await;
            }
            BidTiming::Scheduled => {
                if let Some(due) = decision.scheduled_at {
                    self.scheduler.lock().schedule(order_id, due);
                }
            }
            _ => {}
        }
    }

    async fn submit_bid(&self, order_id: &str, price: crate::models::Amount) {
        let bid = AuctionBid {
            resolver: self.config.resolver_address.clone(),
            price,
            expires_at: unix_now() + self.config.bid_timeout_secs,
        };

        match self.relayer.submit_bid(order_id, &bid).await {
            Ok(placed) => {
                info!(order_id, price = %placed.price, bid_id = %placed.bid_id, "bid placed");
                {
                    let mut state = self.state.write().await;
                    if let Some(participation) = state.participations.get_mut(order_id) {
                        participation.status = ParticipationStatus::Bidding;
                        participation.my_bids.push(placed);
                        participation.last_activity = Utc::now();
                    }
                }
                self.metrics.lock().bids_placed += 1;
                self.events.emit(ResolverEvent::BidPlaced {
                    order_id: order_id.to_string(),
                    price,
                });
            }
            Err(e) => {
                let message = e.to_string();
                let transient = ["429", "500", "502", "503", "504", "timed out", "timeout"]
                    .iter()
                    .any(|needle| message.contains(needle));
                if transient {
                    let retry_at = unix_now()
                        + (self.config.monitoring.reconnect_delay_ms / 1_000).max(1);
                    warn!(order_id, error = %message, retry_at, "bid submission throttled; rescheduling");
                    self.scheduler.lock().schedule(order_id, retry_at);
                } else {
                    warn!(order_id, error = %message, "bid submission failed; cancelling participation");
                    self.cancel_participation(order_id).await;
                }
            }
        }
    }

    /// Reconcile the outcome for one participation.
    async fn check_outcome(&self, order_id: &str) {
        let participation_status = {
            let state = self.state.read().await;
            state.participations.get(order_id).map(|p| p.status)
        };
        let Some(status) = participation_status else {
            return;
        };
        if !matches!(
            status,
            ParticipationStatus::Monitoring | ParticipationStatus::Bidding
        ) {
            return;
        }

        match self.relayer.get_auction_result(order_id).await {
            Ok(Some(result)) => match result.status {
                AuctionStatus::Settled => {
                    let winner = result
                        .winning_bid
                        .as_ref()
                        .map(|b| b.resolver.to_lowercase());
                    let ours = self.config.resolver_address.to_lowercase();
                    if winner.as_deref() == Some(ours.as_str()) {
                        self.finish_won(order_id).await;
                    } else {
                        self.finish_lost(order_id).await;
                    }
                }
                AuctionStatus::Ended | AuctionStatus::Cancelled => {
                    self.cancel_participation(order_id).await;
                }
                AuctionStatus::Active => {}
            },
            // Not settled yet
            Ok(None) => {
                // An auction that ended without settling will never settle
                match self.relayer.get_auction_status(order_id).await {
                    Ok(AuctionStatus::Ended) | Ok(AuctionStatus::Cancelled) => {
                        self.cancel_participation(order_id).await;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(order_id, error = %e, "status check failed; will retry"),
                }
            }
            Err(e) => {
                debug!(order_id, error = %e, "result check failed; will retry");
            }
        }
    }

    async fn finish_won(&self, order_id: &str) {
        let handoff = {
            let mut state = self.state.write().await;
            let Some(participation) = state.participations.get_mut(order_id) else {
                return;
            };
            participation.status = ParticipationStatus::Won;
            participation.last_activity = Utc::now();
            let reservation_id = participation.reservation_id;
            let order = state
                .active_auctions
                .get(order_id)
                .map(|a| a.order.clone());
            state.active_auctions.remove(order_id);
            match (order, reservation_id) {
                (Some(order), Some(reservation_id)) => Some(ExecutionHandoff {
                    order,
                    reservation_id,
                }),
                _ => None,
            }
        };

        info!(order_id, "auction won");
        self.metrics.lock().auctions_won += 1;
        self.events.emit(ResolverEvent::AuctionWon {
            order_id: order_id.to_string(),
        });

        match handoff {
            Some(handoff) => {
                if let Err(e) = self.exec_tx.send(handoff).await {
                    warn!(order_id, error = %e, "executor handoff failed; releasing reservation");
                    let reservation = {
                        let state = self.state.read().await;
                        state
                            .participations
                            .get(order_id)
                            .and_then(|p| p.reservation_id)
                    };
                    if let Some(id) = reservation {
                        self.liquidity.release(id);
                    }
                }
            }
            None => warn!(order_id, "won auction had no order or reservation attached"),
        }
    }

    async fn finish_lost(&self, order_id: &str) {
        let reservation = {
            let mut state = self.state.write().await;
            state.active_auctions.remove(order_id);
            match state.participations.get_mut(order_id) {
                Some(participation) => {
                    participation.status = ParticipationStatus::Lost;
                    participation.last_activity = Utc::now();
                    participation.reservation_id.take()
                }
                None => None,
            }
        };
        if let Some(id) = reservation {
            self.liquidity.release(id);
        }
        self.scheduler.lock().cancel(order_id);
        info!(order_id, "auction lost");
        self.metrics.lock().auctions_lost += 1;
        self.events.emit(ResolverEvent::AuctionLost {
            order_id: order_id.to_string(),
        });
    }

    /// Abandon a participation (auction gone, submission failed hard, or
    /// shutdown) and release its hold.
    async fn cancel_participation(&self, order_id: &str) {
        let reservation = {
            let mut state = self.state.write().await;
            state.active_auctions.remove(order_id);
            match state.participations.get_mut(order_id) {
                Some(participation) => {
                    participation.status = ParticipationStatus::Cancelled;
                    participation.last_activity = Utc::now();
                    participation.reservation_id.take()
                }
                None => None,
            }
        };
        if let Some(id) = reservation {
            self.liquidity.release(id);
        }
        self.scheduler.lock().cancel(order_id);
        info!(order_id, "participation cancelled");
    }

    /// Stop timers, clear scheduled bids, and cancel open participations.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.scheduler.lock().clear();

        let open: Vec<String> = {
            let state = self.state.read().await;
            state
                .participations
                .values()
                .filter(|p| {
                    matches!(
                        p.status,
                        ParticipationStatus::Monitoring | ParticipationStatus::Bidding
                    )
                })
                .map(|p| p.order_id.clone())
                .collect()
        };
        for order_id in open {
            self.cancel_participation(&order_id).await;
        }
        info!("auction participant shut down");
    }

    pub async fn participation(&self, order_id: &str) -> Option<AuctionParticipation> {
        self.state.read().await.participations.get(order_id).cloned()
    }

    pub async fn active_auction(&self, order_id: &str) -> Option<AuctionInfo> {
        self.state.read().await.active_auctions.get(order_id).cloned()
    }

    pub fn scheduled_bid_count(&self) -> usize {
        self.scheduler.lock().len()
    }

    pub fn metrics(&self) -> ParticipantMetrics {
        *self.metrics.lock()
    }
}
