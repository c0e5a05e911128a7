//! Dutch-auction participation.
//!
//! The relayer runs descending-price auctions over cross-chain orders.
//! This module holds the shared auction records, the relayer API boundary
//! (`relayer`), the bid-decision engine (`bidding`), and the participant
//! loop that ties discovery, gating, bidding, and outcome reconciliation
//! together (`participant`).

pub mod bidding;
pub mod participant;
pub mod relayer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Amount, CrossChainSwapState};
use crate::strategy::ProfitabilityAnalysis;

pub use bidding::{BidDecision, BidScheduler, BidTiming};
pub use participant::{AuctionParticipant, ExecutionHandoff, ParticipantMetrics};
pub use relayer::{HttpRelayerClient, InMemoryRelayer, RelayerApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Active,
    Ended,
    Settled,
    Cancelled,
}

/// Dutch parameters: the price walks from `start_price` down to
/// `reserve_price` over the auction window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuctionParams {
    pub start_price: Amount,
    pub reserve_price: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionInfo {
    pub order_id: String,
    pub order: CrossChainSwapState,
    pub params: AuctionParams,
    /// Unix seconds.
    pub start_time: u64,
    pub end_time: u64,
    pub current_price: Amount,
    pub status: AuctionStatus,
    pub last_update: DateTime<Utc>,
}

impl AuctionInfo {
    /// Elapsed fraction of the auction window, clamped to 0..1.
    pub fn progress(&self, now: u64) -> f64 {
        if self.end_time <= self.start_time {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.start_time) as f64;
        let window = (self.end_time - self.start_time) as f64;
        (elapsed / window).clamp(0.0, 1.0)
    }

    /// Price implied by linear Dutch descent at `now`.
    pub fn price_at(&self, now: u64) -> Amount {
        let start = self.params.start_price.to_f64_for_score();
        let reserve = self.params.reserve_price.to_f64_for_score();
        let price = start - (start - reserve).max(0.0) * self.progress(now);
        Amount::new(price.max(0.0) as u128)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionBid {
    pub resolver: String,
    pub price: Amount,
    /// Unix seconds after which the bid lapses.
    pub expires_at: u64,
}

/// A bid the relayer accepted and assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedBid {
    pub bid_id: String,
    pub resolver: String,
    pub price: Amount,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionResult {
    pub status: AuctionStatus,
    pub winning_bid: Option<PlacedBid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Monitoring,
    Bidding,
    Won,
    Lost,
    Cancelled,
}

/// The resolver's view of one auction it decided to enter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionParticipation {
    pub auction_id: String,
    pub order_id: String,
    pub status: ParticipationStatus,
    pub my_bids: Vec<PlacedBid>,
    pub best_bid: Option<AuctionBid>,
    /// Name of the bidding strategy driving this participation.
    pub strategy: String,
    pub analysis: Option<ProfitabilityAnalysis>,
    pub reservation_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ChainId, ChainRef, Secret, SwapAmounts, SwapStatus, SwapTimelocks,
    };

    fn auction(start: u64, end: u64, start_price: u128, reserve: u128) -> AuctionInfo {
        let now = crate::models::unix_now();
        let order = CrossChainSwapState {
            order_id: "o".to_string(),
            maker: "0xmaker".to_string(),
            source_chain: ChainRef::native(ChainId::EthereumMainnet),
            destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
            amounts: SwapAmounts {
                source: Amount::new(1),
                destination: Amount::new(start_price),
            },
            timelocks: SwapTimelocks {
                source: now + 7200,
                destination: now + 3600,
            },
            secret_hash: Secret::from_bytes([0u8; 32]).hash(),
            status: SwapStatus::AuctionStarted,
            secret: None,
        };
        AuctionInfo {
            order_id: "o".to_string(),
            order,
            params: AuctionParams {
                start_price: Amount::new(start_price),
                reserve_price: Amount::new(reserve),
            },
            start_time: start,
            end_time: end,
            current_price: Amount::new(start_price),
            status: AuctionStatus::Active,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn progress_clamps_to_window() {
        let a = auction(1_000, 2_000, 100, 50);
        assert_eq!(a.progress(500), 0.0);
        assert_eq!(a.progress(1_500), 0.5);
        assert_eq!(a.progress(3_000), 1.0);
    }

    #[test]
    fn dutch_price_descends_linearly() {
        let a = auction(1_000, 2_000, 4_000_000, 2_000_000);
        assert_eq!(a.price_at(1_000), Amount::new(4_000_000));
        assert_eq!(a.price_at(1_500), Amount::new(3_000_000));
        assert_eq!(a.price_at(2_500), Amount::new(2_000_000));
    }
}
