//! Swapbot resolver library.
//!
//! An autonomous resolver for cross-chain atomic swaps between an EVM
//! chain and Bitcoin: it discovers Dutch auctions published by a relayer,
//! gates each order through profitability and risk checks, bids, and on
//! winning drives the two-chain hash-timelock swap to completion.

pub mod auction;
pub mod chains;
pub mod config;
pub mod events;
pub mod executor;
pub mod liquidity;
pub mod market_data;
pub mod models;
pub mod risk;
pub mod strategy;

use std::sync::Arc;

pub use auction::{AuctionParticipant, ExecutionHandoff};
pub use config::ResolverConfig;
pub use events::{EventBus, ResolverEvent};
pub use executor::SwapExecutor;
pub use liquidity::LiquidityManager;
pub use market_data::MarketDataCache;
pub use risk::RiskManager;
pub use strategy::StrategyEngine;

/// Relayer client for the configured mode: the in-memory relayer during
/// dry runs, the HTTP client against a live relayer otherwise.
pub fn relayer_client(config: &ResolverConfig) -> Arc<dyn auction::RelayerApi> {
    if config.dry_run {
        Arc::new(auction::InMemoryRelayer::new())
    } else {
        Arc::new(auction::HttpRelayerClient::new(
            &config.relayer_url,
            config.networking.clone(),
        ))
    }
}
