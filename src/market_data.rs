//! Market-data cache.
//!
//! Read-through snapshot keyed by `(chain, token)`. Strategy and risk code
//! read the cached snapshot only; a feed task refreshes entries on a fixed
//! interval so the hot path never blocks on I/O. Consumers treat stale
//! entries as degraded confidence rather than errors.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{Amount, ChainId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub chain_id: ChainId,
    pub token: String,
    /// USD per whole token.
    pub price_usd: f64,
    /// Depth available at the top of book, smallest units.
    pub liquidity: Amount,
    /// Relative bid/ask spread, 0..1.
    pub spread: f64,
    /// Short-horizon realized volatility, 0..1.
    pub volatility: f64,
    pub last_updated: DateTime<Utc>,
}

impl MarketData {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_updated).num_seconds().max(0)
    }
}

#[derive(Debug, Default)]
pub struct MarketDataCache {
    inner: RwLock<HashMap<(ChainId, String), MarketData>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        MarketDataCache {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, chain_id: ChainId, token: &str) -> Option<MarketData> {
        self.inner
            .read()
            .get(&(chain_id, token.to_lowercase()))
            .cloned()
    }

    pub fn put(&self, mut data: MarketData) {
        data.token = data.token.to_lowercase();
        data.last_updated = Utc::now();
        let key = (data.chain_id, data.token.clone());
        self.inner.write().insert(key, data);
    }

    /// Insert without touching the timestamp. Lets tests and replay feeds
    /// control freshness explicitly.
    pub fn put_raw(&self, mut data: MarketData) {
        data.token = data.token.to_lowercase();
        let key = (data.chain_id, data.token.clone());
        self.inner.write().insert(key, data);
    }

    pub fn freshness_secs(&self, chain_id: ChainId, token: &str) -> Option<i64> {
        self.get(chain_id, token).map(|d| d.age_secs(Utc::now()))
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Mock feed: seeds the cache with reference quotes and re-jitters them on
/// an interval. Stands in for live price sources in dry runs and tests.
pub struct MockMarketFeed {
    cache: Arc<MarketDataCache>,
    interval: Duration,
    stopped: Arc<AtomicBool>,
}

impl MockMarketFeed {
    pub fn new(cache: Arc<MarketDataCache>, interval: Duration) -> Self {
        MockMarketFeed {
            cache,
            interval,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reference quotes for the native assets of every supported chain.
    pub fn seed(cache: &MarketDataCache) {
        let quotes = [
            (ChainId::EthereumMainnet, "eth", 3_000.0, 0.001, 0.03),
            (ChainId::EthereumSepolia, "eth", 3_000.0, 0.002, 0.04),
            (ChainId::BitcoinMainnet, "btc", 60_000.0, 0.0008, 0.025),
            (ChainId::BitcoinTestnet, "btc", 60_000.0, 0.002, 0.04),
            (ChainId::BitcoinRegtest, "btc", 60_000.0, 0.002, 0.02),
        ];
        for (chain_id, token, price, spread, volatility) in quotes {
            cache.put(MarketData {
                chain_id,
                token: token.to_string(),
                price_usd: price,
                liquidity: Amount::new(10u128.pow(chain_id.native_decimals() as u32 + 2)),
                spread,
                volatility,
                last_updated: Utc::now(),
            });
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let cache = self.cache.clone();
        let stopped = self.stopped.clone();
        let period = self.interval;

        MockMarketFeed::seed(&cache);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if stopped.load(Ordering::Relaxed) {
                    debug!("mock market feed stopped");
                    break;
                }
                refresh_with_jitter(&cache);
            }
        })
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }
}

fn refresh_with_jitter(cache: &MarketDataCache) {
    let mut rng = rand::thread_rng();
    let snapshot: Vec<MarketData> = cache.inner.read().values().cloned().collect();
    if snapshot.is_empty() {
        warn!("mock market feed has nothing to refresh");
        return;
    }
    for mut data in snapshot {
        // +/-0.5% random walk keeps quotes plausible without trending
        let drift: f64 = rng.gen_range(-0.005..0.005);
        data.price_usd = (data.price_usd * (1.0 + drift)).max(0.01);
        data.volatility = (data.volatility * rng.gen_range(0.9..1.1)).clamp(0.001, 1.0);
        cache.put(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(chain_id: ChainId, token: &str, price: f64) -> MarketData {
        MarketData {
            chain_id,
            token: token.to_string(),
            price_usd: price,
            liquidity: Amount::new(1_000_000),
            spread: 0.001,
            volatility: 0.02,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn get_is_case_insensitive_on_token() {
        let cache = MarketDataCache::new();
        cache.put(quote(ChainId::EthereumMainnet, "0xAbC123", 1.0));
        assert!(cache.get(ChainId::EthereumMainnet, "0xabc123").is_some());
        assert!(cache.get(ChainId::EthereumMainnet, "0xABC123").is_some());
        assert!(cache.get(ChainId::BitcoinMainnet, "0xabc123").is_none());
    }

    #[test]
    fn freshness_reflects_timestamp() {
        let cache = MarketDataCache::new();
        let mut stale = quote(ChainId::BitcoinMainnet, "btc", 60_000.0);
        stale.last_updated = Utc::now() - chrono::Duration::seconds(600);
        cache.put_raw(stale);
        let age = cache.freshness_secs(ChainId::BitcoinMainnet, "btc").unwrap();
        assert!(age >= 600);
    }

    #[test]
    fn seed_covers_all_chains() {
        let cache = MarketDataCache::new();
        MockMarketFeed::seed(&cache);
        assert_eq!(cache.len(), 5);
        assert!(cache.get(ChainId::BitcoinRegtest, "btc").is_some());
    }
}
