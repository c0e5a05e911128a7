//! Relayer API boundary.
//!
//! The participant talks to the relayer through the [`RelayerApi`] trait so
//! tests can inject a deterministic in-memory relayer. The live client is a
//! rate-limited reqwest wrapper with exponential-backoff retries on reads;
//! bid submission is left unretried so the caller can classify failures.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NetworkingConfig;
use crate::models::{unix_now, Amount};

use super::{AuctionBid, AuctionInfo, AuctionResult, AuctionStatus, PlacedBid};

#[async_trait]
pub trait RelayerApi: Send + Sync {
    async fn list_active_auctions(&self) -> Result<Vec<AuctionInfo>>;
    async fn get_auction_price(&self, order_id: &str) -> Result<Amount>;
    async fn get_auction_status(&self, order_id: &str) -> Result<AuctionStatus>;
    /// `Ok(None)` means the auction has not settled yet (HTTP 404).
    async fn get_auction_result(&self, order_id: &str) -> Result<Option<AuctionResult>>;
    async fn submit_bid(&self, order_id: &str, bid: &AuctionBid) -> Result<PlacedBid>;
}

/// Sliding-window request throttle shared by all relayer calls.
struct RateLimiter {
    requests_per_10s: u32,
    current_requests: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new(requests_per_10s: u32) -> Self {
        RateLimiter {
            requests_per_10s,
            current_requests: 0,
            window_start: Instant::now(),
        }
    }

    /// Returns how long the caller must sleep before sending.
    fn acquire(&mut self) -> Duration {
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(10) {
            self.current_requests = 0;
            self.window_start = Instant::now();
        }
        if self.current_requests >= self.requests_per_10s {
            let wait = Duration::from_secs(10).saturating_sub(elapsed);
            self.current_requests = 1;
            self.window_start = Instant::now() + wait;
            return wait;
        }
        self.current_requests += 1;
        Duration::ZERO
    }
}

pub struct HttpRelayerClient {
    client: Client,
    base_url: String,
    networking: NetworkingConfig,
    limiter: Mutex<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Amount,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: AuctionStatus,
}

impl HttpRelayerClient {
    pub fn new(base_url: &str, networking: NetworkingConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(networking.timeout_ms))
            .user_agent("swapbot/0.1 (resolver)")
            .build()
            .expect("failed to build HTTP client");
        HttpRelayerClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            networking,
            limiter: Mutex::new(RateLimiter::new(100)),
        }
    }

    async fn throttle(&self) {
        let wait = self.limiter.lock().acquire();
        if wait > Duration::ZERO {
            debug!("relayer rate limit: waiting {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// GET with exponential backoff. 404 is surfaced as `Ok(None)` so
    /// callers can treat it as "not there yet" rather than a failure.
    async fn get_with_retry(&self, path: &str) -> Result<Option<reqwest::Response>> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = self.networking.retry_delay_ms.max(1);

        for attempt in 0..=self.networking.max_retries {
            self.throttle().await;
            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        warn!(url = %url, %status, attempt, "relayer busy, backing off");
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        bail!("relayer error {} on {}: {}", status, url, body);
                    }
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "relayer request failed");
                }
            }
            if attempt < self.networking.max_retries {
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }
        bail!("max retries exceeded for {}", url)
    }
}

#[async_trait]
impl RelayerApi for HttpRelayerClient {
    async fn list_active_auctions(&self) -> Result<Vec<AuctionInfo>> {
        let response = self
            .get_with_retry("/api/auctions/active")
            .await?
            .context("active auction listing returned 404")?;
        response
            .json()
            .await
            .context("failed to parse active auctions")
    }

    async fn get_auction_price(&self, order_id: &str) -> Result<Amount> {
        let response = self
            .get_with_retry(&format!("/api/auctions/{}/price", order_id))
            .await?
            .with_context(|| format!("auction {} not found", order_id))?;
        let price: PriceResponse = response.json().await.context("failed to parse price")?;
        Ok(price.price)
    }

    async fn get_auction_status(&self, order_id: &str) -> Result<AuctionStatus> {
        let response = self
            .get_with_retry(&format!("/api/auctions/{}/status", order_id))
            .await?
            .with_context(|| format!("auction {} not found", order_id))?;
        let status: StatusResponse = response.json().await.context("failed to parse status")?;
        Ok(status.status)
    }

    async fn get_auction_result(&self, order_id: &str) -> Result<Option<AuctionResult>> {
        let Some(response) = self
            .get_with_retry(&format!("/api/auctions/{}/result", order_id))
            .await?
        else {
            return Ok(None);
        };
        let result: AuctionResult = response.json().await.context("failed to parse result")?;
        Ok(Some(result))
    }

    async fn submit_bid(&self, order_id: &str, bid: &AuctionBid) -> Result<PlacedBid> {
        self.throttle().await;
        let url = format!("{}/api/auctions/{}/bids", self.base_url, order_id);
        let response = self
            .client
            .post(&url)
            .json(bid)
            .send()
            .await
            .with_context(|| format!("bid submission to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Status code stays in the message so retry classification can
            // distinguish 429/5xx from hard rejections
            bail!("bid rejected with {} on {}: {}", status, url, body);
        }
        response.json().await.context("failed to parse placed bid")
    }
}

struct MemAuction {
    info: AuctionInfo,
    bids: Vec<PlacedBid>,
    result: Option<AuctionResult>,
}

/// Deterministic relayer for tests and dry runs. Prices follow the linear
/// Dutch descent; a bid at or above the current price settles the auction
/// immediately for that resolver.
#[derive(Default)]
pub struct InMemoryRelayer {
    auctions: Mutex<HashMap<String, MemAuction>>,
}

impl InMemoryRelayer {
    pub fn new() -> Self {
        InMemoryRelayer {
            auctions: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_auction(&self, info: AuctionInfo) {
        self.auctions.lock().insert(
            info.order_id.clone(),
            MemAuction {
                info,
                bids: Vec::new(),
                result: None,
            },
        );
    }

    pub fn end_auction(&self, order_id: &str) {
        let mut auctions = self.auctions.lock();
        if let Some(auction) = auctions.get_mut(order_id) {
            if auction.result.is_none() {
                auction.info.status = AuctionStatus::Ended;
                auction.result = Some(AuctionResult {
                    status: AuctionStatus::Ended,
                    winning_bid: None,
                });
            }
        }
    }

    pub fn settle_for(&self, order_id: &str, resolver: &str) {
        let mut auctions = self.auctions.lock();
        if let Some(auction) = auctions.get_mut(order_id) {
            auction.info.status = AuctionStatus::Settled;
            let winning = auction
                .bids
                .iter()
                .find(|b| b.resolver == resolver)
                .cloned()
                .unwrap_or(PlacedBid {
                    bid_id: Uuid::new_v4().to_string(),
                    resolver: resolver.to_string(),
                    price: auction.info.current_price,
                    expires_at: unix_now() + 300,
                });
            auction.result = Some(AuctionResult {
                status: AuctionStatus::Settled,
                winning_bid: Some(winning),
            });
        }
    }

    pub fn bids_for(&self, order_id: &str) -> Vec<PlacedBid> {
        self.auctions
            .lock()
            .get(order_id)
            .map(|a| a.bids.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelayerApi for InMemoryRelayer {
    async fn list_active_auctions(&self) -> Result<Vec<AuctionInfo>> {
        let now = unix_now();
        let mut auctions = self.auctions.lock();
        let mut active = Vec::new();
        for auction in auctions.values_mut() {
            if auction.info.status == AuctionStatus::Active {
                if now >= auction.info.end_time {
                    auction.info.status = AuctionStatus::Ended;
                    auction.result.get_or_insert(AuctionResult {
                        status: AuctionStatus::Ended,
                        winning_bid: None,
                    });
                    continue;
                }
                auction.info.current_price = auction.info.price_at(now);
                auction.info.last_update = Utc::now();
                active.push(auction.info.clone());
            }
        }
        Ok(active)
    }

    async fn get_auction_price(&self, order_id: &str) -> Result<Amount> {
        let now = unix_now();
        let mut auctions = self.auctions.lock();
        let auction = auctions
            .get_mut(order_id)
            .with_context(|| format!("auction {} not found", order_id))?;
        auction.info.current_price = auction.info.price_at(now);
        Ok(auction.info.current_price)
    }

    async fn get_auction_status(&self, order_id: &str) -> Result<AuctionStatus> {
        let auctions = self.auctions.lock();
        let auction = auctions
            .get(order_id)
            .with_context(|| format!("auction {} not found", order_id))?;
        Ok(auction.info.status)
    }

    async fn get_auction_result(&self, order_id: &str) -> Result<Option<AuctionResult>> {
        let auctions = self.auctions.lock();
        let auction = auctions
            .get(order_id)
            .with_context(|| format!("auction {} not found", order_id))?;
        Ok(auction.result.clone())
    }

    async fn submit_bid(&self, order_id: &str, bid: &AuctionBid) -> Result<PlacedBid> {
        let now = unix_now();
        let mut auctions = self.auctions.lock();
        let auction = auctions
            .get_mut(order_id)
            .with_context(|| format!("auction {} not found", order_id))?;
        if auction.info.status != AuctionStatus::Active {
            bail!("auction {} is no longer active", order_id);
        }
        let current = auction.info.price_at(now);
        let placed = PlacedBid {
            bid_id: Uuid::new_v4().to_string(),
            resolver: bid.resolver.clone(),
            price: bid.price,
            expires_at: bid.expires_at,
        };
        auction.bids.push(placed.clone());
        // Dutch settlement: any bid at or above the current level wins
        if bid.price >= current {
            auction.info.status = AuctionStatus::Settled;
            auction.result = Some(AuctionResult {
                status: AuctionStatus::Settled,
                winning_bid: Some(placed.clone()),
            });
        }
        Ok(placed)
    }
}
