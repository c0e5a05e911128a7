//! End-to-end resolver flows against the in-memory relayer and simulated
//! chains: discovery, gating, bidding, settlement, execution, and the
//! failure paths that must release liquidity and schedule refunds.

use std::sync::Arc;

use tokio::sync::mpsc;

use swapbot_resolver::auction::{AuctionInfo, AuctionParams, AuctionParticipant, AuctionStatus};
use swapbot_resolver::auction::{InMemoryRelayer, ParticipationStatus};
use swapbot_resolver::chains::ethereum::SimulatedEscrowClient;
use swapbot_resolver::chains::mock::SimulatedBitcoinClient;
use swapbot_resolver::config::ResolverConfig;
use swapbot_resolver::events::{EventBus, EventEnvelope, ResolverEvent};
use swapbot_resolver::executor::{ExecutionStage, HtlcKeys, SwapExecutor};
use swapbot_resolver::liquidity::LiquidityManager;
use swapbot_resolver::market_data::{MarketDataCache, MockMarketFeed};
use swapbot_resolver::models::{
    unix_now, validate_secret, Amount, ChainId, ChainRef, CrossChainSwapState, EscrowSide, Secret,
    SwapAmounts, SwapStatus, SwapTimelocks,
};
use swapbot_resolver::risk::{ExposureKind, RiskManager};
use swapbot_resolver::strategy::StrategyEngine;

const RESOLVER_ADDRESS: &str = "0xresolverbot";
const ONE_ETH: u128 = 1_000_000_000_000_000_000;
const ONE_BTC_SATS: u128 = 100_000_000;

struct Harness {
    relayer: Arc<InMemoryRelayer>,
    participant: Arc<AuctionParticipant>,
    executor: Arc<SwapExecutor>,
    liquidity: Arc<LiquidityManager>,
    risk: Arc<RiskManager>,
    btc: Arc<SimulatedBitcoinClient>,
    eth: Arc<SimulatedEscrowClient>,
    handoff_rx: mpsc::Receiver<swapbot_resolver::ExecutionHandoff>,
    events_rx: tokio::sync::broadcast::Receiver<EventEnvelope>,
}

fn test_config() -> ResolverConfig {
    let mut config = ResolverConfig::default();
    config.resolver_address = RESOLVER_ADDRESS.to_string();
    config.execution.execution.secret_reveal_delay_secs = 0;
    config.execution.execution.retry_delay_ms = 10;
    config.execution.ethereum.confirmations = 1;
    config.execution.bitcoin.confirmations = 1;
    config
}

fn harness() -> Harness {
    let config = Arc::new(test_config());
    let events = EventBus::new();
    let events_rx = events.subscribe();

    let market_data = Arc::new(MarketDataCache::new());
    MockMarketFeed::seed(&market_data);

    let liquidity = Arc::new(LiquidityManager::new());
    liquidity.deposit(ChainId::BitcoinMainnet, "btc", Amount::new(ONE_BTC_SATS));
    liquidity.deposit(ChainId::EthereumMainnet, "eth", Amount::new(10 * ONE_ETH));

    let risk = Arc::new(RiskManager::new(
        config.risk.clone(),
        market_data.clone(),
        events.clone(),
    ));
    let strategy_engine = Arc::new(StrategyEngine::new(&config.strategy, market_data.clone()));
    let relayer = Arc::new(InMemoryRelayer::new());

    let (participant, handoff_rx) = AuctionParticipant::new(
        config.clone(),
        relayer.clone(),
        strategy_engine,
        risk.clone(),
        liquidity.clone(),
        market_data,
        events.clone(),
    );

    let btc = Arc::new(SimulatedBitcoinClient::new(ONE_BTC_SATS));
    let eth = Arc::new(SimulatedEscrowClient::new(ChainId::EthereumMainnet, 1));
    let htlc_keys = HtlcKeys {
        user_pubkey: btc.resolver_pubkey(),
        resolver_pubkey: btc.resolver_pubkey(),
    };
    let executor = SwapExecutor::new(
        eth.clone(),
        btc.clone(),
        liquidity.clone(),
        risk.clone(),
        events,
        config.execution.clone(),
        htlc_keys,
    );

    Harness {
        relayer,
        participant: Arc::new(participant),
        executor,
        liquidity,
        risk,
        btc,
        eth,
        handoff_rx,
        events_rx,
    }
}

fn test_secret() -> Secret {
    Secret::from_bytes([0u8; 32])
}

fn eth_btc_order(order_id: &str, source_timelock: u64, dest_timelock: u64) -> CrossChainSwapState {
    CrossChainSwapState {
        order_id: order_id.to_string(),
        maker: "0xmakerabcdef".to_string(),
        source_chain: ChainRef::native(ChainId::EthereumMainnet),
        destination_chain: ChainRef::native(ChainId::BitcoinMainnet),
        amounts: SwapAmounts {
            source: Amount::new(ONE_ETH),
            destination: Amount::new(4_000_000),
        },
        timelocks: SwapTimelocks {
            source: source_timelock,
            destination: dest_timelock,
        },
        secret_hash: test_secret().hash(),
        status: SwapStatus::AuctionStarted,
        secret: Some(test_secret()),
    }
}

fn auction_for(order: CrossChainSwapState, start_price: u128, reserve: u128) -> AuctionInfo {
    let now = unix_now();
    AuctionInfo {
        order_id: order.order_id.clone(),
        order,
        params: AuctionParams {
            start_price: Amount::new(start_price),
            reserve_price: Amount::new(reserve),
        },
        start_time: now - 60,
        end_time: now + 540,
        current_price: Amount::new(start_price),
        status: AuctionStatus::Active,
        last_update: chrono::Utc::now(),
    }
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<EventEnvelope>) -> Vec<ResolverEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

#[tokio::test]
async fn happy_path_eth_to_btc_completes_and_zeroes_exposure() {
    let mut h = harness();
    let now = unix_now();
    let order = eth_btc_order("swap-1", now + 7200, now + 3600);
    h.relayer
        .add_auction(auction_for(order.clone(), 2_800_000, 2_000_000));

    // Discovery tick: gate, reserve, and bid at the current Dutch level
    h.participant.poll_auctions().await;
    let participation = h.participant.participation("swap-1").await.unwrap();
    assert_eq!(participation.status, ParticipationStatus::Bidding);
    assert!(!h.relayer.bids_for("swap-1").is_empty());
    assert_eq!(h.liquidity.reservation_count(), 1);

    // Outcome tick: the bid settled the auction in our favor
    h.participant.poll_auctions().await;
    let participation = h.participant.participation("swap-1").await.unwrap();
    assert_eq!(participation.status, ParticipationStatus::Won);
    let counters = h.participant.metrics();
    assert_eq!(counters.bids_placed, 1);
    assert_eq!(counters.auctions_won, 1);
    assert_eq!(counters.auctions_lost, 0);

    let handoff = h.handoff_rx.recv().await.unwrap();
    let stage = h
        .executor
        .execute(handoff.order, handoff.reservation_id)
        .await
        .unwrap();
    assert_eq!(stage, ExecutionStage::Completed);

    let execution = h.executor.execution("swap-1").await.unwrap();
    assert!(execution.transactions.src_fund.is_some());
    assert!(execution.transactions.dst_fund.is_some());
    assert!(execution.transactions.src_redeem.is_some());
    assert!(execution.transactions.dst_redeem.is_some());
    assert_eq!(h.executor.metrics().completed_executions, 1);

    // The Bitcoin redemption witness carries the preimage
    let redeem = execution.transactions.dst_redeem.as_ref().unwrap();
    let raw = h.btc.raw_transaction(&redeem.tx_hash).unwrap();
    let htlc = execution.htlc.as_ref().unwrap();
    let extracted = swapbot_resolver::chains::bitcoin::htlc::extract_secret_from_tx(
        &raw,
        &htlc.redeem_script,
    )
    .unwrap();
    assert!(validate_secret(&extracted, &order.secret_hash));
    assert!(h.eth.escrow_redeemed(
        &execution.transactions.src_fund.as_ref().unwrap().tx_hash
    ));

    // Reservation consumed exactly once; exposure back to zero
    assert_eq!(h.liquidity.reservation_count(), 0);
    let pool = h.liquidity.balance(ChainId::BitcoinMainnet, "btc");
    assert_eq!(pool.reserved, Amount::ZERO);
    assert_eq!(pool.available, Amount::new(ONE_BTC_SATS - 4_000_000));
    for (kind, id) in [
        (ExposureKind::Chain, "ethereum_mainnet"),
        (ExposureKind::Chain, "bitcoin_mainnet"),
        (ExposureKind::Token, "ethereum_mainnet:eth"),
        (ExposureKind::Token, "bitcoin_mainnet:btc"),
    ] {
        assert_eq!(
            h.risk.exposure_limit(kind, id).current_exposure,
            Amount::ZERO,
            "exposure {} must drain",
            id
        );
    }

    // The reveal happens strictly after both fundings confirm
    let events = drain_events(&mut h.events_rx);
    let reveal_at = events
        .iter()
        .position(|e| matches!(e, ResolverEvent::SecretRevealed { .. }))
        .expect("secret reveal event");
    let funding_confirmations: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            ResolverEvent::TransactionConfirmed { tx_hash, .. } => {
                let is_funding = [
                    &execution.transactions.src_fund.as_ref().unwrap().tx_hash,
                    &execution.transactions.dst_fund.as_ref().unwrap().tx_hash,
                ]
                .iter()
                .any(|h| *h == tx_hash);
                is_funding.then_some(i)
            }
            _ => None,
        })
        .collect();
    assert_eq!(funding_confirmations.len(), 2);
    assert!(funding_confirmations.iter().all(|i| *i < reveal_at));
    assert!(events
        .iter()
        .any(|e| matches!(e, ResolverEvent::ExecutionCompleted { .. })));
}

#[tokio::test]
async fn timelock_ordering_violation_is_rejected_before_reservation() {
    let mut h = harness();
    let now = unix_now();
    // Destination expires at the same instant as the source: the refund
    // ordering the swap depends on is gone
    let order = eth_btc_order("swap-bad-locks", now + 7200, now + 7200);
    h.relayer
        .add_auction(auction_for(order, 2_800_000, 2_000_000));

    h.participant.poll_auctions().await;

    assert!(h.participant.participation("swap-bad-locks").await.is_none());
    assert_eq!(h.liquidity.reservation_count(), 0);
    assert!(h.relayer.bids_for("swap-bad-locks").is_empty());

    let events = drain_events(&mut h.events_rx);
    let rejected = events.iter().any(|e| {
        matches!(
            e,
            ResolverEvent::RiskAssessmentCompleted {
                approved: false,
                ..
            }
        )
    });
    assert!(rejected, "risk manager must record the rejection");
    assert!(h.risk.metrics().rejected_orders >= 1);
}

#[tokio::test]
async fn auction_without_profit_room_is_never_bid() {
    let mut h = harness();
    let now = unix_now();
    let order = eth_btc_order("swap-flat", now + 7200, now + 3600);
    // Flat Dutch curve pinned at the full destination amount
    h.relayer
        .add_auction(auction_for(order, 4_000_000, 4_000_000));

    h.participant.poll_auctions().await;
    let participation = h.participant.participation("swap-flat").await.unwrap();
    assert_eq!(participation.status, ParticipationStatus::Monitoring);
    assert!(h.relayer.bids_for("swap-flat").is_empty());
    assert_eq!(h.liquidity.reservation_count(), 1);

    // Auction ends with no winner: the hold comes back
    h.relayer.end_auction("swap-flat");
    h.participant.poll_auctions().await;

    let participation = h.participant.participation("swap-flat").await.unwrap();
    assert_eq!(participation.status, ParticipationStatus::Cancelled);
    assert_eq!(h.liquidity.reservation_count(), 0);
    let pool = h.liquidity.balance(ChainId::BitcoinMainnet, "btc");
    assert_eq!(pool.available, Amount::new(ONE_BTC_SATS));
    assert_eq!(pool.reserved, Amount::ZERO);

    let events = drain_events(&mut h.events_rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ResolverEvent::BidPlaced { .. })));
    assert_eq!(h.participant.metrics().bids_placed, 0);
}

#[tokio::test]
async fn destination_funding_failure_schedules_refunds_and_releases() {
    let mut h = harness();
    h.btc.set_fail_funding(true);

    let now = unix_now();
    let order = eth_btc_order("swap-halfway", now + 7200, now + 3600);
    h.relayer
        .add_auction(auction_for(order.clone(), 2_800_000, 2_000_000));

    h.participant.poll_auctions().await;
    h.participant.poll_auctions().await;
    let handoff = h.handoff_rx.recv().await.unwrap();

    let stage = h
        .executor
        .execute(handoff.order, handoff.reservation_id)
        .await
        .unwrap();
    assert_eq!(stage, ExecutionStage::Failed);
    assert_eq!(h.executor.metrics().failed_executions, 1);

    let execution = h.executor.execution("swap-halfway").await.unwrap();
    assert!(execution.transactions.src_fund.is_some());
    assert!(execution.transactions.dst_fund.is_none());
    assert!(execution.transactions.src_redeem.is_none());
    assert!(execution.transactions.dst_redeem.is_none());

    // Refunds queued on both legs, each behind its own timelock
    let source_refund = execution
        .scheduled_refunds
        .iter()
        .find(|r| r.side == EscrowSide::Source)
        .expect("source refund scheduled");
    assert_eq!(source_refund.chain_id, ChainId::EthereumMainnet);
    assert_eq!(source_refund.not_before, order.timelocks.source);
    let dest_refund = execution
        .scheduled_refunds
        .iter()
        .find(|r| r.side == EscrowSide::Destination)
        .expect("destination refund scheduled");
    assert_eq!(dest_refund.chain_id, ChainId::BitcoinMainnet);
    assert_eq!(dest_refund.not_before, order.timelocks.destination);

    // The hold is back and no secret ever left the execution record
    assert_eq!(h.liquidity.reservation_count(), 0);
    let pool = h.liquidity.balance(ChainId::BitcoinMainnet, "btc");
    assert_eq!(pool.available, Amount::new(ONE_BTC_SATS));
    let events = drain_events(&mut h.events_rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ResolverEvent::SecretRevealed { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ResolverEvent::ExecutionFailed { .. })));

    // Exposure drained despite the failure
    for id in ["ethereum_mainnet", "bitcoin_mainnet"] {
        assert_eq!(
            h.risk
                .exposure_limit(ExposureKind::Chain, id)
                .current_exposure,
            Amount::ZERO
        );
    }
}

#[tokio::test]
async fn shutdown_cancels_open_participations() {
    let h = harness();
    let now = unix_now();
    let order = eth_btc_order("swap-open", now + 7200, now + 3600);
    // Flat curve keeps the participation in monitoring
    h.relayer
        .add_auction(auction_for(order, 4_000_000, 4_000_000));
    h.participant.poll_auctions().await;
    assert_eq!(h.liquidity.reservation_count(), 1);

    h.participant.shutdown().await;

    let participation = h.participant.participation("swap-open").await.unwrap();
    assert_eq!(participation.status, ParticipationStatus::Cancelled);
    assert_eq!(h.liquidity.reservation_count(), 0);
    assert_eq!(h.participant.scheduled_bid_count(), 0);
}
