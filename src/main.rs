//! Swapbot - Cross-Chain Atomic Swap Resolver
//! Mission: Win profitable Dutch auctions and settle them atomically
//! Philosophy: Never risk funds the timelocks cannot recover

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swapbot_resolver::auction::AuctionParticipant;
use swapbot_resolver::chains::ethereum::SimulatedEscrowClient;
use swapbot_resolver::chains::mock::SimulatedBitcoinClient;
use swapbot_resolver::chains::{
    bitcoin::BitcoinHtlcClient, BitcoinChainClient, EthereumChainClient,
};
use swapbot_resolver::config::ResolverConfig;
use swapbot_resolver::events::EventBus;
use swapbot_resolver::executor::{HtlcKeys, SwapExecutor};
use swapbot_resolver::liquidity::LiquidityManager;
use swapbot_resolver::market_data::{MarketDataCache, MockMarketFeed};
use swapbot_resolver::models::{Amount, ChainId};
use swapbot_resolver::relayer_client;
use swapbot_resolver::risk::RiskManager;
use swapbot_resolver::strategy::StrategyEngine;

#[derive(Debug, Parser)]
#[command(name = "swapbot", about = "Cross-chain atomic swap resolver")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SWAPBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Force simulated chain clients regardless of configuration.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swapbot_resolver=info,swapbot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ResolverConfig::load(cli.config.as_deref()).context("config load failed")?;
    if cli.dry_run {
        config.dry_run = true;
    }
    let config = Arc::new(config);
    info!(
        relayer = %config.relayer_url,
        resolver = %config.resolver_address,
        dry_run = config.dry_run,
        "starting resolver"
    );

    let events = EventBus::new();
    let market_data = Arc::new(MarketDataCache::new());
    let feed = MockMarketFeed::new(
        market_data.clone(),
        Duration::from_millis(config.strategy.update_interval_ms.max(1_000)),
    );
    let feed_stop = feed.stop_handle();
    let feed_task = feed.spawn();

    let liquidity = Arc::new(LiquidityManager::new());
    seed_liquidity(&liquidity, &config);

    let risk = Arc::new(RiskManager::new(
        config.risk.clone(),
        market_data.clone(),
        events.clone(),
    ));
    let strategy_engine = Arc::new(StrategyEngine::new(&config.strategy, market_data.clone()));

    // Chain clients: simulated ledgers in dry-run, real adapters live
    let (eth_client, btc_client, htlc_keys): (
        Arc<dyn EthereumChainClient>,
        Arc<dyn BitcoinChainClient>,
        HtlcKeys,
    ) = if config.dry_run {
        let btc = Arc::new(SimulatedBitcoinClient::new(1_000_000_000));
        let keys = HtlcKeys {
            user_pubkey: btc.resolver_pubkey(),
            resolver_pubkey: btc.resolver_pubkey(),
        };
        (
            Arc::new(SimulatedEscrowClient::new(
                ChainId::EthereumMainnet,
                config.execution.ethereum.confirmations,
            )),
            btc,
            keys,
        )
    } else {
        let btc = Arc::new(
            BitcoinHtlcClient::new(&config.execution.bitcoin)
                .context("bitcoin client init failed")?,
        );
        let keys = HtlcKeys {
            // The user key arrives with each matched order in production;
            // until then the resolver key doubles as a placeholder
            user_pubkey: btc.resolver_pubkey(),
            resolver_pubkey: btc.resolver_pubkey(),
        };
        warn!("live Ethereum escrow adapter is not wired in; falling back to the simulated ledger");
        (
            Arc::new(SimulatedEscrowClient::new(
                ChainId::EthereumMainnet,
                config.execution.ethereum.confirmations,
            )),
            btc,
            keys,
        )
    };

    let relayer = relayer_client(&config);

    let (participant, handoff_rx) = AuctionParticipant::new(
        config.clone(),
        relayer,
        strategy_engine,
        risk.clone(),
        liquidity.clone(),
        market_data,
        events.clone(),
    );
    let participant = Arc::new(participant);

    let executor = SwapExecutor::new(
        eth_client,
        btc_client,
        liquidity,
        risk,
        events,
        config.execution.clone(),
        htlc_keys,
    );
    let executor_task = executor.clone().spawn_handoff_loop(handoff_rx);

    let run_participant = participant.clone();
    let participant_task = tokio::spawn(async move { run_participant.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    participant.shutdown().await;
    executor.shutdown().await;
    feed_stop.store(true, std::sync::atomic::Ordering::Relaxed);
    participant_task.abort();
    executor_task.abort();
    feed_task.abort();

    info!("resolver stopped");
    Ok(())
}

fn seed_liquidity(liquidity: &LiquidityManager, config: &ResolverConfig) {
    // Dry runs get a comfortable paper inventory on every chain
    if config.dry_run {
        for chain in [
            ChainId::EthereumMainnet,
            ChainId::EthereumSepolia,
            ChainId::BitcoinMainnet,
            ChainId::BitcoinTestnet,
            ChainId::BitcoinRegtest,
        ] {
            let units = 10u128.pow(chain.native_decimals() as u32 + 1);
            liquidity.deposit(chain, chain.native_token(), Amount::new(units));
        }
    }
}
