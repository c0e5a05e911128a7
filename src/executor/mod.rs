//! Swap executor.
//!
//! Drives a won order through the two-chain atomic swap: fund the source
//! side, fund the destination side, wait out the safety window, then
//! redeem both legs in parallel. The secret is only published (inside the
//! Bitcoin redemption witness) after both funding transactions reach
//! their confirmation targets. Failures release the liquidity
//! reservation; failures after funding also schedule timelock refunds.

pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auction::ExecutionHandoff;
use crate::chains::{BitcoinChainClient, EthereumChainClient, HtlcOutput, HtlcParams};
use crate::config::ExecutionConfig;
use crate::events::{EventBus, ResolverEvent};
use crate::liquidity::LiquidityManager;
use crate::models::{
    unix_now, ChainId, CrossChainSwapState, EscrowSide, ExecutedTransaction, Secret, SwapStatus,
    validate_secret,
};
use crate::risk::RiskManager;

use retry::{with_retry, RetryPolicy};

/// Minimum seconds of timelock headroom required before funding a side.
const FUNDING_HEADROOM_SECS: u64 = 60;
/// Shutdown grace for in-flight executions.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
    Pending,
    SourceFunding,
    DestinationFunding,
    BothFunded,
    RevealingSecret,
    Redeeming,
    Completed,
    Failed,
    Expired,
}

impl ExecutionStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStage::Completed | ExecutionStage::Failed | ExecutionStage::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStage::Pending => "pending",
            ExecutionStage::SourceFunding => "source_funding",
            ExecutionStage::DestinationFunding => "destination_funding",
            ExecutionStage::BothFunded => "both_funded",
            ExecutionStage::RevealingSecret => "revealing_secret",
            ExecutionStage::Redeeming => "redeeming",
            ExecutionStage::Completed => "completed",
            ExecutionStage::Failed => "failed",
            ExecutionStage::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSet {
    pub src_fund: Option<ExecutedTransaction>,
    pub dst_fund: Option<ExecutedTransaction>,
    pub src_redeem: Option<ExecutedTransaction>,
    pub dst_redeem: Option<ExecutedTransaction>,
    pub src_refund: Option<ExecutedTransaction>,
    pub dst_refund: Option<ExecutedTransaction>,
}

impl TransactionSet {
    pub fn fund(&self, side: EscrowSide) -> Option<&ExecutedTransaction> {
        match side {
            EscrowSide::Source => self.src_fund.as_ref(),
            EscrowSide::Destination => self.dst_fund.as_ref(),
        }
    }

    pub fn any_funded(&self) -> bool {
        self.src_fund.is_some() || self.dst_fund.is_some()
    }
}

/// A refund queued for after a timelock opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRefund {
    pub side: EscrowSide,
    pub chain_id: ChainId,
    /// Unix seconds before which the refund path is closed.
    pub not_before: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapExecution {
    pub order_id: String,
    pub order: CrossChainSwapState,
    pub stage: ExecutionStage,
    pub reservation_id: Uuid,
    /// Held here and nowhere else until reveal.
    pub secret: Option<Secret>,
    pub transactions: TransactionSet,
    pub htlc: Option<HtlcOutput>,
    pub scheduled_refunds: Vec<ScheduledRefund>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutorMetrics {
    pub completed_executions: u64,
    pub failed_executions: u64,
    pub expired_executions: u64,
}

/// Marker error: a timelock ran out before the stage could commit.
#[derive(Debug)]
struct TimelockElapsed {
    side: EscrowSide,
    timelock: u64,
}

impl fmt::Display for TimelockElapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} timelock {} elapsed before funding",
            self.side.as_str(),
            self.timelock
        )
    }
}

impl std::error::Error for TimelockElapsed {}

/// Keys embedded into the Bitcoin HTLC script. The resolver key comes
/// from its wallet; the user key is delivered with the order flow by the
/// relayer during matching.
#[derive(Debug, Clone)]
pub struct HtlcKeys {
    pub user_pubkey: Vec<u8>,
    pub resolver_pubkey: Vec<u8>,
}

pub struct SwapExecutor {
    eth: Arc<dyn EthereumChainClient>,
    btc: Arc<dyn BitcoinChainClient>,
    liquidity: Arc<LiquidityManager>,
    risk: Arc<RiskManager>,
    events: EventBus,
    config: ExecutionConfig,
    htlc_keys: HtlcKeys,
    executions: Arc<RwLock<HashMap<String, SwapExecution>>>,
    metrics: Mutex<ExecutorMetrics>,
    in_flight: AtomicUsize,
    refund_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Everything a deferred refund task needs, detached from the executor's
/// lifetime.
struct RefundContext {
    eth: Arc<dyn EthereumChainClient>,
    btc: Arc<dyn BitcoinChainClient>,
    events: EventBus,
    executions: Arc<RwLock<HashMap<String, SwapExecution>>>,
    policy: RetryPolicy,
}

impl RefundContext {
    async fn run(self, order: CrossChainSwapState, side: EscrowSide) {
        let order_id = &order.order_id;
        let (fund_tx_hash, htlc) = {
            let executions = self.executions.read().await;
            let Some(execution) = executions.get(order_id) else {
                return;
            };
            let redeemed = match side {
                EscrowSide::Source => execution.transactions.src_redeem.is_some(),
                EscrowSide::Destination => execution.transactions.dst_redeem.is_some(),
            };
            if redeemed {
                return;
            }
            let Some(fund) = execution.transactions.fund(side) else {
                return;
            };
            (fund.tx_hash.clone(), execution.htlc.clone())
        };

        let chain = order.chain_ref(side).chain_id;
        let stage = format!("{}_refund", side.as_str());
        let result = if chain.is_bitcoin() {
            let Some(htlc) = htlc else {
                warn!(order_id, "refund skipped: HTLC output missing");
                return;
            };
            let amount = order.amount(side);
            let timelock = order.timelock(side);
            with_retry(self.policy, &self.events, order_id, &stage, || {
                let htlc = htlc.clone();
                let fund = fund_tx_hash.clone();
                let btc = self.btc.clone();
                async move { btc.refund_htlc(&fund, &htlc, amount, timelock).await }
            })
            .await
        } else {
            with_retry(self.policy, &self.events, order_id, &stage, || {
                let fund = fund_tx_hash.clone();
                let eth = self.eth.clone();
                let order = order.clone();
                async move { eth.refund_escrow(&order, &fund).await }
            })
            .await
        };

        match result {
            Ok(tx) => {
                info!(order_id, side = side.as_str(), tx_hash = %tx.tx_hash, "refund submitted");
                let mut executions = self.executions.write().await;
                if let Some(execution) = executions.get_mut(order_id) {
                    match side {
                        EscrowSide::Source => execution.transactions.src_refund = Some(tx),
                        EscrowSide::Destination => execution.transactions.dst_refund = Some(tx),
                    }
                    execution.updated_at = Utc::now();
                }
            }
            Err(e) => warn!(order_id, side = side.as_str(), error = %e, "refund failed"),
        }
    }
}

impl SwapExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        eth: Arc<dyn EthereumChainClient>,
        btc: Arc<dyn BitcoinChainClient>,
        liquidity: Arc<LiquidityManager>,
        risk: Arc<RiskManager>,
        events: EventBus,
        config: ExecutionConfig,
        htlc_keys: HtlcKeys,
    ) -> Arc<Self> {
        Arc::new(SwapExecutor {
            eth,
            btc,
            liquidity,
            risk,
            events,
            config,
            htlc_keys,
            executions: Arc::new(RwLock::new(HashMap::new())),
            metrics: Mutex::new(ExecutorMetrics::default()),
            in_flight: AtomicUsize::new(0),
            refund_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Consume auction wins from the participant and run each execution
    /// as its own task.
    pub fn spawn_handoff_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ExecutionHandoff>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(handoff) = rx.recv().await {
                let executor = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = executor
                        .execute(handoff.order, handoff.reservation_id)
                        .await
                    {
                        warn!(error = %e, "execution ended with error");
                    }
                });
            }
        })
    }

    /// Run one swap to a terminal stage. Returns the final stage.
    pub async fn execute(
        &self,
        order: CrossChainSwapState,
        reservation_id: Uuid,
    ) -> Result<ExecutionStage> {
        let order_id = order.order_id.clone();

        if self.in_flight.load(Ordering::SeqCst)
            >= self.config.execution.max_concurrent_executions
        {
            self.liquidity.release(reservation_id);
            bail!(
                "max concurrent executions reached, rejecting order {}",
                order_id
            );
        }

        // The reservation is the executor's authority to spend
        if self.liquidity.get_reservation(reservation_id).is_none() {
            bail!(
                "reservation {} missing for order {}; refusing to execute",
                reservation_id,
                order_id
            );
        }

        let secret = match &order.secret {
            Some(secret) if validate_secret(secret, &order.secret_hash) => secret.clone(),
            Some(_) => {
                self.liquidity.release(reservation_id);
                bail!("order {} carries a secret that does not match its hash", order_id);
            }
            None => {
                self.liquidity.release(reservation_id);
                bail!("order {} has no secret; cannot redeem after funding", order_id);
            }
        };

        let execution = SwapExecution {
            order_id: order_id.clone(),
            order: order.clone(),
            stage: ExecutionStage::Pending,
            reservation_id,
            secret: Some(secret.clone()),
            transactions: TransactionSet::default(),
            htlc: None,
            scheduled_refunds: Vec::new(),
            error: None,
            started_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.executions
            .write()
            .await
            .insert(order_id.clone(), execution);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        self.events.emit(ResolverEvent::ExecutionStarted {
            order_id: order_id.clone(),
        });
        self.update_risk(&order, SwapStatus::ResolverSelected);

        let outcome = self.drive(&order, &secret).await;
        let final_stage = match outcome {
            Ok(()) => self.finalize_success(&order, reservation_id).await,
            Err(error) => self.finalize_failure(&order, reservation_id, error).await,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(final_stage)
    }

    /// The sequential stage pipeline. Any error unwinds to
    /// `finalize_failure`.
    async fn drive(&self, order: &CrossChainSwapState, secret: &Secret) -> Result<()> {
        let order_id = &order.order_id;
        let policy = RetryPolicy::from_tuning(&self.config.execution);

        // Source leg
        self.set_stage(order_id, ExecutionStage::SourceFunding).await;
        self.check_headroom(order, EscrowSide::Source)?;
        let src_tx = self.fund_side(order, EscrowSide::Source, policy).await?;
        self.record_fund_tx(order_id, EscrowSide::Source, src_tx.clone())
            .await;
        self.await_confirmation(order, EscrowSide::Source, &src_tx.tx_hash, policy)
            .await?;
        self.update_risk(order, SwapStatus::SourceFunded);

        // Destination leg only after the source is irreversible
        self.set_stage(order_id, ExecutionStage::DestinationFunding)
            .await;
        self.check_headroom(order, EscrowSide::Destination)?;
        let dst_tx = self
            .fund_side(order, EscrowSide::Destination, policy)
            .await?;
        self.record_fund_tx(order_id, EscrowSide::Destination, dst_tx.clone())
            .await;
        self.await_confirmation(order, EscrowSide::Destination, &dst_tx.tx_hash, policy)
            .await?;
        self.update_risk(order, SwapStatus::BothFunded);
        self.set_stage(order_id, ExecutionStage::BothFunded).await;

        // Safety window between funding finality and the reveal
        self.set_stage(order_id, ExecutionStage::RevealingSecret)
            .await;
        tokio::time::sleep(Duration::from_secs(
            self.config.execution.secret_reveal_delay_secs,
        ))
        .await;

        // Both redemptions race in parallel; the Bitcoin witness is what
        // publishes the secret
        self.set_stage(order_id, ExecutionStage::Redeeming).await;
        let (src_result, dst_result) = futures_util::future::join(
            self.redeem_side(order, EscrowSide::Source, secret, policy),
            self.redeem_side(order, EscrowSide::Destination, secret, policy),
        )
        .await;
        src_result?;
        dst_result?;

        Ok(())
    }

    fn check_headroom(&self, order: &CrossChainSwapState, side: EscrowSide) -> Result<()> {
        let timelock = order.timelock(side);
        if unix_now() + FUNDING_HEADROOM_SECS >= timelock {
            return Err(anyhow::Error::new(TimelockElapsed { side, timelock }));
        }
        Ok(())
    }

    async fn fund_side(
        &self,
        order: &CrossChainSwapState,
        side: EscrowSide,
        policy: RetryPolicy,
    ) -> Result<ExecutedTransaction> {
        let order_id = &order.order_id;
        let chain = order.chain_ref(side).chain_id;
        let stage = format!("{}_funding", side.as_str());
        let amount = order.amount(side);

        let tx = if chain.is_bitcoin() {
            let htlc = self.ensure_htlc(order, side).await?;
            with_retry(policy, &self.events, order_id, &stage, || {
                let htlc = htlc.clone();
                async move { self.btc.fund_htlc(&htlc, amount).await }
            })
            .await?
        } else {
            with_retry(policy, &self.events, order_id, &stage, || async move {
                self.eth.fund_escrow(order, side).await
            })
            .await?
        };

        info!(order_id, side = side.as_str(), tx_hash = %tx.tx_hash, "funding submitted");
        self.events.emit(ResolverEvent::TransactionSubmitted {
            order_id: order_id.clone(),
            chain_id: chain,
            tx_hash: tx.tx_hash.clone(),
        });
        Ok(tx)
    }

    async fn await_confirmation(
        &self,
        order: &CrossChainSwapState,
        side: EscrowSide,
        tx_hash: &str,
        policy: RetryPolicy,
    ) -> Result<ExecutedTransaction> {
        let order_id = &order.order_id;
        let chain = order.chain_ref(side).chain_id;
        let required = self.required_confirmations(chain);
        let timeout = Duration::from_secs(self.config.execution.transaction_timeout_secs);
        let stage = format!("{}_confirmation", side.as_str());

        let confirmed = with_retry(policy, &self.events, order_id, &stage, || async move {
            if chain.is_bitcoin() {
                self.btc.wait_for_confirmation(tx_hash, required, timeout).await
            } else {
                self.eth.wait_for_confirmation(tx_hash, required, timeout).await
            }
        })
        .await?;

        self.events.emit(ResolverEvent::TransactionConfirmed {
            order_id: order_id.clone(),
            chain_id: chain,
            tx_hash: tx_hash.to_string(),
        });
        Ok(confirmed)
    }

    async fn redeem_side(
        &self,
        order: &CrossChainSwapState,
        side: EscrowSide,
        secret: &Secret,
        policy: RetryPolicy,
    ) -> Result<()> {
        let order_id = &order.order_id;
        let chain = order.chain_ref(side).chain_id;
        let amount = order.amount(side);
        let stage = format!("{}_redeem", side.as_str());

        let fund_tx_hash = {
            let executions = self.executions.read().await;
            executions
                .get(order_id)
                .and_then(|e| e.transactions.fund(side).map(|t| t.tx_hash.clone()))
                .with_context(|| format!("no {} funding transaction recorded", side.as_str()))?
        };

        let tx = if chain.is_bitcoin() {
            let htlc = {
                let executions = self.executions.read().await;
                executions
                    .get(order_id)
                    .and_then(|e| e.htlc.clone())
                    .context("HTLC output missing at redemption")?
            };
            with_retry(policy, &self.events, order_id, &stage, || {
                let htlc = htlc.clone();
                let fund = fund_tx_hash.clone();
                async move { self.btc.redeem_htlc(&fund, &htlc, amount, secret).await }
            })
            .await?
        } else {
            with_retry(policy, &self.events, order_id, &stage, || {
                let fund = fund_tx_hash.clone();
                async move { self.eth.redeem_escrow(order, &fund, secret).await }
            })
            .await?
        };

        self.events.emit(ResolverEvent::TransactionSubmitted {
            order_id: order_id.clone(),
            chain_id: chain,
            tx_hash: tx.tx_hash.clone(),
        });
        let required = self.required_confirmations(chain);
        let timeout = Duration::from_secs(self.config.execution.transaction_timeout_secs);
        let confirmed = with_retry(policy, &self.events, order_id, &stage, || {
            let hash = tx.tx_hash.clone();
            async move {
                if chain.is_bitcoin() {
                    self.btc.wait_for_confirmation(&hash, required, timeout).await
                } else {
                    self.eth.wait_for_confirmation(&hash, required, timeout).await
                }
            }
        })
        .await?;

        self.record_redeem_tx(order_id, side, confirmed).await;
        self.events.emit(ResolverEvent::TransactionConfirmed {
            order_id: order_id.clone(),
            chain_id: chain,
            tx_hash: tx.tx_hash.clone(),
        });
        if chain.is_bitcoin() {
            // The confirmed witness is public: the secret is now revealed
            info!(order_id, "secret revealed on-chain via redemption witness");
            self.events.emit(ResolverEvent::SecretRevealed {
                order_id: order_id.clone(),
            });
        }
        Ok(())
    }

    /// Build the HTLC output once and cache it on the execution record.
    async fn ensure_htlc(
        &self,
        order: &CrossChainSwapState,
        side: EscrowSide,
    ) -> Result<HtlcOutput> {
        {
            let executions = self.executions.read().await;
            if let Some(htlc) = executions.get(&order.order_id).and_then(|e| e.htlc.clone()) {
                return Ok(htlc);
            }
        }
        let params = HtlcParams {
            secret_hash: order.secret_hash,
            user_pubkey: self.htlc_keys.user_pubkey.clone(),
            resolver_pubkey: self.htlc_keys.resolver_pubkey.clone(),
            timelock: order.timelock(side),
        };
        let htlc = self.btc.build_htlc(&params)?;
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&order.order_id) {
            execution.htlc = Some(htlc.clone());
            execution.updated_at = Utc::now();
        }
        Ok(htlc)
    }

    async fn finalize_success(
        &self,
        order: &CrossChainSwapState,
        reservation_id: Uuid,
    ) -> ExecutionStage {
        self.set_stage(&order.order_id, ExecutionStage::Completed).await;
        if let Err(e) = self.liquidity.consume(reservation_id) {
            warn!(order_id = %order.order_id, error = %e, "reservation consume failed");
        }
        self.update_risk(order, SwapStatus::Completed);
        self.metrics.lock().completed_executions += 1;
        info!(order_id = %order.order_id, "swap completed");
        self.events.emit(ResolverEvent::ExecutionCompleted {
            order_id: order.order_id.clone(),
        });
        ExecutionStage::Completed
    }

    async fn finalize_failure(
        &self,
        order: &CrossChainSwapState,
        reservation_id: Uuid,
        error: anyhow::Error,
    ) -> ExecutionStage {
        let order_id = &order.order_id;
        let expired = error.is::<TimelockElapsed>()
            || error
                .chain()
                .any(|cause| cause.downcast_ref::<TimelockElapsed>().is_some());
        let stage = if expired {
            ExecutionStage::Expired
        } else {
            ExecutionStage::Failed
        };
        warn!(order_id, stage = stage.as_str(), error = %error, "execution unwound");

        let had_funding = {
            let executions = self.executions.read().await;
            executions
                .get(order_id)
                .map(|e| e.transactions.any_funded())
                .unwrap_or(false)
        };
        if had_funding {
            // Whatever was committed comes back through the timelock
            // paths; each side opens at its own deadline
            self.schedule_refund(order, EscrowSide::Source).await;
            self.schedule_refund(order, EscrowSide::Destination).await;
        }

        {
            let mut executions = self.executions.write().await;
            if let Some(execution) = executions.get_mut(order_id) {
                execution.stage = stage;
                execution.error = Some(format!("{:#}", error));
                execution.updated_at = Utc::now();
            }
        }

        self.liquidity.release(reservation_id);
        self.update_risk(
            order,
            if expired {
                SwapStatus::Expired
            } else {
                SwapStatus::Failed
            },
        );
        {
            let mut metrics = self.metrics.lock();
            if expired {
                metrics.expired_executions += 1;
            } else {
                metrics.failed_executions += 1;
            }
        }
        self.events.emit(ResolverEvent::ExecutionFailed {
            order_id: order_id.clone(),
            reason: format!("{:#}", error),
        });
        stage
    }

    /// Queue a refund attempt for when the side's timelock opens. The
    /// task re-checks at fire time whether that side actually has a
    /// funding transaction and no redemption.
    async fn schedule_refund(&self, order: &CrossChainSwapState, side: EscrowSide) {
        let chain = order.chain_ref(side).chain_id;
        let not_before = order.timelock(side);
        {
            let mut executions = self.executions.write().await;
            if let Some(execution) = executions.get_mut(&order.order_id) {
                execution.scheduled_refunds.push(ScheduledRefund {
                    side,
                    chain_id: chain,
                    not_before,
                });
                execution.updated_at = Utc::now();
            }
        }
        info!(
            order_id = %order.order_id,
            side = side.as_str(),
            not_before,
            "refund scheduled"
        );

        let context = RefundContext {
            eth: self.eth.clone(),
            btc: self.btc.clone(),
            events: self.events.clone(),
            executions: self.executions.clone(),
            policy: RetryPolicy::from_tuning(&self.config.execution),
        };
        let order = order.clone();
        let handle = tokio::spawn(async move {
            let wait = not_before.saturating_sub(unix_now()) + 1;
            tokio::time::sleep(Duration::from_secs(wait)).await;
            context.run(order, side).await;
        });
        self.refund_tasks.lock().push(handle);
    }

    fn required_confirmations(&self, chain: ChainId) -> u32 {
        if chain.is_bitcoin() {
            self.config.bitcoin.confirmations
        } else {
            self.config.ethereum.confirmations
        }
    }

    fn update_risk(&self, order: &CrossChainSwapState, status: SwapStatus) {
        let mut updated = order.clone();
        updated.status = status;
        self.risk.update_order_status(&updated);
    }

    async fn set_stage(&self, order_id: &str, stage: ExecutionStage) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(order_id) {
            execution.stage = stage;
            execution.updated_at = Utc::now();
        }
    }

    async fn record_fund_tx(&self, order_id: &str, side: EscrowSide, tx: ExecutedTransaction) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(order_id) {
            match side {
                EscrowSide::Source => execution.transactions.src_fund = Some(tx),
                EscrowSide::Destination => execution.transactions.dst_fund = Some(tx),
            }
            execution.updated_at = Utc::now();
        }
    }

    async fn record_redeem_tx(&self, order_id: &str, side: EscrowSide, tx: ExecutedTransaction) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(order_id) {
            match side {
                EscrowSide::Source => execution.transactions.src_redeem = Some(tx),
                EscrowSide::Destination => execution.transactions.dst_redeem = Some(tx),
            }
            execution.updated_at = Utc::now();
        }
    }

    pub async fn execution(&self, order_id: &str) -> Option<SwapExecution> {
        self.executions.read().await.get(order_id).cloned()
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        *self.metrics.lock()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Give in-flight executions a bounded grace period, then abandon
    /// them and cancel pending refund timers.
    pub async fn shutdown(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.in_flight.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        let abandoned = self.in_flight.load(Ordering::SeqCst);
        if abandoned > 0 {
            warn!(abandoned, "abandoning in-flight executions at shutdown");
        }
        for handle in self.refund_tasks.lock().drain(..) {
            handle.abort();
        }
        info!("swap executor shut down");
    }
}
