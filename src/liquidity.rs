//! Liquidity manager.
//!
//! Single source of truth for the resolver's deployable inventory per
//! `(chain, token)` pool. Reservations are two-phase: `reserve` holds
//! funds for an order, and exactly one of `consume` (swap completed) or
//! `release` (any other exit) retires the hold. A reaper sweep releases
//! holds whose `expires_at` passed; callers still release explicitly on
//! every exit path, the reaper is a backstop.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Amount, ChainId, CrossChainSwapState};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolBalance {
    pub available: Amount,
    pub reserved: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub order_id: String,
    pub chain_id: ChainId,
    pub token: String,
    pub amount: Amount,
    /// Unix seconds after which the reaper may reclaim this hold.
    pub expires_at: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityCheck {
    pub available: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct LiquidityState {
    pools: HashMap<(ChainId, String), PoolBalance>,
    reservations: HashMap<Uuid, Reservation>,
}

#[derive(Debug, Default)]
pub struct LiquidityManager {
    state: Mutex<LiquidityState>,
}

impl LiquidityManager {
    pub fn new() -> Self {
        LiquidityManager {
            state: Mutex::new(LiquidityState::default()),
        }
    }

    /// Credit a pool. Used at startup from config and after redemptions.
    pub fn deposit(&self, chain_id: ChainId, token: &str, amount: Amount) {
        let mut state = self.state.lock();
        let pool = state
            .pools
            .entry((chain_id, token.to_lowercase()))
            .or_default();
        pool.available = pool.available.saturating_add(amount);
    }

    pub fn balance(&self, chain_id: ChainId, token: &str) -> PoolBalance {
        self.state
            .lock()
            .pools
            .get(&(chain_id, token.to_lowercase()))
            .copied()
            .unwrap_or_default()
    }

    /// Can this order's destination leg be funded from free inventory?
    /// The destination side is what the resolver pays out, so that is the
    /// pool a participation draws on.
    pub fn check(&self, order: &CrossChainSwapState) -> LiquidityCheck {
        let chain_id = order.destination_chain.chain_id;
        let token = &order.destination_chain.token;
        let balance = self.balance(chain_id, token);

        if balance.available < order.amounts.destination {
            return LiquidityCheck {
                available: false,
                reason: Some(format!(
                    "insufficient liquidity on {} {}: need {}, free {}",
                    chain_id, token, order.amounts.destination, balance.available
                )),
            };
        }
        LiquidityCheck {
            available: true,
            reason: None,
        }
    }

    pub fn reserve(
        &self,
        order_id: &str,
        chain_id: ChainId,
        token: &str,
        amount: Amount,
        expires_at: u64,
    ) -> anyhow::Result<Uuid> {
        let token = token.to_lowercase();
        let mut state = self.state.lock();

        if let Some(existing) = state
            .reservations
            .values()
            .find(|r| r.order_id == order_id)
        {
            anyhow::bail!(
                "order {} already holds reservation {}",
                order_id,
                existing.id
            );
        }

        let pool = state.pools.entry((chain_id, token.clone())).or_default();
        if pool.available < amount {
            anyhow::bail!(
                "insufficient liquidity on {} {}: need {}, free {}",
                chain_id,
                token,
                amount,
                pool.available
            );
        }
        pool.available = pool.available.saturating_sub(amount);
        pool.reserved = pool.reserved.saturating_add(amount);

        let reservation = Reservation {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            chain_id,
            token,
            amount,
            expires_at,
            created_at: Utc::now(),
        };
        let id = reservation.id;
        state.reservations.insert(id, reservation);
        debug!(order_id, reservation_id = %id, %amount, "liquidity reserved");
        Ok(id)
    }

    pub fn get_reservation(&self, id: Uuid) -> Option<Reservation> {
        self.state.lock().reservations.get(&id).cloned()
    }

    /// Return held funds to the pool. Returns false if the reservation was
    /// already consumed or released; a second call is a harmless no-op.
    pub fn release(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.reservations.remove(&id) {
            Some(reservation) => {
                let pool = state
                    .pools
                    .entry((reservation.chain_id, reservation.token.clone()))
                    .or_default();
                pool.reserved = pool.reserved.saturating_sub(reservation.amount);
                pool.available = pool.available.saturating_add(reservation.amount);
                debug!(reservation_id = %id, order_id = %reservation.order_id, "reservation released");
                true
            }
            None => false,
        }
    }

    /// Spend held funds after a completed swap. Errors if the reservation
    /// does not exist (already consumed, released, or reaped).
    pub fn consume(&self, id: Uuid) -> anyhow::Result<Reservation> {
        let mut state = self.state.lock();
        let reservation = state
            .reservations
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("reservation {} not found", id))?;
        let pool = state
            .pools
            .entry((reservation.chain_id, reservation.token.clone()))
            .or_default();
        pool.reserved = pool.reserved.saturating_sub(reservation.amount);
        info!(
            reservation_id = %id,
            order_id = %reservation.order_id,
            amount = %reservation.amount,
            "reservation consumed"
        );
        Ok(reservation)
    }

    /// Release every reservation whose deadline has passed. Advisory:
    /// components release explicitly on their exit paths.
    pub fn reap_expired(&self, now_unix: u64) -> usize {
        let expired: Vec<Uuid> = {
            let state = self.state.lock();
            state
                .reservations
                .values()
                .filter(|r| r.expires_at <= now_unix)
                .map(|r| r.id)
                .collect()
        };
        for id in &expired {
            warn!(reservation_id = %id, "reaping expired reservation");
            self.release(*id);
        }
        expired.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.state.lock().reservations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: (ChainId, &str) = (ChainId::BitcoinMainnet, "btc");

    fn manager_with_sats(sats: u128) -> LiquidityManager {
        let lm = LiquidityManager::new();
        lm.deposit(POOL.0, POOL.1, Amount::new(sats));
        lm
    }

    #[test]
    fn reserve_moves_funds_to_held() {
        let lm = manager_with_sats(10_000_000);
        let id = lm
            .reserve("order-1", POOL.0, POOL.1, Amount::new(4_000_000), u64::MAX)
            .unwrap();
        let balance = lm.balance(POOL.0, POOL.1);
        assert_eq!(balance.available, Amount::new(6_000_000));
        assert_eq!(balance.reserved, Amount::new(4_000_000));
        assert!(lm.get_reservation(id).is_some());
    }

    #[test]
    fn reserve_fails_when_short() {
        let lm = manager_with_sats(1_000_000);
        let err = lm
            .reserve("order-1", POOL.0, POOL.1, Amount::new(4_000_000), u64::MAX)
            .unwrap_err();
        assert!(err.to_string().contains("insufficient liquidity"));
    }

    #[test]
    fn duplicate_reservation_per_order_rejected() {
        let lm = manager_with_sats(10_000_000);
        lm.reserve("order-1", POOL.0, POOL.1, Amount::new(1_000_000), u64::MAX)
            .unwrap();
        assert!(lm
            .reserve("order-1", POOL.0, POOL.1, Amount::new(1_000_000), u64::MAX)
            .is_err());
    }

    #[test]
    fn release_then_consume_is_rejected() {
        let lm = manager_with_sats(10_000_000);
        let id = lm
            .reserve("order-1", POOL.0, POOL.1, Amount::new(4_000_000), u64::MAX)
            .unwrap();
        assert!(lm.release(id));
        // Exactly one of consume/release may land
        assert!(!lm.release(id));
        assert!(lm.consume(id).is_err());
        assert_eq!(lm.balance(POOL.0, POOL.1).available, Amount::new(10_000_000));
    }

    #[test]
    fn consume_spends_reserved_funds() {
        let lm = manager_with_sats(10_000_000);
        let id = lm
            .reserve("order-1", POOL.0, POOL.1, Amount::new(4_000_000), u64::MAX)
            .unwrap();
        lm.consume(id).unwrap();
        let balance = lm.balance(POOL.0, POOL.1);
        assert_eq!(balance.available, Amount::new(6_000_000));
        assert_eq!(balance.reserved, Amount::ZERO);
        assert!(!lm.release(id));
    }

    #[test]
    fn reaper_releases_only_expired_holds() {
        let lm = manager_with_sats(10_000_000);
        lm.reserve("old", POOL.0, POOL.1, Amount::new(1_000_000), 100)
            .unwrap();
        lm.reserve("live", POOL.0, POOL.1, Amount::new(1_000_000), u64::MAX)
            .unwrap();
        assert_eq!(lm.reap_expired(200), 1);
        assert_eq!(lm.reservation_count(), 1);
        assert_eq!(lm.balance(POOL.0, POOL.1).available, Amount::new(9_000_000));
    }
}
