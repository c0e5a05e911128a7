//! Resolver event fan-out.
//!
//! Components publish fire-and-forget events onto a broadcast channel;
//! consumers (dashboards, alerting, tests) subscribe to the slice they
//! care about. Publishing never blocks and never fails: with no receivers
//! the event is simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Amount, ChainId};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolverEvent {
    AuctionDiscovered {
        order_id: String,
    },
    BidPlaced {
        order_id: String,
        price: Amount,
    },
    AuctionWon {
        order_id: String,
    },
    AuctionLost {
        order_id: String,
    },
    PriceUpdated {
        order_id: String,
        price: Amount,
    },
    ExecutionStarted {
        order_id: String,
    },
    TransactionSubmitted {
        order_id: String,
        chain_id: ChainId,
        tx_hash: String,
    },
    TransactionConfirmed {
        order_id: String,
        chain_id: ChainId,
        tx_hash: String,
    },
    SecretRevealed {
        order_id: String,
    },
    ExecutionCompleted {
        order_id: String,
    },
    ExecutionFailed {
        order_id: String,
        reason: String,
    },
    RetryAttempt {
        order_id: String,
        stage: String,
        attempt: u32,
    },
    RiskAssessmentCompleted {
        order_id: String,
        approved: bool,
        risk_score: f64,
    },
    ExposureLimitReached {
        kind: String,
        identifier: String,
        utilization: f64,
    },
    CircuitBreakerTriggered {
        name: String,
    },
    CircuitBreakerReset {
        name: String,
    },
    EmergencyStop {
        reason: String,
    },
    RiskMetricsUpdated {
        total_assessments: u64,
        rejected_orders: u64,
    },
}

/// Timestamped envelope delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ResolverEvent,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { tx }
    }

    pub fn emit(&self, event: ResolverEvent) {
        let _ = self.tx.send(EventEnvelope {
            at: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ResolverEvent::AuctionDiscovered {
            order_id: "a".to_string(),
        });
        bus.emit(ResolverEvent::AuctionWon {
            order_id: "a".to_string(),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.event,
            ResolverEvent::AuctionDiscovered { ref order_id } if order_id == "a"
        ));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, ResolverEvent::AuctionWon { .. }));
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(ResolverEvent::EmergencyStop {
            reason: "test".to_string(),
        });
    }
}
