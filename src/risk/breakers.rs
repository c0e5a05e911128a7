//! Circuit breakers.
//!
//! Each breaker pairs a condition over the risk snapshot with a protective
//! action. Triggering is idempotent: a breaker that is already tripped is
//! not re-fired by the same condition holding. Pause actions auto-reset
//! after their duration; emergency stop holds until explicitly cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CircuitBreakerConfig;
use crate::models::unix_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerConditionKind {
    ExposureThreshold,
    VolumeSpike,
    ErrorRate,
    MarketVolatility,
    ConfidenceDrop,
}

impl BreakerConditionKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "exposure_threshold" => Some(Self::ExposureThreshold),
            "volume_spike" => Some(Self::VolumeSpike),
            "error_rate" => Some(Self::ErrorRate),
            "market_volatility" => Some(Self::MarketVolatility),
            "confidence_drop" => Some(Self::ConfidenceDrop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerActionKind {
    Pause,
    ReduceLimits,
    Alert,
    EmergencyStop,
}

impl BreakerActionKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(Self::Pause),
            "reduce_limits" => Some(Self::ReduceLimits),
            "alert" => Some(Self::Alert),
            "emergency_stop" => Some(Self::EmergencyStop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub name: String,
    pub enabled: bool,
    pub condition: BreakerConditionKind,
    pub threshold: f64,
    pub time_window_secs: u64,
    pub action: BreakerActionKind,
    pub action_duration_secs: u64,
    pub reduction_factor: f64,
    pub triggered: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

/// Snapshot of the signals breakers evaluate against.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakerInputs {
    /// Highest per-chain exposure utilization, 0..1.
    pub max_chain_utilization: f64,
    /// Today's completed volume over the daily ceiling, 0..1.
    pub daily_volume_ratio: f64,
    /// Rejected assessments over total assessments, 0..1.
    pub error_rate: f64,
    /// Worst volatility across the legs just assessed, 0..1.
    pub market_volatility: f64,
    /// Confidence of the latest assessment, 0..1.
    pub last_confidence: f64,
}

/// What the risk manager must do in response to an evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerEffect {
    Triggered { name: String },
    Reset { name: String },
    ReduceLimits { name: String, factor: f64 },
    EmergencyStop { name: String },
}

#[derive(Debug)]
pub struct BreakerEngine {
    breakers: Vec<CircuitBreaker>,
    emergency_stopped: bool,
    paused_until: Option<u64>,
}

impl BreakerEngine {
    pub fn from_config(configs: &[CircuitBreakerConfig]) -> Self {
        let mut breakers = Vec::new();
        for cfg in configs {
            let Some(condition) = BreakerConditionKind::parse(&cfg.condition.kind) else {
                warn!(breaker = %cfg.name, kind = %cfg.condition.kind, "unknown breaker condition, skipping");
                continue;
            };
            let Some(action) = BreakerActionKind::parse(&cfg.action.kind) else {
                warn!(breaker = %cfg.name, kind = %cfg.action.kind, "unknown breaker action, skipping");
                continue;
            };
            breakers.push(CircuitBreaker {
                name: cfg.name.clone(),
                enabled: cfg.enabled,
                condition,
                threshold: cfg.condition.threshold,
                time_window_secs: cfg.condition.time_window_secs,
                action,
                action_duration_secs: cfg.action.duration_secs,
                reduction_factor: cfg.action.reduction_factor,
                triggered: false,
                last_triggered: None,
                trigger_count: 0,
            });
        }
        BreakerEngine {
            breakers,
            emergency_stopped: false,
            paused_until: None,
        }
    }

    /// Evaluate every enabled breaker against the snapshot. Returns the
    /// effects the owner must apply; internal pause/emergency flags are
    /// updated here.
    pub fn evaluate(&mut self, inputs: &BreakerInputs) -> Vec<BreakerEffect> {
        let now = unix_now();
        let mut effects = Vec::new();

        // Lazy pause expiry
        if let Some(until) = self.paused_until {
            if now >= until {
                self.paused_until = None;
            }
        }

        for breaker in &mut self.breakers {
            if !breaker.enabled {
                continue;
            }
            let holds = match breaker.condition {
                BreakerConditionKind::ExposureThreshold => {
                    inputs.max_chain_utilization > breaker.threshold
                }
                BreakerConditionKind::VolumeSpike => inputs.daily_volume_ratio > breaker.threshold,
                BreakerConditionKind::ErrorRate => inputs.error_rate > breaker.threshold,
                BreakerConditionKind::MarketVolatility => {
                    inputs.market_volatility > breaker.threshold
                }
                BreakerConditionKind::ConfidenceDrop => {
                    inputs.last_confidence < breaker.threshold
                }
            };

            if holds {
                if breaker.triggered {
                    // Already tripped: do not re-fire the action
                    continue;
                }
                breaker.triggered = true;
                breaker.last_triggered = Some(Utc::now());
                breaker.trigger_count += 1;
                effects.push(BreakerEffect::Triggered {
                    name: breaker.name.clone(),
                });
                match breaker.action {
                    BreakerActionKind::Pause => {
                        self.paused_until = Some(now + breaker.action_duration_secs);
                    }
                    BreakerActionKind::ReduceLimits => {
                        effects.push(BreakerEffect::ReduceLimits {
                            name: breaker.name.clone(),
                            factor: breaker.reduction_factor,
                        });
                    }
                    BreakerActionKind::Alert => {}
                    BreakerActionKind::EmergencyStop => {
                        self.emergency_stopped = true;
                        effects.push(BreakerEffect::EmergencyStop {
                            name: breaker.name.clone(),
                        });
                    }
                }
            } else if breaker.triggered {
                // Condition cleared; pauses stay armed until the window ends
                let pause_active = breaker.action == BreakerActionKind::Pause
                    && self.paused_until.is_some();
                let stop_active =
                    breaker.action == BreakerActionKind::EmergencyStop && self.emergency_stopped;
                if !pause_active && !stop_active {
                    breaker.triggered = false;
                    effects.push(BreakerEffect::Reset {
                        name: breaker.name.clone(),
                    });
                }
            }
        }

        effects
    }

    pub fn is_paused(&self) -> bool {
        match self.paused_until {
            Some(until) => unix_now() < until,
            None => false,
        }
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }

    /// Clear the global stop and re-arm any emergency-stop breakers.
    /// Returns false if no stop was active.
    pub fn reset_emergency_stop(&mut self) -> bool {
        if !self.emergency_stopped {
            return false;
        }
        self.emergency_stopped = false;
        for breaker in &mut self.breakers {
            if breaker.action == BreakerActionKind::EmergencyStop {
                breaker.triggered = false;
            }
        }
        true
    }

    pub fn snapshot(&self) -> Vec<CircuitBreaker> {
        self.breakers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerActionConfig, BreakerConditionConfig};

    fn breaker_config(name: &str, condition: &str, threshold: f64, action: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: name.to_string(),
            enabled: true,
            condition: BreakerConditionConfig {
                kind: condition.to_string(),
                threshold,
                time_window_secs: 300,
            },
            action: BreakerActionConfig {
                kind: action.to_string(),
                duration_secs: 60,
                reduction_factor: 0.5,
            },
        }
    }

    #[test]
    fn triggering_is_idempotent() {
        let mut engine = BreakerEngine::from_config(&[breaker_config(
            "exposure",
            "exposure_threshold",
            0.5,
            "reduce_limits",
        )]);
        let inputs = BreakerInputs {
            max_chain_utilization: 0.6,
            ..Default::default()
        };

        let first = engine.evaluate(&inputs);
        assert_eq!(first.len(), 2); // Triggered + ReduceLimits
        let second = engine.evaluate(&inputs);
        assert!(second.is_empty(), "re-evaluation must not re-fire");
        assert_eq!(engine.snapshot()[0].trigger_count, 1);
    }

    #[test]
    fn breaker_resets_when_condition_clears() {
        let mut engine = BreakerEngine::from_config(&[breaker_config(
            "exposure",
            "exposure_threshold",
            0.5,
            "alert",
        )]);
        engine.evaluate(&BreakerInputs {
            max_chain_utilization: 0.6,
            ..Default::default()
        });
        let effects = engine.evaluate(&BreakerInputs {
            max_chain_utilization: 0.2,
            ..Default::default()
        });
        assert!(effects
            .iter()
            .any(|e| matches!(e, BreakerEffect::Reset { .. })));
        // Can fire again after the reset
        let effects = engine.evaluate(&BreakerInputs {
            max_chain_utilization: 0.7,
            ..Default::default()
        });
        assert!(effects
            .iter()
            .any(|e| matches!(e, BreakerEffect::Triggered { .. })));
        assert_eq!(engine.snapshot()[0].trigger_count, 2);
    }

    #[test]
    fn emergency_stop_holds_until_reset() {
        let mut engine = BreakerEngine::from_config(&[breaker_config(
            "confidence",
            "confidence_drop",
            0.3,
            "emergency_stop",
        )]);
        engine.evaluate(&BreakerInputs {
            last_confidence: 0.1,
            max_chain_utilization: 0.0,
            ..Default::default()
        });
        assert!(engine.is_emergency_stopped());

        // Condition clearing does not lift the stop
        engine.evaluate(&BreakerInputs {
            last_confidence: 0.9,
            ..Default::default()
        });
        assert!(engine.is_emergency_stopped());

        assert!(engine.reset_emergency_stop());
        assert!(!engine.is_emergency_stopped());
        assert!(!engine.reset_emergency_stop());
    }

    #[test]
    fn pause_expires_after_duration() {
        let mut engine = BreakerEngine::from_config(&[breaker_config(
            "errors",
            "error_rate",
            0.5,
            "pause",
        )]);
        engine.evaluate(&BreakerInputs {
            error_rate: 0.9,
            ..Default::default()
        });
        assert!(engine.is_paused());
        // Force expiry
        engine.paused_until = Some(0);
        assert!(!engine.is_paused());
    }

    #[test]
    fn unknown_kinds_are_skipped() {
        let engine = BreakerEngine::from_config(&[breaker_config(
            "bogus",
            "not_a_condition",
            0.5,
            "alert",
        )]);
        assert!(engine.snapshot().is_empty());
    }
}
