//! Retry backoff and pending-queue ordering policies.
//!
//! Both policies are pure functions kept apart from the coordinating loop:
//! the loop asks [`BackoffPolicy::delay_for_attempt`] how long to wait before
//! re-admitting a failed job, and [`OrderingPolicy::compare`] where a pending
//! job belongs in the queue.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::PriorityKey;
use crate::error::{BatchflowError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller-supplied backoff function.
#[derive(Clone)]
pub struct BackoffFn(Arc<dyn Fn(u32) -> Duration + Send + Sync>);

impl fmt::Debug for BackoffFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackoffFn(..)")
    }
}

/// Delay before re-admitting a failed job.
///
/// `attempt` is the number of the attempt that just failed, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Retry immediately
    None,
    /// Same delay for every retry
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// `initial + increment * (attempt - 1)`
    Linear {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
    },
    /// Exponential with `±jitter_factor` random spread
    ExponentialWithJitter {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
        jitter_factor: f64,
    },
    #[serde(skip)]
    Custom(BackoffFn),
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Create a fixed backoff.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Create a linear backoff.
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear { initial, increment }
    }

    /// Create an exponential backoff with sensible defaults.
    pub fn exponential() -> Self {
        Self::default()
    }

    /// Wrap an arbitrary `attempt -> delay` function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(BackoffFn(Arc::new(f)))
    }

    /// Calculate the delay after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => *delay,
            Self::Linear { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(step))
            }
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => exponential_delay(*initial, *max, *multiplier, step),
            Self::ExponentialWithJitter {
                initial,
                max,
                multiplier,
                jitter_factor,
            } => {
                let capped = exponential_delay(*initial, *max, *multiplier, step).as_secs_f64();
                let spread = capped * jitter_factor;
                let jitter = rand::thread_rng().gen_range(-1.0..=1.0) * spread;
                Duration::try_from_secs_f64((capped + jitter).max(0.0)).unwrap_or(*max)
            }
            Self::Custom(f) => (f.0)(attempt),
        }
    }

    /// Reject parameters that would make the delay meaningless.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Exponential { multiplier, initial, max }
            | Self::ExponentialWithJitter { multiplier, initial, max, .. } => {
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(BatchflowError::invalid_config(format!(
                        "backoff multiplier must be a finite number >= 1.0, got {}",
                        multiplier
                    )));
                }
                if initial > max {
                    return Err(BatchflowError::invalid_config(
                        "backoff initial delay must not exceed max delay",
                    ));
                }
            }
            _ => {}
        }

        if let Self::ExponentialWithJitter { jitter_factor, .. } = self {
            if !(0.0..=1.0).contains(jitter_factor) {
                return Err(BatchflowError::invalid_config(format!(
                    "backoff jitter_factor must be within [0, 1], got {}",
                    jitter_factor
                )));
            }
        }

        Ok(())
    }
}

fn exponential_delay(initial: Duration, max: Duration, multiplier: f64, step: u32) -> Duration {
    let exponent = step.min(i32::MAX as u32) as i32;
    let secs = initial.as_secs_f64() * multiplier.powi(exponent);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(max)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ordering
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller-supplied comparator over priority keys.
#[derive(Clone)]
pub struct KeyComparator(Arc<dyn Fn(&PriorityKey, &PriorityKey) -> Ordering + Send + Sync>);

impl fmt::Debug for KeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyComparator(..)")
    }
}

/// How pending jobs are ordered for admission.
///
/// Whatever the policy, jobs that compare equal are admitted in submission
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Submission order; priority keys are ignored
    #[default]
    Fifo,
    /// Smallest key first
    Ascending,
    /// Largest key first
    Descending,
    #[serde(skip)]
    Custom(KeyComparator),
}

impl OrderingPolicy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&PriorityKey, &PriorityKey) -> Ordering + Send + Sync + 'static,
    {
        Self::Custom(KeyComparator(Arc::new(f)))
    }

    pub fn compare(&self, a: &PriorityKey, b: &PriorityKey) -> Ordering {
        match self {
            Self::Fifo => Ordering::Equal,
            Self::Ascending => a.cmp(b),
            Self::Descending => b.cmp(a),
            Self::Custom(f) => (f.0)(a, b),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
