//! Admission control for network-bound units of work.

use crate::config::ThrottleConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Decides when a throttled unit of work may start.
///
/// Admission may delay a unit but must eventually return.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Waits until the unit may run.
    async fn admit(&self, network_bound: bool);
}

/// Admits everything immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThrottle;

#[async_trait]
impl Throttle for NoThrottle {
    async fn admit(&self, _network_bound: bool) {}
}

/// Spaces network-bound admissions by a minimum interval plus random jitter.
///
/// Units that are not network bound pass straight through.
#[derive(Debug)]
pub struct IntervalThrottle {
    interval: Duration,
    jitter_ms: u64,
    next_slot: Mutex<Option<Instant>>,
}

impl IntervalThrottle {
    /// Creates a throttle with the given spacing.
    #[must_use]
    pub fn new(interval: Duration, jitter_ms: u64) -> Self {
        Self {
            interval,
            jitter_ms,
            next_slot: Mutex::new(None),
        }
    }

    /// Builds the throttle described by `config`.
    #[must_use]
    pub fn from_config(config: &ThrottleConfig) -> Arc<dyn Throttle> {
        if config.enabled {
            Arc::new(Self::new(config.min_interval(), config.jitter_ms))
        } else {
            Arc::new(NoThrottle)
        }
    }

    fn reserve_slot(&self) -> Instant {
        let jitter = if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        };
        let now = Instant::now();
        let mut next_slot = self.next_slot.lock();
        let slot = next_slot.map_or(now, |next| next.max(now));
        *next_slot = Some(slot + self.interval + jitter);
        slot
    }
}

#[async_trait]
impl Throttle for IntervalThrottle {
    async fn admit(&self, network_bound: bool) {
        if !network_bound {
            return;
        }
        let slot = self.reserve_slot();
        tokio::time::sleep_until(slot).await;
    }
}
