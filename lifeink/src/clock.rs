use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Time source shared by the rate limiter, the event throttle and the toolbar.
///
/// The default implementation is backed by tokio's timer, so tests running on a
/// paused runtime (`#[tokio::test(start_paused = true)]`) observe deterministic
/// time without touching the wall clock.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Leading-edge throttle: the first call in a window runs, the rest are dropped.
pub struct Throttle {
    limit: Duration,
    last_accepted: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            last_accepted: Mutex::new(None),
        }
    }

    /// Returns `true` when the caller may proceed at `now`.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut last = match self.last_accepted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match *last {
            Some(previous) if now.saturating_duration_since(previous) < self.limit => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
