use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::{Clock, TokioClock};

pub const MAX_REQUESTS_PER_WINDOW: u32 = 10;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
// A start stays in the window until strictly more than `window` has passed.
const AGE_OUT_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate-limited task was aborted before producing a result")]
    TaskAborted,
}

type Job = Box<dyn FnOnce() + Send>;

/// One decision of the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// Queue is empty; the loop ends.
    Idle,
    /// Start the head task. `then` is the delay before the next step, if any work remains.
    Run { then: Option<Duration> },
    /// Window budget exhausted; wait until the oldest recorded start ages out.
    Wait(Duration),
}

/// `started` counts the starts still inside the trailing window and
/// `oldest_age` is how long ago the earliest of them happened.
pub fn plan_step(
    started: usize,
    oldest_age: Option<Duration>,
    queue_len: usize,
    max: u32,
    window: Duration,
) -> DrainStep {
    if queue_len == 0 {
        return DrainStep::Idle;
    }

    if started < max as usize {
        let spacing = window / max.max(1);
        DrainStep::Run {
            then: (queue_len > 1).then_some(spacing),
        }
    } else {
        let age = oldest_age.unwrap_or_default();
        DrainStep::Wait(window.saturating_sub(age) + AGE_OUT_TICK)
    }
}

struct LimiterState {
    /// Start times inside the trailing window, oldest first. Never longer than `max`.
    recent_starts: VecDeque<Instant>,
    queue: VecDeque<Job>,
}

impl LimiterState {
    fn forget_expired(&mut self, now: Instant, window: Duration) {
        while self
            .recent_starts
            .front()
            .is_some_and(|start| now.saturating_duration_since(*start) > window)
        {
            self.recent_starts.pop_front();
        }
    }
}

/// FIFO limiter allowing at most `max` task starts per rolling `window`.
///
/// Tasks are started in submission order and each runs once. Their own
/// failures are handed back to the submitter and never stall the queue.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(MAX_REQUESTS_PER_WINDOW, RATE_LIMIT_WINDOW, Arc::new(TokioClock))
    }

    pub fn with_clock(max: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max,
            window,
            clock,
            state: Mutex::new(LimiterState {
                recent_starts: VecDeque::new(),
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Enqueues `task` immediately and returns a future resolving to its output.
    ///
    /// The task's future is spawned when the limiter starts it, so it keeps
    /// running even if the returned future is dropped.
    pub fn submit<F, Fut, T>(
        self: &Arc<Self>,
        task: F,
    ) -> impl Future<Output = Result<T, RateLimitError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let future = task();
            tokio::spawn(async move {
                let output = future.await;
                let _ = result_tx.send(output);
            });
        });

        let start_drain = {
            let mut state = self.lock_state();
            let was_empty = state.queue.is_empty();
            state.queue.push_back(job);
            was_empty
        };

        if start_drain {
            let limiter = Arc::clone(self);
            tokio::spawn(async move {
                limiter.drain().await;
            });
        }

        async move { result_rx.await.map_err(|_| RateLimitError::TaskAborted) }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let (job, next_delay) = {
                let mut state = self.lock_state();
                let now = self.clock.now();
                state.forget_expired(now, self.window);
                let oldest_age = state
                    .recent_starts
                    .front()
                    .map(|start| now.saturating_duration_since(*start));

                match plan_step(
                    state.recent_starts.len(),
                    oldest_age,
                    state.queue.len(),
                    self.max,
                    self.window,
                ) {
                    DrainStep::Idle => return,
                    DrainStep::Run { then } => {
                        state.recent_starts.push_back(now);
                        (state.queue.pop_front(), then)
                    }
                    DrainStep::Wait(delay) => {
                        debug!(
                            queued = state.queue.len(),
                            wait_ms = delay.as_millis() as u64,
                            "rate limit window exhausted"
                        );
                        (None, Some(delay))
                    }
                }
            };

            if let Some(job) = job {
                job();
            }

            match next_delay {
                Some(delay) => self.clock.sleep(delay).await,
                None => return,
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACING: Duration = Duration::from_secs(6);

    fn recording_task(
        starts: &Arc<Mutex<Vec<(usize, Instant)>>>,
        index: usize,
    ) -> impl FnOnce() -> std::future::Ready<usize> + Send + 'static {
        let starts = Arc::clone(starts);
        move || {
            starts.lock().expect("starts lock").push((index, Instant::now()));
            std::future::ready(index)
        }
    }

    fn start_times(starts: &Arc<Mutex<Vec<(usize, Instant)>>>) -> Vec<Instant> {
        starts.lock().expect("starts lock").iter().map(|(_, at)| *at).collect()
    }

    #[test]
    fn plan_runs_until_budget_is_spent() {
        let window = RATE_LIMIT_WINDOW;
        assert_eq!(plan_step(0, None, 0, 10, window), DrainStep::Idle);
        assert_eq!(
            plan_step(3, Some(Duration::from_secs(5)), 1, 10, window),
            DrainStep::Run { then: None }
        );
        assert_eq!(
            plan_step(3, Some(Duration::from_secs(5)), 4, 10, window),
            DrainStep::Run {
                then: Some(SPACING)
            }
        );
    }

    #[test]
    fn plan_waits_for_oldest_start_to_age_out() {
        let window = RATE_LIMIT_WINDOW;
        assert_eq!(
            plan_step(10, Some(Duration::from_secs(20)), 2, 10, window),
            DrainStep::Wait(Duration::from_secs(40) + AGE_OUT_TICK)
        );
        assert_eq!(
            plan_step(10, Some(window), 2, 10, window),
            DrainStep::Wait(AGE_OUT_TICK)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_calls_burst_then_wait_for_window() {
        let limiter = Arc::new(RateLimiter::new());
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        for index in 0..11 {
            let output = limiter
                .submit(recording_task(&starts, index))
                .await
                .expect("task should complete");
            assert_eq!(output, index);
        }

        let times = start_times(&starts);
        assert!(times[..10].iter().all(|at| *at == origin));
        assert!(times[10] - origin >= RATE_LIMIT_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_spaced_and_eleventh_waits_for_reset() {
        let limiter = Arc::new(RateLimiter::new());
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        let pending: Vec<_> = (0..11)
            .map(|index| limiter.submit(recording_task(&starts, index)))
            .collect();
        for future in pending {
            future.await.expect("task should complete");
        }

        let times = start_times(&starts);
        for (index, at) in times.iter().take(10).enumerate() {
            let offset = *at - origin;
            let expected = SPACING * index as u32;
            assert!(offset >= expected && offset < expected + Duration::from_millis(10));
        }
        assert!(times[10] - origin >= RATE_LIMIT_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_budget_in_any_trailing_window() {
        let limiter = Arc::new(RateLimiter::new());
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut pending = Vec::new();
        for index in 0..25 {
            pending.push(limiter.submit(recording_task(&starts, index)));
            if index == 12 {
                tokio::time::sleep(Duration::from_secs(7)).await;
            }
        }
        for future in pending {
            future.await.expect("task should complete");
        }

        let times = start_times(&starts);
        assert_eq!(times.len(), 25);
        let max = MAX_REQUESTS_PER_WINDOW as usize;
        for index in max..times.len() {
            assert!(
                times[index] - times[index - max] >= RATE_LIMIT_WINDOW,
                "more than {max} starts inside one window ending at task {index}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_burst_cannot_reuse_an_early_window() {
        let limiter = Arc::new(RateLimiter::new());
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        let mut next = 0;
        for (at, count) in [(0, 1), (55, 9), (61, 9)] {
            tokio::time::sleep_until(origin + Duration::from_secs(at)).await;
            for _ in 0..count {
                limiter
                    .submit(recording_task(&starts, next))
                    .await
                    .expect("task should complete");
                next += 1;
            }
        }

        let times = start_times(&starts);
        assert_eq!(times.len(), 19);
        for (index, end) in times.iter().enumerate() {
            let in_window = times[..=index]
                .iter()
                .filter(|at| *end - **at <= RATE_LIMIT_WINDOW)
                .count();
            assert!(
                in_window <= MAX_REQUESTS_PER_WINDOW as usize,
                "{in_window} starts in the window ending at task {index}"
            );
        }
        // The 61 s arrival fits beside the nine 55 s starts, the rest wait for those to age out.
        assert_eq!(times[10] - origin, Duration::from_secs(61));
        assert!(times[11] - origin > Duration::from_secs(115));
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_start_in_submission_order() {
        let limiter = Arc::new(RateLimiter::new());
        let starts = Arc::new(Mutex::new(Vec::new()));

        let pending: Vec<_> = (0..5)
            .map(|index| limiter.submit(recording_task(&starts, index)))
            .collect();
        for future in pending {
            future.await.expect("task should complete");
        }

        let order: Vec<usize> = starts
            .lock()
            .expect("starts lock")
            .iter()
            .map(|(index, _)| *index)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(limiter.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_does_not_poison_queue() {
        let limiter = Arc::new(RateLimiter::new());

        let failed = limiter.submit(|| async { Err::<u32, String>("boom".to_string()) });
        let succeeded = limiter.submit(|| async { Ok::<u32, String>(7) });

        assert_eq!(failed.await, Ok(Err("boom".to_string())));
        assert_eq!(succeeded.await, Ok(Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_reports_abort() {
        let limiter = Arc::new(RateLimiter::new());

        let aborted = limiter.submit(|| async {
            if true {
                panic!("task exploded");
            }
            1_u32
        });
        let next = limiter.submit(|| async { 2_u32 });

        assert_eq!(aborted.await, Err(RateLimitError::TaskAborted));
        assert_eq!(next.await, Ok(2));
    }
}
