//! Bounded retry of a single unit
//!
//! [`Retry`] re-invokes its wrapped unit after failures whose
//! [`kind`](toolweave_core::AgentError::kind) is on an allow-list. Each
//! attempt runs on a fresh child context and is announced by an `attempt`
//! event on the wrapper's own context, so the history shows exactly how
//! many tries were made.
//!
//! # Delays
//!
//! ```text
//! delay = initial_interval × backoff_factor ^ (attempt - 1)
//! delay = min(delay, max_interval)
//! if jitter: delay *= random(0.5..=1.5)
//! ```
//!
//! Waiting between attempts checks for cancellation of the wrapper's
//! context; a cancelled wrapper stops retrying.
//!
//! Argument errors and cancellations are never retried.

use rand::Rng;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use toolweave_core::{AgentError, Args, Context, EventKind, Result, Tool, ToolSpec};
use tracing::{debug, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Attempt count and inter-attempt delay
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Delay before the second attempt, in seconds
    pub initial_interval: f64,

    /// Multiplier applied to the delay after each attempt
    pub backoff_factor: f64,

    /// Upper bound of a single delay, in seconds
    pub max_interval: f64,

    /// Randomize delays by a factor in `0.5..=1.5`
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Retry straight away, without any delay
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts)
            .with_initial_interval(0.0)
            .with_jitter(false)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds.max(0.0);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds.max(0.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: usize) -> Duration {
        if attempt == 0 || attempt >= self.max_attempts {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_interval);
        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        // Infinite or overflowing intervals saturate.
        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Whether another attempt may follow attempt number `attempt`
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Re-invokes a unit on allow-listed failures
pub struct Retry {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
    policy: RetryPolicy,
    retry_on: Option<Vec<String>>,
}

impl Retry {
    /// `<tool>::retry` with the wrapped unit's arguments, retrying any
    /// execution failure up to `max_attempts` times in total
    pub fn new(tool: Arc<dyn Tool>, max_attempts: usize) -> Self {
        let mut spec = tool.spec().clone();
        spec.name = format!("{}::retry", tool.name());
        Self {
            spec,
            tool,
            policy: RetryPolicy::new(max_attempts),
            retry_on: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Only retry failures of these kinds; everything else propagates at once
    pub fn retry_on<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retry_on = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_retryable(&self, err: &AgentError) -> bool {
        match err {
            AgentError::Argument { .. } | AgentError::Cancelled(_) => false,
            other => match &self.retry_on {
                Some(kinds) => kinds.iter().any(|k| k == other.kind()),
                None => true,
            },
        }
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("name", &self.spec.name)
            .field("tool", &self.tool.name())
            .field("policy", &self.policy)
            .field("retry_on", &self.retry_on)
            .finish()
    }
}

/// Sleep for `delay`, returning early with an error if `ctx` is cancelled
fn pause(ctx: &Context, delay: Duration) -> Result<()> {
    // `None` means the delay is too large to schedule: wait for cancellation.
    let deadline = Instant::now().checked_add(delay);
    loop {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled(ctx.id()));
        }
        let now = Instant::now();
        match deadline {
            Some(deadline) if now >= deadline => return Ok(()),
            Some(deadline) => thread::sleep((deadline - now).min(SLEEP_SLICE)),
            None => thread::sleep(SLEEP_SLICE),
        }
    }
}

impl Tool for Retry {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn run(&self, ctx: &Context, args: Args) -> Result<Value> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            ctx.record(
                EventKind::custom("attempt"),
                json!({ "attempt": attempt, "max_attempts": self.policy.max_attempts }),
            );
            let err = match self.tool.invoke(ctx, args.clone()) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                debug!(attempt, kind = %err.kind(), "failure not retryable");
                return Err(err);
            }
            if !self.policy.should_retry(attempt) {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(AgentError::RetryExhausted {
                    tool: self.tool.name().to_string(),
                    attempts: u32::try_from(attempt).unwrap_or(u32::MAX),
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_after(attempt);
            debug!(attempt, ?delay, kind = %err.kind(), "retrying");
            pause(ctx, delay)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, 0.5);
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.max_interval, 128.0);
        assert!(policy.jitter);
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = RetryPolicy::new(6)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_max_interval(5.0)
            .with_jitter(false);
        let delays: Vec<f64> = (1..6).map(|a| policy.delay_after(a).as_secs_f64()).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 5.0, 5.0]);
        assert_eq!(policy.delay_after(6), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(3).with_initial_interval(1.0);
        for _ in 0..50 {
            let d = policy.delay_after(1).as_secs_f64();
            assert!((0.5..=1.5).contains(&d));
        }
    }

    #[test]
    fn test_unbounded_intervals_saturate() {
        let policy = RetryPolicy::new(3)
            .with_initial_interval(f64::INFINITY)
            .with_max_interval(f64::INFINITY);
        assert_eq!(policy.delay_after(1), Duration::MAX);
        assert_eq!(policy.with_jitter(false).delay_after(2), Duration::MAX);
    }

    #[test]
    fn test_pause_with_unschedulable_delay_still_sees_cancellation() {
        let ctx = Context::new();
        let canceller = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });
        assert!(matches!(pause(&ctx, Duration::MAX), Err(AgentError::Cancelled(_))));
        handle.join().unwrap();
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    #[test]
    fn test_pause_stops_on_cancellation() {
        let ctx = Context::new();
        ctx.cancel();
        let started = Instant::now();
        assert!(matches!(
            pause(&ctx, Duration::from_secs(5)),
            Err(AgentError::Cancelled(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
