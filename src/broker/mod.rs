//! Queue broker abstraction.
//!
//! The broker owns delivery durability and visibility: producers hand it a
//! [`TaskEnvelope`], workers claim deliveries lane-by-lane and report the
//! outcome back. Any durable store that can serialize claims satisfies the
//! contract; [`sqlite::SqliteBroker`] is the shipped implementation.

use std::{future::Future, pin::Pin, time::Duration};

use crate::{
    error::Error,
    task::{Delivery, QueueLane, TaskEnvelope},
};

pub mod sqlite;

pub type DeliveryId = i64;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Durable, multi-priority queue operations.
///
/// At-least-once delivery: a claimed delivery that is neither acked nor
/// failed within the visibility timeout becomes claimable again. A claim is
/// exclusive while it is valid, so no two workers observe the same delivery
/// as in-flight simultaneously.
pub trait Broker: Send + Sync + 'static {
    /// Persists the envelope. Once this returns, the task survives process
    /// restarts of both producer and consumer.
    fn enqueue(&self, envelope: TaskEnvelope) -> BoxFuture<'_, DeliveryId>;

    /// Claims at most one ready delivery, trying `lanes` in the given order.
    /// Returns `None` when no lane has ready work; the caller supplies the
    /// blocking/polling loop.
    fn dequeue(&self, lanes: Vec<QueueLane>) -> BoxFuture<'_, Option<Delivery>>;

    /// Terminal success: removes the delivery from the active set. Fails if
    /// the delivery is not currently in flight, so a delivery cannot be
    /// acked twice.
    fn ack(&self, id: DeliveryId) -> BoxFuture<'_, ()>;

    /// Reports a failed attempt. Retryable failures consume retry budget and
    /// reschedule with backoff; non-retryable failures (and exhausted
    /// budgets) move the delivery to the dead state, where it is retained
    /// for inspection.
    fn fail(&self, id: DeliveryId, reason: String, retryable: bool) -> BoxFuture<'_, ()>;

    /// Dead deliveries, oldest first.
    fn list_dead(&self) -> BoxFuture<'_, Vec<Delivery>>;

    /// Manual replay of a dead delivery: resets its retry budget and makes
    /// it immediately claimable again.
    fn requeue_dead(&self, id: DeliveryId) -> BoxFuture<'_, ()>;
}

/// Exponential backoff schedule for retried deliveries.
///
/// The delay for retry `n` (1-based) is `base * 2^(n-1)` capped at `cap`,
/// then jittered by up to `jitter` (a fraction of the delay) either way so
/// redeliveries don't herd.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
}

impl BackoffPolicy {
    /// The un-jittered delay; monotonically non-decreasing in `retry_count`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let exp = retry_count.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exp);

        delay.min(self.cap)
    }

    /// The scheduling delay actually applied, with jitter.
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        use rand::Rng;

        let delay = self.delay(retry_count);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let spread = delay.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);

        Duration::try_from_secs_f64((delay.as_secs_f64() + offset).max(0.0)).unwrap_or(delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(10 * 60),
            jitter: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotone_and_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(60),
            jitter: 0.0,
        };

        let mut previous = Duration::ZERO;
        for retry in 1..=40 {
            let delay = policy.delay(retry);
            assert!(delay >= previous, "delay shrank at retry {retry}");
            assert!(delay <= policy.cap);
            previous = delay;
        }

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(40), policy.cap);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(60),
            jitter: 0.5,
        };

        for _ in 0..100 {
            let jittered = policy.jittered_delay(2);
            assert!(jittered >= Duration::from_millis(200));
            assert!(jittered <= Duration::from_millis(600));
        }
    }
}
