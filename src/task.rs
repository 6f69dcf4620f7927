//! Task envelopes and the delivery lifecycle.
//!
//! A [`TaskEnvelope`] is the unit of work a producer submits: a type tag, an
//! opaque payload, and delivery metadata. Once enqueued the broker tracks it
//! as a [`Delivery`], which moves through states until it is acked (removed)
//! or exhausts its retry budget and goes dead.
//!
//! # Delivery lifecycle
//!
//! 1. Deliveries are created in `Pending` status
//! 2. A worker claims one, moving it to `InFlight`
//! 3. On handler success the delivery is acked and removed
//! 4. On failure it moves to `Retrying` with a backoff delay, or to `Dead`
//!    once `max_retries` is exhausted (or immediately for permanent failures)
//!
//! Dead deliveries are retained for operator inspection and manual replay;
//! they are never redelivered automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use strum::{Display, EnumString};

/// A priority-partitioned sub-queue. Workers drain lanes with weighted
/// preference: `Critical` first, `Low` last.
#[derive(
    Serialize, Deserialize, Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type,
)]
#[sqlx(type_name = "text")]
#[strum(serialize_all = "snake_case")]
pub enum QueueLane {
    #[serde(rename = "critical")]
    #[sqlx(rename = "critical")]
    Critical,
    #[serde(rename = "default")]
    #[sqlx(rename = "default")]
    Default,
    #[serde(rename = "low")]
    #[sqlx(rename = "low")]
    Low,
}

impl QueueLane {
    /// All lanes in descending priority.
    pub const ALL: [QueueLane; 3] = [QueueLane::Critical, QueueLane::Default, QueueLane::Low];

    /// Lane polling order for a worker homed on `self`: the home lane first,
    /// then the remaining lanes in descending priority. A low-lane worker
    /// serving `low` first is what bounds starvation under critical backlog.
    pub fn poll_order(self) -> Vec<QueueLane> {
        let mut order = vec![self];
        order.extend(Self::ALL.iter().copied().filter(|lane| *lane != self));
        order
    }
}

impl Default for QueueLane {
    fn default() -> Self {
        Self::Default
    }
}

/// Represents the current status of a delivery in the queue system.
///
/// The transitions follow:
/// `Pending` -> `InFlight` -> acked (removed)   (success case)
/// `Pending` -> `InFlight` -> `Retrying` -> ... (transient failure)
/// `Pending` -> `InFlight` -> `Dead`            (budget exhausted or permanent)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum DeliveryState {
    /// Waiting for its first claim
    #[serde(rename = "pending")]
    #[sqlx(rename = "pending")]
    Pending,
    /// Claimed by a worker and hidden until the visibility timeout elapses
    #[serde(rename = "in_flight")]
    #[sqlx(rename = "in_flight")]
    InFlight,
    /// Failed at least once, waiting out its backoff delay
    #[serde(rename = "retrying")]
    #[sqlx(rename = "retrying")]
    Retrying,
    /// Terminal failure, retained for inspection
    #[serde(rename = "dead")]
    #[sqlx(rename = "dead")]
    Dead,
}

/// The serializable unit of work submitted to the broker.
///
/// Immutable once enqueued; only the broker mutates the resulting delivery
/// (retry counter, state transitions).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskEnvelope {
    pub task_type: String,
    pub payload: Vec<u8>,
    pub queue: QueueLane,
    pub max_retries: u32,
    /// Delay visibility until this time; `None` means immediately visible.
    pub process_at: Option<DateTime<Utc>>,
}

/// Recognized options for [`crate::distributor::TaskDistributor::distribute`].
///
/// Unset fields fall back to the distributor's configured defaults.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct EnqueueOptions {
    /// Selects the processing priority lane.
    pub queue: Option<QueueLane>,
    /// Overrides the default retry ceiling.
    pub max_retries: Option<u32>,
    /// Delays visibility until the given time.
    pub process_at: Option<DateTime<Utc>>,
}

/// One broker-tracked attempt lifecycle of an envelope.
///
/// Timestamps are unix epoch milliseconds so visibility comparisons stay
/// integer comparisons in SQL.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Delivery {
    pub id: i64,
    pub task_type: String,
    pub payload: Vec<u8>,
    pub queue: QueueLane,

    /// Number of failed attempts so far.
    pub retry_count: u32,
    pub max_retries: u32,

    pub state: DeliveryState,

    /// When this delivery next becomes claimable (or, while in flight, when
    /// its claim expires).
    pub visible_at: i64,
    pub enqueued_at: i64,

    /// Reason recorded by the most recent failure, if any.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_order_starts_at_home_lane() {
        assert_eq!(
            QueueLane::Low.poll_order(),
            vec![QueueLane::Low, QueueLane::Critical, QueueLane::Default]
        );
        assert_eq!(QueueLane::Critical.poll_order(), QueueLane::ALL.to_vec());
    }

    #[test]
    fn lane_round_trips_through_strings() {
        use std::str::FromStr;

        assert_eq!(QueueLane::Critical.to_string(), "critical");
        assert_eq!(QueueLane::from_str("low").unwrap(), QueueLane::Low);
    }
}
