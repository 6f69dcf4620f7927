//! Producer-facing API: validate, serialize, enqueue.

use std::{collections::HashSet, sync::Arc};

use serde::Serialize;

use crate::{
    broker::{Broker, DeliveryId},
    error::Error,
    registry::HandlerRegistry,
    task::{EnqueueOptions, TaskEnvelope},
};

/// Hands validated task envelopes to the broker.
///
/// Once `distribute` returns success, the task is durable: it survives
/// restarts of this process and of the processor. A `BrokerUnavailable`
/// error is the caller's to judge; an RPC handler enqueueing a courtesy
/// email should usually not fail the whole request over it.
pub struct TaskDistributor {
    broker: Arc<dyn Broker>,
    known_types: HashSet<String>,
    default_max_retries: u32,
}

impl TaskDistributor {
    /// The distributor learns the closed set of task types from the same
    /// registry the processor runs, so an enqueue for a type nobody handles
    /// is rejected at the producer instead of dead-lettering later.
    pub fn new(broker: Arc<dyn Broker>, registry: &HandlerRegistry, default_max_retries: u32) -> Self {
        Self {
            broker,
            known_types: registry.task_types(),
            default_max_retries,
        }
    }

    pub async fn distribute<T: Serialize>(
        &self,
        task_type: &str,
        payload: &T,
        opts: EnqueueOptions,
    ) -> Result<DeliveryId, Error> {
        if task_type.is_empty() {
            return Err(Error::validation("task type must not be empty"));
        }

        if !self.known_types.contains(task_type) {
            return Err(Error::validation(format!(
                "task type {task_type} is not registered"
            )));
        }

        let payload = serde_json::to_vec(payload)?;

        let envelope = TaskEnvelope {
            task_type: task_type.to_owned(),
            payload,
            queue: opts.queue.unwrap_or_default(),
            max_retries: opts.max_retries.unwrap_or(self.default_max_retries),
            process_at: opts.process_at,
        };

        let id = self.broker.enqueue(envelope).await?;

        tracing::info!(delivery = id, task_type, "distributed task");

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::sqlite::SqliteBroker;

    async fn setup() -> (Arc<SqliteBroker>, TaskDistributor) {
        let broker = SqliteBroker::connect().await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("task:known", |_: Vec<u8>| async { Ok::<(), Error>(()) });

        let distributor = TaskDistributor::new(broker.clone(), &registry, 3);
        (broker, distributor)
    }

    #[tokio::test]
    async fn rejects_empty_and_unregistered_types() {
        let (_broker, distributor) = setup().await;

        assert!(matches!(
            distributor
                .distribute("", &(), EnqueueOptions::default())
                .await,
            Err(Error::Validation { .. })
        ));

        assert!(matches!(
            distributor
                .distribute("task:nobody", &(), EnqueueOptions::default())
                .await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn applies_defaults_and_overrides() {
        let (broker, distributor) = setup().await;

        let id = distributor
            .distribute("task:known", &serde_json::json!({"k": "v"}), EnqueueOptions::default())
            .await
            .unwrap();

        let delivery = broker.get_delivery(id).await.unwrap().unwrap();
        assert_eq!(delivery.max_retries, 3);
        assert_eq!(delivery.queue, crate::task::QueueLane::Default);

        let opts = EnqueueOptions::builder()
            .queue(crate::task::QueueLane::Critical)
            .max_retries(7)
            .build();

        let id = distributor
            .distribute("task:known", &(), opts)
            .await
            .unwrap();

        let delivery = broker.get_delivery(id).await.unwrap().unwrap();
        assert_eq!(delivery.max_retries, 7);
        assert_eq!(delivery.queue, crate::task::QueueLane::Critical);
    }
}
