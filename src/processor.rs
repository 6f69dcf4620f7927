//! Consumer side: worker pools, dispatch, retry reporting.

use std::{sync::Arc, time::Duration};

use snafu::whatever;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    broker::Broker,
    config::Config,
    error::Error,
    registry::HandlerRegistry,
    task::{Delivery, QueueLane},
};

/// Runs a fixed pool of workers per priority lane against a shared broker.
///
/// Each worker loops: claim a delivery (its home lane first, then the other
/// lanes in descending priority), dispatch to the registered handler under a
/// bounded deadline, and report the outcome back to the broker. Shutdown is
/// cooperative: workers stop claiming new work and in-flight handlers run to
/// completion; anything abandoned mid-claim becomes re-visible once the
/// visibility timeout elapses.
pub struct TaskProcessor {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    config: Config,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl TaskProcessor {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<HandlerRegistry>, config: Config) -> Self {
        Self {
            broker,
            registry,
            config,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    /// Launches the worker pools. Fails if the processor is already running
    /// or no lane has any workers configured.
    pub fn start(&mut self) -> Result<(), Error> {
        if !self.workers.is_empty() {
            whatever!("task processor already started");
        }

        let total: usize = QueueLane::ALL
            .iter()
            .map(|lane| self.config.worker_count(*lane))
            .sum();
        if total == 0 {
            whatever!("no workers configured for any lane");
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let handler_timeout_ms = self.config.handler_timeout_ms;

        for lane in QueueLane::ALL {
            for _ in 0..self.config.worker_count(lane) {
                let broker = self.broker.clone();
                let registry = self.registry.clone();
                let cancel = self.cancel.clone();
                let lanes = lane.poll_order();

                self.workers.push(tokio::spawn(worker_loop(
                    broker,
                    registry,
                    lanes,
                    poll_interval,
                    handler_timeout_ms,
                    cancel,
                )));
            }
        }

        tracing::info!(workers = total, "task processor started");

        Ok(())
    }

    /// Signals workers to stop pulling new work, then waits for in-flight
    /// handler invocations to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!("worker panicked during shutdown: {e}");
            }
        }

        tracing::info!("task processor stopped");
    }
}

async fn worker_loop(
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    lanes: Vec<QueueLane>,
    poll_interval: Duration,
    handler_timeout_ms: u64,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let claimed = tokio::select! {
            _ = cancel.cancelled() => break,
            claimed = broker.dequeue(lanes.clone()) => claimed,
        };

        match claimed {
            Ok(Some(delivery)) => {
                process_delivery(broker.as_ref(), &registry, delivery, handler_timeout_ms).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                tracing::warn!("dequeue failed: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

async fn process_delivery(
    broker: &dyn Broker,
    registry: &HandlerRegistry,
    delivery: Delivery,
    handler_timeout_ms: u64,
) {
    let Some(handler) = registry.get(&delivery.task_type) else {
        // An unknown type is a deployment mismatch, not a transient fault:
        // it goes straight to dead without consuming retry budget.
        let error = Error::unknown_task_type(&delivery.task_type);
        tracing::error!(
            delivery = delivery.id,
            task_type = %delivery.task_type,
            "{error}"
        );
        report_failure(broker, delivery.id, error.to_string(), false).await;
        return;
    };

    let timeout = Duration::from_millis(handler_timeout_ms);

    match tokio::time::timeout(timeout, handler.handle(&delivery.payload)).await {
        Ok(Ok(())) => {
            tracing::info!(
                delivery = delivery.id,
                task_type = %delivery.task_type,
                retry_count = delivery.retry_count,
                "task processed"
            );
            if let Err(e) = broker.ack(delivery.id).await {
                tracing::error!(delivery = delivery.id, "failed to ack delivery: {e}");
            }
        }
        Ok(Err(error)) => {
            tracing::warn!(
                delivery = delivery.id,
                task_type = %delivery.task_type,
                "handler failed: {error}"
            );
            report_failure(broker, delivery.id, error.to_string(), error.is_retryable()).await;
        }
        Err(_) => {
            let error = Error::DeadlineExceeded {
                task_type: delivery.task_type.clone(),
                timeout_ms: handler_timeout_ms,
            };
            tracing::warn!(delivery = delivery.id, "{error}");
            report_failure(broker, delivery.id, error.to_string(), true).await;
        }
    }
}

async fn report_failure(broker: &dyn Broker, id: i64, reason: String, retryable: bool) {
    if let Err(e) = broker.fail(id, reason, retryable).await {
        tracing::error!(delivery = id, "failed to report delivery failure: {e}");
    }
}
