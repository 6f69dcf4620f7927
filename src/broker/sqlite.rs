//! SQLite-backed broker.
//!
//! Deliveries live in a single `deliveries` table. Claims are a single
//! `UPDATE ... RETURNING` with a subselect, so SQLite's writer serialization
//! is the only locking involved: no two claimants can win the same row, and
//! the distributor and all workers share one connection pool.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    SqlitePool,
};

use crate::{
    config::Config,
    error::Error,
    task::{Delivery, QueueLane, TaskEnvelope},
};

use super::{BackoffPolicy, Broker, BoxFuture, DeliveryId};

pub struct SqliteBroker {
    db: SqlitePool,
    visibility_timeout: Duration,
    backoff: BackoffPolicy,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteBroker {
    pub async fn connect() -> Result<Arc<Self>, Error> {
        Self::connect_with(&Config::default()).await
    }

    pub async fn connect_with(config: &Config) -> Result<Arc<Self>, Error> {
        let opts = if let Some(path) = config.db_path() {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new().in_memory(true)
        }
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .locking_mode(SqliteLockingMode::Normal)
        .optimize_on_close(true, None)
        .auto_vacuum(SqliteAutoVacuum::Full);

        // An in-memory database is per-connection, so the pool must not
        // hand out a second connection that would see an empty schema.
        let pool_opts = if config.db_path().is_some() {
            SqlitePoolOptions::new()
        } else {
            SqlitePoolOptions::new().max_connections(1)
        };

        let pool = pool_opts.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Arc::new(Self {
            db: pool,
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            backoff: BackoffPolicy {
                base: Duration::from_millis(config.backoff_base_ms),
                cap: Duration::from_millis(config.backoff_cap_ms),
                jitter: config.backoff_jitter,
            },
        }))
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// All non-dead deliveries, for inspection in tests and tooling.
    pub async fn list_active(&self) -> Result<Vec<Delivery>, Error> {
        Ok(sqlx::query_as(
            "SELECT * FROM deliveries WHERE state != 'dead' ORDER BY enqueued_at, id",
        )
        .fetch_all(&self.db)
        .await?)
    }

    pub async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>, Error> {
        Ok(sqlx::query_as("SELECT * FROM deliveries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    /// Claims one ready delivery from `lane`. A pending or retrying delivery
    /// whose `visible_at` has passed is ready; so is an in-flight one whose
    /// claim expired without an ack or fail (worker crash).
    async fn claim_one(&self, lane: QueueLane) -> Result<Option<Delivery>, Error> {
        let now = now_ms();
        let claim_expires = now + self.visibility_timeout.as_millis() as i64;

        let claimed: Option<Delivery> = sqlx::query_as(
            r#"
            UPDATE deliveries
            SET state = 'in_flight', visible_at = $1
            WHERE id = (
                SELECT id FROM deliveries
                WHERE queue = $2
                  AND state IN ('pending', 'retrying', 'in_flight')
                  AND visible_at <= $3
                ORDER BY visible_at, id
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(claim_expires)
        .bind(lane)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(claimed)
    }
}

impl Broker for SqliteBroker {
    fn enqueue(&self, envelope: TaskEnvelope) -> BoxFuture<'_, DeliveryId> {
        Box::pin(async move {
            let now = now_ms();
            let visible_at = envelope
                .process_at
                .map(|at| at.timestamp_millis())
                .unwrap_or(now);

            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO deliveries
                    (task_type, payload, queue, max_retries, state, visible_at, enqueued_at)
                VALUES ($1, $2, $3, $4, 'pending', $5, $6)
                RETURNING id
                "#,
            )
            .bind(&envelope.task_type)
            .bind(&envelope.payload)
            .bind(envelope.queue)
            .bind(envelope.max_retries)
            .bind(visible_at)
            .bind(now)
            .fetch_one(&self.db)
            .await?;

            tracing::debug!(
                delivery = id,
                task_type = %envelope.task_type,
                queue = %envelope.queue,
                "enqueued task"
            );

            Ok(id)
        })
    }

    fn dequeue(&self, lanes: Vec<QueueLane>) -> BoxFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            for lane in lanes {
                if let Some(delivery) = self.claim_one(lane).await? {
                    return Ok(Some(delivery));
                }
            }

            Ok(None)
        })
    }

    fn ack(&self, id: DeliveryId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let removed = sqlx::query("DELETE FROM deliveries WHERE id = $1 AND state = 'in_flight'")
                .bind(id)
                .execute(&self.db)
                .await?;

            if removed.rows_affected() == 0 {
                return Err(Error::DeliveryNotFound { id });
            }

            Ok(())
        })
    }

    fn fail(&self, id: DeliveryId, reason: String, retryable: bool) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self.db.begin().await?;

            let delivery: Delivery =
                sqlx::query_as("SELECT * FROM deliveries WHERE id = $1 AND state = 'in_flight'")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(Error::DeliveryNotFound { id })?;

            if !retryable {
                sqlx::query(
                    "UPDATE deliveries SET state = 'dead', last_error = $1 WHERE id = $2",
                )
                .bind(&reason)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                tracing::error!(
                    delivery = id,
                    task_type = %delivery.task_type,
                    reason = %reason,
                    "delivery dead-lettered (permanent failure)"
                );

                return Ok(());
            }

            let retry_count = delivery.retry_count + 1;

            if retry_count > delivery.max_retries {
                sqlx::query(
                    r#"
                    UPDATE deliveries
                    SET state = 'dead', retry_count = $1, last_error = $2
                    WHERE id = $3
                    "#,
                )
                .bind(retry_count)
                .bind(&reason)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                tracing::error!(
                    delivery = id,
                    task_type = %delivery.task_type,
                    retry_count,
                    reason = %reason,
                    "delivery dead-lettered (retry budget exhausted)"
                );

                return Ok(());
            }

            let delay = self.backoff.jittered_delay(retry_count);
            let visible_at = now_ms() + delay.as_millis() as i64;

            sqlx::query(
                r#"
                UPDATE deliveries
                SET state = 'retrying', retry_count = $1, visible_at = $2, last_error = $3
                WHERE id = $4
                "#,
            )
            .bind(retry_count)
            .bind(visible_at)
            .bind(&reason)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            tracing::warn!(
                delivery = id,
                task_type = %delivery.task_type,
                retry_count,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "delivery rescheduled"
            );

            Ok(())
        })
    }

    fn list_dead(&self) -> BoxFuture<'_, Vec<Delivery>> {
        Box::pin(async move {
            Ok(sqlx::query_as(
                "SELECT * FROM deliveries WHERE state = 'dead' ORDER BY enqueued_at, id",
            )
            .fetch_all(&self.db)
            .await?)
        })
    }

    fn requeue_dead(&self, id: DeliveryId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let updated = sqlx::query(
                r#"
                UPDATE deliveries
                SET state = 'pending', retry_count = 0, visible_at = $1, last_error = NULL
                WHERE id = $2 AND state = 'dead'
                "#,
            )
            .bind(now_ms())
            .bind(id)
            .execute(&self.db)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(Error::DeliveryNotFound { id });
            }

            tracing::info!(delivery = id, "dead delivery requeued");

            Ok(())
        })
    }
}
