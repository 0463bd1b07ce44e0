use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use super::{lease_id, split_lease_id, StagedTask, StagingBackend, StagingMetrics};
use crate::{QueueError, Result};

/// Attempts at leasing before reporting an empty queue when other drainers keep winning
const LEASE_ATTEMPTS: usize = 3;

/// SQLite-backed staging queue for embedded and development setups.
///
/// Visibility is tracked as a millisecond timestamp; leasing pushes it into the future and
/// stamps a fresh receipt so a stale lease holder can no longer delete the entry.
pub struct SqliteStagingBackend {
    pool: Pool<Sqlite>,
    queue_name: String,
}

impl SqliteStagingBackend {
    pub fn new(pool: Pool<Sqlite>, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staging_queues (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staged_tasks (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                receipt TEXT,
                visible_at INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for efficient leasing
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_staged_visible
            ON staged_tasks (queue_name, visible_at, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StagingBackend for SqliteStagingBackend {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn create_queue(&self) -> Result<()> {
        self.create_schema()
            .await
            .map_err(|e| QueueError::Provisioning(e.to_string()))?;

        let inserted = sqlx::query(
            "INSERT INTO staging_queues (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(&self.queue_name)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Provisioning(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            return Err(QueueError::QueueExists(self.queue_name.clone()));
        }

        info!(queue = %self.queue_name, "SQLite staging queue initialized");
        Ok(())
    }

    async fn send(&self, payload: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO staged_tasks (id, queue_name, visible_at, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&self.queue_name)
        .bind(now)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn receive(&self, lease: Duration) -> Result<Option<StagedTask>> {
        for _ in 0..LEASE_ATTEMPTS {
            let now = Utc::now().timestamp_millis();
            let visible_again_at = now + lease.as_millis() as i64;

            let row = sqlx::query(
                r#"
                SELECT id, payload, receive_count
                FROM staged_tasks
                WHERE queue_name = ? AND visible_at <= ?
                ORDER BY created_at, rowid
                LIMIT 1
                "#,
            )
            .bind(&self.queue_name)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let id: String = row.get("id");
            let payload: String = row.get("payload");
            let receive_count: i64 = row.get("receive_count");
            let receipt = uuid::Uuid::new_v4().to_string();

            let updated = sqlx::query(
                r#"
                UPDATE staged_tasks
                SET receipt = ?, visible_at = ?, receive_count = receive_count + 1
                WHERE id = ? AND queue_name = ? AND visible_at <= ?
                "#,
            )
            .bind(&receipt)
            .bind(visible_again_at)
            .bind(&id)
            .bind(&self.queue_name)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 0 {
                // Another drainer leased it between the select and the update
                continue;
            }

            debug!(queue = %self.queue_name, message_id = %id, "Leased staged task");
            return Ok(Some(StagedTask {
                lease_id: lease_id(&id, &receipt),
                message_id: id,
                payload,
                receive_count: (receive_count + 1) as u32,
            }));
        }

        Ok(None)
    }

    async fn delete(&self, lease_id: &str) -> Result<bool> {
        let Some((id, receipt)) = split_lease_id(lease_id) else {
            return Ok(false);
        };

        let result = sqlx::query(
            "DELETE FROM staged_tasks WHERE id = ? AND receipt = ? AND queue_name = ?",
        )
        .bind(id)
        .bind(receipt)
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn metrics(&self) -> Result<StagingMetrics> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN visible_at <= ? THEN 1 ELSE 0 END), 0) AS visible,
                COALESCE(SUM(CASE WHEN visible_at > ? THEN 1 ELSE 0 END), 0) AS leased
            FROM staged_tasks
            WHERE queue_name = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await?;

        let visible: i64 = row.get("visible");
        let leased: i64 = row.get("leased");
        Ok(StagingMetrics {
            visible: visible as u64,
            leased: leased as u64,
        })
    }
}
