//! Client-local queue of attendance batches saved while offline.

use crate::db::repo::prepare_sqlite_url;
use crate::db::{StoreError, StoreResult};
use crate::model::{FacultyId, PendingAttendanceBatch, SubjectId};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

/// FIFO storage for pending batches. Implementations must keep insertion order.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a batch at the back.
    async fn enqueue(&self, batch: PendingAttendanceBatch) -> StoreResult<()>;
    /// Remove and return every queued batch, oldest first.
    async fn drain(&self) -> StoreResult<Vec<PendingAttendanceBatch>>;
    async fn peek(&self) -> StoreResult<Option<PendingAttendanceBatch>>;
    /// Remove the oldest batch once it has fully replayed.
    async fn pop_front(&self) -> StoreResult<Option<PendingAttendanceBatch>>;
    /// Swap the oldest batch for what is left of it. No-op on an empty queue.
    async fn replace_front(&self, batch: PendingAttendanceBatch) -> StoreResult<()>;
    async fn len(&self) -> StoreResult<usize>;
}

#[derive(Debug, Default)]
pub struct MemoryOutbox {
    inner: Mutex<VecDeque<PendingAttendanceBatch>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryOutbox {
    async fn enqueue(&self, batch: PendingAttendanceBatch) -> StoreResult<()> {
        self.inner.lock().await.push_back(batch);
        Ok(())
    }

    async fn drain(&self) -> StoreResult<Vec<PendingAttendanceBatch>> {
        Ok(self.inner.lock().await.drain(..).collect())
    }

    async fn peek(&self) -> StoreResult<Option<PendingAttendanceBatch>> {
        Ok(self.inner.lock().await.front().cloned())
    }

    async fn pop_front(&self) -> StoreResult<Option<PendingAttendanceBatch>> {
        Ok(self.inner.lock().await.pop_front())
    }

    async fn replace_front(&self, batch: PendingAttendanceBatch) -> StoreResult<()> {
        if let Some(head) = self.inner.lock().await.front_mut() {
            *head = batch;
        }
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.inner.lock().await.len())
    }
}

/// Queue persisted in its own SQLite file so it survives restarts of the client.
#[derive(Debug, Clone)]
pub struct SqliteOutbox {
    pool: SqlitePool,
}

const PENDING_COLUMNS: &str = "id, batch_id, subject_id, faculty_id, attendance_date, data";

impl SqliteOutbox {
    pub async fn open(url: &str) -> StoreResult<Self> {
        let normalized = prepare_sqlite_url(url);
        let options = SqliteConnectOptions::from_str(&normalized)?.create_if_missing(true);
        // One connection keeps `sqlite::memory:` queues on a single database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./queue_migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn batch_from_row(row: &SqliteRow) -> StoreResult<PendingAttendanceBatch> {
    let id: i64 = row.try_get("id")?;
    let date_str: String = row.try_get("attendance_date")?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| StoreError::Corrupt {
        table: "pending_batches",
        id,
        detail: format!("bad date {date_str:?}: {e}"),
    })?;
    let data: String = row.try_get("data")?;
    Ok(PendingAttendanceBatch {
        subject_id: SubjectId(row.try_get("subject_id")?),
        faculty_id: FacultyId(row.try_get("faculty_id")?),
        date,
        data: serde_json::from_str(&data)?,
    })
}

async fn insert_batch(
    conn: &mut sqlx::SqliteConnection,
    seq: i64,
    batch: &PendingAttendanceBatch,
) -> StoreResult<()> {
    let batch_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO pending_batches (seq, batch_id, subject_id, faculty_id, attendance_date, data) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(seq)
    .bind(&batch_id)
    .bind(batch.subject_id.get())
    .bind(batch.faculty_id.get())
    .bind(batch.date.format("%Y-%m-%d").to_string())
    .bind(serde_json::to_string(&batch.data)?)
    .execute(&mut *conn)
    .await?;
    debug!(%batch_id, seq, subject = %batch.subject_id, date = %batch.date, "batch queued");
    Ok(())
}

#[async_trait]
impl QueueStore for SqliteOutbox {
    #[instrument(skip_all)]
    async fn enqueue(&self, batch: PendingAttendanceBatch) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_batches")
            .fetch_one(&mut *tx)
            .await?;
        insert_batch(&mut tx, seq, &batch).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn drain(&self) -> StoreResult<Vec<PendingAttendanceBatch>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_batches ORDER BY seq ASC, id ASC"
        ))
        .fetch_all(&mut *tx)
        .await?;
        let batches = rows.iter().map(batch_from_row).collect::<StoreResult<Vec<_>>>()?;
        sqlx::query("DELETE FROM pending_batches").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(batches)
    }

    async fn peek(&self) -> StoreResult<Option<PendingAttendanceBatch>> {
        let row = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_batches ORDER BY seq ASC, id ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    #[instrument(skip_all)]
    async fn pop_front(&self) -> StoreResult<Option<PendingAttendanceBatch>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_batches ORDER BY seq ASC, id ASC LIMIT 1"
        ))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.try_get("id")?;
        let batch = batch_from_row(&row)?;
        sqlx::query("DELETE FROM pending_batches WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(batch))
    }

    #[instrument(skip_all, fields(marks = batch.data.len()))]
    async fn replace_front(&self, batch: PendingAttendanceBatch) -> StoreResult<()> {
        sqlx::query(
            "UPDATE pending_batches SET subject_id = ?, faculty_id = ?, attendance_date = ?, data = ? \
             WHERE id = (SELECT id FROM pending_batches ORDER BY seq ASC, id ASC LIMIT 1)",
        )
        .bind(batch.subject_id.get())
        .bind(batch.faculty_id.get())
        .bind(batch.date.format("%Y-%m-%d").to_string())
        .bind(serde_json::to_string(&batch.data)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_batches")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
