//! SQLite-backed [`ItemStore`] implementation.
//!
//! Every trait method is a single SQL statement (or an insert followed by
//! an idempotent update), so each call is atomic on its row. Timestamps
//! are stored as unix seconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use catalog_watch_core::error::StoreError;
use catalog_watch_core::models::{Item, ItemStatus, ItemUpdate, Listing, UpsertOutcome};
use catalog_watch_core::store::ItemStore;

const ITEM_COLUMNS: &str = "id, external_id, title, url, status, retry_count, next_attempt_at, \
                            last_error, notified, first_seen_at, updated_at";

/// SQLite implementation of the [`ItemStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn from_ts(ts: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ts)))
}

fn row_to_item(row: &SqliteRow) -> Result<Item, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let status = status.parse::<ItemStatus>().map_err(StoreError::Corrupt)?;
    let retry_count: i64 = row.try_get("retry_count").map_err(backend)?;

    Ok(Item {
        id: row.try_get("id").map_err(backend)?,
        external_id: row.try_get("external_id").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        url: row.try_get("url").map_err(backend)?,
        status,
        retry_count: u32::try_from(retry_count)
            .map_err(|_| StoreError::Corrupt(format!("retry_count {}", retry_count)))?,
        next_attempt_at: from_ts(row.try_get("next_attempt_at").map_err(backend)?)?,
        last_error: row.try_get("last_error").map_err(backend)?,
        notified: row.try_get::<i64, _>("notified").map_err(backend)? != 0,
        first_seen_at: from_ts(row.try_get("first_seen_at").map_err(backend)?)?,
        updated_at: from_ts(row.try_get("updated_at").map_err(backend)?)?,
    })
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn upsert_by_external_id(
        &self,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let item = Item::discovered(listing, now).enqueue();
        let inserted = sqlx::query(
            r#"
            INSERT INTO items (external_id, title, url, status, retry_count,
                               next_attempt_at, notified, first_seen_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, 0, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.url)
        .bind(item.status.as_str())
        .bind(item.next_attempt_at.timestamp())
        .bind(item.first_seen_at.timestamp())
        .bind(item.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        if inserted == 1 {
            return Ok(UpsertOutcome::Inserted);
        }

        sqlx::query("UPDATE items SET title = ?, url = ?, updated_at = ? WHERE external_id = ?")
            .bind(&listing.title)
            .bind(&listing.url)
            .bind(now.timestamp())
            .bind(&listing.external_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(UpsertOutcome::Refreshed)
    }

    async fn get_next_due(&self, now: DateTime<Utc>) -> Result<Option<Item>, StoreError> {
        let sql = format!(
            "SELECT {} FROM items WHERE status = 'pending' AND next_attempt_at <= ? \
             ORDER BY next_attempt_at ASC, id ASC LIMIT 1",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(now.timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            "UPDATE items SET status = 'fetching', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn update_status(
        &self,
        id: i64,
        update: &ItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let (set_error, error) = match &update.last_error {
            Some(error) => (1i64, error.clone()),
            None => (0i64, None),
        };
        let affected = sqlx::query(
            r#"
            UPDATE items SET
                status = ?,
                retry_count = COALESCE(?, retry_count),
                next_attempt_at = COALESCE(?, next_attempt_at),
                last_error = CASE WHEN ? = 1 THEN ? ELSE last_error END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.retry_count.map(i64::from))
        .bind(update.next_attempt_at.map(|at| at.timestamp()))
        .bind(set_error)
        .bind(error)
        .bind(now.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Item>, StoreError> {
        let sql = format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Item>, StoreError> {
        let sql = format!("SELECT {} FROM items WHERE external_id = ?", ITEM_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn record_notification(
        &self,
        external_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            "INSERT INTO notifications (external_id, sent_at) VALUES (?, ?) \
             ON CONFLICT(external_id) DO NOTHING",
        )
        .bind(external_id)
        .bind(sent_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn has_notification(&self, external_id: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM notifications WHERE external_id = ?")
                .bind(external_id)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(exists)
    }

    async fn mark_notified(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE items SET notified = 1 WHERE id = ? AND status = 'matched'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn count_due(&self, now: DateTime<Utc>) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE status = 'pending' AND next_attempt_at <= ?",
        )
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn count_by_status(&self) -> Result<Vec<(ItemStatus, i64)>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM items GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let status = status.parse::<ItemStatus>().map_err(StoreError::Corrupt)?;
            counts.push((status, row.try_get::<i64, _>("n").map_err(backend)?));
        }
        counts.sort_by_key(|(status, _)| ItemStatus::ALL.iter().position(|s| s == status));
        Ok(counts)
    }

    async fn count_notifications(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn count_seen_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE first_seen_at >= ?")
            .bind(since.timestamp())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn count_notifications_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE sent_at >= ?")
            .bind(since.timestamp())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let affected =
            sqlx::query("UPDATE items SET status = 'pending', updated_at = ? WHERE status = 'fetching'")
                .bind(now.timestamp())
                .execute(&self.pool)
                .await
                .map_err(backend)?
                .rows_affected();
        Ok(affected)
    }
}
