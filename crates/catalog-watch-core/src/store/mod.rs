//! Item store abstraction for Catalog Watch.
//!
//! The [`ItemStore`] trait defines every durable operation the pipeline
//! needs, enabling pluggable backends (SQLite in the app crate, in-memory
//! here for tests).
//!
//! # Atomicity
//!
//! Every method is a single atomic step on one row. The detail worker
//! takes exclusive ownership of an item with [`claim`](ItemStore::claim)
//! (a conditional `Pending → Fetching` transition) and releases it with
//! [`update_status`](ItemStore::update_status); the poller only ever
//! refreshes display fields. That split is what keeps concurrent
//! read-modify-write cycles on the same row from interleaving.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Item, ItemStatus, ItemUpdate, Listing, UpsertOutcome};

/// Abstract storage backend for tracked items and notification records.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_by_external_id`](ItemStore::upsert_by_external_id) | Insert a new item or refresh title/url |
/// | [`get_next_due`](ItemStore::get_next_due) | Oldest-due pending item |
/// | [`claim`](ItemStore::claim) | `Pending → Fetching` if still pending |
/// | [`update_status`](ItemStore::update_status) | Apply a status transition with retry bookkeeping |
/// | [`record_notification`](ItemStore::record_notification) | Insert the dedup record if absent |
/// | [`mark_notified`](ItemStore::mark_notified) | Set `notified` on a matched item |
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an unseen item as `Pending`, due at `now`; for a known
    /// `external_id` only `title` and `url` are refreshed.
    async fn upsert_by_external_id(
        &self,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// The `Pending` item with the smallest `next_attempt_at <= now`
    /// (ties broken by id), if any.
    async fn get_next_due(&self, now: DateTime<Utc>) -> Result<Option<Item>, StoreError>;

    /// Move an item from `Pending` to `Fetching`. Returns `false` if the
    /// item was not pending any more.
    async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Apply `update` to item `id`.
    async fn update_status(
        &self,
        id: i64,
        update: &ItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Item>, StoreError>;

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Item>, StoreError>;

    /// Insert the notification record for `external_id` unless one exists.
    /// Returns `true` if this call created it.
    async fn record_notification(
        &self,
        external_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn has_notification(&self, external_id: &str) -> Result<bool, StoreError>;

    /// Set `notified = true` on a `Matched` item.
    async fn mark_notified(&self, id: i64) -> Result<(), StoreError>;

    /// Number of `Pending` items due at `now`.
    async fn count_due(&self, now: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Item counts per status, statuses with no items omitted.
    async fn count_by_status(&self) -> Result<Vec<(ItemStatus, i64)>, StoreError>;

    async fn count_notifications(&self) -> Result<i64, StoreError>;

    /// Items first seen at or after `since`.
    async fn count_seen_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Notification records written at or after `since`.
    async fn count_notifications_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Return items stranded in `Fetching` (by a crash mid-tick) to
    /// `Pending`. Retry bookkeeping is left as is. Returns the count.
    async fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
