//! In-memory [`ItemStore`] implementation for tests.
//!
//! Uses a `BTreeMap` behind `std::sync::Mutex`; every trait method takes
//! the lock once, which gives the same per-call atomicity as a single SQL
//! statement.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Item, ItemStatus, ItemUpdate, Listing, NotificationRecord, UpsertOutcome};

use super::ItemStore;

#[derive(Default)]
struct Tables {
    next_id: i64,
    items: BTreeMap<i64, Item>,
    by_external_id: HashMap<String, i64>,
    notifications: HashMap<String, NotificationRecord>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    /// All notification records, in no particular order.
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.lock()
            .map(|t| t.notifications.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn upsert_by_external_id(
        &self,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tables = self.lock()?;
        if let Some(id) = tables.by_external_id.get(&listing.external_id).copied() {
            let item = tables.items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            item.title = listing.title.clone();
            item.url = listing.url.clone();
            item.updated_at = now;
            return Ok(UpsertOutcome::Refreshed);
        }

        tables.next_id += 1;
        let id = tables.next_id;
        let mut item = Item::discovered(listing, now).enqueue();
        item.id = id;
        tables.by_external_id.insert(item.external_id.clone(), id);
        tables.items.insert(id, item);
        Ok(UpsertOutcome::Inserted)
    }

    async fn get_next_due(&self, now: DateTime<Utc>) -> Result<Option<Item>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Pending && item.next_attempt_at <= now)
            .min_by_key(|item| (item.next_attempt_at, item.id))
            .cloned())
    }

    async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        match tables.items.get_mut(&id) {
            Some(item) if item.status == ItemStatus::Pending => {
                item.status = ItemStatus::Fetching;
                item.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update_status(
        &self,
        id: i64,
        update: &ItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let item = tables.items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        item.status = update.status;
        if let Some(retry_count) = update.retry_count {
            item.retry_count = retry_count;
        }
        if let Some(at) = update.next_attempt_at {
            item.next_attempt_at = at;
        }
        if let Some(error) = &update.last_error {
            item.last_error = error.clone();
        }
        item.updated_at = now;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Item>, StoreError> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Item>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .by_external_id
            .get(external_id)
            .and_then(|id| tables.items.get(id))
            .cloned())
    }

    async fn record_notification(
        &self,
        external_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        if tables.notifications.contains_key(external_id) {
            return Ok(false);
        }
        tables.notifications.insert(
            external_id.to_string(),
            NotificationRecord {
                external_id: external_id.to_string(),
                sent_at,
            },
        );
        Ok(true)
    }

    async fn has_notification(&self, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.notifications.contains_key(external_id))
    }

    async fn mark_notified(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let item = tables.items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if item.status == ItemStatus::Matched {
            item.notified = true;
        }
        Ok(())
    }

    async fn count_due(&self, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Pending && item.next_attempt_at <= now)
            .count() as i64)
    }

    async fn count_by_status(&self) -> Result<Vec<(ItemStatus, i64)>, StoreError> {
        let tables = self.lock()?;
        Ok(ItemStatus::ALL
            .iter()
            .map(|status| {
                let n = tables.items.values().filter(|i| i.status == *status).count() as i64;
                (*status, n)
            })
            .filter(|(_, n)| *n > 0)
            .collect())
    }

    async fn count_notifications(&self) -> Result<i64, StoreError> {
        Ok(self.lock()?.notifications.len() as i64)
    }

    async fn count_seen_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .items
            .values()
            .filter(|item| item.first_seen_at >= since)
            .count() as i64)
    }

    async fn count_notifications_since(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .notifications
            .values()
            .filter(|record| record.sent_at >= since)
            .count() as i64)
    }

    async fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        let mut n = 0;
        for item in tables.items.values_mut() {
            if item.status == ItemStatus::Fetching {
                item.status = ItemStatus::Pending;
                item.updated_at = now;
                n += 1;
            }
        }
        Ok(n)
    }
}
