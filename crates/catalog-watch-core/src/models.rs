//! Core data models used throughout Catalog Watch.
//!
//! These types represent the catalog entries, tracked items, and
//! notification records that flow through the discovery pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry parsed from a listing page, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub external_id: String,
    pub title: Option<String>,
    pub url: String,
}

/// Lifecycle state of a tracked item.
///
/// ```text
/// Discovered ─▶ Pending ─▶ Fetching ─┬─▶ Matched
///                  ▲                 ├─▶ Unmatched
///                  └─── (failure) ───┼─▶ Exhausted
///                                    ┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Discovered,
    Pending,
    Fetching,
    Matched,
    Unmatched,
    Exhausted,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        ItemStatus::Discovered,
        ItemStatus::Pending,
        ItemStatus::Fetching,
        ItemStatus::Matched,
        ItemStatus::Unmatched,
        ItemStatus::Exhausted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Discovered => "discovered",
            ItemStatus::Pending => "pending",
            ItemStatus::Fetching => "fetching",
            ItemStatus::Matched => "matched",
            ItemStatus::Unmatched => "unmatched",
            ItemStatus::Exhausted => "exhausted",
        }
    }

    /// Terminal states never go back to the detail queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Matched | ItemStatus::Unmatched | ItemStatus::Exhausted
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown item status: '{}'", s))
    }
}

/// A catalog item tracked through discovery, fetch, match, and notify.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub url: String,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub notified: bool,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Build a freshly sighted item. The store assigns `id` on insert.
    pub fn discovered(listing: &Listing, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            external_id: listing.external_id.clone(),
            title: listing.title.clone(),
            url: listing.url.clone(),
            status: ItemStatus::Discovered,
            retry_count: 0,
            next_attempt_at: now,
            last_error: None,
            notified: false,
            first_seen_at: now,
            updated_at: now,
        }
    }

    /// Hand a discovered item to the detail queue, due immediately.
    pub fn enqueue(mut self) -> Self {
        if self.status == ItemStatus::Discovered {
            self.status = ItemStatus::Pending;
        }
        self
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }
}

/// Outcome of [`ItemStore::upsert_by_external_id`](crate::store::ItemStore::upsert_by_external_id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting; the item was inserted and queued.
    Inserted,
    /// Already known; only display fields were refreshed.
    Refreshed,
}

/// Field changes applied by [`ItemStore::update_status`](crate::store::ItemStore::update_status).
///
/// `None` leaves the stored value unchanged. `last_error: Some(None)`
/// clears the stored error.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    pub status: ItemStatus,
    pub retry_count: Option<u32>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
}

impl ItemUpdate {
    pub fn status(status: ItemStatus) -> Self {
        Self {
            status,
            retry_count: None,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn with_retry(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_next_attempt(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }
}

/// Durable proof that an item's notification was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub external_id: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("queued".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn discovered_item_enqueues_as_pending() {
        let now = Utc::now();
        let listing = Listing {
            external_id: "2024-118".into(),
            title: Some("Laptops".into()),
            url: "https://catalog.test/view/2024-118".into(),
        };
        let item = Item::discovered(&listing, now);
        assert_eq!(item.status, ItemStatus::Discovered);
        let item = item.enqueue();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.next_attempt_at, now);
        assert_eq!(item.retry_count, 0);
        assert!(!item.notified);
    }

    #[test]
    fn terminal_states() {
        assert!(ItemStatus::Exhausted.is_terminal());
        assert!(ItemStatus::Matched.is_terminal());
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Fetching.is_terminal());
    }
}
