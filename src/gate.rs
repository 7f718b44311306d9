//! Notification dedup gate.
//!
//! The notification record is the only source of truth for "already
//! notified". It is written *before* dispatch with an insert-if-absent, so
//! two racing callers cannot both send, and a crash between the write and
//! the send loses at most one message rather than duplicating it.

use std::sync::Arc;

use chrono::Utc;

use catalog_watch_core::error::StoreError;
use catalog_watch_core::matcher::Verdict;
use catalog_watch_core::models::Item;
use catalog_watch_core::store::ItemStore;

use crate::notify::{format_message, NotificationSink};

/// What [`DedupGate::try_notify`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Record written and message handed to the sink.
    Sent,
    /// Record written but the sink failed; the item still counts as notified.
    DispatchFailed,
    /// A record already existed; nothing was sent.
    Duplicate,
}

pub struct DedupGate {
    store: Arc<dyn ItemStore>,
    sink: Arc<dyn NotificationSink>,
    recipient: String,
    source_label: String,
}

impl DedupGate {
    pub fn new(
        store: Arc<dyn ItemStore>,
        sink: Arc<dyn NotificationSink>,
        recipient: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sink,
            recipient: recipient.into(),
            source_label: source_label.into(),
        }
    }

    /// Notify about a matched item at most once per `external_id`.
    pub async fn try_notify(&self, item: &Item, verdict: &Verdict) -> Result<GateOutcome, StoreError> {
        let created = self
            .store
            .record_notification(&item.external_id, Utc::now())
            .await?;
        if !created {
            // The record may come from an earlier attempt that failed
            // before the flag was written.
            tracing::debug!(external_id = %item.external_id, "already notified, skipping");
            self.store.mark_notified(item.id).await?;
            return Ok(GateOutcome::Duplicate);
        }

        let message = format_message(&self.source_label, item, verdict);
        let outcome = match self.sink.send(&self.recipient, &message).await {
            Ok(()) => {
                tracing::info!(
                    external_id = %item.external_id,
                    sink = self.sink.name(),
                    "notification sent"
                );
                GateOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(
                    external_id = %item.external_id,
                    sink = self.sink.name(),
                    error = %e,
                    "notification dispatch failed, not retrying"
                );
                GateOutcome::DispatchFailed
            }
        };

        self.store.mark_notified(item.id).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_watch_core::matcher::{MatchField, MatchHit};
    use catalog_watch_core::models::{ItemStatus, ItemUpdate, Listing};
    use catalog_watch_core::store::memory::InMemoryStore;
    use std::sync::Mutex;

    use crate::notify::{Message, NotifyError};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Message>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, _recipient: &str, message: &Message) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail {
                return Err(NotifyError::Request("down".into()));
            }
            Ok(())
        }
    }

    async fn matched_item(store: &InMemoryStore) -> Item {
        let now = Utc::now();
        store
            .upsert_by_external_id(
                &Listing {
                    external_id: "x-1".into(),
                    title: Some("Servers".into()),
                    url: "https://catalog.test/x-1".into(),
                },
                now,
            )
            .await
            .unwrap();
        let item = store.get_by_external_id("x-1").await.unwrap().unwrap();
        store
            .update_status(item.id, &ItemUpdate::status(ItemStatus::Matched), now)
            .await
            .unwrap();
        store.get(item.id).await.unwrap().unwrap()
    }

    fn verdict() -> Verdict {
        Verdict {
            hits: vec![MatchHit::Keyword {
                keyword: "server".into(),
                field: MatchField::Title,
            }],
        }
    }

    #[tokio::test]
    async fn second_call_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let gate = DedupGate::new(store.clone(), sink.clone(), "chat", "catalog");
        let item = matched_item(&store).await;

        assert_eq!(gate.try_notify(&item, &verdict()).await.unwrap(), GateOutcome::Sent);
        assert_eq!(gate.try_notify(&item, &verdict()).await.unwrap(), GateOutcome::Duplicate);

        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(store.notifications().len(), 1);
        assert!(store.get(item.id).await.unwrap().unwrap().notified);
    }

    #[tokio::test]
    async fn failed_dispatch_still_marks_notified() {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let gate = DedupGate::new(store.clone(), sink.clone(), "chat", "catalog");
        let item = matched_item(&store).await;

        assert_eq!(
            gate.try_notify(&item, &verdict()).await.unwrap(),
            GateOutcome::DispatchFailed
        );
        assert!(store.has_notification("x-1").await.unwrap());
        assert!(store.get(item.id).await.unwrap().unwrap().notified);
        assert_eq!(
            gate.try_notify(&item, &verdict()).await.unwrap(),
            GateOutcome::Duplicate
        );
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }
}
