//! Periodic activity summary sent through the notification sink.
//!
//! Enabled with `notify.report_interval_days`; the same value is the
//! reporting window. `cwatch report` sends one on demand.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use catalog_watch_core::error::StoreError;
use catalog_watch_core::store::ItemStore;

use crate::notify::{Message, NotificationSink};

/// Counts for one reporting window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityReport {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Items first seen in the window.
    pub discovered: i64,
    /// Notification records written in the window.
    pub notified: i64,
    /// Items due for a detail fetch at `until`.
    pub due: i64,
}

pub async fn build_report(
    store: &dyn ItemStore,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<ActivityReport, StoreError> {
    let since = now - window;
    Ok(ActivityReport {
        since,
        until: now,
        discovered: store.count_seen_since(since).await?,
        notified: store.count_notifications_since(since).await?,
        due: store.count_due(now).await?,
    })
}

pub fn format_report(source_label: &str, report: &ActivityReport) -> Message {
    let title = format!("Activity report for {}", source_label);
    let text = [
        title.clone(),
        format!(
            "Period: {} to {}",
            report.since.format("%d.%m.%Y"),
            report.until.format("%d.%m.%Y")
        ),
        String::new(),
        format!("New items: {}", report.discovered),
        format!("Notifications sent: {}", report.notified),
        format!("Waiting for detail fetch: {}", report.due),
    ]
    .join("\n");

    Message {
        title,
        link: String::new(),
        external_id: String::new(),
        text,
    }
}

pub struct ReportSender {
    store: Arc<dyn ItemStore>,
    sink: Arc<dyn NotificationSink>,
    recipient: String,
    source_label: String,
    window: Duration,
}

impl ReportSender {
    pub fn new(
        store: Arc<dyn ItemStore>,
        sink: Arc<dyn NotificationSink>,
        recipient: impl Into<String>,
        source_label: impl Into<String>,
        window_days: u32,
    ) -> Self {
        Self {
            store,
            sink,
            recipient: recipient.into(),
            source_label: source_label.into(),
            window: Duration::days(i64::from(window_days.max(1))),
        }
    }

    /// Build and send the report for the window ending at `now`. A sink
    /// failure is logged; only store errors are returned.
    pub async fn send(&self, now: DateTime<Utc>) -> Result<ActivityReport, StoreError> {
        let report = build_report(self.store.as_ref(), now, self.window).await?;
        let message = format_report(&self.source_label, &report);
        match self.sink.send(&self.recipient, &message).await {
            Ok(()) => tracing::info!(
                discovered = report.discovered,
                notified = report.notified,
                due = report.due,
                "activity report sent"
            ),
            Err(e) => tracing::warn!(error = %e, "activity report dispatch failed"),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_watch_core::models::Listing;
    use catalog_watch_core::store::memory::InMemoryStore;
    use std::sync::Mutex;

    use crate::notify::NotifyError;

    #[derive(Default)]
    struct CollectingSink {
        sent: Mutex<Vec<(String, Message)>>,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        fn name(&self) -> &str {
            "collecting"
        }

        async fn send(&self, recipient: &str, message: &Message) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.clone()));
            Ok(())
        }
    }

    fn listing(id: &str) -> Listing {
        Listing {
            external_id: id.into(),
            title: None,
            url: format!("https://catalog.test/view/{}", id),
        }
    }

    #[tokio::test]
    async fn report_counts_only_the_window() {
        let store = Arc::new(InMemoryStore::new());
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let old = now - Duration::days(10);
        store.upsert_by_external_id(&listing("old"), old).await.unwrap();
        store.record_notification("old", old).await.unwrap();
        store
            .upsert_by_external_id(&listing("a"), now - Duration::days(2))
            .await
            .unwrap();
        store
            .upsert_by_external_id(&listing("b"), now - Duration::hours(1))
            .await
            .unwrap();
        store
            .record_notification("a", now - Duration::days(1))
            .await
            .unwrap();

        let sink = Arc::new(CollectingSink::default());
        let sender = ReportSender::new(store.clone(), sink.clone(), "chat-1", "catalog.test", 7);
        let report = sender.send(now).await.unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.notified, 1);
        // All three items are still pending and due.
        assert_eq!(report.due, 3);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat-1");
        assert_eq!(
            sent[0].1.text,
            "Activity report for catalog.test\nPeriod: 07.11.2023 to 14.11.2023\n\n\
             New items: 2\nNotifications sent: 1\nWaiting for detail fetch: 3"
        );
    }
}
