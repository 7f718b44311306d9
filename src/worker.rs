//! Detail worker: one due item per tick.
//!
//! A tick picks the oldest-due `Pending` item, claims it (`Fetching`),
//! fetches its detail page, extracts the text and evaluates it against a
//! fresh criteria snapshot:
//!
//! | Outcome | New status | Retry bookkeeping |
//! |---------|------------|-------------------|
//! | match | `Matched`, then the dedup gate | unchanged, error cleared |
//! | no match | `Unmatched` | unchanged, error cleared |
//! | extraction error | `Unmatched` | unchanged, error recorded |
//! | fetch or backend error | `Pending` or `Exhausted` | `retry_count + 1`, backoff |
//!
//! A [`StoreError`] aborts the tick. The claimed item is put back to
//! `Pending`, due at once, so the next tick retries it; if even that write
//! fails, `requeue_in_flight` recovers it on the next start.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use catalog_watch_core::backoff::{BackoffPolicy, RetryDecision};
use catalog_watch_core::embedding::SemanticBackend;
use catalog_watch_core::error::{MatchBackendError, StoreError};
use catalog_watch_core::matcher::{Matcher, Verdict};
use catalog_watch_core::models::{Item, ItemStatus, ItemUpdate};
use catalog_watch_core::store::ItemStore;

use crate::criteria::CriteriaSource;
use crate::extract::ContentExtractor;
use crate::fetcher::RateLimitedFetcher;
use crate::gate::{DedupGate, GateOutcome};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing was due.
    Idle,
    /// The due item was claimed by someone else first.
    Lost,
    Matched { item_id: i64, notification: GateOutcome },
    Unmatched { item_id: i64 },
    Retrying {
        item_id: i64,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Exhausted { item_id: i64, retry_count: u32 },
}

pub struct DetailWorker {
    store: Arc<dyn ItemStore>,
    fetcher: Arc<RateLimitedFetcher>,
    extractor: ContentExtractor,
    matcher: Matcher,
    criteria: Arc<dyn CriteriaSource>,
    backend: Option<Arc<dyn SemanticBackend>>,
    gate: DedupGate,
    policy: BackoffPolicy,
}

impl DetailWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ItemStore>,
        fetcher: Arc<RateLimitedFetcher>,
        extractor: ContentExtractor,
        matcher: Matcher,
        criteria: Arc<dyn CriteriaSource>,
        backend: Option<Arc<dyn SemanticBackend>>,
        gate: DedupGate,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractor,
            matcher,
            criteria,
            backend,
            gate,
            policy,
        }
    }

    /// Process at most one due item.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, StoreError> {
        let Some(item) = self.store.get_next_due(now).await? else {
            tracing::debug!(pulled = 0, remaining = 0, "detail tick");
            return Ok(TickOutcome::Idle);
        };

        if !self.store.claim(item.id, now).await? {
            tracing::debug!(item_id = item.id, "item already claimed");
            return Ok(TickOutcome::Lost);
        }

        let outcome = match self.process(&item, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release(&item, &e, now).await;
                return Err(e);
            }
        };
        let remaining = self.store.count_due(now).await?;
        tracing::info!(
            pulled = 1,
            remaining,
            external_id = %item.external_id,
            outcome = ?outcome,
            "detail tick"
        );
        Ok(outcome)
    }

    /// Hand a claimed item back to the queue after a store failure, due
    /// immediately with its retry count unchanged. A `Matched` write that
    /// was not followed by a notification record is undone the same way.
    async fn release(&self, item: &Item, error: &StoreError, now: DateTime<Utc>) {
        let update = ItemUpdate::status(ItemStatus::Pending)
            .with_next_attempt(now)
            .with_error(format!("store error: {}", error));
        match self.store.update_status(item.id, &update, now).await {
            Ok(()) => tracing::warn!(
                external_id = %item.external_id,
                error = %error,
                "tick aborted, item returned to the queue"
            ),
            Err(e) => tracing::error!(
                external_id = %item.external_id,
                error = %e,
                "could not return item to the queue"
            ),
        }
    }

    async fn process(&self, item: &Item, now: DateTime<Utc>) -> Result<TickOutcome, StoreError> {
        let body = match self.fetcher.fetch(&item.url).await {
            Ok(response) => response.body,
            Err(e) => return self.fail(item, &e.to_string(), now).await,
        };

        let text = match self.extractor.extract(&body) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(external_id = %item.external_id, error = %e, "extraction failed");
                self.store
                    .update_status(
                        item.id,
                        &ItemUpdate::status(ItemStatus::Unmatched).with_error(e.to_string()),
                        now,
                    )
                    .await?;
                return Ok(TickOutcome::Unmatched { item_id: item.id });
            }
        };

        let verdict = match self.evaluate(&text, item.title.as_deref()).await {
            Ok(verdict) => verdict,
            Err(e) => return self.fail(item, &e.to_string(), now).await,
        };

        if !verdict.is_match() {
            self.store
                .update_status(item.id, &ItemUpdate::status(ItemStatus::Unmatched).clear_error(), now)
                .await?;
            return Ok(TickOutcome::Unmatched { item_id: item.id });
        }

        self.store
            .update_status(item.id, &ItemUpdate::status(ItemStatus::Matched).clear_error(), now)
            .await?;
        let matched = Item {
            status: ItemStatus::Matched,
            last_error: None,
            ..item.clone()
        };
        let notification = self.gate.try_notify(&matched, &verdict).await?;
        Ok(TickOutcome::Matched {
            item_id: item.id,
            notification,
        })
    }

    async fn evaluate(&self, text: &str, title: Option<&str>) -> Result<Verdict, MatchBackendError> {
        let criteria = self.criteria.current().await?;
        self.matcher
            .evaluate(text, title, &criteria, self.backend.as_deref())
            .await
    }

    async fn fail(
        &self,
        item: &Item,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, StoreError> {
        match self.policy.on_failure(item.retry_count, now) {
            RetryDecision::Retry {
                retry_count,
                delay,
                next_attempt_at,
            } => {
                self.store
                    .update_status(
                        item.id,
                        &ItemUpdate::status(ItemStatus::Pending)
                            .with_retry(retry_count)
                            .with_next_attempt(next_attempt_at)
                            .with_error(error),
                        now,
                    )
                    .await?;
                tracing::info!(
                    external_id = %item.external_id,
                    retry_count,
                    delay_secs = delay.num_seconds(),
                    error,
                    "detail fetch failed, scheduled retry"
                );
                Ok(TickOutcome::Retrying {
                    item_id: item.id,
                    retry_count,
                    next_attempt_at,
                })
            }
            RetryDecision::Exhausted { retry_count } => {
                self.store
                    .update_status(
                        item.id,
                        &ItemUpdate::status(ItemStatus::Exhausted)
                            .with_retry(retry_count)
                            .with_error(error),
                        now,
                    )
                    .await?;
                tracing::warn!(
                    external_id = %item.external_id,
                    retries = retry_count - 1,
                    error,
                    "detail retries exhausted"
                );
                Ok(TickOutcome::Exhausted {
                    item_id: item.id,
                    retry_count,
                })
            }
        }
    }
}
