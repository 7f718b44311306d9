//! Listing poller: discovers items from the first `N` listing pages.
//!
//! A cycle walks pages `1..=N` in order through the shared fetcher and
//! upserts every parsed entry. Unseen ids are inserted as `Pending`, due
//! immediately; known ids only get their title and url refreshed. A page
//! that fails to fetch or parses to nothing is logged and skipped. The
//! poller never sends notifications.

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;

use catalog_watch_core::error::StoreError;
use catalog_watch_core::models::{Listing, UpsertOutcome};
use catalog_watch_core::store::ItemStore;

use crate::config::ListingConfig;
use crate::fetcher::{FetchError, RateLimitedFetcher};
use crate::listing::ListingParser;

/// Totals for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub parsed: usize,
    pub inserted: usize,
    pub refreshed: usize,
}

pub struct ListingPoller {
    store: Arc<dyn ItemStore>,
    fetcher: Arc<RateLimitedFetcher>,
    parser: ListingParser,
    url_template: String,
    date_format: String,
    pages: u32,
    degraded: AtomicBool,
}

impl ListingPoller {
    pub fn new(
        store: Arc<dyn ItemStore>,
        fetcher: Arc<RateLimitedFetcher>,
        config: &ListingConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            fetcher,
            parser: ListingParser::new(config)?,
            url_template: config.url_template.clone(),
            date_format: config.date_format.clone(),
            pages: config.pages,
            degraded: AtomicBool::new(false),
        })
    }

    /// `true` once the startup self-test found no entries.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Listing URL for 1-based `page`.
    pub fn page_url(&self, page: u32, now: DateTime<Utc>) -> Result<Url> {
        let mut raw = self.url_template.replace("{page}", &page.to_string());
        if raw.contains("{date}") {
            let mut date = String::new();
            write!(date, "{}", now.format(&self.date_format))
                .map_err(|_| anyhow!("Invalid listing.date_format: '{}'", self.date_format))?;
            raw = raw.replace("{date}", &date);
        }
        Url::parse(&raw).with_context(|| format!("Invalid listing URL: {}", raw))
    }

    /// Fetch and parse one page without touching the store.
    pub async fn fetch_page(&self, page: u32, now: DateTime<Utc>) -> Result<Vec<Listing>> {
        let url = self.page_url(page, now)?;
        let response = self
            .fetcher
            .fetch(url.as_str())
            .await
            .with_context(|| format!("Failed to fetch listing page {}", page))?;
        Ok(self.parser.parse(&response.body, &url))
    }

    /// Fetch page 1 once. Zero entries or a failure marks the poller
    /// degraded; the error is logged, never returned.
    pub async fn self_test(&self) -> bool {
        let healthy = match self.fetch_page(1, Utc::now()).await {
            Ok(listings) if !listings.is_empty() => {
                tracing::info!(entries = listings.len(), "listing self-test passed");
                true
            }
            Ok(_) => {
                tracing::error!("no listings found during self-test");
                false
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "listing self-test failed");
                false
            }
        };
        self.degraded.store(!healthy, Ordering::Relaxed);
        healthy
    }

    /// Run one discovery cycle over pages `1..=N`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, StoreError> {
        let mut summary = CycleSummary::default();

        for page in 1..=self.pages {
            let listings = match self.fetch_page(page, now).await {
                Ok(listings) => listings,
                Err(e) => {
                    let timed_out = matches!(e.downcast_ref::<FetchError>(), Some(FetchError::Timeout));
                    tracing::warn!(page, timed_out, error = %format!("{:#}", e), "skipping listing page");
                    summary.pages_failed += 1;
                    continue;
                }
            };
            if listings.is_empty() {
                tracing::warn!(page, "listing page yielded no entries");
                summary.pages_failed += 1;
                continue;
            }

            summary.pages_ok += 1;
            summary.parsed += listings.len();
            for listing in &listings {
                match self.store.upsert_by_external_id(listing, now).await? {
                    UpsertOutcome::Inserted => {
                        tracing::debug!(external_id = %listing.external_id, "new item");
                        summary.inserted += 1;
                    }
                    UpsertOutcome::Refreshed => summary.refreshed += 1,
                }
            }
        }

        tracing::info!(
            pages = self.pages,
            pages_ok = summary.pages_ok,
            parsed = summary.parsed,
            inserted = summary.inserted,
            "listing cycle complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_watch_core::store::memory::InMemoryStore;
    use chrono::TimeZone;

    use crate::config::HttpConfig;

    fn poller(template: &str) -> ListingPoller {
        let config: ListingConfig = toml::from_str(&format!(
            r#"
url_template = "{}"
pages = 2

[card]
item = ".card"
link = "a"
"#,
            template
        ))
        .unwrap();
        let fetcher = Arc::new(
            RateLimitedFetcher::new(&HttpConfig {
                timeout_secs: 2,
                ..HttpConfig::default()
            })
            .unwrap(),
        );
        ListingPoller::new(Arc::new(InMemoryStore::new()), fetcher, &config).unwrap()
    }

    #[test]
    fn page_url_fills_placeholders() {
        let poller = poller("https://catalog.test/list?page={page}&from={date}");
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(
            poller.page_url(2, now).unwrap().as_str(),
            "https://catalog.test/list?page=2&from=07.03.2026"
        );
    }

    #[test]
    fn bad_date_format_is_an_error() {
        let mut dated = poller("https://catalog.test/list?page={page}&from={date}");
        dated.date_format = "%Q".into();
        let err = dated.page_url(1, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("date_format"), "{}", err);

        // Not rendered when the template has no date.
        let mut undated = poller("https://catalog.test/list?page={page}");
        undated.date_format = "%Q".into();
        assert_eq!(
            undated.page_url(3, Utc::now()).unwrap().as_str(),
            "https://catalog.test/list?page=3"
        );
    }

    #[tokio::test]
    async fn unreachable_pages_are_skipped() {
        let poller = poller("http://127.0.0.1:9/list?page={page}");
        let summary = poller.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(summary.pages_failed, 2);
        assert_eq!(summary.inserted, 0);

        assert!(!poller.self_test().await);
        assert!(poller.is_degraded());
    }
}
