//! Wiring of the discovery pipeline from configuration.
//!
//! [`Pipeline::build`] assembles the shared fetcher, the poller, and the
//! detail worker around any [`ItemStore`]; [`Pipeline::connect`] does the
//! same on top of the configured SQLite database. The `run_*` functions
//! back the `cwatch run`, `cwatch poll`, `cwatch tick` and `cwatch report`
//! commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use catalog_watch_core::embedding::SemanticBackend;
use catalog_watch_core::matcher::Matcher;
use catalog_watch_core::store::ItemStore;

use crate::config::{Config, SemanticConfig};
use crate::criteria::{CriteriaSource, FileCriteriaSource};
use crate::db;
use crate::extract::ContentExtractor;
use crate::fetcher::RateLimitedFetcher;
use crate::gate::DedupGate;
use crate::migrate;
use crate::notify::{self, NotificationSink};
use crate::poller::ListingPoller;
use crate::report::{format_report, ReportSender};
use crate::scheduler::Scheduler;
use crate::semantic;
use crate::sqlite_store::SqliteStore;
use crate::worker::{DetailWorker, TickOutcome};

pub struct Pipeline {
    pub store: Arc<dyn ItemStore>,
    pub fetcher: Arc<RateLimitedFetcher>,
    pub poller: Arc<ListingPoller>,
    pub worker: Arc<DetailWorker>,
    /// Present when `notify.report_interval_days` is non-zero.
    pub report: Option<Arc<ReportSender>>,
    report_interval: Duration,
    listing_interval: Duration,
    detail_interval: Duration,
}

/// Matcher settings derived from `[semantic]`.
pub fn matcher_for(config: &SemanticConfig) -> Matcher {
    Matcher {
        entailment_threshold: config.entailment.then_some(config.entailment_threshold),
        max_chars: Some(config.max_chars),
    }
}

impl Pipeline {
    /// Open (and migrate) the configured database, then build the pipeline.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn ItemStore> = Arc::new(SqliteStore::new(pool));

        let criteria: Arc<dyn CriteriaSource> =
            Arc::new(FileCriteriaSource::new(&config.criteria.path));
        let sink = notify::create_sink(&config.notify)?;
        let backend = semantic::create_backend(&config.semantic)?;

        Self::build(config, store, criteria, sink, backend)
    }

    /// Build the pipeline around explicit collaborators.
    pub fn build(
        config: &Config,
        store: Arc<dyn ItemStore>,
        criteria: Arc<dyn CriteriaSource>,
        sink: Arc<dyn NotificationSink>,
        backend: Option<Arc<dyn SemanticBackend>>,
    ) -> Result<Self> {
        let fetcher = Arc::new(RateLimitedFetcher::new(&config.http)?);
        let poller = Arc::new(ListingPoller::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            &config.listing,
        )?);

        let extractor =
            ContentExtractor::new(&config.detail).context("Invalid [detail] selectors")?;
        let report_days = config.notify.report_interval_days;
        let report = (report_days > 0).then(|| {
            Arc::new(ReportSender::new(
                Arc::clone(&store),
                Arc::clone(&sink),
                notify::recipient(&config.notify),
                config.notify.source_label.clone(),
                report_days,
            ))
        });
        let gate = DedupGate::new(
            Arc::clone(&store),
            sink,
            notify::recipient(&config.notify),
            config.notify.source_label.clone(),
        );
        let worker = Arc::new(DetailWorker::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            extractor,
            matcher_for(&config.semantic),
            criteria,
            backend,
            gate,
            config.detail.backoff_policy(),
        ));

        Ok(Self {
            store,
            fetcher,
            poller,
            worker,
            report,
            report_interval: Duration::from_secs(u64::from(report_days) * 24 * 3600),
            listing_interval: Duration::from_secs(config.listing.interval_secs),
            detail_interval: Duration::from_secs(config.detail.interval_secs),
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        let scheduler = Scheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.poller),
            Arc::clone(&self.worker),
            self.listing_interval,
            self.detail_interval,
        );
        match &self.report {
            Some(sender) => scheduler.with_report(Arc::clone(sender), self.report_interval),
            None => scheduler,
        }
    }
}

/// `cwatch run`: poll and process until interrupted.
pub async fn run_watch(config: &Config) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    tracing::info!(
        listing = %config.listing.url_template,
        pages = config.listing.pages,
        concurrency = pipeline.fetcher.concurrency(),
        semantic = %config.semantic.provider,
        sink = %config.notify.sink,
        "starting catalog watch"
    );
    pipeline.scheduler().run().await
}

/// `cwatch poll`: one listing cycle.
pub async fn run_poll(config: &Config) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let summary = pipeline.poller.run_cycle(Utc::now()).await?;
    println!(
        "Polled {} page(s): {} ok, {} failed; {} entries, {} new, {} refreshed.",
        config.listing.pages,
        summary.pages_ok,
        summary.pages_failed,
        summary.parsed,
        summary.inserted,
        summary.refreshed
    );
    Ok(())
}

/// `cwatch tick`: process at most one due item.
pub async fn run_tick(config: &Config) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let outcome = pipeline.worker.tick(Utc::now()).await?;
    let line = match outcome {
        TickOutcome::Idle => "No items due.".to_string(),
        TickOutcome::Lost => "Due item was claimed elsewhere.".to_string(),
        TickOutcome::Matched {
            item_id,
            notification,
        } => format!("Item {} matched (notification: {:?}).", item_id, notification),
        TickOutcome::Unmatched { item_id } => format!("Item {} did not match.", item_id),
        TickOutcome::Retrying {
            item_id,
            retry_count,
            next_attempt_at,
        } => format!(
            "Item {} failed (attempt {}), retrying at {}.",
            item_id,
            retry_count,
            next_attempt_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        TickOutcome::Exhausted {
            item_id,
            retry_count,
        } => format!("Item {} exhausted after {} attempts.", item_id, retry_count),
    };
    println!("{}", line);
    Ok(())
}

/// `cwatch report`: build the activity report for the last `days` days,
/// print it, and send it through the configured sink.
pub async fn run_report(config: &Config, days: Option<u32>) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let days = days.unwrap_or(config.notify.report_interval_days).clamp(1, 366);
    let sender = ReportSender::new(
        Arc::clone(&pipeline.store),
        notify::create_sink(&config.notify)?,
        notify::recipient(&config.notify),
        config.notify.source_label.clone(),
        days,
    );
    let report = sender.send(Utc::now()).await?;
    println!("{}", format_report(&config.notify.source_label, &report).text);
    Ok(())
}
