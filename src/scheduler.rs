//! Periodic drivers for the poller, the detail worker and the activity
//! report.
//!
//! Independent tokio tasks, each on its own `interval` with
//! [`MissedTickBehavior::Delay`], so a slow tick pushes the next one back
//! instead of bursting. Shutdown is a `watch` flag checked between ticks:
//! a tick that has started always runs to completion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use catalog_watch_core::error::StoreError;
use catalog_watch_core::store::ItemStore;

use crate::poller::ListingPoller;
use crate::report::ReportSender;
use crate::worker::DetailWorker;

pub struct Scheduler {
    store: Arc<dyn ItemStore>,
    poller: Arc<ListingPoller>,
    worker: Arc<DetailWorker>,
    listing_interval: Duration,
    detail_interval: Duration,
    report: Option<(Arc<ReportSender>, Duration)>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ItemStore>,
        poller: Arc<ListingPoller>,
        worker: Arc<DetailWorker>,
        listing_interval: Duration,
        detail_interval: Duration,
    ) -> Self {
        Self {
            store,
            poller,
            worker,
            listing_interval: listing_interval.max(Duration::from_secs(1)),
            detail_interval: detail_interval.max(Duration::from_secs(1)),
            report: None,
        }
    }

    /// Also send an activity report every `interval`. The first one goes
    /// out one full interval after start.
    pub fn with_report(mut self, sender: Arc<ReportSender>, interval: Duration) -> Self {
        self.report = Some((sender, interval.max(Duration::from_secs(1))));
        self
    }

    /// Run until Ctrl-C (or SIGTERM on Unix).
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then wait for in-flight ticks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let recovered = self.store.requeue_in_flight(Utc::now()).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "returned items left in fetching to the queue");
        }

        if !self.poller.self_test().await {
            tracing::error!("listing poller is degraded, continuing anyway");
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        let poller = Arc::clone(&self.poller);
        let poll_task = tokio::spawn(run_loop(
            "poller",
            self.listing_interval,
            Duration::ZERO,
            stop_rx.clone(),
            move || {
                let poller = Arc::clone(&poller);
                async move {
                    poller.run_cycle(Utc::now()).await?;
                    Ok::<(), StoreError>(())
                }
            },
        ));

        let worker = Arc::clone(&self.worker);
        let detail_task = tokio::spawn(run_loop(
            "detail",
            self.detail_interval,
            Duration::ZERO,
            stop_rx.clone(),
            move || {
                let worker = Arc::clone(&worker);
                async move {
                    worker.tick(Utc::now()).await?;
                    Ok::<(), StoreError>(())
                }
            },
        ));

        let report_task = self.report.as_ref().map(|(sender, interval)| {
            let sender = Arc::clone(sender);
            tokio::spawn(run_loop(
                "report",
                *interval,
                *interval,
                stop_rx.clone(),
                move || {
                    let sender = Arc::clone(&sender);
                    async move {
                        sender.send(Utc::now()).await?;
                        Ok::<(), StoreError>(())
                    }
                },
            ))
        });

        tracing::info!(
            listing_interval_secs = self.listing_interval.as_secs(),
            detail_interval_secs = self.detail_interval.as_secs(),
            report_interval_secs = self.report.as_ref().map(|(_, interval)| interval.as_secs()),
            "scheduler started"
        );

        shutdown.await;
        tracing::info!("shutdown requested, waiting for in-flight ticks");
        let _ = stop_tx.send(true);

        poll_task.await?;
        detail_task.await?;
        if let Some(task) = report_task {
            task.await?;
        }
        tracing::info!("scheduler stopped");
        Ok(())
    }
}

async fn run_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    first_delay: Duration,
    mut stop: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }
        if let Err(e) = tick().await {
            tracing::error!(task = name, error = %e, "tick aborted");
        }
    }
    tracing::debug!(task = name, "loop stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
