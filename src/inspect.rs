//! Read-only diagnostics: `cwatch probe` and `cwatch inspect`.
//!
//! Both commands exercise the live fetcher, parser, extractor and matcher
//! against the real catalog without writing to the database, which makes
//! them the first thing to run after editing selectors or criteria.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use catalog_watch_core::matcher::{MatchField, MatchHit};
use catalog_watch_core::store::memory::InMemoryStore;

use crate::config::Config;
use crate::criteria::{CriteriaSource, FileCriteriaSource};
use crate::extract::ContentExtractor;
use crate::fetcher::RateLimitedFetcher;
use crate::pipeline::matcher_for;
use crate::poller::ListingPoller;
use crate::semantic;

const PREVIEW_CHARS: usize = 600;

/// `cwatch probe`: fetch and print one listing page.
pub async fn run_probe(config: &Config, page: u32) -> Result<()> {
    let fetcher = Arc::new(RateLimitedFetcher::new(&config.http)?);
    // The poller needs a store; probing never writes to it.
    let poller = ListingPoller::new(Arc::new(InMemoryStore::new()), fetcher, &config.listing)?;

    let url = poller.page_url(page, Utc::now())?;
    let listings = poller.fetch_page(page, Utc::now()).await?;

    println!("Page {}: {}", page, url);
    println!("{} entries", listings.len());
    println!();
    for listing in &listings {
        println!(
            "  {:<20} {}",
            listing.external_id,
            listing.title.as_deref().unwrap_or("(untitled)")
        );
        println!("  {:<20} {}", "", listing.url);
    }
    Ok(())
}

/// `cwatch inspect`: fetch a detail page, print the extracted text and
/// the verdict under the current criteria.
pub async fn run_inspect(config: &Config, url: &str, title: Option<&str>) -> Result<()> {
    let fetcher = RateLimitedFetcher::new(&config.http)?;
    let extractor = ContentExtractor::new(&config.detail)?;
    let criteria = FileCriteriaSource::new(&config.criteria.path)
        .current()
        .await
        .context("Failed to load criteria")?;
    let backend = semantic::create_backend(&config.semantic)?;

    let response = fetcher.fetch(url).await.context("Failed to fetch page")?;
    let text = extractor.extract(&response.body)?;

    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    println!("Extracted {} chars:", text.chars().count());
    println!("{}{}", preview, if preview.len() < text.len() { " …" } else { "" });
    println!();

    let verdict = matcher_for(&config.semantic)
        .evaluate(&text, title, &criteria, backend.as_deref())
        .await?;

    if !verdict.is_match() {
        println!("Verdict: no match");
        return Ok(());
    }
    println!("Verdict: match");
    for hit in &verdict.hits {
        match hit {
            MatchHit::Keyword { keyword, field } => {
                let field = match field {
                    MatchField::Text => "text",
                    MatchField::Title => "title",
                };
                println!("  keyword {:?} in {}", keyword, field);
            }
            MatchHit::Semantic {
                query,
                score,
                entailment,
            } => match entailment {
                Some(e) => println!("  query {:?}: similarity {:.3}, entailment {:.3}", query, score, e),
                None => println!("  query {:?}: similarity {:.3}", query, score),
            },
        }
    }
    Ok(())
}
