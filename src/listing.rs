//! Listing page parsing.
//!
//! Turns one listing page into ordered [`Listing`] entries. Two layouts are
//! supported, each configured with CSS selectors:
//!
//! - **card**: one element per entry (`item`), holding a `link` and
//!   optionally a `title` and an `id_text` node;
//! - **table**: one row per entry (`row`), with optional `title` and
//!   `id_cell` cells.
//!
//! The preferred layout is tried first and the other one is the fallback;
//! the first layout that yields any entry wins. Entries without a link or
//! without a recognisable external id are skipped.

use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use catalog_watch_core::models::Listing;

use crate::config::{CardSelectors, ListingConfig, TableSelectors};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4,}(?:[-/]\d+)?\b").expect("static id pattern compiles")
});

/// Query-string keys that carry the id in detail links.
const ID_QUERY_KEYS: [&str; 4] = ["id", "tender_id", "tenderId", "purchaseId"];

pub(crate) fn compile_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {}", css, e))
}

fn compile_optional(css: &Option<String>) -> Result<Option<Selector>> {
    css.as_deref().map(compile_selector).transpose()
}

/// Compiled selectors for one layout.
struct Layout {
    name: &'static str,
    entry: Selector,
    link: Selector,
    title: Option<Selector>,
    id_node: Option<Selector>,
    id_from_href: bool,
}

impl Layout {
    fn card(selectors: &CardSelectors) -> Result<Self> {
        Ok(Self {
            name: "card",
            entry: compile_selector(&selectors.item)?,
            link: compile_selector(&selectors.link)?,
            title: compile_optional(&selectors.title)?,
            id_node: compile_optional(&selectors.id_text)?,
            id_from_href: selectors.id_from_href,
        })
    }

    fn table(selectors: &TableSelectors) -> Result<Self> {
        Ok(Self {
            name: "table",
            entry: compile_selector(&selectors.row)?,
            link: compile_selector(&selectors.link)?,
            title: compile_optional(&selectors.title)?,
            id_node: compile_optional(&selectors.id_cell)?,
            id_from_href: selectors.id_from_href,
        })
    }

    fn parse(&self, document: &Html, page_url: &Url) -> Vec<Listing> {
        let mut listings = Vec::new();

        for entry in document.select(&self.entry) {
            let Some(link) = entry.select(&self.link).next() else {
                continue;
            };
            let href = link.value().attr("href").unwrap_or("").trim();
            if href.is_empty() {
                continue;
            }
            let Ok(url) = page_url.join(href) else {
                tracing::debug!(href, "unresolvable listing link");
                continue;
            };

            let title = self
                .title
                .as_ref()
                .and_then(|selector| entry.select(selector).next())
                .map(element_text)
                .filter(|t| !t.is_empty())
                .or_else(|| Some(element_text(link)).filter(|t| !t.is_empty()));

            let id_text = self
                .id_node
                .as_ref()
                .and_then(|selector| entry.select(selector).next())
                .map(element_text)
                .unwrap_or_default();

            let external_id = extract_external_id(&id_text, href, &url, self.id_from_href)
                .or_else(|| {
                    extract_external_id(&element_text(entry), href, &url, self.id_from_href)
                });
            let Some(external_id) = external_id else {
                continue;
            };

            listings.push(Listing {
                external_id,
                title,
                url: url.to_string(),
            });
        }

        listings
    }
}

/// Parser for one catalog's listing pages.
pub struct ListingParser {
    layouts: Vec<Layout>,
}

impl ListingParser {
    pub fn new(config: &ListingConfig) -> Result<Self> {
        let card = config.card.as_ref().map(Layout::card).transpose()?;
        let table = config.table.as_ref().map(Layout::table).transpose()?;

        let layouts: Vec<Layout> = if config.prefer_table {
            table.into_iter().chain(card).collect()
        } else {
            card.into_iter().chain(table).collect()
        };
        if layouts.is_empty() {
            anyhow::bail!("listing needs [listing.card] or [listing.table] selectors");
        }
        Ok(Self { layouts })
    }

    /// Parse `html` fetched from `page_url` into listing entries, in page
    /// order.
    pub fn parse(&self, html: &str, page_url: &Url) -> Vec<Listing> {
        let document = Html::parse_document(html);
        for layout in &self.layouts {
            let listings = layout.parse(&document, page_url);
            if !listings.is_empty() {
                tracing::trace!(layout = layout.name, count = listings.len(), "parsed listing page");
                return listings;
            }
        }
        Vec::new()
    }
}

/// Text content of an element with whitespace collapsed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the external id for an entry.
///
/// With `href_first` the link is consulted before `text`; the link is
/// always the last resort.
pub fn extract_external_id(text: &str, href: &str, url: &Url, href_first: bool) -> Option<String> {
    if href_first {
        if let Some(id) = id_from_href(href, url) {
            return Some(id);
        }
    }
    id_from_text(text).or_else(|| id_from_href(href, url))
}

fn id_from_text(text: &str) -> Option<String> {
    ID_PATTERN
        .find(text)
        .map(|m| normalize_external_id(m.as_str()))
        .filter(|id| !id.is_empty())
}

fn id_from_href(href: &str, url: &Url) -> Option<String> {
    for key in ID_QUERY_KEYS {
        let value = url
            .query_pairs()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| normalize_external_id(&v));
        if let Some(id) = value.filter(|id| !id.is_empty()) {
            return Some(id);
        }
    }
    id_from_text(href)
}

/// Keep `[0-9A-Za-z_-]` and lowercase the rest.
pub fn normalize_external_id(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}
