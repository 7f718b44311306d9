//! # Catalog Watch
//!
//! Watches a paginated web catalog for newly published items, inspects each
//! item's detail page, classifies it against keyword and semantic criteria,
//! and sends exactly one notification per matching item.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   upsert   ┌──────────┐  due item  ┌───────────────┐
//! │ Listing      │──────────▶│  SQLite   │──────────▶│ Detail worker │
//! │ poller       │            │  items    │◀──────────│ fetch+extract │
//! └──────┬───────┘            └──────────┘  status    │ +match        │
//!        │      shared rate-limited fetcher           └───────┬───────┘
//!        └───────────────────────┬─────────────────────────────┤
//!                                ▼                             ▼
//!                          ┌──────────┐                 ┌────────────┐
//!                          │ catalog  │                 │ dedup gate │──▶ sink
//!                          └──────────┘                 └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cwatch init                         # create database
//! cwatch probe --page 1               # check listing selectors
//! cwatch inspect https://…/view/123   # check extraction + criteria
//! cwatch run                          # poll and process until Ctrl-C
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite item store |
//! | [`fetcher`] | Rate-limited HTTP fetcher |
//! | [`listing`] | Listing page parsing |
//! | [`poller`] | Listing poll cycle |
//! | [`extract`] | Detail page text extraction |
//! | [`criteria`] | Match criteria providers |
//! | [`semantic`] | Embedding backends |
//! | [`notify`] | Notification sinks |
//! | [`gate`] | Notification dedup |
//! | [`worker`] | Detail retry queue tick |
//! | [`report`] | Periodic activity report |
//! | [`scheduler`] | Periodic task drivers |
//! | [`pipeline`] | Component wiring and run commands |
//! | [`inspect`] | Read-only probe and inspect commands |
//! | [`stats`] | Database statistics |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod criteria;
pub mod db;
pub mod extract;
pub mod fetcher;
pub mod gate;
pub mod inspect;
pub mod listing;
pub mod logging;
pub mod migrate;
pub mod notify;
pub mod pipeline;
pub mod poller;
pub mod report;
pub mod scheduler;
pub mod semantic;
pub mod sqlite_store;
pub mod stats;
pub mod worker;
