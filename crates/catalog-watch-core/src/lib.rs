//! # Catalog Watch Core
//!
//! I/O-free logic for Catalog Watch: the item model and its lifecycle,
//! the capped exponential backoff policy, keyword and semantic matching,
//! the item store abstraction, and the similarity backend trait.
//!
//! This crate contains no HTTP, SQLite, or HTML dependencies. Everything
//! that touches the network or the disk lives in the `catalog-watch` app
//! crate and plugs into the traits defined here.

pub mod backoff;
pub mod embedding;
pub mod error;
pub mod matcher;
pub mod models;
pub mod store;
