//! Shared fixtures for integration tests: a local catalog served by axum,
//! a recording notification sink, and config builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;

use catalog_watch::config::{self, Config};
use catalog_watch::notify::{Message, NotificationSink, NotifyError};

/// What the fake catalog serves. Tests mutate it between cycles.
#[derive(Default)]
pub struct Catalog {
    /// Listing HTML per 1-based page; missing pages render empty.
    pub pages: HashMap<u32, String>,
    /// Detail page status and HTML per id; missing ids are 404.
    pub details: HashMap<String, (u16, String)>,
    /// Detail requests seen per id.
    pub detail_hits: HashMap<String, usize>,
}

pub type SharedCatalog = Arc<Mutex<Catalog>>;

impl Catalog {
    pub fn shared() -> SharedCatalog {
        Arc::new(Mutex::new(Catalog::default()))
    }
}

/// Listing page HTML with one card per `(id, title)`.
pub fn listing_page(entries: &[(&str, &str)]) -> String {
    let cards: String = entries
        .iter()
        .map(|(id, title)| {
            format!(
                r#"<div class="card"><a class="title" href="/view/{id}">{title}</a><span class="no">{id}</span></div>"#
            )
        })
        .collect();
    format!("<html><body><nav>Catalog 2024</nav>{}</body></html>", cards)
}

/// Detail page HTML with navigation noise around `body`.
pub fn detail_page(body: &str) -> String {
    format!(
        r#"<html><body>
             <nav>Home | Laptops | Printers</nav>
             <main><ul class="breadcrumb"><li>Catalog</li></ul><div class="lot">{}</div></main>
             <script>track("laptop")</script>
           </body></html>"#,
        body
    )
}

async fn list_handler(
    State(catalog): State<SharedCatalog>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let page = params
        .get("page")
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(1);
    let html = catalog
        .lock()
        .unwrap()
        .pages
        .get(&page)
        .cloned()
        .unwrap_or_else(|| "<html><body></body></html>".to_string());
    Html(html)
}

async fn view_handler(
    State(catalog): State<SharedCatalog>,
    UrlPath(id): UrlPath<String>,
) -> (StatusCode, Html<String>) {
    let mut catalog = catalog.lock().unwrap();
    *catalog.detail_hits.entry(id.clone()).or_default() += 1;
    match catalog.details.get(&id) {
        Some((status, body)) => (
            StatusCode::from_u16(*status).unwrap(),
            Html(body.clone()),
        ),
        None => (StatusCode::NOT_FOUND, Html(String::new())),
    }
}

/// Serve `catalog` on an ephemeral port; returns the base URL.
pub async fn spawn_catalog(catalog: SharedCatalog) -> String {
    let app = Router::new()
        .route("/list", get(list_handler))
        .route("/view/{id}", get(view_handler))
        .with_state(catalog);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Config TOML pointing at `base_url`, with fast HTTP limits for tests.
pub fn config_toml(base_url: &str, db_path: &Path, criteria_path: &Path, max_retries: u32) -> String {
    format!(
        r#"[db]
path = "{db}"

[http]
timeout_secs = 5
concurrency = 3
rate_limit_rps = 50.0
burst = 5

[listing]
url_template = "{base}/list?page={{page}}"
pages = 2
interval_secs = 1

[listing.card]
item = ".card"
link = "a.title"
id_text = ".no"

[detail]
interval_secs = 1
max_retries = {max_retries}

[criteria]
path = "{criteria}"

[notify]
sink = "log"
source_label = "test-catalog"

[logging]
level = "warn"
"#,
        db = db_path.display(),
        base = base_url,
        criteria = criteria_path.display(),
        max_retries = max_retries,
    )
}

pub fn test_config(base_url: &str, db_path: &Path, criteria_path: &Path, max_retries: u32) -> Config {
    let config: Config =
        toml::from_str(&config_toml(base_url, db_path, criteria_path, max_retries)).unwrap();
    config::validate(&config).unwrap();
    config
}

/// Sink that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, recipient: &str, message: &Message) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));
        Ok(())
    }
}
