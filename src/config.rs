use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use catalog_watch_core::backoff::BackoffPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub listing: ListingConfig,
    #[serde(default)]
    pub detail: DetailConfig,
    pub criteria: CriteriaConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Certificate verification for catalog requests. Off unless enabled.
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            concurrency: default_concurrency(),
            rate_limit_rps: default_rate_limit_rps(),
            burst: default_burst(),
            verify_tls: false,
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

fn default_http_timeout() -> u64 {
    10
}
fn default_concurrency() -> usize {
    3
}
fn default_rate_limit_rps() -> f64 {
    2.0
}
fn default_burst() -> u32 {
    1
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/125.0 Safari/537.36"
        .to_string()
}
fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingConfig {
    /// Listing page URL; `{page}` is replaced by the 1-based page number
    /// and `{date}` by today's date rendered with `date_format`.
    pub url_template: String,
    #[serde(default = "default_pages")]
    pub pages: u32,
    #[serde(default = "default_listing_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub prefer_table: bool,
    #[serde(default)]
    pub card: Option<CardSelectors>,
    #[serde(default)]
    pub table: Option<TableSelectors>,
}

fn default_pages() -> u32 {
    2
}
fn default_listing_interval() -> u64 {
    300
}
fn default_date_format() -> String {
    "%d.%m.%Y".to_string()
}

/// Selectors for card-style listings (one element per entry).
#[derive(Debug, Deserialize, Clone)]
pub struct CardSelectors {
    pub item: String,
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub id_text: Option<String>,
    #[serde(default)]
    pub id_from_href: bool,
}

/// Selectors for table-style listings (one row per entry).
#[derive(Debug, Deserialize, Clone)]
pub struct TableSelectors {
    pub row: String,
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub id_cell: Option<String>,
    #[serde(default)]
    pub id_from_href: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetailConfig {
    #[serde(default = "default_detail_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default)]
    pub main_selector: Option<String>,
    #[serde(default)]
    pub text_selectors: Vec<String>,
    #[serde(default = "default_exclude_selectors")]
    pub exclude_selectors: Vec<String>,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_detail_interval(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            backoff_factor: default_backoff_factor(),
            backoff_max_secs: default_backoff_max(),
            main_selector: None,
            text_selectors: Vec::new(),
            exclude_selectors: default_exclude_selectors(),
        }
    }
}

impl DetailConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_secs: self.backoff_base_secs,
            factor: self.backoff_factor,
            max_secs: self.backoff_max_secs,
            max_retries: self.max_retries,
        }
    }
}

fn default_detail_interval() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base() -> u64 {
    60
}
fn default_backoff_factor() -> f64 {
    2.0
}
/// Thirty days.
const MAX_BACKOFF_SECS: u64 = 30 * 24 * 3600;

fn default_backoff_max() -> u64 {
    3600
}
fn default_exclude_selectors() -> Vec<String> {
    vec![
        "nav".to_string(),
        ".breadcrumb".to_string(),
        ".breadcrumbs".to_string(),
        "button".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CriteriaConfig {
    /// TOML file with `keywords` and `[[semantic]]` entries, re-read on
    /// every evaluation.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SemanticConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_semantic_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_semantic_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub entailment: bool,
    #[serde(default)]
    pub entailment_model: Option<String>,
    #[serde(default = "default_entailment_threshold")]
    pub entailment_threshold: f32,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_semantic_timeout(),
            max_retries: default_semantic_retries(),
            max_chars: default_max_chars(),
            entailment: false,
            entailment_model: None,
            entailment_threshold: default_entailment_threshold(),
        }
    }
}

impl SemanticConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_semantic_timeout() -> u64 {
    30
}
fn default_semantic_retries() -> u32 {
    2
}
fn default_max_chars() -> usize {
    8000
}
fn default_entailment_threshold() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default = "default_sink")]
    pub sink: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub api_url: Option<String>,
    /// Label shown in message headers, e.g. the catalog's host name.
    #[serde(default = "default_source_label")]
    pub source_label: String,
    /// Send an activity report every this many days, covering the same
    /// span. `0` disables it.
    #[serde(default)]
    pub report_interval_days: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            chat_id: None,
            token_env: default_token_env(),
            api_url: None,
            source_label: default_source_label(),
            report_interval_days: 0,
        }
    }
}

fn default_sink() -> String {
    "log".to_string()
}
fn default_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}
fn default_source_label() -> String {
    "catalog".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate http
    if config.http.concurrency == 0 {
        anyhow::bail!("http.concurrency must be >= 1");
    }
    if !(config.http.rate_limit_rps > 0.0) {
        anyhow::bail!("http.rate_limit_rps must be > 0");
    }
    if config.http.burst == 0 {
        anyhow::bail!("http.burst must be >= 1");
    }
    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be >= 1");
    }

    // Validate listing
    if !config.listing.url_template.contains("{page}") {
        anyhow::bail!("listing.url_template must contain a {{page}} placeholder");
    }
    if config.listing.pages == 0 {
        anyhow::bail!("listing.pages must be >= 1");
    }
    if config.listing.interval_secs == 0 {
        anyhow::bail!("listing.interval_secs must be >= 1");
    }
    if StrftimeItems::new(&config.listing.date_format).any(|item| matches!(item, Item::Error)) {
        anyhow::bail!(
            "listing.date_format is not a valid strftime format: '{}'",
            config.listing.date_format
        );
    }
    if config.listing.card.is_none() && config.listing.table.is_none() {
        anyhow::bail!("listing needs [listing.card] or [listing.table] selectors");
    }

    // Validate detail
    if config.detail.interval_secs == 0 {
        anyhow::bail!("detail.interval_secs must be >= 1");
    }
    if config.detail.backoff_factor < 1.0 {
        anyhow::bail!("detail.backoff_factor must be >= 1.0");
    }
    if config.detail.backoff_max_secs < config.detail.backoff_base_secs {
        anyhow::bail!("detail.backoff_max_secs must be >= detail.backoff_base_secs");
    }
    if config.detail.backoff_max_secs > MAX_BACKOFF_SECS {
        anyhow::bail!("detail.backoff_max_secs must be <= {}", MAX_BACKOFF_SECS);
    }

    // Validate semantic
    match config.semantic.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown semantic provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.semantic.provider == "openai" && config.semantic.model.is_none() {
        anyhow::bail!("semantic.model must be specified when provider is 'openai'");
    }
    if config.semantic.provider == "ollama" && config.semantic.model.is_none() {
        anyhow::bail!("semantic.model must be specified when provider is 'ollama'");
    }
    if config.semantic.entailment && config.semantic.provider != "local" {
        anyhow::bail!("semantic.entailment requires provider = 'local'");
    }
    if !(0.0..=1.0).contains(&config.semantic.entailment_threshold) {
        anyhow::bail!("semantic.entailment_threshold must be in [0.0, 1.0]");
    }

    // Validate notify
    match config.notify.sink.as_str() {
        "log" => {}
        "telegram" => {
            if config.notify.chat_id.is_none() {
                anyhow::bail!("notify.chat_id must be specified when sink is 'telegram'");
            }
        }
        other => anyhow::bail!("Unknown notify sink: '{}'. Must be log or telegram.", other),
    }
    if config.notify.report_interval_days > 366 {
        anyhow::bail!("notify.report_interval_days must be <= 366");
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Unknown logging.format: '{}'. Must be pretty or json.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/watch.sqlite"

[listing]
url_template = "https://catalog.test/list?p={page}"

[listing.card]
item = ".card"
link = "a"

[criteria]
path = "./config/criteria.toml"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.http.concurrency, 3);
        assert!(!config.http.verify_tls);
        assert_eq!(config.listing.pages, 2);
        assert_eq!(config.detail.backoff_policy(), BackoffPolicy::default());
        assert_eq!(config.notify.sink, "log");
        assert!(!config.semantic.is_enabled());
    }

    #[test]
    fn template_without_page_is_rejected() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.listing.url_template = "https://catalog.test/list".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("{page}"), "{}", err);
    }

    #[test]
    fn telegram_requires_chat_id() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.notify.sink = "telegram".into();
        assert!(validate(&config).is_err());
        config.notify.chat_id = Some("-100123".into());
        validate(&config).unwrap();
    }

    #[test]
    fn entailment_needs_local_provider() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.semantic.provider = "openai".into();
        config.semantic.model = Some("text-embedding-3-small".into());
        config.semantic.entailment = true;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/catalog-watch.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.listing.date_format, "%d.%m.%Y");
        assert!(config.listing.card.is_some());
    }

    #[test]
    fn bad_date_format_is_rejected() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.listing.date_format = "%Q".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("date_format"), "{}", err);

        config.listing.date_format = "%Y-%m-%d".into();
        validate(&config).unwrap();
    }

    #[test]
    fn oversized_backoff_and_report_interval_are_rejected() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.detail.backoff_max_secs = u64::MAX;
        assert!(validate(&config).is_err());

        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.notify.report_interval_days = 10_000;
        assert!(validate(&config).is_err());
        config.notify.report_interval_days = 7;
        validate(&config).unwrap();
    }
}
