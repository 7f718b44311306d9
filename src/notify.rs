//! Notification sinks and message formatting.
//!
//! A [`NotificationSink`] delivers one rendered [`Message`] to a
//! recipient. Two sinks exist:
//!
//! | `notify.sink` | Sink | Recipient |
//! |---------------|------|-----------|
//! | `"log"` | [`LogSink`] | ignored, a structured `info` line is written |
//! | `"telegram"` | [`TelegramSink`] | `notify.chat_id` |
//!
//! Sinks know nothing about dedup; the gate in [`crate::gate`] decides
//! whether a message is sent at all.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use catalog_watch_core::matcher::{MatchHit, Verdict};
use catalog_watch_core::models::Item;

use crate::config::NotifyConfig;

const TELEGRAM_API: &str = "https://api.telegram.org";
const KEYWORD_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One rendered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub title: String,
    pub link: String,
    pub external_id: String,
    /// Full message body as delivered.
    pub text: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, message: &Message) -> Result<(), NotifyError>;
}

/// Build the sink selected by `notify.sink`.
pub fn create_sink(config: &NotifyConfig) -> Result<Arc<dyn NotificationSink>> {
    match config.sink.as_str() {
        "log" => Ok(Arc::new(LogSink)),
        "telegram" => Ok(Arc::new(TelegramSink::from_config(config)?)),
        other => anyhow::bail!("Unknown notify sink: {}", other),
    }
}

/// Recipient passed to the sink for every message.
pub fn recipient(config: &NotifyConfig) -> String {
    config.chat_id.clone().unwrap_or_else(|| "log".to_string())
}

/// Render the message for a matched item.
pub fn format_message(source_label: &str, item: &Item, verdict: &Verdict) -> Message {
    let title = item.display_title().to_string();
    let mut lines = vec![
        format!("New match in {}", source_label),
        format!("Title: {}", title),
        format!("Link: {}", item.url),
        format!("Id: {}", item.external_id),
    ];

    let keywords = verdict.keywords();
    if !keywords.is_empty() {
        lines.push(format!("Matched: {}", format_keywords(&keywords, KEYWORD_LIMIT)));
    } else if let Some(MatchHit::Semantic {
        query,
        score,
        entailment,
    }) = verdict.hits.first()
    {
        let mut line = format!("Matched query: \"{}\" (similarity {:.2}", query, score);
        if let Some(entailment) = entailment {
            line.push_str(&format!(", entailment {:.2}", entailment));
        }
        line.push(')');
        lines.push(line);
    }

    Message {
        title,
        link: item.url.clone(),
        external_id: item.external_id.clone(),
        text: lines.join("\n"),
    }
}

/// First `limit` distinct keywords (case-insensitive), with an
/// "and N more" suffix for the rest.
pub fn format_keywords(keywords: &[&str], limit: usize) -> String {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .collect();

    if unique.len() <= limit {
        return unique.join(", ");
    }
    format!("{} and {} more", unique[..limit].join(", "), unique.len() - limit)
}

/// Writes notifications to the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, recipient: &str, message: &Message) -> Result<(), NotifyError> {
        tracing::info!(
            recipient,
            external_id = %message.external_id,
            title = %message.title,
            link = %message.link,
            "notification"
        );
        Ok(())
    }
}

/// Sends messages through the Telegram Bot API `sendMessage` method.
pub struct TelegramSink {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramSink {
    /// Reads the bot token from the environment variable named by
    /// `notify.token_env`.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .with_context(|| format!("{} environment variable not set", config.token_env))?;
        let base = config.api_url.as_deref().unwrap_or(TELEGRAM_API);
        Self::new(base, &token)
    }

    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), token),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, recipient: &str, message: &Message) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": recipient,
            "text": message.text,
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_watch_core::matcher::MatchField;
    use catalog_watch_core::models::Listing;
    use chrono::Utc;

    fn item() -> Item {
        Item::discovered(
            &Listing {
                external_id: "2024-77".into(),
                title: Some("Laptops".into()),
                url: "https://catalog.test/view/2024-77".into(),
            },
            Utc::now(),
        )
    }

    fn keyword_hit(keyword: &str) -> MatchHit {
        MatchHit::Keyword {
            keyword: keyword.into(),
            field: MatchField::Text,
        }
    }

    #[test]
    fn keywords_are_deduped_and_truncated() {
        let keywords = ["a", "B", "b", "c", "d", "e", "f", "g"];
        assert_eq!(format_keywords(&keywords, 5), "a, B, c, d, e and 2 more");
        assert_eq!(format_keywords(&["x", "X"], 5), "x");
    }

    #[test]
    fn keyword_message_has_all_fields() {
        let verdict = Verdict {
            hits: vec![keyword_hit("laptop"), keyword_hit("Laptop")],
        };
        let message = format_message("catalog.test", &item(), &verdict);
        assert_eq!(message.external_id, "2024-77");
        assert_eq!(
            message.text,
            "New match in catalog.test\nTitle: Laptops\nLink: https://catalog.test/view/2024-77\n\
             Id: 2024-77\nMatched: laptop"
        );
    }

    #[test]
    fn semantic_message_shows_score() {
        let verdict = Verdict {
            hits: vec![MatchHit::Semantic {
                query: "computer equipment".into(),
                score: 0.8123,
                entailment: None,
            }],
        };
        let message = format_message("catalog.test", &item(), &verdict);
        assert!(message
            .text
            .ends_with("Matched query: \"computer equipment\" (similarity 0.81)"));
    }
}
