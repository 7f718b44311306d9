//! Keyword and semantic matching of extracted item text.
//!
//! Evaluation runs two passes in order and stops at the first one that
//! produces a hit:
//!
//! 1. **Keyword pass**: every configured keyword is tested against the
//!    extracted text; only if none hits are the same keywords tested
//!    against the item title.
//! 2. **Semantic pass**: each semantic query is embedded alongside the
//!    text; a query hits when the similarity reaches its threshold
//!    (inclusive). With entailment corroboration enabled, the entailment
//!    score must reach its own threshold as well.
//!
//! A keyword is either a literal (case-insensitive substring) or a
//! `/pattern/flags` regular expression, where the `i` flag makes the
//! pattern case-insensitive.
//!
//! The matcher holds no state between calls: the criteria snapshot is
//! passed in on every evaluation.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::embedding::SemanticBackend;
use crate::error::MatchBackendError;

/// A natural-language query matched by embedding similarity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SemanticQuery {
    #[serde(alias = "query")]
    pub text: String,
    pub threshold: f32,
}

/// Snapshot of the user's match criteria at evaluation time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MatchCriteria {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, rename = "semantic")]
    pub semantic_queries: Vec<SemanticQuery>,
}

impl MatchCriteria {
    pub fn is_empty(&self) -> bool {
        self.keywords.iter().all(|k| k.trim().is_empty()) && self.semantic_queries.is_empty()
    }
}

/// A compiled keyword.
#[derive(Debug, Clone)]
pub enum Keyword {
    Literal { raw: String, folded: String },
    Pattern { raw: String, regex: Regex },
}

impl Keyword {
    pub fn raw(&self) -> &str {
        match self {
            Keyword::Literal { raw, .. } | Keyword::Pattern { raw, .. } => raw,
        }
    }

    /// `folded_haystack` must be `haystack.to_lowercase()`.
    fn matches(&self, haystack: &str, folded_haystack: &str) -> bool {
        match self {
            Keyword::Literal { folded, .. } => folded_haystack.contains(folded.as_str()),
            Keyword::Pattern { regex, .. } => regex.is_match(haystack),
        }
    }
}

/// Compile raw keyword strings, skipping blanks.
///
/// Returns the compiled keywords and the raw entries whose regex failed to
/// compile, so callers can report them.
pub fn compile_keywords(raw: &[String]) -> (Vec<Keyword>, Vec<String>) {
    let mut compiled = Vec::new();
    let mut invalid = Vec::new();

    for entry in raw {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match parse_pattern(entry) {
            Some((pattern, flags)) => {
                match RegexBuilder::new(pattern)
                    .case_insensitive(flags.contains('i'))
                    .build()
                {
                    Ok(regex) => compiled.push(Keyword::Pattern {
                        raw: entry.to_string(),
                        regex,
                    }),
                    Err(_) => invalid.push(entry.to_string()),
                }
            }
            None => compiled.push(Keyword::Literal {
                raw: entry.to_string(),
                folded: entry.to_lowercase(),
            }),
        }
    }

    (compiled, invalid)
}

/// Split `/pattern/flags` into its parts; `None` for plain literals.
fn parse_pattern(entry: &str) -> Option<(&str, &str)> {
    let rest = entry.strip_prefix('/')?;
    let last = rest.rfind('/')?;
    if last == 0 {
        return None;
    }
    Some((&rest[..last], &rest[last + 1..]))
}

/// Where a keyword hit was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Text,
    Title,
}

/// A single reason an item matched.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchHit {
    Keyword {
        keyword: String,
        field: MatchField,
    },
    Semantic {
        query: String,
        score: f32,
        entailment: Option<f32>,
    },
}

/// Result of evaluating one item against a criteria snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    pub hits: Vec<MatchHit>,
}

impl Verdict {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        !self.hits.is_empty()
    }

    /// Raw keywords that hit, in criteria order.
    pub fn keywords(&self) -> Vec<&str> {
        self.hits
            .iter()
            .filter_map(|hit| match hit {
                MatchHit::Keyword { keyword, .. } => Some(keyword.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Run the keyword pass alone: text first, title only as a fallback.
pub fn keyword_pass(text: &str, title: Option<&str>, keywords: &[Keyword]) -> Vec<MatchHit> {
    let hits = keyword_hits(text, keywords, MatchField::Text);
    if !hits.is_empty() {
        return hits;
    }
    match title {
        Some(title) if !title.trim().is_empty() => {
            keyword_hits(title, keywords, MatchField::Title)
        }
        _ => Vec::new(),
    }
}

fn keyword_hits(haystack: &str, keywords: &[Keyword], field: MatchField) -> Vec<MatchHit> {
    if haystack.is_empty() {
        return Vec::new();
    }
    let folded = haystack.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| keyword.matches(haystack, &folded))
        .map(|keyword| MatchHit::Keyword {
            keyword: keyword.raw().to_string(),
            field,
        })
        .collect()
}

/// Matcher settings that come from the application config rather than
/// the user's criteria.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    /// When set, semantic hits also need an entailment score at or above
    /// this value.
    pub entailment_threshold: Option<f32>,
    /// Text longer than this many characters is truncated before embedding.
    pub max_chars: Option<usize>,
}

impl Matcher {
    /// Evaluate `text` and `title` against `criteria`.
    ///
    /// `backend` is `None` when semantic matching is disabled; semantic
    /// queries are then ignored.
    pub async fn evaluate(
        &self,
        text: &str,
        title: Option<&str>,
        criteria: &MatchCriteria,
        backend: Option<&dyn SemanticBackend>,
    ) -> Result<Verdict, MatchBackendError> {
        let (keywords, _invalid) = compile_keywords(&criteria.keywords);
        let hits = keyword_pass(text, title, &keywords);
        if !hits.is_empty() {
            return Ok(Verdict { hits });
        }

        let Some(backend) = backend else {
            return Ok(Verdict::no_match());
        };
        match self.semantic_pass(text, &criteria.semantic_queries, backend).await? {
            Some(hit) => Ok(Verdict { hits: vec![hit] }),
            None => Ok(Verdict::no_match()),
        }
    }

    async fn semantic_pass(
        &self,
        text: &str,
        queries: &[SemanticQuery],
        backend: &dyn SemanticBackend,
    ) -> Result<Option<MatchHit>, MatchBackendError> {
        let queries: Vec<&SemanticQuery> = queries
            .iter()
            .filter(|q| !q.text.trim().is_empty())
            .collect();
        let text = self.truncate(text.trim());
        if queries.is_empty() || text.is_empty() {
            return Ok(None);
        }

        let mut batch = Vec::with_capacity(queries.len() + 1);
        batch.push(text.to_string());
        batch.extend(queries.iter().map(|q| q.text.trim().to_string()));

        let vectors = backend.embed(&batch).await?;
        if vectors.len() != batch.len() {
            return Err(MatchBackendError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        let text_vec = &vectors[0];
        for (query, query_vec) in queries.iter().zip(&vectors[1..]) {
            let score = backend.similarity(text_vec, query_vec);
            if score < query.threshold {
                continue;
            }

            let entailment = match self.entailment_threshold {
                Some(threshold) => {
                    let score = backend
                        .entails(text, query.text.trim())
                        .await?
                        .ok_or_else(|| {
                            MatchBackendError::Request(format!(
                                "backend '{}' has no entailment model",
                                backend.model_name()
                            ))
                        })?;
                    if score < threshold {
                        continue;
                    }
                    Some(score)
                }
                None => None,
            };

            return Ok(Some(MatchHit::Semantic {
                query: query.text.trim().to_string(),
                score,
                entailment,
            }));
        }

        Ok(None)
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match self.max_chars {
            Some(limit) => match text.char_indices().nth(limit) {
                Some((idx, _)) => &text[..idx],
                None => text,
            },
            None => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose similarity is a fixed value regardless of input.
    struct FixedBackend {
        similarity: f32,
        entailment: Option<f32>,
        embed_calls: AtomicUsize,
    }

    impl FixedBackend {
        fn new(similarity: f32) -> Self {
            Self {
                similarity,
                entailment: None,
                embed_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SemanticBackend for FixedBackend {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MatchBackendError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn similarity(&self, _a: &[f32], _b: &[f32]) -> f32 {
            self.similarity
        }

        async fn entails(
            &self,
            _premise: &str,
            _hypothesis: &str,
        ) -> Result<Option<f32>, MatchBackendError> {
            Ok(self.entailment)
        }
    }

    struct DownBackend;

    #[async_trait]
    impl SemanticBackend for DownBackend {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, MatchBackendError> {
            Err(MatchBackendError::Request("connection refused".into()))
        }
    }

    fn criteria(keywords: &[&str], queries: &[(&str, f32)]) -> MatchCriteria {
        MatchCriteria {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            semantic_queries: queries
                .iter()
                .map(|(text, threshold)| SemanticQuery {
                    text: text.to_string(),
                    threshold: *threshold,
                })
                .collect(),
        }
    }

    #[test]
    fn literal_keywords_are_case_insensitive() {
        let (keywords, invalid) = compile_keywords(&["Server".into(), "  ".into()]);
        assert!(invalid.is_empty());
        assert_eq!(keywords.len(), 1);
        let hits = keyword_pass("Supply of SERVER racks", None, &keywords);
        assert_eq!(
            hits,
            vec![MatchHit::Keyword {
                keyword: "Server".into(),
                field: MatchField::Text
            }]
        );
    }

    #[test]
    fn unicode_keywords_fold_case() {
        let (keywords, _) = compile_keywords(&["ноутбук".into()]);
        assert_eq!(keyword_pass("Поставка НОУТБУКОВ", None, &keywords).len(), 1);
    }

    #[test]
    fn regex_keywords_respect_flags() {
        let (keywords, invalid) = compile_keywords(&["/lap(top)?s?\\b/i".into(), "/GPU/".into()]);
        assert!(invalid.is_empty());
        assert_eq!(keywords.len(), 2);
        let hits = keyword_pass("New LAPTOPS and gpu cards", None, &keywords);
        assert_eq!(hits.len(), 1);
        assert!(matches!(&hits[0], MatchHit::Keyword { keyword, .. } if keyword.starts_with("/lap")));
    }

    #[test]
    fn broken_regex_is_reported_not_compiled() {
        let (keywords, invalid) = compile_keywords(&["/(unclosed/".into(), "ok".into()]);
        assert_eq!(keywords.len(), 1);
        assert_eq!(invalid, vec!["/(unclosed/".to_string()]);
    }

    #[test]
    fn lone_slash_is_a_literal() {
        let (keywords, _) = compile_keywords(&["/".into(), "/x".into()]);
        assert!(keywords
            .iter()
            .all(|k| matches!(k, Keyword::Literal { .. })));
    }

    #[test]
    fn title_is_only_a_fallback() {
        let (keywords, _) = compile_keywords(&["printer".into(), "toner".into()]);
        let hits = keyword_pass("office furniture", Some("Printer supplies"), &keywords);
        assert_eq!(
            hits,
            vec![MatchHit::Keyword {
                keyword: "printer".into(),
                field: MatchField::Title
            }]
        );

        let hits = keyword_pass("toner cartridges", Some("Printer supplies"), &keywords);
        assert_eq!(
            hits,
            vec![MatchHit::Keyword {
                keyword: "toner".into(),
                field: MatchField::Text
            }]
        );
    }

    #[tokio::test]
    async fn title_fallback_produces_match_verdict() {
        let verdict = Matcher::default()
            .evaluate(
                "delivery of office chairs",
                Some("Laptop procurement"),
                &criteria(&["laptop"], &[]),
                None,
            )
            .await
            .unwrap();
        assert!(verdict.is_match());
        assert_eq!(verdict.keywords(), vec!["laptop"]);
    }

    #[tokio::test]
    async fn semantic_threshold_is_inclusive() {
        let c = criteria(&[], &[("computer equipment", 0.7)]);

        let below = FixedBackend::new(0.69);
        let verdict = Matcher::default()
            .evaluate("body text", None, &c, Some(&below))
            .await
            .unwrap();
        assert!(!verdict.is_match());

        let at = FixedBackend::new(0.70);
        let verdict = Matcher::default()
            .evaluate("body text", None, &c, Some(&at))
            .await
            .unwrap();
        assert!(verdict.is_match());
        assert!(matches!(
            &verdict.hits[0],
            MatchHit::Semantic { query, entailment: None, .. } if query == "computer equipment"
        ));
    }

    #[tokio::test]
    async fn keyword_hit_skips_semantic_backend() {
        let backend = FixedBackend::new(1.0);
        let verdict = Matcher::default()
            .evaluate(
                "laptop delivery",
                None,
                &criteria(&["laptop"], &[("anything", 0.1)]),
                Some(&backend),
            )
            .await
            .unwrap();
        assert!(verdict.is_match());
        assert_eq!(backend.embed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn entailment_must_also_pass() {
        let c = criteria(&[], &[("computer equipment", 0.5)]);
        let matcher = Matcher {
            entailment_threshold: Some(0.6),
            max_chars: None,
        };

        let mut weak = FixedBackend::new(0.9);
        weak.entailment = Some(0.59);
        assert!(!matcher
            .evaluate("text", None, &c, Some(&weak))
            .await
            .unwrap()
            .is_match());

        let mut strong = FixedBackend::new(0.9);
        strong.entailment = Some(0.8);
        let verdict = matcher
            .evaluate("text", None, &c, Some(&strong))
            .await
            .unwrap();
        assert!(matches!(
            verdict.hits[0],
            MatchHit::Semantic { entailment: Some(e), .. } if (e - 0.8).abs() < 1e-6
        ));
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_error() {
        let result = Matcher::default()
            .evaluate("text", None, &criteria(&[], &[("q", 0.5)]), Some(&DownBackend))
            .await;
        assert!(matches!(result, Err(MatchBackendError::Request(_))));
    }

    #[tokio::test]
    async fn disabled_backend_ignores_semantic_queries() {
        let verdict = Matcher::default()
            .evaluate("text", None, &criteria(&[], &[("q", 0.0)]), None)
            .await
            .unwrap();
        assert!(!verdict.is_match());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let matcher = Matcher {
            entailment_threshold: None,
            max_chars: Some(3),
        };
        assert_eq!(matcher.truncate("привет"), "при");
        assert_eq!(matcher.truncate("ab"), "ab");
    }
}
