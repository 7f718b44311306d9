//! Detail page text extraction.
//!
//! Extraction tries an ordered list of region strategies and keeps the
//! first one that yields non-empty text:
//!
//! 1. the configured `detail.main_selector`, if any;
//! 2. the fixed candidates [`CANDIDATE_SELECTORS`];
//! 3. `body`;
//! 4. the whole document.
//!
//! Inside the chosen region, elements matching `detail.exclude_selectors`
//! are skipped together with their subtree, as are `script`, `style`,
//! `noscript` and `template`. When `detail.text_selectors` is set only the
//! text of matching elements inside the region is collected. The result is
//! one whitespace-collapsed string.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::config::DetailConfig;
use crate::listing::collapse_whitespace;

/// Region candidates tried after the configured main selector.
pub const CANDIDATE_SELECTORS: [&str; 7] = [
    "main",
    "article",
    "[role=main]",
    "#content",
    ".content",
    ".main-content",
    "#main",
];

const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// The page yielded no usable text. The item is classified as unmatched
/// and not retried.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("no text extracted from page")]
    Empty,
}

fn parse_selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::InvalidSelector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn parse_all(selectors: &[String]) -> Result<Vec<Selector>, ExtractionError> {
    selectors.iter().map(|css| parse_selector(css)).collect()
}

#[derive(Debug)]
pub struct ContentExtractor {
    regions: Vec<Selector>,
    text_selectors: Vec<Selector>,
    exclude: Vec<Selector>,
}

impl ContentExtractor {
    pub fn new(config: &DetailConfig) -> Result<Self, ExtractionError> {
        let mut regions = Vec::with_capacity(CANDIDATE_SELECTORS.len() + 2);
        if let Some(main) = config.main_selector.as_deref() {
            regions.push(parse_selector(main)?);
        }
        for css in CANDIDATE_SELECTORS.iter().chain(std::iter::once(&"body")) {
            regions.push(parse_selector(css)?);
        }

        Ok(Self {
            regions,
            text_selectors: parse_all(&config.text_selectors)?,
            exclude: parse_all(&config.exclude_selectors)?,
        })
    }

    /// Extract the normalized text of `html`.
    pub fn extract(&self, html: &str) -> Result<String, ExtractionError> {
        let document = Html::parse_document(html);

        for selector in &self.regions {
            let Some(region) = document.select(selector).next() else {
                continue;
            };
            if self.is_excluded(region) {
                continue;
            }
            let text = self.region_text(region);
            if !text.is_empty() {
                return Ok(text);
            }
        }

        let text = self.region_text(document.root_element());
        if text.is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(text)
    }

    fn region_text(&self, region: ElementRef<'_>) -> String {
        let mut out = String::new();
        if self.text_selectors.is_empty() {
            self.collect_text(region, &mut out);
        } else {
            self.collect_selected(region, &mut out);
        }
        collapse_whitespace(&out)
    }

    fn is_excluded(&self, element: ElementRef<'_>) -> bool {
        SKIPPED_TAGS.contains(&element.value().name())
            || self.exclude.iter().any(|selector| selector.matches(&element))
    }

    fn collect_text(&self, element: ElementRef<'_>, out: &mut String) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                out.push_str(text);
                out.push(' ');
            } else if let Some(child) = ElementRef::wrap(child) {
                if !self.is_excluded(child) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Collect the text of elements matching `text_selectors`, in document
    /// order. A matched element's subtree is not searched again.
    fn collect_selected(&self, element: ElementRef<'_>, out: &mut String) {
        for child in element.children().filter_map(ElementRef::wrap) {
            if self.is_excluded(child) {
                continue;
            }
            if self.text_selectors.iter().any(|s| s.matches(&child)) {
                self.collect_text(child, out);
                out.push(' ');
            } else {
                self.collect_selected(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(&DetailConfig::default()).unwrap()
    }

    #[test]
    fn navigation_text_is_removed_entirely() {
        let html = r#"
            <html><body>
              <nav>Home | Catalog | Contacts</nav>
              <main>
                <ul class="breadcrumb"><li>Home</li><li>Catalog</li></ul>
                <h1>Delivery of   laptops</h1>
                <p>Quantity: 40</p>
                <button>Subscribe</button>
                <script>var tracking = "Catalog";</script>
              </main>
            </body></html>
        "#;
        let text = extractor().extract(html).unwrap();
        assert_eq!(text, "Delivery of laptops Quantity: 40");
        assert!(!text.contains("Home"));
        assert!(!text.contains("Catalog"));
    }

    #[test]
    fn configured_selector_wins_over_candidates() {
        let config = DetailConfig {
            main_selector: Some("#lot".into()),
            ..DetailConfig::default()
        };
        let html = r#"<body><main>Generic</main><div id="lot">Specific lot text</div></body>"#;
        let text = ContentExtractor::new(&config).unwrap().extract(html).unwrap();
        assert_eq!(text, "Specific lot text");
    }

    #[test]
    fn empty_region_falls_through_to_body() {
        let html = r#"<body><article>   </article><div>Body text only</div></body>"#;
        assert_eq!(extractor().extract(html).unwrap(), "Body text only");
    }

    #[test]
    fn text_selectors_limit_collected_text() {
        let config = DetailConfig {
            text_selectors: vec![".field".into()],
            ..DetailConfig::default()
        };
        let html = r#"
            <main>
              <div class="label">Ignored label</div>
              <div class="field">First <b>value</b></div>
              <div><span class="field">Second</span></div>
            </main>
        "#;
        let text = ContentExtractor::new(&config).unwrap().extract(html).unwrap();
        assert_eq!(text, "First value Second");
    }

    #[test]
    fn blank_page_is_an_error() {
        let html = "<html><body><nav>Menu</nav><script>x()</script></body></html>";
        assert!(matches!(extractor().extract(html), Err(ExtractionError::Empty)));
    }

    #[test]
    fn invalid_selector_is_an_error() {
        let config = DetailConfig {
            exclude_selectors: vec!["..bad".into()],
            ..DetailConfig::default()
        };
        assert!(matches!(
            ContentExtractor::new(&config),
            Err(ExtractionError::InvalidSelector { .. })
        ));
    }
}
