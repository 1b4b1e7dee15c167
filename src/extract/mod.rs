//! Declarative HTML extraction.
//!
//! One generic algorithm parameterized by per-source [`ExtractionRules`]:
//! every node matching the container selector is a candidate article, and
//! the headline, summary, link and date selectors are evaluated *inside*
//! that container. A candidate without both a headline and a usable link is
//! dropped as noise. Fields whose selector is empty are omitted, never
//! inferred from surrounding markup.
//!
//! Extraction is synchronous and pure over the parsed document: running it
//! twice on the same document and rules yields the same records.

mod date;
mod link;
mod text;

pub use date::{from_unix_seconds, parse_published};
pub use link::{is_off_domain, resolve_link};
pub use text::{KeywordMatcher, non_empty_text, normalize_text};

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, trace};

use crate::article::{ArticleRecord, PublishedAt};
use crate::config::{ConfigError, SelectorConfig, SourceDescriptor};

/// Fallback for link selectors that match a wrapper rather than the anchor.
#[allow(clippy::expect_used)]
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("anchor selector is valid") // Static pattern, safe to panic
});

/// Errors raised while turning a response body into a document.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The body is not something an HTML parser can meaningfully read.
    #[error("unparsable document from {url}: {reason}")]
    ParseFailure {
        /// Page URL.
        url: String,
        /// Why the body was rejected.
        reason: String,
    },
}

impl ExtractError {
    fn parse_failure(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseFailure {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Compiled selectors for one markup source.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    container: Selector,
    headline: Option<Selector>,
    summary: Option<Selector>,
    link: Option<Selector>,
    date: Option<Selector>,
}

impl ExtractionRules {
    /// Compiles raw selector strings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingContainer`] when the container selector is blank
    /// - [`ConfigError::InvalidSelector`] when any non-blank selector is not valid CSS
    pub fn compile(source_name: &str, selectors: &SelectorConfig) -> Result<Self, ConfigError> {
        if selectors.container.trim().is_empty() {
            return Err(ConfigError::MissingContainer {
                source_name: source_name.to_string(),
            });
        }
        let container = compile_one(source_name, "container", &selectors.container)?
            .ok_or_else(|| ConfigError::MissingContainer {
                source_name: source_name.to_string(),
            })?;

        Ok(Self {
            container,
            headline: compile_one(source_name, "headline", &selectors.headline)?,
            summary: compile_one(source_name, "summary", &selectors.summary)?,
            link: compile_one(source_name, "link", &selectors.link)?,
            date: compile_one(source_name, "date", &selectors.date)?,
        })
    }
}

fn compile_one(
    source_name: &str,
    field: &'static str,
    raw: &str,
) -> Result<Option<Selector>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Selector::parse(raw)
        .map(Some)
        .map_err(|e| ConfigError::InvalidSelector {
            source_name: source_name.to_string(),
            field,
            selector: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Result of extracting one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageExtraction {
    /// Nodes that matched the container selector.
    pub containers: usize,
    /// Records kept, in document order.
    pub records: Vec<ArticleRecord>,
}

/// Turns documents into [`ArticleRecord`]s according to per-source rules.
#[derive(Debug, Clone, Default)]
pub struct ExtractionEngine {
    keywords: KeywordMatcher,
    require_keyword_match: bool,
}

impl ExtractionEngine {
    /// Creates an engine tagging records with `keywords`.
    ///
    /// With `require_keyword_match`, records matching no keyword are dropped.
    /// An empty keyword list never drops anything.
    #[must_use]
    pub fn new(keywords: &[String], require_keyword_match: bool) -> Self {
        Self {
            keywords: KeywordMatcher::new(keywords),
            require_keyword_match,
        }
    }

    /// Parses `body` and extracts it.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ParseFailure`] for bodies that are empty,
    /// contain NUL bytes or have no markup at all.
    pub fn extract_page(
        &self,
        page_url: &str,
        body: &str,
        rules: &ExtractionRules,
        source: &SourceDescriptor,
        fetched_at: DateTime<Utc>,
    ) -> Result<PageExtraction, ExtractError> {
        let document = parse_document(page_url, body)?;
        Ok(self.run(&document, rules, source, fetched_at))
    }

    /// Extracts records from an already parsed document.
    ///
    /// Zero matching containers yields an empty vector, not an error.
    #[must_use]
    pub fn extract(
        &self,
        document: &Html,
        rules: &ExtractionRules,
        source: &SourceDescriptor,
        fetched_at: DateTime<Utc>,
    ) -> Vec<ArticleRecord> {
        self.run(document, rules, source, fetched_at).records
    }

    /// Finishes a record built outside the markup path: keyword tags and the
    /// keyword filter. Returns `None` when the filter drops it.
    #[must_use]
    pub fn finalize(&self, mut record: ArticleRecord) -> Option<ArticleRecord> {
        let keywords = {
            let summary = record.summary.as_deref().unwrap_or_default();
            self.keywords.matches(&[&record.headline, summary])
        };
        if self.require_keyword_match && !self.keywords.is_empty() && keywords.is_empty() {
            trace!(headline = %record.headline, "dropped: no keyword match");
            return None;
        }
        record.keywords = keywords;
        Some(record)
    }

    fn run(
        &self,
        document: &Html,
        rules: &ExtractionRules,
        source: &SourceDescriptor,
        fetched_at: DateTime<Utc>,
    ) -> PageExtraction {
        let mut extraction = PageExtraction::default();

        for container in document.select(&rules.container) {
            extraction.containers += 1;
            let Some(record) = self.candidate(container, rules, source, fetched_at) else {
                continue;
            };
            if let Some(record) = self.finalize(record) {
                extraction.records.push(record);
            }
        }

        debug!(
            source = %source.name,
            containers = extraction.containers,
            kept = extraction.records.len(),
            "extracted page"
        );
        extraction
    }

    #[allow(clippy::unused_self)]
    fn candidate(
        &self,
        container: ElementRef<'_>,
        rules: &ExtractionRules,
        source: &SourceDescriptor,
        fetched_at: DateTime<Utc>,
    ) -> Option<ArticleRecord> {
        let headline = rules
            .headline
            .as_ref()
            .and_then(|s| first_match(container, s))
            .and_then(|el| non_empty_text(&element_text(el)));
        let link = rules
            .link
            .as_ref()
            .and_then(|s| first_match(container, s))
            .and_then(href_of)
            .and_then(|href| resolve_link(&source.base_url, href));

        let (Some(headline), Some(link)) = (headline, link) else {
            trace!(source = %source.name, "dropped container without headline and link");
            return None;
        };

        let summary = rules
            .summary
            .as_ref()
            .and_then(|s| first_match(container, s))
            .and_then(|el| non_empty_text(&element_text(el)));
        let published = rules
            .date
            .as_ref()
            .and_then(|s| first_match(container, s))
            .map_or(PublishedAt::Unknown, date_of);

        Some(ArticleRecord {
            headline,
            summary,
            off_domain: is_off_domain(&source.base_url, &link),
            link: link.to_string(),
            published,
            source: source.name.clone(),
            country: source.country.clone(),
            language: source.language.clone(),
            category: source.category.clone(),
            keywords: Vec::new(),
            fetched_at,
        })
    }
}

/// Parses a response body, rejecting bodies that cannot be HTML.
///
/// # Errors
///
/// Returns [`ExtractError::ParseFailure`] for empty bodies, bodies with NUL
/// bytes and bodies without a single tag.
pub fn parse_document(page_url: &str, body: &str) -> Result<Html, ExtractError> {
    if body.trim().is_empty() {
        return Err(ExtractError::parse_failure(page_url, "empty body"));
    }
    if body.contains('\0') {
        return Err(ExtractError::parse_failure(page_url, "binary content"));
    }
    if !body.contains('<') {
        return Err(ExtractError::parse_failure(page_url, "no markup found"));
    }
    Ok(Html::parse_document(body))
}

fn first_match<'a>(container: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    container.select(selector).next()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn href_of(element: ElementRef<'_>) -> Option<&str> {
    element
        .value()
        .attr("href")
        .or_else(|| element.select(&ANCHOR).next()?.value().attr("href"))
}

fn date_of(element: ElementRef<'_>) -> PublishedAt {
    if let Some(value) = element.value().attr("datetime")
        && !value.trim().is_empty()
    {
        return parse_published(value);
    }
    parse_published(&element_text(element))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use url::Url;

    use super::*;
    use crate::config::ConnectorKind;

    fn source() -> SourceDescriptor {
        let mut source = SourceDescriptor::new(
            "wire",
            Url::parse("https://www.example.com/markets/").unwrap(),
            ConnectorKind::Markup,
        );
        source.country = "US".into();
        source.language = "en".into();
        source.category = "markets".into();
        source
    }

    fn rules() -> ExtractionRules {
        ExtractionRules::compile(
            "wire",
            &SelectorConfig {
                container: "article.card".into(),
                headline: "h2".into(),
                summary: "p.teaser".into(),
                link: "a".into(),
                date: "time".into(),
            },
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    const LISTING: &str = r#"
        <html><body>
          <article class="card">
            <h2>  Rates   rise again </h2>
            <p class="teaser">Central bank moves.</p>
            <a href="/story/1">Read</a>
            <time datetime="2025-03-04T10:00:00Z">Yesterday</time>
          </article>
          <article class="card">
            <h2>Only a headline</h2>
          </article>
          <article class="card">
            <a href="https://partner.net/story/2">Link without headline</a>
          </article>
          <article class="card">
            <h2>Partner piece on earnings</h2>
            <div class="wrap"><a href="https://partner.net/story/3#top">x</a></div>
            <time>sometime soon</time>
          </article>
        </body></html>
    "#;

    // ==================== Rule Compilation ====================

    #[test]
    fn test_compile_requires_container() {
        let err = ExtractionRules::compile("wire", &SelectorConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingContainer { .. }));
    }

    #[test]
    fn test_compile_rejects_bad_selector() {
        let selectors = SelectorConfig {
            container: "article".into(),
            headline: "h2[".into(),
            ..SelectorConfig::default()
        };
        let err = ExtractionRules::compile("wire", &selectors).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSelector { field: "headline", .. }
        ));
    }

    // ==================== Extraction ====================

    #[test]
    fn test_extract_keeps_only_complete_candidates() {
        let document = Html::parse_document(LISTING);
        let engine = ExtractionEngine::default();
        let records = engine.extract(&document, &rules(), &source(), now());

        let headlines: Vec<_> = records.iter().map(|r| r.headline.as_str()).collect();
        assert_eq!(headlines, vec!["Rates rise again", "Partner piece on earnings"]);
    }

    #[test]
    fn test_extract_fields_and_descriptor_enrichment() {
        let document = Html::parse_document(LISTING);
        let records = ExtractionEngine::default().extract(&document, &rules(), &source(), now());

        let first = &records[0];
        assert_eq!(first.link, "https://www.example.com/story/1");
        assert!(!first.off_domain);
        assert_eq!(first.summary.as_deref(), Some("Central bank moves."));
        assert_eq!(
            first.published,
            PublishedAt::Parsed(Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap())
        );
        assert_eq!(first.country, "US");
        assert_eq!(first.category, "markets");
        assert_eq!(first.fetched_at, now());

        let partner = &records[1];
        assert_eq!(partner.link, "https://partner.net/story/3");
        assert!(partner.off_domain);
        assert_eq!(partner.summary, None);
        assert_eq!(partner.published, PublishedAt::Unparsed("sometime soon".into()));
    }

    #[test]
    fn test_zero_containers_is_empty_not_error() {
        let extraction = ExtractionEngine::default()
            .extract_page(
                "https://www.example.com/markets/",
                "<html><body><div>redesigned</div></body></html>",
                &rules(),
                &source(),
                now(),
            )
            .unwrap();
        assert_eq!(extraction.containers, 0);
        assert!(extraction.records.is_empty());
    }

    #[test]
    fn test_extract_is_idempotent() {
        let document = Html::parse_document(LISTING);
        let engine = ExtractionEngine::new(&["earnings".into()], false);
        let first = engine.extract(&document, &rules(), &source(), now());
        let second = engine.extract(&document, &rules(), &source(), now());
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_selector_is_not_inferred() {
        let selectors = SelectorConfig {
            container: "article.card".into(),
            headline: "h2".into(),
            link: "a".into(),
            ..SelectorConfig::default()
        };
        let rules = ExtractionRules::compile("wire", &selectors).unwrap();
        let document = Html::parse_document(LISTING);
        let records = ExtractionEngine::default().extract(&document, &rules, &source(), now());
        assert!(records.iter().all(|r| r.summary.is_none()));
        assert!(records.iter().all(|r| r.published == PublishedAt::Unknown));
    }

    // ==================== Keywords ====================

    #[test]
    fn test_keyword_tagging_and_filter() {
        let document = Html::parse_document(LISTING);

        let tagging = ExtractionEngine::new(&["Earnings".into()], false);
        let records = tagging.extract(&document, &rules(), &source(), now());
        assert_eq!(records.len(), 2);
        assert!(records[0].keywords.is_empty());
        assert_eq!(records[1].keywords, vec!["earnings".to_string()]);

        let filtering = ExtractionEngine::new(&["earnings".into()], true);
        let records = filtering.extract(&document, &rules(), &source(), now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].headline, "Partner piece on earnings");
    }

    // ==================== Document Parsing ====================

    #[test]
    fn test_parse_document_rejects_non_markup() {
        for body in ["", "   ", "{\"json\": true}", "<html>\0</html>"] {
            let err = parse_document("https://example.com", body).unwrap_err();
            assert!(matches!(err, ExtractError::ParseFailure { .. }), "{body:?}");
        }
        assert!(parse_document("https://example.com", "<p>ok</p>").is_ok());
    }
}
