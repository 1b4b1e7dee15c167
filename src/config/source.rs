//! Source descriptors and per-source connector definitions.
//!
//! A source is dispatched on its [`ConnectorKind`] tag: `markup` sources carry
//! a [`SelectorConfig`] for the extraction engine, `schema` sources carry an
//! [`ApiConnectorSpec`] for the paginated API path.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::extract::ExtractionRules;

/// Which ingestion path a source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    /// HTML scraping with declarative selectors.
    Markup,
    /// Declarative API connector with pagination.
    Schema,
}

impl ConnectorKind {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Schema => "schema",
        }
    }
}

/// Identity of a configured source. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    /// Unique source name.
    pub name: String,
    /// Base URL; relative links are joined against it.
    pub base_url: Url,
    /// Country code (free-form, e.g. "US").
    pub country: String,
    /// Language code (free-form, e.g. "en").
    pub language: String,
    /// Category label (e.g. "markets").
    pub category: String,
    /// Connector dispatch tag.
    pub kind: ConnectorKind,
    /// Optional per-source token bucket override: capacity.
    pub rate_capacity: Option<u32>,
    /// Optional per-source token bucket override: tokens per second.
    pub rate_refill_per_sec: Option<f64>,
}

impl SourceDescriptor {
    /// Creates a descriptor with empty country/language/category and no
    /// rate override.
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: Url, kind: ConnectorKind) -> Self {
        Self {
            name: name.into(),
            base_url,
            country: String::new(),
            language: String::new(),
            category: String::new(),
            kind,
            rate_capacity: None,
            rate_refill_per_sec: None,
        }
    }
}

/// Declarative selector rules for one markup source.
///
/// Only `container` is required. An empty selector means the field is
/// omitted from records, never inferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Selector delimiting one candidate article.
    pub container: String,
    /// Headline selector, scoped to the container.
    pub headline: String,
    /// Summary selector, scoped to the container.
    pub summary: String,
    /// Link selector, scoped to the container (`href` is read).
    pub link: String,
    /// Date selector, scoped to the container (`datetime` preferred over text).
    pub date: String,
}

/// Pagination strategy for schema sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStrategy {
    /// `page=1,2,3...`
    #[default]
    Page,
    /// `offset=0,n,2n...`
    Offset,
}

/// Dot paths locating article fields inside one API record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    /// Headline field path.
    pub headline: String,
    /// Summary field path.
    pub summary: String,
    /// Link field path.
    pub link: String,
    /// Published date field path (string or unix seconds).
    pub published: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            headline: "title".to_string(),
            summary: "description".to_string(),
            link: "url".to_string(),
            published: "published_at".to_string(),
        }
    }
}

/// Declarative API connector definition for one schema source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConnectorSpec {
    /// Adapter endpoint returning a bearer credential; no auth when absent.
    pub auth_endpoint: Option<String>,
    /// Adapter endpoint enriching raw record batches; passthrough when absent.
    pub transform_endpoint: Option<String>,
    /// How pages advance.
    pub pagination: PaginationStrategy,
    /// Records requested per page.
    pub page_size: u32,
    /// Hard cap on pages fetched per run.
    pub max_pages: u32,
    /// Dot path to the record array in the page body (empty = body is the array).
    pub records_path: String,
    /// Field mapping inside each record.
    pub fields: FieldMap,
    /// Query parameter carrying the page number.
    pub page_param: String,
    /// Query parameter carrying the page size (page strategy).
    pub page_size_param: String,
    /// Query parameter carrying the offset.
    pub offset_param: String,
    /// Query parameter carrying the limit (offset strategy).
    pub limit_param: String,
}

impl Default for ApiConnectorSpec {
    fn default() -> Self {
        Self {
            auth_endpoint: None,
            transform_endpoint: None,
            pagination: PaginationStrategy::Page,
            page_size: 50,
            max_pages: 10,
            records_path: String::new(),
            fields: FieldMap::default(),
            page_param: "page".to_string(),
            page_size_param: "page_size".to_string(),
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
        }
    }
}

/// Markup connector data: selector rules (raw and compiled) and page paths.
#[derive(Debug, Clone)]
pub struct MarkupSpec {
    /// Raw selector strings as configured.
    pub selectors: SelectorConfig,
    /// Selectors compiled at load time.
    pub rules: ExtractionRules,
    /// Absolute page URLs to scrape, in order.
    pub pages: Vec<Url>,
}

/// Connector data attached to a source, matching its [`ConnectorKind`].
#[derive(Debug, Clone)]
pub enum ConnectorSpec {
    /// Markup path.
    Markup(MarkupSpec),
    /// Schema path.
    Schema(ApiConnectorSpec),
}

/// A fully validated source: identity plus connector definition.
#[derive(Debug, Clone)]
pub struct SourceDefinition {
    /// Source identity.
    pub descriptor: SourceDescriptor,
    /// Path-specific definition.
    pub connector: ConnectorSpec,
}

impl SourceDefinition {
    /// Shortcut for the source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}
