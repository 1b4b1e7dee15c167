//! Schema path: paginated API sources described by an [`ApiConnectorSpec`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{AdapterClient, SourceError, SourceOutcome};
use crate::article::{ArticleRecord, PublishedAt};
use crate::cache::CacheStore;
use crate::config::{ApiConnectorSpec, FieldMap, PaginationStrategy, SourceDescriptor};
use crate::extract::{
    ExtractionEngine, from_unix_seconds, is_off_domain, non_empty_text, parse_published,
    resolve_link,
};
use crate::fetch::{RequestOptions, ResilientClient};

/// Secondary field names tried when the configured path yields nothing.
const SUMMARY_FALLBACK: &str = "summary";
const LINK_FALLBACK: &str = "link";
const PUBLISHED_FALLBACK: &str = "publishedAt";

/// One API page as cached: the records after transform, plus the record
/// count the API returned before it.
#[derive(Debug, Serialize, Deserialize)]
struct ApiPage {
    records: Vec<Value>,
    raw_count: usize,
}

/// Pulls records from declarative API connectors.
#[derive(Debug, Clone)]
pub struct SchemaConnector {
    client: ResilientClient,
    cache: Arc<CacheStore>,
    adapter: AdapterClient,
    engine: Arc<ExtractionEngine>,
    page_ttl: Duration,
    cancel: Arc<AtomicBool>,
}

impl SchemaConnector {
    /// Creates a connector. Each page, transform included, is cached for
    /// `page_ttl`.
    #[must_use]
    pub fn new(
        client: ResilientClient,
        cache: Arc<CacheStore>,
        adapter: AdapterClient,
        engine: Arc<ExtractionEngine>,
        page_ttl: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            adapter,
            engine,
            page_ttl,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops pagination before the next page once `cancel` is set.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolves the credential, then walks pages until a short page or the
    /// page cap.
    ///
    /// Pages are merged in pagination order. A failure after the first page
    /// keeps the records already collected and is reported alongside them.
    /// Cancellation is checked before every page; collected records are kept.
    #[instrument(skip_all, fields(source = %source.name))]
    pub async fn ingest(&self, source: &SourceDescriptor, spec: &ApiConnectorSpec) -> SourceOutcome {
        let mut outcome = SourceOutcome::default();

        let token = match &spec.auth_endpoint {
            Some(endpoint) => match self.adapter.token(&source.name, endpoint).await {
                Ok(token) => Some(token),
                Err(error) => {
                    outcome.failure = Some(error);
                    return outcome;
                }
            },
            None => None,
        };

        for index in 0..spec.max_pages {
            if self.cancel.load(Ordering::SeqCst) {
                info!(page = index, "run cancelled, not fetching further pages");
                outcome.cancelled = true;
                break;
            }
            match self.fetch_page(source, spec, token.as_deref(), index).await {
                Ok((records, raw_count)) => {
                    outcome.records.extend(records);
                    if raw_count < spec.page_size as usize {
                        debug!(page = index, raw_count, "short page, end of data");
                        break;
                    }
                }
                Err(error) => {
                    outcome.failure = Some(error);
                    break;
                }
            }
            if index + 1 == spec.max_pages {
                debug!(max_pages = spec.max_pages, "page cap reached");
            }
        }

        outcome
    }

    /// Fetches one page; returns mapped records and the raw record count used
    /// for end-of-data detection.
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        spec: &ApiConnectorSpec,
        token: Option<&str>,
        index: u32,
    ) -> Result<(Vec<ArticleRecord>, usize), SourceError> {
        let mut options = RequestOptions::for_source(&source.name);
        for (key, value) in page_query(spec, index) {
            options = options.query(key, value);
        }
        if let Some(token) = token {
            options = options.bearer(token);
        }

        let page: ApiPage = self
            .cache
            .memoize(&page_key(&source.name, index), self.page_ttl, || async {
                let response = self.client.get(source.base_url.as_str(), &options).await?;
                let body: Value = response.json().map_err(|e| {
                    SourceError::schema(&source.name, format!("page {}: {e}", index + 1))
                })?;
                let raw = lookup(&body, &spec.records_path)
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        SourceError::schema(
                            &source.name,
                            format!("no record array at '{}'", spec.records_path),
                        )
                    })?
                    .clone();
                let raw_count = raw.len();

                let records = match &spec.transform_endpoint {
                    Some(endpoint) => {
                        self.adapter
                            .transform(&source.name, endpoint, token, raw)
                            .await?
                    }
                    None => raw,
                };
                Ok::<_, SourceError>(ApiPage { records, raw_count })
            })
            .await?;

        let fetched_at = Utc::now();
        let records = page
            .records
            .iter()
            .filter_map(|value| map_record(value, &spec.fields, source, fetched_at))
            .filter_map(|record| self.engine.finalize(record))
            .collect();
        Ok((records, page.raw_count))
    }
}

fn page_key(source: &str, index: u32) -> String {
    format!("api:{source}:{index}")
}

/// Query pairs for the zero-based page `index`.
fn page_query(spec: &ApiConnectorSpec, index: u32) -> Vec<(String, String)> {
    let size = spec.page_size.to_string();
    match spec.pagination {
        PaginationStrategy::Page => vec![
            (spec.page_param.clone(), (u64::from(index) + 1).to_string()),
            (spec.page_size_param.clone(), size),
        ],
        PaginationStrategy::Offset => vec![
            (
                spec.offset_param.clone(),
                (u64::from(index) * u64::from(spec.page_size)).to_string(),
            ),
            (spec.limit_param.clone(), size),
        ],
    }
}

/// Follows a dot path; numeric segments index into arrays. An empty path is
/// the value itself.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

fn text_at(value: &Value, path: &str, fallback: &str) -> Option<String> {
    let as_text = |path: &str| lookup(value, path).and_then(Value::as_str).and_then(non_empty_text);
    as_text(path).or_else(|| if path == fallback { None } else { as_text(fallback) })
}

fn published_at(value: &Value, path: &str) -> PublishedAt {
    let found = lookup(value, path)
        .filter(|v| !v.is_null())
        .or_else(|| lookup(value, PUBLISHED_FALLBACK).filter(|v| !v.is_null()));
    match found {
        Some(Value::String(text)) => parse_published(text),
        Some(Value::Number(number)) => number
            .as_i64()
            .map_or(PublishedAt::Unparsed(number.to_string()), from_unix_seconds),
        Some(other) => PublishedAt::Unparsed(other.to_string()),
        None => PublishedAt::Unknown,
    }
}

/// Maps one API record; `None` when headline or link is missing.
fn map_record(
    value: &Value,
    fields: &FieldMap,
    source: &SourceDescriptor,
    fetched_at: DateTime<Utc>,
) -> Option<ArticleRecord> {
    let headline = text_at(value, &fields.headline, &fields.headline)?;
    let link = text_at(value, &fields.link, LINK_FALLBACK)
        .and_then(|href| resolve_link(&source.base_url, &href))?;

    Some(ArticleRecord {
        headline,
        summary: text_at(value, &fields.summary, SUMMARY_FALLBACK),
        off_domain: is_off_domain(&source.base_url, &link),
        link: link.to_string(),
        published: published_at(value, &fields.published),
        source: source.name.clone(),
        country: source.country.clone(),
        language: source.language.clone(),
        category: source.category.clone(),
        keywords: Vec::new(),
        fetched_at,
    })
}
