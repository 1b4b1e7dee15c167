//! Markup path: fetch listing pages and run the extraction engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::{SourceError, SourceOutcome};
use crate::cache::CacheStore;
use crate::config::{MarkupSpec, SourceDescriptor};
use crate::extract::ExtractionEngine;
use crate::fetch::{RequestOptions, ResilientClient};

/// Scrapes markup sources page by page.
#[derive(Debug, Clone)]
pub struct MarkupConnector {
    client: ResilientClient,
    cache: Arc<CacheStore>,
    engine: Arc<ExtractionEngine>,
    page_ttl: Duration,
    cancel: Arc<AtomicBool>,
}

impl MarkupConnector {
    /// Creates a connector. Page bodies are cached for `page_ttl` so a source
    /// is not re-scraped within one polling interval.
    #[must_use]
    pub fn new(
        client: ResilientClient,
        cache: Arc<CacheStore>,
        engine: Arc<ExtractionEngine>,
        page_ttl: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            engine,
            page_ttl,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops before the next page once `cancel` is set.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetches and extracts every configured page, in order.
    ///
    /// Stops at the first failing page; records of earlier pages are kept.
    /// A page whose container selector matches nothing is logged as markup
    /// drift and counted, never treated as a failure. A cancelled run stops
    /// before the next page and keeps what was collected.
    #[instrument(skip_all, fields(source = %source.name, pages = spec.pages.len()))]
    pub async fn ingest(&self, source: &SourceDescriptor, spec: &MarkupSpec) -> SourceOutcome {
        let mut outcome = SourceOutcome::default();

        for page in &spec.pages {
            if self.cancel.load(Ordering::SeqCst) {
                info!(page = %page, "run cancelled, not fetching further pages");
                outcome.cancelled = true;
                break;
            }
            let body = match self.fetch_page(&source.name, page.as_str()).await {
                Ok(body) => body,
                Err(error) => {
                    outcome.failure = Some(error);
                    break;
                }
            };

            let extraction = match self.engine.extract_page(
                page.as_str(),
                &body,
                &spec.rules,
                source,
                Utc::now(),
            ) {
                Ok(extraction) => extraction,
                Err(error) => {
                    // Don't serve the same unparsable body again next run.
                    let key = page_key(&source.name, page.as_str());
                    if let Err(cache_error) = self.cache.invalidate(&key).await {
                        debug!(error = %cache_error, "could not drop cached page");
                    }
                    outcome.failure = Some(SourceError::from(error));
                    break;
                }
            };

            if extraction.containers == 0 {
                warn!(
                    source = %source.name,
                    page = %page,
                    container = %spec.selectors.container,
                    "extraction empty: no containers matched (possible markup drift)"
                );
                outcome.empty_pages += 1;
            }
            outcome.records.extend(extraction.records);
        }

        outcome
    }

    async fn fetch_page(&self, source: &str, url: &str) -> Result<String, SourceError> {
        self.cache
            .memoize(&page_key(source, url), self.page_ttl, || async {
                let response = self
                    .client
                    .get(url, &RequestOptions::for_source(source))
                    .await?;
                Ok::<_, SourceError>(response.body)
            })
            .await
    }
}

fn page_key(source: &str, url: &str) -> String {
    format!("page:{source}:{url}")
}
