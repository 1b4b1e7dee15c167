//! Source dispatch, bounded-parallel runs and the run summary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{error, info, instrument, warn};

use super::{
    AdapterClient, FailureKind, MarkupConnector, SchemaConnector, SourceOutcome, merge_records,
};
use crate::article::ArticleRecord;
use crate::cache::CacheStore;
use crate::config::{ConnectorSpec, IngestConfig, Settings, SourceDefinition};
use crate::extract::ExtractionEngine;
use crate::fetch::{ClientConfig, RateLimitConfig, ResilientClient};

/// One failed source in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    /// Source name.
    pub source: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

/// Observability summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Sources a fetch was started for.
    pub sources_attempted: usize,
    /// Sources that failed, with reason. A source may fail after yielding
    /// some records.
    pub failed: Vec<SourceFailure>,
    /// Markup sources where at least one page matched no container.
    pub empty_sources: Vec<String>,
    /// Sources never started, or stopped between pages, because the run was
    /// cancelled.
    pub cancelled: Vec<String>,
    /// Records in the merged output.
    pub records_produced: usize,
    /// Cache hits over lookups during the run.
    pub cache_hit_ratio: f64,
}

impl RunSummary {
    /// True when sources were attempted and every one of them failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.sources_attempted > 0 && self.failed.len() == self.sources_attempted
    }
}

/// Merged records plus the summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRun {
    /// Deduplicated records, newest first.
    pub records: Vec<ArticleRecord>,
    /// Run summary.
    pub summary: RunSummary,
}

/// Dispatches each source to its connector path and reconciles the results.
#[derive(Debug, Clone)]
pub struct ConnectorRouter {
    client: ResilientClient,
    cache: Arc<CacheStore>,
    markup: MarkupConnector,
    schema: SchemaConnector,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
}

impl ConnectorRouter {
    /// Builds a router over an existing client and cache.
    #[must_use]
    pub fn new(client: ResilientClient, cache: Arc<CacheStore>, settings: &Settings) -> Self {
        let engine = Arc::new(ExtractionEngine::new(
            &settings.keywords,
            settings.require_keyword_match,
        ));
        let adapter = AdapterClient::new(
            client.clone(),
            Arc::clone(&cache),
            Duration::from_secs(settings.token_cache_ttl_secs),
        );
        let page_ttl = Duration::from_secs(settings.page_cache_ttl_secs);
        let cancel = Arc::new(AtomicBool::new(false));
        let markup = MarkupConnector::new(
            client.clone(),
            Arc::clone(&cache),
            Arc::clone(&engine),
            page_ttl,
        )
        .with_cancel(Arc::clone(&cancel));
        let schema = SchemaConnector::new(
            client.clone(),
            Arc::clone(&cache),
            adapter,
            engine,
            page_ttl,
        )
        .with_cancel(Arc::clone(&cancel));
        Self {
            client,
            cache,
            markup,
            schema,
            concurrency: settings.concurrency.max(1),
            cancel,
        }
    }

    /// Builds the client from `config.settings`, binds the cache and
    /// applies per-source rate overrides.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the HTTP client cannot be built.
    pub fn from_config(
        config: &IngestConfig,
        cache: Arc<CacheStore>,
    ) -> Result<Self, reqwest::Error> {
        let settings = &config.settings;
        let client = ResilientClient::new(ClientConfig {
            retry: settings.retry_policy(),
            timeout: settings.request_timeout(),
            rate_limit: settings.rate_limit(),
            breaker: settings.breaker(),
        })?;
        let router = Self::new(client, cache, settings);
        router.configure(&config.sources);
        Ok(router)
    }

    /// Applies per-source token bucket overrides.
    pub fn configure(&self, sources: &[SourceDefinition]) {
        let limiter = self.client.rate_limiter();
        let defaults = limiter.defaults();
        for source in sources {
            let descriptor = &source.descriptor;
            if descriptor.rate_capacity.is_none() && descriptor.rate_refill_per_sec.is_none() {
                continue;
            }
            limiter.configure(
                &descriptor.name,
                RateLimitConfig {
                    capacity: descriptor.rate_capacity.unwrap_or(defaults.capacity),
                    refill_per_sec: descriptor
                        .rate_refill_per_sec
                        .unwrap_or(defaults.refill_per_sec),
                    max_wait: defaults.max_wait,
                },
            );
        }
    }

    /// The shared resilient client.
    #[must_use]
    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Flag that stops the run from starting further sources, or fetching
    /// further pages of started ones, once set.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Ingests one source through the path its kind selects.
    pub async fn ingest(&self, source: &SourceDefinition) -> SourceOutcome {
        match &source.connector {
            ConnectorSpec::Markup(spec) => self.markup.ingest(&source.descriptor, spec).await,
            ConnectorSpec::Schema(spec) => self.schema.ingest(&source.descriptor, spec).await,
        }
    }

    /// Ingests every source with bounded parallelism, then deduplicates and
    /// orders the records.
    ///
    /// A failing source is recorded in the summary; it never aborts the run.
    #[instrument(skip_all, fields(sources = sources.len(), concurrency = self.concurrency))]
    pub async fn run(&self, sources: &[SourceDefinition]) -> IngestRun {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(sources.len());
        let mut names_in_flight = Vec::with_capacity(sources.len());
        let mut summary = RunSummary::default();

        for (index, source) in sources.iter().enumerate() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("worker pool closed, not starting remaining sources");
                    summary.cancelled.extend(names(&sources[index..]));
                    break;
                }
            };
            if self.cancel.load(Ordering::SeqCst) {
                info!(
                    remaining = sources.len() - index,
                    "run cancelled, not starting remaining sources"
                );
                summary.cancelled.extend(names(&sources[index..]));
                break;
            }

            let router = self.clone();
            let source = source.clone();
            names_in_flight.push(source.name().to_string());
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                router.ingest(&source).await
            }));
        }
        summary.sources_attempted = handles.len();

        let mut collected = Vec::new();
        for (name, joined) in names_in_flight.into_iter().zip(join_all(handles).await) {
            absorb(&mut summary, &mut collected, name, joined);
        }

        let records = merge_records(collected);
        summary.records_produced = records.len();
        summary.cache_hit_ratio = self.cache.hit_ratio();

        info!(
            attempted = summary.sources_attempted,
            failed = summary.failed.len(),
            records = summary.records_produced,
            "run complete"
        );
        IngestRun { records, summary }
    }
}

/// Folds one source's task result into the summary and record pool.
fn absorb(
    summary: &mut RunSummary,
    collected: &mut Vec<ArticleRecord>,
    name: String,
    joined: Result<SourceOutcome, JoinError>,
) {
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(source = %name, error = %e, "source task died");
            summary.failed.push(SourceFailure {
                source: name,
                kind: FailureKind::Internal,
                message: format!("source task died: {e}"),
            });
            return;
        }
    };

    if outcome.empty_pages > 0 {
        summary.empty_sources.push(name.clone());
    }
    if outcome.cancelled {
        info!(source = %name, partial_records = outcome.records.len(), "source cancelled");
        summary.cancelled.push(name.clone());
    }
    if let Some(error) = outcome.failure {
        warn!(
            source = %name,
            kind = ?error.kind(),
            error = %error,
            partial_records = outcome.records.len(),
            "source failed"
        );
        summary.failed.push(SourceFailure {
            source: name,
            kind: error.kind(),
            message: error.to_string(),
        });
    } else if !outcome.cancelled {
        info!(source = %name, records = outcome.records.len(), "source ingested");
    }
    collected.extend(outcome.records);
}

fn names(sources: &[SourceDefinition]) -> impl Iterator<Item = String> + '_ {
    sources.iter().map(|s| s.name().to_string())
}
