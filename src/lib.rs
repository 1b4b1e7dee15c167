//! Newswire Core Library
//!
//! Ingests business news from heterogeneous sources into a uniform stream of
//! [`ArticleRecord`]s while surviving the routine failures of scraping and
//! third-party APIs.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`article`] - Article records, link normalization and identity keys
//! - [`config`] - Source configuration loading and load-time validation
//! - [`fetch`] - Resilient HTTP: retry/backoff, circuit breaker, rate limiting
//! - [`cache`] - Networked cache with in-process fallback
//! - [`extract`] - Declarative selector-driven HTML extraction
//! - [`connector`] - Markup/schema routing, adapter services, run summary

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod article;
pub mod cache;
pub mod config;
pub mod connector;
pub mod extract;
pub mod fetch;
mod user_agent;

// Re-export commonly used types
pub use article::{ArticleRecord, PublishedAt};
pub use cache::{CacheBackend, CacheError, CacheStats, CacheStore};
pub use config::{ConfigError, IngestConfig, Settings, SourceDefinition, SourceDescriptor};
pub use connector::{ConnectorRouter, FailureKind, IngestRun, RunSummary, SourceError};
pub use extract::{ExtractionEngine, ExtractionRules};
pub use fetch::{
    CircuitBreakerRegistry, FetchError, RateLimiter, RequestOptions, ResilientClient, RetryPolicy,
};
