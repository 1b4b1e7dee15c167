//! Connector routing: markup and schema ingestion paths behind one router.
//!
//! A [`SourceDefinition`](crate::config::SourceDefinition) carries a kind
//! tag; [`ConnectorRouter::ingest`] matches on it and hands the source to
//! either the [`MarkupConnector`] or the [`SchemaConnector`]. Both paths go
//! through the same [`ResilientClient`](crate::fetch::ResilientClient), so
//! retry, circuit and rate policies apply uniformly, adapter calls included.
//!
//! Per-source failures stop at the router: they are recorded in the
//! [`RunSummary`] and the run continues with the remaining sources.

mod adapter;
mod error;
mod markup;
mod merge;
mod router;
mod schema;

pub use adapter::AdapterClient;
pub use error::{FailureKind, SourceError};
pub use markup::MarkupConnector;
pub use merge::merge_records;
pub use router::{ConnectorRouter, IngestRun, RunSummary, SourceFailure};
pub use schema::SchemaConnector;

use crate::article::ArticleRecord;

/// What one source yielded.
#[derive(Debug, Default)]
pub struct SourceOutcome {
    /// Records in page order. May be partial when `failure` is set.
    pub records: Vec<ArticleRecord>,
    /// Why the source stopped early, if it did.
    pub failure: Option<SourceError>,
    /// Markup pages that matched no container.
    pub empty_pages: usize,
    /// Pagination stopped early because the run was cancelled.
    pub cancelled: bool,
}
