//! Source configuration loading and validation.
//!
//! Configuration is a TOML document with a `[settings]` table and a list of
//! `[[sources]]`. Everything is validated here, before any fetching begins:
//! a markup source without a container selector, an unparsable selector or a
//! malformed API connector spec is a fatal [`ConfigError`].
//!
//! # Example
//!
//! ```
//! use newswire::config::IngestConfig;
//!
//! let config = IngestConfig::from_toml_str(r#"
//!     [[sources]]
//!     name = "wire"
//!     base_url = "https://example.com/markets"
//!     kind = "markup"
//!     [sources.selectors]
//!     container = "article"
//!     headline = "h2"
//!     link = "a"
//! "#).unwrap();
//! assert_eq!(config.sources.len(), 1);
//! ```

mod error;
mod source;

pub use error::ConfigError;
pub use source::{
    ApiConnectorSpec, ConnectorKind, ConnectorSpec, FieldMap, MarkupSpec, PaginationStrategy,
    SelectorConfig, SourceDefinition, SourceDescriptor,
};

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::extract::ExtractionRules;
use crate::fetch::{BreakerConfig, RateLimitConfig, RetryPolicy};

/// Environment variable pointing at the config file.
pub const CONFIG_ENV_VAR: &str = "NEWSWIRE_CONFIG";

const MAX_CONCURRENCY: usize = 64;
const MAX_ATTEMPTS: u32 = 10;
/// Slowest accepted refill: one token every 1000 seconds.
const MIN_REFILL_PER_SEC: f64 = 0.001;

/// Global ingestion settings (`[settings]` table).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker pool size for parallel source fetching.
    pub concurrency: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// HTTP statuses eligible for retry.
    pub retry_statuses: Vec<u16>,
    /// Token bucket capacity per source.
    pub rate_capacity: u32,
    /// Token refill rate per source (tokens per second).
    pub rate_refill_per_sec: f64,
    /// Longest a caller waits for a token before failing with `RateLimited`.
    pub rate_max_wait_ms: u64,
    /// Failures within the window that open a circuit.
    pub breaker_failure_threshold: u32,
    /// Rolling failure window in seconds.
    pub breaker_window_secs: u64,
    /// Initial open-state cool-down in seconds.
    pub breaker_cooldown_secs: u64,
    /// Cool-down cap for repeated trips in seconds.
    pub breaker_max_cooldown_secs: u64,
    /// TTL for cached markup/API pages in seconds.
    pub page_cache_ttl_secs: u64,
    /// TTL for cached adapter tokens in seconds.
    pub token_cache_ttl_secs: u64,
    /// Networked cache URL (e.g. `redis://127.0.0.1:6379`).
    pub cache_url: Option<String>,
    /// Global keyword list matched against headline and summary.
    pub keywords: Vec<String>,
    /// Drop records that match none of the keywords.
    pub require_keyword_match: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            request_timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            retry_statuses: vec![429, 500, 502, 503, 504],
            rate_capacity: 5,
            rate_refill_per_sec: 1.0,
            rate_max_wait_ms: 10_000,
            breaker_failure_threshold: 5,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 30,
            breaker_max_cooldown_secs: 600,
            page_cache_ttl_secs: 300,
            token_cache_ttl_secs: 900,
            cache_url: None,
            keywords: Vec::new(),
            require_keyword_match: false,
        }
    }
}

impl Settings {
    /// Validates ranges of every setting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] for the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::invalid_setting(
                "concurrency",
                format!("{} (expected 1..={MAX_CONCURRENCY})", self.concurrency),
            ));
        }
        if !(1..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::invalid_setting(
                "max_attempts",
                format!("{} (expected 1..={MAX_ATTEMPTS})", self.max_attempts),
            ));
        }
        if !(1..=3600).contains(&self.request_timeout_secs) {
            return Err(ConfigError::invalid_setting(
                "request_timeout_secs",
                format!("{} (expected 1..=3600)", self.request_timeout_secs),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid_setting(
                "max_delay_ms",
                "must be >= base_delay_ms",
            ));
        }
        if self.rate_capacity == 0 {
            return Err(ConfigError::invalid_setting("rate_capacity", "must be >= 1"));
        }
        if !valid_refill_rate(self.rate_refill_per_sec) {
            return Err(ConfigError::invalid_setting(
                "rate_refill_per_sec",
                format!(
                    "{} (expected a finite number >= {MIN_REFILL_PER_SEC})",
                    self.rate_refill_per_sec
                ),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::invalid_setting(
                "breaker_failure_threshold",
                "must be >= 1",
            ));
        }
        if self.breaker_max_cooldown_secs < self.breaker_cooldown_secs {
            return Err(ConfigError::invalid_setting(
                "breaker_max_cooldown_secs",
                "must be >= breaker_cooldown_secs",
            ));
        }
        if let Some(status) = self
            .retry_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(ConfigError::invalid_setting(
                "retry_statuses",
                format!("{status} is not an HTTP status"),
            ));
        }
        Ok(())
    }

    /// Retry policy derived from these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            2.0,
        )
        .with_retry_statuses(self.retry_statuses.clone())
    }

    /// Default token bucket parameters derived from these settings.
    #[must_use]
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_capacity,
            refill_per_sec: self.rate_refill_per_sec,
            max_wait: Duration::from_millis(self.rate_max_wait_ms),
        }
    }

    /// Circuit breaker parameters derived from these settings.
    #[must_use]
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            window: Duration::from_secs(self.breaker_window_secs),
            cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            max_cooldown: Duration::from_secs(self.breaker_max_cooldown_secs),
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Fully validated ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Global settings.
    pub settings: Settings,
    /// Sources in configuration order.
    pub sources: Vec<SourceDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: String,
    base_url: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    category: String,
    kind: ConnectorKind,
    #[serde(default)]
    pages: Vec<String>,
    selectors: Option<SelectorConfig>,
    api: Option<ApiConnectorSpec>,
    rate_capacity: Option<u32>,
    rate_refill_per_sec: Option<f64>,
}

impl IngestConfig {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed TOML or any validation failure.
    #[instrument(level = "debug", skip_all)]
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawConfig =
            toml::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
        parsed.settings.validate()?;

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(parsed.sources.len());
        for raw_source in parsed.sources {
            if !seen.insert(raw_source.name.clone()) {
                return Err(ConfigError::DuplicateSource {
                    name: raw_source.name,
                });
            }
            sources.push(validate_source(raw_source)?);
        }

        debug!(sources = sources.len(), "configuration validated");
        Ok(Self {
            settings: parsed.settings,
            sources,
        })
    }

    /// Loads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// errors of [`from_toml_str`](Self::from_toml_str).
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), sources = config.sources.len(), "loaded source configuration");
        Ok(config)
    }
}

fn validate_source(raw: RawSource) -> Result<SourceDefinition, ConfigError> {
    let base_url = parse_http_url(&raw.name, "base_url", &raw.base_url)?;

    if raw.rate_capacity == Some(0) {
        return Err(ConfigError::invalid_spec(&raw.name, "rate_capacity must be >= 1"));
    }
    if let Some(rate) = raw.rate_refill_per_sec
        && !valid_refill_rate(rate)
    {
        return Err(ConfigError::invalid_spec(
            &raw.name,
            format!("rate_refill_per_sec must be a finite number >= {MIN_REFILL_PER_SEC}"),
        ));
    }

    let descriptor = SourceDescriptor {
        name: raw.name.clone(),
        base_url: base_url.clone(),
        country: raw.country,
        language: raw.language,
        category: raw.category,
        kind: raw.kind,
        rate_capacity: raw.rate_capacity,
        rate_refill_per_sec: raw.rate_refill_per_sec,
    };

    let connector = match raw.kind {
        ConnectorKind::Markup => {
            let selectors = raw.selectors.ok_or_else(|| ConfigError::MissingConnectorSpec {
                source_name: raw.name.clone(),
                kind: "markup",
                table: "selectors",
            })?;
            let rules = ExtractionRules::compile(&raw.name, &selectors)?;
            let pages = resolve_pages(&raw.name, &base_url, &raw.pages)?;
            ConnectorSpec::Markup(MarkupSpec {
                selectors,
                rules,
                pages,
            })
        }
        ConnectorKind::Schema => {
            let api = raw.api.ok_or_else(|| ConfigError::MissingConnectorSpec {
                source_name: raw.name.clone(),
                kind: "schema",
                table: "api",
            })?;
            validate_api_spec(&raw.name, &api)?;
            ConnectorSpec::Schema(api)
        }
    };

    Ok(SourceDefinition {
        descriptor,
        connector,
    })
}

fn valid_refill_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= MIN_REFILL_PER_SEC
}

fn resolve_pages(name: &str, base_url: &Url, pages: &[String]) -> Result<Vec<Url>, ConfigError> {
    if pages.is_empty() {
        return Ok(vec![base_url.clone()]);
    }
    pages
        .iter()
        .map(|page| {
            if page.is_empty() {
                return Ok(base_url.clone());
            }
            if let Ok(absolute) = Url::parse(page) {
                return Ok(absolute);
            }
            // Relative paths extend the base path rather than replacing its last segment.
            let joined = format!("{}{}", base_url.as_str().trim_end_matches('/'), page);
            Url::parse(&joined).map_err(|_| ConfigError::invalid_url(name, "pages", page.clone()))
        })
        .collect()
}

fn validate_api_spec(name: &str, api: &ApiConnectorSpec) -> Result<(), ConfigError> {
    if api.page_size == 0 {
        return Err(ConfigError::invalid_spec(name, "page_size must be >= 1"));
    }
    if api.max_pages == 0 {
        return Err(ConfigError::invalid_spec(name, "max_pages must be >= 1"));
    }
    if api.fields.headline.trim().is_empty() || api.fields.link.trim().is_empty() {
        return Err(ConfigError::invalid_spec(
            name,
            "fields.headline and fields.link must not be empty",
        ));
    }
    let params = match api.pagination {
        PaginationStrategy::Page => [&api.page_param, &api.page_size_param],
        PaginationStrategy::Offset => [&api.offset_param, &api.limit_param],
    };
    if params.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::invalid_spec(
            name,
            "pagination query parameter names must not be empty",
        ));
    }
    if let Some(endpoint) = &api.auth_endpoint {
        parse_http_url(name, "auth_endpoint", endpoint)?;
    }
    if let Some(endpoint) = &api.transform_endpoint {
        parse_http_url(name, "transform_endpoint", endpoint)?;
    }
    Ok(())
}

fn parse_http_url(name: &str, field: &'static str, value: &str) -> Result<Url, ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(url),
        _ => Err(ConfigError::invalid_url(name, field, value)),
    }
}

/// Resolves the config path to use.
///
/// Priority:
/// 1. explicit path (`--config`)
/// 2. `$NEWSWIRE_CONFIG`
/// 3. `$XDG_CONFIG_HOME/newswire/sources.toml`
/// 4. `$HOME/.config/newswire/sources.toml`
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_var_non_empty_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("newswire")
                .join("sources.toml"),
        );
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("newswire")
            .join("sources.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
