//! Load-time configuration errors.
//!
//! Every variant here is fatal: it is raised while loading the source
//! configuration, before any fetching begins.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating source configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected shape.
    #[error("failed to parse config: {source}")]
    Parse {
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// No config path was given and no default location exists.
    #[error("no config file found (pass --config or set NEWSWIRE_CONFIG)")]
    NotFound,

    /// A markup source has an empty container selector.
    #[error("source '{source_name}': selectors.container must not be empty")]
    MissingContainer {
        /// Offending source.
        source_name: String,
    },

    /// A selector string is not valid CSS.
    #[error("source '{source_name}': invalid {field} selector '{selector}': {reason}")]
    InvalidSelector {
        /// Offending source.
        source_name: String,
        /// Which selector field (container, headline, ...).
        field: &'static str,
        /// The selector text.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// A URL field does not parse as an absolute http(s) URL.
    #[error("source '{source_name}': invalid {field} URL '{value}'")]
    InvalidUrl {
        /// Offending source.
        source_name: String,
        /// Which field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The `kind` tag has no matching connector table.
    #[error("source '{source_name}': kind = \"{kind}\" requires a [sources.{table}] table")]
    MissingConnectorSpec {
        /// Offending source.
        source_name: String,
        /// Declared connector kind.
        kind: &'static str,
        /// Table that is missing.
        table: &'static str,
    },

    /// The API connector spec is malformed.
    #[error("source '{source_name}': invalid api spec: {reason}")]
    InvalidConnectorSpec {
        /// Offending source.
        source_name: String,
        /// What is wrong.
        reason: String,
    },

    /// Two sources share a name.
    #[error("duplicate source name '{name}'")]
    DuplicateSource {
        /// The repeated name.
        name: String,
    },

    /// A global setting is out of range.
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting {
        /// Setting name.
        field: &'static str,
        /// Expected range or constraint.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid_url(
        source_name: impl Into<String>,
        field: &'static str,
        value: impl Into<String>,
    ) -> Self {
        Self::InvalidUrl {
            source_name: source_name.into(),
            field,
            value: value.into(),
        }
    }

    pub(crate) fn invalid_spec(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConnectorSpec {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_setting(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}
