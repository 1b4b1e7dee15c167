//! Uniform article records produced by every ingestion path.
//!
//! An [`ArticleRecord`] is created once (by the extraction engine or the
//! schema-path mapper) and never mutated afterwards. Downstream consumers
//! (storage, report generation) only read it.
//!
//! # Identity
//!
//! Two records describe the same article when their [`ArticleRecord::identity_key`]
//! matches. The key is the normalized link (scheme, host, path and the
//! non-tracking part of the query). When the link cannot be parsed, a SHA-256
//! hash of the normalized headline is used instead.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that only carry campaign/referral tracking.
const TRACKING_PARAMS: [&str; 11] = [
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src",
    "cmpid", "_ga",
];

/// Publication time of an article as found at the source.
///
/// Absent dates stay [`PublishedAt::Unknown`]; they are never defaulted to the
/// fetch time. Date text that none of the known formats understands is kept
/// verbatim so the article is not dropped over a cosmetic format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum PublishedAt {
    /// Date text parsed into a UTC timestamp.
    Parsed(DateTime<Utc>),
    /// Date text was present but in no recognized format.
    Unparsed(String),
    /// No date was present.
    Unknown,
}

impl PublishedAt {
    /// Returns the parsed timestamp, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Parsed(ts) => Some(*ts),
            Self::Unparsed(_) | Self::Unknown => None,
        }
    }

    /// Returns true when the date was parsed.
    #[must_use]
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// A single normalized article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Headline text, whitespace-collapsed and never empty.
    pub headline: String,
    /// Optional teaser/summary text.
    pub summary: Option<String>,
    /// Absolute canonical link.
    pub link: String,
    /// True when the link points outside the source's declared domain.
    pub off_domain: bool,
    /// Publication time as found at the source.
    pub published: PublishedAt,
    /// Name of the source this record came from.
    pub source: String,
    /// Source country code.
    pub country: String,
    /// Source language code.
    pub language: String,
    /// Source category.
    pub category: String,
    /// Configured keywords matched in headline or summary (lowercase).
    pub keywords: Vec<String>,
    /// Server clock at extraction time.
    pub fetched_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Returns the deduplication key for this record.
    ///
    /// `link:<normalized link>` when the link parses, `headline:<sha256>`
    /// otherwise.
    #[must_use]
    pub fn identity_key(&self) -> String {
        match normalize_link(&self.link) {
            Some(normalized) => format!("link:{normalized}"),
            None => format!("headline:{}", headline_hash(&self.headline)),
        }
    }

    /// Number of optional fields that carry usable data.
    ///
    /// Used when two records share an identity: the more complete one wins.
    #[must_use]
    pub fn completeness(&self) -> u8 {
        u8::from(self.summary.is_some()) + u8::from(self.published.is_parsed())
    }
}

/// Normalizes a link for identity comparison.
///
/// Keeps scheme, host (lowercased), port, path (trailing slash trimmed) and the
/// query pairs that are not tracking parameters, sorted. Drops fragments.
/// Returns `None` for links that are not absolute URLs.
///
/// # Examples
///
/// ```
/// use newswire::article::normalize_link;
///
/// assert_eq!(
///     normalize_link("https://Example.com/a/b/?utm_source=x&id=7#top").as_deref(),
///     Some("https://example.com/a/b?id=7")
/// );
/// assert_eq!(normalize_link("not a url"), None);
/// ```
#[must_use]
pub fn normalize_link(link: &str) -> Option<String> {
    let url = Url::parse(link.trim()).ok()?;
    let host = url.host_str()?.to_lowercase();

    let mut out = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }

    let path = url.path();
    let trimmed = path.trim_end_matches('/');
    out.push_str(if trimmed.is_empty() { "/" } else { trimmed });

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join("&");
        out.push('?');
        out.push_str(&query);
    }

    Some(out)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Hex SHA-256 of the lowercased, whitespace-collapsed headline.
#[must_use]
pub fn headline_hash(headline: &str) -> String {
    let normalized = headline
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Final output ordering: newest first, unknown dates last, then source name
/// and headline for a stable result.
#[must_use]
pub fn output_order(a: &ArticleRecord, b: &ArticleRecord) -> Ordering {
    let by_time = match (a.published.timestamp(), b.published.timestamp()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.headline.cmp(&b.headline))
}
