//! Link resolution against a source's base URL.

use url::Url;

/// Resolves `href` against `base` into an absolute http(s) URL.
///
/// Fragment-only, `javascript:`, `mailto:` and other non-web links are not
/// usable article links and yield `None`. Fragments are dropped.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use newswire::extract::resolve_link;
///
/// let base = Url::parse("https://example.com/markets/").unwrap();
/// assert_eq!(
///     resolve_link(&base, "/story/1#comments").unwrap().as_str(),
///     "https://example.com/story/1"
/// );
/// assert!(resolve_link(&base, "javascript:void(0)").is_none());
/// ```
#[must_use]
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// True when `link`'s host is neither the base host nor one of its
/// subdomains. A leading `www.` is ignored on both sides.
#[must_use]
pub fn is_off_domain(base: &Url, link: &Url) -> bool {
    let (Some(base_host), Some(link_host)) = (base.host_str(), link.host_str()) else {
        return true;
    };
    let base_host = strip_www(base_host);
    let link_host = strip_www(link_host);
    if link_host == base_host {
        return false;
    }
    !link_host.ends_with(&format!(".{base_host}"))
}

fn strip_www(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.example.com/markets/today").unwrap()
    }

    #[test]
    fn test_relative_link_joins_base() {
        assert_eq!(
            resolve_link(&base(), "story-1").unwrap().as_str(),
            "https://www.example.com/markets/story-1"
        );
        assert_eq!(
            resolve_link(&base(), "//cdn.example.com/a").unwrap().as_str(),
            "https://cdn.example.com/a"
        );
    }

    #[test]
    fn test_absolute_link_kept() {
        assert_eq!(
            resolve_link(&base(), "https://other.org/x?id=1").unwrap().as_str(),
            "https://other.org/x?id=1"
        );
    }

    #[test]
    fn test_unusable_links_rejected() {
        for href in ["", "   ", "#top", "mailto:desk@example.com", "javascript:void(0)"] {
            assert!(resolve_link(&base(), href).is_none(), "{href:?}");
        }
    }

    #[test]
    fn test_off_domain_detection() {
        let base = base();
        let same = Url::parse("https://example.com/a").unwrap();
        let sub = Url::parse("https://markets.example.com/a").unwrap();
        let other = Url::parse("https://ads.tracker.net/a").unwrap();
        let lookalike = Url::parse("https://notexample.com/a").unwrap();

        assert!(!is_off_domain(&base, &same));
        assert!(!is_off_domain(&base, &sub));
        assert!(is_off_domain(&base, &other));
        assert!(is_off_domain(&base, &lookalike));
    }
}
