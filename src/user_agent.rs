//! User-Agent string for outbound traffic.
//!
//! Single source for the project URL and UA format so scraping and adapter
//! traffic identify the tool the same way (good citizenship; RFC 9308).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/newswire";

/// Default User-Agent for every request made by the resilient client.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("newswire/{version} (news-ingestion; +{PROJECT_UA_URL})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL");
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("newswire/")
                .and_then(|s| s.split(' ').next())
                .unwrap(),
            "UA must contain crate version"
        );
    }
}
