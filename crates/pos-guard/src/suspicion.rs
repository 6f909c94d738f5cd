//! Suspicious-traffic tagging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SuspicionConfig;
use crate::identity::forwarded_hop_count;

/// User-agent fragments that mark automated clients.
pub const DEFAULT_AGENT_PATTERNS: &[&str] = &[
    "bot", "crawler", "spider", "scraper", "curl", "wget", "python", "scrapy",
];

/// Annotation attached to every admitted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTag {
    /// Resolved client identity.
    pub ip: String,
    /// When the request was inspected.
    pub timestamp: DateTime<Utc>,
    /// Raw user-agent, empty when absent.
    pub user_agent: String,
    /// Whether any heuristic matched.
    pub is_suspicious: bool,
}

/// Heuristic classifier for automated or proxied traffic.
#[derive(Debug, Clone)]
pub struct SuspicionDetector {
    /// Lowercased patterns.
    patterns: Vec<String>,
}

impl SuspicionDetector {
    /// Create a detector from user-agent patterns.
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &SuspicionConfig) -> Self {
        Self::new(&config.agent_patterns)
    }

    /// Check a user-agent against the pattern list, ignoring case.
    #[must_use]
    pub fn is_suspicious_agent(&self, user_agent: &str) -> bool {
        if user_agent.is_empty() {
            return false;
        }
        let lowered = user_agent.to_lowercase();
        self.patterns.iter().any(|p| lowered.contains(p.as_str()))
    }

    /// Check whether a forwarded-for value passed through several proxies.
    #[must_use]
    pub fn has_multiple_hops(forwarded_for: &str) -> bool {
        forwarded_hop_count(forwarded_for) > 1
    }

    /// Inspect a request and produce its tag.
    #[must_use]
    pub fn assess(
        &self,
        identity: &str,
        user_agent: Option<&str>,
        forwarded_for: Option<&str>,
    ) -> RequestTag {
        let user_agent = user_agent.unwrap_or_default();
        let is_suspicious = self.is_suspicious_agent(user_agent)
            || forwarded_for.is_some_and(Self::has_multiple_hops);

        RequestTag {
            ip: identity.to_string(),
            timestamp: Utc::now(),
            user_agent: user_agent.to_string(),
            is_suspicious,
        }
    }
}

impl Default for SuspicionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_PATTERNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Googlebot/2.1", true ; "bot")]
    #[test_case("Mozilla/5.0 (compatible; SomeCrawler)", true ; "crawler mixed case")]
    #[test_case("curl/8.4.0", true ; "curl")]
    #[test_case("Wget/1.21", true ; "wget")]
    #[test_case("python-requests/2.31", true ; "python")]
    #[test_case("Scrapy/2.11", true ; "scrapy")]
    #[test_case("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0", false ; "browser")]
    #[test_case("", false ; "empty")]
    fn test_agent_patterns(agent: &str, expected: bool) {
        let detector = SuspicionDetector::default();
        assert_eq!(detector.is_suspicious_agent(agent), expected);
    }

    #[test]
    fn test_multiple_hops() {
        assert!(SuspicionDetector::has_multiple_hops("1.2.3.4, 5.6.7.8"));
        assert!(!SuspicionDetector::has_multiple_hops("1.2.3.4"));
        assert!(!SuspicionDetector::has_multiple_hops(""));
    }

    #[test]
    fn test_assess_browser() {
        let detector = SuspicionDetector::default();
        let tag = detector.assess("10.0.0.1", Some("Mozilla/5.0"), Some("10.0.0.1"));

        assert_eq!(tag.ip, "10.0.0.1");
        assert_eq!(tag.user_agent, "Mozilla/5.0");
        assert!(!tag.is_suspicious);
    }

    #[test]
    fn test_assess_proxied() {
        let detector = SuspicionDetector::default();
        let tag = detector.assess("1.2.3.4", Some("Mozilla/5.0"), Some("1.2.3.4, 10.0.0.1"));
        assert!(tag.is_suspicious);
    }

    #[test]
    fn test_assess_missing_agent() {
        let detector = SuspicionDetector::default();
        let tag = detector.assess("1.2.3.4", None, None);

        assert_eq!(tag.user_agent, "");
        assert!(!tag.is_suspicious);
    }

    #[test]
    fn test_custom_patterns() {
        let detector = SuspicionDetector::new(["HeadlessChrome"]);
        assert!(detector.is_suspicious_agent("Mozilla/5.0 headlesschrome/119"));
        assert!(!detector.is_suspicious_agent("curl/8.0"));
    }

    #[test]
    fn test_tag_serializes_camel_case() {
        let detector = SuspicionDetector::default();
        let tag = detector.assess("1.2.3.4", Some("curl/8.0"), None);
        let json = serde_json::to_value(&tag).unwrap();

        assert_eq!(json["ip"], "1.2.3.4");
        assert_eq!(json["userAgent"], "curl/8.0");
        assert_eq!(json["isSuspicious"], true);
        assert!(json.get("timestamp").is_some());
    }
}
