//! Admission control configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};
use crate::identity::is_loopback;

/// Length of the shared rate-limit and slow-down window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Maximum declared request body size (50 MiB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for a fixed-window request limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per identity per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
    /// Whether to enable this limiter.
    pub enabled: bool,
}

impl RateLimitConfig {
    /// Limits applied to every request: 100 per 15 minutes.
    #[must_use]
    pub const fn general() -> Self {
        Self {
            max_requests: 100,
            window: DEFAULT_WINDOW,
            enabled: true,
        }
    }

    /// Limits applied to authentication endpoints: 5 per 15 minutes.
    #[must_use]
    pub const fn auth() -> Self {
        Self {
            max_requests: 5,
            window: DEFAULT_WINDOW,
            enabled: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::general()
    }
}

/// Configuration for progressive request delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowDownConfig {
    /// Requests per window served without delay.
    pub delay_after: u32,
    /// Delay added per request over `delay_after`.
    pub delay_step: Duration,
    /// Upper bound on the delay of a single request.
    pub max_delay: Duration,
    /// Window length.
    pub window: Duration,
    /// Whether to enable slow-down.
    pub enabled: bool,
}

impl Default for SlowDownConfig {
    fn default() -> Self {
        Self {
            delay_after: 50,
            delay_step: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            window: DEFAULT_WINDOW,
            enabled: true,
        }
    }
}

/// Configuration for the request size check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeLimitConfig {
    /// Largest accepted `content-length`, in bytes.
    pub max_body_bytes: u64,
}

impl Default for SizeLimitConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Configuration for duplicate-parameter protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// Keys allowed to carry several values.
    pub allow_multiple: HashSet<String>,
    /// Whether to collapse duplicate parameters.
    pub enabled: bool,
}

impl Default for ParameterConfig {
    fn default() -> Self {
        Self {
            allow_multiple: ["tags", "categories", "filter"]
                .into_iter()
                .map(String::from)
                .collect(),
            enabled: true,
        }
    }
}

/// Configuration for suspicious-traffic tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionConfig {
    /// Case-insensitive user-agent substrings that mark automated clients.
    pub agent_patterns: Vec<String>,
}

impl Default for SuspicionConfig {
    fn default() -> Self {
        Self {
            agent_patterns: crate::suspicion::DEFAULT_AGENT_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

/// Identities exempt from rate limiting and slow-down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    /// Exempt every loopback address.
    pub trust_loopback: bool,
    /// Additional exempt identities, matched exactly.
    pub trusted: HashSet<String>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            trust_loopback: true,
            trusted: HashSet::new(),
        }
    }
}

impl TrustPolicy {
    /// Check whether an identity bypasses the limiters.
    #[must_use]
    pub fn is_trusted(&self, identity: &str) -> bool {
        (self.trust_loopback && is_loopback(identity)) || self.trusted.contains(identity)
    }
}

/// Main admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Limiter applied to every request.
    pub general_limit: RateLimitConfig,
    /// Limiter applied to authentication endpoints only.
    pub auth_limit: RateLimitConfig,
    /// Progressive delay settings.
    pub slow_down: SlowDownConfig,
    /// Request size settings.
    pub size_limit: SizeLimitConfig,
    /// Duplicate-parameter settings.
    pub parameters: ParameterConfig,
    /// Suspicious-traffic settings.
    pub suspicion: SuspicionConfig,
    /// Path patterns of authentication endpoints (e.g. `/api/auth/*`).
    pub auth_paths: Vec<String>,
    /// Limiter exemptions.
    pub trust: TrustPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            general_limit: RateLimitConfig::general(),
            auth_limit: RateLimitConfig::auth(),
            slow_down: SlowDownConfig::default(),
            size_limit: SizeLimitConfig::default(),
            parameters: ParameterConfig::default(),
            suspicion: SuspicionConfig::default(),
            auth_paths: vec!["/api/auth/*".to_string()],
            trust: TrustPolicy::default(),
        }
    }
}

impl GuardConfig {
    /// Create a new builder for admission configuration.
    #[must_use]
    pub fn builder() -> GuardConfigBuilder {
        GuardConfigBuilder::default()
    }

    /// Check if an identity is exempt from the limiters.
    #[must_use]
    pub fn is_trusted(&self, identity: &str) -> bool {
        self.trust.is_trusted(identity)
    }

    /// Check if a path is an authentication endpoint.
    #[must_use]
    pub fn is_auth_path(&self, path: &str) -> bool {
        self.auth_paths.iter().any(|p| path_matches(p, path))
    }

    /// Reject settings the limiters cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Config` describing the first invalid value.
    pub fn validate(&self) -> GuardResult<()> {
        for (name, limit) in [("general_limit", &self.general_limit), ("auth_limit", &self.auth_limit)] {
            if limit.enabled && limit.window.is_zero() {
                return Err(GuardError::Config(format!("{name}.window must be non-zero")));
            }
            if limit.enabled && limit.max_requests == 0 {
                return Err(GuardError::Config(format!("{name}.max_requests must be non-zero")));
            }
        }
        if self.slow_down.enabled && self.slow_down.window.is_zero() {
            return Err(GuardError::Config("slow_down.window must be non-zero".into()));
        }
        if self.slow_down.max_delay < self.slow_down.delay_step {
            return Err(GuardError::Config(
                "slow_down.max_delay must be at least delay_step".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for `GuardConfig`.
#[derive(Debug, Clone, Default)]
pub struct GuardConfigBuilder {
    config: GuardConfig,
}

impl GuardConfigBuilder {
    /// Set the general limiter.
    #[must_use]
    pub fn general_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.general_limit = config;
        self
    }

    /// Set the authentication limiter.
    #[must_use]
    pub fn auth_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.auth_limit = config;
        self
    }

    /// Set slow-down configuration.
    #[must_use]
    pub fn slow_down(mut self, config: SlowDownConfig) -> Self {
        self.config.slow_down = config;
        self
    }

    /// Set request size configuration.
    #[must_use]
    pub fn size_limit(mut self, config: SizeLimitConfig) -> Self {
        self.config.size_limit = config;
        self
    }

    /// Set duplicate-parameter configuration.
    #[must_use]
    pub fn parameters(mut self, config: ParameterConfig) -> Self {
        self.config.parameters = config;
        self
    }

    /// Set suspicious-traffic configuration.
    #[must_use]
    pub fn suspicion(mut self, config: SuspicionConfig) -> Self {
        self.config.suspicion = config;
        self
    }

    /// Add an authentication path pattern.
    #[must_use]
    pub fn auth_path(mut self, pattern: impl Into<String>) -> Self {
        self.config.auth_paths.push(pattern.into());
        self
    }

    /// Add a trusted identity.
    #[must_use]
    pub fn trust_identity(mut self, identity: impl Into<String>) -> Self {
        self.config.trust.trusted.insert(identity.into());
        self
    }

    /// Enable or disable the loopback exemption.
    #[must_use]
    pub fn trust_loopback(mut self, trust: bool) -> Self {
        self.config.trust.trust_loopback = trust;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> GuardConfig {
        self.config
    }
}

/// Simple path matching with wildcard support.
pub(crate) fn path_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        path.starts_with(prefix)
    } else {
        pattern == path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GuardConfig::default();

        assert_eq!(config.general_limit.max_requests, 100);
        assert_eq!(config.general_limit.window, Duration::from_secs(900));
        assert_eq!(config.auth_limit.max_requests, 5);
        assert_eq!(config.auth_limit.window, Duration::from_secs(900));
        assert_eq!(config.slow_down.delay_after, 50);
        assert_eq!(config.slow_down.delay_step, Duration::from_millis(500));
        assert_eq!(config.slow_down.max_delay, Duration::from_secs(5));
        assert_eq!(config.size_limit.max_body_bytes, 52_428_800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = GuardConfig::builder()
            .general_limit(RateLimitConfig {
                max_requests: 10,
                ..RateLimitConfig::general()
            })
            .trust_identity("10.0.0.5")
            .auth_path("/api/login")
            .build();

        assert_eq!(config.general_limit.max_requests, 10);
        assert!(config.is_trusted("10.0.0.5"));
        assert!(!config.is_trusted("10.0.0.6"));
        assert!(config.is_auth_path("/api/login"));
    }

    #[test]
    fn test_loopback_trusted_by_default() {
        let config = GuardConfig::default();

        assert!(config.is_trusted("127.0.0.1"));
        assert!(config.is_trusted("::1"));
        assert!(config.is_trusted("::ffff:127.0.0.1"));
        assert!(!config.is_trusted("203.0.113.5"));
        assert!(!config.is_trusted("unknown"));
    }

    #[test]
    fn test_loopback_exemption_can_be_disabled() {
        let config = GuardConfig::builder().trust_loopback(false).build();
        assert!(!config.is_trusted("127.0.0.1"));
    }

    #[test]
    fn test_auth_paths() {
        let config = GuardConfig::default();

        assert!(config.is_auth_path("/api/auth/login"));
        assert!(config.is_auth_path("/api/auth/register"));
        assert!(!config.is_auth_path("/api/products"));
    }

    #[test]
    fn test_path_matching() {
        assert!(path_matches("/api/*", "/api/foo"));
        assert!(path_matches("/api/*", "/api/foo/bar"));
        assert!(!path_matches("/api/*", "/other/foo"));
        assert!(path_matches("/exact", "/exact"));
        assert!(!path_matches("/exact", "/exact/more"));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = GuardConfig::builder()
            .general_limit(RateLimitConfig {
                window: Duration::ZERO,
                ..RateLimitConfig::general()
            })
            .build();

        assert!(matches!(config.validate(), Err(GuardError::Config(_))));
    }

    #[test]
    fn test_validate_ignores_disabled_limiter() {
        let config = GuardConfig::builder()
            .auth_limit(RateLimitConfig {
                max_requests: 0,
                window: Duration::ZERO,
                enabled: false,
            })
            .build();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_slow_down_bounds() {
        let config = GuardConfig::builder()
            .slow_down(SlowDownConfig {
                max_delay: Duration::from_millis(100),
                ..SlowDownConfig::default()
            })
            .build();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parameter_allow_list_default() {
        let config = ParameterConfig::default();
        assert!(config.allow_multiple.contains("tags"));
        assert!(config.allow_multiple.contains("categories"));
        assert!(config.allow_multiple.contains("filter"));
        assert!(config.enabled);
    }
}
