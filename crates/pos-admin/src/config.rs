//! Admin server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use pos_guard::GuardConfig;

/// Configuration for the admission service and admin API.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// JSON-lines attack log. Events stay in memory when unset.
    pub attack_log: Option<PathBuf>,
    /// CORS allowed origins (empty means all).
    pub cors_origins: Vec<String>,
    /// Record rate-limit rejections as attacks.
    pub log_rejections: bool,
    /// Record suspicious requests as attacks.
    pub log_suspicious: bool,
    /// Admission pipeline settings.
    pub guard: GuardConfig,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            attack_log: None,
            cors_origins: Vec::new(),
            log_rejections: true,
            log_suspicious: true,
            guard: GuardConfig::default(),
        }
    }
}

impl AdminConfig {
    /// Create a new configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    /// Persist attack events to a JSON-lines file.
    #[must_use]
    pub fn with_attack_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.attack_log = Some(path.into());
        self
    }

    /// Add a CORS allowed origin.
    #[must_use]
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }

    /// Toggle recording of rate-limit rejections.
    #[must_use]
    pub const fn with_log_rejections(mut self, enabled: bool) -> Self {
        self.log_rejections = enabled;
        self
    }

    /// Toggle recording of suspicious requests.
    #[must_use]
    pub const fn with_log_suspicious(mut self, enabled: bool) -> Self {
        self.log_suspicious = enabled;
        self
    }

    /// Replace the admission settings.
    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }
}
