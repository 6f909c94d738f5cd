//! Shared state for the admin server.

use std::sync::Arc;
use std::time::Instant;

use pos_audit::{AttackMonitor, AttackStore, FileAttackStore, MemoryAttackStore};
use pos_guard::{AdmissionPipeline, BlocklistStore, IpBlocklist, ParameterFilter};
use tracing::info;

use crate::config::AdminConfig;
use crate::error::AdminResult;

/// State shared by the admission middleware and the admin handlers.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration.
    config: Arc<AdminConfig>,
    /// Blocklist shared with the admission pipeline.
    blocklist: Arc<dyn BlocklistStore>,
    /// Attack logger and statistics.
    monitor: AttackMonitor,
    /// Admission stages run on every request.
    pipeline: AdmissionPipeline,
    /// Duplicate-parameter filter for form bodies.
    form_filter: ParameterFilter,
    /// Server start time.
    start_time: Instant,
}

impl AppState {
    /// Create state from injected stores.
    pub fn new(
        config: AdminConfig,
        blocklist: Arc<dyn BlocklistStore>,
        monitor: AttackMonitor,
    ) -> Self {
        let pipeline = AdmissionPipeline::from_config(&config.guard, Arc::clone(&blocklist));
        let form_filter = ParameterFilter::from_config(&config.guard.parameters);
        Self {
            config: Arc::new(config),
            blocklist,
            monitor,
            pipeline,
            form_filter,
            start_time: Instant::now(),
        }
    }

    /// Create state with a fresh blocklist and the configured attack store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the attack log
    /// cannot be opened.
    pub fn from_config(config: AdminConfig) -> AdminResult<Self> {
        config
            .guard
            .validate()
            .map_err(|e| crate::error::AdminError::Internal(e.to_string()))?;

        let store: Arc<dyn AttackStore> = match &config.attack_log {
            Some(path) => {
                let store = FileAttackStore::open(path)?;
                info!(path = %path.display(), events = store.len(), "Using file attack store");
                Arc::new(store)
            }
            None => {
                info!("Using in-memory attack store");
                Arc::new(MemoryAttackStore::new())
            }
        };

        Ok(Self::new(
            config,
            Arc::new(IpBlocklist::new()),
            AttackMonitor::new(store),
        ))
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// Get the blocklist.
    #[must_use]
    pub fn blocklist(&self) -> &Arc<dyn BlocklistStore> {
        &self.blocklist
    }

    /// Get the attack monitor.
    #[must_use]
    pub fn monitor(&self) -> &AttackMonitor {
        &self.monitor
    }

    /// Get the admission pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &AdmissionPipeline {
        &self.pipeline
    }

    /// Get the form-body parameter filter.
    #[must_use]
    pub fn form_filter(&self) -> &ParameterFilter {
        &self.form_filter
    }

    /// Blocked identities, sorted for stable output.
    #[must_use]
    pub fn blocked_ips(&self) -> Vec<String> {
        let mut ips = self.blocklist.list();
        ips.sort();
        ips
    }

    /// Server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_creation() {
        let state = AppState::from_config(AdminConfig::default()).unwrap();

        assert!(state.blocklist().is_empty());
        assert!(state.monitor().store().is_empty());
        assert_eq!(state.pipeline().len(), 7);
        assert!(state.uptime_secs() < 5);
    }

    #[test]
    fn test_state_with_file_store() {
        let dir = TempDir::new().unwrap();
        let config = AdminConfig::default().with_attack_log(dir.path().join("attacks.jsonl"));

        let state = AppState::from_config(config);
        assert!(state.is_ok());
    }

    #[test]
    fn test_state_rejects_invalid_guard_config() {
        let mut config = AdminConfig::default();
        config.guard.general_limit.max_requests = 0;

        assert!(AppState::from_config(config).is_err());
    }

    #[test]
    fn test_shared_blocklist() {
        let blocklist: Arc<dyn BlocklistStore> = Arc::new(IpBlocklist::new());
        let state = AppState::new(
            AdminConfig::default(),
            Arc::clone(&blocklist),
            AttackMonitor::in_memory(),
        );

        blocklist.block("9.9.9.9", None);
        blocklist.block("1.1.1.1", None);
        assert_eq!(state.blocked_ips(), vec!["1.1.1.1".to_string(), "9.9.9.9".to_string()]);
    }
}
