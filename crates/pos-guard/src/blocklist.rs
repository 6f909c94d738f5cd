//! Identity blocklist.
//!
//! Blocks are permanent until explicitly removed and live only as long as
//! the process: a restart clears every manual block. Multi-instance
//! deployments each hold their own copy unless a shared backend is put
//! behind [`BlocklistStore`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::error::{GuardError, GuardResult};

/// Reason recorded when a block is created without one.
pub const DEFAULT_BLOCK_REASON: &str = "Manual block";

/// Metadata kept for a blocked identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockEntry {
    /// Human-readable reason.
    pub reason: String,
    /// When the block was (last) created.
    pub created_at: DateTime<Utc>,
    /// Number of times this identity has been blocked.
    pub block_count: u32,
}

impl BlockEntry {
    /// Create a new block entry.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            created_at: Utc::now(),
            block_count: 1,
        }
    }
}

/// Storage backend for blocked identities.
///
/// Implementations must make each call a single atomic operation so the
/// admission check never observes a half-applied block.
pub trait BlocklistStore: Send + Sync + fmt::Debug {
    /// Block an identity. Idempotent; re-blocking replaces the reason.
    fn block(&self, identity: &str, reason: Option<&str>);

    /// Remove a block. Returns whether the identity was blocked.
    ///
    /// Removing an identity that is not blocked is a no-op.
    fn unblock(&self, identity: &str) -> bool;

    /// Get the block entry for an identity, if blocked.
    fn entry(&self, identity: &str) -> Option<BlockEntry>;

    /// List blocked identities. Order is unspecified.
    fn list(&self) -> Vec<String>;

    /// Check if an identity is blocked.
    fn is_blocked(&self, identity: &str) -> bool {
        self.entry(identity).is_some()
    }

    /// Reason recorded for a blocked identity.
    fn reason(&self, identity: &str) -> Option<String> {
        self.entry(identity).map(|e| e.reason)
    }

    /// Check an identity against the blocklist.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Blocked` if the identity is blocked.
    fn check(&self, identity: &str) -> GuardResult<()> {
        match self.entry(identity) {
            Some(entry) => Err(GuardError::Blocked {
                identity: identity.to_string(),
                reason: entry.reason,
            }),
            None => Ok(()),
        }
    }

    /// Number of blocked identities.
    fn len(&self) -> usize {
        self.list().len()
    }

    /// Returns true if nothing is blocked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process blocklist.
#[derive(Debug, Default)]
pub struct IpBlocklist {
    blocked: RwLock<HashMap<String, BlockEntry>>,
}

impl IpBlocklist {
    /// Create an empty blocklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all blocks.
    pub fn clear(&self) {
        self.blocked.write().clear();
        info!("Blocklist cleared");
    }
}

impl BlocklistStore for IpBlocklist {
    fn block(&self, identity: &str, reason: Option<&str>) {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_BLOCK_REASON);

        let mut blocked = self.blocked.write();

        if let Some(existing) = blocked.get_mut(identity) {
            existing.block_count = existing.block_count.saturating_add(1);
            reason.clone_into(&mut existing.reason);
            existing.created_at = Utc::now();

            info!(
                ip = %identity,
                reason = %reason,
                block_count = existing.block_count,
                "IP re-blocked"
            );
        } else {
            blocked.insert(identity.to_string(), BlockEntry::new(reason));
            info!(ip = %identity, reason = %reason, "IP blocked");
        }
    }

    fn unblock(&self, identity: &str) -> bool {
        let removed = self.blocked.write().remove(identity).is_some();
        if removed {
            info!(ip = %identity, "IP unblocked");
        }
        removed
    }

    fn entry(&self, identity: &str) -> Option<BlockEntry> {
        self.blocked.read().get(identity).cloned()
    }

    fn list(&self) -> Vec<String> {
        self.blocked.read().keys().cloned().collect()
    }

    fn is_blocked(&self, identity: &str) -> bool {
        self.blocked.read().contains_key(identity)
    }

    fn len(&self) -> usize {
        self.blocked.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_blocklist_new() {
        let blocklist = IpBlocklist::new();
        assert_eq!(blocklist.len(), 0);
        assert!(blocklist.is_empty());
    }

    #[test]
    fn test_block_list_unblock_roundtrip() {
        let blocklist = IpBlocklist::new();

        blocklist.block("203.0.113.5", Some("test"));
        assert!(blocklist.list().contains(&"203.0.113.5".to_string()));

        assert!(blocklist.unblock("203.0.113.5"));
        assert!(!blocklist.list().contains(&"203.0.113.5".to_string()));
    }

    #[test]
    fn test_block_and_check() {
        let blocklist = IpBlocklist::new();

        assert!(blocklist.check("1.2.3.4").is_ok());
        assert!(!blocklist.is_blocked("1.2.3.4"));

        blocklist.block("1.2.3.4", Some("scraping"));

        assert!(blocklist.is_blocked("1.2.3.4"));
        let result = blocklist.check("1.2.3.4");
        assert!(matches!(result, Err(GuardError::Blocked { ref reason, .. }) if reason == "scraping"));
        assert_eq!(blocklist.reason("1.2.3.4").as_deref(), Some("scraping"));
        assert!(blocklist.reason("5.6.7.8").is_none());
    }

    #[test]
    fn test_default_reason() {
        let blocklist = IpBlocklist::new();

        blocklist.block("1.2.3.4", None);
        blocklist.block("5.6.7.8", Some("   "));

        assert_eq!(blocklist.entry("1.2.3.4").unwrap().reason, DEFAULT_BLOCK_REASON);
        assert_eq!(blocklist.entry("5.6.7.8").unwrap().reason, DEFAULT_BLOCK_REASON);
    }

    #[test]
    fn test_block_is_idempotent() {
        let blocklist = IpBlocklist::new();

        blocklist.block("1.2.3.4", Some("first"));
        blocklist.block("1.2.3.4", Some("second"));

        assert_eq!(blocklist.len(), 1);
        assert_eq!(blocklist.list(), vec!["1.2.3.4".to_string()]);

        let entry = blocklist.entry("1.2.3.4").unwrap();
        assert_eq!(entry.reason, "second");
        assert_eq!(entry.block_count, 2);
    }

    #[test]
    fn test_unblock_non_member_is_noop() {
        let blocklist = IpBlocklist::new();
        blocklist.block("1.2.3.4", None);

        assert!(!blocklist.unblock("9.9.9.9"));
        assert_eq!(blocklist.len(), 1);

        assert!(blocklist.unblock("1.2.3.4"));
        assert!(!blocklist.unblock("1.2.3.4"));
        assert!(blocklist.is_empty());
    }

    #[test]
    fn test_multiple_identities() {
        let blocklist = IpBlocklist::new();

        blocklist.block("1.2.3.4", None);
        blocklist.block("5.6.7.8", None);

        let listed = blocklist.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&"1.2.3.4".to_string()));
        assert!(listed.contains(&"5.6.7.8".to_string()));
        assert!(!blocklist.is_blocked("10.0.0.1"));
    }

    #[test]
    fn test_clear() {
        let blocklist = IpBlocklist::new();
        blocklist.block("1.2.3.4", None);
        blocklist.block("5.6.7.8", None);

        blocklist.clear();
        assert!(blocklist.is_empty());
    }

    #[test]
    fn test_concurrent_block_unblock() {
        let blocklist = Arc::new(IpBlocklist::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let blocklist = Arc::clone(&blocklist);
                thread::spawn(move || {
                    let ip = format!("10.0.0.{i}");
                    for _ in 0..100 {
                        blocklist.block(&ip, None);
                        blocklist.unblock(&ip);
                    }
                    blocklist.block(&ip, None);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(blocklist.len(), 8);
    }

    #[test]
    fn test_trait_object() {
        let store: Arc<dyn BlocklistStore> = Arc::new(IpBlocklist::new());
        store.block("1.2.3.4", Some("via trait"));
        assert!(store.is_blocked("1.2.3.4"));
        assert_eq!(store.len(), 1);
    }
}
