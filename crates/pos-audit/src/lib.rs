//! # pos-audit
//!
//! Attack telemetry for the POS backend API.
//!
//! This crate records attack attempts observed by the admission layer and
//! answers the aggregate questions the security dashboard asks of them.
//!
//! ## Features
//!
//! - [`AttackEvent`] - One recorded attempt; `blocked` derives from [`Severity`]
//! - [`AttackStore`] - Pluggable storage trait
//! - [`MemoryAttackStore`] / [`FileAttackStore`] - In-memory and JSON-lines backends
//! - [`AttackMonitor`] - Logger, statistics aggregator and retention cleanup
//!
//! ## Example
//!
//! ```rust
//! use pos_audit::{AttackMonitor, RequestInfo, Severity};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let monitor = AttackMonitor::in_memory();
//! let request = RequestInfo::new("203.0.113.5", "POST", "/api/auth/login");
//!
//! monitor
//!     .log_attack(&request, "BRUTE_FORCE", Severity::High, serde_json::json!({}))
//!     .await;
//!
//! let top = monitor.top_attackers(10, 24).await;
//! assert_eq!(top[0].ip, "203.0.113.5");
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod file_store;
pub mod monitor;
pub mod store;

// Re-export main types
pub use error::{AuditError, Result};
pub use events::{AttackEvent, AttackEventBuilder, RequestInfo, Severity};
pub use file_store::FileAttackStore;
pub use monitor::{
    AttackMonitor, AttackStatistic, DEFAULT_RETENTION_DAYS, DEFAULT_STATS_HOURS,
    DEFAULT_TOP_LIMIT, TopAttacker,
};
pub use store::{AttackStore, MemoryAttackStore};
