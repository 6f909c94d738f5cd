//! # pos-guard
//!
//! Request admission control for the POS backend API.
//!
//! Every inbound request passes through an ordered [`AdmissionPipeline`]
//! before it reaches business logic:
//!
//! - [`BlocklistStage`] - rejects manually blocked identities (403)
//! - [`SizeLimitStage`] - rejects oversized declared bodies (413)
//! - [`RateLimitStage`] - fixed-window limits, general and authentication (429)
//! - [`SlowDownStage`] - progressive delay past a soft threshold
//! - [`SuspicionStage`] - tags automated or proxied traffic
//! - [`ParameterStage`] - collapses duplicate query parameters
//!
//! The crate is transport-agnostic: callers resolve the client identity
//! with [`identity::resolve`], fill an [`AdmissionContext`] and act on the
//! returned [`Outcome`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pos_guard::{AdmissionContext, AdmissionPipeline, GuardConfig, IpBlocklist, Outcome};
//! use pos_guard::blocklist::BlocklistStore;
//!
//! let blocklist = Arc::new(IpBlocklist::new());
//! let pipeline = AdmissionPipeline::from_config(&GuardConfig::default(), blocklist.clone());
//!
//! let mut ctx = AdmissionContext::new("203.0.113.5", "GET", "/api/products");
//! assert!(matches!(pipeline.run(&mut ctx), Outcome::Continue));
//!
//! blocklist.block("203.0.113.5", Some("scraping"));
//! let mut ctx = AdmissionContext::new("203.0.113.5", "GET", "/api/products");
//! match pipeline.run(&mut ctx) {
//!     Outcome::Reject(rejection) => assert_eq!(rejection.status, 403),
//!     Outcome::Continue => unreachable!(),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blocklist;
pub mod config;
pub mod error;
pub mod identity;
pub mod params;
pub mod pipeline;
pub mod rate_limit;
pub mod suspicion;

// Re-export main types
pub use blocklist::{BlockEntry, BlocklistStore, IpBlocklist};
pub use config::{
    GuardConfig, GuardConfigBuilder, ParameterConfig, RateLimitConfig, SizeLimitConfig,
    SlowDownConfig, SuspicionConfig, TrustPolicy,
};
pub use error::{GuardError, GuardResult};
pub use identity::IdentitySources;
pub use params::{Deduplicated, ParameterFilter};
pub use pipeline::{
    AdmissionContext, AdmissionPipeline, AdmissionStage, BLOCKED_MESSAGE, BlocklistStage, Outcome,
    ParameterStage, RateLimitStage, Rejection, RejectionBody, RejectionCode, SizeLimitStage,
    SlowDownStage, SuspicionStage, TOO_LARGE_MESSAGE,
};
pub use rate_limit::{FixedWindowLimiter, RateDecision, SlowDown};
pub use suspicion::{RequestTag, SuspicionDetector};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::blocklist::{BlocklistStore, IpBlocklist};
    pub use crate::config::GuardConfig;
    pub use crate::error::{GuardError, GuardResult};
    pub use crate::identity::IdentitySources;
    pub use crate::pipeline::{AdmissionContext, AdmissionPipeline, Outcome, Rejection, RejectionCode};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_basic_admission_flow() {
        let blocklist = Arc::new(IpBlocklist::new());
        let pipeline = AdmissionPipeline::from_config(&GuardConfig::default(), blocklist);

        let identity = IdentitySources::new()
            .with_forwarded_for("203.0.113.10, 10.0.0.1")
            .with_real_ip("10.0.0.1")
            .resolve();
        assert_eq!(identity, "203.0.113.10");

        let mut ctx = AdmissionContext::new(identity, "GET", "/api/products")
            .with_forwarded_for("203.0.113.10, 10.0.0.1");
        assert!(pipeline.run(&mut ctx).is_continue());

        // Two hops marks the request as proxied.
        assert!(ctx.tag.is_some_and(|t| t.is_suspicious));
    }

    #[test]
    fn test_blocklist_shared_with_pipeline() {
        let blocklist = Arc::new(IpBlocklist::new());
        let pipeline = AdmissionPipeline::from_config(&GuardConfig::default(), blocklist.clone());

        blocklist.block("10.0.0.3", Some("test block"));
        let mut ctx = AdmissionContext::new("10.0.0.3", "POST", "/api/orders");
        let outcome = pipeline.run(&mut ctx);
        assert_eq!(outcome.rejection().map(Rejection::code), Some(RejectionCode::IpBlocked));

        blocklist.unblock("10.0.0.3");
        let mut ctx = AdmissionContext::new("10.0.0.3", "POST", "/api/orders");
        assert!(pipeline.run(&mut ctx).is_continue());
    }

    #[test]
    fn test_custom_pipeline() {
        let config = GuardConfig::builder()
            .size_limit(SizeLimitConfig { max_body_bytes: 10 })
            .build();
        let pipeline = AdmissionPipeline::new()
            .with_stage(SizeLimitStage::new(config.size_limit.max_body_bytes));

        let mut ctx = AdmissionContext::new("10.0.0.4", "POST", "/").with_content_length(11);
        let outcome = pipeline.run(&mut ctx);
        assert_eq!(outcome.rejection().map(|r| r.status), Some(413));
    }
}
