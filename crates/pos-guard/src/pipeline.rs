//! The admission pipeline.
//!
//! Every request is described by an [`AdmissionContext`] and handed to an
//! ordered list of [`AdmissionStage`]s. A stage either lets the request
//! continue (possibly after annotating the context) or rejects it; the
//! runner stops at the first rejection. Cheap terminal checks run before
//! the limiters so rejected requests do not consume limiter budget.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::blocklist::BlocklistStore;
use crate::config::{GuardConfig, TrustPolicy, path_matches};
use crate::error::GuardError;
use crate::params::ParameterFilter;
use crate::rate_limit::{FixedWindowLimiter, RateDecision, SlowDown};
use crate::suspicion::{RequestTag, SuspicionDetector};

/// Machine-readable rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    /// General limiter exhausted.
    RateLimitExceeded,
    /// Authentication limiter exhausted.
    AuthRateLimitExceeded,
    /// Identity is blocked.
    IpBlocked,
    /// Declared body too large.
    RequestTooLarge,
}

impl RejectionCode {
    /// Returns the wire representation of this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AuthRateLimitExceeded => "AUTH_RATE_LIMIT_EXCEEDED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::RequestTooLarge => "REQUEST_TOO_LARGE",
        }
    }

    /// HTTP status used for this code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::RateLimitExceeded | Self::AuthRateLimitExceeded => 429,
            Self::IpBlocked => 403,
            Self::RequestTooLarge => 413,
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent to blocked identities.
pub const BLOCKED_MESSAGE: &str = "Access denied. Your IP has been blocked.";

/// Message sent when a body exceeds the size limit.
pub const TOO_LARGE_MESSAGE: &str = "Request entity too large";

/// JSON body returned with a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionBody {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable code.
    pub code: RejectionCode,
    /// Human-readable retry hint.
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

/// A terminal decision against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// HTTP status.
    pub status: u16,
    /// Response body.
    pub body: RejectionBody,
    /// Seconds until a retry may succeed, for the `Retry-After` header.
    pub retry_after_secs: Option<u64>,
    /// First rejection of its limiter window; later ones repeat it.
    pub first_violation: bool,
}

impl Rejection {
    /// Create a rejection with the status implied by `code`.
    #[must_use]
    pub fn new(code: RejectionCode, error: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            body: RejectionBody {
                error: error.into(),
                code,
                retry_after: None,
            },
            retry_after_secs: None,
            first_violation: false,
        }
    }

    /// Attach a retry hint.
    #[must_use]
    pub fn with_retry_after(mut self, window: Duration, reset_after: Duration) -> Self {
        self.body.retry_after = Some(humanize(window));
        self.retry_after_secs = Some(reset_after.as_secs().max(1));
        self
    }

    /// Mark whether this rejection opened the violation for its window.
    #[must_use]
    pub fn with_first_violation(mut self, first: bool) -> Self {
        self.first_violation = first;
        self
    }

    /// The rejection code.
    #[must_use]
    pub const fn code(&self) -> RejectionCode {
        self.body.code
    }
}

/// Decision of a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Pass the request on to the next stage.
    Continue,
    /// Stop and answer with this rejection.
    Reject(Rejection),
}

impl Outcome {
    /// Check if the outcome lets the request through.
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// The rejection, if any.
    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Continue => None,
            Self::Reject(r) => Some(r),
        }
    }
}

/// What the pipeline knows about a request, plus what stages decided.
#[derive(Debug, Clone, Default)]
pub struct AdmissionContext {
    /// Resolved client identity.
    pub identity: String,
    /// HTTP method.
    pub method: String,
    /// Request path without query.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Declared `content-length`.
    pub content_length: Option<u64>,
    /// `user-agent` header.
    pub user_agent: Option<String>,
    /// `x-forwarded-for` header.
    pub forwarded_for: Option<String>,

    /// Delay to apply before the request proceeds.
    pub delay: Duration,
    /// Suspicious-traffic annotation.
    pub tag: Option<RequestTag>,
    /// Query string after duplicate collapsing, when it changed.
    pub rewritten_query: Option<String>,
    /// Keys collapsed by duplicate-parameter protection.
    pub collapsed_params: Vec<String>,
    /// General limiter decision, for rate-limit response headers.
    pub rate_limit: Option<RateDecision>,
}

impl AdmissionContext {
    /// Create a context for a request.
    #[must_use]
    pub fn new(identity: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the declared content length.
    #[must_use]
    pub const fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set the forwarded-for header.
    #[must_use]
    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    /// `"METHOD path"`, as recorded in attack logs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// One step of the admission pipeline.
pub trait AdmissionStage: Send + Sync + fmt::Debug {
    /// Stable stage name for logs.
    fn name(&self) -> &'static str;

    /// Inspect (and possibly annotate) a request.
    fn check(&self, ctx: &mut AdmissionContext) -> Outcome;
}

/// Rejects blocked identities.
#[derive(Debug)]
pub struct BlocklistStage {
    blocklist: Arc<dyn BlocklistStore>,
}

impl BlocklistStage {
    /// Create the stage over a shared blocklist.
    #[must_use]
    pub fn new(blocklist: Arc<dyn BlocklistStore>) -> Self {
        Self { blocklist }
    }
}

impl AdmissionStage for BlocklistStage {
    fn name(&self) -> &'static str {
        "blocklist"
    }

    fn check(&self, ctx: &mut AdmissionContext) -> Outcome {
        match self.blocklist.check(&ctx.identity) {
            Ok(()) => Outcome::Continue,
            Err(err) => {
                warn!(ip = %ctx.identity, endpoint = %ctx.endpoint(), error = %err, "Blocked IP attempted access");
                Outcome::Reject(Rejection::new(RejectionCode::IpBlocked, BLOCKED_MESSAGE))
            }
        }
    }
}

/// Rejects requests declaring an oversized body.
#[derive(Debug)]
pub struct SizeLimitStage {
    max_body_bytes: u64,
}

impl SizeLimitStage {
    /// Create the stage.
    #[must_use]
    pub const fn new(max_body_bytes: u64) -> Self {
        Self { max_body_bytes }
    }
}

impl AdmissionStage for SizeLimitStage {
    fn name(&self) -> &'static str {
        "size_limit"
    }

    fn check(&self, ctx: &mut AdmissionContext) -> Outcome {
        match ctx.content_length {
            Some(declared) if declared > self.max_body_bytes => {
                let err = GuardError::PayloadTooLarge {
                    declared,
                    max: self.max_body_bytes,
                };
                warn!(ip = %ctx.identity, error = %err, "Request too large");
                Outcome::Reject(Rejection::new(RejectionCode::RequestTooLarge, TOO_LARGE_MESSAGE))
            }
            _ => Outcome::Continue,
        }
    }
}

/// Fixed-window limiter, optionally restricted to some paths.
#[derive(Debug)]
pub struct RateLimitStage {
    name: &'static str,
    limiter: FixedWindowLimiter,
    trust: TrustPolicy,
    paths: Option<Vec<String>>,
    code: RejectionCode,
    message: &'static str,
}

impl RateLimitStage {
    /// Limiter applied to every request.
    #[must_use]
    pub fn general(limiter: FixedWindowLimiter, trust: TrustPolicy) -> Self {
        Self {
            name: "rate_limit",
            limiter,
            trust,
            paths: None,
            code: RejectionCode::RateLimitExceeded,
            message: "Too many requests from this IP, please try again later.",
        }
    }

    /// Limiter applied only to authentication paths.
    #[must_use]
    pub fn auth(limiter: FixedWindowLimiter, trust: TrustPolicy, paths: Vec<String>) -> Self {
        Self {
            name: "auth_rate_limit",
            limiter,
            trust,
            paths: Some(paths),
            code: RejectionCode::AuthRateLimitExceeded,
            message: "Too many authentication attempts, please try again later.",
        }
    }

    fn applies_to(&self, path: &str) -> bool {
        self.paths
            .as_ref()
            .is_none_or(|patterns| patterns.iter().any(|p| path_matches(p, path)))
    }
}

impl AdmissionStage for RateLimitStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn check(&self, ctx: &mut AdmissionContext) -> Outcome {
        if !self.applies_to(&ctx.path) || self.trust.is_trusted(&ctx.identity) {
            return Outcome::Continue;
        }

        let decision = self.limiter.hit(&ctx.identity);
        if self.paths.is_none() {
            ctx.rate_limit = Some(decision);
        }

        if decision.allowed {
            return Outcome::Continue;
        }

        warn!(
            ip = %ctx.identity,
            endpoint = %ctx.endpoint(),
            hits = decision.hits,
            limit = decision.limit,
            stage = self.name,
            "Rate limit exceeded"
        );
        Outcome::Reject(
            Rejection::new(self.code, self.message)
                .with_retry_after(self.limiter.window(), decision.reset_after)
                .with_first_violation(decision.hits == decision.limit.saturating_add(1)),
        )
    }
}

/// Progressive delay; never rejects.
#[derive(Debug)]
pub struct SlowDownStage {
    slow_down: SlowDown,
    trust: TrustPolicy,
}

impl SlowDownStage {
    /// Create the stage.
    #[must_use]
    pub const fn new(slow_down: SlowDown, trust: TrustPolicy) -> Self {
        Self { slow_down, trust }
    }
}

impl AdmissionStage for SlowDownStage {
    fn name(&self) -> &'static str {
        "slow_down"
    }

    fn check(&self, ctx: &mut AdmissionContext) -> Outcome {
        if self.trust.is_trusted(&ctx.identity) {
            return Outcome::Continue;
        }
        let delay = self.slow_down.delay_for(&ctx.identity);
        if !delay.is_zero() {
            debug!(ip = %ctx.identity, delay_ms = delay.as_millis() as u64, "Slowing down request");
            ctx.delay = ctx.delay.saturating_add(delay);
        }
        Outcome::Continue
    }
}

/// Attaches a [`RequestTag`]; never rejects.
#[derive(Debug)]
pub struct SuspicionStage {
    detector: SuspicionDetector,
}

impl SuspicionStage {
    /// Create the stage.
    #[must_use]
    pub const fn new(detector: SuspicionDetector) -> Self {
        Self { detector }
    }
}

impl AdmissionStage for SuspicionStage {
    fn name(&self) -> &'static str {
        "suspicion"
    }

    fn check(&self, ctx: &mut AdmissionContext) -> Outcome {
        let tag = self.detector.assess(
            &ctx.identity,
            ctx.user_agent.as_deref(),
            ctx.forwarded_for.as_deref(),
        );
        if tag.is_suspicious {
            debug!(ip = %ctx.identity, user_agent = %tag.user_agent, "Suspicious request tagged");
        }
        ctx.tag = Some(tag);
        Outcome::Continue
    }
}

/// Collapses duplicate query parameters; never rejects.
#[derive(Debug)]
pub struct ParameterStage {
    filter: ParameterFilter,
}

impl ParameterStage {
    /// Create the stage.
    #[must_use]
    pub const fn new(filter: ParameterFilter) -> Self {
        Self { filter }
    }

    /// The underlying filter, for callers that also clean request bodies.
    #[must_use]
    pub const fn filter(&self) -> &ParameterFilter {
        &self.filter
    }
}

impl AdmissionStage for ParameterStage {
    fn name(&self) -> &'static str {
        "parameter_pollution"
    }

    fn check(&self, ctx: &mut AdmissionContext) -> Outcome {
        if let Some(result) = ctx
            .query
            .as_deref()
            .and_then(|q| self.filter.dedupe_encoded(q))
        {
            debug!(ip = %ctx.identity, keys = ?result.collapsed, "Collapsed duplicate query parameters");
            ctx.rewritten_query = Some(result.encoded);
            ctx.collapsed_params.extend(result.collapsed);
        }
        Outcome::Continue
    }
}

/// Ordered list of stages run against every request.
#[derive(Debug, Default)]
pub struct AdmissionPipeline {
    stages: Vec<Box<dyn AdmissionStage>>,
}

impl AdmissionPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl AdmissionStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Build the standard pipeline: blocklist, size limit, general limiter,
    /// auth limiter, slow-down, suspicious-traffic tagging, duplicate
    /// parameters.
    #[must_use]
    pub fn from_config(config: &GuardConfig, blocklist: Arc<dyn BlocklistStore>) -> Self {
        Self::new()
            .with_stage(BlocklistStage::new(blocklist))
            .with_stage(SizeLimitStage::new(config.size_limit.max_body_bytes))
            .with_stage(RateLimitStage::general(
                FixedWindowLimiter::from_config(&config.general_limit),
                config.trust.clone(),
            ))
            .with_stage(RateLimitStage::auth(
                FixedWindowLimiter::from_config(&config.auth_limit),
                config.trust.clone(),
                config.auth_paths.clone(),
            ))
            .with_stage(SlowDownStage::new(
                SlowDown::from_config(&config.slow_down),
                config.trust.clone(),
            ))
            .with_stage(SuspicionStage::new(SuspicionDetector::from_config(
                &config.suspicion,
            )))
            .with_stage(ParameterStage::new(ParameterFilter::from_config(
                &config.parameters,
            )))
    }

    /// Run every stage in order, stopping at the first rejection.
    pub fn run(&self, ctx: &mut AdmissionContext) -> Outcome {
        for stage in &self.stages {
            if let Outcome::Reject(rejection) = stage.check(ctx) {
                debug!(
                    stage = stage.name(),
                    code = %rejection.code(),
                    ip = %ctx.identity,
                    "Request rejected"
                );
                return Outcome::Reject(rejection);
            }
        }
        Outcome::Continue
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Render a window length as `"15 minutes"`, `"1 hour"`, `"30 seconds"`.
fn humanize(window: Duration) -> String {
    let secs = window.as_secs();
    let (n, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
