//! HTTP glue for the admission pipeline.
//!
//! Per request, outermost first: compression opt-out, response compression,
//! security headers, then [`admission`], which runs the `pos-guard`
//! pipeline and applies its decisions (delay, tagging, parameter cleanup,
//! rate-limit headers) to the request and response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pos_audit::{RequestInfo, Severity};
use pos_guard::{
    AdmissionContext, IdentitySources, Outcome, RateDecision, Rejection, RejectionCode,
    TOO_LARGE_MESSAGE,
};
use serde_json::json;
use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};
use tower_http::compression::{CompressionLayer, CompressionLevel};
use tracing::{debug, warn};

use crate::state::AppState;

/// Request header that disables response compression.
pub const NO_COMPRESSION_HEADER: &str = "x-no-compression";

/// Responses at or below this size are sent uncompressed.
pub const COMPRESSION_THRESHOLD: u16 = 1024;

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Hardening headers added to every response. No
/// `cross-origin-embedder-policy`; resources may be loaded cross-origin.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "cross-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Client address reported by a hosting platform, ahead of the socket.
///
/// [`AdminServer`](crate::AdminServer) never sets this; hosts that learn
/// the client address out of band insert it before [`admission`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr(pub String);

/// Identity resolved for an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Collect every identity source available on a request.
///
/// `ConnectInfo<SocketAddr>` is filled by [`AdminServer`](crate::AdminServer).
/// [`PeerAddr`] and a bare `SocketAddr` extension are only present when an
/// embedding host inserts them.
#[must_use]
pub fn identity_sources(req: &Request) -> IdentitySources {
    let extensions = req.extensions();
    let headers = req.headers();
    let mut sources = IdentitySources::new();

    if let Some(PeerAddr(addr)) = extensions.get::<PeerAddr>() {
        sources = sources.with_peer_addr(addr.clone());
    }
    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        sources = sources.with_remote_addr(addr.ip().to_string());
    }
    if let Some(addr) = extensions.get::<SocketAddr>() {
        sources = sources.with_socket_addr(addr.ip().to_string());
    }
    if let Some(value) = header_str(headers, "x-forwarded-for") {
        sources = sources.with_forwarded_for(value);
    }
    if let Some(value) = header_str(headers, "x-real-ip") {
        sources = sources.with_real_ip(value);
    }
    sources
}

fn admission_context(req: &Request, identity: &str) -> AdmissionContext {
    let headers = req.headers();
    let mut ctx = AdmissionContext::new(identity, req.method().as_str(), req.uri().path());
    ctx.query = req.uri().query().map(str::to_string);
    ctx.content_length = header_str(headers, header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.trim().parse().ok());
    ctx.user_agent = header_str(headers, header::USER_AGENT.as_str()).map(str::to_string);
    ctx.forwarded_for = header_str(headers, "x-forwarded-for").map(str::to_string);
    ctx
}

fn request_info(ctx: &AdmissionContext) -> RequestInfo {
    RequestInfo {
        ip: ctx.identity.clone(),
        method: ctx.method.clone(),
        path: ctx.path.clone(),
        user_agent: ctx.user_agent.clone(),
    }
}

/// Run the admission pipeline for a request.
pub async fn admission(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = identity_sources(&req).resolve();
    let mut ctx = admission_context(&req, &identity);

    if let Outcome::Reject(rejection) = state.pipeline().run(&mut ctx) {
        record_rejection(&state, &ctx, &rejection).await;
        return rejection_response(&rejection);
    }

    if !ctx.delay.is_zero() {
        tokio::time::sleep(ctx.delay).await;
    }

    if let Some(tag) = ctx.tag.take() {
        if tag.is_suspicious && state.config().log_suspicious {
            state
                .monitor()
                .log_attack(
                    &request_info(&ctx),
                    "SUSPICIOUS_USER_AGENT",
                    Severity::Low,
                    json!({ "userAgent": tag.user_agent }),
                )
                .await;
        }
        req.extensions_mut().insert(tag);
    }
    req.extensions_mut().insert(ClientIdentity(identity));

    if let Some(query) = ctx.rewritten_query.as_deref() {
        rewrite_query(&mut req, query);
    }

    let req = match dedupe_form_body(&state, req).await {
        Ok(req) => req,
        Err(response) => return response,
    };

    let mut response = next.run(req).await;
    if let Some(decision) = ctx.rate_limit {
        apply_rate_limit_headers(response.headers_mut(), &decision);
    }
    response
}

/// Record a limiter violation once per identity and window.
async fn record_rejection(state: &AppState, ctx: &AdmissionContext, rejection: &Rejection) {
    if !state.config().log_rejections || !rejection.first_violation {
        return;
    }
    let (attack_type, severity) = match rejection.code() {
        RejectionCode::RateLimitExceeded => ("RATE_LIMIT_VIOLATION", Severity::Medium),
        RejectionCode::AuthRateLimitExceeded => ("AUTH_RATE_LIMIT_VIOLATION", Severity::High),
        RejectionCode::IpBlocked | RejectionCode::RequestTooLarge => return,
    };
    state
        .monitor()
        .log_attack(
            &request_info(ctx),
            attack_type,
            severity,
            json!({ "code": rejection.code().as_str() }),
        )
        .await;
}

/// Render a pipeline rejection as an HTTP response.
#[must_use]
pub fn rejection_response(rejection: &Rejection) -> Response {
    let status = StatusCode::from_u16(rejection.status).unwrap_or(StatusCode::FORBIDDEN);
    let mut response = (status, Json(&rejection.body)).into_response();
    if let Some(secs) = rejection.retry_after_secs {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let reset = decision.reset_after.as_secs()
        + u64::from(decision.reset_after.subsec_nanos() > 0);
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(reset));
}

fn rewrite_query(req: &mut Request, query: &str) {
    let Ok(path_and_query) = PathAndQuery::try_from(format!("{}?{query}", req.uri().path())) else {
        return;
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    if let Ok(uri) = Uri::from_parts(parts) {
        *req.uri_mut() = uri;
    }
}

async fn dedupe_form_body(state: &AppState, req: Request) -> Result<Request, Response> {
    let is_form = header_str(req.headers(), header::CONTENT_TYPE.as_str())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form || !state.config().guard.parameters.enabled {
        return Ok(req);
    }

    let limit = usize::try_from(state.config().guard.size_limit.max_body_bytes).unwrap_or(usize::MAX);
    let (mut parts, body) = req.into_parts();
    let Ok(bytes) = to_bytes(body, limit).await else {
        warn!(path = %parts.uri.path(), "Form body exceeded size limit");
        return Err(rejection_response(&Rejection::new(
            RejectionCode::RequestTooLarge,
            TOO_LARGE_MESSAGE,
        )));
    };

    let deduped = std::str::from_utf8(&bytes)
        .ok()
        .and_then(|form| state.form_filter().dedupe_encoded(form));
    let bytes = match deduped {
        Some(result) => {
            debug!(keys = ?result.collapsed, "Collapsed duplicate form fields");
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(result.encoded.len()));
            Bytes::from(result.encoded)
        }
        None => bytes,
    };
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// Add the hardening header set to every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers
            .entry(name)
            .or_insert_with(|| HeaderValue::from_static(value));
    }
    headers.remove("x-powered-by");
    response
}

/// Drop `accept-encoding` when the client opts out of compression.
pub async fn honor_no_compression(mut req: Request, next: Next) -> Response {
    if req.headers().contains_key(NO_COMPRESSION_HEADER) {
        req.headers_mut().remove(header::ACCEPT_ENCODING);
    }
    next.run(req).await
}

/// Response compression: level 6, bodies above [`COMPRESSION_THRESHOLD`].
#[must_use]
pub fn compression_layer() -> CompressionLayer<impl Predicate + Clone> {
    let predicate = SizeAbove::new(COMPRESSION_THRESHOLD)
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE);
    CompressionLayer::new()
        .quality(CompressionLevel::Precise(6))
        .compress_when(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_identity_precedence() {
        let mut req = axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "1.2.3.4, 5.6.6.6")
            .header("x-real-ip", "9.9.9.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(identity_sources(&req).resolve(), "1.2.3.4");

        req.extensions_mut()
            .insert(SocketAddr::from(([10, 0, 0, 3], 4000)));
        assert_eq!(identity_sources(&req).resolve(), "10.0.0.3");

        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 4000))));
        assert_eq!(identity_sources(&req).resolve(), "10.0.0.2");

        req.extensions_mut().insert(PeerAddr("10.0.0.1".into()));
        assert_eq!(identity_sources(&req).resolve(), "10.0.0.1");
    }

    #[test]
    fn test_identity_unknown() {
        let req = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(identity_sources(&req).resolve(), "unknown");
    }

    #[test]
    fn test_admission_context_from_request() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/orders?x=1")
            .header("content-length", "42")
            .header("user-agent", "curl/8.0")
            .body(Body::empty())
            .unwrap();
        let ctx = admission_context(&req, "1.2.3.4");

        assert_eq!(ctx.endpoint(), "POST /api/orders");
        assert_eq!(ctx.query.as_deref(), Some("x=1"));
        assert_eq!(ctx.content_length, Some(42));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_rewrite_query() {
        let mut req = axum::http::Request::builder()
            .uri("/api/products?id=1&id=2")
            .body(Body::empty())
            .unwrap();
        rewrite_query(&mut req, "id=2");
        assert_eq!(req.uri().path(), "/api/products");
        assert_eq!(req.uri().query(), Some("id=2"));
    }

    #[test]
    fn test_rejection_response_headers() {
        let rejection = Rejection::new(RejectionCode::RateLimitExceeded, "slow down")
            .with_retry_after(Duration::from_secs(900), Duration::from_secs(120));
        let response = rejection_response(&rejection);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        let decision = RateDecision {
            allowed: true,
            limit: 100,
            hits: 3,
            remaining: 97,
            reset_after: Duration::from_millis(899_500),
        };
        apply_rate_limit_headers(&mut headers, &decision);

        assert_eq!(headers["ratelimit-limit"], "100");
        assert_eq!(headers["ratelimit-remaining"], "97");
        assert_eq!(headers["ratelimit-reset"], "900");
    }
}
