//! HTTP request handlers for the security admin API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, Request, State};
use axum::http::header;
use chrono::{DateTime, Utc};
use pos_audit::{
    AttackStatistic, DEFAULT_RETENTION_DAYS, DEFAULT_STATS_HOURS, DEFAULT_TOP_LIMIT, TopAttacker,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AdminError, AdminResult};
use crate::middleware::{ClientIdentity, identity_sources};
use crate::state::AppState;
use crate::validation::is_valid_ipv4;

/// Query parameters for statistics.
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    /// Look-back window in hours.
    pub hours: Option<u32>,
}

/// Body of `POST /block-ip`.
#[derive(Debug, Default, Deserialize)]
pub struct BlockIpRequest {
    /// Address to block.
    pub ip: Option<String>,
    /// Why the address is blocked.
    pub reason: Option<String>,
}

/// Body of `POST /unblock-ip`.
#[derive(Debug, Default, Deserialize)]
pub struct UnblockIpRequest {
    /// Address to unblock.
    pub ip: Option<String>,
}

/// Body of `POST /cleanup`.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Retention for LOW and MEDIUM events, in days.
    pub days: Option<u32>,
}

/// Successful response wrapping a payload.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    /// Always `true`.
    pub success: bool,
    /// Payload.
    pub data: T,
}

impl<T> DataResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Status message.
    pub status: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

/// Payload of `GET /stats`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsData {
    /// Human-readable window, e.g. `"24 hours"`.
    pub timeframe: String,
    /// Event counts per type, severity and identity.
    pub statistics: Vec<AttackStatistic>,
    /// Most active identities.
    pub top_attackers: Vec<TopAttacker>,
    /// Currently blocked identities.
    #[serde(rename = "blockedIPs")]
    pub blocked_ips: Vec<String>,
}

/// Response of the block and unblock endpoints.
#[derive(Debug, Serialize)]
pub struct BlocklistChangeResponse {
    /// Always `true`.
    pub success: bool,
    /// What happened.
    pub message: String,
    /// Blocklist after the change.
    #[serde(rename = "blockedIPs")]
    pub blocked_ips: Vec<String>,
}

/// Payload of `GET /blocked-ips`.
#[derive(Debug, Serialize)]
pub struct BlockedIpsData {
    /// Blocked identities.
    #[serde(rename = "blockedIPs")]
    pub blocked_ips: Vec<String>,
    /// Number of blocked identities.
    pub count: usize,
}

/// Response of `POST /cleanup`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    /// Always `true`.
    pub success: bool,
    /// What happened.
    pub message: String,
    /// Number of events removed.
    pub deleted_count: usize,
}

/// Payload of `GET /request-info`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfoData {
    /// Resolved client identity.
    pub ip: String,
    /// `user-agent` header.
    pub user_agent: Option<String>,
    /// Request headers; repeated headers are comma-joined.
    pub headers: BTreeMap<String, String>,
    /// When the request was handled.
    pub timestamp: DateTime<Utc>,
}

/// Decode an optional JSON body. An empty body yields the default.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> AdminResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AdminError::InvalidRequest(format!("Invalid JSON body: {e}")))
}

fn required_ip(ip: Option<String>) -> AdminResult<String> {
    ip.map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| AdminError::InvalidRequest("IP address is required".to_string()))
}

/// Handle GET /health - health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
    })
}

/// Handle GET /admin/security/stats - attack statistics.
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> AdminResult<Json<DataResponse<StatsData>>> {
    let Query(query) = query.map_err(|e| AdminError::InvalidRequest(e.body_text()))?;
    let hours = query.hours.unwrap_or(DEFAULT_STATS_HOURS);

    let statistics = state.monitor().attack_statistics(hours).await;
    let top_attackers = state.monitor().top_attackers(DEFAULT_TOP_LIMIT, hours).await;

    Ok(DataResponse::ok(StatsData {
        timeframe: format!("{hours} hours"),
        statistics,
        top_attackers,
        blocked_ips: state.blocked_ips(),
    }))
}

/// Handle POST /admin/security/block-ip - add an address to the blocklist.
pub async fn block_ip(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AdminResult<Json<BlocklistChangeResponse>> {
    let request: BlockIpRequest = parse_body(&body)?;
    let ip = required_ip(request.ip)?;
    if !is_valid_ipv4(&ip) {
        return Err(AdminError::InvalidRequest(
            "Invalid IP address format".to_string(),
        ));
    }

    let reason = request.reason.as_deref().filter(|r| !r.trim().is_empty());
    state.blocklist().block(&ip, reason);
    info!(ip = %ip, reason = ?reason, "IP blocked via admin API");

    Ok(Json(BlocklistChangeResponse {
        success: true,
        message: format!("IP {ip} has been blocked"),
        blocked_ips: state.blocked_ips(),
    }))
}

/// Handle POST /admin/security/unblock-ip - remove an address from the blocklist.
pub async fn unblock_ip(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AdminResult<Json<BlocklistChangeResponse>> {
    let request: UnblockIpRequest = parse_body(&body)?;
    let ip = required_ip(request.ip)?;

    let was_blocked = state.blocklist().unblock(&ip);
    info!(ip = %ip, was_blocked, "IP unblocked via admin API");

    Ok(Json(BlocklistChangeResponse {
        success: true,
        message: format!("IP {ip} has been unblocked"),
        blocked_ips: state.blocked_ips(),
    }))
}

/// Handle GET /admin/security/blocked-ips - list the blocklist.
pub async fn list_blocked(State(state): State<Arc<AppState>>) -> Json<DataResponse<BlockedIpsData>> {
    let blocked_ips = state.blocked_ips();
    DataResponse::ok(BlockedIpsData {
        count: blocked_ips.len(),
        blocked_ips,
    })
}

/// Handle POST /admin/security/cleanup - apply attack log retention.
pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AdminResult<Json<CleanupResponse>> {
    let request: CleanupRequest = parse_body(&body)?;
    let days = request.days.unwrap_or(DEFAULT_RETENTION_DAYS);

    let deleted_count = state.monitor().clean_old_logs(days).await;

    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Cleaned up {deleted_count} attack logs older than {days} days"),
        deleted_count,
    }))
}

/// Handle GET /admin/security/request-info - echo what the server sees.
pub async fn request_info(request: Request) -> Json<DataResponse<RequestInfoData>> {
    let ip = match request.extensions().get::<ClientIdentity>() {
        Some(ClientIdentity(ip)) => ip.clone(),
        None => identity_sources(&request).resolve(),
    };

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in request.headers() {
        let value = String::from_utf8_lossy(value.as_bytes());
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    DataResponse::ok(RequestInfoData {
        ip,
        user_agent,
        headers,
        timestamp: Utc::now(),
    })
}
