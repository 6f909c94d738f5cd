//! Attack event types.
//!
//! An [`AttackEvent`] is one observed attack attempt. Events are immutable
//! once built; the `blocked` flag is derived from the severity at
//! construction and recomputed when an event is read back from storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuditError, Result};

/// Severity level for attack events.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Noteworthy but harmless (e.g., scraper user agent).
    #[default]
    Low = 0,
    /// Repeated abuse (e.g., general rate limit hit).
    Medium = 1,
    /// Targeted abuse (e.g., credential stuffing).
    High = 2,
    /// Active attack.
    Critical = 3,
}

impl Severity {
    /// Returns the string representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Whether events of this severity are flagged as blocked.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Request attributes recorded with an attack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Resolved client identity.
    pub ip: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// `user-agent` header, if any.
    pub user_agent: Option<String>,
}

impl RequestInfo {
    /// Create request info.
    #[must_use]
    pub fn new(ip: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            method: method.into(),
            path: path.into(),
            user_agent: None,
        }
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// `"METHOD path"`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// One recorded attack attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredAttackEvent")]
pub struct AttackEvent {
    id: Uuid,
    ip: String,
    attack_type: String,
    endpoint: String,
    user_agent: Option<String>,
    severity: Severity,
    details: serde_json::Value,
    blocked: bool,
    created_at: DateTime<Utc>,
}

/// On-disk shape; `blocked` is ignored and recomputed.
#[derive(Deserialize)]
struct StoredAttackEvent {
    id: Uuid,
    ip: String,
    attack_type: String,
    endpoint: String,
    #[serde(default)]
    user_agent: Option<String>,
    severity: Severity,
    #[serde(default = "empty_details")]
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<StoredAttackEvent> for AttackEvent {
    fn from(stored: StoredAttackEvent) -> Self {
        Self {
            id: stored.id,
            ip: stored.ip,
            attack_type: stored.attack_type,
            endpoint: stored.endpoint,
            user_agent: stored.user_agent,
            severity: stored.severity,
            details: stored.details,
            blocked: stored.severity.is_blocking(),
            created_at: stored.created_at,
        }
    }
}

fn empty_details() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl AttackEvent {
    /// Creates a new event builder.
    #[must_use]
    pub fn builder() -> AttackEventBuilder {
        AttackEventBuilder::default()
    }

    /// Creates an event for a request, stamped now.
    #[must_use]
    pub fn new(
        request: &RequestInfo,
        attack_type: impl Into<String>,
        severity: Severity,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip: request.ip.clone(),
            attack_type: attack_type.into(),
            endpoint: request.endpoint(),
            user_agent: request.user_agent.clone(),
            severity,
            details: normalize_details(details),
            blocked: severity.is_blocking(),
            created_at: Utc::now(),
        }
    }

    /// Unique event identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Client identity.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Attack category.
    #[must_use]
    pub fn attack_type(&self) -> &str {
        &self.attack_type
    }

    /// `"METHOD path"` of the offending request.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// User agent of the offending request.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Free-form details.
    #[must_use]
    pub const fn details(&self) -> &serde_json::Value {
        &self.details
    }

    /// Whether the event is flagged as blocked (HIGH or CRITICAL).
    #[must_use]
    pub const fn blocked(&self) -> bool {
        self.blocked
    }

    /// When the event was recorded.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serializes the event to a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AuditError::from)
    }
}

/// Non-object details are wrapped so stored events always carry an object.
fn normalize_details(details: serde_json::Value) -> serde_json::Value {
    match details {
        serde_json::Value::Object(_) => details,
        serde_json::Value::Null => empty_details(),
        other => serde_json::json!({ "value": other }),
    }
}

/// Builder for attack events.
#[derive(Debug, Default)]
pub struct AttackEventBuilder {
    ip: Option<String>,
    attack_type: Option<String>,
    endpoint: Option<String>,
    user_agent: Option<String>,
    severity: Severity,
    details: serde_json::Map<String, serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
}

impl AttackEventBuilder {
    /// Sets the client identity.
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Sets the attack category.
    #[must_use]
    pub fn attack_type(mut self, attack_type: impl Into<String>) -> Self {
        self.attack_type = Some(attack_type.into());
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Fills ip, endpoint and user agent from a request.
    #[must_use]
    pub fn request(mut self, request: &RequestInfo) -> Self {
        self.ip = Some(request.ip.clone());
        self.endpoint = Some(request.endpoint());
        self.user_agent.clone_from(&request.user_agent);
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the severity (default LOW).
    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Adds a detail field.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Overrides the creation time (defaults to now).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the event.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::MissingField` if `ip` or `attack_type` is unset.
    pub fn build(self) -> Result<AttackEvent> {
        let ip = self.ip.ok_or(AuditError::MissingField("ip"))?;
        let attack_type = self
            .attack_type
            .ok_or(AuditError::MissingField("attack_type"))?;

        Ok(AttackEvent {
            id: Uuid::new_v4(),
            ip,
            attack_type,
            endpoint: self.endpoint.unwrap_or_default(),
            user_agent: self.user_agent,
            severity: self.severity,
            details: serde_json::Value::Object(self.details),
            blocked: self.severity.is_blocking(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}
