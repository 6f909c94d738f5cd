//! Attack logging and statistics.
//!
//! [`AttackMonitor`] is the single entry point the HTTP layer talks to. It
//! never fails to its caller: storage errors are logged and absorbed, and
//! the read paths degrade to empty results.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task;

use crate::error::{AuditError, Result};
use crate::events::{AttackEvent, RequestInfo, Severity};
use crate::store::{AttackStore, MemoryAttackStore};

/// Default look-back for statistics.
pub const DEFAULT_STATS_HOURS: u32 = 24;

/// Default number of top attackers.
pub const DEFAULT_TOP_LIMIT: usize = 10;

/// Default retention for LOW/MEDIUM events.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Count of events sharing an attack type, severity and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackStatistic {
    /// Attack category.
    pub attack_type: String,
    /// Severity.
    pub severity: Severity,
    /// Client identity.
    pub ip: String,
    /// Number of events.
    pub count: u64,
}

/// Per-identity attack summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopAttacker {
    /// Client identity.
    pub ip: String,
    /// Number of events.
    pub attack_count: u64,
    /// Highest severity seen.
    pub max_severity: Severity,
}

/// Records attacks and answers statistics queries.
#[derive(Debug, Clone)]
pub struct AttackMonitor {
    store: Arc<dyn AttackStore>,
}

impl AttackMonitor {
    /// Creates a monitor over a store.
    #[must_use]
    pub fn new(store: Arc<dyn AttackStore>) -> Self {
        Self { store }
    }

    /// Creates a monitor with a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAttackStore::new()))
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AttackStore> {
        &self.store
    }

    /// Records an attack.
    ///
    /// Returns the stored event, or `None` when persistence failed. Failures
    /// are logged, never propagated.
    pub async fn log_attack(
        &self,
        request: &RequestInfo,
        attack_type: &str,
        severity: Severity,
        details: serde_json::Value,
    ) -> Option<AttackEvent> {
        let event = AttackEvent::new(request, attack_type, severity, details);
        trace_event(&event);

        let store = Arc::clone(&self.store);
        let stored = event.clone();
        match run_blocking(move || store.append(stored)).await {
            Ok(()) => Some(event),
            Err(err) => {
                tracing::error!(
                    target: "pos_audit",
                    error = %err,
                    ip = %event.ip(),
                    attack_type = %event.attack_type(),
                    "Failed to persist attack event"
                );
                None
            }
        }
    }

    /// Counts events of the last `hours`, grouped by (type, severity, ip),
    /// largest groups first.
    pub async fn attack_statistics(&self, hours: u32) -> Vec<AttackStatistic> {
        match self.recent(hours).await {
            Ok(events) => aggregate_statistics(&events),
            Err(err) => {
                tracing::error!(target: "pos_audit", error = %err, "Failed to load attack statistics");
                Vec::new()
            }
        }
    }

    /// Ranks identities by event count over the last `hours`.
    pub async fn top_attackers(&self, limit: usize, hours: u32) -> Vec<TopAttacker> {
        match self.recent(hours).await {
            Ok(events) => rank_attackers(&events, limit),
            Err(err) => {
                tracing::error!(target: "pos_audit", error = %err, "Failed to load top attackers");
                Vec::new()
            }
        }
    }

    /// Deletes LOW and MEDIUM events older than `days`. HIGH and CRITICAL
    /// events are kept forever.
    ///
    /// Returns the number of deleted events, 0 on failure.
    pub async fn clean_old_logs(&self, days: u32) -> usize {
        let cutoff = cutoff_before(Duration::try_days(i64::from(days)));
        let store = Arc::clone(&self.store);

        let result = run_blocking(move || {
            store.retain(&|e: &AttackEvent| e.created_at() >= cutoff || e.severity() >= Severity::High)
        })
        .await;

        match result {
            Ok(deleted) => {
                tracing::info!(target: "pos_audit", deleted, days, "Cleaned old attack logs");
                deleted
            }
            Err(err) => {
                tracing::error!(target: "pos_audit", error = %err, "Failed to clean attack logs");
                0
            }
        }
    }

    async fn recent(&self, hours: u32) -> Result<Vec<AttackEvent>> {
        let since = cutoff_before(Duration::try_hours(i64::from(hours)));
        let store = Arc::clone(&self.store);
        run_blocking(move || store.events_since(since)).await
    }
}

impl Default for AttackMonitor {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// `now - span`, clamped to the earliest representable instant when the
/// span does not fit.
fn cutoff_before(span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|span| Utc::now().checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Runs a store call off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| AuditError::Storage(format!("storage task failed: {e}")))?
}

/// Emits a tracing record at a level mapped from severity.
fn trace_event(event: &AttackEvent) {
    let id = event.id();
    let ip = event.ip();
    let attack_type = event.attack_type();
    let endpoint = event.endpoint();
    let severity = event.severity();
    let blocked = event.blocked();

    match severity {
        Severity::Low => {
            tracing::info!(target: "pos_audit", %id, %ip, %attack_type, %endpoint, %severity, blocked, "Attack detected");
        }
        Severity::Medium => {
            tracing::warn!(target: "pos_audit", %id, %ip, %attack_type, %endpoint, %severity, blocked, "Attack detected");
        }
        Severity::High | Severity::Critical => {
            tracing::error!(target: "pos_audit", %id, %ip, %attack_type, %endpoint, %severity, blocked, "Attack detected");
        }
    }
}

/// Groups events by (type, severity, ip). Equal counts are ordered by ip,
/// then attack type, then severity.
#[must_use]
pub fn aggregate_statistics(events: &[AttackEvent]) -> Vec<AttackStatistic> {
    let mut groups: HashMap<(&str, Severity, &str), u64> = HashMap::new();
    for event in events {
        *groups
            .entry((event.attack_type(), event.severity(), event.ip()))
            .or_default() += 1;
    }

    let mut stats: Vec<AttackStatistic> = groups
        .into_iter()
        .map(|((attack_type, severity, ip), count)| AttackStatistic {
            attack_type: attack_type.to_string(),
            severity,
            ip: ip.to_string(),
            count,
        })
        .collect();

    stats.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.ip.cmp(&b.ip))
            .then_with(|| a.attack_type.cmp(&b.attack_type))
            .then_with(|| a.severity.cmp(&b.severity))
    });
    stats
}

/// Groups events by ip, keeps the highest severity, and returns at most
/// `limit` identities, most active first. Equal counts are ordered by ip.
#[must_use]
pub fn rank_attackers(events: &[AttackEvent], limit: usize) -> Vec<TopAttacker> {
    let mut by_ip: HashMap<&str, (u64, Severity)> = HashMap::new();
    for event in events {
        let entry = by_ip.entry(event.ip()).or_insert((0, event.severity()));
        entry.0 += 1;
        entry.1 = entry.1.max(event.severity());
    }

    let mut ranked: Vec<TopAttacker> = by_ip
        .into_iter()
        .map(|(ip, (attack_count, max_severity))| TopAttacker {
            ip: ip.to_string(),
            attack_count,
            max_severity,
        })
        .collect();

    ranked.sort_by(|a, b| b.attack_count.cmp(&a.attack_count).then_with(|| a.ip.cmp(&b.ip)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn event_at(ip: &str, attack_type: &str, severity: Severity, age: Duration) -> AttackEvent {
        AttackEvent::builder()
            .ip(ip)
            .attack_type(attack_type)
            .endpoint("GET /api/products")
            .severity(severity)
            .created_at(Utc::now() - age)
            .build()
            .unwrap()
    }

    fn seeded(events: Vec<AttackEvent>) -> AttackMonitor {
        let store = MemoryAttackStore::new();
        for event in events {
            store.append(event).unwrap();
        }
        AttackMonitor::new(Arc::new(store))
    }

    /// Store whose every operation fails.
    #[derive(Debug)]
    struct FailingStore;

    impl AttackStore for FailingStore {
        fn append(&self, _event: AttackEvent) -> Result<()> {
            Err(AuditError::Storage("unavailable".into()))
        }

        fn events_since(&self, _since: chrono::DateTime<Utc>) -> Result<Vec<AttackEvent>> {
            Err(AuditError::Storage("unavailable".into()))
        }

        fn retain(&self, _keep: &(dyn Fn(&AttackEvent) -> bool + Sync)) -> Result<usize> {
            Err(AuditError::Storage("unavailable".into()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    // ==================== log_attack ====================

    #[tokio::test]
    async fn log_attack_persists_event() {
        let monitor = AttackMonitor::in_memory();
        let request = RequestInfo::new("203.0.113.5", "POST", "/api/auth/login")
            .with_user_agent("python-requests/2.31");

        let event = monitor
            .log_attack(&request, "BRUTE_FORCE", Severity::Critical, json!({"attempts": 12}))
            .await
            .unwrap();

        assert!(event.blocked());
        assert_eq!(event.endpoint(), "POST /api/auth/login");
        assert_eq!(monitor.store().len(), 1);
    }

    #[tokio::test]
    async fn log_attack_low_is_not_blocked() {
        let monitor = AttackMonitor::in_memory();
        let request = RequestInfo::new("198.51.100.1", "GET", "/");

        let event = monitor
            .log_attack(&request, "SCAN", Severity::default(), json!({}))
            .await
            .unwrap();
        assert!(!event.blocked());
        assert_eq!(event.severity(), Severity::Low);
    }

    #[tokio::test]
    async fn log_attack_absorbs_store_failure() {
        let monitor = AttackMonitor::new(Arc::new(FailingStore));
        let request = RequestInfo::new("198.51.100.1", "GET", "/");

        let result = monitor.log_attack(&request, "SCAN", Severity::High, json!({})).await;
        assert!(result.is_none());
    }

    // ==================== statistics ====================

    #[tokio::test]
    async fn statistics_group_and_sort() {
        let monitor = seeded(vec![
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::hours(1)),
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::hours(2)),
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::hours(3)),
            event_at("2.2.2.2", "BRUTE_FORCE", Severity::High, Duration::hours(1)),
            event_at("1.1.1.1", "SCAN", Severity::Medium, Duration::hours(1)),
            event_at("3.3.3.3", "SCAN", Severity::Low, Duration::hours(30)),
        ]);

        let stats = monitor.attack_statistics(DEFAULT_STATS_HOURS).await;
        assert_eq!(stats.len(), 3);
        assert_eq!(
            stats[0],
            AttackStatistic {
                attack_type: "SCAN".into(),
                severity: Severity::Low,
                ip: "1.1.1.1".into(),
                count: 3,
            }
        );
        assert!(stats.windows(2).all(|w| w[0].count >= w[1].count));
        assert!(stats.iter().all(|s| s.ip != "3.3.3.3"));

        // Widening the window picks up the older event.
        let stats = monitor.attack_statistics(48).await;
        assert_eq!(stats.len(), 4);
    }

    #[tokio::test]
    async fn statistics_serialize_camel_case() {
        let monitor = seeded(vec![event_at("1.1.1.1", "SCAN", Severity::Low, Duration::zero())]);
        let stats = monitor.attack_statistics(24).await;
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json[0]["attackType"], "SCAN");
        assert_eq!(json[0]["severity"], "LOW");
        assert_eq!(json[0]["count"], 1);
    }

    #[tokio::test]
    async fn statistics_empty_on_failure() {
        let monitor = AttackMonitor::new(Arc::new(FailingStore));
        assert!(monitor.attack_statistics(24).await.is_empty());
        assert!(monitor.top_attackers(10, 24).await.is_empty());
    }

    // ==================== top attackers ====================

    #[tokio::test]
    async fn top_attackers_ranked_with_max_severity() {
        let monitor = seeded(vec![
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::hours(1)),
            event_at("1.1.1.1", "BRUTE_FORCE", Severity::Critical, Duration::hours(1)),
            event_at("1.1.1.1", "SCAN", Severity::Medium, Duration::hours(1)),
            event_at("2.2.2.2", "SCAN", Severity::Medium, Duration::hours(1)),
            event_at("2.2.2.2", "SCAN", Severity::Low, Duration::hours(1)),
            event_at("3.3.3.3", "SCAN", Severity::High, Duration::hours(1)),
        ]);

        let top = monitor.top_attackers(DEFAULT_TOP_LIMIT, 24).await;
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].ip, "1.1.1.1");
        assert_eq!(top[0].attack_count, 3);
        assert_eq!(top[0].max_severity, Severity::Critical);
        assert_eq!(top[1].ip, "2.2.2.2");
        assert_eq!(top[1].max_severity, Severity::Medium);
        assert_eq!(top[2].max_severity, Severity::High);

        let top = monitor.top_attackers(1, 24).await;
        assert_eq!(top.len(), 1);

        let json = serde_json::to_value(&top).unwrap();
        assert_eq!(json[0]["attackCount"], 3);
        assert_eq!(json[0]["maxSeverity"], "CRITICAL");
    }

    #[test]
    fn rank_ties_broken_by_ip() {
        let events = vec![
            event_at("9.9.9.9", "SCAN", Severity::Low, Duration::zero()),
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::zero()),
        ];
        let ranked = rank_attackers(&events, 10);
        assert_eq!(ranked[0].ip, "1.1.1.1");
        assert_eq!(ranked[1].ip, "9.9.9.9");
    }

    // ==================== cleanup ====================

    #[tokio::test]
    async fn cleanup_keeps_high_and_critical() {
        let monitor = seeded(vec![
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::days(40)),
            event_at("1.1.1.1", "SCAN", Severity::Medium, Duration::days(31)),
            event_at("1.1.1.1", "SCAN", Severity::High, Duration::days(400)),
            event_at("1.1.1.1", "SCAN", Severity::Critical, Duration::days(90)),
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::days(5)),
        ]);

        let deleted = monitor.clean_old_logs(DEFAULT_RETENTION_DAYS).await;
        assert_eq!(deleted, 2);
        assert_eq!(monitor.store().len(), 3);

        let remaining = monitor.store().events_since(Utc::now() - Duration::days(1000)).unwrap();
        assert!(remaining
            .iter()
            .all(|e| e.severity() >= Severity::High || e.created_at() > Utc::now() - Duration::days(30)));
    }

    #[tokio::test]
    async fn huge_windows_clamp_instead_of_overflowing() {
        let monitor = seeded(vec![
            event_at("1.1.1.1", "SCAN", Severity::Low, Duration::days(3650)),
            event_at("2.2.2.2", "SCAN", Severity::Medium, Duration::hours(1)),
        ]);

        let stats = monitor.attack_statistics(u32::MAX).await;
        assert_eq!(stats.len(), 2);
        assert_eq!(monitor.top_attackers(DEFAULT_TOP_LIMIT, u32::MAX).await.len(), 2);

        assert_eq!(monitor.clean_old_logs(u32::MAX).await, 0);
        assert_eq!(monitor.store().len(), 2);
    }

    #[test]
    fn cutoff_clamps_to_earliest_instant() {
        assert_eq!(cutoff_before(None), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            cutoff_before(Duration::try_days(i64::from(u32::MAX))),
            DateTime::<Utc>::MIN_UTC
        );
        assert!(cutoff_before(Duration::try_hours(1)) < Utc::now());
    }

    #[tokio::test]
    async fn cleanup_zero_on_failure() {
        let monitor = AttackMonitor::new(Arc::new(FailingStore));
        assert_eq!(monitor.clean_old_logs(30).await, 0);
    }

    proptest! {
        #[test]
        fn top_attackers_bounded_and_sorted(
            ips in proptest::collection::vec(0u8..20, 0..80),
            limit in 0usize..15,
        ) {
            let events: Vec<AttackEvent> = ips
                .iter()
                .map(|n| event_at(&format!("10.0.0.{n}"), "SCAN", Severity::Low, Duration::zero()))
                .collect();
            let ranked = rank_attackers(&events, limit);

            prop_assert!(ranked.len() <= limit);
            prop_assert!(ranked.windows(2).all(|w| w[0].attack_count >= w[1].attack_count));
            let total: u64 = rank_attackers(&events, usize::MAX).iter().map(|t| t.attack_count).sum();
            prop_assert_eq!(total, events.len() as u64);
        }
    }
}
