//! Security event log and rolling metrics
//!
//! Events are append-only: one JSON document per event (TTL = retention)
//! plus a time-ordered index keyed by insertion time, so date-range queries
//! never scan the whole log. Metrics are always recomputed from the raw
//! stream — a view, never a separately maintained counter — so they cannot
//! drift from the events. HIGH and CRITICAL events trigger a best-effort
//! outbound alert; alert failure never fails the request that raised the
//! event.

pub mod monitor;

use chrono::{DateTime, Utc};
use guard_store::{SharedStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

const INDEX_KEY: &str = "talentflow:security:events";
const EVENT_KEY_PREFIX: &str = "talentflow:security:event:";

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Severities at or above this level dispatch an alert.
    pub fn is_alerting(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LoginFailure,
    AccountLockout,
    IpLockout,
    RateLimitExceeded,
    SuspiciousActivity,
    TokenRevoked,
    UserRevoked,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoginFailure => "login_failure",
            EventKind::AccountLockout => "account_lockout",
            EventKind::IpLockout => "ip_lockout",
            EventKind::RateLimitExceeded => "rate_limit_exceeded",
            EventKind::SuspiciousActivity => "suspicious_activity",
            EventKind::TokenRevoked => "token_revoked",
            EventKind::UserRevoked => "user_revoked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable security occurrence. `resolved` (and its companions) is the
/// only mutable surface, set exactly once by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub severity: Severity,
    pub ip: Option<String>,
    pub user_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Builder for the fields callers actually supply.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub severity: Severity,
    pub ip: Option<String>,
    pub user_id: Option<Uuid>,
    pub details: serde_json::Value,
}

impl NewEvent {
    pub fn new(kind: EventKind, severity: Severity) -> Self {
        Self {
            kind,
            severity,
            ip: None,
            user_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,
    pub kind: Option<EventKind>,
    pub resolved: Option<bool>,
    pub ip: Option<String>,
    pub user_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct EventPage {
    pub events: Vec<SecurityEvent>,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct HourlyCount {
    /// Hour bucket in `YYYY-MM-DDTHH:00Z` form.
    pub hour: String,
    pub count: u64,
}

/// Rolling aggregate derived from the event stream for one window.
#[derive(Debug, Serialize)]
pub struct SecurityMetrics {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
    pub top_source_ips: Vec<IpCount>,
    pub hourly: Vec<HourlyCount>,
}

/// Outbound alert dispatch. At-least-once, best-effort.
pub struct AlertWebhook {
    client: reqwest::Client,
    url: String,
}

impl AlertWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    async fn send(&self, event: &SecurityEvent) -> Result<(), reqwest::Error> {
        let payload = serde_json::json!({
            "event": event.kind,
            "ip": event.ip,
            "timestamp": event.timestamp,
            "details": event.details,
            "severity": event.severity,
        });
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct SecurityEventStore {
    store: SharedStore,
    webhook: Option<AlertWebhook>,
    retention: Duration,
}

impl SecurityEventStore {
    pub fn new(store: SharedStore, webhook: Option<AlertWebhook>, retention: Duration) -> Self {
        Self {
            store,
            webhook,
            retention,
        }
    }

    /// Append an event. HIGH/CRITICAL events also attempt alert dispatch;
    /// a failed alert is logged and swallowed.
    pub async fn record(&self, new: NewEvent) -> StoreResult<Uuid> {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            kind: new.kind,
            severity: new.severity,
            ip: new.ip,
            user_id: new.user_id,
            timestamp: Utc::now(),
            details: new.details,
            resolved: false,
            resolved_by: None,
            resolution_note: None,
            resolved_at: None,
        };

        self.store
            .put(
                &event_key(event.id),
                &encode(&event)?,
                Some(self.retention),
            )
            .await?;
        self.store
            .index_add(INDEX_KEY, event.timestamp.timestamp_millis(), &event.id.to_string())
            .await?;

        if event.severity.is_alerting() {
            tracing::warn!(
                kind = %event.kind,
                severity = %event.severity,
                ip = event.ip.as_deref().unwrap_or("-"),
                "security event recorded"
            );
            if let Some(webhook) = &self.webhook {
                if let Err(e) = webhook.send(&event).await {
                    tracing::warn!(event_id = %event.id, "security alert dispatch failed: {e}");
                }
            }
        } else {
            tracing::debug!(kind = %event.kind, severity = %event.severity, "security event recorded");
        }

        Ok(event.id)
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Option<SecurityEvent>> {
        let key = event_key(id);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Range-read the time index, then apply the remaining filters and
    /// paginate. `total` counts all matches, not just the returned page.
    pub async fn query(&self, filter: &EventFilter) -> StoreResult<EventPage> {
        let matched = self.load_range(filter.start, filter.end, filter).await?;
        let total = matched.len() as u64;

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let events = matched.into_iter().skip(offset).take(limit).collect();

        Ok(EventPage { events, total })
    }

    /// Recompute the rolling aggregate for a window from the raw stream.
    pub async fn metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<SecurityMetrics> {
        let events = self
            .load_range(Some(start), Some(end), &EventFilter::default())
            .await?;

        let mut by_severity: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_ip: HashMap<String, u64> = HashMap::new();
        let mut hourly: BTreeMap<String, u64> = BTreeMap::new();

        for event in &events {
            *by_severity.entry(event.severity.to_string()).or_default() += 1;
            *by_kind.entry(event.kind.to_string()).or_default() += 1;
            if let Some(ip) = &event.ip {
                *by_ip.entry(ip.clone()).or_default() += 1;
            }
            let hour = event.timestamp.format("%Y-%m-%dT%H:00Z").to_string();
            *hourly.entry(hour).or_default() += 1;
        }

        let mut top_source_ips: Vec<IpCount> = by_ip
            .into_iter()
            .map(|(ip, count)| IpCount { ip, count })
            .collect();
        top_source_ips.sort_by(|a, b| b.count.cmp(&a.count).then(a.ip.cmp(&b.ip)));
        top_source_ips.truncate(5);

        Ok(SecurityMetrics {
            period_start: start,
            period_end: end,
            total_events: events.len() as u64,
            by_severity,
            by_kind,
            top_source_ips,
            hourly: hourly
                .into_iter()
                .map(|(hour, count)| HourlyCount { hour, count })
                .collect(),
        })
    }

    /// Mark an event resolved. Returns false if the event is unknown or was
    /// already resolved; the flag is set exactly once.
    pub async fn resolve(&self, id: Uuid, resolver: &str, note: Option<&str>) -> StoreResult<bool> {
        let key = event_key(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(false);
        };
        let mut event: SecurityEvent = decode(&key, &raw)?;
        if event.resolved {
            return Ok(false);
        }

        event.resolved = true;
        event.resolved_by = Some(resolver.to_string());
        event.resolution_note = note.map(str::to_string);
        event.resolved_at = Some(Utc::now());

        // Keep the original retention deadline.
        let elapsed = Utc::now()
            .signed_duration_since(event.timestamp)
            .to_std()
            .unwrap_or_default();
        let remaining = self.retention.saturating_sub(elapsed).max(Duration::from_secs(60));
        self.store.put(&key, &encode(&event)?, Some(remaining)).await?;

        tracing::info!(event_id = %id, resolver, "security event resolved");
        Ok(true)
    }

    /// Drop events past retention from the index and the document space.
    /// Advisory and idempotent; documents also expire on their own TTL.
    pub async fn prune_expired(&self) -> StoreResult<u64> {
        let cutoff_ms = (Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::days(30)))
        .timestamp_millis();

        let stale = self.store.index_range(INDEX_KEY, 0, cutoff_ms - 1).await?;
        for member in &stale {
            if let Ok(id) = Uuid::parse_str(member) {
                self.store.delete(&event_key(id)).await?;
            }
        }
        self.store.index_remove_below(INDEX_KEY, cutoff_ms).await
    }

    async fn load_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        filter: &EventFilter,
    ) -> StoreResult<Vec<SecurityEvent>> {
        let min_ms = start.map(|t| t.timestamp_millis()).unwrap_or(0);
        let max_ms = end
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let mut events = Vec::new();
        for member in self.store.index_range(INDEX_KEY, min_ms, max_ms).await? {
            let Ok(id) = Uuid::parse_str(&member) else {
                continue;
            };
            // Index entries may outlive their pruned documents briefly.
            let Some(event) = self.get(id).await? else {
                continue;
            };
            if matches(&event, filter) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn matches(event: &SecurityEvent, filter: &EventFilter) -> bool {
    if let Some(severity) = filter.severity {
        if event.severity != severity {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if event.kind != kind {
            return false;
        }
    }
    if let Some(resolved) = filter.resolved {
        if event.resolved != resolved {
            return false;
        }
    }
    if let Some(ip) = &filter.ip {
        if event.ip.as_deref() != Some(ip.as_str()) {
            return false;
        }
    }
    if let Some(user_id) = filter.user_id {
        if event.user_id != Some(user_id) {
            return false;
        }
    }
    true
}

fn event_key(id: Uuid) -> String {
    format!("{EVENT_KEY_PREFIX}{id}")
}

fn encode(event: &SecurityEvent) -> StoreResult<String> {
    serde_json::to_string(event).map_err(|e| StoreError::Corrupt {
        key: event_key(event.id),
        reason: e.to_string(),
    })
}

fn decode(key: &str, raw: &str) -> StoreResult<SecurityEvent> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
