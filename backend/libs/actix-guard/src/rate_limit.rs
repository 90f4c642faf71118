//! Sliding-window rate limiting with IP lock escalation
//!
//! Budgets are per operation class and per client fingerprint (IP +
//! user-agent, derived before authentication). The window is a sorted set of
//! request timestamps; prune-insert-count runs atomically per key in the
//! store, so concurrent bursts cannot double the effective limit. If the
//! backing store is unreachable the limiter fails OPEN: availability of the
//! product outweighs throttling precision, and the failure is logged.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpResponse, ResponseError,
};
use futures::future::{ready, Ready};
use guard_store::{now_ms, SharedStore, StoreResult};
use security_events::{EventKind, NewEvent, SecurityEventStore, Severity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const WINDOW_KEY_PREFIX: &str = "talentflow:ratelimit:window:";
const IP_LOCK_KEY_PREFIX: &str = "talentflow:ratelimit:iplock:";
const IP_FAILURE_KEY_PREFIX: &str = "talentflow:ratelimit:failures:";

/// Request class for budgeting. Authentication endpoints are throttled far
/// more aggressively than general API traffic to blunt credential stuffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Auth,
    Upload,
    Api,
    Default,
}

impl OperationClass {
    pub fn classify(path: &str) -> Self {
        if path.starts_with("/api/v1/auth/") {
            OperationClass::Auth
        } else if path.contains("/upload") {
            OperationClass::Upload
        } else if path.starts_with("/api/") {
            OperationClass::Api
        } else {
            OperationClass::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Auth => "auth",
            OperationClass::Upload => "upload",
            OperationClass::Api => "api",
            OperationClass::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassBudget {
    pub window: Duration,
    pub max_requests: u32,
}

impl ClassBudget {
    pub const fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub auth: ClassBudget,
    pub upload: ClassBudget,
    pub api: ClassBudget,
    pub default: ClassBudget,
    /// Rejected requests per IP before a suspicious-activity event.
    pub ip_suspicion_threshold: u32,
    /// Rejected requests per IP before the IP is locked outright.
    pub ip_max_failures: u32,
    /// Window over which per-IP failures accumulate.
    pub ip_failure_window: Duration,
    pub ip_lock_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: ClassBudget::new(Duration::from_secs(15 * 60), 5),
            upload: ClassBudget::new(Duration::from_secs(60 * 60), 10),
            api: ClassBudget::new(Duration::from_secs(60), 60),
            default: ClassBudget::new(Duration::from_secs(15 * 60), 100),
            ip_suspicion_threshold: 10,
            ip_max_failures: 20,
            ip_failure_window: Duration::from_secs(15 * 60),
            ip_lock_duration: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the window resets (unix ms).
    pub reset_at_ms: i64,
    /// Whole window, in seconds, when rejected.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpLock {
    pub ip: String,
    pub locked_until_ms: i64,
    pub reason: String,
}

/// Outcome of bookkeeping a rejected request against its source IP.
#[derive(Debug)]
pub enum FailureEscalation {
    None,
    Suspicious { failures: u64 },
    Locked(IpLock),
}

pub struct SlidingWindowLimiter {
    store: SharedStore,
    config: RateLimitConfig,
}

impl SlidingWindowLimiter {
    pub fn new(store: SharedStore, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Rate-limit key identity, derived before authentication.
    pub fn fingerprint(ip: &str, user_agent: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(b"|");
        hasher.update(user_agent.as_bytes());
        hex::encode(hasher.finalize())[..32].to_string()
    }

    pub fn budget(&self, class: OperationClass) -> ClassBudget {
        match class {
            OperationClass::Auth => self.config.auth,
            OperationClass::Upload => self.config.upload,
            OperationClass::Api => self.config.api,
            OperationClass::Default => self.config.default,
        }
    }

    /// Admit or reject one request for `(class, fingerprint)`.
    pub async fn check(&self, fingerprint: &str, class: OperationClass) -> RateDecision {
        let budget = self.budget(class);
        let key = format!("{WINDOW_KEY_PREFIX}{}:{fingerprint}", class.as_str());
        let now = now_ms();
        let window_ms = budget.window.as_millis() as i64;
        // Random tiebreaker keeps same-millisecond requests distinct.
        let member = format!("{now}-{:08x}", rand::random::<u32>());

        match self
            .store
            .window_admit(&key, now, window_ms, &member)
            .await
        {
            Ok(count) if count <= budget.max_requests as u64 => RateDecision {
                allowed: true,
                limit: budget.max_requests,
                remaining: budget.max_requests - count as u32,
                reset_at_ms: now + window_ms,
                retry_after_secs: None,
            },
            Ok(_) => {
                // Denied requests give their slot back.
                if let Err(e) = self.store.window_discard(&key, &member).await {
                    tracing::warn!("rate limit discard failed: {e}");
                }
                RateDecision {
                    allowed: false,
                    limit: budget.max_requests,
                    remaining: 0,
                    reset_at_ms: now + window_ms,
                    retry_after_secs: Some(budget.window.as_secs()),
                }
            }
            Err(e) => {
                // Fail open: never let the limiter become a point of failure.
                tracing::warn!("rate limit store error (allowing request): {e}");
                RateDecision {
                    allowed: true,
                    limit: budget.max_requests,
                    remaining: budget.max_requests,
                    reset_at_ms: now + window_ms,
                    retry_after_secs: None,
                }
            }
        }
    }

    /// Live lock for an IP, if any. Expired locks are deleted on read.
    pub async fn ip_lock(&self, ip: &str) -> Option<IpLock> {
        let key = format!("{IP_LOCK_KEY_PREFIX}{ip}");
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("ip lock store error (allowing request): {e}");
                return None;
            }
        };

        let lock: IpLock = match serde_json::from_str(&raw) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(key, "dropping unreadable ip lock record: {e}");
                let _ = self.store.delete(&key).await;
                return None;
            }
        };

        if lock.locked_until_ms <= now_ms() {
            let _ = self.store.delete(&key).await;
            return None;
        }
        Some(lock)
    }

    pub async fn lock_ip(&self, ip: &str, reason: &str) -> StoreResult<IpLock> {
        let lock = IpLock {
            ip: ip.to_string(),
            locked_until_ms: now_ms() + self.config.ip_lock_duration.as_millis() as i64,
            reason: reason.to_string(),
        };
        let raw = serde_json::to_string(&lock).map_err(|e| guard_store::StoreError::Corrupt {
            key: format!("{IP_LOCK_KEY_PREFIX}{ip}"),
            reason: e.to_string(),
        })?;
        self.store
            .put(
                &format!("{IP_LOCK_KEY_PREFIX}{ip}"),
                &raw,
                Some(self.config.ip_lock_duration),
            )
            .await?;
        tracing::warn!(ip, reason, "ip locked");
        Ok(lock)
    }

    /// Count a rejected request against its source IP and escalate at the
    /// configured thresholds. Each escalation fires once per failure window.
    pub async fn note_failure(&self, ip: &str) -> FailureEscalation {
        let key = format!("{IP_FAILURE_KEY_PREFIX}{ip}");
        let failures = match self.store.incr(&key, self.config.ip_failure_window).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("ip failure counter error: {e}");
                return FailureEscalation::None;
            }
        };

        if failures == self.config.ip_max_failures as u64 {
            match self.lock_ip(ip, "too many failed requests").await {
                Ok(lock) => FailureEscalation::Locked(lock),
                Err(e) => {
                    tracing::warn!("ip lock write failed: {e}");
                    FailureEscalation::None
                }
            }
        } else if failures == self.config.ip_suspicion_threshold as u64 {
            FailureEscalation::Suspicious { failures }
        } else {
            FailureEscalation::None
        }
    }
}

/// 429 rejection bodies, per the public error contract.
#[derive(Debug, thiserror::Error)]
pub enum RateGuardError {
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        retry_after_secs: u64,
        reset_at_ms: i64,
    },

    #[error("ip temporarily locked")]
    IpLocked { locked_until_ms: i64, reason: String },
}

impl ResponseError for RateGuardError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::TOO_MANY_REQUESTS
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            RateGuardError::RateLimited {
                limit,
                retry_after_secs,
                reset_at_ms,
            } => HttpResponse::TooManyRequests()
                .insert_header(("Retry-After", retry_after_secs.to_string()))
                .insert_header(("X-RateLimit-Limit", limit.to_string()))
                .insert_header(("X-RateLimit-Remaining", "0"))
                .insert_header(("X-RateLimit-Reset", reset_at_ms.to_string()))
                .json(serde_json::json!({
                    "message": "Too many requests, please try again later",
                    "retryAfter": retry_after_secs,
                    "reason": "rate_limit_exceeded",
                })),
            RateGuardError::IpLocked {
                locked_until_ms,
                reason,
            } => {
                let retry_after_secs = ((locked_until_ms - now_ms()) / 1000).max(1);
                HttpResponse::TooManyRequests()
                    .insert_header(("Retry-After", retry_after_secs.to_string()))
                    .json(serde_json::json!({
                        "message": "Requests from this address are temporarily blocked",
                        "lockUntil": locked_until_ms,
                        "reason": reason,
                    }))
            }
        }
    }
}

/// Rate-limiting middleware: IP lock check, then window admission, applied
/// before any authentication.
pub struct RateGuard {
    limiter: Arc<SlidingWindowLimiter>,
    events: Arc<SecurityEventStore>,
}

impl RateGuard {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, events: Arc<SecurityEventStore>) -> Self {
        Self { limiter, events }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateGuardService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateGuardService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            events: self.events.clone(),
        }))
    }
}

pub struct RateGuardService<S> {
    service: Rc<S>,
    limiter: Arc<SlidingWindowLimiter>,
    events: Arc<SecurityEventStore>,
}

impl<S, B> Service<ServiceRequest> for RateGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let events = self.events.clone();

        let ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();
        let class = OperationClass::classify(req.path());

        Box::pin(async move {
            if let Some(lock) = limiter.ip_lock(&ip).await {
                return Err(RateGuardError::IpLocked {
                    locked_until_ms: lock.locked_until_ms,
                    reason: lock.reason,
                }
                .into());
            }

            let fingerprint = SlidingWindowLimiter::fingerprint(&ip, &user_agent);
            let decision = limiter.check(&fingerprint, class).await;

            if !decision.allowed {
                record_rejection(&events, &ip, class).await;
                match limiter.note_failure(&ip).await {
                    FailureEscalation::Suspicious { failures } => {
                        record_event(
                            &events,
                            NewEvent::new(EventKind::SuspiciousActivity, Severity::Medium)
                                .ip(ip.clone())
                                .details(serde_json::json!({ "failures": failures })),
                        )
                        .await;
                    }
                    FailureEscalation::Locked(lock) => {
                        record_event(
                            &events,
                            NewEvent::new(EventKind::IpLockout, Severity::High)
                                .ip(ip.clone())
                                .details(serde_json::json!({
                                    "lockUntil": lock.locked_until_ms,
                                    "reason": lock.reason,
                                })),
                        )
                        .await;
                    }
                    FailureEscalation::None => {}
                }

                return Err(RateGuardError::RateLimited {
                    limit: decision.limit,
                    retry_after_secs: decision.retry_after_secs.unwrap_or(0),
                    reset_at_ms: decision.reset_at_ms,
                }
                .into());
            }

            let mut res = service.call(req).await?;
            let headers = res.headers_mut();
            headers.insert(
                HeaderName::from_static("x-ratelimit-limit"),
                header_value(decision.limit.to_string()),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                header_value(decision.remaining.to_string()),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-reset"),
                header_value(decision.reset_at_ms.to_string()),
            );
            Ok(res)
        })
    }
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

async fn record_rejection(events: &SecurityEventStore, ip: &str, class: OperationClass) {
    record_event(
        events,
        NewEvent::new(EventKind::RateLimitExceeded, Severity::Low)
            .ip(ip)
            .details(serde_json::json!({ "operationClass": class.as_str() })),
    )
    .await;
}

async fn record_event(events: &SecurityEventStore, new: NewEvent) {
    if let Err(e) = events.record(new).await {
        tracing::warn!("security event record failed: {e}");
    }
}
