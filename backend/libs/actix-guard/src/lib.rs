//! # Actix Guard Library
//!
//! Request-path security middleware for TalentFlow Actix services
//!
//! ## Modules
//! - `rate_limit`: sliding-window rate limiting with IP lock escalation
//! - `jwt_auth`: bearer token authentication with revocation checks
//! - `circuit_breaker`: circuit breaker wrapped around external collaborators

pub mod circuit_breaker;
pub mod jwt_auth;
pub mod rate_limit;

pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use jwt_auth::{AuthContext, AuthGuard};
pub use rate_limit::{
    FailureEscalation, IpLock, OperationClass, RateDecision, RateGuard, RateLimitConfig,
    SlidingWindowLimiter,
};
