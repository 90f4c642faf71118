/// Security administration handlers
///
/// All of these require an authenticated admin. `AuthGuard` has already
/// verified the token by the time these run; only the role check happens
/// here.
use actix_guard::AuthContext;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use security_events::EventFilter;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AuthError,
    models::{MessageResponse, RevokeUserRequest},
    AppState,
};

const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveEventRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// Window size in hours, counted back from now. Defaults to 24.
    pub hours: Option<i64>,
}

fn require_admin(ctx: &AuthContext) -> Result<(), AuthError> {
    if ctx.role == ADMIN_ROLE {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

/// List security events matching a filter
#[utoipa::path(
    get,
    path = "/api/v1/security/events",
    tag = "Security",
    responses(
        (status = 200, description = "Matching events with total count"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_events(
    ctx: AuthContext,
    state: web::Data<AppState>,
    filter: web::Query<EventFilter>,
) -> Result<HttpResponse, AuthError> {
    require_admin(&ctx)?;
    let page = state.events.query(&filter).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Aggregate security metrics for a recent window
#[utoipa::path(
    get,
    path = "/api/v1/security/metrics",
    tag = "Security",
    responses(
        (status = 200, description = "Aggregated metrics for the window"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer_auth" = []))
)]
pub async fn metrics(
    ctx: AuthContext,
    state: web::Data<AppState>,
    query: web::Query<MetricsQuery>,
) -> Result<HttpResponse, AuthError> {
    require_admin(&ctx)?;

    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 30);
    let end = Utc::now();
    let start = end - chrono::Duration::hours(hours);

    let metrics = state.events.metrics(start, end).await?;
    Ok(HttpResponse::Ok().json(metrics))
}

/// Mark a security event resolved
#[utoipa::path(
    post,
    path = "/api/v1/security/events/{id}/resolve",
    tag = "Security",
    request_body = ResolveEventRequest,
    responses(
        (status = 200, description = "Event marked resolved", body = MessageResponse),
        (status = 404, description = "Unknown or already resolved event"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer_auth" = []))
)]
pub async fn resolve_event(
    ctx: AuthContext,
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
    payload: web::Json<ResolveEventRequest>,
) -> Result<HttpResponse, AuthError> {
    require_admin(&ctx)?;

    let resolved = state
        .events
        .resolve(*id, &ctx.email, payload.note.as_deref())
        .await?;
    if resolved {
        Ok(HttpResponse::Ok().json(MessageResponse {
            message: "Event resolved".to_string(),
        }))
    } else {
        Ok(HttpResponse::NotFound().json(MessageResponse {
            message: "Event not found or already resolved".to_string(),
        }))
    }
}

/// Revoke all outstanding tokens for a user
#[utoipa::path(
    post,
    path = "/api/v1/security/revoke-user",
    tag = "Security",
    request_body = RevokeUserRequest,
    responses(
        (status = 200, description = "All tokens revoked", body = MessageResponse),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_user(
    ctx: AuthContext,
    state: web::Data<AppState>,
    payload: web::Json<RevokeUserRequest>,
) -> Result<HttpResponse, AuthError> {
    require_admin(&ctx)?;
    payload
        .validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    state
        .orchestrator
        .revoke_user(payload.user_id, &payload.reason)
        .await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "All tokens revoked for user".to_string(),
    }))
}
