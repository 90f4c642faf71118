/// Authentication handlers
use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;

use crate::{
    error::AuthError,
    models::{
        LoginRequest, LoginResponse, LogoutRequest, MessageResponse, RefreshTokenRequest,
        TokenRefreshResponse, ValidateResponse,
    },
    AppState,
};

/// Login endpoint handler
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "User logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Account locked or rate limited")
    )
)]
pub async fn login(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    let ip = client_ip(&req);
    let response = state
        .orchestrator
        .login(&payload.email, &payload.password, &ip)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Refresh token endpoint handler
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "Auth",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenRefreshResponse),
        (status = 401, description = "Invalid, expired, or revoked refresh token")
    )
)]
pub async fn refresh(
    state: web::Data<AppState>,
    payload: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    let response = state.orchestrator.refresh(&payload.refresh_token).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Logout endpoint handler
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "Auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session tokens revoked", body = MessageResponse),
        (status = 401, description = "Missing or malformed access token")
    )
)]
pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<LogoutRequest>,
) -> Result<HttpResponse, AuthError> {
    let access_token = bearer_token(&req).ok_or(AuthError::TokenInvalid)?;

    state
        .orchestrator
        .logout(access_token, payload.refresh_token.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

/// Token validation endpoint handler
#[utoipa::path(
    get,
    path = "/api/v1/auth/validate",
    tag = "Auth",
    responses(
        (status = 200, description = "Token is valid", body = ValidateResponse),
        (status = 401, description = "Invalid, expired, or revoked token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn validate(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AuthError> {
    let access_token = bearer_token(&req).ok_or(AuthError::TokenInvalid)?;
    let response = state.orchestrator.validate(access_token).await?;
    Ok(HttpResponse::Ok().json(response))
}

pub(crate) fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub(crate) fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}
