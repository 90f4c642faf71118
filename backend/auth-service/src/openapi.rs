use utoipa::OpenApi;

use crate::handlers::security::ResolveEventRequest;
use crate::models::{
    LoginRequest, LoginResponse, LogoutRequest, MessageResponse, RefreshTokenRequest,
    RevokeUserRequest, TokenRefreshResponse, ValidateResponse,
};

/// OpenAPI document covering the REST endpoints this service exposes
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::auth::login,
        crate::handlers::auth::refresh,
        crate::handlers::auth::logout,
        crate::handlers::auth::validate,
        crate::handlers::security::list_events,
        crate::handlers::security::metrics,
        crate::handlers::security::resolve_event,
        crate::handlers::security::revoke_user
    ),
    components(schemas(
        LoginRequest,
        RefreshTokenRequest,
        LogoutRequest,
        RevokeUserRequest,
        ResolveEventRequest,
        LoginResponse,
        TokenRefreshResponse,
        ValidateResponse,
        MessageResponse
    )),
    tags(
        (name = "Auth", description = "Authentication & token APIs"),
        (name = "Security", description = "Security event and revocation administration")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/auth/login",
            "/api/v1/auth/refresh",
            "/api/v1/auth/logout",
            "/api/v1/auth/validate",
            "/api/v1/security/events",
            "/api/v1/security/metrics",
            "/api/v1/security/events/{id}/resolve",
            "/api/v1/security/revoke-user",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
