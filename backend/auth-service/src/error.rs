use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account temporarily locked")]
    AccountLocked,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Access revoked for user")]
    UserRevoked,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backing store unavailable")]
    StoreUnavailable,

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked
            | AuthError::TokenInvalid
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::UserRevoked => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            // Credential and token failures share one message so responses
            // cannot be used to probe which accounts exist. Lockout is the
            // one deliberate exception.
            AuthError::InvalidCredentials => "Invalid email or password",
            AuthError::AccountLocked => {
                "Account temporarily locked due to too many failed attempts, try again later"
            }
            AuthError::TokenInvalid => "Invalid token",
            AuthError::TokenExpired => "Token expired",
            AuthError::TokenRevoked => "Token has been revoked",
            AuthError::UserRevoked => "Token has been revoked",
            AuthError::Forbidden => "Insufficient permissions",
            AuthError::Validation(msg) => msg.as_str(),
            AuthError::StoreUnavailable => "Service temporarily unavailable",
            AuthError::Internal(_) => "Internal server error",
        };

        HttpResponse::build(self.status_code()).json(json!({
            "message": message,
            "status": self.status_code().as_u16(),
        }))
    }
}

impl From<token_codec::TokenError> for AuthError {
    fn from(err: token_codec::TokenError) -> Self {
        match err {
            token_codec::TokenError::Expired => AuthError::TokenExpired,
            token_codec::TokenError::Signing(msg) => AuthError::Internal(msg),
            _ => AuthError::TokenInvalid,
        }
    }
}

impl From<guard_store::StoreError> for AuthError {
    fn from(err: guard_store::StoreError) -> Self {
        tracing::error!("store error: {err}");
        AuthError::StoreUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_of(err: AuthError) -> serde_json::Value {
        let response = err.error_response();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[actix_rt::test]
    async fn lockout_is_unauthorized_but_distinct_from_invalid() {
        assert_eq!(AuthError::AccountLocked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );

        let locked = body_of(AuthError::AccountLocked).await;
        let invalid = body_of(AuthError::InvalidCredentials).await;
        assert!(locked["message"].as_str().unwrap().contains("locked"));
        assert!(locked["message"].as_str().unwrap().contains("try again"));
        assert_ne!(locked["message"], invalid["message"]);
    }

    #[actix_rt::test]
    async fn bodies_carry_a_message_field() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::TokenExpired,
            AuthError::TokenRevoked,
            AuthError::Forbidden,
            AuthError::StoreUnavailable,
        ] {
            let status = err.status_code().as_u16();
            let body = body_of(err).await;
            assert!(body["message"].is_string());
            assert_eq!(body["status"], status);
        }
    }

    #[actix_rt::test]
    async fn revocation_and_credential_failures_share_status() {
        for err in [
            AuthError::TokenInvalid,
            AuthError::TokenRevoked,
            AuthError::UserRevoked,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(
            AuthError::StoreUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AuthError::Forbidden.status_code(), StatusCode::FORBIDDEN);
    }
}
