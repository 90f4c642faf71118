//! Stateless session token codec
//!
//! Issues and verifies the two session token kinds. Access tokens are
//! short-lived; refresh tokens are long-lived, carry a `tokenType` marker,
//! and are signed with a distinct secret so an access-token compromise
//! cannot mint refresh tokens (and a refresh token cannot be replayed as an
//! access token even under the wrong secret policy).

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Clock skew tolerated when validating `exp`.
const VALIDATION_LEEWAY_SECS: u64 = 30;

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const REFRESH_MARKER: &str = "refresh";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed structure, bad signature, or wrong token kind.
    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    /// Structurally valid token whose payload is missing required claims.
    #[error("malformed token payload")]
    MalformedPayload,

    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Session claims carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub role: String,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// `"refresh"` on refresh tokens; absent on access tokens.
    #[serde(rename = "tokenType", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::MalformedPayload)
    }

    pub fn is_refresh(&self) -> bool {
        self.token_type.as_deref() == Some(REFRESH_MARKER)
    }
}

/// The identity a token is issued for.
#[derive(Debug, Clone)]
pub struct Subject {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub organization_id: Uuid,
}

pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn with_default_ttls(access_secret: &str, refresh_secret: &str) -> Self {
        Self::new(
            access_secret,
            refresh_secret,
            DEFAULT_ACCESS_TTL,
            DEFAULT_REFRESH_TTL,
        )
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// Sign a token of the given kind for `subject`.
    pub fn issue(&self, subject: &Subject, kind: TokenKind) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.user_id.to_string(),
            email: subject.email.clone(),
            role: subject.role.clone(),
            organization_id: subject.organization_id,
            iat: now.timestamp(),
            exp: now.timestamp() + self.ttl(kind).as_secs() as i64,
            token_type: match kind {
                TokenKind::Access => None,
                TokenKind::Refresh => Some(REFRESH_MARKER.to_string()),
            },
        };

        let key = match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        };
        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, expiry, and payload shape, and that the token is of
    /// the expected kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Invalid);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = VALIDATION_LEEWAY_SECS;

        let key = match expected {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };

        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            jsonwebtoken::errors::ErrorKind::Json(_)
            | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_) => {
                TokenError::MalformedPayload
            }
            _ => TokenError::Invalid,
        })?;

        let is_refresh = data.claims.is_refresh();
        match expected {
            TokenKind::Access if is_refresh => Err(TokenError::Invalid),
            TokenKind::Refresh if !is_refresh => Err(TokenError::Invalid),
            _ => Ok(data.claims),
        }
    }

    /// Parse the payload segment without signature trust. Used on logout,
    /// where the token is already being discarded and only its expiry and
    /// subject matter.
    pub fn decode_unchecked(&self, token: &str) -> Option<Claims> {
        decode_payload(token)
    }
}

fn decode_payload(token: &str) -> Option<Claims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let payload = URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    serde_json::from_slice(&payload).ok()
}
