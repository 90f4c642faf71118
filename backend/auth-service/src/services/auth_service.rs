/// Authentication orchestration
///
/// Composes the codec, the revocation store, the login guard, and the user
/// directory into the login, refresh, logout, validate, and revoke flows.
/// Directory lookups run behind a circuit breaker so a failing directory
/// degrades into fast 503s instead of piled-up timeouts.
use std::sync::Arc;

use actix_guard::{BreakerConfig, BreakerError, CircuitBreaker};
use chrono::{TimeZone, Utc};
use security_events::{EventKind, NewEvent, SecurityEventStore, Severity};
use token_blacklist::TokenBlacklist;
use token_codec::{Claims, Subject, TokenCodec, TokenKind};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::models::{
    AccountStatus, DirectoryUser, LoginResponse, TokenRefreshResponse, ValidateResponse,
};
use crate::security::{password, LoginSecurityGuard};
use crate::services::directory::UserDirectory;

pub struct AuthOrchestrator {
    codec: Arc<TokenCodec>,
    blacklist: Arc<TokenBlacklist>,
    login_guard: Arc<LoginSecurityGuard>,
    directory: Arc<dyn UserDirectory>,
    events: Arc<SecurityEventStore>,
    directory_breaker: CircuitBreaker,
}

impl AuthOrchestrator {
    pub fn new(
        codec: Arc<TokenCodec>,
        blacklist: Arc<TokenBlacklist>,
        login_guard: Arc<LoginSecurityGuard>,
        directory: Arc<dyn UserDirectory>,
        events: Arc<SecurityEventStore>,
    ) -> Self {
        Self {
            codec,
            blacklist,
            login_guard,
            directory,
            events,
            directory_breaker: CircuitBreaker::new("user-directory", BreakerConfig::default()),
        }
    }

    /// Password login. The lockout check runs before any credential work, so
    /// a locked identity gets the same answer whether or not the password is
    /// right.
    pub async fn login(&self, email: &str, pass: &str, ip: &str) -> AuthResult<LoginResponse> {
        if self.login_guard.is_locked(email).await {
            self.record_event(
                NewEvent::new(EventKind::LoginFailure, Severity::Medium)
                    .ip(ip)
                    .details(serde_json::json!({ "reason": "locked_out" })),
            )
            .await;
            return Err(AuthError::AccountLocked);
        }

        let user = self.lookup(email).await?;
        let user = match user {
            Some(user) if user.status == AccountStatus::Active => user,
            // Unknown identities and inactive accounts fail identically.
            other => {
                let user_id = other.as_ref().map(|u| u.id);
                return Err(self.note_login_failure(email, ip, user_id).await);
            }
        };

        if password::verify_password(pass, &user.password_hash).is_err() {
            return Err(self.note_login_failure(email, ip, Some(user.id)).await);
        }

        self.login_guard.reset(email).await?;

        let subject = subject_of(&user);
        let access_token = self.codec.issue(&subject, TokenKind::Access)?;
        let refresh_token = self.codec.issue(&subject, TokenKind::Refresh)?;

        tracing::info!(user_id = %user.id, "login succeeded");
        Ok(LoginResponse {
            user_id: user.id,
            email: user.email,
            role: user.role,
            organization_id: user.organization_id,
            access_token,
            refresh_token,
            expires_in: self.codec.ttl(TokenKind::Access).as_secs(),
        })
    }

    /// Rotate a refresh token: verify it, check both revocation layers, then
    /// revoke it and issue a fresh pair. The presented token is single-use;
    /// replaying it after rotation reads as revoked.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenRefreshResponse> {
        let claims = self.codec.verify(refresh_token, TokenKind::Refresh)?;
        let user_id = claims.user_id()?;

        if self.blacklist.is_revoked(refresh_token).await? {
            tracing::warn!(user_id = %user_id, "rotated refresh token replayed");
            self.record_event(
                NewEvent::new(EventKind::SuspiciousActivity, Severity::High)
                    .user(user_id)
                    .details(serde_json::json!({ "reason": "refresh_token_replay" })),
            )
            .await;
            return Err(AuthError::TokenRevoked);
        }
        if self.blacklist.is_user_revoked(user_id, claims.iat).await? {
            return Err(AuthError::UserRevoked);
        }

        self.blacklist
            .revoke(refresh_token, user_id, claims.exp, "rotated")
            .await?;

        let subject = subject_of_claims(&claims, user_id);
        Ok(TokenRefreshResponse {
            access_token: self.codec.issue(&subject, TokenKind::Access)?,
            refresh_token: self.codec.issue(&subject, TokenKind::Refresh)?,
            expires_in: self.codec.ttl(TokenKind::Access).as_secs(),
        })
    }

    /// Revoke the session's tokens. The access token is parsed without
    /// signature verification: it is being discarded either way, and a
    /// tampered token revokes nothing real.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> AuthResult<()> {
        let Some(claims) = self.codec.decode_unchecked(access_token) else {
            return Err(AuthError::TokenInvalid);
        };
        let user_id = claims.user_id()?;

        self.blacklist
            .revoke(access_token, user_id, claims.exp, "logout")
            .await?;
        if let Some(refresh) = refresh_token {
            let exp = self
                .codec
                .decode_unchecked(refresh)
                .map(|c| c.exp)
                .unwrap_or(claims.exp);
            self.blacklist.revoke(refresh, user_id, exp, "logout").await?;
        }

        self.record_event(
            NewEvent::new(EventKind::TokenRevoked, Severity::Low)
                .user(user_id)
                .details(serde_json::json!({ "reason": "logout" })),
        )
        .await;
        Ok(())
    }

    /// Full validation of an access token, revocation layers included.
    pub async fn validate(&self, access_token: &str) -> AuthResult<ValidateResponse> {
        let claims = self.codec.verify(access_token, TokenKind::Access)?;
        let user_id = claims.user_id()?;

        if self.blacklist.is_revoked(access_token).await? {
            return Err(AuthError::TokenRevoked);
        }
        if self.blacklist.is_user_revoked(user_id, claims.iat).await? {
            return Err(AuthError::UserRevoked);
        }

        Ok(ValidateResponse {
            user_id,
            email: claims.email,
            role: claims.role,
            organization_id: claims.organization_id,
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    /// Blanket-revoke every outstanding token for a user. Administrative
    /// action for compromise or offboarding.
    pub async fn revoke_user(&self, user_id: Uuid, reason: &str) -> AuthResult<()> {
        self.blacklist.revoke_all_for_user(user_id, reason).await?;
        self.record_event(
            NewEvent::new(EventKind::UserRevoked, Severity::Critical)
                .user(user_id)
                .details(serde_json::json!({ "reason": reason })),
        )
        .await;
        Ok(())
    }

    async fn lookup(&self, email: &str) -> AuthResult<Option<DirectoryUser>> {
        let directory = self.directory.clone();
        let email = email.to_string();
        self.directory_breaker
            .call(move || async move { directory.find_by_identity(&email).await })
            .await
            .map_err(|e| match e {
                BreakerError::Open(name) => {
                    tracing::warn!(breaker = %name, "directory lookup short-circuited");
                    AuthError::StoreUnavailable
                }
                BreakerError::Inner(e) => e,
            })
    }

    async fn note_login_failure(&self, email: &str, ip: &str, user_id: Option<Uuid>) -> AuthError {
        let count = match self.login_guard.record_failure(email).await {
            Ok(count) => count,
            Err(e) => {
                // Counting failed; the attempt itself is still rejected.
                tracing::warn!("failed attempt not recorded: {e}");
                return AuthError::InvalidCredentials;
            }
        };

        let mut event = NewEvent::new(EventKind::LoginFailure, Severity::Medium)
            .ip(ip)
            .details(serde_json::json!({ "failedAttempts": count }));
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        self.record_event(event).await;

        if count == self.login_guard.max_attempts() {
            let mut lockout = NewEvent::new(EventKind::AccountLockout, Severity::High)
                .ip(ip)
                .details(serde_json::json!({ "failedAttempts": count }));
            if let Some(user_id) = user_id {
                lockout = lockout.user(user_id);
            }
            self.record_event(lockout).await;
            return AuthError::AccountLocked;
        }
        AuthError::InvalidCredentials
    }

    async fn record_event(&self, event: NewEvent) {
        if let Err(e) = self.events.record(event).await {
            tracing::warn!("security event record failed: {e}");
        }
    }
}

fn subject_of(user: &DirectoryUser) -> Subject {
    Subject {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role.clone(),
        organization_id: user.organization_id,
    }
}

fn subject_of_claims(claims: &Claims, user_id: Uuid) -> Subject {
    Subject {
        user_id,
        email: claims.email.clone(),
        role: claims.role.clone(),
        organization_id: claims.organization_id,
    }
}
