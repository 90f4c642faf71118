//! End-to-end orchestration tests on the in-process store

use std::sync::Arc;
use std::time::Duration;

use guard_store::MemoryStore;
use security_events::{EventFilter, EventKind, SecurityEventStore, DEFAULT_RETENTION};
use token_blacklist::TokenBlacklist;
use token_codec::TokenCodec;
use uuid::Uuid;

use auth_service::error::AuthError;
use auth_service::models::{AccountStatus, DirectoryUser};
use auth_service::security::{password, LoginSecurityGuard};
use auth_service::services::{AuthOrchestrator, StaticDirectory};

const EMAIL: &str = "recruiter@example.com";
const PASSWORD: &str = "SecurePass123!";
const IP: &str = "203.0.113.9";

struct Harness {
    orchestrator: AuthOrchestrator,
    events: Arc<SecurityEventStore>,
}

fn harness_with(max_attempts: u32, lockout_window: Duration) -> Harness {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let codec = Arc::new(TokenCodec::with_default_ttls(
        "access-secret-for-tests",
        "refresh-secret-for-tests",
    ));
    let blacklist = Arc::new(TokenBlacklist::new(
        store.clone(),
        Duration::from_secs(7 * 24 * 60 * 60),
    ));
    let login_guard = Arc::new(LoginSecurityGuard::new(
        store.clone(),
        max_attempts,
        lockout_window,
    ));
    let events = Arc::new(SecurityEventStore::new(store, None, DEFAULT_RETENTION));

    let directory = Arc::new(StaticDirectory::new([
        DirectoryUser {
            id: Uuid::new_v4(),
            email: EMAIL.to_string(),
            password_hash: password::hash_password(PASSWORD).unwrap(),
            role: "recruiter".to_string(),
            organization_id: Uuid::new_v4(),
            status: AccountStatus::Active,
        },
        DirectoryUser {
            id: Uuid::new_v4(),
            email: "suspended@example.com".to_string(),
            password_hash: password::hash_password(PASSWORD).unwrap(),
            role: "recruiter".to_string(),
            organization_id: Uuid::new_v4(),
            status: AccountStatus::Suspended,
        },
    ]));

    Harness {
        orchestrator: AuthOrchestrator::new(codec, blacklist, login_guard, directory, events.clone()),
        events,
    }
}

fn harness() -> Harness {
    harness_with(5, Duration::from_secs(15 * 60))
}

#[tokio::test]
async fn login_issues_tokens_that_validate() {
    let h = harness();

    let login = h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();
    assert_eq!(login.email, EMAIL);
    assert_eq!(login.expires_in, 15 * 60);

    let validated = h.orchestrator.validate(&login.access_token).await.unwrap();
    assert_eq!(validated.user_id, login.user_id);
    assert_eq!(validated.role, "recruiter");
}

#[tokio::test]
async fn wrong_password_and_unknown_user_fail_identically() {
    let h = harness();

    let wrong = h.orchestrator.login(EMAIL, "WrongPass123!", IP).await;
    let unknown = h
        .orchestrator
        .login("nobody@example.com", PASSWORD, IP)
        .await;

    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn suspended_account_reads_as_invalid_credentials() {
    let h = harness();
    let result = h
        .orchestrator
        .login("suspended@example.com", PASSWORD, IP)
        .await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn fifth_failure_locks_even_against_correct_password() {
    let h = harness();

    for _ in 0..4 {
        let result = h.orchestrator.login(EMAIL, "WrongPass123!", IP).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
    let fifth = h.orchestrator.login(EMAIL, "WrongPass123!", IP).await;
    assert!(matches!(fifth, Err(AuthError::AccountLocked)));

    // The right password no longer helps, and the rejection is 401-class
    // with the lockout called out.
    let locked = h.orchestrator.login(EMAIL, PASSWORD, IP).await;
    assert!(matches!(locked, Err(AuthError::AccountLocked)));
    if let Err(err) = locked {
        use actix_web::ResponseError;
        assert_eq!(err.status_code(), actix_web::http::StatusCode::UNAUTHORIZED);
    }

    // The lockout left an audit trail.
    let page = h
        .events
        .query(&EventFilter {
            kind: Some(EventKind::AccountLockout),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn lockout_expires_with_its_window() {
    let h = harness_with(2, Duration::from_millis(60));

    for _ in 0..2 {
        h.orchestrator.login(EMAIL, "WrongPass123!", IP).await.ok();
    }
    assert!(matches!(
        h.orchestrator.login(EMAIL, PASSWORD, IP).await,
        Err(AuthError::AccountLocked)
    ));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(h.orchestrator.login(EMAIL, PASSWORD, IP).await.is_ok());
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() {
    let h = harness();

    for _ in 0..3 {
        h.orchestrator.login(EMAIL, "WrongPass123!", IP).await.ok();
    }
    h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();

    // The slate is clean; four more failures still do not lock.
    for _ in 0..4 {
        let result = h.orchestrator.login(EMAIL, "WrongPass123!", IP).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
}

#[tokio::test]
async fn refresh_rotates_and_replay_is_rejected() {
    let h = harness();
    let login = h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();

    let rotated = h.orchestrator.refresh(&login.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, login.refresh_token);

    // The presented token was single-use.
    let replay = h.orchestrator.refresh(&login.refresh_token).await;
    assert!(matches!(replay, Err(AuthError::TokenRevoked)));

    // The replacement still works.
    h.orchestrator.refresh(&rotated.refresh_token).await.unwrap();
}

#[tokio::test]
async fn access_token_is_rejected_on_the_refresh_path() {
    let h = harness();
    let login = h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();

    let result = h.orchestrator.refresh(&login.access_token).await;
    assert!(matches!(result, Err(AuthError::TokenInvalid)));
}

#[tokio::test]
async fn logout_revokes_both_tokens() {
    let h = harness();
    let login = h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();

    h.orchestrator
        .logout(&login.access_token, Some(&login.refresh_token))
        .await
        .unwrap();

    assert!(matches!(
        h.orchestrator.validate(&login.access_token).await,
        Err(AuthError::TokenRevoked)
    ));
    assert!(matches!(
        h.orchestrator.refresh(&login.refresh_token).await,
        Err(AuthError::TokenRevoked)
    ));
}

#[tokio::test]
async fn revoke_user_invalidates_earlier_sessions_but_not_new_logins() {
    let h = harness();
    let login = h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();

    // Tokens carry second-granularity issue times; make sure the revocation
    // lands strictly after issuance.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.orchestrator
        .revoke_user(login.user_id, "credential breach")
        .await
        .unwrap();

    assert!(matches!(
        h.orchestrator.validate(&login.access_token).await,
        Err(AuthError::UserRevoked)
    ));
    assert!(matches!(
        h.orchestrator.refresh(&login.refresh_token).await,
        Err(AuthError::UserRevoked)
    ));

    // A fresh login postdates the revocation and is unaffected.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let relogin = h.orchestrator.login(EMAIL, PASSWORD, IP).await.unwrap();
    h.orchestrator.validate(&relogin.access_token).await.unwrap();

    let page = h
        .events
        .query(&EventFilter {
            kind: Some(EventKind::UserRevoked),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}
