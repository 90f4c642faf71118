//! Bearer token authentication middleware
//!
//! Verifies the access token, then checks both revocation layers: the
//! per-token blacklist and the blanket per-user revocation flag. Revocation
//! checks default to fail CLOSED because an unreachable store must not let a
//! revoked token through; deployments that prefer availability can opt into
//! fail open.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorServiceUnavailable, ErrorUnauthorized},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use token_blacklist::TokenBlacklist;
use token_codec::{TokenCodec, TokenError, TokenKind};
use uuid::Uuid;

/// Authenticated identity, inserted into request extensions by [`AuthGuard`]
/// and extracted by handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub organization_id: Uuid,
}

impl FromRequest for AuthContext {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthContext>()
                .cloned()
                .ok_or_else(|| ErrorUnauthorized("Authentication required")),
        )
    }
}

pub struct AuthGuard {
    codec: Arc<TokenCodec>,
    blacklist: Arc<TokenBlacklist>,
    /// Policy when the revocation store is unreachable.
    revocation_fail_open: bool,
}

impl AuthGuard {
    pub fn new(codec: Arc<TokenCodec>, blacklist: Arc<TokenBlacklist>) -> Self {
        Self {
            codec,
            blacklist,
            revocation_fail_open: false,
        }
    }

    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.revocation_fail_open = fail_open;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthGuardService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthGuardService {
            service: Rc::new(service),
            codec: self.codec.clone(),
            blacklist: self.blacklist.clone(),
            revocation_fail_open: self.revocation_fail_open,
        }))
    }
}

pub struct AuthGuardService<S> {
    service: Rc<S>,
    codec: Arc<TokenCodec>,
    blacklist: Arc<TokenBlacklist>,
    revocation_fail_open: bool,
}

impl<S, B> Service<ServiceRequest> for AuthGuardService<S>
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
        let codec = self.codec.clone();
        let blacklist = self.blacklist.clone();
        let fail_open = self.revocation_fail_open;

        Box::pin(async move {
            let token = bearer_token(&req)
                .ok_or_else(|| ErrorUnauthorized("Missing authorization token"))?
                .to_string();

            let claims = codec.verify(&token, TokenKind::Access).map_err(|e| match e {
                TokenError::Expired => ErrorUnauthorized("Token has expired"),
                _ => ErrorUnauthorized("Invalid authorization token"),
            })?;
            let user_id = claims
                .user_id()
                .map_err(|_| ErrorUnauthorized("Invalid authorization token"))?;

            match blacklist.is_revoked(&token).await {
                Ok(true) => return Err(ErrorUnauthorized("Token has been revoked")),
                Ok(false) => {}
                Err(e) if fail_open => {
                    tracing::warn!("revocation check unavailable (allowing request): {e}");
                }
                Err(e) => {
                    tracing::error!("revocation check unavailable (rejecting request): {e}");
                    return Err(ErrorServiceUnavailable("Authentication unavailable"));
                }
            }

            match blacklist.is_user_revoked(user_id, claims.iat).await {
                Ok(true) => return Err(ErrorUnauthorized("Token has been revoked")),
                Ok(false) => {}
                Err(e) if fail_open => {
                    tracing::warn!("user revocation check unavailable (allowing request): {e}");
                }
                Err(e) => {
                    tracing::error!("user revocation check unavailable (rejecting request): {e}");
                    return Err(ErrorServiceUnavailable("Authentication unavailable"));
                }
            }

            req.extensions_mut().insert(AuthContext {
                user_id,
                email: claims.email.clone(),
                role: claims.role.clone(),
                organization_id: claims.organization_id,
            });

            service.call(req).await
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};
    use guard_store::{GuardStore, MemoryStore, StoreError, StoreResult};
    use std::time::Duration;
    use token_codec::Subject;

    struct FailingStore;

    fn down() -> StoreError {
        StoreError::Unavailable("store down".to_string())
    }

    #[async_trait::async_trait]
    impl GuardStore for FailingStore {
        async fn put(&self, _: &str, _: &str, _: Option<Duration>) -> StoreResult<()> {
            Err(down())
        }
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(down())
        }
        async fn delete(&self, _: &str) -> StoreResult<bool> {
            Err(down())
        }
        async fn exists(&self, _: &str) -> StoreResult<bool> {
            Err(down())
        }
        async fn incr(&self, _: &str, _: Duration) -> StoreResult<u64> {
            Err(down())
        }
        async fn window_admit(&self, _: &str, _: i64, _: i64, _: &str) -> StoreResult<u64> {
            Err(down())
        }
        async fn window_discard(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(down())
        }
        async fn index_add(&self, _: &str, _: i64, _: &str) -> StoreResult<()> {
            Err(down())
        }
        async fn index_range(&self, _: &str, _: i64, _: i64) -> StoreResult<Vec<String>> {
            Err(down())
        }
        async fn index_remove_below(&self, _: &str, _: i64) -> StoreResult<u64> {
            Err(down())
        }
        async fn keys_with_prefix(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(down())
        }
    }

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::with_default_ttls(
            "access-secret-for-tests",
            "refresh-secret-for-tests",
        ))
    }

    fn blacklist() -> Arc<TokenBlacklist> {
        Arc::new(TokenBlacklist::new(
            Arc::new(MemoryStore::new()),
            std::time::Duration::from_secs(3600),
        ))
    }

    fn subject() -> Subject {
        Subject {
            user_id: Uuid::new_v4(),
            email: "recruiter@example.com".to_string(),
            role: "recruiter".to_string(),
            organization_id: Uuid::new_v4(),
        }
    }

    async fn whoami(ctx: AuthContext) -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({ "userId": ctx.user_id }))
    }

    #[actix_rt::test]
    async fn valid_token_reaches_handler_with_context() {
        let codec = codec();
        let subject = subject();
        let token = codec.issue(&subject, TokenKind::Access).unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec, blacklist()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
    }

    #[actix_rt::test]
    async fn missing_or_malformed_token_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec(), blacklist()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let res = test::try_call_service(&app, req).await;
        assert!(res.is_err());

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", "Bearer not-a-token"))
            .to_request();
        let res = test::try_call_service(&app, req).await;
        assert!(res.is_err());
    }

    #[actix_rt::test]
    async fn refresh_token_is_rejected_on_api_surface() {
        let codec = codec();
        let token = codec.issue(&subject(), TokenKind::Refresh).unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec, blacklist()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        assert!(test::try_call_service(&app, req).await.is_err());
    }

    #[actix_rt::test]
    async fn revoked_token_is_rejected() {
        let codec = codec();
        let blacklist = blacklist();
        let subject = subject();
        let token = codec.issue(&subject, TokenKind::Access).unwrap();

        blacklist
            .revoke(
                &token,
                subject.user_id,
                chrono::Utc::now().timestamp() + 900,
                "logout",
            )
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec, blacklist))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        assert!(test::try_call_service(&app, req).await.is_err());
    }

    #[actix_rt::test]
    async fn revocation_check_fails_closed_when_store_is_down() {
        let codec = codec();
        let token = codec.issue(&subject(), TokenKind::Access).unwrap();
        let blacklist = Arc::new(TokenBlacklist::new(
            Arc::new(FailingStore),
            Duration::from_secs(3600),
        ));

        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec, blacklist))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        // A valid token is still rejected: a revoked token must never slip
        // through while the revocation store is unreachable.
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        assert!(test::try_call_service(&app, req).await.is_err());
    }

    #[actix_rt::test]
    async fn fail_open_policy_admits_when_store_is_down() {
        let codec = codec();
        let token = codec.issue(&subject(), TokenKind::Access).unwrap();
        let blacklist = Arc::new(TokenBlacklist::new(
            Arc::new(FailingStore),
            Duration::from_secs(3600),
        ));

        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec, blacklist).fail_open(true))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
    }

    #[actix_rt::test]
    async fn user_revocation_rejects_earlier_tokens() {
        let codec = codec();
        let blacklist = blacklist();
        let subject = subject();
        let token = codec.issue(&subject, TokenKind::Access).unwrap();

        // Issued before the revocation instant.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        blacklist
            .revoke_all_for_user(subject.user_id, "breach")
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthGuard::new(codec, blacklist))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        assert!(test::try_call_service(&app, req).await.is_err());
    }
}
