/// TalentFlow Auth Service - Main entry point
use std::sync::Arc;
use std::time::Duration;

use actix_guard::{AuthGuard, RateGuard, RateLimitConfig, SlidingWindowLimiter};
use actix_web::{web, App, HttpResponse, HttpServer};
use guard_store::{MemoryStore, RedisStore, SharedStore};
use security_events::{monitor::spawn_monitor, AlertWebhook, SecurityEventStore};
use token_blacklist::TokenBlacklist;
use token_codec::TokenCodec;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use auth_service::{
    config::Config,
    handlers,
    models::{AccountStatus, DirectoryUser},
    openapi::ApiDoc,
    security::{password, LoginSecurityGuard},
    services::{AuthOrchestrator, StaticDirectory},
    tasks, AppState,
};
use utoipa::OpenApi;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting TalentFlow Auth Service on {}:{}",
        config.server_host,
        config.server_port
    );

    let op_timeout = Duration::from_millis(config.store_timeout_ms);
    let store: SharedStore = match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url, op_timeout).await?;
            tracing::info!("Redis backing store initialized");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process store (single instance only)");
            Arc::new(MemoryStore::new())
        }
    };

    let codec = Arc::new(TokenCodec::new(
        &config.access_token_secret,
        &config.refresh_token_secret,
        Duration::from_secs(config.access_ttl_secs),
        Duration::from_secs(config.refresh_ttl_secs),
    ));
    let blacklist = Arc::new(TokenBlacklist::new(
        store.clone(),
        Duration::from_secs(config.refresh_ttl_secs),
    ));
    let login_guard = Arc::new(LoginSecurityGuard::new(
        store.clone(),
        config.max_login_attempts,
        Duration::from_secs(config.lockout_window_secs),
    ));
    let events = Arc::new(SecurityEventStore::new(
        store.clone(),
        config.alert_webhook_url.as_deref().map(AlertWebhook::new),
        Duration::from_secs(config.event_retention_days * 24 * 60 * 60),
    ));

    let directory = Arc::new(StaticDirectory::new(seed_users(&config)?));
    let orchestrator = Arc::new(AuthOrchestrator::new(
        codec.clone(),
        blacklist.clone(),
        login_guard,
        directory,
        events.clone(),
    ));

    let limiter = Arc::new(SlidingWindowLimiter::new(
        store.clone(),
        RateLimitConfig::default(),
    ));

    tasks::spawn_blacklist_sweeper(blacklist.clone(), SWEEP_INTERVAL);
    spawn_monitor(events.clone(), MONITOR_INTERVAL);

    let state = AppState {
        orchestrator,
        events: events.clone(),
    };
    let fail_open = config.blacklist_fail_open;
    let bind_addr = (config.server_host.clone(), config.server_port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(RateGuard::new(limiter.clone(), events.clone()))
            .service(
                web::scope("/api/v1/auth")
                    .route("/login", web::post().to(handlers::login))
                    .route("/refresh", web::post().to(handlers::refresh))
                    .route("/logout", web::post().to(handlers::logout))
                    .route("/validate", web::get().to(handlers::validate)),
            )
            .service(
                web::scope("/api/v1/security")
                    .wrap(AuthGuard::new(codec.clone(), blacklist.clone()).fail_open(fail_open))
                    .route("/events", web::get().to(handlers::list_events))
                    .route(
                        "/events/{id}/resolve",
                        web::post().to(handlers::resolve_event),
                    )
                    .route("/metrics", web::get().to(handlers::metrics))
                    .route("/revoke-user", web::post().to(handlers::revoke_user)),
            )
            .route("/health", web::get().to(health_check))
            .route("/readiness", web::get().to(readiness_check))
            .route("/api-docs/openapi.json", web::get().to(openapi_json))
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn readiness_check() -> &'static str {
    "READY"
}

async fn openapi_json() -> HttpResponse {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

fn seed_users(config: &Config) -> Result<Vec<DirectoryUser>, Box<dyn std::error::Error>> {
    let (Some(email), Some(pass)) = (&config.seed_admin_email, &config.seed_admin_password) else {
        tracing::warn!("no seed admin configured, directory starts empty");
        return Ok(Vec::new());
    };

    let user = DirectoryUser {
        id: Uuid::new_v4(),
        email: email.clone(),
        password_hash: password::hash_password(pass)?,
        role: "admin".to_string(),
        organization_id: Uuid::new_v4(),
        status: AccountStatus::Active,
    };
    tracing::info!(email, "seed admin account created");
    Ok(vec![user])
}
