// TalentFlow Auth Service Library

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod security;
pub mod services;
pub mod tasks;

pub use error::{AuthError, AuthResult};

use security_events::SecurityEventStore;
use services::AuthOrchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AuthOrchestrator>,
    pub events: Arc<SecurityEventStore>,
}
