pub mod auth;
pub mod security;

pub use auth::{login, logout, refresh, validate};
pub use security::{list_events, metrics, resolve_event, revoke_user};
