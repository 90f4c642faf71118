pub mod auth_service;
pub mod directory;

pub use auth_service::AuthOrchestrator;
pub use directory::{StaticDirectory, UserDirectory};
