/// Security module for authentication
pub mod login_guard;
pub mod password;

pub use login_guard::LoginSecurityGuard;
pub use password::{hash_password, verify_password};
