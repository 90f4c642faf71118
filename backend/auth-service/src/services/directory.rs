/// User directory collaborator
///
/// Authentication does not own user records; it looks identities up through
/// this trait. Production wires the tenant directory service in, tests and
/// single-node deployments use the in-memory implementation.
use crate::error::AuthResult;
use crate::models::DirectoryUser;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_identity(&self, email: &str) -> AuthResult<Option<DirectoryUser>>;
}

/// Fixed set of users, keyed by normalized email.
pub struct StaticDirectory {
    users: HashMap<String, DirectoryUser>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.email.trim().to_lowercase(), u))
                .collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn find_by_identity(&self, email: &str) -> AuthResult<Option<DirectoryUser>> {
        Ok(self.users.get(&email.trim().to_lowercase()).cloned())
    }
}
