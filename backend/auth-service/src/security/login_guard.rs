/// Failed-login tracking and derived lockout
///
/// Lockout is never stored as a flag. It is a predicate over the attempt
/// counter: locked while `count >= max_attempts` and the counter record is
/// still within its window. The record carries its own TTL, so expiry of the
/// window clears the lockout with no unlock step.
use crate::error::AuthResult;
use guard_store::{now_ms, SharedStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

const ATTEMPTS_KEY_PREFIX: &str = "talentflow:login:attempts:";

#[derive(Debug, Serialize, Deserialize)]
struct AttemptRecord {
    count: u32,
    last_attempt_ms: i64,
}

pub struct LoginSecurityGuard {
    store: SharedStore,
    max_attempts: u32,
    lockout_window: Duration,
}

impl LoginSecurityGuard {
    pub fn new(store: SharedStore, max_attempts: u32, lockout_window: Duration) -> Self {
        Self {
            store,
            max_attempts,
            lockout_window,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Identity key for attempt tracking. Hashed so raw emails never appear
    /// in store keys; normalized so `User@X` and `user@x` share a counter.
    pub fn client_id(email: &str) -> String {
        let normalized = email.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Record one failed attempt and return the updated count. Each failure
    /// restarts the window, so a slow drip of failures cannot dodge lockout.
    pub async fn record_failure(&self, email: &str) -> AuthResult<u32> {
        let key = attempts_key(email);
        let count = match self.load(&key).await {
            Some(record) => record.count + 1,
            None => 1,
        };

        let record = AttemptRecord {
            count,
            last_attempt_ms: now_ms(),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| crate::error::AuthError::Internal(e.to_string()))?;
        self.store
            .put(&key, &raw, Some(self.lockout_window))
            .await?;
        Ok(count)
    }

    /// Whether this identity is currently locked out. Store trouble reads
    /// as not locked: a degraded store must not lock out the whole tenant.
    pub async fn is_locked(&self, email: &str) -> bool {
        match self.load(&attempts_key(email)).await {
            Some(record) => record.count >= self.max_attempts,
            None => false,
        }
    }

    /// Clear the counter after a successful login.
    pub async fn reset(&self, email: &str) -> AuthResult<()> {
        self.store.delete(&attempts_key(email)).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Option<AttemptRecord> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("login attempt store error: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(key, "dropping unreadable attempt record: {e}");
                let _ = self.store.delete(key).await;
                None
            }
        }
    }
}

fn attempts_key(email: &str) -> String {
    format!("{ATTEMPTS_KEY_PREFIX}{}", LoginSecurityGuard::client_id(email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_store::MemoryStore;
    use std::sync::Arc;

    fn guard(max_attempts: u32, window: Duration) -> LoginSecurityGuard {
        LoginSecurityGuard::new(Arc::new(MemoryStore::new()), max_attempts, window)
    }

    #[test]
    fn client_id_normalizes_identity() {
        assert_eq!(
            LoginSecurityGuard::client_id("Recruiter@Example.com "),
            LoginSecurityGuard::client_id("recruiter@example.com")
        );
        assert_ne!(
            LoginSecurityGuard::client_id("a@example.com"),
            LoginSecurityGuard::client_id("b@example.com")
        );
    }

    #[tokio::test]
    async fn locks_at_threshold_and_resets() {
        let guard = guard(3, Duration::from_secs(60));
        let email = "recruiter@example.com";

        assert!(!guard.is_locked(email).await);
        assert_eq!(guard.record_failure(email).await.unwrap(), 1);
        assert_eq!(guard.record_failure(email).await.unwrap(), 2);
        assert!(!guard.is_locked(email).await);

        assert_eq!(guard.record_failure(email).await.unwrap(), 3);
        assert!(guard.is_locked(email).await);
        // Other identities are unaffected.
        assert!(!guard.is_locked("other@example.com").await);

        guard.reset(email).await.unwrap();
        assert!(!guard.is_locked(email).await);
    }

    #[tokio::test]
    async fn lockout_expires_with_the_window() {
        let guard = guard(2, Duration::from_millis(40));
        let email = "recruiter@example.com";

        guard.record_failure(email).await.unwrap();
        guard.record_failure(email).await.unwrap();
        assert!(guard.is_locked(email).await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!guard.is_locked(email).await);
        // The counter restarted too.
        assert_eq!(guard.record_failure(email).await.unwrap(), 1);
    }
}
