//! Token revocation store
//!
//! Records revoked tokens (keyed by SHA-256 of the raw token, never the
//! token itself) and blanket per-user revocations. Reads perform lazy
//! expiry: a record whose expiry has passed is deleted on the spot and
//! treated as absent, so correctness never depends on the periodic sweep.
//! The sweep only bounds store growth.

use chrono::Utc;
use guard_store::{SharedStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

const TOKEN_KEY_PREFIX: &str = "talentflow:revoked:token:";
const USER_KEY_PREFIX: &str = "talentflow:revoked:user:";

/// Floor TTL for blacklist entries whose token has already expired, so a
/// revoke racing the token's own expiry still leaves a record briefly.
const MIN_ENTRY_TTL_SECS: i64 = 300;

#[derive(Debug, Serialize, Deserialize)]
struct RevokedTokenRecord {
    user_id: Uuid,
    revoked_at: i64,
    expires_at: i64,
    reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRevocationRecord {
    revoked_at: i64,
    reason: String,
}

pub struct TokenBlacklist {
    store: SharedStore,
    /// How long a blanket user revocation stays active. Matches the refresh
    /// token lifetime: anything issued before the revocation has expired on
    /// its own by then.
    user_revocation_ttl: Duration,
}

impl TokenBlacklist {
    pub fn new(store: SharedStore, user_revocation_ttl: Duration) -> Self {
        Self {
            store,
            user_revocation_ttl,
        }
    }

    /// Revoke a single token until its natural expiry. Revoking the same
    /// token twice is a no-op beyond refreshing the record.
    pub async fn revoke(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at_secs: i64,
        reason: &str,
    ) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        let record = RevokedTokenRecord {
            user_id,
            revoked_at: now,
            expires_at: expires_at_secs,
            reason: reason.to_string(),
        };
        let ttl_secs = (expires_at_secs - now).max(MIN_ENTRY_TTL_SECS);

        self.store
            .put(
                &token_key(token),
                &encode(&record)?,
                Some(Duration::from_secs(ttl_secs as u64)),
            )
            .await?;

        tracing::info!(user_id = %user_id, reason, ttl_secs, "token revoked");
        Ok(())
    }

    /// Whether a token has been revoked and its revocation is still live.
    pub async fn is_revoked(&self, token: &str) -> StoreResult<bool> {
        let key = token_key(token);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(false);
        };

        let record: RevokedTokenRecord = decode(&key, &raw)?;
        if record.expires_at <= Utc::now().timestamp() {
            // Lazy expiry: the token is dead on its own, the record is noise.
            self.store.delete(&key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Blanket-revoke every outstanding token for an identity. Stored as a
    /// single membership flag, so the check stays O(1) and tokens unknown to
    /// us (still client-side) are covered the moment they are presented.
    pub async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> StoreResult<()> {
        let record = UserRevocationRecord {
            revoked_at: Utc::now().timestamp(),
            reason: reason.to_string(),
        };
        self.store
            .put(
                &user_key(user_id),
                &encode(&record)?,
                Some(self.user_revocation_ttl),
            )
            .await?;

        tracing::warn!(user_id = %user_id, reason, "all tokens revoked for user");
        Ok(())
    }

    /// Whether a token issued at `token_iat_secs` falls under a blanket user
    /// revocation. Tokens issued after the revocation (a fresh login) pass.
    pub async fn is_user_revoked(&self, user_id: Uuid, token_iat_secs: i64) -> StoreResult<bool> {
        let key = user_key(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(false);
        };
        let record: UserRevocationRecord = decode(&key, &raw)?;
        Ok(token_iat_secs < record.revoked_at)
    }

    /// Delete records whose token expiry has passed. Purely an optimization;
    /// reads already ignore them. Returns the number removed.
    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        let now = Utc::now().timestamp();
        let mut removed = 0u64;

        for key in self.store.keys_with_prefix(TOKEN_KEY_PREFIX).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let expired = match decode::<RevokedTokenRecord>(&key, &raw) {
                Ok(record) => record.expires_at <= now,
                // An unreadable record is useless; sweep it too.
                Err(_) => true,
            };
            if expired && self.store.delete(&key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "swept expired blacklist entries");
        }
        Ok(removed)
    }
}

fn token_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{TOKEN_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

fn user_key(user_id: Uuid) -> String {
    format!("{USER_KEY_PREFIX}{user_id}")
}

fn encode<T: Serialize>(record: &T) -> StoreResult<String> {
    serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
        key: String::new(),
        reason: e.to_string(),
    })
}

fn decode<'a, T: Deserialize<'a>>(key: &str, raw: &'a str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_store::MemoryStore;
    use std::sync::Arc;

    fn blacklist() -> TokenBlacklist {
        TokenBlacklist::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(7 * 24 * 60 * 60),
        )
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 900
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_until_expiry() {
        let blacklist = blacklist();
        let user = Uuid::new_v4();

        assert!(!blacklist.is_revoked("tok-a").await.unwrap());
        blacklist
            .revoke("tok-a", user, future_exp(), "logout")
            .await
            .unwrap();
        assert!(blacklist.is_revoked("tok-a").await.unwrap());
        assert!(!blacklist.is_revoked("tok-b").await.unwrap());
    }

    #[tokio::test]
    async fn revocation_is_idempotent() {
        let blacklist = blacklist();
        let user = Uuid::new_v4();
        let exp = future_exp();

        blacklist.revoke("tok", user, exp, "logout").await.unwrap();
        blacklist.revoke("tok", user, exp, "logout").await.unwrap();
        assert!(blacklist.is_revoked("tok").await.unwrap());
    }

    #[tokio::test]
    async fn expired_revocation_reads_as_absent() {
        let blacklist = blacklist();
        let past = Utc::now().timestamp() - 60;

        blacklist
            .revoke("tok", Uuid::new_v4(), past, "logout")
            .await
            .unwrap();
        // Lazy expiry: the record exists but the token is already dead.
        assert!(!blacklist.is_revoked("tok").await.unwrap());
        // And the read deleted it.
        assert!(!blacklist.is_revoked("tok").await.unwrap());
    }

    #[tokio::test]
    async fn user_revocation_covers_earlier_tokens_only() {
        let blacklist = blacklist();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now().timestamp();

        blacklist.revoke_all_for_user(user, "breach").await.unwrap();

        assert!(blacklist.is_user_revoked(user, now - 10).await.unwrap());
        assert!(!blacklist.is_user_revoked(user, now + 10).await.unwrap());
        assert!(!blacklist.is_user_revoked(other, now - 10).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let blacklist = blacklist();
        let user = Uuid::new_v4();
        let now = Utc::now().timestamp();

        blacklist
            .revoke("dead-1", user, now - 120, "logout")
            .await
            .unwrap();
        blacklist
            .revoke("dead-2", user, now - 60, "logout")
            .await
            .unwrap();
        blacklist
            .revoke("live", user, now + 900, "logout")
            .await
            .unwrap();

        assert_eq!(blacklist.sweep_expired().await.unwrap(), 2);
        assert!(blacklist.is_revoked("live").await.unwrap());
        assert_eq!(blacklist.sweep_expired().await.unwrap(), 0);
    }
}
