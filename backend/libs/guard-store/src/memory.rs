//! In-process backend for single-instance deployments
//!
//! All shared state lives in a [`DashMap`]; every operation completes inside
//! one shard-lock scope with no awaits, which gives the per-key atomicity
//! that `window_admit` requires.

use crate::{now_ms, GuardStore, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::Duration;

enum Entry {
    Scalar {
        value: String,
        expires_at_ms: Option<i64>,
    },
    Sorted {
        members: BTreeSet<(i64, String)>,
        expires_at_ms: Option<i64>,
    },
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        let expires = match self {
            Entry::Scalar { expires_at_ms, .. } => expires_at_ms,
            Entry::Sorted { expires_at_ms, .. } => expires_at_ms,
        };
        matches!(expires, Some(at) if *at <= now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl: Duration) -> i64 {
        now_ms() + ttl.as_millis() as i64
    }

    /// Drop the entry if its key-level TTL has passed. Returns whether a
    /// live entry remains.
    fn reap(&self, key: &str) -> bool {
        let now = now_ms();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
            return false;
        }
        true
    }
}

#[async_trait]
impl GuardStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry::Scalar {
                value: value.to_string(),
                expires_at_ms: ttl.map(Self::deadline),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if !self.reap(key) {
            return Ok(None);
        }
        Ok(self.entries.get(key).and_then(|entry| match entry.value() {
            Entry::Scalar { value, .. } => Some(value.clone()),
            Entry::Sorted { .. } => None,
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.reap(key))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let now = now_ms();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Scalar {
                value: "0".to_string(),
                expires_at_ms: Some(Self::deadline(ttl)),
            });

        if entry.is_expired(now) {
            *entry = Entry::Scalar {
                value: "0".to_string(),
                expires_at_ms: Some(Self::deadline(ttl)),
            };
        }

        match entry.value_mut() {
            Entry::Scalar { value, .. } => {
                let count = value.parse::<u64>().unwrap_or(0) + 1;
                *value = count.to_string();
                Ok(count)
            }
            Entry::Sorted { .. } => {
                // A window key is being reused as a counter; start over.
                *entry = Entry::Scalar {
                    value: "1".to_string(),
                    expires_at_ms: Some(Self::deadline(ttl)),
                };
                Ok(1)
            }
        }
    }

    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        member: &str,
    ) -> StoreResult<u64> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Sorted {
                members: BTreeSet::new(),
                expires_at_ms: None,
            });

        if entry.is_expired(now_ms) || matches!(entry.value(), Entry::Scalar { .. }) {
            *entry = Entry::Sorted {
                members: BTreeSet::new(),
                expires_at_ms: None,
            };
        }

        if let Entry::Sorted {
            members,
            expires_at_ms,
        } = entry.value_mut()
        {
            let cutoff = now_ms - window_ms;
            members.retain(|(score, _)| *score > cutoff);
            members.insert((now_ms, member.to_string()));
            *expires_at_ms = Some(now_ms + window_ms);
            Ok(members.len() as u64)
        } else {
            unreachable!("entry reset to Sorted above")
        }
    }

    async fn window_discard(&self, key: &str, member: &str) -> StoreResult<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Entry::Sorted { members, .. } = entry.value_mut() {
                members.retain(|(_, m)| m != member);
            }
        }
        Ok(())
    }

    async fn index_add(&self, key: &str, score_ms: i64, member: &str) -> StoreResult<()> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Sorted {
                members: BTreeSet::new(),
                expires_at_ms: None,
            });
        if let Entry::Sorted { members, .. } = entry.value_mut() {
            members.insert((score_ms, member.to_string()));
        }
        Ok(())
    }

    async fn index_range(&self, key: &str, min_ms: i64, max_ms: i64) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| match entry.value() {
                Entry::Sorted { members, .. } => members
                    .iter()
                    .filter(|(score, _)| *score >= min_ms && *score <= max_ms)
                    .map(|(_, member)| member.clone())
                    .collect(),
                Entry::Scalar { .. } => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn index_remove_below(&self, key: &str, cutoff_ms: i64) -> StoreResult<u64> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        match entry.value_mut() {
            Entry::Sorted { members, .. } => {
                let before = members.len();
                members.retain(|(score, _)| *score >= cutoff_ms);
                Ok((before - members.len()) as u64)
            }
            Entry::Scalar { .. } => Ok(0),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = now_ms();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ms;
    use std::time::Duration;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = MemoryStore::new();
        store.put("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_records_are_absent_on_read() {
        let store = MemoryStore::new();
        store
            .put("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn counter_increments_and_resets_after_ttl() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(30);
        assert_eq!(store.incr("c", ttl).await.unwrap(), 1);
        assert_eq!(store.incr("c", ttl).await.unwrap(), 2);
        assert_eq!(store.incr("c", ttl).await.unwrap(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.incr("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn window_counts_and_prunes() {
        let store = MemoryStore::new();
        let window = 60_000;
        for i in 1..=5u64 {
            let count = store
                .window_admit("w", now_ms(), window, &format!("m{i}"))
                .await
                .unwrap();
            assert_eq!(count, i);
        }

        // Members older than the window are purged before counting.
        let later = now_ms() + window + 1;
        let count = store.window_admit("w", later, window, "m6").await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn window_discard_releases_budget() {
        let store = MemoryStore::new();
        let now = now_ms();
        store.window_admit("w", now, 60_000, "a").await.unwrap();
        let count = store.window_admit("w", now, 60_000, "b").await.unwrap();
        assert_eq!(count, 2);

        store.window_discard("w", "b").await.unwrap();
        let count = store.window_admit("w", now, 60_000, "c").await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn index_range_and_prune() {
        let store = MemoryStore::new();
        store.index_add("idx", 100, "a").await.unwrap();
        store.index_add("idx", 200, "b").await.unwrap();
        store.index_add("idx", 300, "c").await.unwrap();

        let range = store.index_range("idx", 150, 300).await.unwrap();
        assert_eq!(range, vec!["b".to_string(), "c".to_string()]);

        let removed = store.index_remove_below("idx", 200).await.unwrap();
        assert_eq!(removed, 1);
        let all = store.index_range("idx", 0, i64::MAX).await.unwrap();
        assert_eq!(all, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn prefix_scan_skips_expired() {
        let store = MemoryStore::new();
        store.put("p:1", "v", None).await.unwrap();
        store
            .put("p:2", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.put("q:1", "v", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let keys = store.keys_with_prefix("p:").await.unwrap();
        assert_eq!(keys, vec!["p:1".to_string()]);
    }
}
