// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory [`KvStore`] for tests and embedding.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{KvStore, ScanPage, SlotRange, StoreError, Ttl};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct InMemoryStore {
    data: DashMap<Vec<u8>, Entry>,
    /// Pinned `used_memory` for INFO; computed from contents when unset
    reported_memory: RwLock<Option<u64>>,
    cluster_nodes: RwLock<String>,
    cluster_slots: RwLock<Vec<SlotRange>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            reported_memory: RwLock::new(None),
            cluster_nodes: RwLock::new(String::new()),
            cluster_slots: RwLock::new(Vec::new()),
        }
    }

    /// Number of live (non-expired) keys
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Synchronous read for assertions.
    #[must_use]
    pub fn peek(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.value().value.clone())
    }

    /// Remaining lifetime of a key, for assertions.
    #[must_use]
    pub fn peek_ttl(&self, key: &[u8]) -> Ttl {
        self.ttl_now(key, Instant::now())
    }

    /// Synchronous write for seeding fixtures.
    pub fn insert(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.data.insert(key.into(), Entry { value: value.into(), expires_at });
    }

    /// Report a fixed `used_memory` from INFO instead of the computed size.
    pub fn set_reported_memory(&self, bytes: Option<u64>) {
        *self.reported_memory.write() = bytes;
    }

    pub fn set_cluster_nodes(&self, text: impl Into<String>) {
        *self.cluster_nodes.write() = text.into();
    }

    pub fn set_cluster_slots(&self, slots: Vec<SlotRange>) {
        *self.cluster_slots.write() = slots;
    }

    fn used_memory(&self) -> u64 {
        if let Some(pinned) = *self.reported_memory.read() {
            return pinned;
        }
        self.data
            .iter()
            .map(|e| (e.key().len() + e.value().value.len()) as u64)
            .sum()
    }

    fn live(&self, key: &[u8], now: Instant) -> Option<Entry> {
        let entry = self.data.get(key)?.value().clone();
        if entry.is_expired(now) {
            self.data.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }

    fn ttl_now(&self, key: &[u8], now: Instant) -> Ttl {
        match self.live(key, now) {
            None => Ttl::Missing,
            Some(Entry { expires_at: None, .. }) => Ttl::Persistent,
            Some(Entry { expires_at: Some(at), .. }) => {
                Ttl::Expires(at.saturating_duration_since(now).max(Duration::from_millis(1)))
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Redis-style glob subset: `*` anywhere, everything else literal.
fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((b'*', rest)) => (0..=key.len()).any(|i| glob_match(rest, &key[i..])),
        Some((p, rest)) => key.split_first().is_some_and(|(k, krest)| k == p && glob_match(rest, krest)),
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.live(key, Instant::now()).map(|e| e.value))
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = match ttl {
            Some(d) => Some(
                Instant::now()
                    .checked_add(d)
                    .ok_or_else(|| StoreError::Backend("invalid expire time in 'set' command".into()))?,
            ),
            None => None,
        };
        self.data.insert(key.to_vec(), Entry { value: value.to_vec(), expires_at });
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> Result<u64, StoreError> {
        let now = Instant::now();
        Ok(match self.data.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => 1,
            _ => 0,
        })
    }

    async fn expire(&self, key: &[u8], seconds: i64) -> Result<bool, StoreError> {
        let now = Instant::now();
        if self.live(key, now).is_none() {
            return Ok(false);
        }
        if seconds <= 0 {
            self.data.remove(key);
            return Ok(true);
        }
        let expires_at = now
            .checked_add(Duration::from_secs(seconds as u64))
            .ok_or_else(|| StoreError::Backend("invalid expire time in 'expire' command".into()))?;
        if let Some(mut entry) = self.data.get_mut(key) {
            entry.expires_at = Some(expires_at);
        }
        Ok(true)
    }

    async fn exists(&self, key: &[u8]) -> Result<u64, StoreError> {
        Ok(u64::from(self.live(key, Instant::now()).is_some()))
    }

    async fn ttl(&self, key: &[u8]) -> Result<Ttl, StoreError> {
        Ok(self.ttl_now(key, Instant::now()))
    }

    /// Cursor is an offset into the sorted key list. Not a snapshot:
    /// writes between pages may shift keys, like a real SCAN.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        let now = Instant::now();
        let mut keys: Vec<Vec<u8>> = self
            .data
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };

        let page = keys[start..end]
            .iter()
            .filter(|k| glob_match(pattern.as_bytes(), k))
            .cloned()
            .collect();
        Ok(ScanPage { keys: page, cursor: next })
    }

    async fn info(&self, section: Option<&str>) -> Result<String, StoreError> {
        let memory = format!("# Memory\r\nused_memory:{}\r\n", self.used_memory());
        let keyspace = format!("# Keyspace\r\ndb0:keys={}\r\n", self.len());
        Ok(match section.map(str::to_ascii_lowercase).as_deref() {
            Some("memory") => memory,
            Some("keyspace") => keyspace,
            Some(_) => String::new(),
            None => format!("{}\r\n{}", memory, keyspace),
        })
    }

    async fn cluster_nodes(&self) -> Result<String, StoreError> {
        let text = self.cluster_nodes.read().clone();
        if text.is_empty() {
            return Err(StoreError::Backend("ERR This instance has cluster support disabled".into()));
        }
        Ok(text)
    }

    async fn cluster_slots(&self) -> Result<Vec<SlotRange>, StoreError> {
        Ok(self.cluster_slots.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());

        store.set(b"a", b"1", None).await.unwrap();
        assert_eq!(store.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.exists(b"a").await.unwrap(), 1);

        assert_eq!(store.del(b"a").await.unwrap(), 1);
        assert_eq!(store.del(b"a").await.unwrap(), 0);
        assert_eq!(store.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_states() {
        let store = InMemoryStore::new();
        store.insert("p", "v", None);
        store.insert("t", "v", Some(Duration::from_secs(60)));

        assert_eq!(store.ttl(b"p").await.unwrap(), Ttl::Persistent);
        assert_eq!(store.ttl(b"nope").await.unwrap(), Ttl::Missing);
        match store.ttl(b"t").await.unwrap() {
            Ttl::Expires(d) => assert!(d <= Duration::from_secs(60) && d > Duration::from_secs(55)),
            other => panic!("unexpected ttl {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_set_clears_ttl() {
        let store = InMemoryStore::new();
        store.insert("k", "old", Some(Duration::from_secs(60)));
        store.set(b"k", b"new", None).await.unwrap();
        assert_eq!(store.ttl(b"k").await.unwrap(), Ttl::Persistent);
    }

    #[tokio::test]
    async fn test_expired_keys_disappear() {
        let store = InMemoryStore::new();
        store.insert("gone", "v", Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.get(b"gone").await.unwrap(), None);
        assert_eq!(store.exists(b"gone").await.unwrap(), 0);
        assert_eq!(store.ttl(b"gone").await.unwrap(), Ttl::Missing);
    }

    #[tokio::test]
    async fn test_expire() {
        let store = InMemoryStore::new();
        assert!(!store.expire(b"missing", 10).await.unwrap());

        store.insert("k", "v", None);
        assert!(store.expire(b"k", 10).await.unwrap());
        assert!(matches!(store.ttl(b"k").await.unwrap(), Ttl::Expires(_)));

        assert!(store.expire(b"k", 0).await.unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_out_of_range_is_an_error() {
        let store = InMemoryStore::new();
        store.insert("k", "v", None);

        assert!(store.expire(b"k", i64::MAX).await.is_err());
        assert_eq!(store.ttl(b"k").await.unwrap(), Ttl::Persistent);
        assert!(store.set(b"k", b"v", Some(Duration::MAX)).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_pages_until_cursor_returns_to_zero() {
        let store = InMemoryStore::new();
        for i in 0..25 {
            store.insert(format!("key:{:02}", i), "v", None);
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan(cursor, "*", 10).await.unwrap();
            pages += 1;
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn test_scan_pattern() {
        let store = InMemoryStore::new();
        store.insert("user:1", "a", None);
        store.insert("user:2", "b", None);
        store.insert("order:1", "c", None);

        let page = store.scan(0, "user:*", 100).await.unwrap();
        assert_eq!(page.keys, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
        assert_eq!(page.cursor, 0);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"a*c", b"abbbc"));
        assert!(glob_match(b"*:1", b"user:1"));
        assert!(!glob_match(b"a*c", b"abd"));
        assert!(glob_match(b"", b""));
    }

    #[tokio::test]
    async fn test_info_reports_memory() {
        let store = InMemoryStore::new();
        store.insert("ab", "cde", None);
        let info = store.info(Some("memory")).await.unwrap();
        assert!(info.contains("used_memory:5\r\n"));

        store.set_reported_memory(Some(4096));
        let info = store.info(Some("Memory")).await.unwrap();
        assert!(info.contains("used_memory:4096\r\n"));
    }

    #[tokio::test]
    async fn test_cluster_nodes_disabled_by_default() {
        let store = InMemoryStore::new();
        assert!(store.cluster_nodes().await.is_err());

        store.set_cluster_nodes("abc 127.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-16383\n");
        assert!(store.cluster_nodes().await.unwrap().contains("127.0.0.1:7000"));
    }
}
