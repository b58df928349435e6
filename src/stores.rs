//! Key/value storage for compressed payloads.
//!
//! Every stub the compressor emits points at a key in a [`PayloadStore`]:
//! externalised JSON properties, array chunks, string chunk chains and
//! schemas. Stored values are immutable; a key is never reused for different
//! content.
//!
//! # Built-in Implementation
//!
//! [`InMemoryPayloadStore`] is suitable for a single agent session. Entries
//! are kept until [`PayloadStore::clear`] is called; there is no eviction,
//! because evicting one link would break a chunk chain that a stub already
//! handed to the agent. Hosts running long-lived sessions should clear the
//! store when the conversation is reset, or implement a persistent store.
//!
//! Each agent gets its own store instance; nothing here is process-global.

use crate::compression::TokenEstimator;
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use uuid::Uuid;

/// Number of random hex characters appended to generated keys.
const KEY_SUFFIX_LEN: usize = 9;

/// Storage backend for compressed payloads.
///
/// Implement this trait to keep payloads somewhere other than process
/// memory (e.g., a session database).
pub trait PayloadStore: Send + Sync {
    /// Store `value` under `key`.
    ///
    /// Storing identical content under an existing key is a no-op.
    ///
    /// # Errors
    /// Returns an error if the key already holds different content or the
    /// backend fails.
    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve the value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the backend fails. A missing key is `Ok(None)`.
    fn retrieve(&self, key: &str) -> Result<Option<String>>;

    /// All stored keys, sorted.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn keys(&self) -> Result<Vec<String>>;

    /// Number of stored entries.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn len(&self) -> Result<usize>;

    /// Whether the store holds no entries.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry and reset the watermark.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn clear(&self) -> Result<()>;

    /// Largest estimated token size of any stored value.
    ///
    /// Content at or below this size may have come straight out of the
    /// store, so nested compression calls do not compress it again.
    fn max_retrievable_tokens(&self) -> usize;

    /// Generate a fresh key: `<prefix><unix millis>_<random suffix>`.
    fn generate_key(&self, prefix: &str) -> String {
        generate_key(prefix)
    }
}

/// Generate a storage key from a prefix, the current time and a random
/// suffix.
#[must_use]
pub fn generate_key(prefix: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}{millis}_{}", &random[..KEY_SUFFIX_LEN])
}

/// In-memory implementation of [`PayloadStore`].
#[derive(Default)]
pub struct InMemoryPayloadStore {
    entries: RwLock<HashMap<String, String>>,
    max_tokens: AtomicUsize,
}

impl InMemoryPayloadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadStore for InMemoryPayloadStore {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().ok().context("lock poisoned")?;
        if let Some(existing) = entries.get(key) {
            if existing == value {
                return Ok(());
            }
            bail!("Key '{key}' already holds different content");
        }
        entries.insert(key.to_string(), value.to_string());
        drop(entries);

        self.max_tokens
            .fetch_max(TokenEstimator::estimate_text(value), Ordering::Relaxed);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().ok().context("lock poisoned")?;
        Ok(entries.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().ok().context("lock poisoned")?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn len(&self) -> Result<usize> {
        let entries = self.entries.read().ok().context("lock poisoned")?;
        Ok(entries.len())
    }

    fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .ok()
            .context("lock poisoned")?
            .clear();
        self.max_tokens.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn max_retrievable_tokens(&self) -> usize {
        self.max_tokens.load(Ordering::Relaxed)
    }

    fn generate_key(&self, prefix: &str) -> String {
        loop {
            let key = generate_key(prefix);
            let taken = self
                .entries
                .read()
                .map(|entries| entries.contains_key(&key))
                .unwrap_or(false);
            if !taken {
                return key;
            }
        }
    }
}

/// Buffers writes in front of another store until they are committed.
///
/// Reads see staged entries first. Nothing reaches the inner store before
/// [`StagedStore::commit`]; dropping an uncommitted stage discards its writes.
pub(crate) struct StagedStore<'a, S: PayloadStore + ?Sized> {
    inner: &'a S,
    staged: RwLock<HashMap<String, String>>,
}

impl<'a, S: PayloadStore + ?Sized> StagedStore<'a, S> {
    pub(crate) fn new(inner: &'a S) -> Self {
        Self {
            inner,
            staged: RwLock::default(),
        }
    }

    /// Write every staged entry to the inner store and return how many there
    /// were.
    ///
    /// # Errors
    /// Returns an error if the inner store rejects a write.
    pub(crate) fn commit(self) -> Result<usize> {
        let staged = self.staged.into_inner().ok().context("lock poisoned")?;
        for (key, value) in &staged {
            self.inner
                .store(key, value)
                .with_context(|| format!("Failed to commit staged entry '{key}'"))?;
        }
        Ok(staged.len())
    }
}

impl<S: PayloadStore + ?Sized> PayloadStore for StagedStore<'_, S> {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        if let Some(existing) = self.inner.retrieve(key)? {
            if existing == value {
                return Ok(());
            }
            bail!("Key '{key}' already holds different content");
        }

        let mut staged = self.staged.write().ok().context("lock poisoned")?;
        if let Some(existing) = staged.get(key) {
            if existing == value {
                return Ok(());
            }
            bail!("Key '{key}' already holds different content");
        }
        staged.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let staged = self.staged.read().ok().context("lock poisoned")?;
        match staged.get(key) {
            Some(value) => Ok(Some(value.clone())),
            None => self.inner.retrieve(key),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = self.inner.keys()?;
        keys.extend(
            self.staged
                .read()
                .ok()
                .context("lock poisoned")?
                .keys()
                .cloned(),
        );
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    /// Discard staged entries. The inner store is left alone.
    fn clear(&self) -> Result<()> {
        self.staged
            .write()
            .ok()
            .context("lock poisoned")?
            .clear();
        Ok(())
    }

    fn max_retrievable_tokens(&self) -> usize {
        let staged = self
            .staged
            .read()
            .map(|staged| {
                staged
                    .values()
                    .map(|value| TokenEstimator::estimate_text(value))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        staged.max(self.inner.max_retrievable_tokens())
    }

    fn generate_key(&self, prefix: &str) -> String {
        loop {
            let key = self.inner.generate_key(prefix);
            let taken = self
                .staged
                .read()
                .map(|staged| staged.contains_key(&key))
                .unwrap_or(false);
            if !taken {
                return key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_store_and_retrieve() -> Result<()> {
        let store = InMemoryPayloadStore::new();
        assert!(store.is_empty()?);

        store.store("a", "alpha")?;
        store.store("b", "beta")?;

        assert_eq!(store.retrieve("a")?.as_deref(), Some("alpha"));
        assert_eq!(store.retrieve("missing")?, None);
        assert_eq!(store.keys()?, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len()?, 2);
        Ok(())
    }

    #[test]
    fn test_stored_values_are_immutable() -> Result<()> {
        let store = InMemoryPayloadStore::new();
        store.store("a", "alpha")?;

        // Same content is a no-op
        store.store("a", "alpha")?;
        assert_eq!(store.len()?, 1);

        // Different content is rejected and the original survives
        let err = store.store("a", "other").unwrap_err();
        assert!(err.to_string().contains("already holds different content"));
        assert_eq!(store.retrieve("a")?.as_deref(), Some("alpha"));
        Ok(())
    }

    #[test]
    fn test_watermark_tracks_largest_value() -> Result<()> {
        let store = InMemoryPayloadStore::new();
        assert_eq!(store.max_retrievable_tokens(), 0);

        store.store("small", &"x".repeat(40))?;
        assert_eq!(store.max_retrievable_tokens(), 10);

        store.store("large", &"x".repeat(4_000))?;
        store.store("medium", &"x".repeat(400))?;
        assert_eq!(store.max_retrievable_tokens(), 1_000);
        Ok(())
    }

    #[test]
    fn test_clear_resets_entries_and_watermark() -> Result<()> {
        let store = InMemoryPayloadStore::new();
        store.store("a", &"x".repeat(400))?;
        store.clear()?;

        assert!(store.is_empty()?);
        assert_eq!(store.max_retrievable_tokens(), 0);
        assert_eq!(store.retrieve("a")?, None);
        Ok(())
    }

    #[test]
    fn test_generate_key_format() {
        let key = generate_key("chunk_");
        assert!(key.starts_with("chunk_"));

        let rest = &key["chunk_".len()..];
        let (millis, suffix) = rest.split_once('_').unwrap();
        assert!(millis.parse::<i128>().is_ok());
        assert_eq!(suffix.len(), KEY_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_keys_do_not_collide() {
        let store = InMemoryPayloadStore::new();
        let keys: HashSet<String> = (0..2_000).map(|_| store.generate_key("k_")).collect();
        assert_eq!(keys.len(), 2_000);
    }

    #[test]
    fn test_staged_writes_reach_inner_store_only_on_commit() -> Result<()> {
        let store = InMemoryPayloadStore::new();
        store.store("kept", "old")?;

        let staged = StagedStore::new(&store);
        staged.store("new", &"n".repeat(400))?;
        assert_eq!(staged.retrieve("new")?.as_deref(), Some("n".repeat(400).as_str()));
        assert_eq!(staged.retrieve("kept")?.as_deref(), Some("old"));
        assert_eq!(staged.keys()?, vec!["kept".to_string(), "new".to_string()]);
        assert_eq!(staged.max_retrievable_tokens(), 100);
        assert!(staged.store("kept", "other").is_err());
        assert_eq!(store.retrieve("new")?, None);

        assert_eq!(staged.commit()?, 1);
        assert_eq!(store.keys()?, vec!["kept".to_string(), "new".to_string()]);
        Ok(())
    }

    #[test]
    fn test_dropped_stage_leaves_inner_store_untouched() -> Result<()> {
        let store = InMemoryPayloadStore::new();
        {
            let staged = StagedStore::new(&store);
            let key = staged.generate_key("chunk_");
            staged.store(&key, "discarded")?;
        }
        assert!(store.is_empty()?);
        assert_eq!(store.max_retrievable_tokens(), 0);
        Ok(())
    }
}
