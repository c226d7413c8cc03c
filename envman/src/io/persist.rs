//! Whole-snapshot persistence shared by the local stores.
//!
//! A [`Persisted`] value owns its in-memory state and the key it is stored
//! under. Changes go through [`Persisted::update`]: mutate in memory, then
//! flush a full serialized copy. Flushes happen in call order, one per change.
//! A failed flush keeps the in-memory change and is reported to the caller.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::io::kv::{KeyValueStore, set_value};

#[derive(Debug)]
pub struct Persisted<S, T> {
    kv: S,
    key: &'static str,
    state: T,
    last_flush_error: Option<String>,
}

impl<S: KeyValueStore, T: Serialize> Persisted<S, T> {
    pub fn new(kv: S, key: &'static str, state: T) -> Self {
        Self {
            kv,
            key,
            state,
            last_flush_error: None,
        }
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Swap in freshly loaded state without writing it back.
    pub fn replace(&mut self, state: T) {
        self.state = state;
    }

    /// Apply `f`; when it reports a change, flush the new snapshot.
    ///
    /// Returns whether anything changed.
    pub fn update(&mut self, f: impl FnOnce(&mut T) -> bool) -> Result<bool, StoreError> {
        if !f(&mut self.state) {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Write the full current state under the store key.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        match set_value(&self.kv, self.key, &self.state) {
            Ok(()) => {
                debug!(key = self.key, "store flushed");
                self.last_flush_error = None;
                Ok(())
            }
            Err(err) => {
                warn!(key = self.key, err = %err, "store flush failed");
                self.last_flush_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Message of the most recent failed flush, cleared by the next success.
    pub fn last_flush_error(&self) -> Option<&str> {
        self.last_flush_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::kv::MemoryStore;
    use crate::test_support::FailingStore;
    use serde_json::json;

    #[test]
    fn update_flushes_only_on_change() {
        let kv = MemoryStore::new();
        let mut persisted = Persisted::new(kv.clone(), "doc", vec![1u32]);

        assert!(!persisted.update(|_| false).expect("no-op"));
        assert!(!kv.contains("doc"));

        assert!(
            persisted
                .update(|v| {
                    v.push(2);
                    true
                })
                .expect("update")
        );
        assert_eq!(kv.get("doc").expect("get"), Some(json!([1, 2])));
    }

    #[test]
    fn failed_flush_is_observable_and_keeps_state() {
        let mut persisted = Persisted::new(FailingStore, "doc", vec![1u32]);
        let err = persisted
            .update(|v| {
                v.push(2);
                true
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(persisted.state(), &vec![1, 2]);
        assert!(persisted.last_flush_error().is_some());
    }
}
