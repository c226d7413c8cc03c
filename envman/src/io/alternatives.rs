//! Persisted per-variable value history.
//!
//! Buckets are keyed by `(scope, trimmed variable name)`; see
//! [`crate::core::alternative`] for ordering and capacity rules.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::alternative::{
    Alternative, AlternativesRoot, normalize_list, normalize_root, promote_or_insert,
};
use crate::core::scope::Scope;
use crate::error::StoreError;
use crate::io::clock::{Clock, SystemClock};
use crate::io::kv::KeyValueStore;
use crate::io::persist::Persisted;

/// Storage key for the current blob shape.
pub const ALTERNATIVES_KEY: &str = "env-manager-var-alternatives-v1";
/// Storage key of the pre-v1 blob. Read once for migration, never written.
pub const LEGACY_ALTERNATIVES_KEY: &str = "env-manager-var-alternatives";

pub struct AlternativesStore<S, C = SystemClock> {
    store: Persisted<S, AlternativesRoot>,
    clock: C,
}

impl<S: KeyValueStore> AlternativesStore<S, SystemClock> {
    pub fn load(kv: S) -> Result<Self, StoreError> {
        Self::load_with_clock(kv, SystemClock)
    }
}

impl<S: KeyValueStore, C: Clock> AlternativesStore<S, C> {
    /// Load the current blob, migrating the legacy one on first run.
    pub fn load_with_clock(kv: S, clock: C) -> Result<Self, StoreError> {
        let (root, migrated) = read_root(&kv)?;
        let mut store = Persisted::new(kv, ALTERNATIVES_KEY, root);
        if migrated {
            persist_migration(&mut store);
        }
        Ok(Self { store, clock })
    }

    pub fn root(&self) -> &AlternativesRoot {
        self.store.state()
    }

    /// Entries for `name`, most recent first. Empty for blank or unknown names.
    pub fn get_alternatives(&self, scope: Scope, name: &str) -> &[Alternative] {
        let Some(key) = bucket_key(name) else {
            return &[];
        };
        self.root()
            .scope(scope)
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Record `value` for `name`, or promote it if already present.
    pub fn add_alternative(
        &mut self,
        scope: Scope,
        name: &str,
        value: &str,
        note: &str,
    ) -> Result<(), StoreError> {
        let Some(key) = bucket_key(name) else {
            return Ok(());
        };
        if value.is_empty() {
            return Ok(());
        }
        let now = self.clock.now_millis();
        self.store.update(|root| {
            let bucket = root.scope_mut(scope).entry(key.to_string()).or_default();
            promote_or_insert(bucket, value, note, now)
        })?;
        debug!(%scope, name = key, "alternative recorded");
        Ok(())
    }

    pub fn remove_alternative(
        &mut self,
        scope: Scope,
        name: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let Some(key) = bucket_key(name) else {
            return Ok(());
        };
        self.store.update(|root| {
            let Some(bucket) = root.scope_mut(scope).get_mut(key) else {
                return false;
            };
            match bucket.iter().position(|item| item.value == value) {
                Some(index) => {
                    bucket.remove(index);
                    true
                }
                None => false,
            }
        })?;
        Ok(())
    }

    /// Drop the whole bucket for `name`.
    pub fn remove_all_alternatives(&mut self, scope: Scope, name: &str) -> Result<(), StoreError> {
        let Some(key) = bucket_key(name) else {
            return Ok(());
        };
        self.store
            .update(|root| root.scope_mut(scope).remove(key).is_some())?;
        Ok(())
    }

    /// Replace the bucket with a normalized copy of `list`.
    ///
    /// A non-array or empty `list` deletes the bucket instead.
    pub fn set_alternatives(
        &mut self,
        scope: Scope,
        name: &str,
        list: &Value,
    ) -> Result<(), StoreError> {
        let Some(key) = bucket_key(name) else {
            return Ok(());
        };
        let normalized = normalize_list(list);
        self.store.update(|root| {
            let buckets = root.scope_mut(scope);
            match normalized {
                Some(bucket) => {
                    if buckets.get(key) == Some(&bucket) {
                        return false;
                    }
                    buckets.insert(key.to_string(), bucket);
                    true
                }
                None => buckets.remove(key).is_some(),
            }
        })?;
        Ok(())
    }

    /// Re-key a bucket after a variable rename. No-op without an `old_name` bucket.
    pub fn move_alternatives(
        &mut self,
        scope: Scope,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), StoreError> {
        let (Some(old_key), Some(new_key)) = (bucket_key(old_name), bucket_key(new_name)) else {
            return Ok(());
        };
        if old_key == new_key {
            return Ok(());
        }
        self.store.update(|root| {
            let buckets = root.scope_mut(scope);
            match buckets.remove(old_key) {
                Some(bucket) => {
                    buckets.insert(new_key.to_string(), bucket);
                    true
                }
                None => false,
            }
        })?;
        Ok(())
    }

    /// Discard in-memory state and load again from storage.
    pub fn reload_alternatives(&mut self) -> Result<(), StoreError> {
        let (root, migrated) = read_root(self.store.kv())?;
        self.store.replace(root);
        if migrated {
            persist_migration(&mut self.store);
        }
        Ok(())
    }

    pub fn last_flush_error(&self) -> Option<&str> {
        self.store.last_flush_error()
    }
}

/// Save migrated state under the current key.
///
/// A failed write does not fail the load: the error is kept in
/// `last_flush_error` and the next change writes the full state again.
fn persist_migration<S: KeyValueStore>(store: &mut Persisted<S, AlternativesRoot>) {
    match store.flush() {
        Ok(()) => info!(key = ALTERNATIVES_KEY, "migrated alternatives saved"),
        Err(err) => warn!(
            key = ALTERNATIVES_KEY,
            err = %err,
            "migrated alternatives not saved, legacy blob left in place"
        ),
    }
}

fn bucket_key(name: &str) -> Option<&str> {
    let key = name.trim();
    (!key.is_empty()).then_some(key)
}

/// Returns the loaded root and whether it came from the legacy key.
fn read_root<S: KeyValueStore>(kv: &S) -> Result<(AlternativesRoot, bool), StoreError> {
    match kv.get(ALTERNATIVES_KEY)? {
        Some(blob) if blob.is_object() => return Ok((normalize_root(&blob), false)),
        Some(_) => {
            warn!(key = ALTERNATIVES_KEY, "alternatives blob is not an object, starting empty");
            return Ok((AlternativesRoot::default(), false));
        }
        None => {}
    }

    let legacy = match kv.get(LEGACY_ALTERNATIVES_KEY) {
        Ok(Some(blob)) if blob.is_object() => blob,
        Ok(Some(_)) => {
            warn!(key = LEGACY_ALTERNATIVES_KEY, "legacy alternatives blob has unexpected shape, ignoring");
            return Ok((AlternativesRoot::default(), false));
        }
        Ok(None) => return Ok((AlternativesRoot::default(), false)),
        Err(err) => {
            warn!(key = LEGACY_ALTERNATIVES_KEY, err = %err, "legacy alternatives unreadable, ignoring");
            return Ok((AlternativesRoot::default(), false));
        }
    };

    let root = normalize_root(&legacy);
    info!(buckets = root.bucket_count(), "migrated legacy alternatives");
    Ok((root, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::kv::MemoryStore;
    use crate::test_support::TickClock;
    use serde_json::json;

    fn store(kv: &MemoryStore) -> AlternativesStore<MemoryStore, TickClock> {
        AlternativesStore::load_with_clock(kv.clone(), TickClock::starting_at(1_000)).expect("load")
    }

    fn values<S: KeyValueStore, C: Clock>(
        store: &AlternativesStore<S, C>,
        scope: Scope,
        name: &str,
    ) -> Vec<String> {
        store
            .get_alternatives(scope, name)
            .iter()
            .map(|item| item.value.clone())
            .collect()
    }

    /// Reads through to the wrapped store; every write fails.
    struct ReadOnly(MemoryStore);

    impl KeyValueStore for ReadOnly {
        fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, _value: &Value) -> Result<(), StoreError> {
            Err(StoreError::io(
                key,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ))
        }
    }

    #[test]
    fn unsaved_migration_still_loads_and_reports() {
        let legacy = MemoryStore::new().with(
            LEGACY_ALTERNATIVES_KEY,
            json!({"user": {"PATH": ["C:\\a"]}}),
        );
        let mut alts =
            AlternativesStore::load_with_clock(ReadOnly(legacy.clone()), TickClock::starting_at(1))
                .expect("load");
        assert_eq!(values(&alts, Scope::User, "PATH"), vec!["C:\\a"]);
        assert!(alts.last_flush_error().is_some_and(|msg| msg.contains("read-only")));
        assert!(!legacy.contains(ALTERNATIVES_KEY));

        assert!(alts.add_alternative(Scope::User, "PATH", "C:\\b", "").is_err());
        assert_eq!(values(&alts, Scope::User, "PATH"), vec!["C:\\b", "C:\\a"]);
    }

    #[test]
    fn empty_storage_starts_empty() {
        let kv = MemoryStore::new();
        let alts = store(&kv);
        assert_eq!(alts.root(), &AlternativesRoot::default());
        assert!(!kv.contains(ALTERNATIVES_KEY));
    }

    #[test]
    fn add_twenty_one_evicts_oldest() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        for i in 1..=21 {
            alts.add_alternative(Scope::User, "PATH", &format!("value-{i}"), "")
                .expect("add");
        }
        let bucket = alts.get_alternatives(Scope::User, "PATH");
        assert_eq!(bucket.len(), 20);
        assert_eq!(bucket[0].value, "value-21");
        assert_eq!(bucket[19].value, "value-2");
        assert!(bucket.iter().all(|item| item.value != "value-1"));
        assert!(bucket.windows(2).all(|w| w[0].added_at > w[1].added_at));
    }

    #[test]
    fn readding_promotes_without_duplicate() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.add_alternative(Scope::System, "JAVA_HOME", "C:\\jdk17", "old")
            .expect("add");
        alts.add_alternative(Scope::System, "JAVA_HOME", "C:\\jdk21", "")
            .expect("add");
        let first_added = alts.get_alternatives(Scope::System, "JAVA_HOME")[1].added_at;

        alts.add_alternative(Scope::System, "JAVA_HOME", "C:\\jdk17", "")
            .expect("re-add");
        let bucket = alts.get_alternatives(Scope::System, "JAVA_HOME");
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket[0].value, "C:\\jdk17");
        assert_eq!(bucket[0].note, "old");
        assert_eq!(bucket[0].added_at, first_added);
    }

    #[test]
    fn blank_name_or_empty_value_is_ignored() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.add_alternative(Scope::User, "   ", "x", "").expect("add");
        alts.add_alternative(Scope::User, "A", "", "").expect("add");
        assert_eq!(alts.root().bucket_count(), 0);
        assert!(!kv.contains(ALTERNATIVES_KEY));
        assert!(alts.get_alternatives(Scope::User, "").is_empty());
    }

    #[test]
    fn names_are_trimmed() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.add_alternative(Scope::User, "  GOPATH ", "C:\\go", "")
            .expect("add");
        assert_eq!(values(&alts, Scope::User, "GOPATH"), vec!["C:\\go"]);
    }

    #[test]
    fn rename_preserves_entries() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.add_alternative(Scope::System, "OLD_VAR", "one", "")
            .expect("add");
        alts.add_alternative(Scope::System, "OLD_VAR", "two", "")
            .expect("add");
        let before = alts.get_alternatives(Scope::System, "OLD_VAR").to_vec();

        alts.move_alternatives(Scope::System, "OLD_VAR", "NEW_VAR")
            .expect("move");
        assert!(alts.get_alternatives(Scope::System, "OLD_VAR").is_empty());
        assert_eq!(alts.get_alternatives(Scope::System, "NEW_VAR"), before.as_slice());
    }

    #[test]
    fn move_without_bucket_is_noop() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.move_alternatives(Scope::User, "NOPE", "OTHER")
            .expect("move");
        assert!(!kv.contains(ALTERNATIVES_KEY));
    }

    #[test]
    fn remove_and_remove_all() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        for value in ["a", "b", "c"] {
            alts.add_alternative(Scope::User, "X", value, "").expect("add");
        }
        alts.remove_alternative(Scope::User, "X", "b").expect("remove");
        alts.remove_alternative(Scope::User, "X", "missing")
            .expect("remove");
        assert_eq!(values(&alts, Scope::User, "X"), vec!["c", "a"]);

        alts.remove_all_alternatives(Scope::User, "X")
            .expect("remove all");
        assert!(!alts.root().user.contains_key("X"));
    }

    #[test]
    fn set_alternatives_normalizes_or_deletes() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.set_alternatives(Scope::User, "X", &json!(["a", {"value": "b", "note": "n"}, 7]))
            .expect("set");
        assert_eq!(values(&alts, Scope::User, "X"), vec!["a", "b", "7"]);
        assert_eq!(alts.get_alternatives(Scope::User, "X")[1].note, "n");

        alts.set_alternatives(Scope::User, "X", &json!([])).expect("clear");
        assert!(!alts.root().user.contains_key("X"));

        alts.set_alternatives(Scope::User, "Y", &json!(["a"])).expect("set");
        alts.set_alternatives(Scope::User, "Y", &json!("nope"))
            .expect("clear");
        assert!(!alts.root().user.contains_key("Y"));
    }

    #[test]
    fn every_mutation_persists_full_snapshot() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.add_alternative(Scope::User, "X", "a", "note").expect("add");
        let persisted = kv.get(ALTERNATIVES_KEY).expect("get").expect("present");
        assert_eq!(
            persisted,
            json!({"system": {}, "user": {"X": [{"value": "a", "note": "note", "addedAt": 1000}]}})
        );
    }

    #[test]
    fn legacy_blob_is_migrated_and_left_in_place() {
        let legacy = json!({
            "user": {"PATH": ["C:\\a", {"value": "C:\\b", "note": "work"}, 5], "BROKEN": "x"},
            "system": {}
        });
        let kv = MemoryStore::new().with(LEGACY_ALTERNATIVES_KEY, legacy.clone());
        let alts = store(&kv);

        assert_eq!(values(&alts, Scope::User, "PATH"), vec!["C:\\a", "C:\\b", "5"]);
        assert!(alts.get_alternatives(Scope::User, "BROKEN").is_empty());
        assert_eq!(
            kv.get(LEGACY_ALTERNATIVES_KEY).expect("get"),
            Some(legacy)
        );
        let current = kv.get(ALTERNATIVES_KEY).expect("get").expect("migrated");
        assert_eq!(current["user"]["PATH"][1], json!({"value": "C:\\b", "note": "work"}));
    }

    #[test]
    fn current_blob_wins_over_legacy() {
        let kv = MemoryStore::new()
            .with(ALTERNATIVES_KEY, json!({"user": {"A": [{"value": "new", "note": ""}]}}))
            .with(LEGACY_ALTERNATIVES_KEY, json!({"user": {"A": ["old"]}}));
        let alts = store(&kv);
        assert_eq!(values(&alts, Scope::User, "A"), vec!["new"]);
    }

    #[test]
    fn reload_picks_up_external_changes() {
        let kv = MemoryStore::new();
        let mut alts = store(&kv);
        alts.add_alternative(Scope::User, "A", "mine", "").expect("add");

        kv.set(ALTERNATIVES_KEY, &json!({"user": {"A": ["theirs"]}}))
            .expect("external write");
        alts.reload_alternatives().expect("reload");
        assert_eq!(values(&alts, Scope::User, "A"), vec!["theirs"]);
    }
}
