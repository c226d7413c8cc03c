//! Persisted variable groups and their value schemes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::scope::Scope;
use crate::error::StoreError;
use crate::io::ids::{IdSource, TimeUuidIds};
use crate::io::kv::{KeyValueStore, get_or};
use crate::io::persist::Persisted;

pub const GROUPS_KEY: &str = "env-manager-variable-groups";

/// A named set of variables plus value snapshots for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub schemes: Vec<Scheme>,
    /// Always `None` or the id of a scheme in `schemes`.
    #[serde(default)]
    pub active_scheme_id: Option<String>,
    /// Fields written by other tools, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Group {
    pub fn scheme(&self, scheme_id: &str) -> Option<&Scheme> {
        self.schemes.iter().find(|s| s.id == scheme_id)
    }

    pub fn active_scheme(&self) -> Option<&Scheme> {
        self.active_scheme_id
            .as_deref()
            .and_then(|id| self.scheme(id))
    }

    /// Clear a dangling active pointer. Returns whether it was cleared.
    fn repair_active_pointer(&mut self) -> bool {
        let dangling = matches!(&self.active_scheme_id, Some(id) if self.scheme(id).is_none());
        if dangling {
            warn!(group = %self.id, "active scheme no longer exists, clearing");
            self.active_scheme_id = None;
        }
        dangling
    }
}

/// Variable name to value snapshot inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields to overlay on a group. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub scope: Option<Scope>,
    pub variables: Option<Vec<String>>,
    pub schemes: Option<Vec<Scheme>>,
    pub active_scheme_id: Option<Option<String>>,
}

impl GroupPatch {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    fn apply_to(self, group: &mut Group) {
        if let Some(id) = self.id {
            group.id = id;
        }
        if let Some(name) = self.name {
            group.name = name;
        }
        if let Some(scope) = self.scope {
            group.scope = scope;
        }
        if let Some(variables) = self.variables {
            group.variables = variables;
        }
        if let Some(schemes) = self.schemes {
            group.schemes = schemes;
        }
        if let Some(active) = self.active_scheme_id {
            group.active_scheme_id = active;
        }
    }
}

/// Input for a new scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeDraft {
    pub name: String,
    pub values: BTreeMap<String, String>,
}

/// Fields to overlay on a scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemePatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub values: Option<BTreeMap<String, String>>,
}

pub struct GroupsStore<S> {
    store: Persisted<S, Vec<Group>>,
    ids: Box<dyn IdSource>,
}

impl<S: KeyValueStore> GroupsStore<S> {
    pub fn load(kv: S) -> Result<Self, StoreError> {
        Self::load_with_ids(kv, TimeUuidIds)
    }

    pub fn load_with_ids(kv: S, ids: impl IdSource + 'static) -> Result<Self, StoreError> {
        let groups = read_groups(&kv)?;
        Ok(Self {
            store: Persisted::new(kv, GROUPS_KEY, groups),
            ids: Box::new(ids),
        })
    }

    pub fn groups(&self) -> &[Group] {
        self.store.state()
    }

    pub fn find_group(&self, id: &str) -> Option<&Group> {
        self.groups().iter().find(|g| g.id == id)
    }

    /// Create a group from defaults overlaid with `partial`. Returns its id.
    ///
    /// A caller-supplied `partial.id` replaces the generated one.
    pub fn add_group(&mut self, partial: GroupPatch) -> Result<String, StoreError> {
        let mut group = Group {
            id: self.ids.next_id(),
            name: String::new(),
            scope: Scope::User,
            variables: Vec::new(),
            schemes: Vec::new(),
            active_scheme_id: None,
            extra: Map::new(),
        };
        partial.apply_to(&mut group);
        group.repair_active_pointer();
        let id = group.id.clone();
        self.store.update(|groups| {
            groups.push(group);
            true
        })?;
        debug!(group = %id, "group added");
        Ok(id)
    }

    /// Shallow-merge `patch` onto the group `id`. No-op for unknown ids.
    pub fn update_group(&mut self, id: &str, patch: GroupPatch) -> Result<(), StoreError> {
        self.store.update(|groups| {
            let Some(group) = groups.iter_mut().find(|g| g.id == id) else {
                return false;
            };
            let before = group.clone();
            patch.apply_to(group);
            group.repair_active_pointer();
            *group != before
        })?;
        Ok(())
    }

    pub fn delete_group(&mut self, id: &str) -> Result<(), StoreError> {
        self.store.update(|groups| {
            let before = groups.len();
            groups.retain(|g| g.id != id);
            groups.len() != before
        })?;
        Ok(())
    }

    /// Append a scheme with a fresh id. Returns the id, or `None` for an unknown group.
    pub fn add_scheme(
        &mut self,
        group_id: &str,
        draft: SchemeDraft,
    ) -> Result<Option<String>, StoreError> {
        if self.find_group(group_id).is_none() {
            return Ok(None);
        }
        let scheme = Scheme {
            id: self.ids.next_id(),
            name: draft.name,
            values: draft.values,
            extra: Map::new(),
        };
        let scheme_id = scheme.id.clone();
        self.store.update(|groups| match groups.iter_mut().find(|g| g.id == group_id) {
            Some(group) => {
                group.schemes.push(scheme);
                true
            }
            None => false,
        })?;
        Ok(Some(scheme_id))
    }

    /// Shallow-merge `patch` onto a scheme. An active scheme keeps its active
    /// status through an id change.
    pub fn update_scheme(
        &mut self,
        group_id: &str,
        scheme_id: &str,
        patch: SchemePatch,
    ) -> Result<(), StoreError> {
        self.store.update(|groups| {
            let Some(group) = groups.iter_mut().find(|g| g.id == group_id) else {
                return false;
            };
            let id_taken = patch
                .id
                .as_deref()
                .is_some_and(|id| id != scheme_id && group.scheme(id).is_some());
            if id_taken {
                warn!(
                    group = group_id,
                    scheme = scheme_id,
                    "scheme id already in use, update refused"
                );
                return false;
            }
            let Some(scheme) = group.schemes.iter_mut().find(|s| s.id == scheme_id) else {
                return false;
            };
            let before = scheme.clone();
            if let Some(id) = patch.id {
                scheme.id = id;
            }
            if let Some(name) = patch.name {
                scheme.name = name;
            }
            if let Some(values) = patch.values {
                scheme.values = values;
            }
            let changed = *scheme != before;
            let new_id = scheme.id.clone();
            if group.active_scheme_id.as_deref() == Some(scheme_id) {
                group.active_scheme_id = Some(new_id);
            }
            changed
        })?;
        Ok(())
    }

    /// Remove a scheme, clearing the group's active pointer if it named it.
    pub fn delete_scheme(&mut self, group_id: &str, scheme_id: &str) -> Result<(), StoreError> {
        self.store.update(|groups| {
            let Some(group) = groups.iter_mut().find(|g| g.id == group_id) else {
                return false;
            };
            let Some(index) = group.schemes.iter().position(|s| s.id == scheme_id) else {
                return false;
            };
            group.schemes.remove(index);
            if group.active_scheme_id.as_deref() == Some(scheme_id) {
                group.active_scheme_id = None;
            }
            true
        })?;
        Ok(())
    }

    /// Mark `scheme_id` active. Returns `false` when group or scheme is unknown.
    pub fn activate_scheme(&mut self, group_id: &str, scheme_id: &str) -> Result<bool, StoreError> {
        let known = self
            .find_group(group_id)
            .is_some_and(|g| g.scheme(scheme_id).is_some());
        if !known {
            return Ok(false);
        }
        self.store.update(|groups| {
            let Some(group) = groups.iter_mut().find(|g| g.id == group_id) else {
                return false;
            };
            if group.active_scheme_id.as_deref() == Some(scheme_id) {
                return false;
            }
            group.active_scheme_id = Some(scheme_id.to_string());
            true
        })?;
        Ok(true)
    }

    /// Discard in-memory state and load again from storage.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        let groups = read_groups(self.store.kv())?;
        self.store.replace(groups);
        Ok(())
    }

    pub fn last_flush_error(&self) -> Option<&str> {
        self.store.last_flush_error()
    }
}

fn read_groups<S: KeyValueStore>(kv: &S) -> Result<Vec<Group>, StoreError> {
    let mut groups: Vec<Group> = get_or(kv, GROUPS_KEY, Vec::new())?;
    for group in &mut groups {
        group.repair_active_pointer();
    }
    debug!(count = groups.len(), "groups loaded");
    Ok(groups)
}
