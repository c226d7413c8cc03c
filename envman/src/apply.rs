//! Multi-step operations that combine the registry with the local stores.
//!
//! None of these are transactional: a registry failure part-way leaves the
//! earlier writes in place.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use crate::core::scope::Scope;
use crate::io::alternatives::AlternativesStore;
use crate::io::clock::Clock;
use crate::io::groups::{GroupsStore, SchemeDraft};
use crate::io::kv::KeyValueStore;
use crate::io::process::ProcessInvoker;
use crate::io::registry::EnvironmentRepository;

/// Outcome of [`apply_scheme`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub scope: Scope,
    /// Variables written, in name order.
    pub written: Vec<String>,
    /// Group variables the scheme has no value for.
    pub missing: Vec<String>,
}

/// Set a variable and remember the value in its alternatives bucket.
pub fn set_and_record<P, S, C>(
    repo: &EnvironmentRepository<P>,
    alternatives: &mut AlternativesStore<S, C>,
    scope: Scope,
    name: &str,
    value: &str,
    note: &str,
) -> Result<()>
where
    P: ProcessInvoker,
    S: KeyValueStore,
    C: Clock,
{
    repo.set_var(name, value, scope)
        .with_context(|| format!("set {scope} variable {name}"))?;
    alternatives
        .add_alternative(scope, name, value, note)
        .context("record alternative")?;
    Ok(())
}

/// Write every value of a scheme into the group's scope, then mark it active.
#[instrument(skip(repo, groups, alternatives))]
pub fn apply_scheme<P, S, A, C>(
    repo: &EnvironmentRepository<P>,
    groups: &mut GroupsStore<S>,
    alternatives: &mut AlternativesStore<A, C>,
    group_id: &str,
    scheme_id: &str,
) -> Result<ApplyReport>
where
    P: ProcessInvoker,
    S: KeyValueStore,
    A: KeyValueStore,
    C: Clock,
{
    let group = groups
        .find_group(group_id)
        .with_context(|| format!("unknown group {group_id}"))?;
    let scheme = group
        .scheme(scheme_id)
        .with_context(|| format!("group {group_id} has no scheme {scheme_id}"))?;
    let scope = group.scope;
    let values = scheme.values.clone();
    let missing: Vec<String> = group
        .variables
        .iter()
        .filter(|name| !values.contains_key(name.as_str()))
        .cloned()
        .collect();

    let mut written = Vec::with_capacity(values.len());
    for (name, value) in &values {
        set_and_record(repo, alternatives, scope, name, value, "")?;
        written.push(name.clone());
    }

    groups
        .activate_scheme(group_id, scheme_id)
        .context("activate scheme")?;
    info!(%scope, written = written.len(), "scheme applied");
    Ok(ApplyReport {
        scope,
        written,
        missing,
    })
}

/// Snapshot the group's variables as they are in the registry now.
///
/// Variables that do not exist are left out of the scheme. Returns the new scheme id.
pub fn capture_scheme<P, S>(
    repo: &EnvironmentRepository<P>,
    groups: &mut GroupsStore<S>,
    group_id: &str,
    name: &str,
) -> Result<String>
where
    P: ProcessInvoker,
    S: KeyValueStore,
{
    let group = groups
        .find_group(group_id)
        .with_context(|| format!("unknown group {group_id}"))?;
    let scope = group.scope;
    let current = repo.query_scope(scope)?;
    let values: BTreeMap<String, String> = group
        .variables
        .iter()
        .filter_map(|var| {
            current
                .iter()
                .find(|record| record.name.eq_ignore_ascii_case(var))
                .map(|record| (var.clone(), record.value.clone()))
        })
        .collect();

    let scheme_id = groups
        .add_scheme(
            group_id,
            SchemeDraft {
                name: name.to_string(),
                values,
            },
        )
        .context("add scheme")?
        .with_context(|| format!("unknown group {group_id}"))?;
    Ok(scheme_id)
}

/// Rename a variable: copy its value to `new_name`, delete `old_name`, and
/// carry the alternatives bucket over.
pub fn rename_var<P, S, C>(
    repo: &EnvironmentRepository<P>,
    alternatives: &mut AlternativesStore<S, C>,
    scope: Scope,
    old_name: &str,
    new_name: &str,
) -> Result<()>
where
    P: ProcessInvoker,
    S: KeyValueStore,
    C: Clock,
{
    if new_name.trim().is_empty() {
        bail!("new variable name must not be blank");
    }
    if old_name.eq_ignore_ascii_case(new_name) {
        bail!("{old_name} and {new_name} name the same variable");
    }
    let current = repo.query_scope(scope)?;
    let Some(record) = current
        .iter()
        .find(|record| record.name.eq_ignore_ascii_case(old_name))
    else {
        bail!("{scope} variable {old_name} does not exist");
    };

    repo.set_var(new_name, &record.value, scope)
        .with_context(|| format!("create {new_name}"))?;
    repo.delete_var(&record.name, scope)
        .with_context(|| format!("delete {}", record.name))?;
    alternatives
        .move_alternatives(scope, old_name, new_name)
        .context("move alternatives")?;
    info!(%scope, from = old_name, to = new_name, "variable renamed");
    Ok(())
}
