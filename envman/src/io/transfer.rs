//! Export and import of [`EnvSnapshot`] JSON files.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::io::kv::write_atomic;
use crate::io::registry::EnvSnapshot;

/// Write `snapshot` as pretty JSON.
pub fn export_snapshot(path: &Path, snapshot: &EnvSnapshot) -> Result<(), StoreError> {
    let mut buf = serde_json::to_string_pretty(snapshot)?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(path = %path.display(), "snapshot exported");
    Ok(())
}

/// Read a snapshot written by [`export_snapshot`].
///
/// Either scope list may be missing; anything else that does not fit the
/// shape is [`StoreError::Malformed`].
pub fn import_snapshot(path: &Path) -> Result<EnvSnapshot, StoreError> {
    let contents = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    let what = path.display().to_string();
    let value: Value =
        serde_json::from_str(&contents).map_err(|err| StoreError::malformed(&what, err))?;
    let Value::Object(mut map) = value else {
        return Err(StoreError::malformed(what, "expected a JSON object"));
    };
    for key in ["systemVars", "userVars"] {
        map.entry(key).or_insert_with(|| Value::Array(Vec::new()));
    }
    let snapshot: EnvSnapshot = serde_json::from_value(Value::Object(map))
        .map_err(|err| StoreError::malformed(&what, err))?;
    if let Some(blank) = snapshot
        .system_vars
        .iter()
        .chain(&snapshot.user_vars)
        .find(|record| record.name.trim().is_empty())
    {
        return Err(StoreError::malformed(
            what,
            format!("variable with blank name (value {:?})", blank.value),
        ));
    }
    Ok(snapshot)
}
