//! Query and mutate environment variables in the registry via `reg.exe`.
//!
//! Two fixed keys are addressed, one per [`Scope`]. Every call is a
//! synchronous round trip through a [`ProcessInvoker`]; nothing is cached.
//! Mutations take effect immediately and are never rolled back.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::classify::is_permission_denied;
use crate::core::parser::{EnvVarRecord, RegType, parse_registry_output};
use crate::core::scope::Scope;
use crate::error::{ProcessError, RegistryError, WriteOp};
use crate::io::process::ProcessInvoker;

pub const SYSTEM_KEY: &str = r"HKLM\SYSTEM\CurrentControlSet\Control\Session Manager\Environment";
pub const USER_KEY: &str = r"HKCU\Environment";

/// Variable written and removed by [`EnvironmentRepository::check_admin_privileges`].
pub const ADMIN_PROBE_NAME: &str = "_UTOOLS_ADMIN_TEST_";

pub fn key_path(scope: Scope) -> &'static str {
    match scope {
        Scope::System => SYSTEM_KEY,
        Scope::User => USER_KEY,
    }
}

/// Both scopes as read by one [`EnvironmentRepository::query_all`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSnapshot {
    pub system_vars: Vec<EnvVarRecord>,
    pub user_vars: Vec<EnvVarRecord>,
}

impl EnvSnapshot {
    pub fn vars(&self, scope: Scope) -> &[EnvVarRecord] {
        match scope {
            Scope::System => &self.system_vars,
            Scope::User => &self.user_vars,
        }
    }

    pub fn find(&self, scope: Scope, name: &str) -> Option<&EnvVarRecord> {
        self.vars(scope)
            .iter()
            .find(|record| record.name.eq_ignore_ascii_case(name))
    }
}

pub struct EnvironmentRepository<P> {
    invoker: P,
}

impl<P: ProcessInvoker> EnvironmentRepository<P> {
    pub fn new(invoker: P) -> Self {
        Self { invoker }
    }

    /// Read both scopes, each sorted by name.
    #[instrument(skip_all)]
    pub fn query_all(&self) -> Result<EnvSnapshot, RegistryError> {
        Ok(EnvSnapshot {
            system_vars: self.query_scope(Scope::System)?,
            user_vars: self.query_scope(Scope::User)?,
        })
    }

    /// Read one scope, sorted by name.
    pub fn query_scope(&self, scope: Scope) -> Result<Vec<EnvVarRecord>, RegistryError> {
        let raw = self
            .invoker
            .invoke(&["query", key_path(scope)])
            .map_err(|err| RegistryError::Access(err.to_string()))?;
        let report = parse_registry_output(&raw);
        if report.skipped > 0 {
            debug!(%scope, skipped = report.skipped, "skipped unsupported registry lines");
        }
        let mut records = report.records;
        records.sort_by(|a, b| compare_names(&a.name, &b.name));
        debug!(%scope, count = records.len(), "queried environment");
        Ok(records)
    }

    /// Write `name` as `REG_EXPAND_SZ`, so `%VAR%` references stay literal until read.
    #[instrument(skip(self, value))]
    pub fn set_var(&self, name: &str, value: &str, scope: Scope) -> Result<(), RegistryError> {
        self.invoker
            .invoke(&[
                "add",
                key_path(scope),
                "/v",
                name,
                "/t",
                RegType::ExpandSz.tag(),
                "/d",
                value,
                "/f",
            ])
            .map_err(|err| classify_write_error(err, scope, WriteOp::Set))?;
        info!(%scope, name, "environment variable set");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_var(&self, name: &str, scope: Scope) -> Result<(), RegistryError> {
        self.invoker
            .invoke(&["delete", key_path(scope), "/v", name, "/f"])
            .map_err(|err| classify_write_error(err, scope, WriteOp::Delete))?;
        info!(%scope, name, "environment variable deleted");
        Ok(())
    }

    /// Probe for elevation by writing and deleting a sentinel under the system key.
    ///
    /// A failed delete after a successful write leaves the sentinel behind.
    pub fn check_admin_privileges(&self) -> bool {
        let key = key_path(Scope::System);
        let added = self.invoker.invoke(&[
            "add",
            key,
            "/v",
            ADMIN_PROBE_NAME,
            "/t",
            RegType::Sz.tag(),
            "/d",
            "test",
            "/f",
        ]);
        if let Err(err) = added {
            debug!(err = %err, "admin probe write failed");
            return false;
        }
        match self
            .invoker
            .invoke(&["delete", key, "/v", ADMIN_PROBE_NAME, "/f"])
        {
            Ok(_) => true,
            Err(err) => {
                warn!(err = %err, name = ADMIN_PROBE_NAME, "admin probe cleanup failed, sentinel may remain");
                false
            }
        }
    }
}

fn classify_write_error(err: ProcessError, scope: Scope, op: WriteOp) -> RegistryError {
    let detail = err.to_string();
    if is_permission_denied(&detail) {
        warn!(%scope, %op, "registry write denied");
        RegistryError::Permission { scope, op, detail }
    } else {
        RegistryError::Write { op, detail }
    }
}

/// Case-insensitive order with a case-sensitive tiebreak, close to a locale compare.
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedInvoker;

    const USER_DUMP: &str = "\r\nHKEY_CURRENT_USER\\Environment\r\n    TEMP    REG_EXPAND_SZ    %USERPROFILE%\\AppData\\Local\\Temp\r\n    Path    REG_EXPAND_SZ    C:\\tools;%USERPROFILE%\\bin\r\n    apple    REG_SZ    1\r\n    Flag    REG_DWORD    0x1\r\n\r\n";
    const SYSTEM_DUMP: &str = "\r\nHKEY_LOCAL_MACHINE\\SYSTEM\\CurrentControlSet\\Control\\Session Manager\\Environment\r\n    windir    REG_EXPAND_SZ    %SystemRoot%\r\n    ComSpec    REG_EXPAND_SZ    %SystemRoot%\\system32\\cmd.exe\r\n\r\n";

    fn names(records: &[EnvVarRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn query_all_reads_both_scopes_sorted() {
        let invoker = ScriptedInvoker::new()
            .ok(SYSTEM_DUMP)
            .ok(USER_DUMP);
        let repo = EnvironmentRepository::new(&invoker);
        let snapshot = repo.query_all().expect("query");

        assert_eq!(names(&snapshot.system_vars), vec!["ComSpec", "windir"]);
        assert_eq!(names(&snapshot.user_vars), vec!["apple", "Path", "TEMP"]);
        assert_eq!(
            invoker.calls(),
            vec![
                vec!["query".to_string(), SYSTEM_KEY.to_string()],
                vec!["query".to_string(), USER_KEY.to_string()],
            ]
        );
    }

    #[test]
    fn query_failure_surfaces_message() {
        let invoker = ScriptedInvoker::new().fail(
            "ERROR: The system was unable to find the specified registry key or value.",
        );
        let repo = EnvironmentRepository::new(&invoker);
        let err = repo.query_all().unwrap_err();
        assert!(matches!(err, RegistryError::Access(_)));
        assert!(err.to_string().contains("unable to find"));
    }

    struct OversizedOutput;

    impl ProcessInvoker for OversizedOutput {
        fn invoke(&self, _args: &[&str]) -> Result<String, ProcessError> {
            Err(ProcessError::OutputTruncated {
                program: "reg.exe".to_string(),
                limit_bytes: 16,
            })
        }
    }

    #[test]
    fn truncated_query_output_is_access_error() {
        let repo = EnvironmentRepository::new(OversizedOutput);
        let err = repo.query_scope(Scope::User).unwrap_err();
        assert!(matches!(err, RegistryError::Access(ref msg) if msg.contains("16 bytes")));
    }

    #[test]
    fn set_writes_expandable_string() {
        let invoker = ScriptedInvoker::new().ok("");
        let repo = EnvironmentRepository::new(&invoker);
        repo.set_var("JAVA_HOME", "%ProgramFiles%\\jdk", Scope::User)
            .expect("set");
        assert_eq!(
            invoker.calls()[0],
            vec![
                "add",
                USER_KEY,
                "/v",
                "JAVA_HOME",
                "/t",
                "REG_EXPAND_SZ",
                "/d",
                "%ProgramFiles%\\jdk",
                "/f"
            ]
        );
    }

    #[test]
    fn access_denied_is_permission_error() {
        let invoker = ScriptedInvoker::new().fail("ERROR: Access is denied.");
        let repo = EnvironmentRepository::new(&invoker);
        let err = repo.set_var("X", "1", Scope::System).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Permission {
                scope: Scope::System,
                op: WriteOp::Set,
                ..
            }
        ));
    }

    #[test]
    fn chinese_denial_is_permission_error() {
        let invoker = ScriptedInvoker::new().fail("错误: 拒绝访问。");
        let repo = EnvironmentRepository::new(&invoker);
        let err = repo.delete_var("X", Scope::System).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Permission {
                op: WriteOp::Delete,
                ..
            }
        ));
    }

    #[test]
    fn other_write_failure_is_write_error() {
        let invoker = ScriptedInvoker::new().fail(
            "ERROR: The system was unable to find the specified registry key or value.",
        );
        let repo = EnvironmentRepository::new(&invoker);
        let err = repo.delete_var("MISSING", Scope::User).unwrap_err();
        match err {
            RegistryError::Write { op, detail } => {
                assert_eq!(op, WriteOp::Delete);
                assert!(detail.contains("unable to find"));
            }
            other => panic!("expected write error, got {other:?}"),
        }
    }

    #[test]
    fn delete_uses_delete_verb() {
        let invoker = ScriptedInvoker::new().ok("");
        let repo = EnvironmentRepository::new(&invoker);
        repo.delete_var("OLD", Scope::System).expect("delete");
        assert_eq!(invoker.calls()[0], vec!["delete", SYSTEM_KEY, "/v", "OLD", "/f"]);
    }

    #[test]
    fn admin_probe_true_when_both_steps_succeed() {
        let invoker = ScriptedInvoker::new().ok("").ok("");
        let repo = EnvironmentRepository::new(&invoker);
        assert!(repo.check_admin_privileges());
        let calls = invoker.calls();
        assert_eq!(calls[0][0], "add");
        assert_eq!(calls[0][3], ADMIN_PROBE_NAME);
        assert_eq!(calls[0][5], "REG_SZ");
        assert_eq!(calls[1][0], "delete");
    }

    #[test]
    fn admin_probe_false_when_write_fails() {
        let invoker = ScriptedInvoker::new().fail("ERROR: Access is denied.");
        let repo = EnvironmentRepository::new(&invoker);
        assert!(!repo.check_admin_privileges());
        assert_eq!(invoker.calls().len(), 1);
    }

    #[test]
    fn admin_probe_false_when_cleanup_fails() {
        let invoker = ScriptedInvoker::new().ok("").fail("ERROR: something odd");
        let repo = EnvironmentRepository::new(&invoker);
        assert!(!repo.check_admin_privileges());
        assert_eq!(invoker.calls().len(), 2);
    }

    #[test]
    fn snapshot_find_ignores_case() {
        let snapshot = EnvSnapshot {
            system_vars: Vec::new(),
            user_vars: vec![EnvVarRecord::new("Path", "x")],
        };
        assert!(snapshot.find(Scope::User, "PATH").is_some());
        assert!(snapshot.find(Scope::System, "PATH").is_none());
    }
}
