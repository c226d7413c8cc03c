//! Error kinds surfaced by the registry layer and the local stores.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::scope::Scope;

/// Mutating registry operation, used to phrase errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Set,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Set => f.write_str("set"),
            WriteOp::Delete => f.write_str("delete"),
        }
    }
}

/// Failures from [`EnvironmentRepository`](crate::io::registry::EnvironmentRepository).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Query failed: key missing, tool missing, or another OS error.
    #[error("failed to read environment variables: {0}")]
    Access(String),

    /// Write or delete was denied.
    #[error("{}", permission_message(.scope, .op))]
    Permission {
        scope: Scope,
        op: WriteOp,
        detail: String,
    },

    /// Write or delete failed for a reason other than permissions.
    #[error("failed to {op} environment variable: {detail}")]
    Write { op: WriteOp, detail: String },
}

fn permission_message(scope: &Scope, op: &WriteOp) -> String {
    match scope {
        Scope::System => format!(
            "insufficient privileges: run as administrator to {op} system environment variables"
        ),
        Scope::User => format!(
            "insufficient privileges: access to the user environment key was denied while trying to {op} a variable"
        ),
    }
}

/// Failures from invoking the external registry tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} printed more than {limit_bytes} bytes; output discarded")]
    OutputTruncated { program: String, limit_bytes: usize },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures from the durable key/value collaborator and the stores on top of it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted or imported data is not valid JSON or lacks the expected shape.
    #[error("malformed data in {what}: {reason}")]
    Malformed { what: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(what: impl Into<String>, reason: impl fmt::Display) -> Self {
        StoreError::Malformed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
