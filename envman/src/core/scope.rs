//! Registry scope: machine-wide (`system`) or per-user (`user`).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Which of the two fixed registry locations an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    System,
    #[default]
    User,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::System, Scope::User];

    /// Anything other than the literal `system` (including a missing value) is `user`.
    pub fn normalize(raw: Option<&str>) -> Scope {
        match raw {
            Some("system") => Scope::System,
            _ => Scope::User,
        }
    }

    pub fn from_is_system(is_system: bool) -> Scope {
        if is_system { Scope::System } else { Scope::User }
    }

    pub fn is_system(self) -> bool {
        self == Scope::System
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::System => "system",
            Scope::User => "user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Scope {
    fn from(raw: &str) -> Self {
        Scope::normalize(Some(raw))
    }
}

// Persisted groups may carry any string (or null) in `scope`.
impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Scope::normalize(raw.as_deref()))
    }
}
