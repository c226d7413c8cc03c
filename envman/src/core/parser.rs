//! Parser for the tabular text printed by `reg query`.
//!
//! ```text
//! HKEY_CURRENT_USER\Environment
//!     Path    REG_EXPAND_SZ    %USERPROFILE%\bin;C:\tools
//!     TEMP    REG_EXPAND_SZ    %USERPROFILE%\AppData\Local\Temp
//! ```
//!
//! Every line is classified on its own. Lines that are neither structural
//! (blank, key header, end marker) nor a string-typed entry are skipped and
//! counted, never reported as errors: a key may hold value types this crate
//! does not model (`REG_DWORD`, `REG_BINARY`, ...).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(REG_SZ|REG_EXPAND_SZ|REG_MULTI_SZ)(?:\s+(.*))?$")
        .expect("entry regex is valid")
});

const HEADER_PREFIX: &str = "HKEY_";
const END_MARKER: &str = "End of search";

/// One variable as read from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarRecord {
    pub name: String,
    pub value: String,
}

impl EnvVarRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// String value types recognized in query output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegType {
    Sz,
    ExpandSz,
    MultiSz,
}

impl RegType {
    pub fn tag(self) -> &'static str {
        match self {
            RegType::Sz => "REG_SZ",
            RegType::ExpandSz => "REG_EXPAND_SZ",
            RegType::MultiSz => "REG_MULTI_SZ",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "REG_SZ" => Some(RegType::Sz),
            "REG_EXPAND_SZ" => Some(RegType::ExpandSz),
            "REG_MULTI_SZ" => Some(RegType::MultiSz),
            _ => None,
        }
    }
}

/// Classification of a single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Blank,
    Header,
    EndMarker,
    Entry { record: EnvVarRecord, kind: RegType },
    /// Did not match the entry pattern; dropped.
    Skipped,
}

/// Result of parsing one query dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub records: Vec<EnvVarRecord>,
    /// Non-structural lines that did not match the entry pattern.
    pub skipped: usize,
}

pub fn classify_line(raw: &str) -> Line {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    // Entries win: a variable may be named `HKEY_...` or mention the end marker.
    if let Some(caps) = ENTRY_RE.captures(line)
        && let Some(kind) = RegType::from_tag(&caps[2])
    {
        let value = caps.get(3).map_or("", |m| m.as_str());
        return Line::Entry {
            record: EnvVarRecord::new(caps[1].trim(), value.trim()),
            kind,
        };
    }
    if line.starts_with(HEADER_PREFIX) {
        return Line::Header;
    }
    if line.contains(END_MARKER) {
        return Line::EndMarker;
    }
    Line::Skipped
}

/// Parse a full `reg query` dump, keeping entries in output order.
pub fn parse_registry_output(raw: &str) -> ParseReport {
    let mut report = ParseReport::default();
    for line in raw.lines() {
        match classify_line(line) {
            Line::Entry { record, .. } => report.records.push(record),
            Line::Skipped => report.skipped += 1,
            Line::Blank | Line::Header | Line::EndMarker => {}
        }
    }
    report
}
