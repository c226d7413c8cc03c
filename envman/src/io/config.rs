//! envman configuration stored as `config.toml` in the data directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::io::process::{DEFAULT_OUTPUT_LIMIT_BYTES, RegExeInvoker, default_reg_program};

pub const CONFIG_FILE_NAME: &str = "config.toml";
const DATA_DIR_NAME: &str = "envman";

/// envman configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Where the store documents live. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,

    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path to `reg.exe` or a compatible tool. Defaults to `%SystemRoot%\System32\reg.exe`.
    pub program: Option<PathBuf>,

    /// Kill the tool after this many seconds. `None` or 0 waits forever.
    pub timeout_secs: Option<u64>,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            program: None,
            timeout_secs: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn invoker(&self) -> RegExeInvoker {
        let program = self.program.clone().unwrap_or_else(default_reg_program);
        RegExeInvoker::new(program)
            .with_timeout(self.timeout())
            .with_output_limit(self.output_limit_bytes)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.registry.output_limit_bytes == 0 {
            return Err(anyhow!("registry.output_limit_bytes must be > 0"));
        }
        if let Some(program) = &self.registry.program
            && program.as_os_str().is_empty()
        {
            return Err(anyhow!("registry.program must not be empty"));
        }
        Ok(())
    }

    /// Resolve the data directory: explicit override, then config, then platform default.
    pub fn resolve_data_dir(&self, override_dir: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = override_dir {
            return Ok(dir.to_path_buf());
        }
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        default_data_dir()
    }
}

/// `<platform data dir>/envman`.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .context("no platform data directory; pass --data-dir")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
