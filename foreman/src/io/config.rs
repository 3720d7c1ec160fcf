//! Runner configuration stored in `foreman.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Tunables (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; a missing file is
/// the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForemanConfig {
    /// Path of the progress ledger, relative to the working directory.
    pub ledger_path: String,

    pub driver: DriverConfig,
    pub verify: VerifyConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Agent command the prompt is piped to (e.g. `["claude", "-p"]`).
    pub command: Vec<String>,
    /// Wall-clock budget for one agent invocation, in seconds.
    pub timeout_secs: u64,
    /// Truncate captured agent output beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Verification command; empty means the gate is unconfigured and
    /// `--verify` is a configuration error.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// Publish command run after each completed item when `--push` is set.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            ledger_path: "progress.md".to_string(),
            driver: DriverConfig::default(),
            verify: VerifyConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            command: vec!["git".to_string(), "push".to_string()],
            timeout_secs: 2 * 60,
        }
    }
}

impl ForemanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ledger_path.trim().is_empty() {
            return Err(anyhow!("ledger_path must not be empty"));
        }
        if self.driver.command.is_empty() || self.driver.command[0].trim().is_empty() {
            return Err(anyhow!("driver.command must be a non-empty array"));
        }
        if self.driver.timeout_secs == 0 {
            return Err(anyhow!("driver.timeout_secs must be > 0"));
        }
        if self.driver.output_limit_bytes == 0 {
            return Err(anyhow!("driver.output_limit_bytes must be > 0"));
        }
        if self.verify.timeout_secs == 0 {
            return Err(anyhow!("verify.timeout_secs must be > 0"));
        }
        if self.push.timeout_secs == 0 {
            return Err(anyhow!("push.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ForemanConfig> {
    if !path.exists() {
        let cfg = ForemanConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForemanConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForemanConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');

    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
