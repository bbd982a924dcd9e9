//! TOML configuration.
//!
//! ```toml
//! [ast_cache]
//! max_entries = 500
//!
//! [pool]
//! max_idle = 8
//!
//! [log]
//! filter = "dba=debug"
//!
//! [[connections]]
//! name = "local"
//! desc = "sqlite:::/tmp/app.db:"
//! ```
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::DEFAULT_MAX_ENTRIES;
use crate::connstr::ConnDesc;
use crate::db::DEFAULT_MAX_IDLE;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ast_cache: AstCacheConfig,
    pub pool: PoolConfig,
    pub log: LogConfig,
    pub connections: Vec<SavedConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AstCacheConfig {
    /// Entries kept before unreferenced ones are swept.
    pub max_entries: usize,
}

impl Default for AstCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle physical connections kept per logical connection.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

/// A named connection descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedConnection {
    pub name: String,
    /// Descriptor in either textual form.
    pub desc: String,
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dba")
            .join("config.toml")
    }

    /// Load from [`Config::default_path`]; a missing file gives defaults.
    pub fn load_default() -> Result<Config> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Config::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve a saved connection name, or parse `target` as a descriptor.
    pub fn resolve(&self, target: &str) -> Result<ConnDesc> {
        match self
            .connections
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(target))
        {
            Some(saved) => ConnDesc::parse(&saved.desc),
            None if target.contains(':') || target.starts_with('{') => ConnDesc::parse(target),
            None => Err(Error::InvalidConnDesc(format!(
                "no saved connection named '{}'",
                target
            ))),
        }
    }
}
