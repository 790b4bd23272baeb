//! Service configuration.
//!
//! Every field has a default so an empty TOML file (or no file at all) yields
//! a working configuration. Precedence is CLI flag > environment > file > default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`EngineConfig::path`].
pub const ENGINE_PATH_ENV: &str = "EVALPOOL_ENGINE_PATH";

pub const DEFAULT_POOL_SIZE: usize = 32;
pub const DEFAULT_LOCAL_DEPTH: u32 = 12;
pub const DEFAULT_CLOUD_MIN_DEPTH: u32 = 18;
pub const DEFAULT_CLOUD_ENDPOINT: &str = "https://lichess.org/api/cloud-eval";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub pool: PoolConfig,
    pub cloud: CloudConfig,
    pub search: SearchConfig,
}

impl ServiceConfig {
    /// Read a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os(ENGINE_PATH_ENV).filter(|v| !v.is_empty()) {
            self.engine.path = PathBuf::from(path);
        }
    }
}

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Binary path; a bare name is resolved through `PATH`.
    pub path: PathBuf,
    pub args: Vec<String>,
    pub threads: Option<usize>,
    pub hash_mb: Option<u32>,
    /// Extra `setoption` values, sent only when the engine advertises them.
    pub options: BTreeMap<String, toml::Value>,
    pub init_timeout_ms: u64,
    pub analysis_timeout_ms: u64,
    pub quit_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stockfish"),
            args: Vec::new(),
            threads: Some(1),
            hash_mb: Some(16),
            options: BTreeMap::new(),
            init_timeout_ms: 10_000,
            analysis_timeout_ms: 20_000,
            quit_timeout_ms: 300,
        }
    }
}

impl EngineConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }

    /// `(name, value)` pairs to send after the handshake, in a stable order.
    pub fn setoptions(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(threads) = self.threads {
            out.push(("Threads".to_string(), threads.to_string()));
        }
        if let Some(hash) = self.hash_mb {
            out.push(("Hash".to_string(), hash.to_string()));
        }
        for (name, value) in &self.options {
            out.push((name.clone(), option_value_string(value)));
        }
        out
    }
}

fn option_value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of engine processes; bounds concurrent local analyses.
    pub size: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub max_per_window: usize,
    pub window_ms: u64,
    /// Cloud results shallower than this are discarded.
    pub min_depth: u32,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_CLOUD_ENDPOINT.to_string(),
            timeout_ms: 2_000,
            max_per_window: 10,
            window_ms: 1_000,
            min_depth: DEFAULT_CLOUD_MIN_DEPTH,
        }
    }
}

impl CloudConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Depth for local analysis. Lower than the cloud floor to bound latency.
    pub local_depth: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            local_depth: DEFAULT_LOCAL_DEPTH,
        }
    }
}
