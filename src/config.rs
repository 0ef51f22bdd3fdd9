//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file (with the
//! `toml-config` feature), then `KERNPORT_*` environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::model::ModelKind;

/// Slots per region, matching the default of the reference runtime.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// What a region picks before its model has seen enough samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmupStrategy {
    /// Always the first candidate.
    #[default]
    DefaultIndex,
    /// Cycle through the candidates by invocation count.
    RoundRobin,
}

/// What to do when a region has no free async slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Return `PoolExhausted` to the caller.
    #[default]
    Fail,
    /// Run the chosen policy synchronously instead.
    Synchronous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub pool_capacity: usize,
    pub warmup_samples: u64,
    pub warmup: WarmupStrategy,
    pub on_pool_exhausted: ExhaustionPolicy,
    /// `None` uses rayon's default thread count.
    pub host_threads: Option<usize>,
    /// `None` uses the available parallelism.
    pub device_compute_units: Option<usize>,
    pub model: ModelKind,
    /// Load statically registered launch plugins.
    pub plugins: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            warmup_samples: 1,
            warmup: WarmupStrategy::DefaultIndex,
            on_pool_exhausted: ExhaustionPolicy::Fail,
            host_threads: None,
            device_compute_units: None,
            model: ModelKind::MeanTime,
            plugins: true,
        }
    }
}

impl KernelConfig {
    /// Defaults, then the config file if any, then the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file_or_default()?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml-config")]
    fn from_file_or_default() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::from_toml_file(&path),
            _ => Ok(Self::default()),
        }
    }

    #[cfg(not(feature = "toml-config"))]
    fn from_file_or_default() -> Result<Self> {
        Ok(Self::default())
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `KERNPORT_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("KERNPORT_POOL_CAPACITY") {
            self.pool_capacity = parse_var("KERNPORT_POOL_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("KERNPORT_WARMUP") {
            self.warmup = parse_var("KERNPORT_WARMUP", &value)?;
        }
        if let Some(value) = lookup("KERNPORT_WARMUP_SAMPLES") {
            self.warmup_samples = parse_var("KERNPORT_WARMUP_SAMPLES", &value)?;
        }
        if let Some(value) = lookup("KERNPORT_ON_POOL_EXHAUSTED") {
            self.on_pool_exhausted = parse_var("KERNPORT_ON_POOL_EXHAUSTED", &value)?;
        }
        if let Some(value) = lookup("KERNPORT_HOST_THREADS") {
            self.host_threads = Some(parse_var("KERNPORT_HOST_THREADS", &value)?);
        }
        if let Some(value) = lookup("KERNPORT_MODEL") {
            self.model = parse_var("KERNPORT_MODEL", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.pool_capacity == 0 {
            return Err(KernelError::Config("pool_capacity must be at least 1".into()));
        }
        if self.host_threads == Some(0) {
            return Err(KernelError::Config("host_threads must be at least 1".into()));
        }
        if self.device_compute_units == Some(0) {
            return Err(KernelError::Config("device_compute_units must be at least 1".into()));
        }
        Ok(())
    }
}

/// `KERNPORT_CONFIG`, or `config.toml` in the user config directory.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("KERNPORT_CONFIG") {
        return Some(PathBuf::from(custom));
    }
    ProjectDirs::from("", "", "kernport").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("invalid value `{value}` for {key}"))
}

impl FromStr for WarmupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default-index" | "default" => Ok(Self::DefaultIndex),
            "round-robin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown warm-up strategy `{other}`")),
        }
    }
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "synchronous" | "sync" => Ok(Self::Synchronous),
            other => Err(format!("unknown exhaustion policy `{other}`")),
        }
    }
}
