//! Hub configuration – reads `avhub.toml`.
//!
//! ```toml
//! definitions = "points.def"
//! stop_timeout_ms = 2000
//!
//! [[plugins]]
//! name = "sim"
//! kind = "simulator"
//! [plugins.options]
//! point = "ALT"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use avhub_plugin::PluginOptions;
use avhub_types::HubError;
use serde::{Deserialize, Serialize};

/// One `[[plugins]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    pub kind: String,
    /// Opaque to the hub; interpreted by the adapter kind.
    #[serde(default)]
    pub options: PluginOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Point definition file. Relative paths are resolved against the
    /// directory of the config file.
    #[serde(default = "default_definitions")]
    pub definitions: PathBuf,

    /// How long `stop` waits for an adapter before aborting it.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

fn default_definitions() -> PathBuf {
    PathBuf::from("points.def")
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            definitions: default_definitions(),
            stop_timeout_ms: default_stop_timeout_ms(),
            plugins: Vec::new(),
        }
    }
}

impl HubConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Config file location: `AVHUB_CONFIG`, or `avhub.toml` in the working
/// directory.
pub fn config_path() -> PathBuf {
    std::env::var_os("AVHUB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("avhub.toml"))
}

/// Load the config from [`config_path`]. Returns `None` if the file does not
/// exist.
pub fn load() -> Result<Option<HubConfig>, HubError> {
    load_from(&config_path())
}

/// Load the config from a specific path, with environment overrides applied.
pub fn load_from(path: &Path) -> Result<Option<HubConfig>, HubError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| HubError::Config(format!("failed to read {}: {e}", path.display())))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut cfg = parse(&raw, base)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Defaults plus environment overrides, for running without a config file.
pub fn from_env() -> HubConfig {
    let mut cfg = HubConfig::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Parse config text, resolving relative paths against `base`.
pub(crate) fn parse(raw: &str, base: &Path) -> Result<HubConfig, HubError> {
    let mut cfg: HubConfig =
        toml::from_str(raw).map_err(|e| HubError::Config(format!("failed to parse config: {e}")))?;
    if cfg.definitions.is_relative() {
        cfg.definitions = base.join(&cfg.definitions);
    }
    Ok(cfg)
}

/// Apply `AVHUB_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AVHUB_DEFINITIONS` | `definitions` |
/// | `AVHUB_STOP_TIMEOUT_MS` | `stop_timeout_ms` |
pub fn apply_env_overrides(cfg: &mut HubConfig) {
    if let Some(v) = std::env::var_os("AVHUB_DEFINITIONS") {
        cfg.definitions = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AVHUB_STOP_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.stop_timeout_ms = ms;
    }
}
