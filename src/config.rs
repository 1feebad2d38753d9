use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level tufctl configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TufConfig {
    pub paths: PathsConfig,
    pub battery: BatteryConfig,
    pub display: DisplayConfig,
    pub timeouts: TimeoutConfig,
    pub services: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Filesystem root that sysfs and procfs paths are resolved against.
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Power supply name (e.g. "BAT1"). Auto-detected when unset.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Resolution of the internal panel, used to pick a mode id.
    pub panel_resolution: String,
    /// Rates below this are never reported as supported.
    pub min_rate: u32,
    /// Reported when no display tool can list modes.
    pub fallback_rates: Vec<u32>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            panel_resolution: "1920x1080".into(),
            min_rate: 60,
            fallback_rates: vec![60, 144],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outer limit for one whole command, in seconds.
    pub command_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { command_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub asusd: String,
    pub supergfxd: String,
    pub nvidia_powerd: String,
    pub thermald: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            asusd: "asusd".into(),
            supergfxd: "supergfxd".into(),
            nvidia_powerd: "nvidia-powerd".into(),
            thermald: "thermald".into(),
        }
    }
}

const SYSTEM_CONFIG: &str = "/etc/tufctl/config.toml";

fn read_toml(path: &Path) -> Option<toml::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("ignoring unparsable config {}: {}", path.display(), e);
            None
        }
    }
}

fn load_system() -> Option<toml::Value> {
    read_toml(Path::new(SYSTEM_CONFIG))
}

/// Load the user config file (~/.config/tufctl/config.toml) if it exists.
fn load_user() -> Option<toml::Value> {
    let dir = dirs::config_dir()?;
    read_toml(&dir.join("tufctl").join("config.toml"))
}

/// Recursively merge two TOML values. Tables are merged key-by-key;
/// all other types in `overlay` replace `base`.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load config from a specific path, ignoring system/user files.
fn load_from_path(path: &Path) -> TufConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("failed to parse config at {}: {}", path.display(), e);
            TufConfig::default()
        }),
        Err(e) => {
            tracing::warn!("failed to read config at {}: {}", path.display(), e);
            TufConfig::default()
        }
    }
}

/// Load the merged config: system defaults, then user overrides.
/// If `override_path` is provided, use only that file instead.
pub fn load(override_path: Option<&PathBuf>) -> TufConfig {
    if let Some(path) = override_path {
        return load_from_path(path);
    }

    let merged = match (load_system(), load_user()) {
        (Some(s), Some(u)) => Some(merge_values(s, u)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    };

    match merged {
        Some(value) => value.try_into().unwrap_or_else(|e| {
            tracing::warn!("failed to deserialize config: {}", e);
            TufConfig::default()
        }),
        None => TufConfig::default(),
    }
}
