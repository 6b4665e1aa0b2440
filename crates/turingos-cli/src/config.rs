//! Configuration Vault – reads/writes `~/.turingos/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use turingos_manifold::{ChaosConfig, ManifoldConfig};
use turingos_runtime::{DispatcherConfig, TickEngineConfig};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bearer token sent to both oracle lanes.  Wiped from memory on drop.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The key, or `None` when unset.
    pub fn expose(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.0.clone())
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("<not set>")
        } else {
            f.write_str("<redacted>")
        }
    }
}

/// Persisted user configuration stored in `~/.turingos/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the workspace agents operate on.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Journal directory; `<workspace>/.turingos/journal` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_dir: Option<String>,

    /// Routine (E) lane endpoint.  Also used alone when `dual_lane` is off.
    #[serde(default = "default_url")]
    pub routine_url: String,

    #[serde(default = "default_model")]
    pub routine_model: String,

    /// Recovery (P) lane endpoint.
    #[serde(default = "default_url")]
    pub recovery_url: String,

    #[serde(default = "default_model")]
    pub recovery_model: String,

    #[serde(default, skip_serializing_if = "ApiKey::is_empty")]
    pub api_key: ApiKey,

    /// Route through the dispatcher oracle instead of a single lane.
    #[serde(default)]
    pub dual_lane: bool,

    #[serde(default = "default_health_floor")]
    pub health_floor: f64,

    #[serde(default = "default_health_margin")]
    pub health_margin: f64,

    #[serde(default)]
    pub chaos_timeout_rate: f64,

    #[serde(default)]
    pub chaos_eacces_rate: f64,

    #[serde(default)]
    pub chaos_flood_rate: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos_seed: Option<u64>,

    #[serde(default = "default_max_slice_chars")]
    pub max_slice_chars: usize,

    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,

    /// Bound on one oracle call; a timeout traps like any oracle failure.
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,

    /// Acceptance command locked on first halt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_command: Option<String>,

    #[serde(default = "default_max_turns")]
    pub max_turns: u64,

    /// Workspace files the root planner must produce before it may halt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_files: Vec<String>,
}

fn default_workspace() -> String {
    ".".to_string()
}
fn default_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_health_floor() -> f64 {
    DispatcherConfig::default().health_floor
}
fn default_health_margin() -> f64 {
    DispatcherConfig::default().health_margin
}
fn default_max_slice_chars() -> usize {
    ManifoldConfig::default().max_slice_chars
}
fn default_exec_timeout_ms() -> u64 {
    ManifoldConfig::default().exec_timeout.as_millis() as u64
}
fn default_oracle_timeout_ms() -> u64 {
    TickEngineConfig::default().oracle_timeout.as_millis() as u64
}
fn default_max_turns() -> u64 {
    200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            journal_dir: None,
            routine_url: default_url(),
            routine_model: default_model(),
            recovery_url: default_url(),
            recovery_model: default_model(),
            api_key: ApiKey::default(),
            dual_lane: false,
            health_floor: default_health_floor(),
            health_margin: default_health_margin(),
            chaos_timeout_rate: 0.0,
            chaos_eacces_rate: 0.0,
            chaos_flood_rate: 0.0,
            chaos_seed: None,
            max_slice_chars: default_max_slice_chars(),
            exec_timeout_ms: default_exec_timeout_ms(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            halt_command: None,
            max_turns: default_max_turns(),
            required_files: Vec::new(),
        }
    }
}

impl Config {
    pub fn workspace_path(&self) -> PathBuf {
        PathBuf::from(&self.workspace)
    }

    pub fn journal_path(&self) -> PathBuf {
        match &self.journal_dir {
            Some(dir) => PathBuf::from(dir),
            None => self
                .workspace_path()
                .join(turingos_manifold::KERNEL_DIR)
                .join("journal"),
        }
    }

    pub fn manifold_config(&self) -> ManifoldConfig {
        ManifoldConfig {
            max_slice_chars: self.max_slice_chars,
            exec_timeout: Duration::from_millis(self.exec_timeout_ms),
            chaos: ChaosConfig {
                timeout_rate: self.chaos_timeout_rate,
                eacces_rate: self.chaos_eacces_rate,
                flood_rate: self.chaos_flood_rate,
                seed: self.chaos_seed,
                ..ChaosConfig::default()
            },
            ..ManifoldConfig::for_workspace(self.workspace_path())
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn tick_engine_config(&self) -> TickEngineConfig {
        TickEngineConfig {
            oracle_timeout: self.oracle_timeout(),
            ..TickEngineConfig::default()
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            health_floor: self.health_floor,
            health_margin: self.health_margin,
        }
    }
}

/// Return the path to `~/.turingos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".turingos").join("config.toml")
}

/// Load the config from disk, or the defaults when the file does not exist.
/// Environment overrides are applied either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `TURINGOS_*` environment variable overrides to `cfg`.
///
/// Unparseable numeric values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `TURINGOS_WORKSPACE` | `workspace` |
/// | `TURINGOS_ROUTINE_URL` / `TURINGOS_ROUTINE_MODEL` | `routine_url` / `routine_model` |
/// | `TURINGOS_RECOVERY_URL` / `TURINGOS_RECOVERY_MODEL` | `recovery_url` / `recovery_model` |
/// | `TURINGOS_API_KEY` | `api_key` |
/// | `TURINGOS_DUAL_LANE` | `dual_lane` (`1` / `true`) |
/// | `TURINGOS_HEALTH_FLOOR` / `TURINGOS_HEALTH_MARGIN` | dispatcher thresholds |
/// | `TURINGOS_CHAOS_TIMEOUT_RATE` / `_EACCES_RATE` / `_FLOOD_RATE` / `_SEED` | chaos overlay |
/// | `TURINGOS_MAX_SLICE_CHARS` / `TURINGOS_EXEC_TIMEOUT_MS` | manifold limits |
/// | `TURINGOS_HALT_COMMAND` | `halt_command` |
pub fn apply_env_overrides(cfg: &mut Config) {
    let var = |name: &str| std::env::var(name).ok();

    if let Some(v) = var("TURINGOS_WORKSPACE") {
        cfg.workspace = v;
    }
    if let Some(v) = var("TURINGOS_ROUTINE_URL") {
        cfg.routine_url = v;
    }
    if let Some(v) = var("TURINGOS_ROUTINE_MODEL") {
        cfg.routine_model = v;
    }
    if let Some(v) = var("TURINGOS_RECOVERY_URL") {
        cfg.recovery_url = v;
    }
    if let Some(v) = var("TURINGOS_RECOVERY_MODEL") {
        cfg.recovery_model = v;
    }
    if let Some(v) = var("TURINGOS_API_KEY") {
        cfg.api_key = ApiKey::new(v);
    }
    if let Some(v) = var("TURINGOS_DUAL_LANE") {
        cfg.dual_lane = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    override_parsed(&mut cfg.health_floor, var("TURINGOS_HEALTH_FLOOR"));
    override_parsed(&mut cfg.health_margin, var("TURINGOS_HEALTH_MARGIN"));
    override_parsed(&mut cfg.chaos_timeout_rate, var("TURINGOS_CHAOS_TIMEOUT_RATE"));
    override_parsed(&mut cfg.chaos_eacces_rate, var("TURINGOS_CHAOS_EACCES_RATE"));
    override_parsed(&mut cfg.chaos_flood_rate, var("TURINGOS_CHAOS_FLOOD_RATE"));
    if let Some(seed) = var("TURINGOS_CHAOS_SEED").and_then(|v| v.trim().parse().ok()) {
        cfg.chaos_seed = Some(seed);
    }
    override_parsed(&mut cfg.max_slice_chars, var("TURINGOS_MAX_SLICE_CHARS"));
    override_parsed(&mut cfg.exec_timeout_ms, var("TURINGOS_EXEC_TIMEOUT_MS"));
    override_parsed(&mut cfg.oracle_timeout_ms, var("TURINGOS_ORACLE_TIMEOUT_MS"));
    if let Some(v) = var("TURINGOS_HALT_COMMAND") {
        cfg.halt_command = (!v.trim().is_empty()).then_some(v);
    }
}

fn override_parsed<T: std::str::FromStr>(field: &mut T, value: Option<String>) {
    if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
        *field = parsed;
    }
}

/// Save the config to disk, creating `~/.turingos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
