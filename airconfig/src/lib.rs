//! # AirStation Configuration Module
//!
//! Configuration shared by every AirStation crate:
//! - embedded defaults (`airstation.yaml`) deep-merged with the `config.yaml`
//!   of the configuration directory
//! - `AIRSTATION_CONFIG__A__B=value` environment overrides
//! - typed getters with defaults, process-wide singleton
//!
//! Crate-specific settings (store, streamer, monitor) are exposed through
//! extension traits implemented on [`Config`] by the crates that own them.
//!
//! ## Usage
//!
//! ```no_run
//! use airconfig::get_config;
//!
//! let config = get_config();
//! let level = config.get_log_min_level()?;
//! let stations = config.get_managed_dir(&["stations", "directory"], "stations")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, bail, Result};
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};
use tracing::{debug, info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("airstation.yaml");

static CONFIG: OnceLock<Arc<Config>> = OnceLock::new();

const ENV_CONFIG_DIR: &str = "AIRSTATION_CONFIG";
const ENV_PREFIX: &str = "AIRSTATION_CONFIG__";
const CONFIG_DIR_NAME: &str = ".airstation";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_LOG_MIN_LEVEL: &str = "info";

/// Merged configuration tree, saved back to `config.yaml` on every change.
#[derive(Debug)]
pub struct Config {
    dir: PathBuf,
    file: PathBuf,
    tree: Mutex<Value>,
}

impl Config {
    /// Configuration directory: `directory` when given, then
    /// `$AIRSTATION_CONFIG`, then an existing `./.airstation` or
    /// `~/.airstation`, and `./.airstation` otherwise.
    fn locate(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }
        if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
            debug!(env_var = ENV_CONFIG_DIR, path = %dir, "Config directory from environment");
            return PathBuf::from(dir);
        }
        let local = PathBuf::from(CONFIG_DIR_NAME);
        let home = dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME));
        [Some(local.clone()), home]
            .into_iter()
            .flatten()
            .find(|candidate| candidate.is_dir())
            .unwrap_or(local)
    }

    /// Creates the directory if needed and checks it is writable.
    fn prepare(dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        let probe = dir.join(".write_test");
        fs::write(&probe, b"")?;
        fs::remove_file(&probe)?;
        Ok(())
    }

    /// Loads the configuration of `directory` (empty for the default search
    /// order) and saves the merged result.
    pub fn load_config(directory: &str) -> Result<Self> {
        let dir = Self::locate(directory);
        Self::prepare(&dir)?;
        info!(config_dir = %dir.display(), "Using config directory");

        let file = dir.join(CONFIG_FILE_NAME);
        let mut tree: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        match fs::read_to_string(&file) {
            Ok(content) => {
                let external: Value = serde_yaml::from_str(&content)?;
                merge(&mut tree, &external);
                info!(config_file = %file.display(), "Loaded config file");
            }
            Err(_) => info!(config_file = %file.display(), "No config file, using defaults"),
        }

        let mut tree = lowercase_keys(tree);
        apply_env_overrides(&mut tree);

        let config = Config {
            dir,
            file,
            tree: Mutex::new(tree),
        };
        config.save()?;
        Ok(config)
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes the current tree to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(&self.file, yaml)?;
        Ok(())
    }

    /// Sets the value at `path` (e.g. `&["monitor", "delay_ms"]`) and saves.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        insert(&mut self.lock(), path, value)?;
        self.save()
    }

    /// Value at `path`; an error when the path does not exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        lookup(&self.lock(), path)
            .cloned()
            .ok_or_else(|| anyhow!("no configuration value at {}", path.join(".")))
    }

    /// Reads an unsigned integer, falling back to `default` when the key is
    /// missing or does not hold a non-negative number.
    ///
    /// Numeric strings (as produced by some env overrides) are accepted.
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        let parsed = match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64(),
            Ok(Value::String(s)) => s.trim().parse().ok(),
            Ok(_) | Err(_) => return default,
        };
        parsed.unwrap_or_else(|| {
            warn!(key = %path.join("."), "Invalid number, using default {}", default);
            default
        })
    }

    pub fn set_u64(&self, path: &[&str], value: u64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    /// Reads a non-empty string, falling back to `default`.
    pub fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => default.to_string(),
        }
    }

    /// Resolves `path` against the configuration directory unless it is
    /// already absolute.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    /// Répertoire géré par la configuration, créé s'il n'existe pas.
    ///
    /// Relative paths are resolved against the configuration directory; the
    /// default is persisted when the key is missing.
    ///
    /// ```no_run
    /// use airconfig::get_config;
    ///
    /// let config = get_config();
    /// let dir = config.get_managed_dir(&["stations", "directory"], "stations")?;
    /// println!("Stations directory: {}", dir);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let configured = match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        let dir = self.resolve_path(&configured);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(directory = %dir.display(), "Created managed directory");
        }
        Ok(dir.to_string_lossy().into_owned())
    }

    /// Niveau de log minimum (`host.logger.min_level`)
    pub fn get_log_min_level(&self) -> Result<String> {
        Ok(self.get_string_or(&["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL))
    }
}

/// Loads the global configuration from `directory` (empty for the default
/// search order) and installs it as the process-wide singleton.
///
/// Returns an error when the configuration was already initialised.
pub fn init_config(directory: &str) -> Result<Arc<Config>> {
    let config = Arc::new(Config::load_config(directory)?);
    CONFIG
        .set(config.clone())
        .map_err(|_| anyhow!("configuration already initialised"))?;
    Ok(config)
}

/// Returns the global configuration instance
///
/// The configuration is lazily loaded with the default search order on
/// first access if [`init_config`] was not called.
///
/// # Panics
///
/// Panics if the default configuration directory cannot be prepared.
pub fn get_config() -> Arc<Config> {
    CONFIG
        .get_or_init(|| {
            Arc::new(Config::load_config("").expect("Failed to load AirStation configuration"))
        })
        .clone()
}

fn key(name: &str) -> Value {
    Value::String(name.to_lowercase())
}

fn lookup<'a>(tree: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(tree, |node, name| node.as_mapping()?.get(&key(name)))
}

fn insert(tree: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *tree = value;
        return Ok(());
    };
    let mut node = tree;
    for name in parents {
        let Value::Mapping(map) = node else {
            bail!("{} is not a mapping", path.join("."));
        };
        node = map
            .entry(key(name))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    let Value::Mapping(map) = node else {
        bail!("{} is not a mapping", path.join("."));
    };
    map.insert(key(last), value);
    Ok(())
}

/// `AIRSTATION_CONFIG__MONITOR__DELAY_MS=250` sets `monitor.delay_ms`; the
/// value is parsed as a YAML scalar.
fn apply_env_overrides(tree: &mut Value) {
    for (name, raw) in env::vars() {
        let Some(stripped) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = stripped.split("__").collect();
        let value: Value = serde_yaml::from_str(&raw).unwrap_or(Value::String(raw));
        if let Err(err) = insert(tree, &path, value) {
            warn!(env_var = %name, "Ignoring env override: {}", err);
        }
    }
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lowercase_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Deep merge: mappings key by key, anything else replaced by `external`.
fn merge(base: &mut Value, external: &Value) {
    match (base, external) {
        (Value::Mapping(base), Value::Mapping(external)) => {
            for (k, v) in external {
                match base.get_mut(k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, external) => *base = external.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_of(yaml: &str) -> Config {
        Config {
            dir: PathBuf::from("."),
            file: PathBuf::from("unused"),
            tree: Mutex::new(serde_yaml::from_str(yaml).unwrap()),
        }
    }

    #[test]
    fn test_merge_keeps_defaults() {
        let mut base: Value =
            serde_yaml::from_str("monitor:\n  delay_ms: 1000\n  sync_timeout_mins: 5\n").unwrap();
        let external: Value = serde_yaml::from_str("monitor:\n  delay_ms: 250\n").unwrap();
        merge(&mut base, &external);

        let config = Config {
            tree: Mutex::new(base),
            ..config_of("{}")
        };
        assert_eq!(config.get_u64_or(&["monitor", "delay_ms"], 0), 250);
        assert_eq!(config.get_u64_or(&["monitor", "sync_timeout_mins"], 0), 5);
    }

    #[test]
    fn test_load_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        assert_eq!(config.get_u64_or(&["monitor", "delay_ms"], 0), 1000);
        assert_eq!(config.get_string_or(&["streamer", "executable"], "x"), "liquidsoap");

        config.set_u64(&["monitor", "delay_ms"], 500).unwrap();
        let reloaded = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(reloaded.get_u64_or(&["monitor", "delay_ms"], 0), 500);
    }

    #[test]
    fn test_managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let stations = config
            .get_managed_dir(&["stations", "directory"], "stations")
            .unwrap();
        assert_eq!(PathBuf::from(&stations), dir.path().join("stations"));
        assert!(dir.path().join("stations").is_dir());
    }

    #[test]
    fn test_invalid_number_falls_back() {
        let config = config_of("monitor:\n  delay_ms: soon\n  retries: \"3\"\n");
        assert_eq!(config.get_u64_or(&["monitor", "delay_ms"], 1000), 1000);
        assert_eq!(config.get_u64_or(&["monitor", "missing"], 7), 7);
        assert_eq!(config.get_u64_or(&["monitor", "retries"], 1), 3);
    }

    #[test]
    fn test_insert_and_lookup_are_case_insensitive() {
        let mut tree = Value::Mapping(Mapping::new());
        insert(&mut tree, &["Streamer", "CONNECTOR", "retries"], Value::Number(2.into())).unwrap();
        assert_eq!(
            lookup(&tree, &["streamer", "connector", "Retries"]),
            Some(&Value::Number(2.into()))
        );
        assert!(lookup(&tree, &["streamer", "missing"]).is_none());
        assert!(insert(&mut tree, &["streamer", "connector", "retries", "x"], Value::Null).is_err());
    }

    #[test]
    fn test_lowercase_keys() {
        let tree: Value = serde_yaml::from_str("Host:\n  Logger:\n    MIN_LEVEL: debug\n").unwrap();
        let config = Config {
            tree: Mutex::new(lowercase_keys(tree)),
            ..config_of("{}")
        };
        assert_eq!(config.get_log_min_level().unwrap(), "debug");
    }
}
