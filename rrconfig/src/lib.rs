//! # RRadio Configuration Module
//!
//! This module provides configuration management for RRadio, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//!
//! There is no global instance: the binary loads a [`Config`] once and hands
//! an `Arc<Config>` to the services that need it.
//!
//! ## Usage
//!
//! ```no_run
//! use rrconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let sources = config.get_sources_file()?;
//! let ceiling = config.get_volume_base_max_db();
//! config.set_volume_night_offset_db(-12.0)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use parking_lot::Mutex;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("rradio.yaml");

const ENV_CONFIG_DIR: &str = "RRADIO_CONFIG";
const ENV_PREFIX: &str = "RRADIO_CONFIG__";
const CONFIG_DIR_NAME: &str = ".rradio";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for f64 values with default
///
/// Integers written in the YAML (`day_offset_db: 0`) are accepted too.
macro_rules! impl_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> f64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_f64().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
///
/// Scalars are stringified so that `card: 2` and `card: "2"` read the same.
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) => s,
                Ok(Value::Number(n)) => n.to_string(),
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: &str) -> Result<()> {
            self.set_value($path, Value::String(value.to_string()))
        }
    };
}

/// Configuration manager for RRadio
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data.lock().clone()),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `RRADIO_CONFIG` environment variable
    /// 3. `.rradio` in the current directory
    /// 4. `.rradio` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<PathBuf> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(&dir_path)?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path.display(), "Loaded config file");
            data
        } else {
            info!(config_file = %path.display(), "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value = Self::lower_keys_value(serde_yaml::from_slice(&yaml_data)?);
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Directory the configuration was loaded from
    pub fn dir(&self) -> &Path {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data.lock())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["volume", "card"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                if let Some(next) = map.get(&Value::String(key.to_lowercase())) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Reads an optional string, treating `null` and missing keys alike
    pub fn get_optional_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin de fichier géré par la configuration
    ///
    /// Le chemin peut être absolu ou relatif au répertoire de configuration.
    /// Le répertoire parent est créé s'il n'existe pas.
    pub fn get_managed_file(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let file = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };

        let file = Path::new(&file);
        let absolute = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.config_dir.join(file)
        };

        if let Some(parent) = absolute.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                info!(directory = %parent.display(), "Created data directory");
            }
        }

        Ok(absolute)
    }

    pub fn get_sources_file(&self) -> Result<PathBuf> {
        self.get_managed_file(&["sources", "file"], "sources.json")
    }

    pub fn get_state_file(&self) -> Result<PathBuf> {
        self.get_managed_file(&["sources", "state_file"], "state.json")
    }

    pub fn get_history_file(&self) -> Result<PathBuf> {
        self.get_managed_file(&["history", "file"], "history.jsonl")
    }

    impl_bool_config!(
        get_history_enabled,
        set_history_enabled,
        &["history", "enabled"],
        true
    );

    // Volume

    impl_string_config!(
        get_volume_card,
        set_volume_card,
        &["volume", "card"],
        "2"
    );

    impl_string_config!(
        get_volume_control,
        set_volume_control,
        &["volume", "control"],
        "DAC"
    );

    impl_f64_config!(
        get_volume_base_max_db,
        set_volume_base_max_db,
        &["volume", "base_max_db"],
        -1.0
    );

    impl_f64_config!(
        get_volume_day_offset_db,
        set_volume_day_offset_db,
        &["volume", "day_offset_db"],
        0.0
    );

    impl_f64_config!(
        get_volume_evening_offset_db,
        set_volume_evening_offset_db,
        &["volume", "evening_offset_db"],
        -6.0
    );

    impl_f64_config!(
        get_volume_night_offset_db,
        set_volume_night_offset_db,
        &["volume", "night_offset_db"],
        -14.0
    );

    impl_u64_config!(
        get_volume_update_interval_secs,
        set_volume_update_interval_secs,
        &["volume", "update_interval_secs"],
        300
    );

    impl_u64_config!(
        get_volume_default_percent,
        set_volume_default_percent,
        &["volume", "default_percent"],
        50
    );

    impl_u64_config!(
        get_volume_step_percent,
        set_volume_step_percent,
        &["volume", "step_percent"],
        5
    );

    // Controller

    impl_bool_config!(
        get_controller_auto_start,
        set_controller_auto_start,
        &["controller", "auto_start"],
        true
    );

    impl_u64_config!(
        get_controller_max_retries,
        set_controller_max_retries,
        &["controller", "max_retries"],
        2
    );

    impl_u64_config!(
        get_controller_retry_sleep_secs,
        set_controller_retry_sleep_secs,
        &["controller", "retry_sleep_secs"],
        2
    );

    impl_u64_config!(
        get_network_check_timeout_secs,
        set_network_check_timeout_secs,
        &["controller", "network_check_timeout_secs"],
        30
    );

    impl_u64_config!(
        get_network_check_interval_secs,
        set_network_check_interval_secs,
        &["controller", "network_check_interval_secs"],
        1
    );

    impl_string_config!(
        get_network_check_host,
        set_network_check_host,
        &["controller", "network_check_host"],
        "google.com:443"
    );

    impl_u64_config!(
        get_fetching_cue_delay_ms,
        set_fetching_cue_delay_ms,
        &["controller", "fetching_cue_delay_ms"],
        1000
    );

    // YouTube

    impl_string_config!(
        get_youtube_player,
        set_youtube_player,
        &["youtube", "player"],
        "mpv"
    );

    impl_string_config!(
        get_youtube_resolver,
        set_youtube_resolver,
        &["youtube", "resolver"],
        "yt-dlp"
    );

    impl_u64_config!(
        get_youtube_feed_limit,
        set_youtube_feed_limit,
        &["youtube", "feed_limit"],
        20
    );

    impl_u64_config!(
        get_youtube_refresh_interval_secs,
        set_youtube_refresh_interval_secs,
        &["youtube", "refresh_interval_secs"],
        300
    );

    impl_u64_config!(
        get_youtube_resolver_timeout_secs,
        set_youtube_resolver_timeout_secs,
        &["youtube", "resolver_timeout_secs"],
        15
    );

    // Logger

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
