//! Configuration management for maeri-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`MAERI_READ_LATENCY`, etc.)
//! 2. Project-local config file (`./maeri-emu.toml`)
//! 3. User config file (`~/.config/maeri-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # maeri-emu.toml
//!
//! # Cycles from accepted line read to valid data
//! read_latency = 2
//!
//! # Cycles memory holds ready low on each new request
//! stall_cycles = 1
//! ```

use crate::emu::DeviceTiming;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default cycle budget for `run`.
pub const DEFAULT_MAX_CYCLES: u64 = 1_000_000;

/// maeri-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Cycles from an accepted line read to valid data.
    pub read_latency: Option<u32>,

    /// Cycles device memory holds `rdy` low on each new request.
    pub stall_cycles: Option<u32>,

    /// Lines of simulated device memory.
    pub memory_lines: Option<usize>,

    /// Cycle budget for a run before giving up.
    pub max_cycles: Option<u64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `maeri-emu.toml`
    /// 3. User config `~/.config/maeri-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Device timing, with defaults for unset fields.
    pub fn device_timing(&self) -> DeviceTiming {
        let defaults = DeviceTiming::default();
        DeviceTiming {
            read_latency: self.read_latency.unwrap_or(defaults.read_latency),
            stall_cycles: self.stall_cycles.unwrap_or(defaults.stall_cycles),
            memory_lines: self.memory_lines.unwrap_or(defaults.memory_lines),
        }
    }

    /// Cycle budget, with fallback to [`DEFAULT_MAX_CYCLES`].
    pub fn max_cycles(&self) -> u64 {
        self.max_cycles.unwrap_or(DEFAULT_MAX_CYCLES)
    }

    /// Load user configuration from ~/.config/maeri-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./maeri-emu.toml
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("maeri-emu.toml"))
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.read_latency.is_some() {
            self.read_latency = other.read_latency;
        }
        if other.stall_cycles.is_some() {
            self.stall_cycles = other.stall_cycles;
        }
        if other.memory_lines.is_some() {
            self.memory_lines = other.memory_lines;
        }
        if other.max_cycles.is_some() {
            self.max_cycles = other.max_cycles;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_var(&lookup, "MAERI_READ_LATENCY") {
            self.read_latency = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "MAERI_STALL_CYCLES") {
            self.stall_cycles = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "MAERI_MEMORY_LINES") {
            self.memory_lines = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "MAERI_MAX_CYCLES") {
            self.max_cycles = Some(v);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("maeri-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# maeri-emu configuration
# Place this file at ~/.config/maeri-emu/config.toml or ./maeri-emu.toml

# Cycles from an accepted line read to valid data (minimum 1)
read_latency = 1

# Cycles device memory holds ready low on each new request
stall_cycles = 0

# Lines of simulated device memory (at least one program image)
# memory_lines = 1024

# Cycle budget for `maeri-emu run`
# max_cycles = 1000000
"#
        .to_string()
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => {
            log::info!("Using {} from environment: {}", key, raw);
            Some(v)
        }
        Err(_) => {
            log::warn!("Ignoring {}: {:?} is not a number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.device_timing(), DeviceTiming::default());
        assert_eq!(config.max_cycles(), DEFAULT_MAX_CYCLES);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            read_latency: Some(2),
            stall_cycles: None,
            memory_lines: Some(512),
            max_cycles: None,
        };

        let overlay = Config {
            read_latency: None,
            stall_cycles: Some(3),
            memory_lines: Some(2048),
            max_cycles: None,
        };

        base.merge(overlay);

        // read_latency unchanged (overlay was None)
        assert_eq!(base.read_latency, Some(2));
        assert_eq!(base.stall_cycles, Some(3));
        assert_eq!(base.memory_lines, Some(2048));
        assert_eq!(base.max_cycles, None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config { read_latency: Some(2), ..Config::default() };
        config.apply_overrides(|key| match key {
            "MAERI_READ_LATENCY" => Some("5".to_string()),
            "MAERI_MAX_CYCLES" => Some(" 42 ".to_string()),
            "MAERI_STALL_CYCLES" => Some("lots".to_string()),
            _ => None,
        });

        assert_eq!(config.read_latency, Some(5));
        assert_eq!(config.max_cycles(), 42);
        // Unparseable values are ignored
        assert_eq!(config.stall_cycles, None);
        assert_eq!(config.device_timing().memory_lines, 1024);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.read_latency, Some(1));
        assert_eq!(config.stall_cycles, Some(0));
        assert_eq!(config.memory_lines, None);
    }
}
