//! Configuration management for rvcore.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`RVCORE_MAX_INSTRUCTIONS`, etc.)
//! 2. Project-local config file (`./rvcore.toml`)
//! 3. User config file (`~/.config/rvcore/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # rvcore.toml
//!
//! # Instruction budget for one run
//! max_instructions = 10000000
//!
//! # Enable the C extension
//! compressed = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::cpu::AddressType;
use crate::machine::{MachineOptions, DEFAULT_MAX_INSTRUCTIONS, DEFAULT_MEMORY_MAX};
use crate::segment::SharedSegments;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// rvcore configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Instruction budget for one run.
    pub max_instructions: Option<u64>,

    /// Enable the C extension.
    pub compressed: Option<bool>,

    /// Share execute segments between machines with identical code.
    pub shared_segments: Option<bool>,

    /// Upper bound on guest memory in bytes.
    pub memory_max: Option<u64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `rvcore.toml`
    /// 3. User config `~/.config/rvcore/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides(|name| std::env::var(name).ok());

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

    pub fn max_instructions(&self) -> u64 {
        self.max_instructions.unwrap_or(DEFAULT_MAX_INSTRUCTIONS)
    }

    pub fn compressed(&self) -> bool {
        self.compressed.unwrap_or(true)
    }

    pub fn shared_segments(&self) -> bool {
        self.shared_segments.unwrap_or(false)
    }

    pub fn memory_max(&self) -> u64 {
        self.memory_max.unwrap_or(DEFAULT_MEMORY_MAX)
    }

    /// Machine options reflecting this configuration.
    pub fn machine_options<A: AddressType>(&self) -> MachineOptions<A> {
        MachineOptions {
            memory_max: self.memory_max(),
            max_instructions: self.max_instructions(),
            compressed: self.compressed(),
            shared_segments: self.shared_segments().then(SharedSegments::new),
            ..MachineOptions::default()
        }
    }

    /// Load user configuration from ~/.config/rvcore/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./rvcore.toml
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("rvcore.toml"))
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
        if other.max_instructions.is_some() {
            self.max_instructions = other.max_instructions;
        }
        if other.compressed.is_some() {
            self.compressed = other.compressed;
        }
        if other.shared_segments.is_some() {
            self.shared_segments = other.shared_segments;
        }
        if other.memory_max.is_some() {
            self.memory_max = other.memory_max;
        }
    }

    /// Apply environment variable overrides read through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("RVCORE_MAX_INSTRUCTIONS") {
            match parse_u64(&value) {
                Some(max) => self.max_instructions = Some(max),
                None => log::warn!("Ignoring RVCORE_MAX_INSTRUCTIONS={}", value),
            }
        }
        if let Some(value) = var("RVCORE_COMPRESSED") {
            match parse_bool(&value) {
                Some(flag) => self.compressed = Some(flag),
                None => log::warn!("Ignoring RVCORE_COMPRESSED={}", value),
            }
        }
        if let Some(value) = var("RVCORE_SHARED_SEGMENTS") {
            match parse_bool(&value) {
                Some(flag) => self.shared_segments = Some(flag),
                None => log::warn!("Ignoring RVCORE_SHARED_SEGMENTS={}", value),
            }
        }
        if let Some(value) = var("RVCORE_MEMORY_MAX") {
            match parse_u64(&value) {
                Some(max) => self.memory_max = Some(max),
                None => log::warn!("Ignoring RVCORE_MEMORY_MAX={}", value),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rvcore").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# rvcore configuration
# Place this file at ~/.config/rvcore/config.toml or ./rvcore.toml

# Instruction budget for one run
max_instructions = 10000000

# Enable the C extension
compressed = true

# Share execute segments between machines running identical code
# shared_segments = false

# Guest memory limit in bytes
# memory_max = 67108864
"#
        .to_string()
    }
}

/// Decimal or `0x`-prefixed hexadecimal.
pub fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => text.replace('_', "").parse().ok(),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_instructions(), DEFAULT_MAX_INSTRUCTIONS);
        assert!(config.compressed());
        assert!(!config.shared_segments());
        assert_eq!(config.memory_max(), DEFAULT_MEMORY_MAX);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            max_instructions: Some(100),
            compressed: Some(false),
            shared_segments: None,
            memory_max: None,
        };

        let overlay = Config {
            max_instructions: None,
            compressed: Some(true),
            shared_segments: Some(true),
            memory_max: None,
        };

        base.merge(overlay);

        // max_instructions unchanged (overlay was None)
        assert_eq!(base.max_instructions, Some(100));
        assert_eq!(base.compressed, Some(true));
        assert_eq!(base.shared_segments, Some(true));
        assert_eq!(base.memory_max, None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "RVCORE_MAX_INSTRUCTIONS" => Some("0x1000".to_string()),
            "RVCORE_COMPRESSED" => Some("off".to_string()),
            "RVCORE_MEMORY_MAX" => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.max_instructions, Some(0x1000));
        assert_eq!(config.compressed, Some(false));
        assert_eq!(config.shared_segments, None);
        assert_eq!(config.memory_max, None);
    }

    #[test]
    fn test_machine_options() {
        let config = Config {
            max_instructions: Some(5000),
            compressed: Some(false),
            shared_segments: Some(true),
            memory_max: Some(1 << 20),
        };
        let options = config.machine_options::<u64>();
        assert_eq!(options.max_instructions, 5000);
        assert!(!options.compressed);
        assert!(options.shared_segments.is_some());
        assert_eq!(options.memory_max, 1 << 20);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.max_instructions, Some(10_000_000));
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u64("42"), Some(42));
        assert_eq!(parse_u64("0x1_0000"), Some(0x10000));
        assert_eq!(parse_u64("1_000"), Some(1000));
        assert_eq!(parse_u64("x"), None);
    }
}
