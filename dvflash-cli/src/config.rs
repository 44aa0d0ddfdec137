//! Configuration file support for dvflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (DVFLASH_*)
//! 3. Local config file (./dvflash.toml)
//! 4. Global config file (~/.config/dvflash/config.toml)
//!
//! An explicit `--config PATH` replaces both files.

use directories::ProjectDirs;
use dvflash::FlashType;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "dvflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Transport read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Loader image configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory holding the per-family loader images.
    pub dir: Option<PathBuf>,
    /// Entry point of the NOR loader.
    pub nor_exec_addr: Option<u32>,
    /// Entry point of the NAND loader.
    pub nand_exec_addr: Option<u32>,
}

/// Transfer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Give up on a token wait after this many seconds and restart the phase.
    pub token_timeout_secs: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Loader configuration.
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dvflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.timeout_ms.is_some() {
            self.connection.timeout_ms = other.connection.timeout_ms;
        }

        if other.loader.dir.is_some() {
            self.loader.dir = other.loader.dir;
        }
        if other.loader.nor_exec_addr.is_some() {
            self.loader.nor_exec_addr = other.loader.nor_exec_addr;
        }
        if other.loader.nand_exec_addr.is_some() {
            self.loader.nand_exec_addr = other.loader.nand_exec_addr;
        }

        if other.transfer.token_timeout_secs.is_some() {
            self.transfer.token_timeout_secs = other.transfer.token_timeout_secs;
        }
    }

    /// Loader directory used when neither the command line nor a config file names one.
    pub fn default_loader_dir() -> PathBuf {
        ProjectDirs::from("", "", "dvflash")
            .map_or_else(|| PathBuf::from("loaders"), |dirs| dirs.data_dir().join("loaders"))
    }

    /// Configured loader entry point for `flash`, if any.
    pub fn loader_exec(&self, flash: FlashType) -> Option<u32> {
        match flash {
            FlashType::Nor => self.loader.nor_exec_addr,
            FlashType::Nand => self.loader.nand_exec_addr,
        }
    }

    /// Transport read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.connection.timeout_ms.map(Duration::from_millis)
    }

    /// Per-wait token timeout; `None` waits until cancelled.
    pub fn token_timeout(&self) -> Option<Duration> {
        self.transfer
            .token_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
