//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "powermate-bridge";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub roon: RoonConfig,

    /// Explicit `/dev/hidrawN`; scanned for when absent
    #[serde(default)]
    pub hid_device: Option<PathBuf>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_port() -> u16 {
    8099
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
pub struct RoonConfig {
    #[serde(default = "default_roon_enabled")]
    pub enabled: bool,
    pub display_name: Option<String>,
}

impl Default for RoonConfig {
    fn default() -> Self {
        Self {
            enabled: default_roon_enabled(),
            display_name: None,
        }
    }
}

fn default_roon_enabled() -> bool {
    true
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PMB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Get the path for a file in the config directory
pub fn get_config_file_path(filename: &str) -> PathBuf {
    get_config_dir().join(filename)
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", i64::from(default_port()))?
        .set_default("poll_interval_ms", default_poll_interval_ms() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (PMB_PORT, PMB_ROON__ENABLED, etc.)
        .add_source(
            ::config::Environment::with_prefix("PMB")
                .separator("__")
                .try_parsing(true),
        );

    // Explicit precedence: PMB_PORT > PORT > config > default
    if let Ok(port) = std::env::var("PMB_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", i64::from(port_num))?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", i64::from(port_num))?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
