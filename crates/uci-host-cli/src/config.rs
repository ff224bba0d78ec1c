//! Configuration file management for uci-host.
//!
//! Provides a TOML-based config file at `~/.config/uci-host/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use uci_host_core::{HostConfig, IoRouting, SessionPlan};

/// Environment variable naming the engine module.
pub const MODULE_ENV: &str = "UCI_HOST_MODULE";

/// Module path used when nothing else names one.
pub const DEFAULT_MODULE_PATH: &str = "./libstockfish.so";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSection {
    /// Path to the engine shared library.
    pub module: String,
    #[serde(default = "default_program_name")]
    pub program_name: String,
    /// Extra arguments passed to `initialize` and `run_loop`.
    #[serde(default)]
    pub args: Vec<String>,
    /// `"bridge"` or `"module"`.
    #[serde(default = "default_routing")]
    pub routing: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_quit_command")]
    pub quit_command: String,
    /// Commands sent before the run loop starts.
    #[serde(default = "default_preseed")]
    pub preseed: Vec<String>,
}

fn default_program_name() -> String {
    HostConfig::DEFAULT_PROGRAM_NAME.to_string()
}

fn default_routing() -> String {
    IoRouting::default().to_string()
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_quit_command() -> String {
    SessionPlan::DEFAULT_QUIT_COMMAND.to_string()
}

fn default_preseed() -> Vec<String> {
    vec!["uci".to_string()]
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE_PATH.to_string(),
            program_name: default_program_name(),
            args: Vec::new(),
            routing: default_routing(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            quit_command: default_quit_command(),
            preseed: default_preseed(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the uci-host config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/uci-host` or
/// `~/.config/uci-host`, never the platform-specific `dirs::config_dir()`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("uci-host");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("uci-host")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct UciHostConfig {
    pub host: HostConfig,
    /// Arguments for `initialize` and `run_loop`.
    pub engine_args: Vec<String>,
    pub poll_interval: Duration,
    pub quit_command: String,
    pub preseed: Vec<String>,
}

impl UciHostConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Module path: `cli_module` > `UCI_HOST_MODULE` > `engine.module` > `./libstockfish.so`
    /// - Everything else: config file > default.
    ///
    /// A config file that exists but does not parse is an error; a missing
    /// one is not.
    pub fn resolve(cli_module: Option<&str>) -> Result<Self> {
        let file_config = if config_path().exists() {
            load_config()?
        } else {
            ConfigFile::default()
        };

        let module_path = if let Some(path) = cli_module {
            path.to_string()
        } else if let Ok(path) = std::env::var(MODULE_ENV) {
            path
        } else {
            file_config.engine.module.clone()
        };

        let routing: IoRouting = file_config
            .engine
            .routing
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid engine.routing in config file")?;

        let host = HostConfig::new(module_path)
            .with_program_name(file_config.engine.program_name)
            .with_routing(routing);

        Ok(Self {
            host,
            engine_args: file_config.engine.args,
            poll_interval: Duration::from_millis(file_config.session.poll_interval_ms.max(1)),
            quit_command: file_config.session.quit_command,
            preseed: file_config.session.preseed,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
