//! Configuration module for telnet-shell.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Command-line arguments for the shell server
#[derive(Parser, Debug)]
#[command(name = "telnet-shell")]
#[command(author = "telnet-shell authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal remote shell server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8189)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Directory every session starts in
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,

    /// Whether clients share one working directory or get their own
    #[arg(long, value_enum)]
    pub navigation: Option<NavigationMode>,

    /// Keep `cd ..` and relative names from leaving the root
    #[arg(long)]
    pub confine_to_root: Option<bool>,

    /// Base directory for `cat` paths
    #[arg(long, value_enum)]
    pub cat_base: Option<CatBase>,

    /// How a read burst is split into commands
    #[arg(long, value_enum)]
    pub framing: Option<Framing>,

    /// Size of each non-blocking read in bytes
    #[arg(long)]
    pub read_chunk_size: Option<usize>,

    /// Longest command accepted before the connection is dropped
    #[arg(long)]
    pub max_command_len: Option<usize>,

    /// Maximum number of simultaneous connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Readiness events collected per wait
    #[arg(long)]
    pub events_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Scope of the working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationMode {
    /// One directory for the whole process; any client's `cd` moves everyone.
    Shared,
    /// Each connection navigates independently from the root.
    PerConnection,
}

/// What `cat` resolves relative paths against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CatBase {
    /// The server process's own working directory.
    Process,
    /// The client's navigated working directory.
    WorkingDir,
}

/// Command framing on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Everything read in one readiness burst is a single command.
    Burst,
    /// Every `\n`-terminated line is a command; partial lines carry over.
    Line,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of simultaneous connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events collected per wait
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Shell-related configuration
#[derive(Debug, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_navigation")]
    pub navigation: NavigationMode,
    #[serde(default = "default_confine_to_root")]
    pub confine_to_root: bool,
    #[serde(default = "default_cat_base")]
    pub cat_base: CatBase,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            navigation: default_navigation(),
            confine_to_root: default_confine_to_root(),
            cat_base: default_cat_base(),
        }
    }
}

/// Per-connection I/O configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_framing")]
    pub framing: Framing,
    /// Bytes requested per non-blocking read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    #[serde(default = "default_max_command_len")]
    pub max_command_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            framing: default_framing(),
            read_chunk_size: default_read_chunk_size(),
            max_command_len: default_max_command_len(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8189".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_events_capacity() -> usize {
    256
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_navigation() -> NavigationMode {
    NavigationMode::PerConnection
}

fn default_confine_to_root() -> bool {
    true
}

fn default_cat_base() -> CatBase {
    CatBase::WorkingDir
}

fn default_framing() -> Framing {
    Framing::Burst
}

fn default_read_chunk_size() -> usize {
    256
}

fn default_max_command_len() -> usize {
    64 * 1024 // 64 KB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    /// Canonical absolute path of the root directory
    pub root: PathBuf,
    pub navigation: NavigationMode,
    pub confine_to_root: bool,
    pub cat_base: CatBase,
    pub framing: Framing,
    pub read_chunk_size: usize,
    pub max_command_len: usize,
    pub max_connections: usize,
    pub events_capacity: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let root = resolve_root(&cli.root.unwrap_or(toml_config.shell.root))?;

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            root,
            navigation: cli.navigation.unwrap_or(toml_config.shell.navigation),
            confine_to_root: cli
                .confine_to_root
                .unwrap_or(toml_config.shell.confine_to_root),
            cat_base: cli.cat_base.unwrap_or(toml_config.shell.cat_base),
            framing: cli.framing.unwrap_or(toml_config.connection.framing),
            read_chunk_size: cli
                .read_chunk_size
                .unwrap_or(toml_config.connection.read_chunk_size)
                .max(1),
            max_command_len: cli
                .max_command_len
                .unwrap_or(toml_config.connection.max_command_len),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            events_capacity: cli
                .events_capacity
                .unwrap_or(toml_config.server.events_capacity)
                .max(1),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Turn the configured root into a canonical path to an existing directory.
pub fn resolve_root(path: &Path) -> Result<PathBuf, ConfigError> {
    let root = path
        .canonicalize()
        .map_err(|e| ConfigError::InvalidRoot(path.to_path_buf(), e))?;
    if !root.is_dir() {
        return Err(ConfigError::RootNotDirectory(root));
    }
    Ok(root)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidRoot(PathBuf, std::io::Error),
    RootNotDirectory(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidRoot(path, e) => {
                write!(f, "Cannot resolve root '{}': {}", path.display(), e)
            }
            ConfigError::RootNotDirectory(path) => {
                write!(f, "Root '{}' is not a directory", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}
