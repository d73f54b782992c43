//! Configuration for the fleetgraph-discover daemon.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{DiscoverError, Result};

/// Top-level discover configuration.
///
/// Loaded from `fleetgraph.toml` `[discover]` section or
/// `FLEETGRAPH__DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Directory holding plugin descriptor JSON files.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,

    /// Discovery list: one `vm_name,ip,dns_name` line per server.
    #[serde(default = "default_inventory")]
    pub inventory: String,

    /// Label of the per-server subject node.
    #[serde(default = "default_subject_class")]
    pub subject_class: String,

    /// Field delimiter for plugin output rows.
    #[serde(default = "default_delimiter")]
    pub field_delimiter: char,

    /// Maximum servers discovered at once. 1 keeps runs fully sequential.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_servers: usize,

    /// Deadline for a single remote script run.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Remote directory scripts are staged in.
    #[serde(default = "default_remote_tmp_dir")]
    pub remote_tmp_dir: String,

    #[serde(default)]
    pub ssh: SshConfig,
}

/// How to reach servers.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key passed with `-i`.
    pub identity_file: Option<String>,

    /// Password auth goes through `sshpass -e`.
    pub password: Option<String>,

    #[serde(default = "default_ssh_path")]
    pub ssh_path: String,

    #[serde(default = "default_sshpass_path")]
    pub sshpass_path: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub strict_host_key_checking: bool,
}

impl DiscoverConfig {
    /// Load the `[discover]` section, falling back to defaults when the
    /// section is absent.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = settings(file_prefix).map_err(|e| DiscoverError::Config(e.to_string()))?;

        match cfg.get::<Self>("discover") {
            Ok(c) => Ok(c),
            Err(::config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(DiscoverError::Config(e.to_string())),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// `<file_prefix>.toml` (optional), overridden by
/// `FLEETGRAPH__<SECTION>__<KEY>` environment variables.
pub fn settings(file_prefix: &str) -> std::result::Result<::config::Config, ::config::ConfigError> {
    ::config::Config::builder()
        .add_source(::config::File::with_name(file_prefix).required(false))
        .add_source(
            ::config::Environment::with_prefix("FLEETGRAPH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
}

fn default_plugin_dir() -> String {
    "./plugins".to_string()
}

fn default_inventory() -> String {
    "./discovery.csv".to_string()
}

fn default_subject_class() -> String {
    "Server".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_max_concurrent() -> usize {
    1
}

fn default_command_timeout() -> u64 {
    300
}

fn default_remote_tmp_dir() -> String {
    "/tmp".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_sshpass_path() -> String {
    "sshpass".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            inventory: default_inventory(),
            subject_class: default_subject_class(),
            field_delimiter: default_delimiter(),
            max_concurrent_servers: default_max_concurrent(),
            command_timeout_secs: default_command_timeout(),
            remote_tmp_dir: default_remote_tmp_dir(),
            ssh: SshConfig::default(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            password: None,
            ssh_path: default_ssh_path(),
            sshpass_path: default_sshpass_path(),
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: false,
        }
    }
}
