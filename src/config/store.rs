//! Stored Connection Profiles
//!
//! Named connections are kept in JSON files so agents can refer to them by name instead of
//! passing credentials around.
//!
//! # Configuration Locations
//! - Local: `.querygate/config.json` (per project, team-shareable)
//! - Global: `~/.config/querygate/config.json` (per user)
//!
//! # Resolution Precedence
//! 1. Explicit connection URL (`--url` or `QUERYGATE_DATABASE_URL`)
//! 2. Named connection (`--connection`)
//! 3. The merged file's `default` connection
//!
//! Local entries override global entries with the same name. The `gateway` section is taken from
//! the local file when present, otherwise from the global one.
//!
//! # File Format
//! ```json
//! {
//!   "connections": {
//!     "dev": { "engine": "postgres", "host": "localhost", "port": 5432,
//!              "user": "app", "database": "shop", "password_env": "SHOP_DB_PASSWORD" }
//!   },
//!   "default": "dev",
//!   "gateway": { "pool": { "max_size": 8 } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::GatewayConfig;
use crate::engine::ConnectionConfig;
use crate::error::{GatewayError, Result};

/// Contents of one configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub connections: BTreeMap<String, StoredConnection>,

    /// Name of the connection used when none is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,
}

/// Stored connection configuration
///
/// Like [`ConnectionConfig`] but the password can be read from an environment variable at
/// resolution time instead of being written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl PartialEq for StoredConnection {
    fn eq(&self, other: &Self) -> bool {
        serde_json::to_value(self).ok() == serde_json::to_value(other).ok()
    }
}

impl StoredConnection {
    /// Resolve the password environment variable and return a usable config
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let mut config = self.config.clone();
        if let Some(var) = &self.password_env {
            let password = std::env::var(var).map_err(|_| {
                GatewayError::config_error(format!(
                    "Environment variable {var} not found for password"
                ))
            })?;
            config.password = Some(password);
        }
        Ok(config)
    }
}

/// Which file a connection is saved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    Local,
    Global,
}

/// `.querygate/config.json` under the current directory
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        GatewayError::config_error(format!("Could not determine current directory: {e}"))
    })?;
    Ok(current_dir.join(".querygate").join("config.json"))
}

/// `~/.config/querygate/config.json` (platform config dir)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| GatewayError::config_error("Could not determine user config directory"))?;
    Ok(config_dir.join("querygate").join("config.json"))
}

pub fn config_path(location: ConfigLocation) -> Result<PathBuf> {
    match location {
        ConfigLocation::Local => local_config_path(),
        ConfigLocation::Global => global_config_path(),
    }
}

/// Read a config file; a missing file is an empty config
pub fn load_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| GatewayError::config_error(format!("Could not read config file: {e}")))?;
    let file: ConfigFile = serde_json::from_str(&contents).map_err(|e| {
        GatewayError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })?;
    if let Some(gateway) = &file.gateway {
        gateway.validate()?;
    }
    Ok(file)
}

pub fn save_file(path: &Path, file: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            GatewayError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }
    let contents = serde_json::to_string_pretty(file)
        .map_err(|e| GatewayError::config_error(format!("Could not serialize config: {e}")))?;
    fs::write(path, contents)
        .map_err(|e| GatewayError::config_error(format!("Could not write config file: {e}")))
}

/// Overlay `local` on `global`
#[must_use]
pub fn merge(global: ConfigFile, local: ConfigFile) -> ConfigFile {
    let mut merged = global;
    merged.connections.extend(local.connections);
    if local.default.is_some() {
        merged.default = local.default;
    }
    if local.gateway.is_some() {
        merged.gateway = local.gateway;
    }
    merged
}

/// Load both files and merge them, local taking precedence
pub fn load_with_precedence() -> Result<ConfigFile> {
    let global = load_file(&global_config_path()?)?;
    let local = load_file(&local_config_path()?)?;
    Ok(merge(global, local))
}

impl ConfigFile {
    /// Look up `name`, or the default connection when `name` is `None`
    pub fn resolve(&self, name: Option<&str>) -> Result<ConnectionConfig> {
        let available = || self.connections.keys().cloned().collect::<Vec<_>>().join(", ");

        let name = match name.or(self.default.as_deref()) {
            Some(n) => n,
            None if self.connections.len() == 1 => {
                self.connections.keys().next().map(String::as_str).unwrap_or_default()
            }
            None => {
                return Err(GatewayError::config_error(format!(
                    "No connection selected and no default set. Available connections: [{}]. \
                     Pass --connection or --url, or run 'querygate init'.",
                    available()
                )))
            }
        };

        let stored = self.connections.get(name).ok_or_else(|| {
            GatewayError::config_error(format!(
                "Connection '{name}' not found. Available connections: [{}]",
                available()
            ))
        })?;
        debug!(connection = name, engine = %stored.config.engine, "resolved stored connection");
        stored.resolve()
    }

    /// Add or replace a connection; the first one saved becomes the default
    pub fn insert(&mut self, name: impl Into<String>, stored: StoredConnection) {
        let name = name.into();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.connections.insert(name, stored);
    }
}

/// Save a named connection to the local or global file
///
/// Returns the path written.
pub fn save_connection(
    name: &str,
    stored: StoredConnection,
    location: ConfigLocation,
) -> Result<PathBuf> {
    let path = config_path(location)?;
    let mut file = load_file(&path)?;
    file.insert(name, stored);
    save_file(&path, &file)?;
    Ok(path)
}

/// Where the caller wants to connect
#[derive(Debug, Clone, Default)]
pub struct ConnectionSelector {
    pub url: Option<String>,
    pub name: Option<String>,
}

/// Resolve the selector against the config files
///
/// Returns the connection config plus the gateway settings found in the files (defaults when
/// neither file has a `gateway` section).
pub fn resolve(selector: &ConnectionSelector) -> Result<(ConnectionConfig, GatewayConfig)> {
    resolve_in(load_with_precedence()?, selector)
}

fn resolve_in(
    file: ConfigFile,
    selector: &ConnectionSelector,
) -> Result<(ConnectionConfig, GatewayConfig)> {
    let gateway = file.gateway.clone().unwrap_or_default();
    let connection = match &selector.url {
        Some(url) => ConnectionConfig::from_url(url)?,
        None => file.resolve(selector.name.as_deref())?,
    };
    Ok((connection, gateway))
}
