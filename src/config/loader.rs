//! Control-plane runtime settings loaded from disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::schema::TlsFiles;

/// Error type for settings loading.
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}

/// Settings for the control plane process itself.
///
/// These describe how the control plane runs, not what it manages; the
/// managed proxy configuration lives in the store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// API bind address.
    pub bind_address: String,

    /// Directory for the document store, certificates, and generated
    /// node config files.
    pub data_dir: PathBuf,

    /// Bearer key required on every API request.
    pub api_key: String,

    /// Serve the API over TLS using these files.
    pub tls: Option<TlsFiles>,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Path to the proxy binary the orchestrator spawns per node.
    pub proxy_binary: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8675".to_string(),
            data_dir: PathBuf::from("./data"),
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            tls: None,
            request_timeout_secs: 30,
            proxy_binary: PathBuf::from("hysteria"),
        }
    }
}

/// Load settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<ServerSettings, SettingsError> {
    let content = fs::read_to_string(path).map_err(SettingsError::Io)?;
    let settings: ServerSettings = toml::from_str(&content).map_err(SettingsError::Parse)?;
    Ok(settings)
}
