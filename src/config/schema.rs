//! Managed configuration document schemas.
//!
//! This module defines the payload types the control plane stores per
//! document key. All types derive Serde traits; payload bodies are the
//! unit of serialization for both the store and the bundle codec.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a managed configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    /// Hysteria2 configuration for the primary node.
    Hysteria2Node1,
    /// Hysteria2 configuration for the secondary node.
    Hysteria2Node2,
    /// Auxiliary SOCKS5 listener configuration.
    Socks5,
}

impl ConfigKey {
    /// Every managed key, in canonical order.
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::Hysteria2Node1,
        ConfigKey::Hysteria2Node2,
        ConfigKey::Socks5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Hysteria2Node1 => "hysteria2_node1",
            ConfigKey::Hysteria2Node2 => "hysteria2_node2",
            ConfigKey::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hysteria2_node1" => Ok(ConfigKey::Hysteria2Node1),
            "hysteria2_node2" => Ok(ConfigKey::Hysteria2Node2),
            "socks5" => Ok(ConfigKey::Socks5),
            _ => Err(()),
        }
    }
}

/// Typed payload of a configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigPayload {
    Hysteria2(Hysteria2Config),
    Socks5(Socks5Config),
}

impl ConfigPayload {
    /// The empty payload a key starts out with before its first commit.
    pub fn default_for(key: ConfigKey) -> Self {
        match key {
            ConfigKey::Hysteria2Node1 | ConfigKey::Hysteria2Node2 => {
                ConfigPayload::Hysteria2(Hysteria2Config::default())
            }
            ConfigKey::Socks5 => ConfigPayload::Socks5(Socks5Config::default()),
        }
    }

    /// Whether this payload variant is the right shape for `key`.
    pub fn matches_key(&self, key: ConfigKey) -> bool {
        matches!(
            (self, key),
            (
                ConfigPayload::Hysteria2(_),
                ConfigKey::Hysteria2Node1 | ConfigKey::Hysteria2Node2
            ) | (ConfigPayload::Socks5(_), ConfigKey::Socks5)
        )
    }
}

/// Hysteria2 server settings for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Hysteria2Config {
    /// Listen address (e.g., "0.0.0.0:443"). Empty means not configured.
    pub listen: String,

    /// File-based TLS. Mutually exclusive with `acme`.
    pub tls: Option<TlsFiles>,

    /// ACME-managed TLS. Mutually exclusive with `tls`.
    pub acme: Option<AcmeSettings>,

    /// Optional obfuscation password.
    pub obfs_password: Option<String>,

    /// Masquerade behavior for unauthenticated probes.
    pub masquerade: MasqueradeConfig,

    /// Per-client bandwidth caps.
    pub bandwidth: BandwidthConfig,

    /// Port hopping ranges, e.g. "20000-25000,31000".
    pub port_hopping: Option<String>,
}

/// TLS certificate material referenced by path.
///
/// Documents hold paths only; the certificate bytes live with the
/// certificate manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// ACME issuance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AcmeSettings {
    /// Domains to request certificates for.
    pub domains: Vec<String>,

    /// CA to issue from (e.g., "letsencrypt").
    pub ca: String,

    /// Directory where issued material is placed.
    pub dir: String,
}

/// Masquerade target for unauthenticated traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MasqueradeConfig {
    /// Enable masquerading.
    pub enabled: bool,

    /// Target URL to proxy probes to.
    pub target: String,
}

/// Per-client bandwidth caps in Mbps. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BandwidthConfig {
    pub up_mbps: u64,
    pub down_mbps: u64,
}

/// SOCKS5 listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Socks5Config {
    /// Listen address (e.g., "127.0.0.1:1080"). Empty means not configured.
    pub listen: String,

    /// Optional credentials. Username and password go together.
    pub username: Option<String>,
    pub password: Option<String>,
}
