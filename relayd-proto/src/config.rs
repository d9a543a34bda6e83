//! Unified configuration schema. The same binary serves every role, so one
//! `Config` (rather than the split client/server schemas of a dedicated
//! per-role binary) covers direct, client, and server operation.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("key is not valid base64: {0}")]
    BadKey(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Direct,
    Client,
    Server,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub run_mode: RunMode,
    pub inbound: Server,
    #[serde(default)]
    pub outbound: Option<Server>,
    #[serde(default)]
    pub dashboard: Option<Server>,
    #[serde(default)]
    pub dns: Dns,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsFingerprint {
    Firefox,
    Chrome,
    Ios,
}

impl Default for TlsFingerprint {
    fn default() -> Self {
        TlsFingerprint::Firefox
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub fingerprint: TlsFingerprint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub routing_mark: Option<i32>,
}

impl Server {
    pub fn enabled(&self) -> bool {
        self.port != 0
    }

    pub fn key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        match &self.token {
            Some(t) => decode_key(t),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dns {
    #[serde(default = "default_name_servers")]
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub hosts: std::collections::HashMap<String, String>,
}

impl Default for Dns {
    fn default() -> Self {
        Self {
            name_servers: default_name_servers(),
            hosts: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default)]
    pub compress: bool,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            filename: None,
            level: default_log_level(),
            max_backups: default_max_backups(),
            max_size_mb: default_max_size_mb(),
            max_age_days: default_max_age_days(),
            compress: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_name_servers() -> Vec<String> {
    vec![
        "udp://8.8.8.8".into(),
        "udp://1.1.1.1".into(),
        "udp://223.5.5.5".into(),
        "udp://119.29.29.29".into(),
    ]
}
fn default_log_level() -> String {
    "info".into()
}
fn default_max_backups() -> u32 {
    3
}
fn default_max_size_mb() -> u32 {
    100
}
fn default_max_age_days() -> u32 {
    28
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde defaults alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_mode == RunMode::Client && self.outbound.is_none() {
            return Err(ConfigError::Invalid(
                "client mode requires an [outbound] server".into(),
            ));
        }
        let has_doh = self
            .dns
            .name_servers
            .iter()
            .any(|s| s.starts_with("https://"));
        if has_doh {
            let has_ip_literal_bootstrap = self.dns.name_servers.iter().any(|s| {
                !s.starts_with("https://")
                    && s.rsplit_once("://")
                        .map(|(_, rest)| rest.split(['/', '#']).next().unwrap_or(rest))
                        .map(|host_port| {
                            host_port
                                .rsplit_once(':')
                                .map(|(h, _)| h)
                                .unwrap_or(host_port)
                                .parse::<std::net::IpAddr>()
                                .is_ok()
                        })
                        .unwrap_or(false)
            });
            if !has_ip_literal_bootstrap {
                return Err(ConfigError::Invalid(
                    "DNS-over-HTTPS requires at least one IP-literal bootstrap nameserver".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Decode the base64 shared token from the config string into raw bytes.
pub fn decode_key(key_str: &str) -> Result<Vec<u8>, ConfigError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD.decode(key_str.trim())?;
    Ok(bytes)
}
