//! Builder configuration consumed by the steps
//!
//! Loaded from YAML. Every field has a default so an empty document is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How the VM's IP address is discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpGetter {
    /// Notification channel first, then guest tools
    #[default]
    Auto,
    /// Only addresses reported over the notification channel
    Http,
    /// Only addresses reported by the guest tools
    Tools,
}

impl IpGetter {
    pub fn uses_notifications(self) -> bool {
        matches!(self, IpGetter::Auto | IpGetter::Http)
    }

    pub fn uses_guest_tools(self) -> bool {
        matches!(self, IpGetter::Auto | IpGetter::Tools)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VncConfig {
    pub disable_vnc: bool,

    /// Address the local VNC listener binds to
    pub bind_address: IpAddr,

    /// Maximum concurrently relayed VNC connections (unbounded when unset)
    pub max_connections: Option<usize>,

    /// Verify the pool master's certificate on https console locations
    pub verify_tls: bool,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            disable_vnc: false,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_connections: None,
            verify_tls: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    pub vnc: VncConfig,

    pub ip_getter: IpGetter,

    /// Fixed address used to reach the VM; skips IP discovery when set
    pub comm_host: Option<String>,

    pub ip_wait_timeout_seconds: u64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            vnc: VncConfig::default(),
            ip_getter: IpGetter::Auto,
            comm_host: None,
            ip_wait_timeout_seconds: default_ip_wait_timeout(),
        }
    }
}

fn default_ip_wait_timeout() -> u64 {
    600
}

/// Upper bound on `ip_wait_timeout_seconds` (one week)
pub const MAX_IP_WAIT_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

impl CommonConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty file deserializes to unit, not to an empty mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: CommonConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip_wait_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "ip_wait_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.ip_wait_timeout_seconds > MAX_IP_WAIT_TIMEOUT_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "ip_wait_timeout_seconds must be at most {}",
                MAX_IP_WAIT_TIMEOUT_SECONDS
            )));
        }
        if self.vnc.max_connections == Some(0) {
            return Err(ConfigError::Invalid(
                "vnc.max_connections must be greater than zero".to_string(),
            ));
        }
        if let Some(host) = &self.comm_host {
            if host.trim().is_empty() {
                return Err(ConfigError::Invalid("comm_host must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn ip_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ip_wait_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CommonConfig::default();
        assert_eq!(config.ip_getter, IpGetter::Auto);
        assert_eq!(config.ip_wait_timeout(), Duration::from_secs(600));
        assert_eq!(
            config.vnc.bind_address,
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
        );
        assert!(config.vnc.max_connections.is_none());
        assert!(config.comm_host.is_none());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(CommonConfig::from_yaml_str("").unwrap(), CommonConfig::default());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
ip_getter: tools
ip_wait_timeout_seconds: 120
vnc:
  bind_address: 0.0.0.0
  max_connections: 4
"#;
        let config = CommonConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.ip_getter, IpGetter::Tools);
        assert_eq!(config.ip_wait_timeout(), Duration::from_secs(120));
        assert_eq!(config.vnc.bind_address.to_string(), "0.0.0.0");
        assert_eq!(config.vnc.max_connections, Some(4));
        assert!(!config.vnc.disable_vnc);
    }

    #[test]
    fn test_ip_getter_sources() {
        assert!(IpGetter::Auto.uses_notifications() && IpGetter::Auto.uses_guest_tools());
        assert!(IpGetter::Http.uses_notifications() && !IpGetter::Http.uses_guest_tools());
        assert!(!IpGetter::Tools.uses_notifications() && IpGetter::Tools.uses_guest_tools());
    }

    #[test]
    fn test_unknown_ip_getter_rejected() {
        let err = CommonConfig::from_yaml_str("ip_getter: dhcp").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let err = CommonConfig::from_yaml_str("ip_wait_timeout_seconds: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err =
            CommonConfig::from_yaml_str("ip_wait_timeout_seconds: 18446744073709551615").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = CommonConfig::from_yaml_str("ip_wait_timeout_seconds: 604800").unwrap();
        assert_eq!(config.ip_wait_timeout_seconds, MAX_IP_WAIT_TIMEOUT_SECONDS);

        let err = CommonConfig::from_yaml_str("vnc:\n  max_connections: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CommonConfig::from_yaml_str("comm_host: '  '").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "comm_host: 192.168.1.20").unwrap();
        writeln!(file, "vnc:").unwrap();
        writeln!(file, "  disable_vnc: true").unwrap();

        let config = CommonConfig::load(file.path()).unwrap();
        assert_eq!(config.comm_host.as_deref(), Some("192.168.1.20"));
        assert!(config.vnc.disable_vnc);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CommonConfig::load(dir.path().join("missing.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
