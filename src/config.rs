//! Daemon configuration.
//!
//! One YAML document of kebab-case keys, every one optional; the compiled-in
//! defaults give a working daemon with no file at all. All times are seconds,
//! so 0.1 is 100 milliseconds.

use std::fs;
use std::path::Path;
use std::time::Duration;

use md5::{Digest, Md5};
use serde::Deserialize;

use crate::error::ConfigError;

/// Files the default local-id is derived from, in order of preference.
const HOST_UUID_PATHS: [&str; 2] = ["/sys/class/dmi/id/product_uuid", "/etc/machine-id"];

fn default_retransmit_initial_interval() -> f64 {
    1.0
}
fn default_retransmit_exponential_backoff() -> bool {
    true
}
fn default_retransmit_max_drop() -> u32 {
    3
}
fn default_keepalive_send_interval() -> f64 {
    1.0
}
fn default_keepalive_receive_timeout() -> f64 {
    60.0
}
fn default_hello_interval() -> f64 {
    60.0
}
fn default_reassembly_timeout() -> f64 {
    1.0
}
fn default_mac_address_cache_timeout() -> f64 {
    300.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// How long to wait before the first retransmission.
    #[serde(default = "default_retransmit_initial_interval")]
    retransmit_initial_interval: f64,

    /// Double the retransmission delay after each drop?
    #[serde(default = "default_retransmit_exponential_backoff")]
    retransmit_exponential_backoff: bool,

    /// Drops before a session is declared dead.
    #[serde(default = "default_retransmit_max_drop")]
    retransmit_max_drop: u32,

    /// Outbound keepalive period.
    #[serde(default = "default_keepalive_send_interval")]
    keepalive_send_interval: f64,

    /// Longest tolerated silence before closing a session; 0 disables.
    #[serde(default = "default_keepalive_receive_timeout")]
    keepalive_receive_timeout: f64,

    /// HELLO beacon period.
    #[serde(default = "default_hello_interval")]
    hello_interval: f64,

    /// Orphan fragments older than this are dropped.
    #[serde(default = "default_reassembly_timeout")]
    reassembly_timeout: f64,

    /// Stale MAC-to-interface bindings older than this are evicted.
    #[serde(default = "default_mac_address_cache_timeout")]
    mac_address_cache_timeout: f64,

    /// This node's 10-octet identity, as hex; derived from the host UUID
    /// when absent.
    #[serde(default)]
    local_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            retransmit_initial_interval: default_retransmit_initial_interval(),
            retransmit_exponential_backoff: default_retransmit_exponential_backoff(),
            retransmit_max_drop: default_retransmit_max_drop(),
            keepalive_send_interval: default_keepalive_send_interval(),
            keepalive_receive_timeout: default_keepalive_receive_timeout(),
            hello_interval: default_hello_interval(),
            reassembly_timeout: default_reassembly_timeout(),
            mac_address_cache_timeout: default_mac_address_cache_timeout(),
            local_id: None,
        }
    }
}

impl Config {
    /// Loads the configuration, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cfg = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str(&contents)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            self.retransmit_initial_interval,
            self.keepalive_send_interval,
            self.hello_interval,
            self.reassembly_timeout,
            self.mac_address_cache_timeout,
        ];
        if positive.iter().any(|v| !v.is_finite() || *v <= 0.0)
            || !self.keepalive_receive_timeout.is_finite()
            || self.keepalive_receive_timeout < 0.0
            || self.retransmit_max_drop == 0
        {
            return Err(ConfigError::Parse(serde::de::Error::custom(
                "intervals must be positive and retransmit-max-drop at least 1",
            )));
        }
        Ok(())
    }

    pub fn retransmit_initial_interval(&self) -> Duration {
        Duration::from_secs_f64(self.retransmit_initial_interval)
    }

    pub fn retransmit_exponential_backoff(&self) -> bool {
        self.retransmit_exponential_backoff
    }

    pub fn retransmit_max_drop(&self) -> u32 {
        self.retransmit_max_drop
    }

    pub fn keepalive_send_interval(&self) -> Duration {
        Duration::from_secs_f64(self.keepalive_send_interval)
    }

    /// `None` when receive timeouts are disabled.
    pub fn keepalive_receive_timeout(&self) -> Option<Duration> {
        if self.keepalive_receive_timeout == 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(self.keepalive_receive_timeout))
        }
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_secs_f64(self.hello_interval)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reassembly_timeout)
    }

    pub fn mac_address_cache_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.mac_address_cache_timeout)
    }

    /// The node identity carried in every OPEN.
    pub fn local_id(&self) -> Result<[u8; 10], ConfigError> {
        match &self.local_id {
            Some(text) => parse_local_id(text),
            None => derive_local_id(),
        }
    }

    /// Parses a configuration from an in-memory YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Config, ConfigError> {
        let cfg: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Accepts "0102…", "01:02:…" or "01-02-…" forms.
fn parse_local_id(text: &str) -> Result<[u8; 10], ConfigError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();
    let bytes =
        hex::decode(&cleaned).map_err(|_| ConfigError::BadLocalId(text.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::BadLocalId(text.to_string()))
}

/// MD5 of the host's stable UUID, truncated to 10 octets.
fn derive_local_id() -> Result<[u8; 10], ConfigError> {
    for path in HOST_UUID_PATHS {
        if let Ok(uuid) = fs::read_to_string(path) {
            let digest = Md5::digest(uuid.trim().as_bytes());
            return Ok(digest[..10].try_into().expect("md5 digest is 16 octets"));
        }
    }
    Err(ConfigError::NoHostIdentity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.retransmit_initial_interval(), Duration::from_secs(1));
        assert!(cfg.retransmit_exponential_backoff());
        assert_eq!(cfg.retransmit_max_drop(), 3);
        assert_eq!(cfg.keepalive_send_interval(), Duration::from_secs(1));
        assert_eq!(
            cfg.keepalive_receive_timeout(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(cfg.hello_interval(), Duration::from_secs(60));
        assert_eq!(cfg.reassembly_timeout(), Duration::from_secs(1));
        assert_eq!(
            cfg.mac_address_cache_timeout(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let cfg = Config::from_yaml("keepalive-receive-timeout: 2.0\n").unwrap();
        assert_eq!(
            cfg.keepalive_receive_timeout(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(cfg.hello_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_receive_timeout_disables() {
        let cfg = Config::from_yaml("keepalive-receive-timeout: 0.0\n").unwrap();
        assert_eq!(cfg.keepalive_receive_timeout(), None);
    }

    #[test]
    fn test_fractional_intervals() {
        let cfg = Config::from_yaml("retransmit-initial-interval: 0.1\n").unwrap();
        assert_eq!(
            cfg.retransmit_initial_interval(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed: Result<Config, _> = serde_yaml_ng::from_str("retransmit-maxdrop: 3\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let parsed: Config = serde_yaml_ng::from_str("hello-interval: 0.0\n").unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_local_id_hex_forms() {
        for text in [
            "000102030405060708ff",
            "00:01:02:03:04:05:06:07:08:ff",
            "00-01-02-03-04-05-06-07-08-FF",
        ] {
            assert_eq!(
                parse_local_id(text).unwrap(),
                [0, 1, 2, 3, 4, 5, 6, 7, 8, 0xFF]
            );
        }
    }

    #[test]
    fn test_local_id_rejects_wrong_length() {
        assert!(parse_local_id("0001").is_err());
        assert!(parse_local_id("000102030405060708ff00").is_err());
        assert!(parse_local_id("not hex").is_err());
    }

    #[test]
    fn test_local_id_from_config() {
        let cfg = Config::from_yaml("local-id: 0102030405060708090a\n").unwrap();
        assert_eq!(cfg.local_id().unwrap(), [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }
}
