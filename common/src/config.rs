//! The single YAML configuration document shared by the broker and worker
//! binaries. Validated once at startup; a validation failure is fatal.

use std::{collections::HashMap, env, fs, path::Path};

use ipnet::{Ipv4Net, Ipv6Net};
use serde::Deserialize;

use crate::{
    error::Error,
    types::{Domain, WorkerConfig, WorkerId},
};

/// Default path consulted when `$WGKEX_CONFIG_FILE` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wgkex/config.yaml";

/// Name of the environment variable overriding the config path.
pub const CONFIG_PATH_ENV_VAR: &str = "WGKEX_CONFIG_FILE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub domains: Vec<String>,
    pub domain_prefixes: Vec<String>,

    #[serde(default)]
    pub broker_listen: BrokerListen,

    pub mqtt: MqttConfig,

    #[serde(default)]
    pub workers: HashMap<WorkerId, WorkerConfig>,

    /// Worker-side override of the hostname reported in `WorkerEndpoint`.
    #[serde(rename = "externalName", default)]
    pub external_name: Option<String>,

    #[serde(default)]
    pub parker: ParkerConfig,

    pub broker_signing_key: Option<String>,

    /// Deny-list YAML path. Unset means no key is ever blacklisted.
    pub blacklist_file: Option<String>,

    /// Allow-list YAML path. Unset means every key is allowed (the
    /// allow-list feature is opt-in).
    pub allowlist_file: Option<String>,

    /// Allow-list reload interval; `0` disables reloading.
    #[serde(default = "default_allowlist_refresh_interval_secs")]
    pub allowlist_refresh_interval_secs: u64,

    /// Worker-side: interval between stale-peer flush passes.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Worker-side: interval between connected-peer metric publishes.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_allowlist_refresh_interval_secs() -> u64 {
    300
}

fn default_flush_interval_secs() -> u64 {
    3600
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerListen {
    pub host: String,
    pub port: u16,
}

impl Default for BrokerListen {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub broker_url: String,
    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    #[serde(default)]
    pub tls: bool,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParkerConfig {
    pub enabled: bool,
    pub ipam: IpamKind,
    pub prefixes: PrefixesConfig,
    /// File-backed IPAM: path to the persisted `{parent_prefix, ranges}` JSON.
    pub ipam_file_path: String,
    /// Remote IPAM: base URL of the NetBox API.
    pub ipam_netbox_api_url: Option<String>,
    /// Remote IPAM: NetBox API token.
    pub ipam_netbox_token: Option<String>,
}

impl Default for ParkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ipam: IpamKind::Json,
            prefixes: PrefixesConfig::default(),
            ipam_file_path: "/var/local/wgkex/broker/ipv6_ranges.json".to_owned(),
            ipam_netbox_api_url: None,
            ipam_netbox_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpamKind {
    Json,
    Netbox,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefixesConfig {
    pub ipv6: Ipv6PrefixConfig,
    pub ipv4: Ipv4PrefixConfig,
}

impl Default for PrefixesConfig {
    fn default() -> Self {
        Self {
            ipv6: Ipv6PrefixConfig::default(),
            ipv4: Ipv4PrefixConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ipv6PrefixConfig {
    pub parent: Ipv6Net,
    pub length: u8,
}

impl Default for Ipv6PrefixConfig {
    fn default() -> Self {
        Self {
            parent: "2001:db8:ed0::/56".parse().unwrap(),
            length: 63,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ipv4PrefixConfig {
    /// Fixed 464XLAT CLAT subnet handed back as `range4`/`address4` in v3
    /// responses. See DESIGN.md's "v3 `range4`/`address4`" open-question
    /// decision: this is not configurable per request.
    pub clat_subnet: Ipv4Net,
}

impl Default for Ipv4PrefixConfig {
    fn default() -> Self {
        Self {
            clat_subnet: "10.80.99.0/22".parse().unwrap(),
        }
    }
}

impl Config {
    /// Loads and validates the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config file named by `$WGKEX_CONFIG_FILE`, falling back to
    /// [`DEFAULT_CONFIG_PATH`].
    pub fn load_from_env() -> Result<Self, Error> {
        let path = env::var(CONFIG_PATH_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load(Path::new(&path))
    }

    /// Validates cross-field invariants: non-empty domains, every domain
    /// matching a configured prefix, unique suffixes, and (when
    /// `parker.enabled`) a signing key being present. Fatal on failure.
    pub fn validate(&self) -> Result<(), Error> {
        if self.domains.is_empty() {
            return Err(Error::InvalidConfig("domains must not be empty".into()));
        }

        let mut seen_suffixes = HashMap::new();
        for domain in &self.domains {
            let suffix = self.suffix_of(domain)?;
            if let Some(previous) = seen_suffixes.insert(suffix.clone(), domain.clone()) {
                return Err(Error::DuplicateSuffix(format!(
                    "{suffix} (from {previous} and {domain})"
                )));
            }
        }

        if self.parker.enabled && self.broker_signing_key.is_none() {
            return Err(Error::InvalidConfig(
                "parker.enabled requires broker_signing_key".into(),
            ));
        }

        Ok(())
    }

    /// `total_weight = max(1, sum of effective weights)`. A `0`-weight
    /// worker falls back to an effective weight of `1`, so an all-zero
    /// configuration yields `total_weight == workers.len()`.
    pub fn total_weight(&self) -> u32 {
        let sum: u32 = self.workers.values().map(|w| w.effective_weight()).sum();
        sum.max(1)
    }

    fn suffix_of(&self, domain_name: &str) -> Result<String, Error> {
        self.domain_prefixes
            .iter()
            .find_map(|prefix| domain_name.strip_prefix(prefix.as_str()))
            .map(str::to_owned)
            .ok_or_else(|| Error::BadPrefix {
                domain: domain_name.to_owned(),
            })
    }

    /// `validate_domain(s)` from spec.md §4.1: `s` must be one of the
    /// configured `domains` and begin with a configured prefix.
    pub fn validate_domain(&self, s: &str) -> Result<Domain, Error> {
        if !self.domains.iter().any(|d| d == s) {
            return Err(Error::UnknownDomain(s.to_owned()));
        }
        let suffix = self.suffix_of(s)?;
        Ok(Domain::new(s.to_owned(), suffix))
    }

    /// All configured domains as validated `Domain` values.
    pub fn validated_domains(&self) -> Result<Vec<Domain>, Error> {
        self.domains.iter().map(|d| self.validate_domain(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> &'static str {
        r#"
domains:
  - ffmuc_welt
  - ffmuc_muc
domain_prefixes:
  - ffmuc_
mqtt:
  broker_url: localhost
"#
    }

    #[test]
    fn validates_a_minimal_config() {
        let config: Config = serde_yaml::from_str(base_yaml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.keepalive, 5);
    }

    #[test]
    fn rejects_duplicate_suffixes() {
        let yaml = r#"
domains:
  - ffmuc_welt
  - other_welt
domain_prefixes:
  - ffmuc_
  - other_
mqtt:
  broker_url: localhost
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(Error::DuplicateSuffix(_))));
    }

    #[test]
    fn rejects_domain_with_no_matching_prefix() {
        let yaml = r#"
domains:
  - unrelated
domain_prefixes:
  - ffmuc_
mqtt:
  broker_url: localhost
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(Error::BadPrefix { .. })));
    }

    #[test]
    fn parker_enabled_requires_signing_key() {
        let yaml = format!(
            "{}\nparker:\n  enabled: true\n",
            base_yaml().trim_end()
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn total_weight_falls_back_to_worker_count() {
        let mut config: Config = serde_yaml::from_str(base_yaml()).unwrap();
        config
            .workers
            .insert(WorkerId::new("a"), WorkerConfig { weight: 0 });
        config
            .workers
            .insert(WorkerId::new("b"), WorkerConfig { weight: 0 });
        assert_eq!(config.total_weight(), 2);
    }
}
