use std::{
    fmt::{self, Display, Formatter},
    ops::Deref,
    str::FromStr,
    time::SystemTime,
};

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};

use crate::{error::Error, validate};

/// A syntactically valid WireGuard public key: 44 characters of standard
/// base64 encoding a 32-byte Curve25519 key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(String);

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if validate::is_valid_public_key(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(Error::InvalidPublicKey(s.to_owned()))
        }
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl Deref for PublicKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PublicKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A configured mesh segment. Carries both its full name (as it appears in
/// `domains`) and the suffix left after stripping its matching
/// `domain_prefixes` entry, which names the kernel interfaces
/// (`wg-<suffix>`, `vx-<suffix>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Domain {
    name: String,
    suffix: String,
}

impl Domain {
    /// Normally constructed by `Config::validate_domain`, which knows the
    /// configured prefix/suffix set. See `common::config`.
    pub fn new(name: String, suffix: String) -> Self {
        Self { name, suffix }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn wg_interface(&self) -> String {
        format!("wg-{}", self.suffix)
    }

    pub fn vx_interface(&self) -> String {
        format!("vx-{}", self.suffix)
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Opaque worker identifier, typically a hostname. Used as a map key and as
/// the `<worker>` slot in MQTT topic templates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Deref for WorkerId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated key-exchange request, as accepted by the v1/v2 HTTP
/// endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyExchangeRequest {
    pub public_key: PublicKey,
    pub domain: Domain,
}

/// The endpoint data a worker publishes (retained) for a domain on connect.
/// Consumed by the broker's fleet registry and handed back to v2 callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    #[serde(rename = "Address")]
    pub external_address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "PublicKey")]
    pub public_key: PublicKey,
    /// IPv6 link-local address of the worker's own `wg-<suffix>` interface.
    #[serde(rename = "LinkAddress")]
    pub link_address: String,
}

/// Load-balancer weight for one worker, as configured broker-side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            weight: default_weight(),
        }
    }
}

impl WorkerConfig {
    /// Weight used by the selector. A configured `0` falls back to `1`
    /// rather than making the worker ineligible for any load.
    pub fn effective_weight(&self) -> u32 {
        self.weight.max(1)
    }
}

/// A node's allocated IPv6 prefix, as persisted by an IPAM backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IPv6PrefixAssignment {
    pub pubkey: PublicKey,
    pub prefix: Ipv6Net,
    #[serde(with = "humantime_seconds")]
    pub last_allocated_on: SystemTime,
}

/// `SystemTime` as a unix-epoch-seconds integer, matching the JSON shape
/// that IPAM backends persist.
mod humantime_seconds {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &SystemTime, ser: S) -> Result<S::Ok, S::Error> {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        ser.serialize_u64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// A deny-list entry: a blacklisted public key and an optional reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub key: PublicKey,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_interface_names_use_suffix_not_name() {
        let domain = Domain::new("ffmuc_welt".to_owned(), "welt".to_owned());
        assert_eq!(domain.wg_interface(), "wg-welt");
        assert_eq!(domain.vx_interface(), "vx-welt");
    }

    #[test]
    fn public_key_round_trips_through_serde() {
        let key: PublicKey = "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg="
            .parse()
            .unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn worker_config_defaults_to_weight_one() {
        let cfg: WorkerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.weight, 1);
    }
}
