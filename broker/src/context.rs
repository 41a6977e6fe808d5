//! A single startup builder aggregating the registry, bus handle, IPAM,
//! and signer — passed explicitly to handlers instead of living behind
//! process-wide globals. See spec.md §9 REDESIGN FLAGS.

use std::sync::Arc;

use wgkex_common::config::Config;

use crate::{
    ipam::IpamBackend,
    lists::{AllowList, DenyList},
    mqtt::MqttHandle,
    registry::Registry,
    signer::Ed25519Signer,
};

pub struct BrokerContext {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub deny_list: Arc<DenyList>,
    pub allow_list: Arc<AllowList>,
    pub mqtt: MqttHandle,
    /// `Some` iff `parker.enabled`.
    pub ipam: Option<Arc<dyn IpamBackend>>,
    /// `Some` iff `parker.enabled`.
    pub signer: Option<Arc<Ed25519Signer>>,
}

impl BrokerContext {
    /// Whether `key` may proceed for `domain`. The allow-list is opt-in: if
    /// `allowlist_file` isn't configured, every key is permitted.
    pub fn key_is_permitted(&self, domain: &str, key: &wgkex_common::PublicKey) -> bool {
        self.config.allowlist_file.is_none() || self.allow_list.is_allowed(domain, key)
    }
}
