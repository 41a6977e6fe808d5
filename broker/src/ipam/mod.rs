//! IPv6 (and optionally IPv4) prefix allocation, pluggable between a
//! file-backed and a remote NetBox-API-backed implementation. See
//! spec.md §4.9 and the REDESIGN FLAGS note: one narrow trait, two impls,
//! selected at startup — no runtime reflection.

mod json_file;
mod netbox;

use std::sync::Arc;

use ipnet::{Ipv4Net, Ipv6Net};
use thiserror::Error;
use wgkex_common::{config::IpamKind, PublicKey};

pub use json_file::JsonFileIpam;
pub use netbox::NetboxIpam;

#[derive(Error, Debug)]
pub enum IpamError {
    #[error("failed to read IPAM state: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize IPAM state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parent prefix exhausted")]
    ParentExhausted,

    #[error("releasing a prefix is not supported by this backend")]
    NotImplemented,

    #[error("NetBox API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("NetBox API returned an unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IPAM is misconfigured: {0}")]
    Config(String),
}

/// Result of `get_or_allocate_prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixAssignment {
    pub v4: Option<Ipv4Net>,
    pub v6: Option<Ipv6Net>,
    pub selected_workers: Vec<String>,
}

/// The narrow interface both IPAM backends satisfy. The broker depends
/// only on this trait, never on a concrete backend.
pub trait IpamBackend: Send + Sync {
    /// Idempotent: calling this twice for the same `pubkey` returns the
    /// same assignment. The returned IPv6 prefix is always a subnet of the
    /// backend's configured parent prefix; two distinct pubkeys never
    /// receive overlapping prefixes.
    fn get_or_allocate_prefix(
        &self,
        pubkey: &PublicKey,
        want_v4: bool,
        want_v6: bool,
        v4_len: u8,
        v6_len: u8,
    ) -> Result<PrefixAssignment, IpamError>;

    fn release_prefix(&self, pubkey: &PublicKey) -> Result<(), IpamError>;

    fn update_prefix(
        &self,
        pubkey: &PublicKey,
        v4: Option<Ipv4Net>,
        v6: Option<Ipv6Net>,
        selected_workers: &[String],
    ) -> Result<(), IpamError>;
}

/// Builds the configured backend. Called once at startup; the resulting
/// trait object is held for the lifetime of the broker process.
pub fn build(config: &wgkex_common::config::ParkerConfig) -> Result<Arc<dyn IpamBackend>, IpamError> {
    match config.ipam {
        IpamKind::Json => Ok(Arc::new(JsonFileIpam::new(
            config.ipam_file_path.clone().into(),
            config.prefixes.ipv6.parent,
        )?)),
        IpamKind::Netbox => {
            let api_url = config
                .ipam_netbox_api_url
                .clone()
                .ok_or_else(|| IpamError::Config("ipam_netbox_api_url is required".into()))?;
            let token = config
                .ipam_netbox_token
                .clone()
                .ok_or_else(|| IpamError::Config("ipam_netbox_token is required".into()))?;
            Ok(Arc::new(NetboxIpam::new(api_url, token)))
        },
    }
}
