//! Remote IPAM backed by a NetBox API, grounded on
//! `original_source/wgkex/broker/ipam_netbox.py`. Concurrency safety is
//! delegated to NetBox itself; this client just issues the lookups and
//! creates.
//!
//! Uses `reqwest`'s blocking client, matching this trait's synchronous
//! shape (see `broker::ipam::IpamBackend`); callers on the async HTTP path
//! run it via `tokio::task::spawn_blocking`.

use ipnet::{Ipv4Net, Ipv6Net};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use wgkex_common::PublicKey;

use super::{IpamBackend, IpamError, PrefixAssignment};

/// The JSON blob NetBox stores in a prefix's `description` field to tie it
/// back to the pubkey that owns it.
#[derive(Debug, Serialize, Deserialize)]
struct PrefixDescription {
    pubkey: String,
    last_allocated_on: u64,
    created_by: String,
}

#[derive(Debug, Deserialize)]
struct PrefixListResponse {
    results: Vec<NetboxPrefix>,
}

#[derive(Debug, Deserialize)]
struct NetboxPrefix {
    id: u64,
    prefix: String,
    description: String,
}

pub struct NetboxIpam {
    api_url: String,
    token: String,
    client: Client,
}

impl NetboxIpam {
    pub fn new(api_url: String, token: String) -> Self {
        Self {
            api_url,
            token,
            client: Client::new(),
        }
    }

    fn authed(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        req.header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
    }

    fn find_existing(&self, pubkey: &PublicKey) -> Result<Option<NetboxPrefix>, IpamError> {
        let url = format!("{}/api/ipam/prefixes/", self.api_url.trim_end_matches('/'));
        let resp: PrefixListResponse = self
            .authed(self.client.get(&url).query(&[("description__ic", pubkey.as_ref())]))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.results.into_iter().find(|p| {
            serde_json::from_str::<PrefixDescription>(&p.description)
                .map(|d| d.pubkey == pubkey.as_ref())
                .unwrap_or(false)
        }))
    }

    fn create_in_parent(
        &self,
        parent_id: u64,
        prefix_length: u8,
        description: &str,
    ) -> Result<NetboxPrefix, IpamError> {
        let url = format!(
            "{}/api/ipam/prefixes/{parent_id}/available-prefixes/",
            self.api_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "prefix_length": prefix_length,
            "description": description,
            "mark_utilized": true,
        });
        let resp = self.authed(self.client.post(&url).json(&body)).send()?.error_for_status()?;
        Ok(resp.json()?)
    }

    fn parent_prefix_id(&self, family: u8) -> Result<u64, IpamError> {
        let url = format!("{}/api/ipam/prefixes/", self.api_url.trim_end_matches('/'));
        let resp: PrefixListResponse = self
            .authed(self.client.get(&url).query(&[("family", &family.to_string())]))
            .send()?
            .error_for_status()?
            .json()?;
        match resp.results.as_slice() {
            [single] => Ok(single.id),
            [] => Err(IpamError::UnexpectedResponse(
                "no matching parent prefix found in NetBox".into(),
            )),
            _ => Err(IpamError::UnexpectedResponse(
                "more than one matching parent prefix found in NetBox".into(),
            )),
        }
    }
}

impl IpamBackend for NetboxIpam {
    fn get_or_allocate_prefix(
        &self,
        pubkey: &PublicKey,
        want_v4: bool,
        want_v6: bool,
        v4_len: u8,
        v6_len: u8,
    ) -> Result<PrefixAssignment, IpamError> {
        if let Some(existing) = self.find_existing(pubkey)? {
            let net: Ipv6Net = existing
                .prefix
                .parse()
                .map_err(|_| IpamError::UnexpectedResponse(format!("bad prefix {}", existing.prefix)))?;
            return Ok(PrefixAssignment {
                v4: None,
                v6: Some(net),
                selected_workers: vec![],
            });
        }

        let mut v6 = None;
        let mut v4 = None;

        if want_v6 {
            let parent_id = self.parent_prefix_id(6)?;
            let description = serde_json::to_string(&PrefixDescription {
                pubkey: pubkey.to_string(),
                last_allocated_on: 0,
                created_by: "wgkex-broker".to_owned(),
            })?;
            let created = self.create_in_parent(parent_id, v6_len, &description)?;
            v6 = Some(
                created
                    .prefix
                    .parse::<Ipv6Net>()
                    .map_err(|_| IpamError::UnexpectedResponse(format!("bad prefix {}", created.prefix)))?,
            );
        }

        if want_v4 {
            let parent_id = self.parent_prefix_id(4)?;
            let description = serde_json::to_string(&PrefixDescription {
                pubkey: pubkey.to_string(),
                last_allocated_on: 0,
                created_by: "wgkex-broker".to_owned(),
            })?;
            let created = self.create_in_parent(parent_id, v4_len, &description)?;
            v4 = Some(
                created
                    .prefix
                    .parse::<Ipv4Net>()
                    .map_err(|_| IpamError::UnexpectedResponse(format!("bad prefix {}", created.prefix)))?,
            );
        }

        Ok(PrefixAssignment {
            v4,
            v6,
            selected_workers: vec![],
        })
    }

    fn release_prefix(&self, _pubkey: &PublicKey) -> Result<(), IpamError> {
        Err(IpamError::NotImplemented)
    }

    fn update_prefix(
        &self,
        pubkey: &PublicKey,
        _v4: Option<Ipv4Net>,
        _v6: Option<Ipv6Net>,
        _selected_workers: &[String],
    ) -> Result<(), IpamError> {
        if let Some(existing) = self.find_existing(pubkey)? {
            let url = format!(
                "{}/api/ipam/prefixes/{}/",
                self.api_url.trim_end_matches('/'),
                existing.id
            );
            let description = serde_json::to_string(&PrefixDescription {
                pubkey: pubkey.to_string(),
                last_allocated_on: 0,
                created_by: "wgkex-broker".to_owned(),
            })?;
            self.authed(self.client.patch(&url).json(&serde_json::json!({ "description": description })))
                .send()?
                .error_for_status()?;
        }
        Ok(())
    }
}
