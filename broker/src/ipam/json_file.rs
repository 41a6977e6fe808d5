//! File-backed IPAM, grounded on
//! `original_source/wgkex/broker/ipam_json.py`: persists
//! `{parent_prefix, ranges: map<pubkey, prefix>}` as JSON, skipping the
//! first `/v6_len` subnet of the parent and handing out the first
//! unallocated one after that.

use std::{collections::HashMap, fs, io, path::PathBuf};

use ipnet::Ipv6Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use wgkex_common::PublicKey;

use super::{IpamBackend, IpamError, PrefixAssignment};

#[derive(Debug, Serialize, Deserialize)]
struct State {
    parent_prefix: Ipv6Net,
    ranges: HashMap<String, Ipv6Net>,
}

pub struct JsonFileIpam {
    path: PathBuf,
    state: Mutex<State>,
}

impl JsonFileIpam {
    pub fn new(path: PathBuf, default_parent: Ipv6Net) -> Result<Self, IpamError> {
        let state = Self::read(&path, default_parent)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn read(path: &PathBuf, default_parent: Ipv6Net) -> Result<State, IpamError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(State {
                parent_prefix: default_parent,
                ranges: HashMap::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write-then-rename so a reader never observes a partially written file.
    fn persist(&self, state: &State) -> Result<(), IpamError> {
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl IpamBackend for JsonFileIpam {
    fn get_or_allocate_prefix(
        &self,
        pubkey: &PublicKey,
        _want_v4: bool,
        want_v6: bool,
        _v4_len: u8,
        v6_len: u8,
    ) -> Result<PrefixAssignment, IpamError> {
        if !want_v6 {
            return Ok(PrefixAssignment {
                v4: None,
                v6: None,
                selected_workers: vec![],
            });
        }

        let mut state = self.state.lock();
        let key = pubkey.to_string();

        if let Some(existing) = state.ranges.get(&key) {
            if state.parent_prefix.contains(existing) {
                return Ok(PrefixAssignment {
                    v4: None,
                    v6: Some(*existing),
                    selected_workers: vec![],
                });
            }
            // Stale: the parent prefix changed since this range was allocated. Fall
            // through and reassign, per the source's `subnet_of(parent_prefix)` check.
        }

        let mut subnets = state
            .parent_prefix
            .subnets(v6_len)
            .map_err(|_| IpamError::Config("v6_len must be >= the parent prefix length".into()))?;
        subnets.next(); // the first /v6_len subnet of the parent is reserved, per the source.
        let taken_in_parent: Vec<Ipv6Net> = state
            .ranges
            .values()
            .filter(|existing| state.parent_prefix.contains(*existing))
            .copied()
            .collect();
        let allocated = subnets
            .find(|candidate| !taken_in_parent.contains(candidate))
            .ok_or(IpamError::ParentExhausted)?;

        state.ranges.insert(key, allocated);
        self.persist(&state)?;

        Ok(PrefixAssignment {
            v4: None,
            v6: Some(allocated),
            selected_workers: vec![],
        })
    }

    fn release_prefix(&self, _pubkey: &PublicKey) -> Result<(), IpamError> {
        Err(IpamError::NotImplemented)
    }

    fn update_prefix(
        &self,
        _pubkey: &PublicKey,
        _v4: Option<ipnet::Ipv4Net>,
        _v6: Option<Ipv6Net>,
        _selected_workers: &[String],
    ) -> Result<(), IpamError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubkey(s: &str) -> PublicKey {
        s.parse().unwrap()
    }

    #[test]
    fn allocation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = JsonFileIpam::new(
            dir.path().join("ranges.json"),
            "2001:db8:ed0::/56".parse().unwrap(),
        )
        .unwrap();
        let key = pubkey("o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=");

        let first = ipam.get_or_allocate_prefix(&key, false, true, 0, 63).unwrap();
        let second = ipam.get_or_allocate_prefix(&key, false, true, 0, 63).unwrap();
        assert_eq!(first, second);
        assert!(first.v6.unwrap().prefix_len() == 63);
    }

    #[test]
    fn distinct_pubkeys_get_disjoint_subnets_of_the_parent() {
        let dir = tempfile::tempdir().unwrap();
        let parent: Ipv6Net = "2001:db8:ed0::/56".parse().unwrap();
        let ipam = JsonFileIpam::new(dir.path().join("ranges.json"), parent).unwrap();
        let a = pubkey("o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=");
        let b = pubkey("HIgo9xNZhE6y8o9ao9UZVbasFOBGKlTvHbad2Z1Ozno=");

        let a_prefix = ipam.get_or_allocate_prefix(&a, false, true, 0, 63).unwrap().v6.unwrap();
        let b_prefix = ipam.get_or_allocate_prefix(&b, false, true, 0, 63).unwrap().v6.unwrap();

        assert_ne!(a_prefix, b_prefix);
        assert!(parent.contains(&a_prefix));
        assert!(parent.contains(&b_prefix));
    }

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranges.json");
        let key = pubkey("o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=");
        let parent: Ipv6Net = "2001:db8:ed0::/56".parse().unwrap();

        let allocated = {
            let ipam = JsonFileIpam::new(path.clone(), parent).unwrap();
            ipam.get_or_allocate_prefix(&key, false, true, 0, 63).unwrap().v6.unwrap()
        };

        let ipam = JsonFileIpam::new(path, parent).unwrap();
        let reread = ipam.get_or_allocate_prefix(&key, false, true, 0, 63).unwrap().v6.unwrap();
        assert_eq!(allocated, reread);
    }

    #[test]
    fn release_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = JsonFileIpam::new(
            dir.path().join("ranges.json"),
            "2001:db8:ed0::/56".parse().unwrap(),
        )
        .unwrap();
        let key = pubkey("o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=");
        assert!(matches!(ipam.release_prefix(&key), Err(IpamError::NotImplemented)));
    }
}
