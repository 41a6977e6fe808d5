//! Kernel-level peer installation: WireGuard peer set/remove, the peer's
//! IPv6 `/128` route, and its bridge-FDB entry. Grounded on
//! `original_source/wgkex/worker/netlink.py` (ordering, field shapes) and
//! on `shared/src/netlink.rs` (the teacher's own raw rtnetlink request
//! style, reused via the kept `netlink-request` crate instead of opening a
//! socket by hand).

use std::{net::Ipv6Addr, time::{Duration, SystemTime}};

use netlink_packet_core::{NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST};
use netlink_packet_route::{
    constants::*,
    neighbour::{Nla as NeighbourNla, NeighbourHeader, NeighbourMessage},
    route::Nla as RouteNla,
    RouteHeader, RouteMessage, RtnlMessage,
};
use wgkex_common::{lladdr::lladdr, Domain, PublicKey};
use wireguard_control::{Backend, Device, DeviceUpdate, InterfaceName, Key, PeerConfigBuilder};

use crate::error::WorkerError;

/// WireGuard keepalive set on every installed peer, matching
/// `original_source/wgkex/worker/netlink.py::wireguard_handler`.
const PERSISTENT_KEEPALIVE_SECS: u16 = 15;

/// A peer whose last handshake is older than this is considered stale and
/// evicted by the flusher. See spec.md §4.9.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(3 * 3600);

/// A peer whose last handshake is within this window counts toward the
/// `connected_peers` metric. See spec.md §4.7 "Periodic metrics loop".
pub const CONNECTED_THRESHOLD: Duration = Duration::from_secs(3 * 60);

/// A peer to install or remove, fully determined by its public key and
/// domain. See spec.md §3 "Peer (worker-side)".
#[derive(Clone, Debug)]
pub struct WireGuardClient {
    pub public_key: PublicKey,
    pub domain: Domain,
    pub remove: bool,
}

impl WireGuardClient {
    pub fn lladdr(&self) -> Ipv6Addr {
        lladdr(&self.public_key).addr()
    }
}

/// Outcome of each of the three sub-operations; a failure in one does not
/// prevent the others from running, per spec.md §4.8.
#[derive(Debug, Default)]
pub struct LinkResult {
    pub wireguard: Option<WorkerError>,
    pub route: Option<WorkerError>,
    pub bridge_fdb: Option<WorkerError>,
}

impl LinkResult {
    pub fn is_ok(&self) -> bool {
        self.wireguard.is_none() && self.route.is_none() && self.bridge_fdb.is_none()
    }
}

/// Installs or removes `client`'s kernel state: WireGuard peer, then route,
/// then bridge FDB entry (spec.md §4.8 ordering).
pub fn link_handler(client: &WireGuardClient) -> LinkResult {
    let mut result = LinkResult::default();
    result.wireguard = wireguard_handler(client).err();
    result.route = route_handler(client).err();
    result.bridge_fdb = bridge_fdb_handler(client).err();
    result
}

fn wireguard_handler(client: &WireGuardClient) -> Result<(), WorkerError> {
    let key = Key::from_base64(&client.public_key)
        .map_err(|_| WorkerError::InvalidKey(client.public_key.to_string()))?;
    let iface: InterfaceName = client
        .domain
        .wg_interface()
        .parse()
        .map_err(|_| WorkerError::InvalidKey(client.domain.wg_interface()))?;

    let update = if client.remove {
        DeviceUpdate::new().remove_peer_by_key(&key)
    } else {
        let peer = PeerConfigBuilder::new(&key)
            .replace_allowed_ips()
            .add_allowed_ip(client.lladdr().into(), 128)
            .set_persistent_keepalive_interval(PERSISTENT_KEEPALIVE_SECS);
        DeviceUpdate::new().add_peer(peer)
    };

    update.apply(&iface, Backend::default()).map_err(WorkerError::Netlink)
}

fn route_handler(client: &WireGuardClient) -> Result<(), WorkerError> {
    let iface_name = client.domain.wg_interface();
    let if_index = interface_index(&iface_name)?;

    let mut message = RouteMessage {
        header: RouteHeader {
            table: RT_TABLE_MAIN,
            protocol: RTPROT_BOOT,
            scope: RT_SCOPE_UNIVERSE,
            kind: RTN_UNICAST,
            address_family: AF_INET6 as u8,
            destination_prefix_length: 128,
            ..Default::default()
        },
        nlas: vec![],
    };
    message.nlas.push(RouteNla::Destination(client.lladdr().octets().to_vec()));
    message.nlas.push(RouteNla::Oif(if_index));

    let rtnl_message = if client.remove {
        RtnlMessage::DelRoute(message)
    } else {
        RtnlMessage::NewRoute(message)
    };
    let flags = Some(if client.remove {
        NLM_F_REQUEST | NLM_F_ACK
    } else {
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_EXCL | NLM_F_CREATE
    });

    send_rtnl(rtnl_message, flags)
}

fn bridge_fdb_handler(client: &WireGuardClient) -> Result<(), WorkerError> {
    let iface_name = client.domain.vx_interface();
    let if_index = interface_index(&iface_name)?;

    let message = NeighbourMessage {
        header: NeighbourHeader {
            family: AF_BRIDGE as u8,
            ifindex: if_index,
            state: NUD_PERMANENT,
            flags: NTF_SELF,
            ntype: 0,
        },
        nlas: vec![
            NeighbourNla::Destination(client.lladdr().octets().to_vec()),
            NeighbourNla::LinkLocalAddress(vec![0, 0, 0, 0, 0, 0]),
        ],
    };

    let rtnl_message = if client.remove {
        RtnlMessage::DelNeighbour(message)
    } else {
        RtnlMessage::NewNeighbour(message)
    };
    let flags = Some(if client.remove {
        NLM_F_REQUEST | NLM_F_ACK
    } else {
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE
    });

    send_rtnl(rtnl_message, flags)
}

fn send_rtnl(message: RtnlMessage, flags: Option<u16>) -> Result<(), WorkerError> {
    let responses = netlink_request::netlink_request_rtnl(message, flags)?;
    for response in responses {
        if let NetlinkPayload::Error(e) = response.payload {
            if e.code != 0 {
                return Err(WorkerError::Netlink(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("netlink error {}", e.code),
                )));
            }
        }
    }
    Ok(())
}

/// Public keys of peers on `domain`'s WireGuard interface whose last
/// handshake is older than [`STALE_THRESHOLD`] (or who have never
/// handshaked at all).
pub fn find_stale_wireguard_clients(domain: &Domain) -> Result<Vec<PublicKey>, WorkerError> {
    let iface: InterfaceName = domain
        .wg_interface()
        .parse()
        .map_err(|_| WorkerError::InvalidKey(domain.wg_interface()))?;
    let device = Device::get(&iface, Backend::default()).map_err(WorkerError::Netlink)?;

    let now = SystemTime::now();
    let stale = device
        .peers
        .into_iter()
        .filter(|peer| match peer.stats.last_handshake_time {
            Some(t) => now.duration_since(t).unwrap_or_default() >= STALE_THRESHOLD,
            None => true,
        })
        .filter_map(|peer| peer.config.public_key.to_base64().parse().ok())
        .collect();

    Ok(stale)
}

/// Removes every stale peer on `domain`'s interface, returning the results
/// of each removal attempt. Mirrors
/// `original_source/wgkex/worker/netlink.py::wg_flush_stale_peers`.
pub fn flush_stale_peers(domain: &Domain) -> Result<Vec<LinkResult>, WorkerError> {
    let stale = find_stale_wireguard_clients(domain)?;
    Ok(stale
        .into_iter()
        .map(|public_key| {
            link_handler(&WireGuardClient {
                public_key,
                domain: domain.clone(),
                remove: true,
            })
        })
        .collect())
}

/// This worker's interface-level state: its listen port, its own public
/// key, and its lladdr (the address the broker publishes in
/// `WorkerEndpoint`). See spec.md §4.2.
pub struct DeviceData {
    pub public_key: PublicKey,
    pub listen_port: u16,
    pub link_address: Ipv6Addr,
}

pub fn get_device_data(domain: &Domain) -> Result<DeviceData, WorkerError> {
    let iface: InterfaceName = domain
        .wg_interface()
        .parse()
        .map_err(|_| WorkerError::InvalidKey(domain.wg_interface()))?;
    let device = Device::get(&iface, Backend::default()).map_err(WorkerError::Netlink)?;

    let public_key = device
        .public_key
        .ok_or_else(|| WorkerError::InterfaceNotFound(iface))?;
    let public_key: PublicKey = public_key
        .to_base64()
        .parse()
        .map_err(|_| WorkerError::InvalidKey(public_key.to_base64()))?;
    let listen_port = device.listen_port.unwrap_or_default();
    let link_address = lladdr(&public_key).addr();

    Ok(DeviceData { public_key, listen_port, link_address })
}

/// Counts peers on `domain`'s WireGuard interface whose last handshake is
/// within [`CONNECTED_THRESHOLD`]. Retries exactly once if the netlink dump
/// was interrupted by a concurrent device change.
pub fn count_connected_peers(domain: &Domain) -> Result<i64, WorkerError> {
    match count_connected_peers_once(domain) {
        Err(WorkerError::Netlink(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
            count_connected_peers_once(domain)
        },
        other => other,
    }
}

fn count_connected_peers_once(domain: &Domain) -> Result<i64, WorkerError> {
    let iface: InterfaceName = domain
        .wg_interface()
        .parse()
        .map_err(|_| WorkerError::InvalidKey(domain.wg_interface()))?;
    let device = Device::get(&iface, Backend::default()).map_err(WorkerError::Netlink)?;

    let now = SystemTime::now();
    let count = device
        .peers
        .iter()
        .filter(|peer| {
            peer.stats
                .last_handshake_time
                .map(|t| now.duration_since(t).unwrap_or_default() < CONNECTED_THRESHOLD)
                .unwrap_or(false)
        })
        .count();

    Ok(count as i64)
}

fn interface_index(name: &str) -> Result<u32, WorkerError> {
    let cname = std::ffi::CString::new(name).map_err(|_| WorkerError::InvalidKey(name.to_owned()))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(WorkerError::Netlink(std::io::Error::last_os_error()));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lladdr_is_link_local() {
        let client = WireGuardClient {
            public_key: "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=".parse().unwrap(),
            domain: Domain::new("ffmuc_welt".to_owned(), "welt".to_owned()),
            remove: false,
        };
        assert!(client.lladdr().segments()[0] == 0xfe80);
    }
}
