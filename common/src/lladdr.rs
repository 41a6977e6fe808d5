//! Deterministic derivation of a peer's IPv6 link-local address from its
//! WireGuard public key, matching the modified-EUI-64 scheme used by the
//! mesh's kernel interfaces.

use std::net::Ipv6Addr;

use ipnet::Ipv6Net;

/// Computes `lladdr(pubkey)`: a `fe80::/10`-scoped `/128` derived from
/// `mac2eui64("02:" + first-5-bytes(md5(pubkey || "\n")))`.
///
/// Deterministic: the same public key always yields the same address.
pub fn lladdr(pubkey: &str) -> Ipv6Net {
    let mut input = String::with_capacity(pubkey.len() + 1);
    input.push_str(pubkey);
    input.push('\n');
    let digest = md5::compute(input.as_bytes());

    let temp_mac = [0x02, digest[0], digest[1], digest[2], digest[3], digest[4]];
    let eui64 = mac_to_eui64(&temp_mac);

    let mut addr_bytes = [0u8; 16];
    addr_bytes[0] = 0xfe;
    addr_bytes[1] = 0x80;
    addr_bytes[8..].copy_from_slice(&eui64);

    Ipv6Net::new(Ipv6Addr::from(addr_bytes), 128).expect("/128 is always a valid prefix length")
}

/// Modified-EUI-64 expansion of a 6-byte MAC address: `fffe` is spliced in
/// after the first 3 bytes, and the universal/local bit of the first byte
/// is set (ORed, not XORed, matching the scheme this is derived from).
fn mac_to_eui64(mac: &[u8; 6]) -> [u8; 8] {
    [
        mac[0] | 0x02,
        mac[1],
        mac[2],
        0xff,
        0xfe,
        mac[3],
        mac[4],
        mac[5],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: &str = "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=";

    #[test]
    fn is_deterministic() {
        assert_eq!(lladdr(PUBKEY), lladdr(PUBKEY));
    }

    #[test]
    fn is_always_link_local_slash_128() {
        let addr = lladdr(PUBKEY);
        assert_eq!(addr.prefix_len(), 128);
        assert!(addr.addr().segments()[0] & 0xffc0 == 0xfe80);
    }

    #[test]
    fn differs_between_keys() {
        let other = "HIgo9xNZhE6y8o9ao9UZVbasFOBGKlTvHbad2Z1Ozno=";
        assert_ne!(lladdr(PUBKEY), lladdr(other));
    }

    #[test]
    fn universal_local_bit_is_set() {
        // byte 8 of the address is the first EUI-64 byte (0x02 | 0x02 == 0x02).
        let addr = lladdr(PUBKEY);
        let octets = addr.addr().octets();
        assert_eq!(octets[8] & 0x02, 0x02);
    }
}
