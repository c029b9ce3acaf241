//! `decode_tunnel`: dispatch an inner payload found inside IPv4-in-IPv4,
//! IPv6-in-IPv4, GRE, or PPP, via a pseudo-packet linked to the outer root.

use crate::events::EventSet;
use crate::ipv4::decode_ipv4;
use crate::ipv6::decode_ipv6;
use crate::packet::PacketId;
use crate::pool::PacketPool;

/// Protocol numbers this decoder recognizes as tunnel encapsulation.
pub mod inner_proto {
    pub const IPV4: u8 = 4;
    pub const IPV6: u8 = 41;
    pub const GRE: u8 = 47;
}

/// Build a pseudo-packet for the inner payload and decode its IP header
/// far enough to populate addresses; returns the new packet's id.
pub fn decode_tunnel(
    pool: &mut PacketPool,
    parent: PacketId,
    inner_bytes: &[u8],
    inner_proto: u8,
) -> Option<PacketId> {
    let child = pool.pseudo_setup(parent, inner_bytes, inner_proto)?;
    let mut events = EventSet::new();
    match inner_proto {
        inner_proto::IPV4 => {
            if let Some(hdr) = decode_ipv4(inner_bytes, &mut events) {
                let p = pool.get_mut(child);
                p.src = Some(hdr.src);
                p.dst = Some(hdr.dst);
                p.protocol = Some(hdr.protocol);
                p.ip4h = Some(hdr);
            }
        }
        inner_proto::IPV6 => {
            if let Some(hdr) = decode_ipv6(inner_bytes, &mut events) {
                let p = pool.get_mut(child);
                p.src = Some(hdr.src);
                p.dst = Some(hdr.dst);
                p.protocol = Some(hdr.next_header);
                p.ip6h = Some(hdr);
            }
        }
        _ => {}
    }
    pool.get_mut(child).events = events;
    Some(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_inner_ipv4_populates_addresses() {
        let mut pool = PacketPool::new(4);
        let root = pool.alloc().unwrap();

        let mut inner = vec![0u8; 20];
        inner[0] = 0x45;
        inner[2] = 0;
        inner[3] = 20;
        inner[9] = 6;

        let child = decode_tunnel(&mut pool, root, &inner, inner_proto::IPV4).unwrap();
        assert!(pool.get(child).ip4h.is_some());
        assert_eq!(pool.get(child).root, Some(root));
    }
}
