//! The decoded packet (§3): one struct holding every layer's optional
//! header view plus the decoder-event set, alert set, and tunnel linkage.

use crate::events::EventSet;
use crate::ipv4::Ipv4Header;
use crate::ipv6::Ipv6Header;
use crate::link::{EthernetHeader, PppHeader, PppoeDiscoveryHeader, PppoeSessionHeader, SllHeader, VlanHeader};
use crate::transport::{GreHeader, IcmpHeader, TcpHeader, UdpHeader};
use aegis_common::{Address, AlertSet};

/// Upper bound on captured bytes a packet may carry: the widest possible
/// IP header plus a full 64K datagram plus slack for link-layer trailers.
pub const MAX_PACKET_BYTES: usize = crate::ipv6::IPV6_HEADER_LEN + 65536 + 28;

/// Index into a `PacketPool`'s arena, standing in for the original's raw
/// `root` back-pointer (Design Note §9: arena index avoids ownership cycles).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketId(pub usize);

#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub src: Option<Address>,
    pub dst: Option<Address>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub icmp_type: Option<u8>,
    pub icmp_code: Option<u8>,
    pub protocol: Option<u8>,
    pub recursion_level: u8,

    pub eth: Option<EthernetHeader>,
    pub sll: Option<SllHeader>,
    pub vlan: Option<VlanHeader>,
    pub ppp: Option<PppHeader>,
    pub pppoe_session: Option<PppoeSessionHeader>,
    pub pppoe_discovery: Option<PppoeDiscoveryHeader>,
    pub gre: Option<GreHeader>,
    pub ip4h: Option<Ipv4Header>,
    pub ip6h: Option<Ipv6Header>,
    pub tcph: Option<TcpHeader>,
    pub udph: Option<UdpHeader>,
    pub icmp4: Option<IcmpHeader>,
    pub icmp6: Option<IcmpHeader>,

    pub events: EventSet,
    pub alerts: AlertSet,

    bytes: Vec<u8>,
    payload_offset: Option<usize>,
    payload_len: usize,

    pub is_tunnel: bool,
    pub suppress_payload_inspection: bool,
    pub root: Option<PacketId>,
}

impl Packet {
    /// Fresh packet with zeroed fields and checksum caches unset, as if
    /// just taken from the pool (§5 "Packet lifecycle").
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bytes(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= MAX_PACKET_BYTES);
        self.bytes = data.to_vec();
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn set_payload(&mut self, offset: usize, len: usize) {
        debug_assert!(offset + len <= self.bytes.len());
        self.payload_offset = Some(offset);
        self.payload_len = len;
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload_offset.map(|off| &self.bytes[off..off + self.payload_len])
    }

    /// Exactly one of `ip4h`/`ip6h` is present for non-decoder-event traffic.
    pub fn has_consistent_ip_headers(&self) -> bool {
        if self.ip4h.is_some() && self.ip6h.is_some() {
            return false;
        }
        if self.ip4h.is_none() && self.ip6h.is_none() {
            return self.events.is_empty();
        }
        true
    }

    /// Reset to a state byte-equivalent to a freshly-initialized packet
    /// (§8's recycle round-trip property), aside from any pool-managed
    /// mutex identity, which this crate does not model.
    pub fn recycle(&mut self) {
        *self = Packet::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycle_matches_fresh_packet() {
        let mut p = Packet::new();
        p.set_bytes(&[1, 2, 3]);
        p.protocol = Some(6);
        p.events.set(crate::events::DecoderEvent::Ipv4TruncPkt);
        p.recycle();
        let fresh = Packet::new();
        assert_eq!(p.bytes(), fresh.bytes());
        assert_eq!(p.protocol, fresh.protocol);
        assert!(p.events.is_empty());
    }

    #[test]
    fn payload_pointer_stays_within_storage() {
        let mut p = Packet::new();
        p.set_bytes(&[0u8; 40]);
        p.set_payload(20, 20);
        assert_eq!(p.payload().unwrap().len(), 20);
    }
}
