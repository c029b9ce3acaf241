//! Per-packet decode dispatch (driver for component C3): linktype -> link
//! layer -> IPv4/IPv6 -> transport, filling one [`Packet`] the way the
//! original decoder chains `DecodeEthernet` -> `DecodeIPV4` -> `DecodeTCP`
//! into `p->{ip4h,tcph,...}`. `aegis_decode` supplies the per-layer decoders;
//! this module only owns the dispatch order.

use aegis_decode::events::EventSet;
use aegis_decode::ipv4::decode_ipv4;
use aegis_decode::ipv6::{decode_ipv6, IPV6_HEADER_LEN};
use aegis_decode::link::{self, linktype, EtherType};
use aegis_decode::transport::{
    decode_gre, decode_icmpv4, decode_icmpv6, decode_tcp, decode_udp, ICMP_HEADER_MIN_LEN,
    UDP_HEADER_LEN,
};
use aegis_decode::{DecodeThreadCtx, Packet};

/// Nested 802.1Q tags beyond this depth are left undecoded (matches the
/// original decoder's two-layer QinQ guard).
const MAX_VLAN_LAYERS: u8 = 2;

/// PPP protocol field values (RFC 1661 assigned numbers) carrying IP.
const PPP_PROTO_IPV4: u16 = 0x0021;
const PPP_PROTO_IPV6: u16 = 0x0057;

/// Decode one captured frame under `linktype` into `packet`. Never fails:
/// truncated or unrecognized input raises decoder events and leaves the
/// later layers unset rather than returning an error, per §7's "decoder
/// never aborts on malformed input" contract.
pub fn decode_packet(linktype: u32, bytes: &[u8], ctx: &mut DecodeThreadCtx, packet: &mut Packet) {
    ctx.stats.record_packet(bytes.len());
    let mut events = EventSet::new();

    let ip_bytes = match linktype {
        linktype::ETHERNET => link::decode_ethernet(bytes, &mut events)
            .and_then(|(hdr, rest)| {
                let ethertype = hdr.ethertype;
                packet.eth = Some(hdr);
                resolve_link_payload(ethertype, rest, &mut events, packet)
            }),
        linktype::LINUX_SLL => link::decode_sll(bytes, &mut events).and_then(|(hdr, rest)| {
            let ethertype = ethertype_from_raw(hdr.protocol);
            packet.sll = Some(hdr);
            resolve_link_payload(ethertype, rest, &mut events, packet)
        }),
        linktype::PPP => link::decode_ppp(bytes, &mut events).and_then(|(hdr, rest)| {
            packet.ppp = Some(hdr.clone());
            if hdr.protocol == PPP_PROTO_IPV4 || hdr.protocol == PPP_PROTO_IPV6 {
                Some(rest)
            } else {
                None
            }
        }),
        linktype::RAW_A | linktype::RAW_B => Some(link::decode_raw(bytes)),
        _ => Some(bytes),
    };

    if let Some(ip_bytes) = ip_bytes {
        decode_ip_and_transport(ip_bytes, &mut events, packet);
    }

    for event in events.iter() {
        ctx.stats.record_event(*event);
    }
    packet.events = events;
}

/// Walk VLAN tags and PPPoE framing down to the first IP-layer byte,
/// returning `None` once an unrecognized or discovery-only ethertype is hit.
fn resolve_link_payload<'a>(
    ethertype: EtherType,
    mut rest: &'a [u8],
    events: &mut EventSet,
    packet: &mut Packet,
) -> Option<&'a [u8]> {
    let mut current = ethertype;
    let mut vlan_layers = 0u8;
    loop {
        match current {
            EtherType::Ipv4 | EtherType::Ipv6 => return Some(rest),
            EtherType::Vlan => {
                if vlan_layers >= MAX_VLAN_LAYERS {
                    return None;
                }
                let (hdr, inner) = link::decode_vlan(rest, events)?;
                current = hdr.ethertype;
                if packet.vlan.is_none() {
                    packet.vlan = Some(hdr);
                }
                rest = inner;
                vlan_layers += 1;
            }
            EtherType::PppoeSession => {
                let (hdr, inner) = link::decode_pppoe_session(rest, events)?;
                packet.pppoe_session = Some(hdr);
                let (ppp_hdr, ppp_rest) = link::decode_ppp(inner, events)?;
                current = if ppp_hdr.protocol == PPP_PROTO_IPV6 { EtherType::Ipv6 } else { EtherType::Ipv4 };
                packet.ppp = Some(ppp_hdr);
                rest = ppp_rest;
            }
            EtherType::PppoeDiscovery => {
                let (hdr, _) = link::decode_pppoe_discovery(rest, events)?;
                packet.pppoe_discovery = Some(hdr);
                return None;
            }
            EtherType::Other(_) => return None,
        }
    }
}

fn ethertype_from_raw(v: u16) -> EtherType {
    match v {
        0x0800 => EtherType::Ipv4,
        0x86dd => EtherType::Ipv6,
        0x8100 => EtherType::Vlan,
        0x8863 => EtherType::PppoeDiscovery,
        0x8864 => EtherType::PppoeSession,
        other => EtherType::Other(other),
    }
}

fn decode_ip_and_transport(bytes: &[u8], events: &mut EventSet, packet: &mut Packet) {
    let Some(&first) = bytes.first() else { return };
    match first >> 4 {
        4 => {
            if let Some(hdr) = decode_ipv4(bytes, events) {
                let hlen = hdr.header_len();
                let end = (hdr.total_len as usize).min(bytes.len());
                let proto = hdr.protocol;
                packet.src = Some(hdr.src);
                packet.dst = Some(hdr.dst);
                packet.protocol = Some(proto);
                packet.ip4h = Some(hdr);
                let payload = if hlen <= end { &bytes[hlen..end] } else { &[][..] };
                decode_transport(proto, payload, events, packet);
            }
        }
        6 => {
            if let Some(hdr) = decode_ipv6(bytes, events) {
                let proto = hdr.next_header;
                let end = (IPV6_HEADER_LEN + hdr.payload_len as usize).min(bytes.len());
                packet.src = Some(hdr.src);
                packet.dst = Some(hdr.dst);
                packet.protocol = Some(proto);
                packet.ip6h = Some(hdr);
                let payload = if IPV6_HEADER_LEN <= end { &bytes[IPV6_HEADER_LEN..end] } else { &[][..] };
                decode_transport(proto, payload, events, packet);
            }
        }
        _ => {}
    }
}

/// IP protocol numbers (IANA).
mod proto {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ICMP: u8 = 1;
    pub const ICMPV6: u8 = 58;
    pub const GRE: u8 = 47;
}

fn decode_transport(ip_proto: u8, payload: &[u8], events: &mut EventSet, packet: &mut Packet) {
    match ip_proto {
        proto::TCP => {
            if let Some(hdr) = decode_tcp(payload, events) {
                packet.src_port = Some(hdr.src_port);
                packet.dst_port = Some(hdr.dst_port);
                let hlen = hdr.data_offset as usize * 4;
                let inner = if hlen <= payload.len() { &payload[hlen..] } else { &[][..] };
                packet.tcph = Some(hdr);
                set_final_payload(packet, inner);
            }
        }
        proto::UDP => {
            if let Some(hdr) = decode_udp(payload, events) {
                packet.src_port = Some(hdr.src_port);
                packet.dst_port = Some(hdr.dst_port);
                let inner = &payload[UDP_HEADER_LEN.min(payload.len())..];
                packet.udph = Some(hdr);
                set_final_payload(packet, inner);
            }
        }
        proto::ICMP => {
            if let Some(hdr) = decode_icmpv4(payload, events) {
                packet.icmp_type = Some(hdr.icmp_type);
                packet.icmp_code = Some(hdr.icmp_code);
                let inner = &payload[ICMP_HEADER_MIN_LEN.min(payload.len())..];
                packet.icmp4 = Some(hdr);
                set_final_payload(packet, inner);
            }
        }
        proto::ICMPV6 => {
            if let Some(hdr) = decode_icmpv6(payload, events) {
                packet.icmp_type = Some(hdr.icmp_type);
                packet.icmp_code = Some(hdr.icmp_code);
                let inner = &payload[ICMP_HEADER_MIN_LEN.min(payload.len())..];
                packet.icmp6 = Some(hdr);
                set_final_payload(packet, inner);
            }
        }
        proto::GRE => {
            if let Some(hdr) = decode_gre(payload, packet.recursion_level, events) {
                let mut hlen = 4usize;
                if hdr.has_checksum {
                    hlen += 4;
                }
                if hdr.has_key {
                    hlen += 4;
                }
                if hdr.has_seq {
                    hlen += 4;
                }
                let inner = if hlen <= payload.len() { &payload[hlen..] } else { &[][..] };
                packet.gre = Some(hdr);
                set_final_payload(packet, inner);
            }
        }
        _ => set_final_payload(packet, payload),
    }
}

fn set_final_payload(packet: &mut Packet, payload: &[u8]) {
    packet.set_bytes(payload);
    packet.set_payload(0, payload.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_decode::link::ETHERNET_HEADER_LEN;

    fn eth_ipv4_tcp(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; ETHERNET_HEADER_LEN];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let total_len = (20 + 20 + payload.len()) as u16;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[9] = 6; // TCP
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&4444u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[12] = 5 << 4;

        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&tcp);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn ethernet_ipv4_tcp_fills_every_layer_and_payload() {
        let frame = eth_ipv4_tcp(b"GET / HTTP/1.1\r\n");
        let mut ctx = DecodeThreadCtx::new();
        let mut packet = Packet::new();
        decode_packet(linktype::ETHERNET, &frame, &mut ctx, &mut packet);

        assert!(packet.eth.is_some());
        assert!(packet.ip4h.is_some());
        assert!(packet.tcph.is_some());
        assert_eq!(packet.src_port, Some(4444));
        assert_eq!(packet.dst_port, Some(80));
        assert_eq!(packet.payload(), Some(&b"GET / HTTP/1.1\r\n"[..]));
        assert_eq!(ctx.stats.pkts.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn truncated_ethernet_frame_raises_event_and_leaves_layers_unset() {
        let frame = vec![0u8; 4];
        let mut ctx = DecodeThreadCtx::new();
        let mut packet = Packet::new();
        decode_packet(linktype::ETHERNET, &frame, &mut ctx, &mut packet);

        assert!(packet.eth.is_none());
        assert!(packet.events.contains(aegis_decode::DecoderEvent::EthernetHeaderTooSmall));
    }

    #[test]
    fn raw_linktype_skips_link_layer() {
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&20u16.to_be_bytes());
        ip[9] = 17; // UDP, but payload too short to decode further
        let mut ctx = DecodeThreadCtx::new();
        let mut packet = Packet::new();
        decode_packet(linktype::RAW_A, &ip, &mut ctx, &mut packet);
        assert!(packet.ip4h.is_some());
    }
}
