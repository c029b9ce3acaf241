//! Transport and ICMP layer decoding: TCP, UDP, ICMPv4/6, GRE.

use crate::checksum::ChecksumCache;
use crate::events::{DecoderEvent, EventSet};

#[derive(Clone, Debug)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data_offset: u8,
    pub flags: u8,
    pub window: u16,
    pub checksum_wire: u16,
    pub urgent: u16,
    pub csum_cache: ChecksumCache,
}

pub const TCP_HEADER_MIN_LEN: usize = 20;

/// Decode a TCP header. Per §3's invariant, a non-null `tcph` implies the
/// full declared header length is present and the data offset is sane.
pub fn decode_tcp(bytes: &[u8], events: &mut EventSet) -> Option<TcpHeader> {
    if bytes.len() < TCP_HEADER_MIN_LEN {
        events.set(DecoderEvent::TcpPktTooSmall);
        return None;
    }
    let data_offset = bytes[12] >> 4;
    let hlen = data_offset as usize * 4;
    if hlen < TCP_HEADER_MIN_LEN || bytes.len() < hlen {
        events.set(DecoderEvent::TcpHlenTooSmall);
        return None;
    }
    Some(TcpHeader {
        src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
        dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
        seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        data_offset,
        flags: bytes[13],
        window: u16::from_be_bytes([bytes[14], bytes[15]]),
        checksum_wire: u16::from_be_bytes([bytes[16], bytes[17]]),
        urgent: u16::from_be_bytes([bytes[18], bytes[19]]),
        csum_cache: ChecksumCache::new(),
    })
}

#[derive(Clone, Debug)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub len: u16,
    pub checksum_wire: u16,
    pub csum_cache: ChecksumCache,
}

pub const UDP_HEADER_LEN: usize = 8;

pub fn decode_udp(bytes: &[u8], events: &mut EventSet) -> Option<UdpHeader> {
    if bytes.len() < UDP_HEADER_LEN {
        events.set(DecoderEvent::UdpPktTooSmall);
        return None;
    }
    let len = u16::from_be_bytes([bytes[4], bytes[5]]);
    if (len as usize) < UDP_HEADER_LEN || bytes.len() < len as usize {
        events.set(DecoderEvent::UdpHlenInvalid);
        return None;
    }
    Some(UdpHeader {
        src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
        dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
        len,
        checksum_wire: u16::from_be_bytes([bytes[6], bytes[7]]),
        csum_cache: ChecksumCache::new(),
    })
}

#[derive(Clone, Debug)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub checksum_wire: u16,
}

pub const ICMP_HEADER_MIN_LEN: usize = 4;

pub fn decode_icmpv4(bytes: &[u8], events: &mut EventSet) -> Option<IcmpHeader> {
    decode_icmp_common(bytes, events)
}

pub fn decode_icmpv6(bytes: &[u8], events: &mut EventSet) -> Option<IcmpHeader> {
    decode_icmp_common(bytes, events)
}

fn decode_icmp_common(bytes: &[u8], events: &mut EventSet) -> Option<IcmpHeader> {
    if bytes.len() < ICMP_HEADER_MIN_LEN {
        events.set(DecoderEvent::IcmpPktTooSmall);
        return None;
    }
    Some(IcmpHeader {
        icmp_type: bytes[0],
        icmp_code: bytes[1],
        checksum_wire: u16::from_be_bytes([bytes[2], bytes[3]]),
    })
}

#[derive(Clone, Debug)]
pub struct GreHeader {
    pub version: u8,
    pub protocol: u16,
    pub has_checksum: bool,
    pub has_key: bool,
    pub has_seq: bool,
}

pub const GRE_HEADER_MIN_LEN: usize = 4;

/// GRE version 1 (PPTP enhanced GRE) recursing into itself is an anomaly,
/// not a protocol error, per the original decoder's tolerant stance.
pub fn decode_gre(bytes: &[u8], recursion_level: u8, events: &mut EventSet) -> Option<GreHeader> {
    if bytes.len() < GRE_HEADER_MIN_LEN {
        events.set(DecoderEvent::GrePktTooSmall);
        return None;
    }
    let flags_version = u16::from_be_bytes([bytes[0], bytes[1]]);
    let version = (flags_version & 0x7) as u8;
    if version == 1 && recursion_level > 0 {
        events.set(DecoderEvent::GreVersion1Recur);
    }
    Some(GreHeader {
        version,
        protocol: u16::from_be_bytes([bytes[2], bytes[3]]),
        has_checksum: flags_version & 0x8000 != 0,
        has_key: flags_version & 0x2000 != 0,
        has_seq: flags_version & 0x1000 != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_full_header_required() {
        let mut bytes = vec![0u8; TCP_HEADER_MIN_LEN];
        bytes[12] = 5 << 4; // data_offset = 5 -> 20 bytes
        let mut events = EventSet::new();
        assert!(decode_tcp(&bytes, &mut events).is_some());
    }

    #[test]
    fn tcp_short_header_raises_event() {
        let bytes = vec![0u8; 10];
        let mut events = EventSet::new();
        assert!(decode_tcp(&bytes, &mut events).is_none());
        assert!(events.contains(DecoderEvent::TcpPktTooSmall));
    }

    #[test]
    fn udp_len_shorter_than_buffer_is_rejected() {
        let mut bytes = vec![0u8; 8];
        bytes[4] = 0;
        bytes[5] = 4; // declares len=4, below UDP_HEADER_LEN
        let mut events = EventSet::new();
        assert!(decode_udp(&bytes, &mut events).is_none());
    }
}
