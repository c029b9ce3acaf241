//! Link-layer decoding: Ethernet, Linux cooked capture (SLL), PPP, PPPoE, VLAN, raw.

use crate::events::{DecoderEvent, EventSet};

/// libpcap linktype codes (§6).
pub mod linktype {
    pub const ETHERNET: u32 = 1;
    pub const LINUX_SLL: u32 = 113;
    pub const PPP: u32 = 9;
    pub const RAW_A: u32 = 12;
    pub const RAW_B: u32 = 14;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Vlan,
    PppoeDiscovery,
    PppoeSession,
    Other(u16),
}

impl EtherType {
    fn from_u16(v: u16) -> Self {
        match v {
            0x0800 => EtherType::Ipv4,
            0x86dd => EtherType::Ipv6,
            0x8100 => EtherType::Vlan,
            0x8863 => EtherType::PppoeDiscovery,
            0x8864 => EtherType::PppoeSession,
            other => EtherType::Other(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EthernetHeader {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: EtherType,
}

pub const ETHERNET_HEADER_LEN: usize = 14;

pub fn decode_ethernet(bytes: &[u8], events: &mut EventSet) -> Option<(EthernetHeader, &[u8])> {
    if bytes.len() < ETHERNET_HEADER_LEN {
        events.set(DecoderEvent::EthernetHeaderTooSmall);
        return None;
    }
    let mut dst_mac = [0u8; 6];
    let mut src_mac = [0u8; 6];
    dst_mac.copy_from_slice(&bytes[0..6]);
    src_mac.copy_from_slice(&bytes[6..12]);
    let ethertype = EtherType::from_u16(u16::from_be_bytes([bytes[12], bytes[13]]));
    Some((
        EthernetHeader { dst_mac, src_mac, ethertype },
        &bytes[ETHERNET_HEADER_LEN..],
    ))
}

/// Linux cooked capture (SLL) header, used when libpcap has no real link layer.
pub const SLL_HEADER_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct SllHeader {
    pub packet_type: u16,
    pub protocol: u16,
}

pub fn decode_sll(bytes: &[u8], events: &mut EventSet) -> Option<(SllHeader, &[u8])> {
    if bytes.len() < SLL_HEADER_LEN {
        events.set(DecoderEvent::SllHeaderTooSmall);
        return None;
    }
    Some((
        SllHeader {
            packet_type: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol: u16::from_be_bytes([bytes[14], bytes[15]]),
        },
        &bytes[SLL_HEADER_LEN..],
    ))
}

pub const VLAN_HEADER_LEN: usize = 4;

#[derive(Clone, Debug)]
pub struct VlanHeader {
    pub priority: u8,
    pub vlan_id: u16,
    pub ethertype: EtherType,
}

pub fn decode_vlan(bytes: &[u8], events: &mut EventSet) -> Option<(VlanHeader, &[u8])> {
    if bytes.len() < VLAN_HEADER_LEN {
        events.set(DecoderEvent::VlanHeaderTooSmall);
        return None;
    }
    let tci = u16::from_be_bytes([bytes[0], bytes[1]]);
    Some((
        VlanHeader {
            priority: (tci >> 13) as u8,
            vlan_id: tci & 0x0fff,
            ethertype: EtherType::from_u16(u16::from_be_bytes([bytes[2], bytes[3]])),
        },
        &bytes[VLAN_HEADER_LEN..],
    ))
}

pub const PPP_HEADER_LEN: usize = 4;

#[derive(Clone, Debug)]
pub struct PppHeader {
    pub protocol: u16,
}

pub fn decode_ppp(bytes: &[u8], events: &mut EventSet) -> Option<(PppHeader, &[u8])> {
    if bytes.len() < 2 {
        events.set(DecoderEvent::PppHeaderTooSmall);
        return None;
    }
    // Address (0xff) + control (0x03) may be compressed away; protocol
    // is always the trailing two bytes of whichever form is present.
    let (protocol, rest) = if bytes.len() >= PPP_HEADER_LEN && bytes[0] == 0xff && bytes[1] == 0x03
    {
        (u16::from_be_bytes([bytes[2], bytes[3]]), &bytes[PPP_HEADER_LEN..])
    } else {
        (u16::from_be_bytes([bytes[0], bytes[1]]), &bytes[2..])
    };
    Some((PppHeader { protocol }, rest))
}

pub const PPPOE_SESSION_HEADER_LEN: usize = 6;
pub const PPPOE_DISCOVERY_HEADER_LEN: usize = 6;

#[derive(Clone, Debug)]
pub struct PppoeSessionHeader {
    pub version_type: u8,
    pub code: u8,
    pub session_id: u16,
    pub payload_len: u16,
}

pub fn decode_pppoe_session(
    bytes: &[u8],
    events: &mut EventSet,
) -> Option<(PppoeSessionHeader, &[u8])> {
    if bytes.len() < PPPOE_SESSION_HEADER_LEN {
        events.set(DecoderEvent::PppoeSessionHeaderTooSmall);
        return None;
    }
    Some((
        PppoeSessionHeader {
            version_type: bytes[0],
            code: bytes[1],
            session_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            payload_len: u16::from_be_bytes([bytes[4], bytes[5]]),
        },
        &bytes[PPPOE_SESSION_HEADER_LEN..],
    ))
}

#[derive(Clone, Debug)]
pub struct PppoeDiscoveryHeader {
    pub version_type: u8,
    pub code: u8,
    pub session_id: u16,
    pub payload_len: u16,
}

pub fn decode_pppoe_discovery(
    bytes: &[u8],
    events: &mut EventSet,
) -> Option<(PppoeDiscoveryHeader, &[u8])> {
    if bytes.len() < PPPOE_DISCOVERY_HEADER_LEN {
        events.set(DecoderEvent::PppoeDiscoveryHeaderTooSmall);
        return None;
    }
    Some((
        PppoeDiscoveryHeader {
            version_type: bytes[0],
            code: bytes[1],
            session_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            payload_len: u16::from_be_bytes([bytes[4], bytes[5]]),
        },
        &bytes[PPPOE_DISCOVERY_HEADER_LEN..],
    ))
}

/// Raw IP (`DLT_RAW`): no link header at all, the payload starts with the
/// IP version nibble.
pub fn decode_raw(bytes: &[u8]) -> &[u8] {
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_dispatches_on_ipv4_ethertype() {
        let mut bytes = vec![0u8; ETHERNET_HEADER_LEN];
        bytes[12] = 0x08;
        bytes[13] = 0x00;
        let mut events = EventSet::new();
        let (hdr, rest) = decode_ethernet(&bytes, &mut events).unwrap();
        assert_eq!(hdr.ethertype, EtherType::Ipv4);
        assert!(rest.is_empty());
    }

    #[test]
    fn vlan_extracts_id_and_inner_ethertype() {
        let mut bytes = vec![0u8; VLAN_HEADER_LEN];
        bytes[0] = 0x00;
        bytes[1] = 0x64; // vlan id 100
        bytes[2] = 0x08;
        bytes[3] = 0x00;
        let mut events = EventSet::new();
        let (hdr, _) = decode_vlan(&bytes, &mut events).unwrap();
        assert_eq!(hdr.vlan_id, 100);
        assert_eq!(hdr.ethertype, EtherType::Ipv4);
    }
}
