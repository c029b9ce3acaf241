//! IPv4 decoding (§4.1) — the richest layer: header validation, the option
//! sub-machine, and dispatch to the next layer.

use crate::checksum::{ipv4_header_checksum, ChecksumCache};
use crate::events::{DecoderEvent, EventSet};
use aegis_common::Address;

pub const IPV4_HEADER_LEN: usize = 20;
pub const MAX_IPV4_OPTIONS: usize = 40;

/// Named option type bytes (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Ipv4OptType {
    Eol = 0x00,
    Nop = 0x01,
    Rr = 0x07,
    Ts = 0x44,
    Sec = 0x82,
    Lsrr = 0x83,
    Cipso = 0x86,
    Sid = 0x88,
    Ssrr = 0x89,
    RtrAlt = 0x94,
    Qs = 0x19,
}

/// One decoded IPv4 option. `data` excludes the type/length bytes.
#[derive(Clone, Debug)]
pub struct Ipv4Option {
    pub opt_type: u8,
    pub len: u8,
    pub data: Vec<u8>,
}

/// Bounded option array plus named slots for the commonly accessed options.
#[derive(Clone, Debug, Default)]
pub struct Ipv4Options {
    pub entries: Vec<Ipv4Option>,
    pub rr: Option<usize>,
    pub qs: Option<usize>,
    pub ts: Option<usize>,
    pub sec: Option<usize>,
    pub lsrr: Option<usize>,
    pub cipso: Option<usize>,
    pub sid: Option<usize>,
    pub ssrr: Option<usize>,
    pub rtralt: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub tos: u8,
    pub total_len: u16,
    pub ident: u16,
    pub flags: u8,
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum_wire: u16,
    pub src: Address,
    pub dst: Address,
    pub options: Ipv4Options,
    pub csum_cache: ChecksumCache,
}

impl Ipv4Header {
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    pub fn is_fragment(&self) -> bool {
        self.frag_offset > 0 || (self.flags & 0x1) != 0 // MF bit
    }

    pub fn validate_checksum(&mut self, raw_header: &[u8]) -> bool {
        let computed = self
            .csum_cache
            .get_or_compute(raw_header, ipv4_header_checksum);
        computed == 0
    }
}

/// Decode an IPv4 header from `bytes` (link payload, header first).
/// Returns `None` (with events raised) when decoding must stop.
pub fn decode_ipv4(bytes: &[u8], events: &mut EventSet) -> Option<Ipv4Header> {
    if bytes.len() < IPV4_HEADER_LEN {
        events.set(DecoderEvent::Ipv4PktTooSmall);
        return None;
    }
    let version = bytes[0] >> 4;
    if version != 4 {
        events.set(DecoderEvent::Ipv4WrongIpVer);
        return None;
    }
    let ihl = bytes[0] & 0x0f;
    let header_len = ihl as usize * 4;
    if header_len < IPV4_HEADER_LEN {
        events.set(DecoderEvent::Ipv4HlenTooSmall);
        return None;
    }
    let total_len = u16::from_be_bytes([bytes[2], bytes[3]]);
    if (total_len as usize) < header_len {
        events.set(DecoderEvent::Ipv4IplenSmallerThanHlen);
        return None;
    }
    if bytes.len() < total_len as usize {
        events.set(DecoderEvent::Ipv4TruncPkt);
        return None;
    }

    let ident = u16::from_be_bytes([bytes[4], bytes[5]]);
    let flags_frag = u16::from_be_bytes([bytes[6], bytes[7]]);
    let flags = (flags_frag >> 13) as u8;
    let frag_offset = flags_frag & 0x1fff;
    let ttl = bytes[8];
    let protocol = bytes[9];
    let checksum_wire = u16::from_be_bytes([bytes[10], bytes[11]]);
    let src = Address::V4(u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]));
    let dst = Address::V4(u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]));

    let mut options = Ipv4Options::default();
    if header_len > IPV4_HEADER_LEN {
        let opt_bytes = &bytes[IPV4_HEADER_LEN..header_len];
        parse_options(opt_bytes, &mut options, events);
    }

    Some(Ipv4Header {
        version,
        ihl,
        tos: bytes[1],
        total_len,
        ident,
        flags,
        frag_offset,
        ttl,
        protocol,
        checksum_wire,
        src,
        dst,
        options,
        csum_cache: ChecksumCache::new(),
    })
}

fn parse_options(opt_bytes: &[u8], options: &mut Ipv4Options, events: &mut EventSet) {
    let mut pos = 0usize;
    let mut consumed_bytes = 0usize;

    while pos < opt_bytes.len() {
        let opt_type = opt_bytes[pos];

        if opt_type == Ipv4OptType::Eol as u8 {
            break;
        }
        if opt_type == Ipv4OptType::Nop as u8 {
            pos += 1;
            consumed_bytes += 1;
            continue;
        }

        if pos + 1 >= opt_bytes.len() {
            events.set(DecoderEvent::Ipv4OptInvalidLen);
            break;
        }
        let len = opt_bytes[pos + 1];
        let remaining = opt_bytes.len() - pos;
        if len < 2 || len as usize > remaining {
            events.set(DecoderEvent::Ipv4OptInvalidLen);
            break;
        }

        let data = opt_bytes[pos + 2..pos + len as usize].to_vec();
        let malformed = validate_option(opt_type, len, &data, events);

        if options.entries.len() < MAX_IPV4_OPTIONS {
            let idx = options.entries.len();
            options.entries.push(Ipv4Option { opt_type, len, data });
            if !malformed {
                bind_named_slot(options, opt_type, idx, events);
            }
        }

        pos += len as usize;
        consumed_bytes += len as usize;
    }

    if consumed_bytes % 8 != 0 {
        events.set(DecoderEvent::Ipv4OptPadRequired);
    }
}

fn bind_named_slot(options: &mut Ipv4Options, opt_type: u8, idx: usize, events: &mut EventSet) {
    let slot = match opt_type {
        t if t == Ipv4OptType::Rr as u8 => &mut options.rr,
        t if t == Ipv4OptType::Qs as u8 => &mut options.qs,
        t if t == Ipv4OptType::Ts as u8 => &mut options.ts,
        t if t == Ipv4OptType::Sec as u8 => &mut options.sec,
        t if t == Ipv4OptType::Lsrr as u8 => &mut options.lsrr,
        t if t == Ipv4OptType::Cipso as u8 => &mut options.cipso,
        t if t == Ipv4OptType::Sid as u8 => &mut options.sid,
        t if t == Ipv4OptType::Ssrr as u8 => &mut options.ssrr,
        t if t == Ipv4OptType::RtrAlt as u8 => &mut options.rtralt,
        _ => return,
    };
    if slot.is_some() {
        events.set(DecoderEvent::Ipv4OptDuplicate);
        return; // keep the first binding
    }
    *slot = Some(idx);
}

/// Validate one option's body per its type. Returns `true` if malformed
/// (an event was raised and the option should not claim a named slot).
fn validate_option(opt_type: u8, len: u8, data: &[u8], events: &mut EventSet) -> bool {
    match opt_type {
        t if t == Ipv4OptType::Rr as u8
            || t == Ipv4OptType::Lsrr as u8
            || t == Ipv4OptType::Ssrr as u8 =>
        {
            validate_route_pointer(len, data, events)
        }
        t if t == Ipv4OptType::Ts as u8 => validate_ts(len, data, events),
        t if t == Ipv4OptType::Cipso as u8 => validate_cipso(data, events),
        t if t == Ipv4OptType::Sec as u8 => validate_fixed_len(len, 11, events),
        t if t == Ipv4OptType::Sid as u8 => validate_fixed_len(len, 4, events),
        t if t == Ipv4OptType::RtrAlt as u8 => validate_fixed_len(len, 4, events),
        t if t == Ipv4OptType::Qs as u8 => validate_min_len(len, 8, events),
        _ => false,
    }
}

fn validate_route_pointer(len: u8, data: &[u8], events: &mut EventSet) -> bool {
    if data.is_empty() {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    let pointer = data[0];
    if pointer < 4 || pointer % 4 != 0 || pointer > len + 1 {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    false
}

fn validate_ts(len: u8, data: &[u8], events: &mut EventSet) -> bool {
    if data.is_empty() {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    let pointer = data[0];
    if pointer < 5 {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    if data.len() < 4 {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    let flag = data[3] & 0x00ff;
    let record_size: u8 = if flag == 1 || flag == 3 { 8 } else { 4 };
    if (pointer - 5) % record_size != 0 || pointer as usize > len as usize + 1 {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    false
}

fn validate_cipso(data: &[u8], events: &mut EventSet) -> bool {
    let mut pos = 4usize; // skip DOI (4 bytes)
    if data.len() < pos {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    let remaining_after_doi = data.len() - pos;
    let mut malformed = false;
    let mut walked = 0usize;
    while walked < remaining_after_doi {
        if pos + 2 > data.len() {
            events.set(DecoderEvent::Ipv4OptMalformed);
            malformed = true;
            break;
        }
        let ttype = data[pos];
        let tlen = data[pos + 1];
        if ttype == 0 {
            events.set(DecoderEvent::Ipv4OptMalformed);
            malformed = true;
            break;
        }
        if tlen < 4 || (pos + tlen as usize) > data.len() {
            events.set(DecoderEvent::Ipv4OptMalformed);
            malformed = true;
            break;
        }
        if ttype != 7 {
            let align_idx = pos + 2;
            if align_idx < data.len() && data[align_idx] != 0 {
                events.set(DecoderEvent::Ipv4OptMalformed);
                malformed = true;
                break;
            }
        }
        walked += tlen as usize;
        pos += tlen as usize;
    }
    malformed
}

fn validate_fixed_len(len: u8, expected: u8, events: &mut EventSet) -> bool {
    if len != expected {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    false
}

fn validate_min_len(len: u8, min: u8, events: &mut EventSet) -> bool {
    if len < min {
        events.set(DecoderEvent::Ipv4OptMalformed);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header(total_len: u16, ihl: u8) -> Vec<u8> {
        let mut b = vec![0u8; ihl as usize * 4];
        b[0] = 0x40 | ihl;
        let tl = total_len.to_be_bytes();
        b[2] = tl[0];
        b[3] = tl[1];
        b[9] = 6; // TCP
        b
    }

    #[test]
    fn exactly_twenty_bytes_decodes_with_no_options_no_events() {
        let bytes = base_header(20, 5);
        let mut events = EventSet::new();
        let hdr = decode_ipv4(&bytes, &mut events).unwrap();
        assert!(events.is_empty());
        assert!(hdr.options.entries.is_empty());
    }

    #[test]
    fn hlen_fifteen_with_forty_nops_decodes_cleanly() {
        let mut bytes = base_header(60, 15);
        for b in bytes.iter_mut().skip(IPV4_HEADER_LEN) {
            *b = Ipv4OptType::Nop as u8;
        }
        let mut events = EventSet::new();
        let hdr = decode_ipv4(&bytes, &mut events).unwrap();
        assert!(events.is_empty());
        assert!(hdr.options.entries.is_empty());
    }

    #[test]
    fn too_small_packet_raises_event() {
        let bytes = vec![0u8; 10];
        let mut events = EventSet::new();
        assert!(decode_ipv4(&bytes, &mut events).is_none());
        assert!(events.contains(DecoderEvent::Ipv4PktTooSmall));
    }

    #[test]
    fn rr_option_with_invalid_pointer_is_malformed() {
        let mut bytes = base_header(28, 7);
        bytes[IPV4_HEADER_LEN] = Ipv4OptType::Rr as u8;
        bytes[IPV4_HEADER_LEN + 1] = 7; // len
        bytes[IPV4_HEADER_LEN + 2] = 5; // pointer, not multiple of 4
        let mut events = EventSet::new();
        let hdr = decode_ipv4(&bytes, &mut events).unwrap();
        assert!(events.contains(DecoderEvent::Ipv4OptMalformed));
        assert!(hdr.options.rr.is_none());
    }

    #[test]
    fn checksum_idempotent_under_wire_value() {
        let mut bytes = base_header(20, 5);
        let csum = ipv4_header_checksum(&bytes);
        bytes[10] = (csum >> 8) as u8;
        bytes[11] = (csum & 0xff) as u8;
        let mut events = EventSet::new();
        let mut hdr = decode_ipv4(&bytes, &mut events).unwrap();
        assert!(hdr.validate_checksum(&bytes));
    }
}
