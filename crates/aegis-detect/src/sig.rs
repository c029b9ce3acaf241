//! Signature AST (component C4): the parsed, in-memory form of one rule.

use aegis_common::{CidrBlock, PortSet};

use aegis_common::PortRange;
use crate::content::{ByteJumpMatch, ByteTestMatch, ContentMatch};
use crate::tag::TagScope;

/// Which endpoint of the matched packet a `tag` entry is pinned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagDirection {
    Src,
    Dst,
}

/// Parsed `tag` keyword (`tag:host,<count>,<packets|seconds>[,<src|dst>];`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagSpec {
    pub direction: TagDirection,
    pub scope: TagScope,
    pub limit: u64,
}

/// 256-bit protocol membership set, one bit per IP protocol number, plus a
/// wildcard bit for `ip`/`any`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectProto {
    bits: [u64; 4],
    pub any: bool,
}

impl DetectProto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, proto: u8) {
        self.bits[(proto / 64) as usize] |= 1 << (proto % 64);
    }

    pub fn contains(&self, proto: u8) -> bool {
        self.any || self.bits[(proto / 64) as usize] & (1 << (proto % 64)) != 0
    }
}

/// One direction's address list: either unrestricted (`any`) or a concrete
/// set of IPv4/IPv6 CIDR blocks, each possibly negated.
#[derive(Clone, Debug, Default)]
pub struct DetectAddressHead {
    pub any: bool,
    pub ipv4: Vec<CidrBlock>,
    pub ipv6: Vec<CidrBlock>,
}

impl DetectAddressHead {
    pub fn matches(&self, addr: &aegis_common::Address) -> bool {
        if self.any {
            return true;
        }
        let list = match addr {
            aegis_common::Address::V4(_) => &self.ipv4,
            aegis_common::Address::V6(_) => &self.ipv6,
        };
        let mut matched = false;
        for cidr in list {
            if cidr.contains(addr) {
                matched = !cidr.negated;
            }
        }
        matched
    }
}

/// Which ordered list a `SigMatch` belongs to (§4.2's six dispatch lists).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchList {
    /// Packet-level, non-payload keywords (`ttl`, `dsize`, `flags`, ...).
    Match,
    /// Payload-inspecting keywords (`content`, `pcre`, `byte_test`, ...).
    Pmatch,
    /// URI/HTTP-normalized buffer keywords (`uricontent`, `http_*`).
    Umatch,
    /// Other app-layer keywords (`ftpbounce`, generic app-layer checks).
    Amatch,
    /// DCERPC-specific keywords, forces `alproto = DCERPC`.
    Dmatch,
    /// `tag` keyword.
    Tmatch,
}

#[derive(Clone, Debug)]
pub enum SigMatchKind {
    Content(ContentMatch),
    Pcre { pattern: String, nocase: bool, relative: bool, negated: bool },
    ByteTest(ByteTestMatch),
    ByteJump(ByteJumpMatch),
    IsDataAt { dataat: u32, relative: bool },
    /// Catch-all for packet-level and simple app-layer keywords that carry
    /// one opaque value string (`ttl:64`, `dsize:>100`, `flowbits:set,foo`).
    Generic { keyword: String, value: String },
    Tag(TagSpec),
}

/// One parsed keyword occurrence within a signature. `idx` is the
/// signature-relative position at which the keyword was declared, used by
/// the DCE splicing rule (compare the most recent `pmatch` index against
/// the most recent `dmatch` anchor index; ties favor `dmatch`).
#[derive(Clone, Debug)]
pub struct SigMatch {
    pub idx: u32,
    pub list: MatchList,
    pub kind: SigMatchKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Alert,
    Drop,
    Reject,
    Pass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdKind {
    Limit,
    Threshold,
    Both,
    DetectionFilter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackBy {
    BySrc,
    ByDst,
    ByRule,
}

#[derive(Clone, Debug)]
pub struct ThresholdSpec {
    pub kind: ThresholdKind,
    pub track: TrackBy,
    pub count: u32,
    pub seconds: u32,
}

/// Flattened CIDR item for the IP-only radix engine (C6): the signature
/// number plus whether this contributes positively or is a negated
/// subtraction from a wider positive block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IpOnlyCidrItem {
    pub sig_num: u32,
    pub negated: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SignatureFlags {
    pub any_src: bool,
    pub any_dst: bool,
    pub any_sp: bool,
    pub any_dp: bool,
    pub ip_only: bool,
    pub decoder_event_only: bool,
    pub has_payload: bool,
    pub has_dsize: bool,
    pub has_flow: bool,
    pub applayer: bool,
    pub bidirectional: bool,
    pub packet_level: bool,
    pub mpm_content_negated: bool,
    pub mpm_uri_negated: bool,
    pub noalert: bool,
}

/// One fully parsed rule.
#[derive(Clone, Debug)]
pub struct Signature {
    pub sig_num: u32,
    pub action: ActionKind,
    pub proto: DetectProto,
    pub src: DetectAddressHead,
    pub dst: DetectAddressHead,
    pub src_ports: PortSet,
    pub dst_ports: PortSet,

    pub sid: u32,
    pub gid: u32,
    pub rev: u32,
    pub prio: u8,
    pub class: Option<String>,
    pub class_msg: Option<String>,
    pub msg: String,
    pub references: Vec<String>,

    pub flags: SignatureFlags,
    pub threshold: Option<ThresholdSpec>,

    pub mat: Vec<SigMatch>,
    pub pmat: Vec<SigMatch>,
    pub umat: Vec<SigMatch>,
    pub amat: Vec<SigMatch>,
    pub dmat: Vec<SigMatch>,
    pub tmat: Vec<SigMatch>,

    pub cidr_src: Vec<(CidrBlock, IpOnlyCidrItem)>,
    pub cidr_dst: Vec<(CidrBlock, IpOnlyCidrItem)>,
}

impl Signature {
    /// Total link count across all six ordered match lists, used by the
    /// `sm_cnt == total_links(...)` bookkeeping invariant (§8).
    pub fn sm_cnt(&self) -> usize {
        self.mat.len() + self.pmat.len() + self.umat.len() + self.amat.len() + self.dmat.len() + self.tmat.len()
    }

    pub fn matches_proto(&self, proto: u8) -> bool {
        self.proto.contains(proto)
    }

    pub fn src_port_matches(&self, port: u16) -> bool {
        self.src_ports.contains(port)
    }

    pub fn dst_port_matches(&self, port: u16) -> bool {
        self.dst_ports.contains(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::Address;

    #[test]
    fn detect_proto_set_and_contains() {
        let mut proto = DetectProto::new();
        proto.set(6);
        assert!(proto.contains(6));
        assert!(!proto.contains(17));
    }

    #[test]
    fn detect_proto_any_matches_everything() {
        let proto = DetectProto { any: true, ..Default::default() };
        assert!(proto.contains(1));
        assert!(proto.contains(255));
    }

    #[test]
    fn address_head_negation_subtracts_from_wider_block() {
        let wide = Address::from_ipv4("10.0.0.0".parse().unwrap());
        let narrow = Address::from_ipv4("10.0.0.5".parse().unwrap());
        let mut head = DetectAddressHead::default();
        head.ipv4.push(CidrBlock::new(wide, 8));
        head.ipv4.push(CidrBlock::new(narrow, 32).negate());
        let inside = Address::from_ipv4("10.0.0.5".parse().unwrap());
        let elsewhere = Address::from_ipv4("10.1.2.3".parse().unwrap());
        assert!(!head.matches(&inside));
        assert!(head.matches(&elsewhere));
    }

    #[test]
    fn sm_cnt_sums_all_six_lists() {
        let mut sig = blank_sig();
        sig.mat.push(generic_match(0, MatchList::Match));
        sig.pmat.push(generic_match(1, MatchList::Pmatch));
        sig.dmat.push(generic_match(2, MatchList::Dmatch));
        assert_eq!(sig.sm_cnt(), 3);
    }

    fn generic_match(idx: u32, list: MatchList) -> SigMatch {
        SigMatch {
            idx,
            list,
            kind: SigMatchKind::Generic { keyword: "x".into(), value: "y".into() },
        }
    }

    fn blank_sig() -> Signature {
        Signature {
            sig_num: 0,
            action: ActionKind::Alert,
            proto: DetectProto::new(),
            src: DetectAddressHead::default(),
            dst: DetectAddressHead::default(),
            src_ports: PortSet { ranges: vec![PortRange::ANY] },
            dst_ports: PortSet { ranges: vec![PortRange::ANY] },
            sid: 1,
            gid: 1,
            rev: 1,
            prio: 3,
            class: None,
            class_msg: None,
            msg: String::new(),
            references: Vec::new(),
            flags: SignatureFlags::default(),
            threshold: None,
            mat: Vec::new(),
            pmat: Vec::new(),
            umat: Vec::new(),
            amat: Vec::new(),
            dmat: Vec::new(),
            tmat: Vec::new(),
            cidr_src: Vec::new(),
            cidr_dst: Vec::new(),
        }
    }
}
