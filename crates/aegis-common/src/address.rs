//! Address, CIDR and address-range primitives (component C1).
//!
//! `Address` is family-tagged per §3 of the spec: equality is family+bits,
//! ordering is lexicographic within a family. `CidrBlock` and
//! `AddressRange` build on top for containment/overlap relations used by
//! the radix tree (C2) and the rule-group organizer (C5).

use crate::error::{AegisError, Result};
use std::cmp::Ordering;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Address family tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A decoded or rule-declared address.
///
/// IPv4 addresses are stored host-endian as a `u32`; IPv6 as four
/// host-endian `u32` words (network order within each word), matching the
/// teacher's habit (`sase-policy::PolicyRule` packs v4 into a `u128`) but
/// split by family since §3 requires family-tagged equality rather than a
/// single widened integer.
#[derive(Clone, Copy, Debug, Eq, Hash)]
pub enum Address {
    V4(u32),
    V6([u32; 4]),
}

impl Address {
    pub fn family(&self) -> AddressFamily {
        match self {
            Address::V4(_) => AddressFamily::V4,
            Address::V6(_) => AddressFamily::V6,
        }
    }

    pub fn from_ipv4(ip: Ipv4Addr) -> Self {
        Address::V4(u32::from(ip))
    }

    pub fn from_ipv6(ip: Ipv6Addr) -> Self {
        let o = ip.octets();
        let w = |i: usize| {
            u32::from_be_bytes([o[i], o[i + 1], o[i + 2], o[i + 3]])
        };
        Address::V6([w(0), w(4), w(8), w(12)])
    }

    pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            Address::V4(v) => Some(Ipv4Addr::from(*v)),
            Address::V6(_) => None,
        }
    }

    pub fn to_ipv6(&self) -> Option<Ipv6Addr> {
        match self {
            Address::V6(words) => {
                let mut bytes = [0u8; 16];
                for (i, w) in words.iter().enumerate() {
                    bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
                }
                Some(Ipv6Addr::from(bytes))
            }
            Address::V4(_) => None,
        }
    }

    /// Width of the family in bits (32 for v4, 128 for v6).
    pub fn bitlen(&self) -> u8 {
        match self {
            Address::V4(_) => 32,
            Address::V6(_) => 128,
        }
    }

    /// Returns the value of bit `n` (0 = most significant).
    pub fn bit(&self, n: u8) -> bool {
        match self {
            Address::V4(v) => (v >> (31 - n)) & 1 == 1,
            Address::V6(words) => {
                let word = words[(n / 32) as usize];
                let offset = 31 - (n % 32);
                (word >> offset) & 1 == 1
            }
        }
    }

    /// Big-endian byte representation (4 bytes for v4, 16 for v6).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Address::V4(v) => v.to_be_bytes().to_vec(),
            Address::V6(words) => {
                let mut out = Vec::with_capacity(16);
                for w in words {
                    out.extend_from_slice(&w.to_be_bytes());
                }
                out
            }
        }
    }

    /// Reconstruct an address of the given family from big-endian bytes.
    pub fn from_bytes(family: AddressFamily, bytes: &[u8]) -> Self {
        match family {
            AddressFamily::V4 => {
                Address::V4(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            AddressFamily::V6 => {
                let w = |i: usize| {
                    u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
                };
                Address::V6([w(0), w(4), w(8), w(12)])
            }
        }
    }

    /// Mask this address down to the first `prefix_len` bits, zeroing the rest.
    pub fn mask(&self, prefix_len: u8) -> Address {
        match self {
            Address::V4(v) => {
                if prefix_len >= 32 {
                    Address::V4(*v)
                } else if prefix_len == 0 {
                    Address::V4(0)
                } else {
                    Address::V4(v & (u32::MAX << (32 - prefix_len)))
                }
            }
            Address::V6(words) => {
                let mut out = [0u32; 4];
                let mut remaining = prefix_len as i32;
                for (i, w) in words.iter().enumerate() {
                    if remaining <= 0 {
                        out[i] = 0;
                    } else if remaining >= 32 {
                        out[i] = *w;
                    } else {
                        out[i] = w & (u32::MAX << (32 - remaining));
                    }
                    remaining -= 32;
                }
                Address::V6(out)
            }
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Address::V4(a), Address::V4(b)) => a == b,
            (Address::V6(a), Address::V6(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Address::V4(a), Address::V4(b)) => a.cmp(b),
            (Address::V6(a), Address::V6(b)) => a.cmp(b),
            (Address::V4(_), Address::V6(_)) => Ordering::Less,
            (Address::V6(_), Address::V4(_)) => Ordering::Greater,
        }
    }
}

/// A CIDR netblock with an optional negation flag, as declared in a rule
/// header or inserted into a radix tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CidrBlock {
    pub addr: Address,
    pub prefix_len: u8,
    pub negated: bool,
}

impl CidrBlock {
    pub fn new(addr: Address, prefix_len: u8) -> Self {
        Self { addr: addr.mask(prefix_len), prefix_len, negated: false }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Parse `a.b.c.d/N`, `a.b.c.d`, `ipv6::/N`, or bare `ipv6::`.
    pub fn parse(s: &str) -> Result<Self> {
        let (s, negated) = match s.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };

        if let Ok(v4) = addr_part.parse::<Ipv4Addr>() {
            let prefix_len = match prefix_part {
                Some(p) => p
                    .parse::<u8>()
                    .ok()
                    .filter(|n| *n <= 32)
                    .ok_or_else(|| AegisError::InvalidCidr(s.to_string()))?,
                None => 32,
            };
            let mut block = CidrBlock::new(Address::from_ipv4(v4), prefix_len);
            block.negated = negated;
            return Ok(block);
        }

        if let Ok(v6) = addr_part.parse::<Ipv6Addr>() {
            let prefix_len = match prefix_part {
                Some(p) => p
                    .parse::<u8>()
                    .ok()
                    .filter(|n| *n <= 128)
                    .ok_or_else(|| AegisError::InvalidCidr(s.to_string()))?,
                None => 128,
            };
            let mut block = CidrBlock::new(Address::from_ipv6(v6), prefix_len);
            block.negated = negated;
            return Ok(block);
        }

        Err(AegisError::InvalidCidr(s.to_string()))
    }

    /// Whether `addr` falls inside this block (ignoring `negated`).
    pub fn contains(&self, addr: &Address) -> bool {
        if addr.family() != self.addr.family() {
            return false;
        }
        addr.mask(self.prefix_len) == self.addr
    }

    /// Whether two blocks of the same family overlap at all.
    pub fn overlaps(&self, other: &CidrBlock) -> bool {
        if self.addr.family() != other.addr.family() {
            return false;
        }
        let shorter = self.prefix_len.min(other.prefix_len);
        self.addr.mask(shorter) == other.addr.mask(shorter)
    }

    /// Inclusive `[lo, hi]` address range spanned by this block.
    pub fn range(&self) -> AddressRange {
        match self.addr {
            Address::V4(base) => {
                let host_bits = 32 - self.prefix_len as u32;
                let span = if host_bits >= 32 { u32::MAX } else { (1u64 << host_bits) as u32 - 1 };
                AddressRange { lo: Address::V4(base), hi: Address::V4(base | span) }
            }
            Address::V6(base) => {
                let mut hi = base;
                let mut remaining = 128i32 - self.prefix_len as i32;
                for word in hi.iter_mut() {
                    if remaining <= 0 {
                        continue;
                    } else if remaining >= 32 {
                        *word |= u32::MAX;
                    } else {
                        *word |= u32::MAX >> (32 - remaining);
                    }
                    remaining -= 32;
                }
                AddressRange { lo: Address::V6(base), hi: Address::V6(hi) }
            }
        }
    }
}

/// An inclusive address range `[lo, hi]`, used by the rule-group organizer
/// (C5) to split signatures along address axes without requiring every
/// range to be expressible as a single CIDR block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    pub lo: Address,
    pub hi: Address,
}

impl AddressRange {
    pub fn contains(&self, addr: &Address) -> bool {
        addr.family() == self.lo.family() && *addr >= self.lo && *addr <= self.hi
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.lo.family() == other.lo.family() && self.lo <= other.hi && other.lo <= self.hi
    }

    /// Split `self` against `other` (same family), returning the up-to-three
    /// disjoint sub-ranges that cover `self`: the part before `other`, the
    /// overlapping part, and the part after. Non-overlapping parts are
    /// omitted. Used when the organizer must carve a constant-signature-set
    /// leaf range out of a broader one.
    pub fn split(&self, other: &AddressRange) -> Vec<AddressRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut parts = Vec::with_capacity(3);
        if self.lo < other.lo {
            parts.push(AddressRange { lo: self.lo, hi: pred(other.lo) });
        }
        let ov_lo = self.lo.max(other.lo);
        let ov_hi = self.hi.min(other.hi);
        parts.push(AddressRange { lo: ov_lo, hi: ov_hi });
        if self.hi > other.hi {
            parts.push(AddressRange { lo: succ(other.hi), hi: self.hi });
        }
        parts
    }
}

fn pred(addr: Address) -> Address {
    match addr {
        Address::V4(v) => Address::V4(v.saturating_sub(1)),
        Address::V6(words) => sub_one(words),
    }
}

fn succ(addr: Address) -> Address {
    match addr {
        Address::V4(v) => Address::V4(v.saturating_add(1)),
        Address::V6(words) => add_one(words),
    }
}

fn sub_one(words: [u32; 4]) -> Address {
    let mut w = words;
    for i in (0..4).rev() {
        if w[i] == 0 {
            w[i] = u32::MAX;
        } else {
            w[i] -= 1;
            break;
        }
    }
    Address::V6(w)
}

fn add_one(words: [u32; 4]) -> Address {
    let mut w = words;
    for i in (0..4).rev() {
        if w[i] == u32::MAX {
            w[i] = 0;
        } else {
            w[i] += 1;
            break;
        }
    }
    Address::V6(w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v4_cidr() {
        let b = CidrBlock::parse("192.168.0.0/16").unwrap();
        assert_eq!(b.prefix_len, 16);
        assert!(!b.negated);
        assert!(b.contains(&Address::from_ipv4("192.168.1.5".parse().unwrap())));
        assert!(!b.contains(&Address::from_ipv4("10.0.0.1".parse().unwrap())));
    }

    #[test]
    fn parses_negated_cidr() {
        let b = CidrBlock::parse("!10.0.0.0/8").unwrap();
        assert!(b.negated);
    }

    #[test]
    fn overlap_detects_subset() {
        let wide = CidrBlock::parse("192.168.0.0/16").unwrap();
        let narrow = CidrBlock::parse("192.168.1.0/24").unwrap();
        assert!(wide.overlaps(&narrow));
        assert!(narrow.overlaps(&wide));
        let other = CidrBlock::parse("10.0.0.0/8").unwrap();
        assert!(!wide.overlaps(&other));
    }

    #[test]
    fn zero_prefix_matches_everything() {
        let any = CidrBlock::parse("0.0.0.0/0").unwrap();
        assert!(any.contains(&Address::from_ipv4("8.8.8.8".parse().unwrap())));
        assert!(any.contains(&Address::from_ipv4("255.255.255.255".parse().unwrap())));
    }

    #[test]
    fn range_split_produces_disjoint_parts() {
        let whole = CidrBlock::parse("192.168.0.0/16").unwrap().range();
        let middle = CidrBlock::parse("192.168.1.0/24").unwrap().range();
        let parts = whole.split(&middle);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], middle);
    }

    #[test]
    fn ipv6_zero_prefix_matches_everything() {
        let any = CidrBlock::parse("::/0").unwrap();
        assert!(any.contains(&Address::from_ipv6("2001:db8::1".parse().unwrap())));
    }
}
