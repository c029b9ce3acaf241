//! IP-only fast-path engine (component C6): four radix trees over the
//! signature set's source/destination CIDR blocks, keyed by address family.
//!
//! `aegis_radix::RadixTree::find_best` returns the single most specific
//! covering entry for an address, routing-table style. Signatures sharing
//! the exact same CIDR block are merged into one entry at build time via
//! [`IpOnlyEngine::build`]; signatures whose CIDRs overlap at *different*
//! prefix lengths are resolved by specificity (the narrower block wins),
//! not unioned. See DESIGN.md for the rationale.

use std::collections::{HashMap, HashSet};

use aegis_common::{Address, AddressFamily, CidrBlock};
use aegis_radix::RadixTree;

use crate::sig::IpOnlyCidrItem;

type CidrKey = (Vec<u8>, u8);

#[derive(Default)]
struct Accumulator {
    entries: HashMap<CidrKey, HashSet<IpOnlyCidrItem>>,
}

impl Accumulator {
    fn add(&mut self, block: &CidrBlock, item: IpOnlyCidrItem) {
        self.entries
            .entry((block.addr.to_bytes(), block.prefix_len))
            .or_default()
            .insert(item);
    }
}

pub struct IpOnlyEngine {
    src_v4: RadixTree<HashSet<IpOnlyCidrItem>>,
    dst_v4: RadixTree<HashSet<IpOnlyCidrItem>>,
    src_v6: RadixTree<HashSet<IpOnlyCidrItem>>,
    dst_v6: RadixTree<HashSet<IpOnlyCidrItem>>,
}

/// Accumulates CIDR bindings across every IP-only signature, then builds
/// the four trees once with `build()`.
#[derive(Default)]
pub struct IpOnlyEngineBuilder {
    src: Accumulator,
    dst: Accumulator,
}

impl IpOnlyEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_src(&mut self, block: &CidrBlock, item: IpOnlyCidrItem) {
        self.src.add(block, item);
    }

    pub fn add_dst(&mut self, block: &CidrBlock, item: IpOnlyCidrItem) {
        self.dst.add(block, item);
    }

    pub fn build(self) -> IpOnlyEngine {
        let mut src_v4 = RadixTree::for_family(AddressFamily::V4);
        let mut dst_v4 = RadixTree::for_family(AddressFamily::V4);
        let mut src_v6 = RadixTree::for_family(AddressFamily::V6);
        let mut dst_v6 = RadixTree::for_family(AddressFamily::V6);

        for ((key, prefix_len), items) in self.src.entries {
            let tree = if key.len() == 4 { &mut src_v4 } else { &mut src_v6 };
            tree.add_key(&key, prefix_len, items);
        }
        for ((key, prefix_len), items) in self.dst.entries {
            let tree = if key.len() == 4 { &mut dst_v4 } else { &mut dst_v6 };
            tree.add_key(&key, prefix_len, items);
        }

        IpOnlyEngine { src_v4, dst_v4, src_v6, dst_v6 }
    }
}

impl IpOnlyEngine {
    /// Signature numbers whose source CIDR constraint is satisfied by
    /// `addr`: the most-specific covering block's positive entries minus
    /// its negated entries (§4.4).
    pub fn matching_src(&self, addr: &Address) -> HashSet<u32> {
        matching(addr, &self.src_v4, &self.src_v6)
    }

    pub fn matching_dst(&self, addr: &Address) -> HashSet<u32> {
        matching(addr, &self.dst_v4, &self.dst_v6)
    }
}

fn matching(
    addr: &Address,
    v4: &RadixTree<HashSet<IpOnlyCidrItem>>,
    v6: &RadixTree<HashSet<IpOnlyCidrItem>>,
) -> HashSet<u32> {
    let tree = match addr.family() {
        AddressFamily::V4 => v4,
        AddressFamily::V6 => v6,
    };
    let Some(items) = tree.find_best(&addr.to_bytes()) else {
        return HashSet::new();
    };
    let positive: HashSet<u32> = items.iter().filter(|i| !i.negated).map(|i| i.sig_num).collect();
    let negative: HashSet<u32> = items.iter().filter(|i| i.negated).map(|i| i.sig_num).collect();
    positive.difference(&negative).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_and_negated_entries_at_the_same_cidr_cancel() {
        let mut builder = IpOnlyEngineBuilder::new();
        let block = CidrBlock::new(Address::from_ipv4("10.0.0.0".parse().unwrap()), 8);
        builder.add_src(&block, IpOnlyCidrItem { sig_num: 1, negated: false });
        let engine = builder.build();

        let inside = Address::from_ipv4("10.1.1.1".parse().unwrap());
        assert!(engine.matching_src(&inside).contains(&1));
    }

    #[test]
    fn narrower_negated_block_overrides_wider_positive_block() {
        let mut builder = IpOnlyEngineBuilder::new();
        let wide = CidrBlock::new(Address::from_ipv4("10.0.0.0".parse().unwrap()), 8);
        let narrow = CidrBlock::new(Address::from_ipv4("10.0.0.5".parse().unwrap()), 32).negate();
        builder.add_src(&wide, IpOnlyCidrItem { sig_num: 1, negated: false });
        builder.add_src(&narrow, IpOnlyCidrItem { sig_num: 1, negated: true });
        let engine = builder.build();

        let blocked = Address::from_ipv4("10.0.0.5".parse().unwrap());
        let allowed = Address::from_ipv4("10.1.1.1".parse().unwrap());
        assert!(!engine.matching_src(&blocked).contains(&1));
        assert!(engine.matching_src(&allowed).contains(&1));
    }

    #[test]
    fn no_covering_block_returns_empty_set() {
        let builder = IpOnlyEngineBuilder::new();
        let engine = builder.build();
        let addr = Address::from_ipv4("1.2.3.4".parse().unwrap());
        assert!(engine.matching_src(&addr).is_empty());
    }
}
