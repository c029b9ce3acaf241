//! Rule-group organizer (component C5).
//!
//! Real Suricata partitions signatures per protocol byte, then splits the
//! address/port axes into constant-signature-set ranges so a packet's
//! 5-tuple picks one small candidate group instead of scanning every rule.
//! This engine keeps that protocol-keyed partition and per-group payload
//! multi-pattern precompilation, but does the address/port narrowing with
//! a linear per-group membership scan rather than the full nested
//! range-splitting tree (see DESIGN.md).

use std::collections::HashMap;

use aho_corasick::AhoCorasick;

use crate::content::PatternIdStore;
use crate::sig::{Signature, SigMatchKind};

/// One signature-group head: every non-IP-only signature that can match a
/// given protocol, plus a precompiled multi-pattern matcher over their
/// mandatory `content` literals (the pre-filter, §4.6).
pub struct SignatureGroupHead {
    pub signatures: Vec<u32>,
    pub mpm: Option<AhoCorasick>,
    /// Index into `mpm`'s pattern list -> owning signature numbers, since
    /// several signatures may share an identical content literal.
    pub pattern_owners: Vec<Vec<u32>>,
}

impl SignatureGroupHead {
    fn build(sigs: &[&Signature]) -> Self {
        let mut patterns: Vec<Vec<u8>> = Vec::new();
        let mut owners: Vec<Vec<u32>> = Vec::new();
        let mut seen: HashMap<Vec<u8>, usize> = HashMap::new();

        for sig in sigs {
            for m in &sig.pmat {
                if let SigMatchKind::Content(c) = &m.kind {
                    if c.flags.negated {
                        continue;
                    }
                    let slot = *seen.entry(c.bytes.clone()).or_insert_with(|| {
                        patterns.push(c.bytes.clone());
                        owners.push(Vec::new());
                        patterns.len() - 1
                    });
                    owners[slot].push(sig.sig_num);
                }
            }
        }

        let mpm = if patterns.is_empty() {
            None
        } else {
            AhoCorasick::builder()
                .ascii_case_insensitive(false)
                .build(&patterns)
                .ok()
        };

        SignatureGroupHead {
            signatures: sigs.iter().map(|s| s.sig_num).collect(),
            mpm,
            pattern_owners: owners,
        }
    }

    /// Signatures whose mandatory content literal was seen in `payload`
    /// (the pre-filter intersection of §4.6); signatures with no `content`
    /// keyword at all always pass through since they have nothing to
    /// pre-filter on.
    pub fn prefilter(&self, payload: &[u8]) -> Vec<u32> {
        let mut hit: std::collections::HashSet<u32> = self
            .signatures
            .iter()
            .copied()
            .filter(|sig_num| !self.has_content(*sig_num))
            .collect();
        if let Some(mpm) = &self.mpm {
            for m in mpm.find_iter(payload) {
                for &sig_num in &self.pattern_owners[m.pattern().as_usize()] {
                    hit.insert(sig_num);
                }
            }
        }
        hit.into_iter().collect()
    }

    fn has_content(&self, sig_num: u32) -> bool {
        self.pattern_owners.iter().any(|owners| owners.contains(&sig_num))
    }
}

/// Per-protocol-byte lookup table (256 entries, §4.3 `DetectEngineLookupFlow`).
pub struct SignatureGroupTable {
    by_proto: Vec<Option<SignatureGroupHead>>,
    pub pattern_ids: PatternIdStore,
}

impl SignatureGroupTable {
    /// Build one group per protocol number that appears in `signatures`,
    /// plus a group under index 256's any-protocol bucket stored at `0`
    /// when a signature declares `ip`/`any`. Only non-IP-only, payload- or
    /// packet-level signatures are grouped here; pure IP-only signatures
    /// are handled by the radix engine (C6) instead.
    pub fn build(signatures: &[Signature]) -> Self {
        let mut per_proto: Vec<Vec<&Signature>> = vec![Vec::new(); 256];
        let mut any_proto: Vec<&Signature> = Vec::new();

        for sig in signatures {
            if sig.flags.ip_only {
                continue;
            }
            if sig.proto.any {
                any_proto.push(sig);
                continue;
            }
            for proto in 0u16..256 {
                if sig.proto.contains(proto as u8) {
                    per_proto[proto as usize].push(sig);
                }
            }
        }

        let mut by_proto = Vec::with_capacity(256);
        for bucket in per_proto.iter() {
            let mut combined: Vec<&Signature> = bucket.clone();
            combined.extend(any_proto.iter().copied());
            by_proto.push(if combined.is_empty() { None } else { Some(SignatureGroupHead::build(&combined)) });
        }

        SignatureGroupTable { by_proto, pattern_ids: PatternIdStore::new() }
    }

    pub fn group_for(&self, proto: u8) -> Option<&SignatureGroupHead> {
        self.by_proto[proto as usize].as_ref()
    }
}

/// Whether a signature's `match` list requires an app-layer/DCERPC
/// consultation before its packet-level checks can be considered complete.
pub fn requires_applayer(sig: &Signature) -> bool {
    sig.flags.applayer || !sig.dmat.is_empty() || !sig.amat.is_empty() || !sig.umat.is_empty()
}

/// Whether `sig`'s `match` list is exclusively payload-blind (used when
/// deciding whether a signature can run off the `ip_only` fast path even
/// though it was grouped here too, e.g. a decoder-event-only rule).
pub fn is_decoder_event_only(sig: &Signature) -> bool {
    sig.flags.decoder_event_only
        || (sig.mat.iter().all(|m| matches!(&m.kind, SigMatchKind::Generic { keyword, .. } if keyword == "decode-event"))
            && sig.pmat.is_empty()
            && sig.umat.is_empty()
            && sig.amat.is_empty()
            && sig.dmat.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RuleParser;

    #[test]
    fn signatures_are_grouped_by_protocol() {
        let mut p = RuleParser::new();
        let tcp_sig = p.parse_rule(r#"alert tcp any any -> any any (msg:"t"; content:"GET"; sid:1; rev:1;)"#).unwrap();
        let udp_sig = p.parse_rule(r#"alert udp any any -> any any (msg:"u"; content:"PING"; sid:2; rev:1;)"#).unwrap();
        let table = SignatureGroupTable::build(&[tcp_sig, udp_sig]);

        assert!(table.group_for(6).unwrap().signatures.contains(&1));
        assert!(!table.group_for(6).unwrap().signatures.contains(&2));
        assert!(table.group_for(17).unwrap().signatures.contains(&2));
    }

    #[test]
    fn prefilter_matches_only_on_content_hit() {
        let mut p = RuleParser::new();
        let sig = p.parse_rule(r#"alert tcp any any -> any any (msg:"t"; content:"GET"; sid:1; rev:1;)"#).unwrap();
        let table = SignatureGroupTable::build(&[sig]);
        let group = table.group_for(6).unwrap();

        assert_eq!(group.prefilter(b"GET / HTTP/1.1"), vec![1]);
        assert!(group.prefilter(b"POST / HTTP/1.1").is_empty());
    }
}
