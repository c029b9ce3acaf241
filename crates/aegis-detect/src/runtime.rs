//! Per-packet detection runtime (component C7).
//!
//! Gate -> SGH lookup -> IP-only pass -> pre-filter -> per-signature
//! evaluation -> alerting, per §4.6. The payload content matcher here is a
//! plain windowed substring search rather than true Boyer-Moore; see
//! DESIGN.md for why that trade was made.

use std::collections::HashSet;

use aegis_common::{Address, AlertSet, PacketAlert};
use aegis_decode::Packet;

use parking_lot::Mutex;

use crate::content::{self, ByteJumpMatch, ByteTestMatch};
use crate::ip_only::IpOnlyEngineBuilder;
use crate::sgh::SignatureGroupTable;
use crate::sig::{ActionKind, Signature, SigMatchKind, TagDirection};
use crate::tag::{ActiveTag, TagTable};
use crate::threshold::{ThresholdTable, ThresholdVerdict};
use crate::ip_only::IpOnlyEngine;

pub struct DetectionEngine {
    pub signatures: Vec<Signature>,
    pub sgh: SignatureGroupTable,
    pub ip_only: IpOnlyEngine,
    pub thresholds: ThresholdTable,
    /// Per-host active-tag ring (§4.5's "emit tag entries per tmatch" post-
    /// match action), mutex-guarded since it mutates on every worker thread.
    pub tags: Mutex<TagTable>,
}

impl DetectionEngine {
    /// Wire a freshly loaded rule set into the grouped/IP-only/threshold
    /// structures an [`inspect`](Self::inspect) call needs.
    pub fn build(signatures: Vec<Signature>) -> Self {
        let mut ip_only_builder = IpOnlyEngineBuilder::new();
        for sig in &signatures {
            if !sig.flags.ip_only {
                continue;
            }
            for (block, item) in &sig.cidr_src {
                ip_only_builder.add_src(block, *item);
            }
            for (block, item) in &sig.cidr_dst {
                ip_only_builder.add_dst(block, *item);
            }
        }
        let sgh = SignatureGroupTable::build(&signatures);
        DetectionEngine {
            signatures,
            sgh,
            ip_only: ip_only_builder.build(),
            thresholds: ThresholdTable::new(),
            tags: Mutex::new(TagTable::new()),
        }
    }

    /// Run every applicable signature against `packet`, appending matches
    /// to `packet.alerts`.
    pub fn inspect(&self, packet: &mut Packet, now_secs: u64) {
        if packet.suppress_payload_inspection {
            self.inspect_decoder_events_only(packet, now_secs);
            return;
        }

        let (Some(src), Some(dst), Some(proto)) = (packet.src, packet.dst, packet.protocol) else {
            self.inspect_decoder_events_only(packet, now_secs);
            return;
        };

        let src_hits = self.ip_only.matching_src(&src);
        let dst_hits = self.ip_only.matching_dst(&dst);
        let ip_only_candidates: HashSet<u32> = src_hits.intersection(&dst_hits).copied().collect();

        let mut candidates: HashSet<u32> = HashSet::new();
        if let Some(group) = self.sgh.group_for(proto) {
            let payload = packet.payload().unwrap_or(&[]);
            let prefiltered = group.prefilter(payload);
            candidates.extend(prefiltered);
        }

        for sig in &self.signatures {
            if sig.flags.ip_only {
                if ip_only_candidates.contains(&sig.sig_num) {
                    self.apply_tags(sig, &src, &dst, now_secs);
                    self.alert(sig, packet, &src, &dst, proto);
                }
                continue;
            }
            if !candidates.contains(&sig.sig_num) {
                continue;
            }
            if self.evaluate(sig, packet, &src, &dst, proto, now_secs) {
                self.apply_tags(sig, &src, &dst, now_secs);
                self.alert(sig, packet, &src, &dst, proto);
            }
        }
    }

    fn inspect_decoder_events_only(&self, packet: &mut Packet, _now_secs: u64) {
        for sig in &self.signatures {
            if !sig.flags.decoder_event_only {
                continue;
            }
            let hits = sig.mat.iter().all(|m| match &m.kind {
                SigMatchKind::Generic { keyword, value } if keyword == "decode-event" => {
                    packet.events.iter().any(|e| e.name().eq_ignore_ascii_case(value))
                }
                _ => true,
            });
            if hits {
                self.alert_decoder_event(sig, packet);
            }
        }
    }

    fn evaluate(
        &self,
        sig: &Signature,
        packet: &Packet,
        src: &Address,
        dst: &Address,
        proto: u8,
        now_secs: u64,
    ) -> bool {
        if !sig.matches_proto(proto) {
            return false;
        }
        if !sig.src.matches(src) || !sig.dst.matches(dst) {
            if !sig.flags.bidirectional {
                return false;
            }
            if !(sig.src.matches(dst) && sig.dst.matches(src)) {
                return false;
            }
        }
        if let (Some(sp), Some(dp)) = (packet.src_port, packet.dst_port) {
            if !sig.src_port_matches(sp) || !sig.dst_port_matches(dp) {
                if !sig.flags.bidirectional || !(sig.src_port_matches(dp) && sig.dst_port_matches(sp)) {
                    return false;
                }
            }
        }

        if !self.eval_match_list(sig, packet) {
            return false;
        }
        if !eval_pmatch(sig, packet.payload().unwrap_or(&[])) {
            return false;
        }

        if let Some(spec) = &sig.threshold {
            let verdict = self.thresholds.evaluate(sig.sid, sig.gid, spec, src, dst, now_secs);
            if verdict == ThresholdVerdict::Suppress {
                return false;
            }
        }

        true
    }

    fn eval_match_list(&self, sig: &Signature, packet: &Packet) -> bool {
        for m in &sig.mat {
            let SigMatchKind::Generic { keyword, value } = &m.kind else { continue };
            let ok = match keyword.as_str() {
                "ttl" => packet.ip4h.as_ref().map(|h| h.ttl.to_string() == *value).unwrap_or(true),
                "dsize" => eval_dsize(value, packet.payload().map(|p| p.len()).unwrap_or(0)),
                _ => true,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Emit an `ActiveTag` for every `tmatch` entry on a fully-matched
    /// signature, independent of `noalert`/`pass` (§4.2 step 6d).
    fn apply_tags(&self, sig: &Signature, src: &Address, dst: &Address, now_secs: u64) {
        if sig.tmat.is_empty() {
            return;
        }
        let mut tags = self.tags.lock();
        for m in &sig.tmat {
            let SigMatchKind::Tag(spec) = &m.kind else { continue };
            let host = match spec.direction {
                TagDirection::Src => *src,
                TagDirection::Dst => *dst,
            };
            tags.add(
                host,
                ActiveTag {
                    sid: sig.sid,
                    scope: spec.scope,
                    limit: spec.limit,
                    started_at_secs: now_secs,
                    packets_seen: 0,
                },
            );
        }
    }

    fn alert(&self, sig: &Signature, packet: &mut Packet, src: &Address, dst: &Address, proto: u8) {
        let _ = (src, dst, proto);
        if sig.action == ActionKind::Pass || sig.flags.noalert {
            return;
        }
        push_alert(&mut packet.alerts, sig);
    }

    fn alert_decoder_event(&self, sig: &Signature, packet: &mut Packet) {
        if sig.flags.noalert {
            return;
        }
        push_alert(&mut packet.alerts, sig);
    }
}

fn push_alert(alerts: &mut AlertSet, sig: &Signature) {
    alerts.push(PacketAlert {
        sid: sig.sid,
        gid: sig.gid,
        rev: sig.rev,
        prio: sig.prio,
        class: sig.class.clone(),
        action: match sig.action {
            ActionKind::Alert => "alert".to_string(),
            ActionKind::Drop => "drop".to_string(),
            ActionKind::Reject => "reject".to_string(),
            ActionKind::Pass => "pass".to_string(),
        },
        msg: sig.msg.clone(),
        class_msg: sig.class_msg.clone(),
        references: sig.references.clone(),
        num: sig.sig_num,
        order_id: sig.sig_num,
    });
}

fn eval_dsize(value: &str, len: usize) -> bool {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix('>') {
        rest.trim().parse::<usize>().map(|n| len > n).unwrap_or(true)
    } else if let Some(rest) = value.strip_prefix('<') {
        rest.trim().parse::<usize>().map(|n| len < n).unwrap_or(true)
    } else if let Some((lo, hi)) = value.split_once("<>") {
        match (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
            (Ok(lo), Ok(hi)) => len >= lo && len <= hi,
            _ => true,
        }
    } else {
        value.parse::<usize>().map(|n| len == n).unwrap_or(true)
    }
}

/// Walk `sig.pmat` left to right over `payload`, threading a cursor through
/// relative (`distance`/`within`) keywords per §4.6's anchor-walk semantics.
fn eval_pmatch(sig: &Signature, payload: &[u8]) -> bool {
    let mut cursor: usize = 0;
    for m in &sig.pmat {
        match &m.kind {
            SigMatchKind::Content(cm) => {
                let search_start = if cm.distance.is_some() || cm.within.is_some() {
                    let base = cursor as i32 + cm.distance.unwrap_or(0);
                    base.max(0) as usize
                } else {
                    cm.offset.unwrap_or(0) as usize
                };
                let search_end = match (cm.depth, cm.within) {
                    (Some(depth), _) => cm.offset.unwrap_or(0) as usize + depth as usize,
                    (None, Some(within)) => cursor + within as usize,
                    (None, None) => payload.len(),
                }
                .min(payload.len());

                let found = if search_start < search_end {
                    find_bytes(&payload[search_start..search_end], &cm.bytes, cm.flags.nocase)
                } else {
                    None
                };

                match (found, cm.flags.negated) {
                    (Some(pos), false) => cursor = search_start + pos + cm.bytes.len(),
                    (None, true) => {}
                    _ => return false,
                }
            }
            SigMatchKind::ByteTest(bt) => {
                if !eval_byte_test(bt, payload, cursor) {
                    return false;
                }
            }
            SigMatchKind::ByteJump(bj) => match eval_byte_jump(bj, payload, cursor) {
                Some(next) => cursor = next,
                None => return false,
            },
            SigMatchKind::IsDataAt { dataat, relative } => {
                let pos = if *relative { cursor + *dataat as usize } else { *dataat as usize };
                if pos >= payload.len() {
                    return false;
                }
            }
            SigMatchKind::Pcre { pattern, nocase, relative, negated } => {
                let start = if *relative { cursor } else { 0 };
                if start > payload.len() {
                    return false;
                }
                let hay = &payload[start..];
                let pat = if *nocase { format!("(?i){pattern}") } else { pattern.clone() };
                let re = match regex::bytes::Regex::new(&pat) {
                    Ok(re) => re,
                    Err(_) => return false,
                };
                match (re.find(hay), *negated) {
                    (Some(found), false) => cursor = start + found.end(),
                    (None, true) => {}
                    _ => return false,
                }
            }
            SigMatchKind::Generic { .. } | SigMatchKind::Tag(_) => {}
        }
    }
    true
}

fn find_bytes(hay: &[u8], needle: &[u8], nocase: bool) -> Option<usize> {
    if needle.is_empty() || needle.len() > hay.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| {
        if nocase {
            w.eq_ignore_ascii_case(needle)
        } else {
            w == needle
        }
    })
}

fn eval_byte_test(bt: &ByteTestMatch, payload: &[u8], cursor: usize) -> bool {
    let base = if bt.relative { cursor as i32 } else { 0 };
    let offset = (base + bt.offset).max(0) as usize;
    match content::extract_byte_value(payload, offset, bt) {
        Some(v) => content::apply_byte_op(v, bt),
        None => false,
    }
}

fn eval_byte_jump(bj: &ByteJumpMatch, payload: &[u8], cursor: usize) -> Option<usize> {
    let base = if bj.relative { cursor as i32 } else { 0 };
    let offset = (base + bj.offset).max(0) as usize;
    if offset + bj.nbytes as usize > payload.len() {
        return None;
    }
    let mut value: u64 = 0;
    match bj.endian {
        content::Endian::Big => {
            for &b in &payload[offset..offset + bj.nbytes as usize] {
                value = (value << 8) | b as u64;
            }
        }
        content::Endian::Little => {
            for &b in payload[offset..offset + bj.nbytes as usize].iter().rev() {
                value = (value << 8) | b as u64;
            }
        }
    }
    let next = offset as i64 + value as i64 + bj.post_offset as i64;
    if next < 0 || next as usize > payload.len() {
        return None;
    }
    Some(next as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_only::IpOnlyEngineBuilder;
    use crate::parser::RuleParser;
    use crate::sgh::SignatureGroupTable;
    use crate::threshold::ThresholdTable;
    use aegis_decode::Packet;

    fn build_engine(rules: &[&str]) -> DetectionEngine {
        let mut parser = RuleParser::new();
        let mut sigs = Vec::new();
        for r in rules {
            sigs.push(parser.parse_rule(r).unwrap());
        }
        let builder = IpOnlyEngineBuilder::new();
        let sgh = SignatureGroupTable::build(&sigs);
        DetectionEngine {
            signatures: sigs,
            sgh,
            ip_only: builder.build(),
            thresholds: ThresholdTable::new(),
            tags: Mutex::new(TagTable::new()),
        }
    }

    fn tcp_packet(payload: &[u8]) -> Packet {
        let mut p = Packet::new();
        p.src = Some(Address::from_ipv4("10.0.0.1".parse().unwrap()));
        p.dst = Some(Address::from_ipv4("10.0.0.2".parse().unwrap()));
        p.src_port = Some(4444);
        p.dst_port = Some(80);
        p.protocol = Some(6);
        p.set_bytes(payload);
        p.set_payload(0, payload.len());
        p
    }

    #[test]
    fn simple_content_rule_alerts() {
        let engine = build_engine(&[r#"alert tcp any any -> any 80 (msg:"fast path"; content:"GET"; sid:1; rev:1;)"#]);
        let mut packet = tcp_packet(b"GET / HTTP/1.1\r\n");
        engine.inspect(&mut packet, 0);
        assert_eq!(packet.alerts.len(), 1);
    }

    #[test]
    fn relative_within_constrains_second_content() {
        let engine = build_engine(&[
            r#"alert tcp any any -> any 80 (msg:"m"; content:"GET"; content:"HTTP"; distance:0; within:20; sid:2; rev:1;)"#,
        ]);
        let mut hit = tcp_packet(b"GET / HTTP/1.1\r\n");
        engine.inspect(&mut hit, 0);
        assert_eq!(hit.alerts.len(), 1);

        let mut miss = tcp_packet(b"GET /aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa HTTP/1.1\r\n");
        engine.inspect(&mut miss, 0);
        assert!(miss.alerts.is_empty());
    }

    #[test]
    fn negated_content_alerts_only_when_absent() {
        let engine = build_engine(&[r#"alert tcp any any -> any 80 (msg:"m"; content:!"HEAD"; sid:3; rev:1;)"#]);
        let mut present = tcp_packet(b"HEAD / HTTP/1.1\r\n");
        engine.inspect(&mut present, 0);
        assert!(present.alerts.is_empty());

        let mut absent = tcp_packet(b"GET / HTTP/1.1\r\n");
        engine.inspect(&mut absent, 0);
        assert_eq!(absent.alerts.len(), 1);
    }

    #[test]
    fn full_match_emits_tag_entry_for_dst_host() {
        let engine = build_engine(&[
            r#"alert tcp any any -> any 80 (msg:"m"; content:"GET"; tag:host,600,seconds; sid:4; rev:1;)"#,
        ]);
        let mut packet = tcp_packet(b"GET / HTTP/1.1\r\n");
        engine.inspect(&mut packet, 100);

        let dst = Address::from_ipv4("10.0.0.2".parse().unwrap());
        let active = engine.tags.lock().tick(&dst, 100);
        assert_eq!(active, vec![4]);
    }
}
