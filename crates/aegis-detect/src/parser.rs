//! Rule-line parser (component C4): `action proto src sp dir dst dp (opts)`
//! into a [`Signature`].

use aegis_common::{CidrBlock, PortSet};

use crate::content::{self, ContentFlags, ContentMatch, PatternIdStore};
use crate::error::ParseError;
use crate::sig::{
    ActionKind, DetectAddressHead, DetectProto, IpOnlyCidrItem, MatchList, Signature,
    SignatureFlags, SigMatch, SigMatchKind, TagDirection, TagSpec, ThresholdKind, ThresholdSpec,
    TrackBy,
};
use crate::tag::TagScope;

/// Keywords that, standing alone in the `match` list, still leave a
/// signature eligible for the IP-only fast path (§4.2's "content-requiring
/// keyword" scan excludes these).
const IP_ONLY_COMPATIBLE_KEYWORDS: &[&str] = &[
    "sid", "gid", "rev", "msg", "priority", "classtype", "reference", "metadata", "noalert",
    "flow", "flowbits", "ttl", "itype", "icode", "ack", "seq", "flags", "ipopts", "fragbits",
    "fragoffset", "id", "ipproto", "ip_proto", "sameip", "threshold", "detection_filter", "tag",
];

#[derive(Default)]
pub struct RuleParser {
    pub pattern_ids: PatternIdStore,
    next_sig_num: u32,
}

impl RuleParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one rule line (already joined across `\`-continuations by the
    /// caller) into a [`Signature`].
    pub fn parse_rule(&mut self, line: &str) -> Result<Signature, ParseError> {
        let options_start = line.find('(').ok_or(ParseError::MissingOptions)?;
        let options_end = line.rfind(')').ok_or(ParseError::MissingOptions)?;

        let header = line[..options_start].trim();
        let mut sig = self.parse_header(header)?;

        let options_str = &line[options_start + 1..options_end];
        self.parse_options(&mut sig, options_str)?;

        sig.sig_num = self.next_sig_num;
        self.next_sig_num += 1;
        classify_ip_only(&mut sig);
        flatten_cidrs(&mut sig);
        Ok(sig)
    }

    fn parse_header(&self, header: &str) -> Result<Signature, ParseError> {
        let parts: Vec<&str> = header.split_whitespace().collect();
        if parts.len() < 7 {
            return Err(ParseError::MalformedHeader(header.to_string()));
        }

        let action = match parts[0].to_ascii_lowercase().as_str() {
            "alert" => ActionKind::Alert,
            "drop" => ActionKind::Drop,
            "reject" => ActionKind::Reject,
            "pass" => ActionKind::Pass,
            other => return Err(ParseError::UnknownAction(other.to_string())),
        };

        let proto = parse_proto(parts[1]);
        let src = parse_address_head(parts[2])?;
        let src_ports = PortSet::parse(parts[3]).map_err(ParseError::AddressOrPort)?;
        let bidirectional = parts[4] == "<>";
        let dst = parse_address_head(parts[5])?;
        let dst_ports = PortSet::parse(parts[6]).map_err(ParseError::AddressOrPort)?;

        Ok(Signature {
            sig_num: 0,
            action,
            proto,
            src,
            dst,
            src_ports,
            dst_ports,
            sid: 0,
            gid: 1,
            rev: 1,
            prio: 3,
            class: None,
            class_msg: None,
            msg: String::new(),
            references: Vec::new(),
            flags: SignatureFlags { bidirectional, ..Default::default() },
            threshold: None,
            mat: Vec::new(),
            pmat: Vec::new(),
            umat: Vec::new(),
            amat: Vec::new(),
            dmat: Vec::new(),
            tmat: Vec::new(),
            cidr_src: Vec::new(),
            cidr_dst: Vec::new(),
        })
    }

    fn parse_options(&mut self, sig: &mut Signature, options: &str) -> Result<(), ParseError> {
        let opts = split_options(options);
        let mut idx: u32 = 0;
        // (list, index within that list) of the most recently pushed content,
        // so modifier keywords (nocase, depth, within, ...) apply to it.
        let mut last_content: Option<(MatchList, usize)> = None;
        let mut alproto: Option<&'static str> = None;

        for opt in opts {
            let opt = opt.trim();
            if opt.is_empty() {
                continue;
            }
            let (key, value) = match opt.find(':') {
                Some(pos) => (&opt[..pos], Some(opt[pos + 1..].trim())),
                None => (opt, None),
            };
            let key = key.trim();

            match key {
                "sid" => sig.sid = parse_u32(key, value)?,
                "gid" => sig.gid = parse_u32(key, value)?,
                "rev" => sig.rev = parse_u32(key, value)?,
                "priority" => sig.prio = parse_u32(key, value)? as u8,
                "msg" => sig.msg = value.unwrap_or_default().trim_matches('"').to_string(),
                "classtype" => sig.class = value.map(|v| v.to_string()),
                "reference" => {
                    if let Some(v) = value {
                        sig.references.push(v.to_string());
                    }
                }
                "metadata" => {}
                "noalert" => sig.flags.noalert = true,

                "content" => {
                    let v = value.ok_or_else(|| ParseError::InvalidNumericArgument {
                        keyword: "content".into(),
                        value: String::new(),
                    })?;
                    let (bytes, negated) = content::parse_content_value(v)?;
                    let id = self.pattern_ids.intern(&bytes);
                    let cm = ContentMatch {
                        bytes,
                        id,
                        flags: ContentFlags { negated, ..Default::default() },
                        offset: None,
                        depth: None,
                        distance: None,
                        within: None,
                    };
                    idx += 1;
                    sig.flags.has_payload = true;
                    sig.pmat.push(SigMatch { idx, list: MatchList::Pmatch, kind: SigMatchKind::Content(cm) });
                    last_content = Some((MatchList::Pmatch, sig.pmat.len() - 1));
                }
                "uricontent" => {
                    let v = value.ok_or_else(|| ParseError::InvalidNumericArgument {
                        keyword: "uricontent".into(),
                        value: String::new(),
                    })?;
                    let (bytes, negated) = content::parse_content_value(v)?;
                    let id = self.pattern_ids.intern(&bytes);
                    let cm = ContentMatch {
                        bytes,
                        id,
                        flags: ContentFlags { negated, ..Default::default() },
                        offset: None,
                        depth: None,
                        distance: None,
                        within: None,
                    };
                    idx += 1;
                    sig.umat.push(SigMatch { idx, list: MatchList::Umatch, kind: SigMatchKind::Content(cm) });
                    last_content = Some((MatchList::Umatch, sig.umat.len() - 1));
                }
                "nocase" => with_last_content(sig, last_content, |c| c.flags.nocase = true),
                "rawbytes" => with_last_content(sig, last_content, |c| c.flags.rawbytes = true),
                "fast_pattern" => with_last_content(sig, last_content, |c| c.flags.fast_pattern = true),
                "depth" => {
                    let v = parse_u32(key, value)?;
                    with_last_content(sig, last_content, |c| c.depth = Some(v));
                }
                "offset" => {
                    let v = parse_u32(key, value)?;
                    with_last_content(sig, last_content, |c| c.offset = Some(v));
                }
                "distance" => {
                    require_anchor(last_content, key)?;
                    let v: i32 = value
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| ParseError::InvalidNumericArgument { keyword: key.into(), value: value.unwrap_or("").into() })?;
                    with_last_content(sig, last_content, |c| c.distance = Some(v));
                }
                "within" => {
                    require_anchor(last_content, key)?;
                    let v = parse_u32(key, value)?;
                    if let Some((list, i)) = last_content {
                        let anchor_len = content_len(sig, list, i);
                        if (v as usize) < anchor_len {
                            return Err(ParseError::WithinShorterThanAnchor { within: v, anchor_len: anchor_len as u32 });
                        }
                    }
                    with_last_content(sig, last_content, |c| c.within = Some(v));
                }

                "pcre" => {
                    let v = value.unwrap_or_default();
                    let (pattern, nocase, relative, negated) = parse_pcre(v)?;
                    idx += 1;
                    sig.flags.has_payload = true;
                    sig.pmat.push(SigMatch {
                        idx,
                        list: MatchList::Pmatch,
                        kind: SigMatchKind::Pcre { pattern, nocase, relative, negated },
                    });
                    last_content = None;
                }

                "byte_test" => {
                    let bt = content::parse_byte_test(value.unwrap_or_default())?;
                    if bt.relative {
                        require_anchor(last_content, key)?;
                    }
                    idx += 1;
                    push_byte_keyword(sig, idx, SigMatchKind::ByteTest(bt.clone()), bt.dce, &mut alproto)?;
                }
                "byte_jump" => {
                    let bj = content::parse_byte_jump(value.unwrap_or_default())?;
                    if bj.relative {
                        require_anchor(last_content, key)?;
                    }
                    idx += 1;
                    push_byte_keyword(sig, idx, SigMatchKind::ByteJump(bj.clone()), bj.dce, &mut alproto)?;
                }
                "isdataat" => {
                    let v = value.unwrap_or_default();
                    let relative = v.contains("relative");
                    if relative {
                        require_anchor(last_content, key)?;
                    }
                    let dataat: u32 = v
                        .split(',')
                        .next()
                        .and_then(|n| n.trim().parse().ok())
                        .ok_or_else(|| ParseError::InvalidNumericArgument { keyword: key.into(), value: v.into() })?;
                    idx += 1;
                    sig.flags.has_payload = true;
                    sig.pmat.push(SigMatch { idx, list: MatchList::Pmatch, kind: SigMatchKind::IsDataAt { dataat, relative } });
                }

                "dce_iface" | "dce_opnum" | "dce_stub_data" => {
                    set_alproto(&mut alproto, "dcerpc")?;
                    idx += 1;
                    sig.flags.applayer = true;
                    sig.dmat.push(SigMatch {
                        idx,
                        list: MatchList::Dmatch,
                        kind: SigMatchKind::Generic { keyword: key.to_string(), value: value.unwrap_or_default().to_string() },
                    });
                }

                "threshold" => {
                    if sig.threshold.is_some() {
                        return Err(ParseError::ThresholdAndDetectionFilterConflict);
                    }
                    sig.threshold = Some(parse_threshold(value.unwrap_or_default(), false)?);
                }
                "detection_filter" => {
                    if sig.threshold.is_some() {
                        return Err(ParseError::DuplicateDetectionFilter);
                    }
                    sig.threshold = Some(parse_threshold(value.unwrap_or_default(), true)?);
                }

                "flow" => {
                    sig.flags.has_flow = true;
                    idx += 1;
                    sig.mat.push(generic(idx, key, value));
                }
                "dsize" => {
                    sig.flags.has_dsize = true;
                    idx += 1;
                    sig.mat.push(generic(idx, key, value));
                }
                "tag" => {
                    idx += 1;
                    let spec = parse_tag(value.unwrap_or_default());
                    sig.tmat.push(SigMatch { idx, list: MatchList::Tmatch, kind: SigMatchKind::Tag(spec) });
                }
                "ftpbounce" => {
                    sig.flags.applayer = true;
                    idx += 1;
                    sig.amat.push(SigMatch {
                        idx,
                        list: MatchList::Amatch,
                        kind: SigMatchKind::Generic { keyword: key.to_string(), value: String::new() },
                    });
                }

                "ttl" | "itype" | "icode" | "ack" | "seq" | "flags" | "ipopts" | "fragbits"
                | "fragoffset" | "id" | "ipproto" | "ip_proto" | "sameip" | "stream_size"
                | "flowbits" | "ip_proto_csum" | "tcp_csum" | "udp_csum" | "icmp_csum" => {
                    idx += 1;
                    sig.mat.push(generic(idx, key, value));
                }

                _ => return Err(ParseError::UnknownKeyword(key.to_string())),
            }
        }

        if sig.msg.is_empty() {
            return Err(ParseError::MalformedHeader("missing msg".to_string()));
        }
        Ok(())
    }
}

fn generic(idx: u32, key: &str, value: Option<&str>) -> SigMatch {
    SigMatch {
        idx,
        list: MatchList::Match,
        kind: SigMatchKind::Generic { keyword: key.to_string(), value: value.unwrap_or_default().to_string() },
    }
}

fn parse_u32(keyword: &str, value: Option<&str>) -> Result<u32, ParseError> {
    value
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ParseError::InvalidNumericArgument { keyword: keyword.into(), value: value.unwrap_or("").into() })
}

fn with_last_content(sig: &mut Signature, last: Option<(MatchList, usize)>, f: impl FnOnce(&mut ContentMatch)) {
    if let Some((list, i)) = last {
        let entry = match list {
            MatchList::Pmatch => sig.pmat.get_mut(i),
            MatchList::Umatch => sig.umat.get_mut(i),
            _ => None,
        };
        if let Some(SigMatch { kind: SigMatchKind::Content(c), .. }) = entry {
            f(c);
        }
    }
}

fn content_len(sig: &Signature, list: MatchList, i: usize) -> usize {
    let entry = match list {
        MatchList::Pmatch => sig.pmat.get(i),
        MatchList::Umatch => sig.umat.get(i),
        _ => None,
    };
    match entry {
        Some(SigMatch { kind: SigMatchKind::Content(c), .. }) => c.bytes.len(),
        _ => 0,
    }
}

fn require_anchor(last: Option<(MatchList, usize)>, keyword: &str) -> Result<(), ParseError> {
    if last.is_none() {
        return Err(ParseError::RelativeWithoutAnchor(keyword.to_string()));
    }
    Ok(())
}

fn set_alproto(current: &mut Option<&'static str>, wanted: &'static str) -> Result<(), ParseError> {
    match current {
        Some(existing) if *existing != wanted => Err(ParseError::AlprotoConflict {
            existing: existing.to_string(),
            wanted: wanted.to_string(),
        }),
        _ => {
            *current = Some(wanted);
            Ok(())
        }
    }
}

/// Applies the DCE splicing rule: a `dce`-flagged `byte_test`/`byte_jump`
/// goes to whichever of `pmat`/`dmat` has the more recent anchor index,
/// ties favoring `dmat`.
fn push_byte_keyword(
    sig: &mut Signature,
    idx: u32,
    kind: SigMatchKind,
    dce: bool,
    alproto: &mut Option<&'static str>,
) -> Result<(), ParseError> {
    if dce {
        set_alproto(alproto, "dcerpc")?;
        let last_pmat_idx = sig.pmat.last().map(|m| m.idx);
        let last_dmat_idx = sig.dmat.last().map(|m| m.idx);
        let goes_to_dmat = match (last_pmat_idx, last_dmat_idx) {
            (Some(p), Some(d)) => d >= p,
            (None, Some(_)) => true,
            _ => false,
        };
        if goes_to_dmat {
            sig.dmat.push(SigMatch { idx, list: MatchList::Dmatch, kind });
        } else {
            sig.pmat.push(SigMatch { idx, list: MatchList::Pmatch, kind });
        }
    } else {
        sig.flags.has_payload = true;
        sig.pmat.push(SigMatch { idx, list: MatchList::Pmatch, kind });
    }
    Ok(())
}

fn parse_proto(s: &str) -> DetectProto {
    let mut proto = DetectProto::new();
    match s.to_ascii_lowercase().as_str() {
        "tcp" => proto.set(6),
        "udp" => proto.set(17),
        "icmp" => proto.set(1),
        "icmp6" | "icmpv6" => proto.set(58),
        "ip" | "any" => proto.any = true,
        _ => proto.any = true,
    }
    proto
}

fn parse_address_head(s: &str) -> Result<DetectAddressHead, ParseError> {
    if s.eq_ignore_ascii_case("any") {
        return Ok(DetectAddressHead { any: true, ipv4: Vec::new(), ipv6: Vec::new() });
    }
    let mut head = DetectAddressHead::default();
    let entries: Vec<&str> = if let Some(inner) = s.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        inner.split(',').map(|v| v.trim()).collect()
    } else {
        vec![s]
    };
    for entry in entries {
        if entry.is_empty() {
            continue;
        }
        let block = CidrBlock::parse(entry).map_err(ParseError::AddressOrPort)?;
        match block.addr.family() {
            aegis_common::AddressFamily::V4 => head.ipv4.push(block),
            aegis_common::AddressFamily::V6 => head.ipv6.push(block),
        }
    }
    Ok(head)
}

/// Split a rule's option body on `;`, respecting double-quoted strings and
/// backslash escapes, the same way the rule's content values do.
fn split_options(options: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape_next = false;

    for ch in options.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => {
                escape_next = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_pcre(raw: &str) -> Result<(String, bool, bool, bool), ParseError> {
    let s = raw.trim();
    let (s, negated) = match s.strip_prefix('!') {
        Some(rest) => (rest, true),
        None => (s, false),
    };
    let s = s.trim_matches('"');
    let last_slash = s.rfind('/').ok_or_else(|| ParseError::PcreCompile(raw.to_string()))?;
    if !s.starts_with('/') || last_slash == 0 {
        return Err(ParseError::PcreCompile(raw.to_string()));
    }
    let pattern = &s[1..last_slash];
    let modifiers = &s[last_slash + 1..];
    let nocase = modifiers.contains('i');
    let relative = modifiers.contains('R');
    Ok((pattern.to_string(), nocase, relative, negated))
}

/// `tag:host,<count>,<packets|seconds>[,<src|dst>];`, direction defaulting
/// to `dst` (the side the triggering traffic is headed toward). Malformed
/// fields fall back to a 1-packet src-less-harmful default rather than
/// rejecting the whole rule, consistent with `parse_threshold`'s leniency.
fn parse_tag(raw: &str) -> TagSpec {
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    let limit = fields.get(1).and_then(|f| f.parse::<u64>().ok()).unwrap_or(1);
    let scope = match fields.get(2).copied() {
        Some("seconds") => TagScope::Seconds,
        _ => TagScope::Packets,
    };
    let direction = match fields.get(3).copied() {
        Some("src") => TagDirection::Src,
        _ => TagDirection::Dst,
    };
    TagSpec { direction, scope, limit }
}

fn parse_threshold(raw: &str, detection_filter: bool) -> Result<ThresholdSpec, ParseError> {
    let mut kind = if detection_filter { ThresholdKind::DetectionFilter } else { ThresholdKind::Limit };
    let mut track = TrackBy::BySrc;
    let mut count = 1u32;
    let mut seconds = 0u32;

    for field in raw.split(',') {
        let field = field.trim();
        let (k, v) = match field.split_once(' ') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };
        match k {
            "type" => {
                kind = match v {
                    "limit" => ThresholdKind::Limit,
                    "threshold" => ThresholdKind::Threshold,
                    "both" => ThresholdKind::Both,
                    _ => kind,
                }
            }
            "track" => {
                track = match v {
                    "by_src" => TrackBy::BySrc,
                    "by_dst" => TrackBy::ByDst,
                    "by_rule" => TrackBy::ByRule,
                    _ => track,
                }
            }
            "count" => count = v.parse().unwrap_or(1),
            "seconds" => seconds = v.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(ThresholdSpec { kind, track, count, seconds })
}

/// A signature is IP-only when its `match` list contains nothing but
/// address/port/protocol-level keywords and all payload/app-layer/tag
/// lists are empty (§4.2).
fn classify_ip_only(sig: &mut Signature) {
    if !sig.pmat.is_empty() || !sig.umat.is_empty() || !sig.amat.is_empty() || !sig.dmat.is_empty() || !sig.tmat.is_empty()
    {
        return;
    }
    let all_compatible = sig.mat.iter().all(|m| match &m.kind {
        SigMatchKind::Generic { keyword, .. } => IP_ONLY_COMPATIBLE_KEYWORDS.contains(&keyword.as_str()),
        _ => false,
    });
    if all_compatible {
        sig.flags.ip_only = true;
    }
}

fn flatten_cidrs(sig: &mut Signature) {
    for block in &sig.src.ipv4 {
        sig.cidr_src.push((*block, IpOnlyCidrItem { sig_num: sig.sig_num, negated: block.negated }));
    }
    for block in &sig.src.ipv6 {
        sig.cidr_src.push((*block, IpOnlyCidrItem { sig_num: sig.sig_num, negated: block.negated }));
    }
    for block in &sig.dst.ipv4 {
        sig.cidr_dst.push((*block, IpOnlyCidrItem { sig_num: sig.sig_num, negated: block.negated }));
    }
    for block in &sig.dst.ipv6 {
        sig.cidr_dst.push((*block, IpOnlyCidrItem { sig_num: sig.sig_num, negated: block.negated }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_content_rule() {
        let mut p = RuleParser::new();
        let sig = p
            .parse_rule(r#"alert tcp any any -> any 80 (msg:"test rule"; content:"GET"; sid:1; rev:1;)"#)
            .unwrap();
        assert_eq!(sig.sid, 1);
        assert_eq!(sig.pmat.len(), 1);
        assert!(!sig.flags.ip_only);
    }

    #[test]
    fn ip_only_signature_has_no_content() {
        let mut p = RuleParser::new();
        let sig = p
            .parse_rule(r#"alert ip 10.0.0.0/8 any -> any any (msg:"ip only"; sid:2; rev:1;)"#)
            .unwrap();
        assert!(sig.flags.ip_only);
        assert_eq!(sig.cidr_src.len(), 1);
    }

    #[test]
    fn within_shorter_than_anchor_is_rejected() {
        let mut p = RuleParser::new();
        let err = p
            .parse_rule(r#"alert tcp any any -> any any (msg:"m"; content:"ABCDEF"; within:3; sid:3; rev:1;)"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::WithinShorterThanAnchor { .. }));
    }

    #[test]
    fn distance_without_prior_content_is_rejected() {
        let mut p = RuleParser::new();
        let err = p
            .parse_rule(r#"alert tcp any any -> any any (msg:"m"; distance:5; sid:4; rev:1;)"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::RelativeWithoutAnchor(_)));
    }

    #[test]
    fn threshold_and_detection_filter_conflict() {
        let mut p = RuleParser::new();
        let err = p
            .parse_rule(
                r#"alert tcp any any -> any any (msg:"m"; threshold:type limit, track by_src, count 1, seconds 1; detection_filter:track by_src, count 1, seconds 1; sid:5; rev:1;)"#,
            )
            .unwrap_err();
        assert!(matches!(err, ParseError::ThresholdAndDetectionFilterConflict));
    }

    #[test]
    fn dce_byte_test_splices_to_dmatch_when_it_is_the_most_recent_anchor() {
        let mut p = RuleParser::new();
        let sig = p
            .parse_rule(
                r#"alert tcp any any -> any any (msg:"m"; dce_iface:1; byte_test:4,=,1,0,dce; sid:6; rev:1;)"#,
            )
            .unwrap();
        assert_eq!(sig.dmat.len(), 2);
        assert!(sig.pmat.is_empty());
    }

    #[test]
    fn quoted_semicolons_do_not_split_content() {
        let parts = split_options(r#"msg:"a;b"; sid:1;"#);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], r#"msg:"a;b""#);
    }

    #[test]
    fn bracketed_address_list_parses_each_entry() {
        let head = parse_address_head("[10.0.0.0/8,192.168.0.0/16]").unwrap();
        assert_eq!(head.ipv4.len(), 2);
        assert!(!head.any);
    }
}
