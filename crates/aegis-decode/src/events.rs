//! Decoder events: tags raised on protocol-level anomalies.
//!
//! The decoder never returns an error for malformed input; it raises an
//! event and continues, so decoder-event-only rules can still match.

/// One anomaly tag. Discriminants are stable and dense so `DecoderEvent::COUNT`
/// sizes the per-thread tally array in `DecodeStats`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DecoderEvent {
    Ipv4PktTooSmall = 0,
    Ipv4WrongIpVer,
    Ipv4HlenTooSmall,
    Ipv4IplenSmallerThanHlen,
    Ipv4TruncPkt,
    Ipv4OptInvalidLen,
    Ipv4OptMalformed,
    Ipv4OptDuplicate,
    Ipv4OptPadRequired,
    Ipv6PktTooSmall,
    Ipv6WrongIpVer,
    Ipv6TruncPkt,
    TcpPktTooSmall,
    TcpHlenTooSmall,
    UdpPktTooSmall,
    UdpHlenInvalid,
    IcmpPktTooSmall,
    GrePktTooSmall,
    GreVersion1Recur,
    VlanHeaderTooSmall,
    PppHeaderTooSmall,
    PppoeSessionHeaderTooSmall,
    PppoeDiscoveryHeaderTooSmall,
    EthernetHeaderTooSmall,
    SllHeaderTooSmall,
}

impl DecoderEvent {
    /// Number of distinct discriminants, used to size the atomic tally array.
    pub const COUNT: usize = 25;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        use DecoderEvent::*;
        match self {
            Ipv4PktTooSmall => "IPV4_PKT_TOO_SMALL",
            Ipv4WrongIpVer => "IPV4_WRONG_IP_VER",
            Ipv4HlenTooSmall => "IPV4_HLEN_TOO_SMALL",
            Ipv4IplenSmallerThanHlen => "IPV4_IPLEN_SMALLER_THAN_HLEN",
            Ipv4TruncPkt => "IPV4_TRUNC_PKT",
            Ipv4OptInvalidLen => "IPV4_OPT_INVALID_LEN",
            Ipv4OptMalformed => "IPV4_OPT_MALFORMED",
            Ipv4OptDuplicate => "IPV4_OPT_DUPLICATE",
            Ipv4OptPadRequired => "IPV4_OPT_PAD_REQUIRED",
            Ipv6PktTooSmall => "IPV6_PKT_TOO_SMALL",
            Ipv6WrongIpVer => "IPV6_WRONG_IP_VER",
            Ipv6TruncPkt => "IPV6_TRUNC_PKT",
            TcpPktTooSmall => "TCP_PKT_TOO_SMALL",
            TcpHlenTooSmall => "TCP_HLEN_TOO_SMALL",
            UdpPktTooSmall => "UDP_PKT_TOO_SMALL",
            UdpHlenInvalid => "UDP_HLEN_INVALID",
            IcmpPktTooSmall => "ICMP_PKT_TOO_SMALL",
            GrePktTooSmall => "GRE_PKT_TOO_SMALL",
            GreVersion1Recur => "GRE_VERSION1_RECUR",
            VlanHeaderTooSmall => "VLAN_HEADER_TOO_SMALL",
            PppHeaderTooSmall => "PPP_HEADER_TOO_SMALL",
            PppoeSessionHeaderTooSmall => "PPPOE_SESSION_HEADER_TOO_SMALL",
            PppoeDiscoveryHeaderTooSmall => "PPPOE_DISCOVERY_HEADER_TOO_SMALL",
            EthernetHeaderTooSmall => "ETHERNET_HEADER_TOO_SMALL",
            SllHeaderTooSmall => "SLL_HEADER_TOO_SMALL",
        }
    }
}

/// Bounded set of decoder events attached to a packet (≤16, per §3).
#[derive(Clone, Debug, Default)]
pub struct EventSet {
    events: Vec<DecoderEvent>,
}

pub const MAX_EVENTS_PER_PACKET: usize = 16;

impl EventSet {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Raise an event. Past the bound, further events are silently dropped
    /// (the packet still carries its first 16 diagnoses).
    pub fn set(&mut self, event: DecoderEvent) {
        if self.events.len() < MAX_EVENTS_PER_PACKET {
            self.events.push(event);
        }
    }

    pub fn contains(&self, event: DecoderEvent) -> bool {
        self.events.contains(&event)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecoderEvent> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_at_sixteen() {
        let mut set = EventSet::new();
        for _ in 0..20 {
            set.set(DecoderEvent::Ipv4OptDuplicate);
        }
        assert_eq!(set.iter().count(), MAX_EVENTS_PER_PACKET);
    }
}
