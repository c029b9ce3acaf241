//! Per-thread decode counters (§4.1 supplement), folded into one atomic
//! array indexed by `DecoderEvent` discriminant rather than one counter
//! global per event macro.

use crate::events::DecoderEvent;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct DecodeStats {
    pub pkts: AtomicU64,
    pub bytes: AtomicU64,
    pub invalid: AtomicU64,
    event_counts: [AtomicU64; DecoderEvent::COUNT],
}

impl Default for DecodeStats {
    fn default() -> Self {
        Self {
            pkts: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            event_counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl DecodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, len: usize) {
        self.pkts.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_event(&self, event: DecoderEvent) {
        self.event_counts[event.index()].fetch_add(1, Ordering::Relaxed);
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_count(&self, event: DecoderEvent) -> u64 {
        self.event_counts[event.index()].load(Ordering::Relaxed)
    }
}

/// Per-thread decode context: stats plus whatever scratch state a worker
/// needs across calls (currently just the stats handle; reassembly and
/// flow lookups are external per §1).
pub struct DecodeThreadCtx {
    pub stats: DecodeStats,
}

impl DecodeThreadCtx {
    pub fn new() -> Self {
        Self { stats: DecodeStats::new() }
    }
}

impl Default for DecodeThreadCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_tally_independently_per_event() {
        let stats = DecodeStats::new();
        stats.record_event(DecoderEvent::Ipv4OptMalformed);
        stats.record_event(DecoderEvent::Ipv4OptMalformed);
        stats.record_event(DecoderEvent::TcpPktTooSmall);
        assert_eq!(stats.event_count(DecoderEvent::Ipv4OptMalformed), 2);
        assert_eq!(stats.event_count(DecoderEvent::TcpPktTooSmall), 1);
        assert_eq!(stats.invalid.load(Ordering::Relaxed), 3);
    }
}
