//! Threshold / detection-filter state (§4.5 supplement): per-`(sid, gid,
//! track, address)` sliding counters that gate alert emission.

use std::sync::atomic::{AtomicU64, Ordering};

use aegis_common::Address;
use dashmap::DashMap;

use crate::sig::{ThresholdKind, ThresholdSpec, TrackBy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum TrackKey {
    Src(Address),
    Dst(Address),
    Rule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ThresholdId {
    sid: u32,
    gid: u32,
    track: TrackKey,
}

struct Entry {
    window_start_secs: AtomicU64,
    count: AtomicU64,
}

/// Sharded counter table keyed by `(sid, gid, track-kind, address)`. One
/// instance is shared across all worker threads for a rule set.
#[derive(Default)]
pub struct ThresholdTable {
    entries: DashMap<ThresholdId, Entry>,
}

/// What the detection runtime should do with a signature that matched on
/// its content/packet checks but still has a threshold gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdVerdict {
    /// Emit the alert as normal.
    Alert,
    /// Suppress this one match (inside the limit/threshold window).
    Suppress,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one signature match against its threshold/detection_filter
    /// spec at wall-clock `now_secs`.
    ///
    /// `TYPE_LIMIT` alerts only the first `count` hits per window, the
    /// window's hit count resetting when it elapses. `TYPE_THRESHOLD` (and
    /// `TYPE_BOTH`) alert exactly once, on the hit that brings the window's
    /// count to `count`, then reset immediately so the next hit starts a
    /// fresh count. `TYPE_DETECTION` (`detection_filter`) is different:
    /// once the count is reached it keeps alerting on every following hit;
    /// an elapsed window only renews the timestamp, never the count, so
    /// the gate never re-closes (§8 scenario 5: hits 4-8 all alert, and a
    /// 9th hit long after the window elapsed still alerts).
    pub fn evaluate(
        &self,
        sid: u32,
        gid: u32,
        spec: &ThresholdSpec,
        src: &Address,
        dst: &Address,
        now_secs: u64,
    ) -> ThresholdVerdict {
        let track = match spec.track {
            TrackBy::BySrc => TrackKey::Src(*src),
            TrackBy::ByDst => TrackKey::Dst(*dst),
            TrackBy::ByRule => TrackKey::Rule,
        };
        let id = ThresholdId { sid, gid, track };

        let entry = self.entries.entry(id).or_insert_with(|| Entry {
            window_start_secs: AtomicU64::new(now_secs),
            count: AtomicU64::new(0),
        });

        let window_start = entry.window_start_secs.load(Ordering::Relaxed);
        let window_elapsed = now_secs.saturating_sub(window_start) >= spec.seconds as u64;

        match spec.kind {
            ThresholdKind::Limit => {
                if window_elapsed {
                    entry.window_start_secs.store(now_secs, Ordering::Relaxed);
                    entry.count.store(0, Ordering::Relaxed);
                }
                let hits = entry.count.fetch_add(1, Ordering::Relaxed) + 1;
                if hits <= spec.count as u64 {
                    ThresholdVerdict::Alert
                } else {
                    ThresholdVerdict::Suppress
                }
            }
            ThresholdKind::Threshold | ThresholdKind::Both => {
                if window_elapsed {
                    entry.window_start_secs.store(now_secs, Ordering::Relaxed);
                    entry.count.store(0, Ordering::Relaxed);
                }
                let hits = entry.count.fetch_add(1, Ordering::Relaxed) + 1;
                if hits >= spec.count as u64 {
                    entry.count.store(0, Ordering::Relaxed);
                    entry.window_start_secs.store(now_secs, Ordering::Relaxed);
                    ThresholdVerdict::Alert
                } else {
                    ThresholdVerdict::Suppress
                }
            }
            ThresholdKind::DetectionFilter => {
                if window_elapsed {
                    entry.window_start_secs.store(now_secs, Ordering::Relaxed);
                }
                let hits = entry.count.fetch_add(1, Ordering::Relaxed) + 1;
                if hits >= spec.count as u64 {
                    ThresholdVerdict::Alert
                } else {
                    ThresholdVerdict::Suppress
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ThresholdKind, count: u32, seconds: u32) -> ThresholdSpec {
        ThresholdSpec { kind, track: TrackBy::BySrc, count, seconds }
    }

    fn addr(s: &str) -> Address {
        Address::from_ipv4(s.parse().unwrap())
    }

    #[test]
    fn threshold_alerts_once_per_window_then_resets() {
        let table = ThresholdTable::new();
        let s = spec(ThresholdKind::Threshold, 4, 60);
        let src = addr("10.0.0.1");
        let dst = addr("10.0.0.2");

        assert_eq!(table.evaluate(1, 1, &s, &src, &dst, 0), ThresholdVerdict::Suppress);
        assert_eq!(table.evaluate(1, 1, &s, &src, &dst, 1), ThresholdVerdict::Suppress);
        assert_eq!(table.evaluate(1, 1, &s, &src, &dst, 2), ThresholdVerdict::Suppress);
        assert_eq!(table.evaluate(1, 1, &s, &src, &dst, 3), ThresholdVerdict::Alert);
        // window reset: next hit starts counting fresh
        assert_eq!(table.evaluate(1, 1, &s, &src, &dst, 4), ThresholdVerdict::Suppress);
    }

    #[test]
    fn window_expiry_resets_count() {
        let table = ThresholdTable::new();
        let s = spec(ThresholdKind::Threshold, 4, 60);
        let src = addr("10.0.0.1");
        let dst = addr("10.0.0.2");

        table.evaluate(1, 1, &s, &src, &dst, 0);
        table.evaluate(1, 1, &s, &src, &dst, 1);
        // window elapses before reaching count=4
        let verdict = table.evaluate(1, 1, &s, &src, &dst, 61);
        assert_eq!(verdict, ThresholdVerdict::Suppress);
    }

    #[test]
    fn limit_allows_first_n_then_suppresses() {
        let table = ThresholdTable::new();
        let s = spec(ThresholdKind::Limit, 2, 60);
        let src = addr("10.0.0.1");
        let dst = addr("10.0.0.2");

        assert_eq!(table.evaluate(2, 1, &s, &src, &dst, 0), ThresholdVerdict::Alert);
        assert_eq!(table.evaluate(2, 1, &s, &src, &dst, 0), ThresholdVerdict::Alert);
        assert_eq!(table.evaluate(2, 1, &s, &src, &dst, 0), ThresholdVerdict::Suppress);
    }

    /// §8 scenario 5: `detection_filter` with `count 4, seconds 60` suppresses
    /// the first 3 hits, alerts on every hit from the 4th onward (5 alerts for
    /// hits 4-8), and a 9th hit long after the window elapsed still alerts
    /// because the count, unlike `threshold`'s, never resets.
    #[test]
    fn detection_filter_suppresses_then_alerts_every_subsequent_hit() {
        let table = ThresholdTable::new();
        let s = spec(ThresholdKind::DetectionFilter, 4, 60);
        let src = addr("10.0.0.1");
        let dst = addr("2.2.2.2");

        let verdicts: Vec<_> = (0..8).map(|i| table.evaluate(1, 1, &s, &src, &dst, i)).collect();
        assert_eq!(
            verdicts,
            vec![
                ThresholdVerdict::Suppress,
                ThresholdVerdict::Suppress,
                ThresholdVerdict::Suppress,
                ThresholdVerdict::Alert,
                ThresholdVerdict::Alert,
                ThresholdVerdict::Alert,
                ThresholdVerdict::Alert,
                ThresholdVerdict::Alert,
            ]
        );

        // t+200s: long past the 60s window, but the count carries over.
        assert_eq!(table.evaluate(1, 1, &s, &src, &dst, 200), ThresholdVerdict::Alert);
    }
}
