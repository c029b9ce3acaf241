//! Host-tag state (§4.2 `tag` keyword): a bounded ring of active tags per
//! address, each with a packet-count or second-based expiry.

use std::collections::HashMap;

use aegis_common::Address;

pub const MAX_TAGS_PER_HOST: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagScope {
    /// Expires after `limit` further packets from/to this host.
    Packets,
    /// Expires after `limit` seconds of wall-clock time.
    Seconds,
}

#[derive(Clone, Debug)]
pub struct ActiveTag {
    pub sid: u32,
    pub scope: TagScope,
    pub limit: u64,
    pub started_at_secs: u64,
    pub packets_seen: u64,
}

impl ActiveTag {
    fn expired(&self, now_secs: u64) -> bool {
        match self.scope {
            TagScope::Packets => self.packets_seen >= self.limit,
            TagScope::Seconds => now_secs.saturating_sub(self.started_at_secs) >= self.limit,
        }
    }
}

#[derive(Default)]
pub struct TagTable {
    by_host: HashMap<Address, Vec<ActiveTag>>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, host: Address, tag: ActiveTag) {
        let tags = self.by_host.entry(host).or_default();
        if tags.len() >= MAX_TAGS_PER_HOST {
            tags.remove(0);
        }
        tags.push(tag);
    }

    /// Advance the `host` entry's packet-count tags by one and drop expired
    /// entries, returning the `sid`s still active after the tick.
    pub fn tick(&mut self, host: &Address, now_secs: u64) -> Vec<u32> {
        let Some(tags) = self.by_host.get_mut(host) else {
            return Vec::new();
        };
        for tag in tags.iter_mut() {
            tag.packets_seen += 1;
        }
        tags.retain(|t| !t.expired(now_secs));
        tags.iter().map(|t| t.sid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::from_ipv4("10.0.0.1".parse().unwrap())
    }

    #[test]
    fn packet_scoped_tag_expires_after_limit_packets() {
        let mut table = TagTable::new();
        table.add(addr(), ActiveTag { sid: 1, scope: TagScope::Packets, limit: 2, started_at_secs: 0, packets_seen: 0 });
        assert_eq!(table.tick(&addr(), 0), vec![1]);
        assert_eq!(table.tick(&addr(), 0), Vec::<u32>::new());
    }

    #[test]
    fn second_scoped_tag_expires_after_wall_clock_limit() {
        let mut table = TagTable::new();
        table.add(addr(), ActiveTag { sid: 1, scope: TagScope::Seconds, limit: 60, started_at_secs: 0, packets_seen: 0 });
        assert_eq!(table.tick(&addr(), 30), vec![1]);
        assert_eq!(table.tick(&addr(), 61), Vec::<u32>::new());
    }

    #[test]
    fn ring_drops_oldest_past_bound() {
        let mut table = TagTable::new();
        for sid in 0..(MAX_TAGS_PER_HOST as u32 + 5) {
            table.add(addr(), ActiveTag { sid, scope: TagScope::Seconds, limit: 1000, started_at_secs: 0, packets_seen: 0 });
        }
        let active = table.tick(&addr(), 0);
        assert_eq!(active.len(), MAX_TAGS_PER_HOST);
        assert!(!active.contains(&0));
    }
}
