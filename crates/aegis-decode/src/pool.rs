//! Packet pool with tunnel linkage (Design Note §9).
//!
//! `Packet.root` is modeled as an arena index rather than a raw back
//! reference, so the tunnel `rtv_cnt`/`tpr_cnt` counters live in the root's
//! pool cell instead of needing a cyclic owned structure.

use crate::packet::{Packet, PacketId};
use parking_lot::Mutex;

/// Per-root tunnel accounting, guarded by a single mutex (§5: "the
/// tunnel-packet per-root mutex when updating rtv_cnt/tpr_cnt").
#[derive(Debug, Default)]
struct TunnelCounters {
    /// Ready-to-verdict count: inner packets that have completed detection.
    rtv_cnt: u32,
    /// Tunnel-packet refcount: inner packets created under this root.
    tpr_cnt: u32,
}

struct Slot {
    packet: Packet,
    counters: Mutex<TunnelCounters>,
    in_use: bool,
}

/// Arena-backed pool of packets, supporting pseudo-packet creation for
/// tunnel inners without introducing ownership cycles.
pub struct PacketPool {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl PacketPool {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                packet: Packet::new(),
                counters: Mutex::new(TunnelCounters::default()),
                in_use: false,
            });
            free.push(i);
        }
        Self { slots, free }
    }

    pub fn alloc(&mut self) -> Option<PacketId> {
        let idx = self.free.pop()?;
        self.slots[idx].in_use = true;
        self.slots[idx].packet.recycle();
        Some(PacketId(idx))
    }

    pub fn free(&mut self, id: PacketId) {
        if self.slots[id.0].in_use {
            self.slots[id.0].packet.recycle();
            self.slots[id.0].in_use = false;
            self.free.push(id.0);
        }
    }

    pub fn get(&self, id: PacketId) -> &Packet {
        &self.slots[id.0].packet
    }

    pub fn get_mut(&mut self, id: PacketId) -> &mut Packet {
        &mut self.slots[id.0].packet
    }

    /// `packet_pseudo_setup`: allocate a pseudo-packet for a tunnel inner,
    /// link it to `root`, bump `tpr_cnt` under the root's mutex, and
    /// suppress payload inspection on the parent while leaving header
    /// inspection intact.
    pub fn pseudo_setup(
        &mut self,
        parent: PacketId,
        bytes: &[u8],
        inner_proto: u8,
    ) -> Option<PacketId> {
        let root = self.get(parent).root.unwrap_or(parent);
        let child = self.alloc()?;

        {
            let mut counters = self.slots[root.0].counters.lock();
            counters.tpr_cnt += 1;
        }

        let parent_recursion = self.get(parent).recursion_level;
        let child_packet = self.get_mut(child);
        child_packet.set_bytes(bytes);
        child_packet.root = Some(root);
        child_packet.recursion_level = parent_recursion + 1;
        child_packet.protocol = Some(inner_proto);
        child_packet.is_tunnel = true;

        let parent_packet = self.get_mut(parent);
        parent_packet.is_tunnel = true;
        parent_packet.suppress_payload_inspection = true;

        Some(child)
    }

    /// Mark one inner packet's detection as complete; the root's verdict
    /// is deliverable once `tpr_cnt == rtv_cnt`.
    pub fn mark_ready_to_verdict(&self, id: PacketId) -> bool {
        let root = self.get(id).root.unwrap_or(id);
        let mut counters = self.slots[root.0].counters.lock();
        counters.rtv_cnt += 1;
        counters.rtv_cnt == counters.tpr_cnt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_setup_links_child_to_root_and_bumps_tpr_cnt() {
        let mut pool = PacketPool::new(4);
        let root = pool.alloc().unwrap();
        let child = pool.pseudo_setup(root, &[1, 2, 3], 41).unwrap();

        assert_eq!(pool.get(child).root, Some(root));
        assert_eq!(pool.get(child).recursion_level, 1);
        assert!(pool.get(root).suppress_payload_inspection);

        assert!(pool.mark_ready_to_verdict(child));
    }

    #[test]
    fn nested_tunnel_shares_outermost_root() {
        let mut pool = PacketPool::new(4);
        let root = pool.alloc().unwrap();
        let mid = pool.pseudo_setup(root, &[1], 4).unwrap();
        let inner = pool.pseudo_setup(mid, &[2], 41).unwrap();
        assert_eq!(pool.get(inner).root, Some(root));
    }
}
