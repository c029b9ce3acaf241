//! Packet decoder (component C3): layered header parsing, decoder events,
//! on-demand checksums, and tunnel/pseudo-packet linkage.

pub mod checksum;
pub mod events;
pub mod ipv4;
pub mod ipv6;
pub mod link;
pub mod packet;
pub mod pool;
pub mod stats;
pub mod transport;
pub mod tunnel;

pub use events::{DecoderEvent, EventSet, MAX_EVENTS_PER_PACKET};
pub use packet::{Packet, PacketId, MAX_PACKET_BYTES};
pub use pool::PacketPool;
pub use stats::{DecodeStats, DecodeThreadCtx};
