//! Shared primitives for the aegis intrusion detection sensor.
//!
//! This crate holds the pieces every other `aegis-*` crate needs but that
//! belong to no single pipeline stage: address/CIDR/port primitives (C1)
//! and the crate-wide error type.

pub mod address;
pub mod alert;
pub mod error;
pub mod port;

pub use address::{Address, AddressFamily, AddressRange, CidrBlock};
pub use alert::{AlertSet, PacketAlert, MAX_ALERTS_PER_PACKET};
pub use error::{AegisError, Result};
pub use port::{PortRange, PortSet};
