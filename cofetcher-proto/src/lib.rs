//! Wire protocol and pure statistics for the clock-offset fetching service.
//!
//! This crate has no knowledge of sockets, timers, or async runtimes; it is
//! the data and arithmetic that `cofetcher-daemon` drives.

pub mod exchange;
pub mod packet;
pub mod store;

pub use exchange::advance;
pub use packet::{derive_offset, DecodeError, Packet, WIRE_LEN};
pub use store::{OffsetStore, PeerAddr};
