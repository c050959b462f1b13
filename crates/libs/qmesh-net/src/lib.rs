//! Network plumbing for the qmesh daemon: the raw L2 mesh link, the TUN
//! virtual interface, interface address enumeration, L3/L4 header
//! extraction, and the topology allow-list.
//!
//! Linux-only; the raw socket and TUN setup go through libc ioctls.

pub mod error;
pub mod ifaces;
pub mod l2;
pub mod parse;
pub mod topology;
pub mod tun;

pub use error::NetError;
pub use l2::RawLink;
pub use parse::{l3_info, l4_info, L4Proto};
pub use tun::TunDevice;
