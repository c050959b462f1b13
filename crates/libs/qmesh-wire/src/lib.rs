//! qmesh wire protocol encode/decode.
//!
//! Every frame on the mesh is `<14-byte Ethernet header> <message header>
//! <optional payload>` carried under EtherType `0x7777`. Message headers are
//! bit-packed little-endian words; this crate owns their exact layouts and
//! nothing else — no I/O, no routing state.

pub mod error;
pub mod frame;
pub mod mac;
pub mod message;

pub use error::WireError;
pub use frame::{frame, unframe, ETHERTYPE, ETH_HEADER_LEN};
pub use mac::MacAddr;
pub use message::{Ack, DataHeader, Hello, Message, Reward, RouteMessage, DEFAULT_ROUTE};

/// Maximum value of the 20-bit message id field.
pub const MAX_MESSAGE_ID: u32 = 0xF_FFFF;

/// Draws a fresh 20-bit message id, never zero.
pub fn random_id() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=MAX_MESSAGE_ID)
}
