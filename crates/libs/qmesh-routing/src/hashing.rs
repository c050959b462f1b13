//! 32-bit message and slot identifiers.
//!
//! The identifier is MD5 over the ASCII display forms of the inputs,
//! truncated to the low 32 bits of the digest. This is correlation, not
//! cryptography, but it must be the same function on every peer so that
//! ACKs and rewards match their slots.

use std::net::IpAddr;

use md5::{Digest, Md5};

use qmesh_wire::MacAddr;

fn truncate32(parts: &[String]) -> u32 {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[12], digest[13], digest[14], digest[15]])
}

/// The ARQ slot / ACK hash: `md5(id ∥ mac) mod 2^32`.
pub fn msg_hash(id: u32, mac: MacAddr) -> u32 {
    truncate32(&[id.to_string(), mac.to_string()])
}

/// The reward slot hash: `md5(dst_ip ∥ mac) mod 2^32`.
pub fn pair_hash(ip: IpAddr, mac: MacAddr) -> u32 {
    truncate32(&[ip.to_string(), mac.to_string()])
}
