//! Ethernet framing for the mesh transport.

use crate::error::WireError;
use crate::mac::MacAddr;
use crate::message::Message;

/// The EtherType every mesh frame is carried under.
pub const ETHERTYPE: u16 = 0x7777;

pub const ETH_HEADER_LEN: usize = 14;

/// Builds a full frame: `{dst, src, 0x7777}` header, encoded message,
/// payload.
pub fn frame(
    dst: MacAddr,
    src: MacAddr,
    message: &Message,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    let body = message.encode()?;
    let mut out = Vec::with_capacity(ETH_HEADER_LEN + body.len() + payload.len());
    out.extend_from_slice(&dst.octets());
    out.extend_from_slice(&src.octets());
    out.extend_from_slice(&ETHERTYPE.to_be_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits a received frame into `(dst, src, message, payload)`.
pub fn unframe(buf: &[u8]) -> Result<(MacAddr, MacAddr, Message, Vec<u8>), WireError> {
    if buf.len() < ETH_HEADER_LEN {
        return Err(WireError::Truncated { got: buf.len(), need: ETH_HEADER_LEN });
    }
    let dst = MacAddr::from_slice(&buf[0..6])?;
    let src = MacAddr::from_slice(&buf[6..12])?;
    let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
    if ethertype != ETHERTYPE {
        return Err(WireError::BadAddress(format!("unexpected ethertype 0x{ethertype:04x}")));
    }
    let message = Message::decode(&buf[ETH_HEADER_LEN..])?;
    let payload = buf[ETH_HEADER_LEN + message.encoded_len()..].to_vec();
    Ok((dst, src, message, payload))
}
