//! The nine mesh message kinds and their bit-exact layouts.
//!
//! Every header starts with a 4-bit type tag in the low nibble of the first
//! byte. Multi-byte words are packed LSB-first and written little-endian;
//! the layouts with non-octet-aligned fields (the 4/20/8 data triple, the
//! 4/1/2/24/1 HELLO prefix, the 1/7 reward sign+magnitude pair) are
//! assembled with explicit shifts, never via in-memory bitfields.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::WireError;

/// The synthetic "default route" destination a gateway node advertises.
/// Inside an IPv6-layout message it travels as the all-zero IPv6 address.
pub const DEFAULT_ROUTE: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

const TAG_UNICAST: u8 = 0;
const TAG_BROADCAST: u8 = 1;
const TAG_RREQ4: u8 = 2;
const TAG_RREQ6: u8 = 3;
const TAG_RREP4: u8 = 4;
const TAG_RREP6: u8 = 5;
const TAG_HELLO: u8 = 6;
const TAG_ACK: u8 = 7;
const TAG_REWARD: u8 = 8;
const TAG_RELIABLE: u8 = 9;

/// Header of plain and reliable data frames (tags 0 and 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// 20-bit message id.
    pub id: u32,
    pub hop_count: u8,
}

/// RREQ and RREP bodies (tags 2–5). The v4 or v6 layout is chosen from the
/// source address variant at encode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMessage {
    pub id: u32,
    pub hop_count: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

/// Periodic neighbor announcement (tag 6).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    pub ipv4: Option<Ipv4Addr>,
    /// At most three addresses; encode rejects longer lists.
    pub ipv6: Vec<Ipv6Addr>,
    /// 24-bit transmission counter, masked on encode.
    pub tx_count: u32,
    pub gw_mode: bool,
}

impl Hello {
    /// The L3 addresses a receiver should learn from this announcement,
    /// with the default-route sentinel appended for gateway nodes.
    pub fn l3_addresses(&self) -> Vec<IpAddr> {
        let mut out: Vec<IpAddr> = Vec::new();
        if let Some(v4) = self.ipv4 {
            out.push(IpAddr::V4(v4));
        }
        out.extend(self.ipv6.iter().map(|a| IpAddr::V6(*a)));
        if self.gw_mode {
            out.push(DEFAULT_ROUTE);
        }
        out
    }
}

/// One-hop acknowledgement (tag 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub id: u32,
    pub tx_count: u8,
    pub msg_hash: u32,
}

/// Route-quality feedback (tag 8). The wire carries a 7-bit magnitude plus
/// a sign flag, so values are clamped to ±127 at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reward {
    pub id: u32,
    pub value: i8,
    pub msg_hash: u32,
}

impl Reward {
    /// Builds a reward from an estimator mean, rounding to the nearest
    /// integer and clamping to the representable ±127 range.
    pub fn from_value(id: u32, value: f64, msg_hash: u32) -> Self {
        let clamped = value.round().clamp(-127.0, 127.0) as i8;
        Reward { id, value: clamped, msg_hash }
    }
}

/// Any message that can appear after the Ethernet header on the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    UnicastData(DataHeader),
    BroadcastData { id: u32, broadcast_ttl: u8 },
    Rreq(RouteMessage),
    Rrep(RouteMessage),
    Hello(Hello),
    Ack(Ack),
    Reward(Reward),
    ReliableData(DataHeader),
}

impl Message {
    /// The 4-bit wire tag this message encodes to.
    pub fn tag(&self) -> u8 {
        match self {
            Message::UnicastData(_) => TAG_UNICAST,
            Message::BroadcastData { .. } => TAG_BROADCAST,
            Message::Rreq(r) => match r.src_ip {
                IpAddr::V4(_) => TAG_RREQ4,
                IpAddr::V6(_) => TAG_RREQ6,
            },
            Message::Rrep(r) => match r.src_ip {
                IpAddr::V4(_) => TAG_RREP4,
                IpAddr::V6(_) => TAG_RREP6,
            },
            Message::Hello(_) => TAG_HELLO,
            Message::Ack(_) => TAG_ACK,
            Message::Reward(_) => TAG_REWARD,
            Message::ReliableData(_) => TAG_RELIABLE,
        }
    }

    /// The 20-bit message id, or 0 for HELLO which carries none.
    pub fn id(&self) -> u32 {
        match self {
            Message::UnicastData(h) | Message::ReliableData(h) => h.id,
            Message::BroadcastData { id, .. } => *id,
            Message::Rreq(r) | Message::Rrep(r) => r.id,
            Message::Hello(_) => 0,
            Message::Ack(a) => a.id,
            Message::Reward(r) => r.id,
        }
    }

    /// The exact number of bytes this message occupies on the wire, used to
    /// find the start of the payload when unframing.
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::UnicastData(_) | Message::BroadcastData { .. } | Message::ReliableData(_) => 4,
            Message::Rreq(r) | Message::Rrep(r) => match r.src_ip {
                IpAddr::V4(_) => 12,
                IpAddr::V6(_) => 36,
            },
            Message::Hello(h) => 4 + usize::from(h.ipv4.is_some()) * 4 + h.ipv6.len() * 16,
            Message::Ack(_) | Message::Reward(_) => 8,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(8);
        match self {
            Message::UnicastData(h) => {
                out.extend_from_slice(&data_word(TAG_UNICAST, h.id, h.hop_count));
            }
            Message::BroadcastData { id, broadcast_ttl } => {
                out.extend_from_slice(&data_word(TAG_BROADCAST, *id, *broadcast_ttl));
            }
            Message::ReliableData(h) => {
                out.extend_from_slice(&data_word(TAG_RELIABLE, h.id, h.hop_count));
            }
            Message::Rreq(r) => encode_route(r, TAG_RREQ4, TAG_RREQ6, &mut out)?,
            Message::Rrep(r) => encode_route(r, TAG_RREP4, TAG_RREP6, &mut out)?,
            Message::Hello(h) => encode_hello(h, &mut out)?,
            Message::Ack(a) => {
                let word: u64 = u64::from(TAG_ACK)
                    | (u64::from(a.id & 0xF_FFFF) << 4)
                    | (u64::from(a.tx_count) << 24)
                    | (u64::from(a.msg_hash) << 32);
                out.extend_from_slice(&word.to_le_bytes());
            }
            Message::Reward(r) => {
                let neg = u64::from(r.value < 0);
                let magnitude = u64::from(r.value.unsigned_abs() & 0x7F);
                let word: u64 = u64::from(TAG_REWARD)
                    | (u64::from(r.id & 0xF_FFFF) << 4)
                    | (neg << 24)
                    | (magnitude << 25)
                    | (u64::from(r.msg_hash) << 32);
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        Ok(out)
    }

    /// Decode one message from the head of `buf`. Trailing bytes (the data
    /// payload) are the caller's business.
    pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
        if buf.is_empty() {
            return Err(WireError::Truncated { got: 0, need: 4 });
        }
        let tag = buf[0] & 0x0F;
        let need = min_len(tag)?;
        if buf.len() < need {
            return Err(WireError::Truncated { got: buf.len(), need });
        }

        match tag {
            TAG_UNICAST | TAG_BROADCAST | TAG_RELIABLE => {
                let (id, count) = split_data_word(buf);
                Ok(match tag {
                    TAG_UNICAST => Message::UnicastData(DataHeader { id, hop_count: count }),
                    TAG_RELIABLE => Message::ReliableData(DataHeader { id, hop_count: count }),
                    _ => Message::BroadcastData { id, broadcast_ttl: count },
                })
            }
            TAG_RREQ4 | TAG_RREP4 => {
                let (id, hop_count) = split_data_word(buf);
                let src_ip = IpAddr::V4(read_v4(&buf[4..8]));
                let dst_ip = IpAddr::V4(read_v4(&buf[8..12]));
                let body = RouteMessage { id, hop_count, src_ip, dst_ip };
                Ok(if tag == TAG_RREQ4 { Message::Rreq(body) } else { Message::Rrep(body) })
            }
            TAG_RREQ6 | TAG_RREP6 => {
                let (id, hop_count) = split_data_word(buf);
                let src_ip = read_v6_carrier(&buf[4..20]);
                let dst_ip = read_v6_carrier(&buf[20..36]);
                let body = RouteMessage { id, hop_count, src_ip, dst_ip };
                Ok(if tag == TAG_RREQ6 { Message::Rreq(body) } else { Message::Rrep(body) })
            }
            TAG_HELLO => decode_hello(buf),
            TAG_ACK => {
                let word = u64::from_le_bytes(buf[..8].try_into().expect("length checked"));
                Ok(Message::Ack(Ack {
                    id: ((word >> 4) & 0xF_FFFF) as u32,
                    tx_count: ((word >> 24) & 0xFF) as u8,
                    msg_hash: (word >> 32) as u32,
                }))
            }
            TAG_REWARD => {
                let word = u64::from_le_bytes(buf[..8].try_into().expect("length checked"));
                let magnitude = ((word >> 25) & 0x7F) as i8;
                let value = if (word >> 24) & 1 == 1 { -magnitude } else { magnitude };
                Ok(Message::Reward(Reward {
                    id: ((word >> 4) & 0xF_FFFF) as u32,
                    value,
                    msg_hash: (word >> 32) as u32,
                }))
            }
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Minimum encoded size for a tag; HELLO's address block is validated
/// separately once the counts are known.
fn min_len(tag: u8) -> Result<usize, WireError> {
    match tag {
        TAG_UNICAST | TAG_BROADCAST | TAG_RELIABLE | TAG_HELLO => Ok(4),
        TAG_RREQ4 | TAG_RREP4 => Ok(12),
        TAG_RREQ6 | TAG_RREP6 => Ok(36),
        TAG_ACK | TAG_REWARD => Ok(8),
        other => Err(WireError::UnknownType(other)),
    }
}

fn data_word(tag: u8, id: u32, count: u8) -> [u8; 4] {
    let word: u32 = u32::from(tag) | ((id & 0xF_FFFF) << 4) | (u32::from(count) << 24);
    word.to_le_bytes()
}

fn split_data_word(buf: &[u8]) -> (u32, u8) {
    let word = u32::from_le_bytes(buf[..4].try_into().expect("length checked"));
    ((word >> 4) & 0xF_FFFF, (word >> 24) as u8)
}

fn write_v4(addr: Ipv4Addr, out: &mut Vec<u8>) {
    out.extend_from_slice(&u32::from(addr).to_le_bytes());
}

fn read_v4(buf: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from(u32::from_le_bytes(buf[..4].try_into().expect("length checked")))
}

fn write_v6(addr: Ipv6Addr, out: &mut Vec<u8>) {
    out.extend_from_slice(&u128::from(addr).to_le_bytes());
}

fn read_v6(buf: &[u8]) -> Ipv6Addr {
    Ipv6Addr::from(u128::from_le_bytes(buf[..16].try_into().expect("length checked")))
}

/// The all-zero IPv6 address inside an RREQ6/RREP6 is the carried form of
/// the default-route sentinel; map it back on decode.
fn read_v6_carrier(buf: &[u8]) -> IpAddr {
    let addr = read_v6(buf);
    if addr == Ipv6Addr::UNSPECIFIED {
        DEFAULT_ROUTE
    } else {
        IpAddr::V6(addr)
    }
}

fn to_v6_carrier(addr: IpAddr) -> Result<Ipv6Addr, WireError> {
    match addr {
        IpAddr::V6(v6) => Ok(v6),
        IpAddr::V4(v4) if v4 == Ipv4Addr::UNSPECIFIED => Ok(Ipv6Addr::UNSPECIFIED),
        IpAddr::V4(v4) => Err(WireError::BadAddress(format!(
            "cannot carry {v4} in an IPv6-layout message"
        ))),
    }
}

fn encode_route(
    body: &RouteMessage,
    tag_v4: u8,
    tag_v6: u8,
    out: &mut Vec<u8>,
) -> Result<(), WireError> {
    match body.src_ip {
        IpAddr::V4(src) => {
            let dst = match body.dst_ip {
                IpAddr::V4(dst) => dst,
                IpAddr::V6(dst) => {
                    return Err(WireError::BadAddress(format!(
                        "cannot carry {dst} in an IPv4-layout message"
                    )))
                }
            };
            out.extend_from_slice(&data_word(tag_v4, body.id, body.hop_count));
            write_v4(src, out);
            write_v4(dst, out);
        }
        IpAddr::V6(src) => {
            let dst = to_v6_carrier(body.dst_ip)?;
            out.extend_from_slice(&data_word(tag_v6, body.id, body.hop_count));
            write_v6(src, out);
            write_v6(dst, out);
        }
    }
    Ok(())
}

fn encode_hello(hello: &Hello, out: &mut Vec<u8>) -> Result<(), WireError> {
    if hello.ipv6.len() > 3 {
        return Err(WireError::BadAddress(format!(
            "HELLO carries at most 3 IPv6 addresses, got {}",
            hello.ipv6.len()
        )));
    }
    let ipv4_count = u32::from(hello.ipv4.is_some());
    let word: u32 = u32::from(TAG_HELLO)
        | (ipv4_count << 4)
        | ((hello.ipv6.len() as u32) << 5)
        | ((hello.tx_count & 0xFF_FFFF) << 7)
        | (u32::from(hello.gw_mode) << 31);
    out.extend_from_slice(&word.to_le_bytes());
    if let Some(v4) = hello.ipv4 {
        write_v4(v4, out);
    }
    for v6 in &hello.ipv6 {
        write_v6(*v6, out);
    }
    Ok(())
}

fn decode_hello(buf: &[u8]) -> Result<Message, WireError> {
    let word = u32::from_le_bytes(buf[..4].try_into().expect("length checked"));
    let ipv4_count = ((word >> 4) & 0x1) as usize;
    let ipv6_count = ((word >> 5) & 0x3) as usize;
    let tx_count = (word >> 7) & 0xFF_FFFF;
    let gw_mode = (word >> 31) & 1 == 1;

    let need = 4 + ipv4_count * 4 + ipv6_count * 16;
    if buf.len() < need {
        return Err(WireError::Truncated { got: buf.len(), need });
    }

    let mut offset = 4;
    let ipv4 = if ipv4_count == 1 {
        let addr = read_v4(&buf[offset..offset + 4]);
        offset += 4;
        Some(addr)
    } else {
        None
    };
    let mut ipv6 = Vec::with_capacity(ipv6_count);
    for _ in 0..ipv6_count {
        ipv6.push(read_v6(&buf[offset..offset + 16]));
        offset += 16;
    }

    Ok(Message::Hello(Hello { ipv4, ipv6, tx_count, gw_mode }))
}
