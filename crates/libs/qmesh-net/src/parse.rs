//! Pure L3/L4 header extraction for packets read from the TUN device.
//!
//! Only what the routing core needs: source/destination addresses and the
//! (protocol, destination port) pair the ARQ allow-list is keyed by. No
//! extension-header walking, no payload inspection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::NetError;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;

/// Upper-layer protocols the ARQ allow-list can name. Anything else maps to
/// `Unknown` with port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Proto {
    Tcp,
    Udp,
    Icmp4,
    Icmp6,
    Unknown,
}

impl FromStr for L4Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(L4Proto::Tcp),
            "UDP" => Ok(L4Proto::Udp),
            "ICMP4" | "ICMP" => Ok(L4Proto::Icmp4),
            "ICMP6" => Ok(L4Proto::Icmp6),
            other => Err(format!("unknown L4 protocol name: {other}")),
        }
    }
}

/// Strips the 4-byte tun packet-info prefix if the platform prepended one.
/// With IFF_NO_PI this is a no-op.
pub fn strip_packet_info(packet: &[u8]) -> &[u8] {
    if packet.is_empty() {
        return packet;
    }
    match packet[0] >> 4 {
        4 | 6 => packet,
        _ if packet.len() > 4 && matches!(packet[4] >> 4, 4 | 6) => &packet[4..],
        _ => packet,
    }
}

/// Extracts `(src_ip, dst_ip)` from a raw IP packet.
pub fn l3_info(packet: &[u8]) -> Result<(IpAddr, IpAddr), NetError> {
    if packet.is_empty() {
        return Err(NetError::UnsupportedL3(0));
    }
    match packet[0] >> 4 {
        4 => {
            if packet.len() < 20 {
                return Err(NetError::UnsupportedL3(4));
            }
            let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
            let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
            Ok((IpAddr::V4(src), IpAddr::V4(dst)))
        }
        6 => {
            if packet.len() < 40 {
                return Err(NetError::UnsupportedL3(6));
            }
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&packet[8..24]);
            dst.copy_from_slice(&packet[24..40]);
            Ok((IpAddr::V6(Ipv6Addr::from(src)), IpAddr::V6(Ipv6Addr::from(dst))))
        }
        other => Err(NetError::UnsupportedL3(other)),
    }
}

/// Extracts the `(L4 protocol, destination port)` pair. ICMP carries no
/// ports and yields 0; unparsable or unsupported packets yield
/// `(Unknown, 0)`.
pub fn l4_info(packet: &[u8]) -> (L4Proto, u16) {
    let (proto, l4_offset) = match packet.first().map(|b| b >> 4) {
        Some(4) if packet.len() >= 20 => {
            let ihl = usize::from(packet[0] & 0x0F) * 4;
            (packet[9], ihl)
        }
        Some(6) if packet.len() >= 40 => (packet[6], 40),
        _ => return (L4Proto::Unknown, 0),
    };

    match proto {
        IPPROTO_TCP | IPPROTO_UDP => {
            let kind = if proto == IPPROTO_TCP { L4Proto::Tcp } else { L4Proto::Udp };
            if packet.len() >= l4_offset + 4 {
                let port = u16::from_be_bytes([packet[l4_offset + 2], packet[l4_offset + 3]]);
                (kind, port)
            } else {
                (kind, 0)
            }
        }
        IPPROTO_ICMP => (L4Proto::Icmp4, 0),
        IPPROTO_ICMPV6 => (L4Proto::Icmp6, 0),
        _ => (L4Proto::Unknown, 0),
    }
}
