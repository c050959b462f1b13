//! Interface address queries: MAC from sysfs, IPv4 via ioctl, IPv6 via the
//! kernel's `/proc/net/if_inet6` table.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::AsRawFd;

use socket2::{Domain, Socket, Type};

use qmesh_wire::MacAddr;

use crate::error::NetError;

/// Reads the device's MAC address from sysfs.
pub fn device_mac(device: &str) -> Result<MacAddr, NetError> {
    let path = format!("/sys/class/net/{device}/address");
    let text = fs::read_to_string(&path).map_err(|_| NetError::NoDevice(device.into()))?;
    text.trim().parse().map_err(NetError::Wire)
}

pub(crate) fn ifreq_for(device: &str) -> libc::ifreq {
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(device.as_bytes().iter().take(15)) {
        *dst = *src as libc::c_char;
    }
    req
}

pub(crate) fn ctl_socket() -> Result<Socket, NetError> {
    Ok(Socket::new(Domain::IPV4, Type::DGRAM, None)?)
}

/// The IPv4 address currently assigned to the device, if any.
pub fn ipv4_address(device: &str) -> Result<Option<Ipv4Addr>, NetError> {
    let sock = ctl_socket()?;
    let mut req = ifreq_for(device);
    let ret = unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFADDR, &mut req) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        // EADDRNOTAVAIL just means no address is assigned yet.
        return match err.raw_os_error() {
            Some(libc::EADDRNOTAVAIL) | Some(libc::ENODEV) | Some(libc::EINVAL) => Ok(None),
            _ => Err(NetError::Io(err)),
        };
    }
    let addr = unsafe {
        let sin = &req.ifr_ifru.ifru_addr as *const libc::sockaddr as *const libc::sockaddr_in;
        (*sin).sin_addr.s_addr
    };
    Ok(Some(Ipv4Addr::from(u32::from_be(addr))))
}

/// All IPv6 addresses currently assigned to the device.
pub fn ipv6_addresses(device: &str) -> Vec<Ipv6Addr> {
    match fs::read_to_string("/proc/net/if_inet6") {
        Ok(content) => parse_if_inet6(&content, device),
        Err(_) => Vec::new(),
    }
}

/// Parses `/proc/net/if_inet6` content: one
/// `<32 hex digits> <ifindex> <prefixlen> <scope> <flags> <name>` per line.
fn parse_if_inet6(content: &str, device: &str) -> Vec<Ipv6Addr> {
    let mut out = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 || fields[5] != device || fields[0].len() != 32 {
            continue;
        }
        let mut octets = [0u8; 16];
        let mut valid = true;
        for (i, chunk) in fields[0].as_bytes().chunks(2).enumerate() {
            match u8::from_str_radix(std::str::from_utf8(chunk).unwrap_or(""), 16) {
                Ok(byte) => octets[i] = byte,
                Err(_) => {
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            out.push(Ipv6Addr::from(octets));
        }
    }
    out
}

/// Every L3 address currently assigned to the device, IPv4 first.
pub fn addresses(device: &str) -> Vec<IpAddr> {
    let mut out = Vec::new();
    if let Ok(Some(v4)) = ipv4_address(device) {
        out.push(IpAddr::V4(v4));
    }
    out.extend(ipv6_addresses(device).into_iter().map(IpAddr::V6));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_inet6_rows_are_matched_by_device() {
        let content = "\
fd000000000000000000000000000005 03 40 00 80    adhoc0
fe800000000000000000000000000001 02 40 20 80     wlan0
fd000000000000000000000000000006 03 40 00 80    adhoc0
";
        let addrs = parse_if_inet6(content, "adhoc0");
        assert_eq!(
            addrs,
            vec![
                "fd00::5".parse::<Ipv6Addr>().unwrap(),
                "fd00::6".parse::<Ipv6Addr>().unwrap()
            ]
        );
        assert_eq!(parse_if_inet6(content, "wlan0").len(), 1);
        assert!(parse_if_inet6(content, "eth0").is_empty());
    }

    #[test]
    fn malformed_if_inet6_rows_are_skipped() {
        let content = "zz000000000000000000000000000005 03 40 00 80 adhoc0\nshort adhoc0\n";
        assert!(parse_if_inet6(content, "adhoc0").is_empty());
    }
}
