//! The TUN virtual interface carrying user IP traffic in and out of the
//! daemon, plus the injection socket used to re-queue packets through our
//! own read path.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tokio::io::unix::AsyncFd;

use crate::error::NetError;
use crate::ifaces::{self, ctl_socket, ifreq_for};
use crate::l2::if_index;
use crate::parse::strip_packet_info;

pub const DEFAULT_TUN_NAME: &str = "adhoc0";
pub const TUN_MTU: i32 = 1400;

const ETH_P_IP: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86DD;

/// `struct in6_ifreq` from linux/ipv6.h; libc does not export it.
#[repr(C)]
struct In6Ifreq {
    ifr6_addr: libc::in6_addr,
    ifr6_prefixlen: u32,
    ifr6_ifindex: i32,
}

/// A TUN device (IFF_TUN | IFF_NO_PI) with MTU 1400, brought up on open.
pub struct TunDevice {
    fd: AsyncFd<OwnedFd>,
    inject_fd: AsyncFd<OwnedFd>,
    inject_ifindex: i32,
    name: String,
}

impl TunDevice {
    /// Creates (or attaches to) the named TUN device, sets the MTU, brings
    /// the interface up, and opens the injection socket.
    pub fn open(name: &str) -> Result<Self, NetError> {
        let raw = unsafe {
            libc::open(
                b"/dev/net/tun\0".as_ptr() as *const libc::c_char,
                libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(NetError::Io(io::Error::last_os_error()));
        }
        let owned = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut req = ifreq_for(name);
        req.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;
        if unsafe { libc::ioctl(owned.as_raw_fd(), libc::TUNSETIFF, &req) } < 0 {
            return Err(NetError::Io(io::Error::last_os_error()));
        }

        set_mtu(name, TUN_MTU)?;
        bring_up(name)?;

        let inject_ifindex = if_index(name)?;
        let inject_fd = open_inject_socket()?;

        log::info!("virtual interface {name} up, mtu {TUN_MTU}");
        Ok(TunDevice {
            fd: AsyncFd::new(owned)?,
            inject_fd,
            inject_ifindex,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads one IP packet originated (or re-emitted) by the kernel.
    pub async fn recv_from_app(&self) -> Result<Vec<u8>, NetError> {
        let mut buf = vec![0u8; 65_535];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|fd| {
                let ret = unsafe {
                    libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(0)) => return Err(NetError::Closed),
                Ok(Ok(n)) => return Ok(strip_packet_info(&buf[..n]).to_vec()),
                Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Ok(Err(e)) => return Err(NetError::Io(e)),
                Err(_) => continue,
            }
        }
    }

    /// Delivers one IP packet up to the kernel stack.
    pub async fn send_to_app(&self, packet: &[u8]) -> Result<(), NetError> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|fd| {
                let ret = unsafe {
                    libc::write(fd.as_raw_fd(), packet.as_ptr() as *const libc::c_void, packet.len())
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Ok(Err(e)) => return Err(NetError::Io(e)),
                Err(_) => continue,
            }
        }
    }

    /// Transmits a packet "out of" the TUN device so it re-enters our own
    /// read path, re-resolved by the data handler on the way back.
    pub async fn inject_back(&self, packet: &[u8]) -> Result<(), NetError> {
        let protocol = match packet.first().map(|b| b >> 4) {
            Some(6) => ETH_P_IPV6,
            _ => ETH_P_IP,
        };
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = protocol.to_be();
        addr.sll_ifindex = self.inject_ifindex;

        loop {
            let mut guard = self.inject_fd.writable().await?;
            match guard.try_io(|fd| {
                let ret = unsafe {
                    libc::sendto(
                        fd.as_raw_fd(),
                        packet.as_ptr() as *const libc::c_void,
                        packet.len(),
                        0,
                        &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                        std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Ok(Err(e)) => return Err(NetError::Io(e)),
                Err(_) => continue,
            }
        }
    }

    /// The L3 addresses currently assigned to the device, IPv4 first.
    pub fn addresses(&self) -> Vec<IpAddr> {
        ifaces::addresses(&self.name)
    }

    /// Assigns an IPv4 address with a /24 netmask (management command).
    pub fn set_ipv4(&self, addr: Ipv4Addr) -> Result<(), NetError> {
        let sock = ctl_socket()?;

        let mut req = ifreq_for(&self.name);
        write_sockaddr_in(&mut req, addr);
        if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFADDR, &req) } < 0 {
            return Err(NetError::Io(io::Error::last_os_error()));
        }

        let mut req = ifreq_for(&self.name);
        write_sockaddr_in(&mut req, Ipv4Addr::new(255, 255, 255, 0));
        if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFNETMASK, &req) } < 0 {
            return Err(NetError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Assigns an IPv6 address with a /64 prefix (management command).
    pub fn set_ipv6(&self, addr: Ipv6Addr) -> Result<(), NetError> {
        let sock = socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::DGRAM, None)?;
        let req = In6Ifreq {
            ifr6_addr: libc::in6_addr { s6_addr: addr.octets() },
            ifr6_prefixlen: 64,
            ifr6_ifindex: self.inject_ifindex,
        };
        if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFADDR, &req) } < 0 {
            return Err(NetError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

fn write_sockaddr_in(req: &mut libc::ifreq, addr: Ipv4Addr) {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr { s_addr: u32::from(addr).to_be() },
        sin_zero: [0; 8],
    };
    unsafe {
        let dst = &mut req.ifr_ifru.ifru_addr as *mut libc::sockaddr as *mut libc::sockaddr_in;
        *dst = sin;
    }
}

fn set_mtu(device: &str, mtu: i32) -> Result<(), NetError> {
    let sock = ctl_socket()?;
    let mut req = ifreq_for(device);
    req.ifr_ifru.ifru_mtu = mtu;
    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFMTU, &req) } < 0 {
        return Err(NetError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

fn bring_up(device: &str) -> Result<(), NetError> {
    let sock = ctl_socket()?;
    let mut req = ifreq_for(device);
    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS, &mut req) } < 0 {
        return Err(NetError::Io(io::Error::last_os_error()));
    }
    unsafe {
        req.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
    }
    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS, &req) } < 0 {
        return Err(NetError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

/// The injection socket: AF_PACKET/DGRAM, unbound; each `sendto` names the
/// TUN ifindex explicitly.
fn open_inject_socket() -> Result<AsyncFd<OwnedFd>, NetError> {
    let socket = socket2::Socket::new(socket2::Domain::PACKET, socket2::Type::DGRAM, None)?;
    socket.set_nonblocking(true)?;
    let raw_fd = socket.as_raw_fd();
    std::mem::forget(socket);
    let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
    Ok(AsyncFd::new(fd)?)
}
