//! The raw L2 mesh link: an AF_PACKET socket bound to the wireless device
//! and the 0x7777 EtherType.

use std::collections::HashSet;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use socket2::{Domain, Socket, Type};
use tokio::io::unix::AsyncFd;

use qmesh_wire::{frame, unframe, MacAddr, Message, ETHERTYPE};

use crate::error::NetError;

const RECV_BUF_LEN: usize = 65_535;

/// Resolves an interface name to its kernel index.
pub(crate) fn if_index(device: &str) -> Result<i32, NetError> {
    let name = CString::new(device).map_err(|_| NetError::NoDevice(device.into()))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(NetError::NoDevice(device.into()));
    }
    Ok(index as i32)
}

/// Opens a non-blocking AF_PACKET socket bound to `device` and `protocol`
/// (given in host order) and registers it with the reactor.
pub(crate) fn open_packet_socket(device: &str, protocol: u16) -> Result<AsyncFd<OwnedFd>, NetError> {
    let index = if_index(device)?;

    let socket = Socket::new(Domain::PACKET, Type::RAW, None)?;
    socket.set_nonblocking(true)?;

    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = protocol.to_be();
    addr.sll_ifindex = index;

    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(NetError::Io(io::Error::last_os_error()));
    }

    let raw_fd = socket.as_raw_fd();
    std::mem::forget(socket);
    let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
    Ok(AsyncFd::new(fd)?)
}

/// Send/receive endpoint for mesh frames on the physical device.
///
/// Frames from our own MAC are always discarded; when a topology allow-list
/// is configured, frames from MACs outside it are discarded too.
pub struct RawLink {
    fd: AsyncFd<OwnedFd>,
    own_mac: MacAddr,
    allowed: Option<HashSet<MacAddr>>,
}

impl RawLink {
    pub fn open(
        device: &str,
        own_mac: MacAddr,
        allowed: Option<HashSet<MacAddr>>,
    ) -> Result<Self, NetError> {
        let fd = open_packet_socket(device, ETHERTYPE)?;
        log::debug!("mesh link bound to {device} as {own_mac}");
        Ok(RawLink { fd, own_mac, allowed })
    }

    pub fn own_mac(&self) -> MacAddr {
        self.own_mac
    }

    /// Frames one message and transmits it to `dst`.
    pub async fn send(
        &self,
        dst: MacAddr,
        message: &Message,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let raw = frame(dst, self.own_mac, message, payload)?;
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|fd| {
                let ret = unsafe {
                    libc::send(fd.as_raw_fd(), raw.as_ptr() as *const libc::c_void, raw.len(), 0)
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

    /// Receives the next acceptable frame as `(src_mac, message, payload)`.
    ///
    /// Loopback, filtered, and unparseable frames are consumed and skipped;
    /// decode failures are logged at ERROR per the containment rule.
    pub async fn recv(&self) -> Result<(MacAddr, Message, Vec<u8>), NetError> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let n = self.recv_raw(&mut buf).await?;
            if n == 0 {
                return Err(NetError::Closed);
            }

            let (_, src, message, payload) = match unframe(&buf[..n]) {
                Ok(parts) => parts,
                Err(err) => {
                    log::error!("dropping unparseable frame ({n} bytes): {err}");
                    continue;
                }
            };

            if src == self.own_mac {
                continue;
            }
            if let Some(allowed) = &self.allowed {
                if !allowed.contains(&src) {
                    log::debug!("topology filter dropped frame from {src}");
                    continue;
                }
            }
            return Ok((src, message, payload));
        }
    }

    async fn recv_raw(&self, buf: &mut [u8]) -> Result<usize, NetError> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|fd| {
                let ret = unsafe {
                    libc::recv(fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Ok(Err(e)) => return Err(NetError::Io(e)),
                Err(_) => continue,
            }
        }
    }
}
