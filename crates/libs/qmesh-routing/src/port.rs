//! I/O seams the routing core runs against: the raw mesh link and the
//! virtual interface. Production wires in `qmesh-net`; tests wire in
//! in-memory implementations.

use std::net::IpAddr;

use async_trait::async_trait;

use qmesh_net::{NetError, RawLink, TunDevice};
use qmesh_wire::{MacAddr, Message};

/// Frame-level access to the mesh device.
#[async_trait]
pub trait MeshLink: Send + Sync {
    fn own_mac(&self) -> MacAddr;

    async fn send(&self, dst: MacAddr, message: &Message, payload: &[u8]) -> Result<(), NetError>;

    /// The next acceptable frame (loopback and filtered frames already
    /// skipped) as `(src_mac, message, payload)`.
    async fn recv(&self) -> Result<(MacAddr, Message, Vec<u8>), NetError>;
}

/// Packet-level access to the virtual interface.
#[async_trait]
pub trait AppPort: Send + Sync {
    async fn recv_from_app(&self) -> Result<Vec<u8>, NetError>;

    async fn send_to_app(&self, packet: &[u8]) -> Result<(), NetError>;

    /// Re-queues a packet through our own TUN read path.
    async fn inject_back(&self, packet: &[u8]) -> Result<(), NetError>;

    fn addresses(&self) -> Vec<IpAddr>;
}

#[async_trait]
impl MeshLink for RawLink {
    fn own_mac(&self) -> MacAddr {
        RawLink::own_mac(self)
    }

    async fn send(&self, dst: MacAddr, message: &Message, payload: &[u8]) -> Result<(), NetError> {
        RawLink::send(self, dst, message, payload).await
    }

    async fn recv(&self) -> Result<(MacAddr, Message, Vec<u8>), NetError> {
        RawLink::recv(self).await
    }
}

#[async_trait]
impl AppPort for TunDevice {
    async fn recv_from_app(&self) -> Result<Vec<u8>, NetError> {
        TunDevice::recv_from_app(self).await
    }

    async fn send_to_app(&self, packet: &[u8]) -> Result<(), NetError> {
        TunDevice::send_to_app(self, packet).await
    }

    async fn inject_back(&self, packet: &[u8]) -> Result<(), NetError> {
        TunDevice::inject_back(self, packet).await
    }

    fn addresses(&self) -> Vec<IpAddr> {
        TunDevice::addresses(self)
    }
}
