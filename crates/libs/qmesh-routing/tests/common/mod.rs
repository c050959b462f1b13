//! In-memory link and app-port doubles shared by the integration tests.
#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use qmesh_net::NetError;
use qmesh_routing::port::{AppPort, MeshLink};
use qmesh_wire::{MacAddr, Message};

pub type SentFrame = (MacAddr, Message, Vec<u8>);

/// A mesh link that records every transmitted frame and replays frames
/// pushed by the test.
pub struct MockLink {
    own: MacAddr,
    sent: StdMutex<Vec<SentFrame>>,
    rx_tx: mpsc::UnboundedSender<SentFrame>,
    rx: Mutex<mpsc::UnboundedReceiver<SentFrame>>,
}

impl MockLink {
    pub fn new(own: MacAddr) -> Arc<Self> {
        let (rx_tx, rx) = mpsc::unbounded_channel();
        Arc::new(MockLink { own, sent: StdMutex::new(Vec::new()), rx_tx, rx: Mutex::new(rx) })
    }

    /// Everything transmitted so far, oldest first.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Drains the transmit record.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_count(&self, pred: impl Fn(&SentFrame) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|f| pred(f)).count()
    }

    /// Queues a frame for `recv` (as if it arrived from `src`).
    #[allow(dead_code)]
    pub fn push_incoming(&self, src: MacAddr, message: Message, payload: Vec<u8>) {
        self.rx_tx.send((src, message, payload)).expect("receiver alive");
    }
}

#[async_trait]
impl MeshLink for MockLink {
    fn own_mac(&self) -> MacAddr {
        self.own
    }

    async fn send(&self, dst: MacAddr, message: &Message, payload: &[u8]) -> Result<(), NetError> {
        self.sent.lock().unwrap().push((dst, message.clone(), payload.to_vec()));
        Ok(())
    }

    async fn recv(&self) -> Result<(MacAddr, Message, Vec<u8>), NetError> {
        self.rx.lock().await.recv().await.ok_or(NetError::Closed)
    }
}

/// An app port that records deliveries and re-injections.
#[derive(Default)]
pub struct MockApp {
    addresses: StdMutex<Vec<IpAddr>>,
    delivered: StdMutex<Vec<Vec<u8>>>,
    injected: StdMutex<Vec<Vec<u8>>>,
}

impl MockApp {
    pub fn new(addresses: Vec<IpAddr>) -> Arc<Self> {
        Arc::new(MockApp { addresses: StdMutex::new(addresses), ..Default::default() })
    }

    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn injected(&self) -> Vec<Vec<u8>> {
        self.injected.lock().unwrap().clone()
    }

    pub fn take_injected(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.injected.lock().unwrap())
    }
}

#[async_trait]
impl AppPort for MockApp {
    async fn recv_from_app(&self) -> Result<Vec<u8>, NetError> {
        // The tests drive the handler directly; a blocking read would only
        // be reached by the job loops, which these tests do not start.
        std::future::pending().await
    }

    async fn send_to_app(&self, packet: &[u8]) -> Result<(), NetError> {
        self.delivered.lock().unwrap().push(packet.to_vec());
        Ok(())
    }

    async fn inject_back(&self, packet: &[u8]) -> Result<(), NetError> {
        self.injected.lock().unwrap().push(packet.to_vec());
        Ok(())
    }

    fn addresses(&self) -> Vec<IpAddr> {
        self.addresses.lock().unwrap().clone()
    }
}

pub fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, last])
}

pub fn ip(last: u8) -> IpAddr {
    format!("10.0.0.{last}").parse().unwrap()
}

/// A minimal IPv4/UDP packet between two mesh addresses.
pub fn udp_packet(src: IpAddr, dst: IpAddr, dst_port: u16) -> Vec<u8> {
    let (IpAddr::V4(src), IpAddr::V4(dst)) = (src, dst) else {
        panic!("test helper builds IPv4 packets only");
    };
    let mut packet = vec![0u8; 28];
    packet[0] = 0x45;
    packet[9] = 17;
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    packet[22..24].copy_from_slice(&dst_port.to_be_bytes());
    packet
}

/// Same shape with TCP so the default ARQ allow-list (port 22) can match.
pub fn tcp_packet(src: IpAddr, dst: IpAddr, dst_port: u16) -> Vec<u8> {
    let mut packet = udp_packet(src, dst, dst_port);
    packet[9] = 6;
    packet
}
