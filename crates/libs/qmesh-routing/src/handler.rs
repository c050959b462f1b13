//! The data handler: classifies and routes every message entering the node,
//! whether from the local application (via the TUN device) or from the mesh.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use tokio::sync::Mutex;

use qmesh_net::{l3_info, l4_info};
use qmesh_wire::{
    random_id, DataHeader, MacAddr, Message, RouteMessage, DEFAULT_ROUTE,
};

use crate::arq::ArqHandler;
use crate::config::{GatewayType, RoutingConfig};
use crate::neighbors::{self, write_neighbors_file};
use crate::path::PathDiscovery;
use crate::port::{AppPort, MeshLink};
use crate::reward::{RewardSendHandler, RewardWaitHandler};
use crate::seen::SeenIds;
use crate::state::SharedRouteState;
use crate::table::round2;

/// Base of the hop-count-scaled reward an RREQ/RREP teaches the reverse
/// path: `round(50 / hop_count, 2)`.
pub const DISCOVERY_REWARD_BASE: f64 = 50.0;

/// Broadcast frames are flooded at most this many hops.
pub const MAX_BROADCAST_TTL: u8 = 1;

pub struct DataHandler {
    config: RoutingConfig,
    link: Arc<dyn MeshLink>,
    app: Arc<dyn AppPort>,
    state: SharedRouteState,
    arq: Arc<ArqHandler>,
    path: Arc<PathDiscovery>,
    reward_wait: Arc<RewardWaitHandler>,
    reward_send: Arc<RewardSendHandler>,
    seen_broadcasts: Mutex<SeenIds>,
    seen_rreqs: Mutex<SeenIds>,
    seen_rreps: Mutex<SeenIds>,
    seen_reliable: Mutex<SeenIds>,
}

impl DataHandler {
    pub fn new(
        config: RoutingConfig,
        link: Arc<dyn MeshLink>,
        app: Arc<dyn AppPort>,
        state: SharedRouteState,
    ) -> Arc<Self> {
        let arq = Arc::new(ArqHandler::new(link.clone(), state.clone()));
        let path = Arc::new(PathDiscovery::new(arq.clone(), app.clone()));
        let reward_wait = Arc::new(RewardWaitHandler::new(state.clone()));
        let reward_send = Arc::new(RewardSendHandler::new(link.clone(), state.clone()));
        Arc::new(DataHandler {
            config,
            link,
            app,
            state,
            arq,
            path,
            reward_wait,
            reward_send,
            seen_broadcasts: Mutex::new(SeenIds::new()),
            seen_rreqs: Mutex::new(SeenIds::new()),
            seen_rreps: Mutex::new(SeenIds::new()),
            seen_reliable: Mutex::new(SeenIds::new()),
        })
    }

    pub fn arq(&self) -> &Arc<ArqHandler> {
        &self.arq
    }

    pub fn path(&self) -> &Arc<PathDiscovery> {
        &self.path
    }

    pub fn reward_wait(&self) -> &Arc<RewardWaitHandler> {
        &self.reward_wait
    }

    pub fn state(&self) -> &SharedRouteState {
        &self.state
    }

    /// One packet read from the virtual interface on its way into the mesh.
    pub async fn process_outgoing(&self, packet: Vec<u8>) {
        let (src_ip, dst_ip) = match l3_info(&packet) {
            Ok(info) => info,
            Err(err) => {
                log::error!("dropping outgoing packet: {err}");
                return;
            }
        };

        if is_group_destination(dst_ip) {
            let id = random_id();
            self.seen_broadcasts.lock().await.record(id);
            let message = Message::BroadcastData { id, broadcast_ttl: 1 };
            if let Err(err) = self.link.send(MacAddr::BROADCAST, &message, &packet).await {
                log::error!("failed to flood broadcast {id}: {err}");
            }
            return;
        }

        let dst = self.map_gateway(dst_ip).await;
        let next = self.state.lock().await.next_hop(dst);
        match next {
            None => self.path.run_path_discovery(src_ip, dst, packet).await,
            Some(mac) => self.dispatch_data(dst, mac, &packet, random_id(), 1).await,
        }
    }

    /// One frame received from the mesh.
    pub async fn process_incoming(&self, src_mac: MacAddr, message: Message, payload: Vec<u8>) {
        match message {
            Message::UnicastData(header) => {
                self.handle_data(src_mac, header, payload, false).await
            }
            Message::ReliableData(header) => {
                self.handle_data(src_mac, header, payload, true).await
            }
            Message::BroadcastData { id, broadcast_ttl } => {
                self.handle_broadcast(id, broadcast_ttl, payload).await
            }
            Message::Rreq(rreq) => self.handle_rreq(src_mac, rreq).await,
            Message::Rrep(rrep) => self.handle_rrep(src_mac, rrep).await,
            Message::Hello(hello) => self.handle_hello(src_mac, &hello).await,
            Message::Ack(ack) => self.arq.process_ack(&ack).await,
            Message::Reward(reward) => self.reward_wait.set_reward(&reward).await,
        }
    }

    async fn handle_data(
        &self,
        src_mac: MacAddr,
        header: DataHeader,
        packet: Vec<u8>,
        reliable: bool,
    ) {
        if reliable {
            // ACK before any processing so the sender's retransmit loop
            // stops promptly, duplicates included.
            self.arq.send_ack(&Message::ReliableData(header), src_mac).await;
        }

        let dst_ip = match l3_info(&packet) {
            Ok((_, dst)) => dst,
            Err(err) => {
                log::error!("dropping data frame from {src_mac}: {err}");
                return;
            }
        };

        self.reward_send.send_reward(dst_ip, src_mac).await;

        if reliable && !self.seen_reliable.lock().await.check_and_record(header.id) {
            log::debug!("duplicate reliable packet {}; dropped after ACK", header.id);
            return;
        }

        let gateway_sink = self.config.gateway_mode && dst_ip == DEFAULT_ROUTE;
        let for_us = gateway_sink || self.state.lock().await.is_own_ip(dst_ip);

        if for_us {
            if let Err(err) = self.app.send_to_app(&packet).await {
                log::error!("failed to deliver packet up: {err}");
            }
            return;
        }

        if self.config.monitoring_mode {
            log::debug!("monitoring mode: not forwarding packet for {dst_ip}");
            return;
        }

        let next = self.state.lock().await.next_hop(dst_ip);
        match next {
            Some(mac) => {
                self.dispatch_data(
                    dst_ip,
                    mac,
                    &packet,
                    header.id,
                    header.hop_count.saturating_add(1),
                )
                .await
            }
            None => {
                // Route evaporated between hops; push the packet back
                // through our own TUN path to trigger fresh discovery.
                log::info!("no route for transit packet to {dst_ip}; re-injecting");
                if let Err(err) = self.app.inject_back(&packet).await {
                    log::error!("failed to re-inject transit packet: {err}");
                }
            }
        }
    }

    /// Sends one data packet to `mac`, reliably when the ARQ allow-list
    /// covers it, and arms the reward wait either way.
    async fn dispatch_data(
        &self,
        dst_ip: IpAddr,
        mac: MacAddr,
        packet: &[u8],
        id: u32,
        hop_count: u8,
    ) {
        let (proto, port) = l4_info(packet);
        if self.config.arq_applies(proto, port) {
            let message = Message::ReliableData(DataHeader { id, hop_count });
            self.arq.arq_send(&message, &[mac], packet).await;
        } else {
            let message = Message::UnicastData(DataHeader { id, hop_count });
            if let Err(err) = self.link.send(mac, &message, packet).await {
                log::error!("failed to send data for {dst_ip} to {mac}: {err}");
            }
        }
        self.reward_wait.wait_for_reward(dst_ip, mac).await;
    }

    async fn handle_broadcast(&self, id: u32, broadcast_ttl: u8, packet: Vec<u8>) {
        if self.seen_broadcasts.lock().await.contains(id) {
            log::debug!("duplicate broadcast {id}; dropped");
            return;
        }
        if broadcast_ttl > MAX_BROADCAST_TTL {
            log::debug!("broadcast {id} over TTL ({broadcast_ttl}); dropped");
            return;
        }

        if let Err(err) = self.app.send_to_app(&packet).await {
            log::error!("failed to deliver broadcast up: {err}");
        }
        self.seen_broadcasts.lock().await.record(id);

        let message = Message::BroadcastData { id, broadcast_ttl: broadcast_ttl + 1 };
        if let Err(err) = self.link.send(MacAddr::BROADCAST, &message, &packet).await {
            log::error!("failed to re-flood broadcast {id}: {err}");
        }
    }

    async fn handle_rreq(&self, src_mac: MacAddr, rreq: RouteMessage) {
        self.arq.send_ack(&Message::Rreq(rreq.clone()), src_mac).await;

        if !self.seen_rreqs.lock().await.check_and_record(rreq.id) {
            return;
        }

        let hops = rreq.hop_count.max(1);
        let reward = round2(DISCOVERY_REWARD_BASE / f64::from(hops));
        let gateway_sink = self.config.gateway_mode && rreq.dst_ip == DEFAULT_ROUTE;
        let for_us = {
            let mut state = self.state.lock().await;
            state.table.update_entry(rreq.src_ip, src_mac, reward);
            gateway_sink || state.is_own_ip(rreq.dst_ip)
        };

        if for_us {
            let rrep = Message::Rrep(RouteMessage {
                id: rreq.id,
                hop_count: 1,
                src_ip: carrier_compatible(rreq.dst_ip, rreq.src_ip),
                dst_ip: rreq.src_ip,
            });
            log::info!("answering RREQ {} from {} with RREP", rreq.id, rreq.src_ip);
            self.arq.arq_broadcast_send(&rrep, &[]).await;
        } else if self.config.monitoring_mode {
            log::debug!("monitoring mode: not re-broadcasting RREQ {}", rreq.id);
        } else {
            let mut forward = rreq.clone();
            forward.hop_count = forward.hop_count.saturating_add(1);
            let dsts = self.state.lock().await.neighbor_macs_except(Some(src_mac));
            self.arq.arq_send(&Message::Rreq(forward), &dsts, &[]).await;
        }
    }

    async fn handle_rrep(&self, src_mac: MacAddr, rrep: RouteMessage) {
        self.arq.send_ack(&Message::Rrep(rrep.clone()), src_mac).await;

        if !self.seen_rreps.lock().await.check_and_record(rrep.id) {
            return;
        }

        let hops = rrep.hop_count.max(1);
        let reward = round2(DISCOVERY_REWARD_BASE / f64::from(hops));
        let for_us = {
            let mut state = self.state.lock().await;
            state.table.update_entry(rrep.src_ip, src_mac, reward);
            state.is_own_ip(rrep.dst_ip)
        };

        if for_us {
            self.path.process_rrep(&rrep).await;
        } else if self.config.monitoring_mode {
            log::debug!("monitoring mode: not forwarding RREP {}", rrep.id);
        } else {
            let mut forward = rrep.clone();
            forward.hop_count = forward.hop_count.saturating_add(1);
            let dsts = self.state.lock().await.neighbor_macs_except(Some(src_mac));
            self.arq.arq_send(&Message::Rrep(forward), &dsts, &[]).await;
        }
    }

    async fn handle_hello(&self, src_mac: MacAddr, hello: &qmesh_wire::Hello) {
        let mut state = self.state.lock().await;
        if neighbors::process_hello(&mut state, src_mac, hello) {
            if let Err(err) = write_neighbors_file(&self.config.data_dir, &state.neighbors) {
                log::error!("failed to rewrite neighbors file: {err}");
            }
        }
    }

    /// Rewrites public destinations to the default-route sentinel per the
    /// configured gateway classification.
    async fn map_gateway(&self, dst: IpAddr) -> IpAddr {
        match self.config.gateway_type {
            GatewayType::Disabled => dst,
            GatewayType::Public => match dst {
                IpAddr::V4(v4) if is_public_v4(v4) => DEFAULT_ROUTE,
                _ => dst,
            },
            GatewayType::Local => {
                if self.path.discovery_failed(dst).await {
                    DEFAULT_ROUTE
                } else {
                    dst
                }
            }
        }
    }
}

/// Destinations that are flooded rather than routed: IPv6 multicast,
/// IPv4 224.* / 239.* multicast, and IPv4 subnet broadcast (x.x.x.255).
pub fn is_group_destination(dst: IpAddr) -> bool {
    match dst {
        IpAddr::V6(v6) => v6.octets()[0] == 0xff,
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 224 || octets[0] == 239 || octets[3] == 255
        }
    }
}

fn is_public_v4(addr: Ipv4Addr) -> bool {
    !(addr.is_private()
        || addr.is_link_local()
        || addr.is_loopback()
        || addr.is_broadcast()
        || addr.is_multicast()
        || addr.is_unspecified())
}

/// An RREP answering a v6 requester must not carry a v4-shaped sentinel
/// source; shift it to the v6 carrier form so the layout stays consistent.
fn carrier_compatible(src: IpAddr, counterpart: IpAddr) -> IpAddr {
    match (src, counterpart) {
        (IpAddr::V4(v4), IpAddr::V6(_)) if v4 == Ipv4Addr::UNSPECIFIED => {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        }
        _ => src,
    }
}
