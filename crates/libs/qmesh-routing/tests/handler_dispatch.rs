//! Data-handler dispatch semantics: dedup idempotence, broadcast TTL,
//! monitoring mode, forwarding, and the ARQ allow-list split.

mod common;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{ip, mac, tcp_packet, udp_packet, MockApp, MockLink};
use qmesh_routing::handler::DataHandler;
use qmesh_routing::neighbors::process_hello;
use qmesh_routing::{RouteState, RoutingConfig, Selector};
use qmesh_wire::{DataHeader, Hello, MacAddr, Message, RouteMessage};

struct Node {
    link: Arc<MockLink>,
    app: Arc<MockApp>,
    handler: Arc<DataHandler>,
    _data_dir: tempfile::TempDir,
}

async fn node_with_config(last: u8, own_ips: Vec<IpAddr>, mut config: RoutingConfig) -> Node {
    let data_dir = tempfile::tempdir().unwrap();
    config.data_dir = data_dir.path().to_path_buf();
    let link = MockLink::new(mac(last));
    let app = MockApp::new(own_ips.clone());
    let state = RouteState::with_rng_seed(mac(last), Selector::Greedy, u64::from(last)).shared();
    state.lock().await.set_current_ips(own_ips);
    let handler = DataHandler::new(config, link.clone(), app.clone(), state);
    Node { link, app, handler, _data_dir: data_dir }
}

async fn node(last: u8, own_ips: Vec<IpAddr>) -> Node {
    node_with_config(last, own_ips, RoutingConfig::default()).await
}

async fn add_neighbor(node: &Node, neighbor: MacAddr, advertised: IpAddr) {
    let IpAddr::V4(v4) = advertised else { panic!("v4 helper") };
    let hello = Hello { ipv4: Some(v4), ..Default::default() };
    let mut st = node.handler.state().lock().await;
    assert!(process_hello(&mut st, neighbor, &hello));
}

fn rreqs(frames: &[common::SentFrame]) -> Vec<(MacAddr, RouteMessage)> {
    frames
        .iter()
        .filter_map(|(dst, msg, _)| match msg {
            Message::Rreq(r) => Some((*dst, r.clone())),
            _ => None,
        })
        .collect()
}

fn ack_count(frames: &[common::SentFrame]) -> usize {
    frames.iter().filter(|(_, msg, _)| matches!(msg, Message::Ack(_))).count()
}

#[tokio::test(start_paused = true)]
async fn rreq_is_acked_every_time_but_processed_once() {
    let n = node(5, vec![ip(5)]).await;
    add_neighbor(&n, mac(2), ip(2)).await;

    let rreq = RouteMessage { id: 900, hop_count: 2, src_ip: ip(1), dst_ip: ip(7) };
    for _ in 0..3 {
        n.handler.process_incoming(mac(2), Message::Rreq(rreq.clone()), Vec::new()).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frames = n.link.sent();
    assert_eq!(ack_count(&frames), 3, "every RREQ invocation must produce an ACK");

    // Exactly one route-table update: 50 / 2 hops, one sample.
    let st = n.handler.state().lock().await;
    let action = st.table.entry(ip(1)).unwrap().action(mac(2)).unwrap();
    assert_eq!(action.mean, 25.0);
    assert_eq!(action.count, 1);
    drop(st);

    n.handler.arq().shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rreq_for_our_ip_is_answered_with_an_rrep() {
    let n = node(5, vec![ip(5)]).await;
    add_neighbor(&n, mac(2), ip(2)).await;

    let rreq = RouteMessage { id: 901, hop_count: 1, src_ip: ip(1), dst_ip: ip(5) };
    n.handler.process_incoming(mac(2), Message::Rreq(rreq), Vec::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rrep = n
        .link
        .sent()
        .into_iter()
        .find_map(|(dst, msg, _)| match msg {
            Message::Rrep(r) => Some((dst, r)),
            _ => None,
        })
        .expect("no RREP was generated");
    assert_eq!(rrep.0, mac(2));
    assert_eq!(rrep.1.id, 901);
    assert_eq!(rrep.1.src_ip, ip(5));
    assert_eq!(rrep.1.dst_ip, ip(1));
    assert_eq!(rrep.1.hop_count, 1);

    n.handler.arq().shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn foreign_rreq_is_rebroadcast_to_everyone_but_the_sender() {
    let n = node(5, vec![ip(5)]).await;
    add_neighbor(&n, mac(2), ip(2)).await;
    add_neighbor(&n, mac(3), ip(3)).await;

    let rreq = RouteMessage { id: 902, hop_count: 1, src_ip: ip(1), dst_ip: ip(7) };
    n.handler.process_incoming(mac(2), Message::Rreq(rreq), Vec::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let forwarded = rreqs(&n.link.sent());
    assert!(!forwarded.is_empty(), "RREQ was not re-broadcast");
    assert!(forwarded.iter().all(|(dst, _)| *dst == mac(3)), "RREQ went back to the sender");
    assert!(forwarded.iter().all(|(_, r)| r.hop_count == 2));

    n.handler.arq().shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn monitoring_mode_acks_but_does_not_rebroadcast_rreqs() {
    let config = RoutingConfig { monitoring_mode: true, ..Default::default() };
    let n = node_with_config(5, vec![ip(5)], config).await;
    add_neighbor(&n, mac(2), ip(2)).await;
    add_neighbor(&n, mac(3), ip(3)).await;

    let rreq = RouteMessage { id: 903, hop_count: 1, src_ip: ip(1), dst_ip: ip(7) };
    n.handler.process_incoming(mac(2), Message::Rreq(rreq), Vec::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frames = n.link.sent();
    assert_eq!(ack_count(&frames), 1);
    assert!(rreqs(&frames).is_empty(), "monitoring node re-broadcast an RREQ");
}

#[tokio::test(start_paused = true)]
async fn broadcast_ttl_rules() {
    let n = node(5, vec![ip(5)]).await;
    let packet = udp_packet(ip(1), ip(255), 5353);

    // Fresh broadcast at TTL 1: delivered up and re-flooded at TTL 2.
    n.handler
        .process_incoming(mac(2), Message::BroadcastData { id: 70, broadcast_ttl: 1 }, packet.clone())
        .await;
    assert_eq!(n.app.delivered().len(), 1);
    let reflood = n
        .link
        .sent()
        .into_iter()
        .find(|(dst, msg, _)| {
            dst.is_broadcast() && matches!(msg, Message::BroadcastData { broadcast_ttl: 2, .. })
        });
    assert!(reflood.is_some(), "accepted broadcast was not re-flooded with TTL 2");

    // Same id again: dropped.
    n.handler
        .process_incoming(mac(3), Message::BroadcastData { id: 70, broadcast_ttl: 1 }, packet.clone())
        .await;
    assert_eq!(n.app.delivered().len(), 1);

    // New id but TTL above the flood limit: dropped.
    n.handler
        .process_incoming(mac(3), Message::BroadcastData { id: 71, broadcast_ttl: 2 }, packet)
        .await;
    assert_eq!(n.app.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn data_for_us_is_delivered_and_rewarded() {
    let n = node(5, vec![ip(5)]).await;
    let packet = udp_packet(ip(1), ip(5), 9999);

    n.handler
        .process_incoming(mac(2), Message::UnicastData(DataHeader { id: 10, hop_count: 2 }), packet.clone())
        .await;

    assert_eq!(n.app.delivered(), vec![packet]);
    let rewards = n.link.sent_count(|(dst, msg, _)| {
        *dst == mac(2) && matches!(msg, Message::Reward(_))
    });
    assert_eq!(rewards, 1);
}

#[tokio::test(start_paused = true)]
async fn transit_data_is_forwarded_with_incremented_hop_count() {
    let n = node(1, vec![ip(1)]).await;
    add_neighbor(&n, mac(3), ip(3)).await;
    n.handler.state().lock().await.table.update_entry(ip(7), mac(3), 50.0);

    let packet = udp_packet(ip(1), ip(7), 9999);
    n.handler
        .process_incoming(mac(2), Message::UnicastData(DataHeader { id: 10, hop_count: 1 }), packet.clone())
        .await;

    let forwarded = n.link.sent_count(|(dst, msg, payload)| {
        *dst == mac(3)
            && matches!(msg, Message::UnicastData(DataHeader { hop_count: 2, .. }))
            && payload == &packet
    });
    assert_eq!(forwarded, 1);
    assert_eq!(n.handler.reward_wait().active_slots().await, 1);

    n.handler.reward_wait().shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transit_data_without_a_route_is_reinjected() {
    let n = node(1, vec![ip(1)]).await;
    let packet = udp_packet(ip(9), ip(7), 9999);

    n.handler
        .process_incoming(mac(2), Message::UnicastData(DataHeader { id: 10, hop_count: 1 }), packet.clone())
        .await;

    assert_eq!(n.app.injected(), vec![packet]);
    assert!(n.app.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn monitoring_mode_never_forwards_transit_data() {
    let config = RoutingConfig { monitoring_mode: true, ..Default::default() };
    let n = node_with_config(1, vec![ip(1)], config).await;
    add_neighbor(&n, mac(3), ip(3)).await;
    n.handler.state().lock().await.table.update_entry(ip(7), mac(3), 50.0);

    let packet = udp_packet(ip(9), ip(7), 9999);
    n.handler
        .process_incoming(mac(2), Message::UnicastData(DataHeader { id: 10, hop_count: 1 }), packet)
        .await;

    // The reward still goes out; the packet goes nowhere.
    let frames = n.link.sent();
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0].1, Message::Reward(_)));
    assert!(n.app.injected().is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_reliable_data_is_acked_and_dropped() {
    let n = node(5, vec![ip(5)]).await;
    let packet = udp_packet(ip(1), ip(5), 9999);
    let message = Message::ReliableData(DataHeader { id: 44, hop_count: 1 });

    n.handler.process_incoming(mac(2), message.clone(), packet.clone()).await;
    n.handler.process_incoming(mac(2), message, packet).await;

    assert_eq!(ack_count(&n.link.sent()), 2, "reliable packets are ACKed unconditionally");
    assert_eq!(n.app.delivered().len(), 1, "duplicate reliable packet was delivered");
}

#[tokio::test(start_paused = true)]
async fn outgoing_group_traffic_is_flooded_once() {
    let n = node(1, vec![ip(1)]).await;
    let packet = udp_packet(ip(1), "239.1.2.3".parse().unwrap(), 5353);

    n.handler.process_outgoing(packet.clone()).await;

    let frames = n.link.sent();
    assert_eq!(frames.len(), 1);
    let (dst, msg, payload) = &frames[0];
    assert!(dst.is_broadcast());
    assert!(matches!(msg, Message::BroadcastData { broadcast_ttl: 1, .. }));
    assert_eq!(payload, &packet);
}

#[tokio::test(start_paused = true)]
async fn outgoing_data_splits_on_the_arq_allow_list() {
    let n = node(1, vec![ip(1)]).await;
    add_neighbor(&n, mac(3), ip(3)).await;
    n.handler.state().lock().await.table.update_entry(ip(7), mac(3), 50.0);

    // UDP/9999 is not in the default allow-list: plain unicast.
    n.handler.process_outgoing(udp_packet(ip(1), ip(7), 9999)).await;
    assert_eq!(
        n.link.sent_count(|(_, msg, _)| matches!(
            msg,
            Message::UnicastData(DataHeader { hop_count: 1, .. })
        )),
        1
    );

    // TCP/22 is: reliable delivery through the ARQ.
    n.handler.process_outgoing(tcp_packet(ip(1), ip(7), 22)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        n.link.sent_count(|(_, msg, _)| matches!(msg, Message::ReliableData(_))) >= 1,
        "allow-listed packet was not sent reliably"
    );

    n.handler.arq().shutdown().await;
    n.handler.reward_wait().shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reliable_send_stops_once_the_receiver_acks() {
    let a = node(1, vec![ip(1)]).await;
    let b = node(2, vec![ip(2)]).await;
    // The HELLO seeds A's route to B's address directly.
    add_neighbor(&a, mac(2), ip(2)).await;

    let packet = tcp_packet(ip(1), ip(2), 22);
    a.handler.process_outgoing(packet.clone()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_, message, payload) = a
        .link
        .take_sent()
        .into_iter()
        .find(|(_, msg, _)| matches!(msg, Message::ReliableData(_)))
        .expect("allow-listed packet was not sent reliably");
    b.handler.process_incoming(mac(1), message, payload).await;

    assert_eq!(b.app.delivered(), vec![packet]);
    let ack = b
        .link
        .sent()
        .into_iter()
        .find_map(|(_, msg, _)| match msg {
            Message::Ack(ack) => Some(ack),
            _ => None,
        })
        .expect("receiver did not ACK the reliable frame");

    a.handler.process_incoming(mac(2), Message::Ack(ack), Vec::new()).await;
    assert_eq!(a.handler.arq().active_slots().await, 0);

    // With the slot gone the retransmit loop is dead: no further frames.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(a.link.sent_count(|(_, msg, _)| matches!(msg, Message::ReliableData(_))), 0);

    a.handler.reward_wait().shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn outgoing_without_a_route_starts_discovery() {
    let n = node(1, vec![ip(1)]).await;
    add_neighbor(&n, mac(2), ip(2)).await;

    n.handler.process_outgoing(udp_packet(ip(1), ip(7), 9999)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let issued = rreqs(&n.link.sent());
    assert!(!issued.is_empty(), "cache miss did not issue an RREQ");
    assert!(issued.iter().all(|(dst, r)| {
        *dst == mac(2) && r.src_ip == ip(1) && r.dst_ip == ip(7) && r.hop_count == 1
    }));
    assert_eq!(n.handler.path().pending_packets(ip(7)).await, 1);

    n.handler.arq().shutdown().await;
}
