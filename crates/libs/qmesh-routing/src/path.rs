//! Reactive path discovery: RREQ issuance with a delayed-packet queue, and
//! RREP-triggered replay.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use qmesh_wire::{random_id, Message, RouteMessage};

use crate::arq::ArqHandler;
use crate::port::AppPort;

/// A discovery with no RREP after this long is abandoned on the next miss.
pub const PATH_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

struct Pending {
    created: Instant,
    packets: Vec<Vec<u8>>,
}

pub struct PathDiscovery {
    arq: Arc<ArqHandler>,
    app: Arc<dyn AppPort>,
    pending: Mutex<HashMap<IpAddr, Pending>>,
    /// Destinations whose last discovery expired unanswered; feeds the
    /// local-gateway mapping.
    failed: Mutex<HashSet<IpAddr>>,
}

impl PathDiscovery {
    pub fn new(arq: Arc<ArqHandler>, app: Arc<dyn AppPort>) -> Self {
        PathDiscovery {
            arq,
            app,
            pending: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// Queues `packet` behind a discovery for `dst_ip`, starting (or
    /// restarting) the RREQ broadcast as needed.
    pub async fn run_path_discovery(&self, src_ip: IpAddr, dst_ip: IpAddr, packet: Vec<u8>) {
        {
            let mut pending = self.pending.lock().await;
            if let Some(entry) = pending.get_mut(&dst_ip) {
                if entry.created.elapsed() <= PATH_DISCOVERY_TIMEOUT {
                    log::debug!("discovery for {dst_ip} in flight; delaying packet");
                    entry.packets.push(packet);
                    return;
                }
                // Unanswered discovery: drop the stale entry (and its
                // packets) and start over for this packet.
                pending.remove(&dst_ip);
                self.failed.lock().await.insert(dst_ip);
                log::info!("discovery for {dst_ip} expired unanswered; restarting");
            }
            pending.insert(dst_ip, Pending { created: Instant::now(), packets: vec![packet] });
        }

        let rreq =
            Message::Rreq(RouteMessage { id: random_id(), hop_count: 1, src_ip, dst_ip });
        log::info!("issuing RREQ {} for {dst_ip}", rreq.id());
        self.arq.arq_broadcast_send(&rreq, &[]).await;
    }

    /// Replays every packet delayed behind `rrep.src_ip` through the TUN
    /// read path; the handler re-resolves them against the now-populated
    /// table.
    pub async fn process_rrep(&self, rrep: &RouteMessage) {
        let entry = self.pending.lock().await.remove(&rrep.src_ip);
        let Some(entry) = entry else { return };
        self.failed.lock().await.remove(&rrep.src_ip);

        log::info!(
            "RREP for {} arrived; re-injecting {} delayed packet(s)",
            rrep.src_ip,
            entry.packets.len()
        );
        for packet in entry.packets {
            if let Err(err) = self.app.inject_back(&packet).await {
                log::error!("failed to re-inject delayed packet: {err}");
            }
        }
    }

    /// Whether the last discovery for `dst_ip` expired unanswered.
    pub async fn discovery_failed(&self, dst_ip: IpAddr) -> bool {
        self.failed.lock().await.contains(&dst_ip)
    }

    pub async fn pending_packets(&self, dst_ip: IpAddr) -> usize {
        self.pending.lock().await.get(&dst_ip).map(|p| p.packets.len()).unwrap_or(0)
    }
}
