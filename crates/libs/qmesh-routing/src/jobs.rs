//! Long-running daemon loops, each parked on a `CancellationToken` so
//! shutdown is one `cancel()` away.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use qmesh_net::NetError;
use qmesh_wire::{Hello, MacAddr, Message};

use crate::dumps::write_table_dump;
use crate::handler::DataHandler;
use crate::neighbors::{expire_neighbors, write_neighbors_file, HELLO_INTERVAL, NEIGHBOR_EXPIRY};
use crate::port::{AppPort, MeshLink};
use crate::state::SharedRouteState;

const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Reads user packets off the virtual interface and hands them to the data
/// handler.
pub async fn run_tun_reader(
    handler: Arc<DataHandler>,
    app: Arc<dyn AppPort>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = app.recv_from_app() => match result {
                Ok(packet) => handler.process_outgoing(packet).await,
                Err(NetError::Closed) => {
                    log::error!("virtual interface closed; shutting down");
                    cancel.cancel();
                    break;
                }
                Err(err) => {
                    log::error!("virtual interface read failed: {err}");
                    time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }
    log::debug!("tun reader stopped");
}

/// Reads mesh frames off the raw link and hands them to the data handler.
pub async fn run_link_reader(
    handler: Arc<DataHandler>,
    link: Arc<dyn MeshLink>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = link.recv() => match result {
                Ok((src_mac, message, payload)) => {
                    handler.process_incoming(src_mac, message, payload).await;
                }
                Err(NetError::Closed) => {
                    log::error!("mesh link closed; shutting down");
                    cancel.cancel();
                    break;
                }
                Err(err) => {
                    log::error!("mesh link read failed: {err}");
                    time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }
    log::debug!("link reader stopped");
}

/// Broadcasts a HELLO every two seconds, refreshing the node's own address
/// list and the on-disk table dump first.
pub async fn run_advertiser(
    state: SharedRouteState,
    link: Arc<dyn MeshLink>,
    app: Arc<dyn AppPort>,
    data_dir: PathBuf,
    gw_mode: bool,
    cancel: CancellationToken,
) {
    let mut tx_count: u32 = 0;
    loop {
        let addresses = app.addresses();
        let hello = {
            let mut st = state.lock().await;
            if st.set_current_ips(addresses.clone()) {
                log::info!("own address list changed: {addresses:?}");
            }
            if let Err(err) = write_table_dump(&data_dir, &st) {
                log::error!("failed to rewrite table dump: {err}");
            }
            build_hello(&addresses, tx_count, gw_mode)
        };

        if let Err(err) = link.send(MacAddr::BROADCAST, &Message::Hello(hello), &[]).await {
            log::error!("failed to broadcast HELLO: {err}");
        }
        tx_count = tx_count.wrapping_add(1);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(HELLO_INTERVAL) => {}
        }
    }
    log::debug!("advertiser stopped");
}

/// Drops neighbors that have been silent past the expiry deadline.
pub async fn run_neighbor_sweeper(
    state: SharedRouteState,
    data_dir: PathBuf,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(NEIGHBOR_EXPIRY) => {
                let mut st = state.lock().await;
                if !expire_neighbors(&mut st).is_empty() {
                    if let Err(err) = write_neighbors_file(&data_dir, &st.neighbors) {
                        log::error!("failed to rewrite neighbors file: {err}");
                    }
                }
            }
        }
    }
    log::debug!("neighbor sweeper stopped");
}

/// A HELLO advertising up to one IPv4 and three IPv6 addresses.
pub fn build_hello(addresses: &[IpAddr], tx_count: u32, gw_mode: bool) -> Hello {
    let ipv4 = addresses.iter().find_map(|a| match a {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    });
    let ipv6 = addresses
        .iter()
        .filter_map(|a| match a {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
        .take(3)
        .collect();
    Hello { ipv4, ipv6, tx_count, gw_mode }
}
