//! Management socket: a Unix datagram endpoint accepting ASCII
//! colon-separated commands.
//!
//! `0` flush table, `1` flush neighbors, `2` get table, `3` get neighbors,
//! plus `ipv4:<addr>` / `ipv6:<addr>` to assign an address to the TUN
//! device. Replies to the get commands are JSON dumps.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use tokio::net::UnixDatagram;
use tokio_util::sync::CancellationToken;

use qmesh_net::TunDevice;
use qmesh_routing::dumps::{neighbors_json, table_json};
use qmesh_routing::SharedRouteState;

/// What a parsed command asks the daemon to do. Parsing is separated from
/// execution so it is testable without sockets or devices.
#[derive(Debug, PartialEq)]
pub enum Command {
    FlushTable,
    FlushNeighbors,
    GetTable,
    GetNeighbors,
    SetIpv4(Ipv4Addr),
    SetIpv6(Ipv6Addr),
}

pub fn parse_command(raw: &str) -> Option<Command> {
    let raw = raw.trim();
    match raw {
        "0" => return Some(Command::FlushTable),
        "1" => return Some(Command::FlushNeighbors),
        "2" => return Some(Command::GetTable),
        "3" => return Some(Command::GetNeighbors),
        _ => {}
    }
    let (kind, addr) = raw.split_once(':')?;
    match kind {
        "ipv4" => addr.parse().ok().map(Command::SetIpv4),
        // The address part of an ipv6 command contains colons itself.
        "ipv6" => raw[5..].parse().ok().map(Command::SetIpv6),
        _ => None,
    }
}

/// Executes one command against the routing state, returning the reply to
/// send back (get commands only).
pub async fn apply_command(
    command: &Command,
    state: &SharedRouteState,
    tun: Option<&TunDevice>,
) -> Option<String> {
    match command {
        Command::FlushTable => {
            state.lock().await.table.flush();
            log::info!("management: route table flushed");
            None
        }
        Command::FlushNeighbors => {
            state.lock().await.neighbors.flush();
            log::info!("management: neighbor list flushed");
            None
        }
        Command::GetTable => Some(table_json(&*state.lock().await).to_string()),
        Command::GetNeighbors => Some(neighbors_json(&*state.lock().await).to_string()),
        Command::SetIpv4(addr) => {
            match tun {
                Some(tun) => {
                    if let Err(err) = tun.set_ipv4(*addr) {
                        log::error!("management: failed to assign {addr}: {err}");
                    }
                }
                None => log::warn!("management: no device to assign {addr} to"),
            }
            None
        }
        Command::SetIpv6(addr) => {
            match tun {
                Some(tun) => {
                    if let Err(err) = tun.set_ipv6(*addr) {
                        log::error!("management: failed to assign {addr}: {err}");
                    }
                }
                None => log::warn!("management: no device to assign {addr} to"),
            }
            None
        }
    }
}

/// Binds the management socket, replacing any stale socket file.
pub fn bind(path: &Path) -> std::io::Result<UnixDatagram> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixDatagram::bind(path)
}

/// Serves management commands until cancelled.
pub async fn serve(
    socket: UnixDatagram,
    state: SharedRouteState,
    tun: std::sync::Arc<TunDevice>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(ok) => ok,
                    Err(err) => {
                        log::error!("management socket read failed: {err}");
                        continue;
                    }
                };
                let raw = String::from_utf8_lossy(&buf[..len]);
                let Some(command) = parse_command(&raw) else {
                    log::warn!("management: unknown command {raw:?}");
                    continue;
                };
                if let Some(reply) = apply_command(&command, &state, Some(&tun)).await {
                    let sent = match peer.as_pathname() {
                        Some(path) => socket.send_to(reply.as_bytes(), path).await,
                        None => {
                            log::warn!("management: client is unnamed, cannot reply");
                            continue;
                        }
                    };
                    if let Err(err) = sent {
                        log::error!("management: reply failed: {err}");
                    }
                }
            }
        }
    }
    log::debug!("management socket stopped");
}
