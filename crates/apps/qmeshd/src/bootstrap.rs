//! Builds the node out of the configuration and runs it until a signal
//! trips the cancellation token.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use qmesh_net::{ifaces, topology, RawLink, TunDevice};
use qmesh_routing::{jobs, DataHandler, RouteState};

use crate::config::Config;
use crate::uds;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let routing_config = config.routing()?;
    let selector = config.selector()?;

    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))?;

    let own_mac = ifaces::device_mac(&config.device)
        .with_context(|| format!("cannot read MAC of {}", config.device))?;
    log::info!("starting qmeshd on {} as {own_mac}", config.device);

    let allowed = if config.topology_filter {
        match topology::load_allowed_neighbors(&config.topology_path(), own_mac) {
            Ok(set) => {
                log::info!("topology filter active with {} allowed neighbor(s)", set.len());
                Some(set)
            }
            Err(err) => {
                log::warn!(
                    "topology filter enabled but {} is unreadable ({err}); \
                     filtering all incoming frames",
                    config.topology_path().display()
                );
                Some(HashSet::new())
            }
        }
    } else {
        None
    };

    let link = Arc::new(
        RawLink::open(&config.device, own_mac, allowed)
            .with_context(|| format!("cannot open mesh link on {}", config.device))?,
    );
    let tun = Arc::new(
        TunDevice::open(&config.virtual_device)
            .with_context(|| format!("cannot open TUN device {}", config.virtual_device))?,
    );

    let state = RouteState::new(own_mac, selector).shared();
    state.lock().await.set_current_ips(tun.addresses());

    let handler =
        DataHandler::new(routing_config, link.clone(), tun.clone(), state.clone());

    let uds_socket = uds::bind(&config.uds_path)
        .with_context(|| format!("cannot bind management socket {}", config.uds_path.display()))?;

    let cancel = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(jobs::run_tun_reader(handler.clone(), tun.clone(), cancel.clone())),
        tokio::spawn(jobs::run_link_reader(handler.clone(), link.clone(), cancel.clone())),
        tokio::spawn(jobs::run_advertiser(
            state.clone(),
            link.clone(),
            tun.clone(),
            config.data_dir.clone(),
            config.gateway_mode,
            cancel.clone(),
        )),
        tokio::spawn(jobs::run_neighbor_sweeper(
            state.clone(),
            config.data_dir.clone(),
            cancel.clone(),
        )),
        tokio::spawn(uds::serve(uds_socket, state.clone(), tun.clone(), cancel.clone())),
    ];

    let signalled = wait_for_shutdown(&cancel).await?;
    if signalled {
        log::info!("shutdown signal received");
    }

    cancel.cancel();
    handler.arq().shutdown().await;
    handler.reward_wait().shutdown().await;
    for task in tasks {
        let _ = task.await;
    }
    let _ = fs::remove_file(&config.uds_path);

    if signalled {
        Ok(())
    } else {
        anyhow::bail!("a transport died and could not be recovered")
    }
}

/// Waits for SIGTERM/SIGINT or an internally tripped cancellation (a dead
/// transport). Returns whether a signal caused the shutdown.
async fn wait_for_shutdown(cancel: &CancellationToken) -> anyhow::Result<bool> {
    let mut term = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    tokio::select! {
        _ = term.recv() => Ok(true),
        _ = int.recv() => Ok(true),
        _ = cancel.cancelled() => Ok(false),
    }
}
