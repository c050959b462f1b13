//! Shared routing state: the action-value table, the neighbor map, and the
//! node's current addresses, all behind one mutex as every mutator touches
//! at least two of them.

use std::net::IpAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;

use qmesh_wire::MacAddr;

use crate::neighbors::NeighborTable;
use crate::selector::Selector;
use crate::table::RouteTable;

pub type SharedRouteState = Arc<Mutex<RouteState>>;

pub struct RouteState {
    pub table: RouteTable,
    pub neighbors: NeighborTable,
    current_ips: Vec<IpAddr>,
    selector: Selector,
    rng: StdRng,
}

impl RouteState {
    pub fn new(own_mac: MacAddr, selector: Selector) -> Self {
        RouteState {
            table: RouteTable::new(own_mac),
            neighbors: NeighborTable::new(),
            current_ips: Vec::new(),
            selector,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic construction for tests.
    pub fn with_rng_seed(own_mac: MacAddr, selector: Selector, seed: u64) -> Self {
        RouteState { rng: StdRng::seed_from_u64(seed), ..Self::new(own_mac, selector) }
    }

    pub fn shared(self) -> SharedRouteState {
        Arc::new(Mutex::new(self))
    }

    pub fn own_mac(&self) -> MacAddr {
        self.table.own_mac()
    }

    pub fn current_ips(&self) -> &[IpAddr] {
        &self.current_ips
    }

    pub fn is_own_ip(&self, ip: IpAddr) -> bool {
        self.current_ips.contains(&ip)
    }

    /// Refreshes the node's own address list, pinning newly assigned
    /// addresses in the table. Returns whether the list changed.
    pub fn set_current_ips(&mut self, ips: Vec<IpAddr>) -> bool {
        if self.current_ips == ips {
            return false;
        }
        self.table.update_ips_in_table(&ips);
        self.current_ips = ips;
        true
    }

    /// Purges actions whose MAC is no longer a neighbor (the self-delivery
    /// pin survives), then runs the selector over what remains.
    pub fn next_hop(&mut self, dst: IpAddr) -> Option<MacAddr> {
        let own_mac = self.own_mac();
        let entry = self.table.entry(dst)?;
        let needs_purge =
            entry.values().iter().any(|(mac, _)| *mac != own_mac && !self.neighbors.contains(*mac));
        if needs_purge {
            let neighbors = &self.neighbors;
            self.table
                .entry_mut(dst)
                .retain_macs(|mac| mac == own_mac || neighbors.contains(mac));
        }

        let actions = self.table.entry(dst)?.values();
        self.selector.select(&actions, &mut self.rng)
    }

    /// The current neighbor MACs, minus an optional exclusion (the frame's
    /// transmitter, for RREQ/RREP re-propagation).
    pub fn neighbor_macs_except(&self, excluded: Option<MacAddr>) -> Vec<MacAddr> {
        self.neighbors
            .macs()
            .into_iter()
            .filter(|mac| Some(*mac) != excluded)
            .collect()
    }
}
