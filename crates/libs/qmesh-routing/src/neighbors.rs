//! Soft-state neighbor discovery: HELLO processing, expiry, and the
//! neighbors file external consumers read.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use qmesh_wire::{Hello, MacAddr};

use crate::state::RouteState;

pub const HELLO_INTERVAL: Duration = Duration::from_secs(2);
pub const NEIGHBOR_EXPIRY: Duration = Duration::from_secs(7);

/// A-priori reward seeded for every address a new neighbor advertises.
pub const NEIGHBOR_SEED_VALUE: f64 = 50.0;

pub const NEIGHBORS_FILE: &str = "neighbors_file";

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub mac: MacAddr,
    pub l3_addresses: Vec<IpAddr>,
    pub last_activity: Instant,
}

/// Directly reachable peers, keyed by MAC.
#[derive(Debug, Default)]
pub struct NeighborTable {
    map: HashMap<MacAddr, Neighbor>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, mac: MacAddr) -> bool {
        self.map.contains_key(&mac)
    }

    pub fn macs(&self) -> Vec<MacAddr> {
        self.map.keys().copied().collect()
    }

    pub fn get(&self, mac: MacAddr) -> Option<&Neighbor> {
        self.map.get(&mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn flush(&mut self) {
        self.map.clear();
    }

    fn upsert(&mut self, mac: MacAddr, addresses: Vec<IpAddr>) -> &mut Neighbor {
        self.map
            .entry(mac)
            .or_insert_with(|| Neighbor { mac, l3_addresses: Vec::new(), last_activity: Instant::now() })
            .update(addresses)
    }

    fn remove_older_than(&mut self, max_age: Duration) -> Vec<MacAddr> {
        let now = Instant::now();
        let expired: Vec<MacAddr> = self
            .map
            .values()
            .filter(|n| now.duration_since(n.last_activity) > max_age)
            .map(|n| n.mac)
            .collect();
        for mac in &expired {
            self.map.remove(mac);
        }
        expired
    }
}

impl Neighbor {
    fn update(&mut self, addresses: Vec<IpAddr>) -> &mut Self {
        self.l3_addresses = addresses;
        self.last_activity = Instant::now();
        self
    }
}

/// Handles one received HELLO. Returns `false` when the frame was dropped
/// (a HELLO carrying our own MAC means two nodes share an identity).
pub fn process_hello(state: &mut RouteState, src_mac: MacAddr, hello: &Hello) -> bool {
    if src_mac == state.own_mac() {
        log::warn!("received own HELLO from the network; duplicate node identity?");
        return false;
    }

    let addresses = hello.l3_addresses();
    let known = state.neighbors.contains(src_mac);
    let changed = state
        .neighbors
        .get(src_mac)
        .map(|n| n.l3_addresses != addresses)
        .unwrap_or(true);

    state.neighbors.upsert(src_mac, addresses.clone());

    if !known {
        log::info!("new neighbor {src_mac} with {} address(es)", addresses.len());
    }
    if changed {
        // Seed (or re-seed) a medium a-priori value for every advertised
        // address so the selector has something to start from.
        for ip in &addresses {
            state.table.update_entry(*ip, src_mac, NEIGHBOR_SEED_VALUE);
        }
    }
    true
}

/// Removes neighbors silent for longer than [`NEIGHBOR_EXPIRY`]. Route-table
/// actions pointing at removed MACs are purged lazily on the next
/// `next_hop` for the destination.
pub fn expire_neighbors(state: &mut RouteState) -> Vec<MacAddr> {
    let expired = state.neighbors.remove_older_than(NEIGHBOR_EXPIRY);
    for mac in &expired {
        log::info!("neighbor {mac} expired");
    }
    expired
}

pub fn render_neighbors_file(neighbors: &NeighborTable) -> String {
    let mut out = String::new();
    for neighbor in neighbors.iter() {
        for addr in &neighbor.l3_addresses {
            out.push_str(&addr.to_string());
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Rewrites the neighbors file atomically (write-then-rename).
pub fn write_neighbors_file(data_dir: &Path, neighbors: &NeighborTable) -> io::Result<()> {
    let path = data_dir.join(NEIGHBORS_FILE);
    let tmp = data_dir.join(format!("{NEIGHBORS_FILE}.tmp"));
    fs::write(&tmp, render_neighbors_file(neighbors))?;
    fs::rename(tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    fn state() -> RouteState {
        RouteState::with_rng_seed(mac(0), Selector::Greedy, 1)
    }

    fn hello(v4: &str) -> Hello {
        Hello { ipv4: Some(v4.parse().unwrap()), ipv6: vec![], tx_count: 0, gw_mode: false }
    }

    #[test]
    fn new_neighbor_is_seeded_with_medium_reward() {
        let mut st = state();
        assert!(process_hello(&mut st, mac(1), &hello("10.0.0.5")));
        assert!(st.neighbors.contains(mac(1)));
        let entry = st.table.entry("10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(entry.action(mac(1)).unwrap().mean, NEIGHBOR_SEED_VALUE);
    }

    #[test]
    fn own_hello_is_rejected() {
        let mut st = state();
        assert!(!process_hello(&mut st, mac(0), &hello("10.0.0.5")));
        assert!(st.neighbors.is_empty());
    }

    #[test]
    fn unchanged_address_list_is_not_reseeded() {
        let mut st = state();
        process_hello(&mut st, mac(1), &hello("10.0.0.5"));
        process_hello(&mut st, mac(1), &hello("10.0.0.5"));
        // A re-seed would have fed a second 50 and kept the mean at 50 with
        // count 2; verify the estimator saw exactly one sample.
        let entry = st.table.entry("10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(entry.action(mac(1)).unwrap().count, 1);
    }

    #[test]
    fn changed_address_list_reseeds() {
        let mut st = state();
        process_hello(&mut st, mac(1), &hello("10.0.0.5"));
        process_hello(&mut st, mac(1), &hello("10.0.0.6"));
        assert!(st.table.entry("10.0.0.6".parse().unwrap()).is_some());
        let addrs = &st.neighbors.get(mac(1)).unwrap().l3_addresses;
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0], "10.0.0.6".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn hello_with_mixed_families_seeds_every_address() {
        let mut st = state();
        let h = Hello {
            ipv4: Some("10.0.0.5".parse().unwrap()),
            ipv6: vec!["fd00::5".parse().unwrap(), "fd00::6".parse().unwrap()],
            tx_count: 3,
            gw_mode: false,
        };
        process_hello(&mut st, mac(1), &h);

        for dst in ["10.0.0.5", "fd00::5", "fd00::6"] {
            let entry = st.table.entry(dst.parse().unwrap()).unwrap();
            assert_eq!(entry.action(mac(1)).unwrap().mean, NEIGHBOR_SEED_VALUE, "{dst}");
        }
        assert_eq!(st.neighbors.get(mac(1)).unwrap().l3_addresses.len(), 3);
    }

    #[test]
    fn gateway_hello_installs_the_sentinel() {
        let mut st = state();
        let mut h = hello("10.0.0.5");
        h.gw_mode = true;
        process_hello(&mut st, mac(1), &h);
        assert!(st.table.entry(qmesh_wire::DEFAULT_ROUTE).is_some());
    }

    #[test]
    fn expiry_removes_only_silent_neighbors() {
        let mut st = state();
        process_hello(&mut st, mac(1), &hello("10.0.0.5"));
        process_hello(&mut st, mac(2), &hello("10.0.0.6"));
        // Age one neighbor past the deadline by hand.
        if let Some(n) = st.neighbors.map.get_mut(&mac(1)) {
            n.last_activity = Instant::now() - NEIGHBOR_EXPIRY - Duration::from_secs(1);
        }
        let expired = expire_neighbors(&mut st);
        assert_eq!(expired, vec![mac(1)]);
        assert!(!st.neighbors.contains(mac(1)));
        assert!(st.neighbors.contains(mac(2)));
    }

    #[test]
    fn neighbors_file_has_blank_line_separators() {
        let mut st = state();
        let mut h = hello("10.0.0.5");
        h.ipv6 = vec!["fd00::5".parse().unwrap()];
        process_hello(&mut st, mac(1), &h);

        let rendered = render_neighbors_file(&st.neighbors);
        assert!(rendered.contains("10.0.0.5\n"));
        assert!(rendered.contains("fd00::5\n"));
        assert!(rendered.ends_with("\n\n"));

        let dir = tempfile::tempdir().unwrap();
        write_neighbors_file(dir.path(), &st.neighbors).unwrap();
        let on_disk = fs::read_to_string(dir.path().join(NEIGHBORS_FILE)).unwrap();
        assert_eq!(on_disk, rendered);
    }
}
