//! The per-destination action-value table.
//!
//! Each destination maps candidate next-hop MACs to a sample-average reward
//! estimate. Action order is insertion order, which is what the greedy
//! selector's tie-break iterates.

use std::collections::HashMap;
use std::net::IpAddr;

use qmesh_wire::MacAddr;

/// Action value pinned under the node's own MAC for locally assigned IPs.
pub const SELF_DELIVERY_VALUE: f64 = 100.0;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Sample-average estimator state for one (destination, next-hop) action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionValue {
    pub mean: f64,
    pub count: u64,
}

impl ActionValue {
    fn new() -> Self {
        ActionValue { mean: 0.0, count: 0 }
    }

    /// Feeds one reward sample: `μ ← round((μ·n + r)/(n+1), 2)`, `n ← n+1`.
    fn feed(&mut self, reward: f64) -> f64 {
        let n = self.count as f64;
        self.mean = round2((self.mean * n + reward) / (n + 1.0));
        self.count += 1;
        self.mean
    }
}

/// Next-hop candidates for one destination, in insertion order.
#[derive(Debug, Default)]
pub struct RouteEntry {
    actions: Vec<(MacAddr, ActionValue)>,
}

impl RouteEntry {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn values(&self) -> Vec<(MacAddr, f64)> {
        self.actions.iter().map(|(mac, v)| (*mac, v.mean)).collect()
    }

    pub fn action(&self, mac: MacAddr) -> Option<ActionValue> {
        self.actions.iter().find(|(m, _)| *m == mac).map(|(_, v)| *v)
    }

    pub fn actions(&self) -> &[(MacAddr, ActionValue)] {
        &self.actions
    }

    pub fn retain_macs(&mut self, keep: impl Fn(MacAddr) -> bool) {
        self.actions.retain(|(mac, _)| keep(*mac));
    }

    fn action_mut(&mut self, mac: MacAddr) -> &mut ActionValue {
        if let Some(pos) = self.actions.iter().position(|(m, _)| *m == mac) {
            return &mut self.actions[pos].1;
        }
        self.actions.push((mac, ActionValue::new()));
        let last = self.actions.len() - 1;
        &mut self.actions[last].1
    }
}

/// All known destinations. Entries are created on first update and never
/// destroyed during the process lifetime; stale actions are purged lazily
/// against the neighbor set before selection.
#[derive(Debug)]
pub struct RouteTable {
    own_mac: MacAddr,
    entries: HashMap<IpAddr, RouteEntry>,
}

impl RouteTable {
    pub fn new(own_mac: MacAddr) -> Self {
        RouteTable { own_mac, entries: HashMap::new() }
    }

    pub fn own_mac(&self) -> MacAddr {
        self.own_mac
    }

    pub fn entry(&self, dst: IpAddr) -> Option<&RouteEntry> {
        self.entries.get(&dst)
    }

    pub fn entry_mut(&mut self, dst: IpAddr) -> &mut RouteEntry {
        self.entries.entry(dst).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &RouteEntry)> {
        self.entries.iter()
    }

    /// Feeds a reward into the (dst, mac) action and returns the new mean.
    pub fn update_entry(&mut self, dst: IpAddr, mac: MacAddr, reward: f64) -> f64 {
        let mean = self.entry_mut(dst).action_mut(mac).feed(reward);
        log::debug!("route {dst} via {mac}: value {mean} after reward {reward}");
        mean
    }

    /// Arithmetic mean of the destination's action values; 0.0 when the
    /// destination is unknown or has no actions.
    pub fn avg_value(&self, dst: IpAddr) -> f64 {
        match self.entries.get(&dst) {
            Some(entry) if !entry.is_empty() => {
                let sum: f64 = entry.actions.iter().map(|(_, v)| v.mean).sum();
                round2(sum / entry.actions.len() as f64)
            }
            _ => 0.0,
        }
    }

    /// Pins every newly assigned own IP at the self-delivery value so that
    /// downstream rewards for destinations we terminate are maximal.
    pub fn update_ips_in_table(&mut self, current_ips: &[IpAddr]) {
        let own_mac = self.own_mac;
        for ip in current_ips {
            let entry = self.entry_mut(*ip);
            if entry.action(own_mac).is_none() {
                let action = entry.action_mut(own_mac);
                action.mean = SELF_DELIVERY_VALUE;
                action.count = 1;
                log::info!("pinned local address {ip}");
            }
        }
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
