//! Topology allow-list for controlled experiments.
//!
//! `topology.conf` holds blank-line-separated groups of MAC addresses; the
//! first MAC of a group names a node, the remaining MACs are the neighbors
//! it is allowed to hear.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use qmesh_wire::MacAddr;

use crate::error::NetError;

/// Loads the allow-list group for `own_mac`. Returns an empty set when the
/// file has no group for this node.
pub fn load_allowed_neighbors(path: &Path, own_mac: MacAddr) -> Result<HashSet<MacAddr>, NetError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_allowed_neighbors(&content, own_mac))
}

fn parse_allowed_neighbors(content: &str, own_mac: MacAddr) -> HashSet<MacAddr> {
    for group in content.split("\n\n") {
        let mut lines = group.lines().filter(|l| !l.trim().is_empty());
        let head = match lines.next().and_then(|l| l.trim().parse::<MacAddr>().ok()) {
            Some(mac) => mac,
            None => continue,
        };
        if head != own_mac {
            continue;
        }
        return lines.filter_map(|l| l.trim().parse().ok()).collect();
    }
    HashSet::new()
}
