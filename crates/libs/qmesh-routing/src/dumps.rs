//! Human-readable and JSON renderings of the routing state, for the
//! on-disk table dump and the management socket replies.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::json;

use crate::state::RouteState;

pub const TABLE_DUMP_FILE: &str = "table.txt";

pub fn render_table(state: &RouteState) -> String {
    let mut out = String::new();
    out.push_str(&"-".repeat(72));
    out.push('\n');
    for (dst, entry) in state.table.iter() {
        out.push_str(&format!("destination {dst}\n"));
        out.push_str("  <next hop>           <value>    <samples>\n");
        for (mac, action) in entry.actions() {
            out.push_str(&format!("  {mac}    {:>8.2}    {}\n", action.mean, action.count));
        }
    }
    out.push_str(&"-".repeat(72));
    out.push('\n');
    out
}

pub fn table_json(state: &RouteState) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = state
        .table
        .iter()
        .map(|(dst, entry)| {
            let actions: Vec<serde_json::Value> = entry
                .actions()
                .iter()
                .map(|(mac, action)| {
                    json!({
                        "next_hop": mac.to_string(),
                        "value": action.mean,
                        "samples": action.count,
                    })
                })
                .collect();
            json!({ "destination": dst.to_string(), "actions": actions })
        })
        .collect();
    json!({ "entries": entries })
}

pub fn neighbors_json(state: &RouteState) -> serde_json::Value {
    let neighbors: Vec<serde_json::Value> = state
        .neighbors
        .iter()
        .map(|n| {
            json!({
                "mac": n.mac.to_string(),
                "addresses": n.l3_addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                "idle_secs": n.last_activity.elapsed().as_secs_f64(),
            })
        })
        .collect();
    json!({ "neighbors": neighbors })
}

/// Rewrites the table dump atomically (write-then-rename).
pub fn write_table_dump(data_dir: &Path, state: &RouteState) -> io::Result<()> {
    let path = data_dir.join(TABLE_DUMP_FILE);
    let tmp = data_dir.join(format!("{TABLE_DUMP_FILE}.tmp"));
    fs::write(&tmp, render_table(state))?;
    fs::rename(tmp, path)
}
