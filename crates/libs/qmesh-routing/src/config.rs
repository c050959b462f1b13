//! Runtime configuration consumed by the routing core. The daemon builds
//! this from its TOML file.

use std::collections::HashMap;
use std::str::FromStr;

use qmesh_net::L4Proto;

/// How outgoing public destinations are mapped onto the default-route
/// sentinel when gateway mode is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayType {
    /// Rewrite only destinations whose path discovery already failed.
    Local,
    /// Rewrite every non-private, non-link-local IPv4 destination.
    Public,
    #[default]
    Disabled,
}

impl FromStr for GatewayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(GatewayType::Local),
            "public" => Ok(GatewayType::Public),
            "disabled" => Ok(GatewayType::Disabled),
            other => Err(format!("unknown gateway type: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Where the neighbors file and table dump are written.
    pub data_dir: std::path::PathBuf,
    /// Participate in the control plane but never forward foreign traffic.
    pub monitoring_mode: bool,
    /// Advertise the default-route sentinel and answer RREQs for it.
    pub gateway_mode: bool,
    pub gateway_type: GatewayType,
    /// Master switch for per-hop ARQ on data packets.
    pub enable_arq: bool,
    /// `{L4 protocol → destination ports}` eligible for reliable data
    /// delivery; port 0 stands for the port-less ICMP protocols.
    pub arq_list: HashMap<L4Proto, Vec<u16>>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let mut arq_list = HashMap::new();
        arq_list.insert(L4Proto::Tcp, vec![22]);
        arq_list.insert(L4Proto::Udp, vec![30000, 30001]);
        arq_list.insert(L4Proto::Icmp4, vec![0]);
        arq_list.insert(L4Proto::Icmp6, vec![0]);
        RoutingConfig {
            data_dir: std::path::PathBuf::from("."),
            monitoring_mode: false,
            gateway_mode: false,
            gateway_type: GatewayType::default(),
            enable_arq: true,
            arq_list,
        }
    }
}

impl RoutingConfig {
    /// Whether a data packet with this (protocol, destination port) should
    /// be sent reliably.
    pub fn arq_applies(&self, proto: L4Proto, port: u16) -> bool {
        self.enable_arq
            && self.arq_list.get(&proto).map(|ports| ports.contains(&port)).unwrap_or(false)
    }
}
