//! Daemon configuration, loaded from a TOML file with per-field defaults so
//! a missing or partial file still yields a runnable node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use qmesh_net::L4Proto;
use qmesh_routing::{GatewayType, RoutingConfig, Selector};

pub const DEFAULT_UDS_PATH: &str = "/tmp/uds_socket";
pub const DEFAULT_PID_FILE: &str = "/tmp/qmeshd.pid";
pub const TOPOLOGY_FILE: &str = "topology.conf";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("cannot parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Physical device the mesh link binds to.
    pub device: String,
    /// Name of the TUN interface carrying user traffic.
    pub virtual_device: String,
    /// Where the neighbors file, table dump, and topology file live.
    pub data_dir: PathBuf,
    /// CRITICAL, ERROR, WARNING, INFO, or DEBUG.
    pub log_level: String,
    pub topology_filter: bool,
    pub monitoring_mode: bool,
    pub gateway_mode: bool,
    /// local, public, or disabled.
    pub gateway_type: String,
    pub enable_arq: bool,
    /// `{protocol name → destination ports}`; port 0 stands for ICMP.
    pub arq_list: HashMap<String, Vec<u16>>,
    /// greedy, epsilon-greedy, or softmax.
    pub selector: String,
    pub epsilon: f64,
    pub tau: f64,
    pub uds_path: PathBuf,
    pub pid_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let mut arq_list = HashMap::new();
        arq_list.insert("TCP".to_string(), vec![22]);
        arq_list.insert("UDP".to_string(), vec![30000, 30001]);
        arq_list.insert("ICMP4".to_string(), vec![0]);
        arq_list.insert("ICMP6".to_string(), vec![0]);
        Config {
            device: "wlan0".into(),
            virtual_device: qmesh_net::tun::DEFAULT_TUN_NAME.into(),
            data_dir: PathBuf::from("."),
            log_level: "INFO".into(),
            topology_filter: false,
            monitoring_mode: false,
            gateway_mode: false,
            gateway_type: "disabled".into(),
            enable_arq: true,
            arq_list,
            selector: "epsilon-greedy".into(),
            epsilon: 0.1,
            tau: 1.0,
            uds_path: PathBuf::from(DEFAULT_UDS_PATH),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else { return Ok(Config::default()) };
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn log_level(&self) -> Result<log::LevelFilter, ConfigError> {
        match self.log_level.to_ascii_uppercase().as_str() {
            // `log` has no CRITICAL; it collapses into ERROR.
            "CRITICAL" | "ERROR" => Ok(log::LevelFilter::Error),
            "WARNING" => Ok(log::LevelFilter::Warn),
            "INFO" => Ok(log::LevelFilter::Info),
            "DEBUG" => Ok(log::LevelFilter::Debug),
            other => {
                Err(ConfigError::Invalid { field: "log_level", reason: other.to_string() })
            }
        }
    }

    pub fn selector(&self) -> Result<Selector, ConfigError> {
        match self.selector.to_ascii_lowercase().as_str() {
            "greedy" => Ok(Selector::Greedy),
            "epsilon-greedy" => Ok(Selector::EpsilonGreedy { epsilon: self.epsilon }),
            "softmax" => Ok(Selector::SoftMax { tau: self.tau }),
            other => Err(ConfigError::Invalid { field: "selector", reason: other.to_string() }),
        }
    }

    pub fn topology_path(&self) -> PathBuf {
        self.data_dir.join(TOPOLOGY_FILE)
    }

    /// The subset of configuration the routing core consumes.
    pub fn routing(&self) -> Result<RoutingConfig, ConfigError> {
        let gateway_type: GatewayType = self
            .gateway_type
            .parse()
            .map_err(|reason| ConfigError::Invalid { field: "gateway_type", reason })?;

        let mut arq_list: HashMap<L4Proto, Vec<u16>> = HashMap::new();
        for (name, ports) in &self.arq_list {
            let proto: L4Proto = name
                .parse()
                .map_err(|reason| ConfigError::Invalid { field: "arq_list", reason })?;
            arq_list.entry(proto).or_default().extend(ports.iter().copied());
        }

        Ok(RoutingConfig {
            data_dir: self.data_dir.clone(),
            monitoring_mode: self.monitoring_mode,
            gateway_mode: self.gateway_mode,
            gateway_type,
            enable_arq: self.enable_arq,
            arq_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.virtual_device, "adhoc0");
        assert_eq!(config.log_level().unwrap(), log::LevelFilter::Info);
        let routing = config.routing().unwrap();
        assert!(routing.arq_applies(L4Proto::Tcp, 22));
        assert_eq!(routing.gateway_type, GatewayType::Disabled);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
device = "mesh0"
monitoring_mode = true
log_level = "DEBUG"
selector = "softmax"

[arq_list]
TCP = [22, 80]
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.device, "mesh0");
        assert!(config.monitoring_mode);
        assert_eq!(config.log_level().unwrap(), log::LevelFilter::Debug);
        assert_eq!(config.selector().unwrap(), Selector::SoftMax { tau: 1.0 });
        // The file's arq_list replaces the default table wholesale.
        let routing = config.routing().unwrap();
        assert!(routing.arq_applies(L4Proto::Tcp, 80));
        assert!(!routing.arq_applies(L4Proto::Udp, 30000));
        // Unset fields keep their defaults.
        assert_eq!(config.virtual_device, "adhoc0");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no_such_option = 1").unwrap();
        assert!(matches!(Config::load(Some(file.path())), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn bad_enumerations_are_rejected() {
        let config = Config { log_level: "TRACE2".into(), ..Default::default() };
        assert!(config.log_level().is_err());

        let config = Config { selector: "ucb".into(), ..Default::default() };
        assert!(config.selector().is_err());

        let config = Config { gateway_type: "nat".into(), ..Default::default() };
        assert!(config.routing().is_err());
    }

    #[test]
    fn critical_maps_to_error() {
        let config = Config { log_level: "CRITICAL".into(), ..Default::default() };
        assert_eq!(config.log_level().unwrap(), log::LevelFilter::Error);
    }
}
