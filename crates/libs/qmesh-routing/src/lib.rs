//! The qmesh routing core.
//!
//! Per-hop forwarding for data and control messages, reactive RREQ/RREP path
//! discovery, Stop-and-Wait ARQ, soft-state neighbor discovery, and the
//! reinforcement-learning route table fed by the reward distribution
//! protocol. All I/O goes through the [`port`] traits so the whole core runs
//! against in-memory links in tests.

pub mod arq;
pub mod config;
pub mod dumps;
pub mod handler;
pub mod hashing;
pub mod jobs;
pub mod neighbors;
pub mod path;
pub mod port;
pub mod reward;
pub mod seen;
pub mod selector;
pub mod state;
pub mod table;

pub use config::{GatewayType, RoutingConfig};
pub use handler::DataHandler;
pub use port::{AppPort, MeshLink};
pub use selector::Selector;
pub use state::{RouteState, SharedRouteState};
