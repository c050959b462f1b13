use qmesh_wire::WireError;

/// Errors from the network plumbing.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unsupported L3 protocol (version nibble {0})")]
    UnsupportedL3(u8),

    #[error("no such device: {0}")]
    NoDevice(String),

    #[error("link closed")]
    Closed,
}
