/// Errors from wire protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type tag: {0}")]
    UnknownType(u8),

    #[error("buffer too short: {got} bytes (minimum {need} for this message)")]
    Truncated { got: usize, need: usize },

    #[error("bad address: {0}")]
    BadAddress(String),
}
