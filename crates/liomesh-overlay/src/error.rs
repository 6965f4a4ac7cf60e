/// Errors from the overlay engine.
///
/// Only the application-facing send operations and the wire codec return
/// these. Event handlers degrade the mesh instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wire codec error: {0}")]
    Wire(#[from] serde_json::Error),

    #[error("message type {0:?} is reserved for mesh control frames")]
    ReservedKind(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("data channel to {0} is not open")]
    ChannelClosed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
