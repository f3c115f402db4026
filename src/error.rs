/// Error taxonomy of the toolkit.
///
/// Per-frame and per-connection failures (`MalformedFrame`, handler errors) are isolated by the
/// receive loops and never abort the server; configuration and bind failures are surfaced
/// synchronously from `boot` / `send`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// route resolution failed: neither a registered path nor a known checksum
    #[error("no route registered for {0:?}")]
    NotFound(String),

    /// defensive double-check: an entry existed but no route pattern accepted the path
    #[error("no route was a match for the path {0:?}")]
    NoMatch(String),

    /// undecodable wire header; the frame is dropped, never surfaced to handlers
    #[error("malformed wire frame: {0}")]
    MalformedFrame(String),

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// a user-supplied handler or hook returned an error
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn bad_target(target: &str) -> Error {
        Error::InvalidArgument(format!("target {:?} must be given as ip:port", target))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn map_bind_error(e: std::io::Error, port: u16) -> Error {
    if e.kind() == std::io::ErrorKind::AddrInUse {
        Error::PortInUse(port)
    } else {
        Error::Transport(e)
    }
}
