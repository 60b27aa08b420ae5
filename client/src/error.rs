//! The caller-facing error taxonomy. One variant per class in the protocol's
//! error handling design; `Display` text is part of the contract -- callers
//! (and our own tests) match on these strings.

use sqlite_bridge_wire::RpcError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Class 1: bad path/flags, spawn failure, or handshake timeout.
    #[error("{0}")]
    OpenFailed(String),

    /// Class 2: the engine rejected a statement or its parameters. The
    /// connection remains usable after this.
    #[error("{message}")]
    Sql { message: String, code: Option<i64> },

    /// Class 3: a response could not be attributed to any outstanding
    /// request, or the stream carried an un-framed terminal error.
    #[error("Invalid message received")]
    Protocol,

    /// Classes 3/4/5: the connection is no longer usable.
    #[error("Database closed")]
    Closed,

    /// A pending socket-mode `open` was cancelled or timed out.
    #[error("Opening database cancelled")]
    Cancelled,

    /// A second `quit()` call on the same connection.
    #[error("quit() already called")]
    AlreadyClosing,

    /// Transport bootstrap failed below the worker's own protocol: spawn
    /// error, bind error, or I/O failure setting up pipes/sockets.
    #[error("failed to start worker: {0}")]
    Io(String),
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Error::Sql {
            message: err.message,
            code: err.code,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
