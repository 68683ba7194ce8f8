use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Error type for per-connection and startup failures
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client sent something that is not a parsable proxy request.
    /// The stream is in an unreliable state afterwards.
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    /// Credentials absent or invalid after the single challenge/retry cycle
    #[error("proxy authentication failed")]
    AuthFailed,

    /// Target host is on the blacklist; no dial was attempted
    #[error("domain {0} is blacklisted")]
    DomainBlocked(String),

    /// Target unreachable; the connection is dropped with no response
    #[error("failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The listening socket could not be acquired
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
