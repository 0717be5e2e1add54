use thiserror::Error;

/// Errors from resolving, authenticating and driving an SSH transport.
///
/// Nothing in this crate retries; callers choose a policy per variant.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {input:?}: {reason}")]
    EndpointParse { input: String, reason: String },

    /// No explicit method was given and no key material could be found.
    #[error("no authentication available for user {user:?}")]
    NoAuthAvailable { user: String },

    /// Network failure or handshake failure before authentication.
    #[error("failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    /// The remote rejected the credential.
    #[error("authentication failed for {user}@{host}: {reason}")]
    Auth {
        user: String,
        host: String,
        reason: String,
    },

    /// The connection cannot multiplex and a channel is already open.
    #[error("a command channel is already open on this connection")]
    ChannelBusy,

    #[error("session is closed")]
    SessionClosed,

    #[error("invalid transport config: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
