use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::Credential;
use crate::error::TransportResult;
use crate::settings::SessionOptions;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lets a channel stop its remote command.
pub trait CommandHandle: Send {
    /// Request termination. Must not block and may be called more than once.
    fn terminate(&mut self);
}

/// One command running on the remote side.
pub struct RemoteCommand {
    /// The command's standard input.
    pub stdin: BoxedWriter,
    /// The command's standard output.
    pub stdout: BoxedReader,
    pub handle: Box<dyn CommandHandle>,
}

/// An authenticated connection that can run commands.
#[async_trait]
pub trait SshConnection: Send + Sync {
    /// Whether several commands may run at once over this connection.
    fn supports_multiplexing(&self) -> bool;

    /// Start `command_line` on the remote side.
    async fn exec(&self, command_line: &str) -> TransportResult<RemoteCommand>;

    /// Tear the connection down. Called once, after every channel is closed.
    async fn close(&self) -> TransportResult<()>;
}

/// Opens connections. Implementations map network and handshake failures to
/// `TransportError::Connect` and rejected credentials to
/// `TransportError::Auth`.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(
        &self,
        host_port: &str,
        credential: &Credential,
        options: &SessionOptions,
    ) -> TransportResult<Box<dyn SshConnection>>;
}
