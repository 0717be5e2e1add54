use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::auth::Credential;
use crate::channel::{self, ChannelCloser, ChannelReader, ChannelRegistry, ChannelWriter};
use crate::command::command_line;
use crate::connector::{SshConnection, SshConnector};
use crate::error::{TransportError, TransportResult};
use crate::settings::SessionOptions;

/// One authenticated connection and the command channels open on it.
///
/// Each [`execute`](Self::execute) runs exactly one remote command. The
/// session knows nothing about what the command speaks; it only moves
/// bytes. [`close`](Self::close) closes every open channel before the
/// connection and is safe to call more than once.
pub struct Session {
    connection: Box<dyn SshConnection>,
    channels: Arc<ChannelRegistry>,
    closed: AtomicBool,
    host_port: String,
    credential: Credential,
}

impl Session {
    /// Connect and authenticate. The session takes ownership of the
    /// credential.
    pub async fn open(
        connector: &dyn SshConnector,
        host_port: &str,
        credential: Credential,
        options: &SessionOptions,
    ) -> TransportResult<Self> {
        let connection = connector.connect(host_port, &credential, options).await?;
        info!(
            host = host_port,
            user = credential.user(),
            auth = credential.display_name(),
            multiplexing = connection.supports_multiplexing(),
            "session opened"
        );
        Ok(Self {
            connection,
            channels: Arc::default(),
            closed: AtomicBool::new(false),
            host_port: host_port.to_string(),
            credential,
        })
    }

    pub fn host_port(&self) -> &str {
        &self.host_port
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn supports_multiplexing(&self) -> bool {
        self.connection.supports_multiplexing()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of channels not yet closed.
    pub fn open_channels(&self) -> usize {
        self.channels.open_count()
    }

    /// Run `command` with the shell-quoted `repository_path` as its argument.
    ///
    /// Fails with `ChannelBusy` if the connection cannot multiplex and a
    /// channel is already open, and with `SessionClosed` after `close`.
    pub async fn execute(
        &self,
        command: &str,
        repository_path: &str,
    ) -> TransportResult<(ChannelWriter, ChannelReader, ChannelCloser)> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        let state = self.channels.reserve(self.supports_multiplexing())?;
        let line = command_line(command, repository_path);

        let remote = match self.connection.exec(&line).await {
            Ok(remote) => remote,
            Err(e) => {
                state.close();
                return Err(e);
            }
        };
        state.attach(remote.handle);
        if self.is_closed() {
            state.close();
            return Err(TransportError::SessionClosed);
        }

        debug!(host = %self.host_port, command = %line, "command started");
        Ok(channel::split(state, remote.stdin, remote.stdout))
    }

    /// Close every open channel, then the connection. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let open = self.channels.drain();
        for state in &open {
            state.close();
        }
        self.connection.close().await?;
        info!(host = %self.host_port, channels_closed = open.len(), "session closed");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host_port", &self.host_port)
            .field("user", &self.credential.user())
            .field("open_channels", &self.open_channels())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::auth::{KeyMaterial, PublicKeyCredential};
    use crate::command::{RECEIVE_PACK, UPLOAD_PACK};
    use crate::connector::mock::MockConnector;

    fn credential() -> Credential {
        Credential::PublicKey(PublicKeyCredential {
            user: "git".into(),
            material: KeyMaterial::Agent {
                socket: PathBuf::from("/tmp/agent"),
            },
        })
    }

    async fn open(connector: &MockConnector) -> Session {
        Session::open(connector, "github.com:22", credential(), &SessionOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn execute_sends_quoted_command_and_streams_bytes() {
        let connector = MockConnector::new(true);
        let session = open(&connector).await;
        let (mut writer, mut reader, closer) =
            session.execute(UPLOAD_PACK, "foo/it's.git").await.unwrap();

        let mut remote = connector.state.take_remote(0);
        assert_eq!(remote.command_line, r"git-upload-pack 'foo/it'\''s.git'");

        remote.stream.write_all(b"0000").await.unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0000");

        writer.write_all(b"done").await.unwrap();
        remote.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"done");

        closer.close();
        assert!(remote.terminated.load(Ordering::SeqCst));
        assert_eq!(session.open_channels(), 0);
    }

    #[tokio::test]
    async fn close_wakes_blocked_read_and_is_idempotent() {
        let connector = MockConnector::new(true);
        let session = open(&connector).await;
        let (_writer, mut reader, closer) = session.execute(UPLOAD_PACK, "r.git").await.unwrap();

        let blocked = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.read(&mut buf).await
        });
        tokio::task::yield_now().await;

        session.close().await.unwrap();
        let err = blocked.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(closer.is_closed());

        session.close().await.unwrap();
        assert_eq!(connector.state.connection_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_after_close_fails() {
        let connector = MockConnector::new(true);
        let session = open(&connector).await;
        session.close().await.unwrap();
        assert!(matches!(
            session.execute(UPLOAD_PACK, "r.git").await,
            Err(TransportError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn single_channel_connection_refuses_second_command() {
        let connector = MockConnector::new(false);
        let session = open(&connector).await;
        assert!(!session.supports_multiplexing());

        let (_w, _r, first) = session.execute(UPLOAD_PACK, "a.git").await.unwrap();
        assert!(matches!(
            session.execute(RECEIVE_PACK, "a.git").await,
            Err(TransportError::ChannelBusy)
        ));

        first.close();
        first.close();
        assert!(session.execute(RECEIVE_PACK, "a.git").await.is_ok());
    }

    #[tokio::test]
    async fn dropped_channel_frees_single_channel_connection() {
        let connector = MockConnector::new(false);
        let session = open(&connector).await;

        let (writer, reader, closer) = session.execute(UPLOAD_PACK, "a.git").await.unwrap();
        assert_eq!(session.open_channels(), 1);
        drop((writer, reader, closer));

        assert_eq!(session.open_channels(), 0);
        assert!(connector.state.take_remote(0).terminated.load(Ordering::SeqCst));
        assert!(session.execute(RECEIVE_PACK, "a.git").await.is_ok());
    }

    #[tokio::test]
    async fn multiplexing_connection_runs_commands_together() {
        let connector = MockConnector::new(true);
        let session = open(&connector).await;
        let _a = session.execute(UPLOAD_PACK, "a.git").await.unwrap();
        let _b = session.execute(UPLOAD_PACK, "b.git").await.unwrap();
        assert_eq!(session.open_channels(), 2);

        session.close().await.unwrap();
        assert_eq!(session.open_channels(), 0);
        let commands = connector.state.commands.lock().unwrap();
        assert!(commands.iter().all(|c| c.terminated.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn rejected_credential_is_auth_error() {
        let mut connector = MockConnector::new(true);
        connector.reject_auth = true;
        let err = Session::open(&connector, "h:22", credential(), &SessionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Auth { user, .. } if user == "git"));
    }

    #[tokio::test]
    async fn session_owns_its_credential() {
        let connector = MockConnector::new(true);
        let session = open(&connector).await;
        assert_eq!(session.credential().user(), "git");
        assert_eq!(session.host_port(), "github.com:22");
        assert_eq!(
            connector.state.connects.lock().unwrap().as_slice(),
            &[("github.com:22".to_string(), "git".to_string())]
        );
    }
}
