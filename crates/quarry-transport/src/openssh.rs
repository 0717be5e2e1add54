//! Connector that drives the system `ssh` client.
//!
//! Every command runs in its own `ssh` process, so connections from this
//! connector multiplex freely. Authentication happens when a process
//! starts. With [`SessionOptions::verify_on_connect`] (the default) a login
//! check process runs during `connect`, so bad credentials fail
//! `Session::open`.
//!
//! A command whose `ssh` process exits with status 255 ends its stdout with
//! an error carrying the classified [`TransportError`] instead of a clean
//! EOF.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::{AuthMethod, Credential, KeyMaterial};
use crate::connector::{CommandHandle, RemoteCommand, SshConnection, SshConnector};
use crate::error::{TransportError, TransportResult};
use crate::settings::SessionOptions;

/// Exit status `ssh` uses for its own failures, as opposed to the remote
/// command's.
const SSH_FAILURE_STATUS: i32 = 255;

/// Stderr kept per command for classifying a failure.
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Clone, Debug)]
pub struct OpenSshConnector {
    program: PathBuf,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl OpenSshConnector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Arguments shared by every process of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Invocation {
    host: String,
    args: Vec<String>,
    envs: Vec<(String, PathBuf)>,
}

fn split_host_port(host_port: &str) -> Option<(&str, u16)> {
    let (host, port) = match host_port.strip_prefix('[') {
        Some(rest) => {
            let (host, port) = rest.split_once("]:")?;
            (host, port)
        }
        None => host_port.rsplit_once(':')?,
    };
    let port = port.parse().ok()?;
    (!host.is_empty()).then_some((host, port))
}

fn invocation(
    host_port: &str,
    credential: &Credential,
    options: &SessionOptions,
) -> TransportResult<Invocation> {
    let (host, port) = split_host_port(host_port).ok_or_else(|| TransportError::Connect {
        host: host_port.to_string(),
        reason: "expected host:port".into(),
    })?;

    let mut args = vec![
        "-T".to_string(),
        "-p".to_string(),
        port.to_string(),
        "-l".to_string(),
        credential.user().to_string(),
    ];
    let mut option = |value: String| {
        args.push("-o".to_string());
        args.push(value);
    };
    option("BatchMode=yes".into());
    option(format!("ConnectTimeout={}", options.connect_timeout_secs));
    option(format!(
        "StrictHostKeyChecking={}",
        if options.strict_host_key_checking { "yes" } else { "no" }
    ));
    if let Some(known_hosts) = &options.known_hosts {
        option(format!("UserKnownHostsFile={}", known_hosts.display()));
    }

    let mut envs = Vec::new();
    let material = match credential {
        Credential::PublicKey(cred) | Credential::Explicit(AuthMethod::PublicKey(cred)) => {
            Some(&cred.material)
        }
        Credential::Unauthenticated { .. } | Credential::Explicit(AuthMethod::None { .. }) => {
            option("PubkeyAuthentication=no".into());
            option("PasswordAuthentication=no".into());
            option("KbdInteractiveAuthentication=no".into());
            None
        }
        Credential::Explicit(AuthMethod::Password { user, .. }) => {
            return Err(TransportError::Auth {
                user: user.clone(),
                host: host_port.to_string(),
                reason: "password authentication needs an interactive ssh client".into(),
            });
        }
    };
    match material {
        Some(KeyMaterial::KeyFile { path }) => {
            option("IdentitiesOnly=yes".into());
            args.push("-i".to_string());
            args.push(path.display().to_string());
        }
        Some(KeyMaterial::Agent { socket }) => {
            envs.push(("SSH_AUTH_SOCK".to_string(), socket.clone()));
        }
        None => {}
    }

    Ok(Invocation {
        host: host.to_string(),
        args,
        envs,
    })
}

/// Map a failed `ssh` run to a transport error using its stderr.
fn classify_failure(host_port: &str, user: &str, stderr: &str) -> TransportError {
    let reason = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("ssh exited with status 255")
        .to_string();
    if stderr.contains("Permission denied") {
        TransportError::Auth {
            user: user.to_string(),
            host: host_port.to_string(),
            reason,
        }
    } else {
        TransportError::Connect {
            host: host_port.to_string(),
            reason,
        }
    }
}

pub struct OpenSshConnection {
    program: PathBuf,
    host_port: String,
    user: String,
    invocation: Invocation,
}

impl OpenSshConnection {
    fn command(&self, command_line: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.invocation.args)
            .arg("--")
            .arg(&self.invocation.host)
            .arg(command_line)
            .envs(self.invocation.envs.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true);
        cmd
    }

    async fn check_login(&self, options: &SessionOptions) -> TransportResult<()> {
        let mut cmd = self.command("true");
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        // ConnectTimeout bounds the handshake only; leave room for the rest
        let limit = options.connect_timeout() * 2;
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(TransportError::Connect {
                    host: self.host_port.clone(),
                    reason: format!("no answer within {}s", limit.as_secs()),
                })
            }
        };
        if output.status.code() == Some(SSH_FAILURE_STATUS) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&self.host_port, &self.user, &stderr));
        }
        debug!(host = %self.host_port, status = ?output.status.code(), "ssh login check succeeded");
        Ok(())
    }
}

/// Asks the monitor task to kill the process. Dropping it does the same.
struct ChildHandle(Option<oneshot::Sender<()>>);

impl CommandHandle for ChildHandle {
    fn terminate(&mut self) {
        if let Some(kill) = self.0.take() {
            let _ = kill.send(());
        }
    }
}

fn io_error_for(error: TransportError) -> io::Error {
    let kind = match error {
        TransportError::Auth { .. } => io::ErrorKind::PermissionDenied,
        _ => io::ErrorKind::ConnectionAborted,
    };
    io::Error::new(kind, error)
}

/// The command's stdout. At EOF it waits for the process to exit and
/// reports an `ssh` failure as an error.
struct ProcessStdout {
    inner: ChildStdout,
    exit: Option<oneshot::Receiver<Option<TransportError>>>,
}

impl AsyncRead for ProcessStdout {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {}
            other => return other,
        }
        let Some(exit) = this.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = match Pin::new(exit).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome,
        };
        this.exit = None;
        match outcome {
            Ok(Some(failure)) => Poll::Ready(Err(io_error_for(failure))),
            _ => Poll::Ready(Ok(())),
        }
    }
}

fn drain_stderr(stderr: ChildStderr, host: String) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut tail = String::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(host = %host, "remote stderr: {line}");
            tail.push_str(&line);
            tail.push('\n');
            if tail.len() > STDERR_TAIL_BYTES {
                let mut cut = tail.len() - STDERR_TAIL_BYTES;
                while !tail.is_char_boundary(cut) {
                    cut += 1;
                }
                tail.drain(..cut);
            }
        }
        tail
    })
}

/// Own the child until it exits, killing it on request, then classify the
/// exit for the stdout reader.
async fn monitor(
    mut child: Child,
    mut kill: oneshot::Receiver<()>,
    stderr: Option<JoinHandle<String>>,
    exit: oneshot::Sender<Option<TransportError>>,
    host_port: String,
    user: String,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut kill => None,
    };
    let status: io::Result<ExitStatus> = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                if e.kind() != io::ErrorKind::InvalidInput {
                    warn!(error = %e, "failed to stop ssh process");
                }
            }
            child.wait().await
        }
    };
    let stderr = match stderr {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let failure = match status {
        Ok(status) if status.code() == Some(SSH_FAILURE_STATUS) => {
            let failure = classify_failure(&host_port, &user, &stderr);
            warn!(host = %host_port, error = %failure, "ssh failed");
            Some(failure)
        }
        Ok(status) => {
            debug!(host = %host_port, status = ?status.code(), "ssh exited");
            None
        }
        Err(e) => {
            warn!(host = %host_port, error = %e, "lost track of ssh process");
            None
        }
    };
    let _ = exit.send(failure);
}

#[async_trait]
impl SshConnection for OpenSshConnection {
    fn supports_multiplexing(&self) -> bool {
        true
    }

    async fn exec(&self, command_line: &str) -> TransportResult<RemoteCommand> {
        let mut child = self
            .command(command_line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("ssh stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("ssh stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(stderr, self.host_port.clone()));

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(monitor(
            child,
            kill_rx,
            stderr,
            exit_tx,
            self.host_port.clone(),
            self.user.clone(),
        ));

        Ok(RemoteCommand {
            stdin: Box::new(stdin),
            stdout: Box::new(ProcessStdout {
                inner: stdout,
                exit: Some(exit_rx),
            }),
            handle: Box::new(ChildHandle(Some(kill_tx))),
        })
    }

    async fn close(&self) -> TransportResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SshConnector for OpenSshConnector {
    async fn connect(
        &self,
        host_port: &str,
        credential: &Credential,
        options: &SessionOptions,
    ) -> TransportResult<Box<dyn SshConnection>> {
        let connection = OpenSshConnection {
            program: self.program.clone(),
            host_port: host_port.to_string(),
            user: credential.user().to_string(),
            invocation: invocation(host_port, credential, options)?,
        };
        if options.verify_on_connect {
            connection.check_login(options).await?;
        }
        Ok(Box::new(connection))
    }
}
