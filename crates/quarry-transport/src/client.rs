use std::sync::Arc;

use crate::auth::{AuthSelector, DefaultKeyDiscovery, KeyDiscovery};
use crate::channel::{ChannelCloser, ChannelReader, ChannelWriter};
use crate::command::{RECEIVE_PACK, UPLOAD_PACK};
use crate::connector::SshConnector;
use crate::endpoint::Endpoint;
use crate::error::TransportResult;
use crate::host_config::HostConfigProvider;
use crate::openssh::OpenSshConnector;
use crate::resolver::EndpointResolver;
use crate::session::Session;
use crate::settings::{ConnectSettings, SessionOptions};

/// An open session with one command running on it.
pub type CommandStreams = (Session, ChannelWriter, ChannelReader, ChannelCloser);

/// Endpoint in, authenticated [`Session`] out.
///
/// Resolves the endpoint through the config cascade, picks a credential,
/// and opens a session with the configured connector.
pub struct SshTransport {
    connector: Arc<dyn SshConnector>,
    resolver: Arc<EndpointResolver>,
    discovery: Arc<dyn KeyDiscovery>,
    options: SessionOptions,
}

impl SshTransport {
    /// Uses the user's `~/.ssh/config` and keys from the environment.
    pub fn new(connector: Arc<dyn SshConnector>) -> Self {
        Self {
            connector,
            resolver: Arc::new(EndpointResolver::with_user_config(ConnectSettings::default())),
            discovery: Arc::new(DefaultKeyDiscovery::from_env()),
            options: SessionOptions::default(),
        }
    }

    /// Drives the system `ssh` binary.
    pub fn openssh() -> Self {
        Self::new(Arc::new(OpenSshConnector::default()))
    }

    /// Replace the host-config layer; `None` removes it.
    pub fn with_host_config(mut self, provider: Option<Arc<dyn HostConfigProvider>>) -> Self {
        let settings = self.resolver.settings().clone();
        self.resolver = Arc::new(EndpointResolver::new(settings, provider));
        self
    }

    /// Layer `settings` over the current connect settings. Fields left unset
    /// in `settings` keep their current values.
    pub fn with_settings(mut self, settings: ConnectSettings) -> Self {
        let mut merged = self.resolver.settings().clone();
        settings.apply_to(&mut merged);
        let provider = self.resolver.cascade().provider().cloned();
        self.resolver = Arc::new(EndpointResolver::new(merged, provider));
        self
    }

    pub fn with_key_discovery(mut self, discovery: Arc<dyn KeyDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Resolve, authenticate and connect.
    pub async fn open_session(&self, endpoint: &Endpoint) -> TransportResult<Session> {
        let host_port = self.resolver.effective_host_port(endpoint);
        let credential =
            AuthSelector::new(Arc::clone(&self.resolver), Arc::clone(&self.discovery)).select(endpoint)?;

        let mut options = self.options.clone();
        if let Some(strict) = self.resolver.settings().strict_host_key_checking {
            options.strict_host_key_checking = strict;
        }
        Session::open(self.connector.as_ref(), &host_port, credential, &options).await
    }

    /// Open a session and start `git-upload-pack` for the endpoint's path.
    pub async fn upload_pack(&self, endpoint: &Endpoint) -> TransportResult<CommandStreams> {
        self.run(endpoint, UPLOAD_PACK).await
    }

    /// Open a session and start `git-receive-pack` for the endpoint's path.
    pub async fn receive_pack(&self, endpoint: &Endpoint) -> TransportResult<CommandStreams> {
        self.run(endpoint, RECEIVE_PACK).await
    }

    async fn run(&self, endpoint: &Endpoint, command: &str) -> TransportResult<CommandStreams> {
        let session = self.open_session(endpoint).await?;
        match session.execute(command, endpoint.path()).await {
            Ok((writer, reader, closer)) => Ok((session, writer, reader, closer)),
            Err(e) => {
                session.close().await?;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
