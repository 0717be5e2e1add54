//! SSH transport for Quarry.
//!
//! Turns a repository [`Endpoint`] into a running remote command:
//!
//! 1. [`EndpointResolver`] applies the config cascade (explicit
//!    [`ConnectSettings`], then the host-config provider for the alias, then
//!    for `*`, then defaults) to get the effective host, port and user.
//! 2. [`AuthSelector`] picks a [`Credential`] for the effective user.
//! 3. [`Session::open`] connects through an [`SshConnector`], and
//!    [`Session::execute`] starts `git-upload-pack` or a sibling command,
//!    returning its stdin/stdout as async streams.
//!
//! [`SshTransport`] wires the three together. The protocol spoken over the
//! streams is not this crate's concern.

pub mod auth;
pub mod cascade;
pub mod channel;
pub mod client;
pub mod command;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod host_config;
pub mod openssh;
pub mod resolver;
pub mod session;
pub mod settings;

pub use auth::{
    AuthMethod, AuthSelector, Credential, DefaultKeyDiscovery, KeyDiscovery, KeyMaterial,
    PublicKeyCredential, StaticKeyDiscovery,
};
pub use cascade::{ConfigCascade, Resolved, Source, DEFAULT_PORT};
pub use channel::{ChannelCloser, ChannelReader, ChannelWriter};
pub use client::{CommandStreams, SshTransport};
pub use connector::{CommandHandle, RemoteCommand, SshConnection, SshConnector};
pub use endpoint::Endpoint;
pub use error::{TransportError, TransportResult};
pub use host_config::{HostConfigProvider, SshConfigFile, StaticHostConfig};
pub use openssh::OpenSshConnector;
pub use resolver::{EffectiveEndpoint, EndpointResolver};
pub use session::Session;
pub use settings::{ConnectSettings, SessionOptions};
