use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cascade::{keys, ConfigCascade, Source, DEFAULT_PORT};
use crate::endpoint::Endpoint;
use crate::host_config::{HostConfigProvider, SshConfigFile};
use crate::settings::ConnectSettings;

/// Where a connection actually goes once configuration is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectiveEndpoint {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub path: String,
}

impl EffectiveEndpoint {
    /// `host:port`, with IPv6 hosts bracketed.
    pub fn host_port(&self) -> String {
        format_host_port(&self.host, self.port)
    }
}

impl fmt::Display for EffectiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}:{}", self.host_port(), self.path)
    }
}

pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Derives effective host, port and user for an [`Endpoint`].
///
/// Configuration overrides what the endpoint literally says: a configured
/// `Hostname`, `Port` or `User` wins over the endpoint's own host, port or
/// user, and the endpoint's values are the fallback beneath configuration.
/// The endpoint itself is never modified.
#[derive(Clone, Debug, Default)]
pub struct EndpointResolver {
    cascade: ConfigCascade,
}

impl EndpointResolver {
    pub fn new(settings: ConnectSettings, provider: Option<Arc<dyn HostConfigProvider>>) -> Self {
        Self {
            cascade: ConfigCascade::new(settings, provider),
        }
    }

    /// Use the current user's `~/.ssh/config` as the host-config layer.
    ///
    /// A missing file means no host-config layer. An unreadable file is
    /// logged and treated the same way.
    pub fn with_user_config(settings: ConnectSettings) -> Self {
        let provider: Option<Arc<dyn HostConfigProvider>> = match SshConfigFile::user_default() {
            Ok(Some(config)) => Some(Arc::new(config)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read ~/.ssh/config, continuing without it");
                None
            }
        };
        Self::new(settings, provider)
    }

    pub fn cascade(&self) -> &ConfigCascade {
        &self.cascade
    }

    pub fn settings(&self) -> &ConnectSettings {
        self.cascade.settings()
    }

    pub fn effective_host(&self, endpoint: &Endpoint) -> String {
        self.cascade
            .resolve_value(endpoint.host(), keys::HOSTNAME)
            .unwrap_or_else(|| endpoint.host().to_string())
    }

    /// Configured port, else the endpoint's port, else 22.
    ///
    /// A configured value that is not a valid port is skipped with a warning.
    pub fn effective_port(&self, endpoint: &Endpoint) -> u16 {
        let alias = endpoint.host();
        for candidate in self.cascade.candidates(alias, keys::PORT) {
            if candidate.source == Source::Default {
                break;
            }
            match candidate.value.parse::<u16>() {
                Ok(port) if port != 0 => return port,
                _ => warn!(
                    host = alias,
                    value = %candidate.value,
                    source = ?candidate.source,
                    "ignoring invalid configured port"
                ),
            }
        }
        endpoint.port().unwrap_or(DEFAULT_PORT)
    }

    /// `host:port` to dial.
    pub fn effective_host_port(&self, endpoint: &Endpoint) -> String {
        format_host_port(&self.effective_host(endpoint), self.effective_port(endpoint))
    }

    /// Configured user, else the endpoint's user, else none.
    pub fn effective_user(&self, endpoint: &Endpoint) -> Option<String> {
        self.cascade
            .resolve_value(endpoint.host(), keys::USER)
            .or_else(|| endpoint.user().map(str::to_string))
    }

    pub fn resolve(&self, endpoint: &Endpoint) -> EffectiveEndpoint {
        let effective = EffectiveEndpoint {
            host: self.effective_host(endpoint),
            port: self.effective_port(endpoint),
            user: self.effective_user(endpoint),
            path: endpoint.path().to_string(),
        };
        debug!(endpoint = %endpoint, effective = %effective, "resolved endpoint");
        effective
    }
}
