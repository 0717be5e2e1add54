use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cascade::keys;
use crate::endpoint::Endpoint;
use crate::error::{TransportError, TransportResult};
use crate::host_config::home_dir;
use crate::resolver::EndpointResolver;

/// Private key material a public-key credential authenticates with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMaterial {
    /// Keys held by an ssh-agent listening on this socket.
    Agent { socket: PathBuf },
    /// A private key file.
    KeyFile { path: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredential {
    pub user: String,
    pub material: KeyMaterial,
}

/// An authentication method chosen by the caller.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    Password { user: String, password: String },
    PublicKey(PublicKeyCredential),
    /// Connect without authenticating.
    None { user: String },
}

impl AuthMethod {
    pub fn user(&self) -> &str {
        match self {
            Self::Password { user, .. } | Self::None { user } => user,
            Self::PublicKey(cred) => &cred.user,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::PublicKey(_) => "public-key",
            Self::None { .. } => "none",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::PublicKey(cred) => f.debug_tuple("PublicKey").field(cred).finish(),
            Self::None { user } => f.debug_struct("None").field("user", user).finish(),
        }
    }
}

/// The credential one session attempt authenticates with.
///
/// Built once per attempt and owned by the resulting session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    Explicit(AuthMethod),
    PublicKey(PublicKeyCredential),
    Unauthenticated { user: String },
}

impl Credential {
    /// The identity presented to the remote.
    pub fn user(&self) -> &str {
        match self {
            Self::Explicit(method) => method.user(),
            Self::PublicKey(cred) => &cred.user,
            Self::Unauthenticated { user } => user,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Explicit(method) => method.display_name(),
            Self::PublicKey(_) => "public-key",
            Self::Unauthenticated { .. } => "none",
        }
    }
}

/// Finds private key material on the local machine.
pub trait KeyDiscovery: Send + Sync {
    /// `identity_file` is the configured `IdentityFile`, already
    /// tilde-expanded, if any.
    fn discover(&self, identity_file: Option<&Path>) -> Option<KeyMaterial>;
}

const DEFAULT_IDENTITIES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// Looks for a configured identity file, then `SSH_AUTH_SOCK`, then the
/// standard key files under `~/.ssh`.
#[derive(Clone, Debug, Default)]
pub struct DefaultKeyDiscovery {
    agent_socket: Option<PathBuf>,
    ssh_dir: Option<PathBuf>,
}

impl DefaultKeyDiscovery {
    pub fn from_env() -> Self {
        Self {
            agent_socket: std::env::var_os("SSH_AUTH_SOCK")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            ssh_dir: home_dir().map(|home| home.join(".ssh")),
        }
    }

    pub fn new(agent_socket: Option<PathBuf>, ssh_dir: Option<PathBuf>) -> Self {
        Self {
            agent_socket,
            ssh_dir,
        }
    }
}

impl KeyDiscovery for DefaultKeyDiscovery {
    fn discover(&self, identity_file: Option<&Path>) -> Option<KeyMaterial> {
        if let Some(path) = identity_file.filter(|p| p.is_file()) {
            return Some(KeyMaterial::KeyFile {
                path: path.to_path_buf(),
            });
        }
        if let Some(socket) = &self.agent_socket {
            return Some(KeyMaterial::Agent {
                socket: socket.clone(),
            });
        }
        let ssh_dir = self.ssh_dir.as_ref()?;
        DEFAULT_IDENTITIES
            .iter()
            .map(|name| ssh_dir.join(name))
            .find(|path| path.is_file())
            .map(|path| KeyMaterial::KeyFile { path })
    }
}

/// Always answers with the same material.
#[derive(Clone, Debug, Default)]
pub struct StaticKeyDiscovery(pub Option<KeyMaterial>);

impl KeyDiscovery for StaticKeyDiscovery {
    fn discover(&self, _identity_file: Option<&Path>) -> Option<KeyMaterial> {
        self.0.clone()
    }
}

/// Chooses the credential for a connection attempt.
///
/// An explicit [`AuthMethod`] in the connect settings is used as is. Without
/// one, a public-key credential is built for the endpoint's effective user,
/// so a configured `User` wins over the user written in the endpoint.
pub struct AuthSelector {
    resolver: Arc<EndpointResolver>,
    discovery: Arc<dyn KeyDiscovery>,
}

impl AuthSelector {
    pub fn new(resolver: Arc<EndpointResolver>, discovery: Arc<dyn KeyDiscovery>) -> Self {
        Self {
            resolver,
            discovery,
        }
    }

    pub fn select(&self, endpoint: &Endpoint) -> TransportResult<Credential> {
        if let Some(method) = &self.resolver.settings().auth {
            debug!(method = method.display_name(), "using explicit auth method");
            return Ok(match method {
                AuthMethod::None { user } => Credential::Unauthenticated { user: user.clone() },
                other => Credential::Explicit(other.clone()),
            });
        }

        let user = self
            .resolver
            .effective_user(endpoint)
            .unwrap_or_else(local_user);
        let identity_file = self
            .resolver
            .cascade()
            .resolve_value(endpoint.host(), keys::IDENTITY_FILE)
            .map(|p| expand_tilde(&p));

        match self.discovery.discover(identity_file.as_deref()) {
            Some(material) => {
                debug!(user = %user, material = ?material, "selected public-key auth");
                Ok(Credential::PublicKey(PublicKeyCredential { user, material }))
            }
            None => Err(TransportError::NoAuthAvailable { user }),
        }
    }
}

impl fmt::Debug for AuthSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSelector")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// The local login name, or `git` when none is set.
fn local_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "git".to_string())
}

fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_config::StaticHostConfig;
    use crate::settings::ConnectSettings;

    fn agent() -> KeyMaterial {
        KeyMaterial::Agent {
            socket: PathBuf::from("/tmp/agent.sock"),
        }
    }

    fn selector(
        settings: ConnectSettings,
        provider: Option<StaticHostConfig>,
        material: Option<KeyMaterial>,
    ) -> AuthSelector {
        let provider = provider.map(|p| Arc::new(p) as Arc<dyn crate::HostConfigProvider>);
        AuthSelector::new(
            Arc::new(EndpointResolver::new(settings, provider)),
            Arc::new(StaticKeyDiscovery(material)),
        )
    }

    fn github() -> Endpoint {
        Endpoint::parse("git@github.com:foo/bar.git").unwrap()
    }

    #[test]
    fn configured_user_is_used_for_public_key() {
        let provider = StaticHostConfig::new()
            .with("github.com", "Hostname", "foo.local")
            .with("github.com", "Port", "42")
            .with("github.com", "User", "AUser");
        let cred = selector(ConnectSettings::default(), Some(provider), Some(agent()))
            .select(&github())
            .unwrap();
        match cred {
            Credential::PublicKey(pk) => {
                assert_eq!(pk.user, "AUser");
                assert_eq!(pk.material, agent());
            }
            other => panic!("expected public key credential, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_user_without_config() {
        let cred = selector(ConnectSettings::default(), None, Some(agent()))
            .select(&github())
            .unwrap();
        assert_eq!(cred.user(), "git");
        assert_eq!(cred.display_name(), "public-key");
    }

    #[test]
    fn explicit_method_is_used_verbatim() {
        let method = AuthMethod::Password {
            user: "foo".into(),
            password: "yourpassword".into(),
        };
        let settings = ConnectSettings {
            auth: Some(method.clone()),
            ..ConnectSettings::default()
        };
        let provider = StaticHostConfig::new().with("github.com", "User", "AUser");
        let cred = selector(settings, Some(provider), None).select(&github()).unwrap();
        assert_eq!(cred, Credential::Explicit(method));
        assert_eq!(cred.user(), "foo");
    }

    #[test]
    fn explicit_none_is_unauthenticated() {
        let settings = ConnectSettings {
            auth: Some(AuthMethod::None { user: "anon".into() }),
            ..ConnectSettings::default()
        };
        let cred = selector(settings, None, None).select(&github()).unwrap();
        assert_eq!(cred, Credential::Unauthenticated { user: "anon".into() });
    }

    #[test]
    fn no_key_material_is_an_error() {
        let err = selector(ConnectSettings::default(), None, None)
            .select(&github())
            .unwrap_err();
        assert!(matches!(err, TransportError::NoAuthAvailable { user } if user == "git"));
    }

    #[test]
    fn default_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_dir = dir.path().to_path_buf();
        std::fs::write(ssh_dir.join("id_rsa"), "key").unwrap();
        std::fs::write(ssh_dir.join("id_ecdsa"), "key").unwrap();
        let configured = ssh_dir.join("work_key");
        std::fs::write(&configured, "key").unwrap();

        let no_agent = DefaultKeyDiscovery::new(None, Some(ssh_dir.clone()));
        assert_eq!(
            no_agent.discover(None),
            Some(KeyMaterial::KeyFile {
                path: ssh_dir.join("id_ecdsa")
            })
        );
        assert_eq!(
            no_agent.discover(Some(&configured)),
            Some(KeyMaterial::KeyFile { path: configured.clone() })
        );
        assert_eq!(
            no_agent.discover(Some(&ssh_dir.join("missing"))),
            Some(KeyMaterial::KeyFile {
                path: ssh_dir.join("id_ecdsa")
            })
        );

        let with_agent = DefaultKeyDiscovery::new(Some("/run/agent".into()), Some(ssh_dir));
        assert_eq!(
            with_agent.discover(None),
            Some(KeyMaterial::Agent {
                socket: "/run/agent".into()
            })
        );

        assert_eq!(DefaultKeyDiscovery::new(None, None).discover(None), None);
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let method = AuthMethod::Password {
            user: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{method:?}").contains("hunter2"));
        assert!(!format!("{:?}", Credential::Explicit(method)).contains("hunter2"));
    }
}
