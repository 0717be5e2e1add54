use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::AuthMethod;
use crate::cascade::keys;
use crate::error::{TransportError, TransportResult};

/// Caller-supplied connection settings.
///
/// The highest-precedence layer of the config cascade: any field set here
/// beats the user's ssh_config and the built-in defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectSettings {
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    pub strict_host_key_checking: Option<bool>,
    /// Used verbatim when set; no key discovery happens.
    pub auth: Option<AuthMethod>,
}

impl ConnectSettings {
    /// Value for a cascade key, in its ssh_config string form.
    pub fn get(&self, key: &str) -> Option<String> {
        let is = |name: &str| key.eq_ignore_ascii_case(name);
        let value = if is(keys::USER) {
            self.user.clone()
        } else if is(keys::HOSTNAME) {
            self.hostname.clone()
        } else if is(keys::PORT) {
            self.port.map(|p| p.to_string())
        } else if is(keys::IDENTITY_FILE) {
            self.identity_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
        } else if is(keys::STRICT_HOST_KEY_CHECKING) {
            self.strict_host_key_checking
                .map(|strict| if strict { "yes" } else { "no" }.to_string())
        } else {
            None
        };
        value.filter(|v| !v.is_empty())
    }

    /// Copy every field that is set here onto `target`, leaving the rest of
    /// `target` untouched.
    pub fn apply_to(&self, target: &mut ConnectSettings) {
        if let Some(user) = &self.user {
            target.user = Some(user.clone());
        }
        if let Some(hostname) = &self.hostname {
            target.hostname = Some(hostname.clone());
        }
        if let Some(port) = self.port {
            target.port = Some(port);
        }
        if let Some(path) = &self.identity_file {
            target.identity_file = Some(path.clone());
        }
        if let Some(strict) = self.strict_host_key_checking {
            target.strict_host_key_checking = Some(strict);
        }
        if let Some(auth) = &self.auth {
            target.auth = Some(auth.clone());
        }
    }

    pub fn from_toml_str(text: &str) -> TransportResult<Self> {
        toml::from_str(text).map_err(|e| TransportError::Config(e.to_string()))
    }
}

/// Knobs for opening a [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub connect_timeout_secs: u64,
    pub strict_host_key_checking: bool,
    /// Overrides the ssh client's own known-hosts location.
    pub known_hosts: Option<PathBuf>,
    /// Authenticate while opening rather than on the first command.
    /// On by default, so `Session::open` reports rejected credentials.
    pub verify_on_connect: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            strict_host_key_checking: true,
            known_hosts: None,
            verify_on_connect: true,
        }
    }
}

impl SessionOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn from_toml_str(text: &str) -> TransportResult<Self> {
        toml::from_str(text).map_err(|e| TransportError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_to_overrides_set_fields() {
        let settings = ConnectSettings {
            user: Some("foo".into()),
            auth: Some(AuthMethod::Password {
                user: "foo".into(),
                password: "yourpassword".into(),
            }),
            strict_host_key_checking: Some(false),
            ..ConnectSettings::default()
        };
        let mut target = ConnectSettings::default();
        settings.apply_to(&mut target);
        assert_eq!(target.user.as_deref(), Some("foo"));
        assert!(target.auth.is_some());
        assert_eq!(target.strict_host_key_checking, Some(false));
    }

    #[test]
    fn apply_to_replaces_existing_user() {
        let settings = ConnectSettings {
            user: Some("foo".into()),
            ..ConnectSettings::default()
        };
        let mut target = ConnectSettings {
            user: Some("bar".into()),
            port: Some(2222),
            ..ConnectSettings::default()
        };
        settings.apply_to(&mut target);
        assert_eq!(target.user.as_deref(), Some("foo"));
        assert_eq!(target.port, Some(2222));
    }

    #[test]
    fn get_uses_ssh_config_key_names() {
        let settings = ConnectSettings {
            hostname: Some("foo.local".into()),
            port: Some(42),
            strict_host_key_checking: Some(true),
            user: Some(String::new()),
            ..ConnectSettings::default()
        };
        assert_eq!(settings.get("HostName").as_deref(), Some("foo.local"));
        assert_eq!(settings.get("port").as_deref(), Some("42"));
        assert_eq!(settings.get("StrictHostKeyChecking").as_deref(), Some("yes"));
        assert_eq!(settings.get("User"), None);
        assert_eq!(settings.get("ProxyJump"), None);
    }

    #[test]
    fn session_options_defaults_and_toml() {
        let defaults = SessionOptions::default();
        assert_eq!(defaults.connect_timeout(), Duration::from_secs(30));
        assert!(defaults.strict_host_key_checking);
        assert!(defaults.verify_on_connect);

        let parsed = SessionOptions::from_toml_str("connect_timeout_secs = 5\nverify_on_connect = false\n").unwrap();
        assert_eq!(parsed.connect_timeout_secs, 5);
        assert!(!parsed.verify_on_connect);
        assert!(parsed.strict_host_key_checking);
    }

    #[test]
    fn connect_settings_survive_json() {
        let settings = ConnectSettings {
            user: Some("deploy".into()),
            identity_file: Some(PathBuf::from("/keys/deploy")),
            auth: Some(AuthMethod::None { user: "deploy".into() }),
            ..ConnectSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: ConnectSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn connect_settings_from_toml() {
        let parsed = ConnectSettings::from_toml_str("user = \"deploy\"\nport = 2200\n").unwrap();
        assert_eq!(parsed.user.as_deref(), Some("deploy"));
        assert_eq!(parsed.port, Some(2200));
        assert!(matches!(
            ConnectSettings::from_toml_str("port = \"high\""),
            Err(TransportError::Config(_))
        ));
    }
}
