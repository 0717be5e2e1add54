//! Layered, per-key configuration lookup.
//!
//! For a host alias and a key, layers are consulted highest precedence
//! first:
//!
//! 1. explicit [`ConnectSettings`]
//! 2. the host-config provider for the alias itself
//! 3. the host-config provider for the wildcard alias `*`
//! 4. built-in defaults
//!
//! Each key falls through on its own, so a host entry that sets `Hostname`
//! but not `Port` still picks `Port` up from `*`.

use std::sync::Arc;

use crate::host_config::HostConfigProvider;
use crate::settings::ConnectSettings;

/// ssh_config key names understood by the resolver.
pub mod keys {
    pub const HOSTNAME: &str = "Hostname";
    pub const PORT: &str = "Port";
    pub const USER: &str = "User";
    pub const IDENTITY_FILE: &str = "IdentityFile";
    pub const STRICT_HOST_KEY_CHECKING: &str = "StrictHostKeyChecking";
}

pub const DEFAULT_PORT: u16 = 22;

/// Alias under which host-config providers keep fallback settings.
pub const WILDCARD_ALIAS: &str = "*";

/// Which layer produced a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    Explicit,
    HostConfig,
    Wildcard,
    Default,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub source: Source,
}

fn default_value(key: &str) -> Option<String> {
    if key.eq_ignore_ascii_case(keys::PORT) {
        Some(DEFAULT_PORT.to_string())
    } else {
        None
    }
}

/// Read-only view over explicit settings, an optional host-config provider
/// and defaults. Lookups have no side effects and nothing is cached.
#[derive(Clone, Default)]
pub struct ConfigCascade {
    settings: ConnectSettings,
    provider: Option<Arc<dyn HostConfigProvider>>,
}

impl ConfigCascade {
    pub fn new(settings: ConnectSettings, provider: Option<Arc<dyn HostConfigProvider>>) -> Self {
        Self { settings, provider }
    }

    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }

    pub fn provider(&self) -> Option<&Arc<dyn HostConfigProvider>> {
        self.provider.as_ref()
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Every layer's value for `key`, highest precedence first.
    ///
    /// Callers that must validate a value (a port, say) walk this list and
    /// move on when one does not parse.
    pub fn candidates(&self, alias: &str, key: &str) -> Vec<Resolved> {
        let mut found = Vec::with_capacity(4);
        let mut push = |value: Option<String>, source| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                found.push(Resolved { value, source });
            }
        };
        push(self.settings.get(key), Source::Explicit);
        if let Some(provider) = &self.provider {
            push(provider.get(alias, key), Source::HostConfig);
            if alias != WILDCARD_ALIAS {
                push(provider.get(WILDCARD_ALIAS, key), Source::Wildcard);
            }
        }
        push(default_value(key), Source::Default);
        found
    }

    /// The winning value for `key` and the layer it came from.
    pub fn resolve(&self, alias: &str, key: &str) -> Option<Resolved> {
        self.candidates(alias, key).into_iter().next()
    }

    pub fn resolve_value(&self, alias: &str, key: &str) -> Option<String> {
        self.resolve(alias, key).map(|r| r.value)
    }
}

impl std::fmt::Debug for ConfigCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCascade")
            .field("settings", &self.settings)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_config::StaticHostConfig;

    fn cascade(provider: StaticHostConfig, settings: ConnectSettings) -> ConfigCascade {
        ConfigCascade::new(settings, Some(Arc::new(provider)))
    }

    #[test]
    fn defaults_without_provider() {
        let c = ConfigCascade::default();
        assert!(!c.has_provider());
        assert_eq!(
            c.resolve("github.com", "Port"),
            Some(Resolved {
                value: "22".into(),
                source: Source::Default
            })
        );
        assert_eq!(c.resolve("github.com", "User"), None);
    }

    #[test]
    fn host_entry_beats_wildcard_per_key() {
        let provider = StaticHostConfig::new()
            .with("github.com", "Hostname", "foo.local")
            .with("*", "Hostname", "fallback.local")
            .with("*", "Port", "42");
        let c = cascade(provider, ConnectSettings::default());

        let host = c.resolve("github.com", "Hostname").unwrap();
        assert_eq!(host.value, "foo.local");
        assert_eq!(host.source, Source::HostConfig);

        let port = c.resolve("github.com", "Port").unwrap();
        assert_eq!(port.value, "42");
        assert_eq!(port.source, Source::Wildcard);
    }

    #[test]
    fn explicit_settings_win() {
        let provider = StaticHostConfig::new().with("h", "User", "from-config");
        let settings = ConnectSettings {
            user: Some("explicit".into()),
            ..ConnectSettings::default()
        };
        let c = cascade(provider, settings);
        let user = c.resolve("h", "user").unwrap();
        assert_eq!(user.value, "explicit");
        assert_eq!(user.source, Source::Explicit);
        assert_eq!(c.settings().user.as_deref(), Some("explicit"));
    }

    #[test]
    fn candidates_are_in_precedence_order() {
        let provider = StaticHostConfig::new()
            .with("h", "Port", "2200")
            .with("*", "Port", "2300");
        let settings = ConnectSettings {
            port: Some(2100),
            ..ConnectSettings::default()
        };
        let c = cascade(provider, settings);
        let sources: Vec<_> = c.candidates("h", "Port").into_iter().map(|r| r.source).collect();
        assert_eq!(
            sources,
            vec![Source::Explicit, Source::HostConfig, Source::Wildcard, Source::Default]
        );
    }

    #[test]
    fn wildcard_alias_is_not_asked_twice() {
        let provider = StaticHostConfig::new().with("*", "User", "any");
        let c = cascade(provider, ConnectSettings::default());
        let found = c.candidates("*", "User");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, Source::HostConfig);
    }

    #[test]
    fn resolution_is_repeatable() {
        let provider = StaticHostConfig::new().with("h", "Hostname", "x");
        let c = cascade(provider, ConnectSettings::default());
        assert_eq!(c.resolve_value("h", "Hostname"), c.resolve_value("h", "Hostname"));
    }
}
