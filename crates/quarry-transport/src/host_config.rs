//! Per-host configuration sources.
//!
//! A [`HostConfigProvider`] answers "value of key K for host alias A". The
//! cascade in [`crate::cascade`] decides precedence and the `*` fallback;
//! providers only report what they hold for the alias they are asked about.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};

/// Source of per-host settings such as `Hostname`, `Port` and `User`.
///
/// Keys are compared case-insensitively. An empty value is the same as an
/// absent one and must be reported as `None`.
pub trait HostConfigProvider: Send + Sync {
    fn get(&self, alias: &str, key: &str) -> Option<String>;
}

/// In-memory `alias -> key -> value` table.
#[derive(Clone, Debug, Default)]
pub struct StaticHostConfig {
    hosts: HashMap<String, HashMap<String, String>>,
}

impl StaticHostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, alias: &str, key: &str, value: &str) -> Self {
        self.insert(alias, key, value);
        self
    }

    pub fn insert(&mut self, alias: &str, key: &str, value: &str) {
        self.hosts
            .entry(alias.to_string())
            .or_default()
            .insert(key.to_ascii_lowercase(), value.to_string());
    }
}

impl HostConfigProvider for StaticHostConfig {
    fn get(&self, alias: &str, key: &str) -> Option<String> {
        self.hosts
            .get(alias)?
            .get(&key.to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .cloned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Pattern {
    glob: String,
    negated: bool,
}

#[derive(Clone, Debug, Default)]
struct HostBlock {
    patterns: Vec<Pattern>,
    /// (lowercased key, value) in file order.
    entries: Vec<(String, String)>,
    /// `Match` blocks are parsed past but never applied.
    inert: bool,
}

impl HostBlock {
    fn is_wildcard_only(&self) -> bool {
        matches!(self.patterns.as_slice(), [p] if p.glob == "*" && !p.negated)
    }

    fn matches(&self, alias: &str) -> bool {
        if self.inert {
            return false;
        }
        if self.is_wildcard_only() {
            return alias == "*";
        }
        let alias = alias.to_ascii_lowercase();
        let mut matched = false;
        for pattern in &self.patterns {
            if glob_match(&pattern.glob, &alias) {
                if pattern.negated {
                    return false;
                }
                matched = true;
            }
        }
        matched
    }
}

/// An OpenSSH `ssh_config` file.
///
/// Supports `Host` blocks with `*`, `?` and `!` patterns, `Key value` and
/// `Key=value` lines, comments and double-quoted values. Settings before the
/// first `Host` line behave like `Host *`. `Match` blocks and `Include`
/// directives are ignored.
///
/// A block whose only pattern is `*` is reported only when the alias asked
/// for is `*` itself; the cascade asks for `*` after the real alias comes up
/// empty, which keeps per-host blocks ahead of `Host *` wherever they appear
/// in the file.
#[derive(Clone, Debug, Default)]
pub struct SshConfigFile {
    path: Option<PathBuf>,
    blocks: Vec<HostBlock>,
}

impl SshConfigFile {
    pub fn parse(text: &str) -> Self {
        let mut blocks = vec![HostBlock {
            patterns: vec![Pattern {
                glob: "*".into(),
                negated: false,
            }],
            ..HostBlock::default()
        }];

        for (lineno, raw) in text.lines().enumerate() {
            let Some((key, value)) = split_directive(raw) else {
                continue;
            };
            match key.as_str() {
                "host" => blocks.push(HostBlock {
                    patterns: parse_patterns(&value),
                    ..HostBlock::default()
                }),
                "match" => blocks.push(HostBlock {
                    inert: true,
                    ..HostBlock::default()
                }),
                "include" => {
                    warn!(line = lineno + 1, "ssh_config Include is not supported, skipping");
                }
                _ => {
                    if let Some(block) = blocks.last_mut() {
                        block.entries.push((key, value));
                    }
                }
            }
        }

        Self { path: None, blocks }
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> TransportResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&text);
        config.path = Some(path.to_path_buf());
        debug!(path = %path.display(), blocks = config.blocks.len(), "loaded ssh_config");
        Ok(config)
    }

    /// The current user's `~/.ssh/config`; `Ok(None)` when it does not exist.
    pub fn user_default() -> TransportResult<Option<Self>> {
        let Some(home) = home_dir() else {
            return Ok(None);
        };
        match Self::load(&home.join(".ssh").join("config")) {
            Ok(config) => Ok(Some(config)),
            Err(TransportError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// File this config was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl HostConfigProvider for SshConfigFile {
    fn get(&self, alias: &str, key: &str) -> Option<String> {
        let key = key.to_ascii_lowercase();
        self.blocks
            .iter()
            .filter(|block| block.matches(alias))
            .flat_map(|block| block.entries.iter())
            .find(|(k, v)| *k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Split one config line into a lowercased key and its unquoted value.
fn split_directive(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (key, rest) = line.split_at(split);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    Some((key.to_ascii_lowercase(), unquote(rest).to_string()))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_patterns(value: &str) -> Vec<Pattern> {
    value
        .split_whitespace()
        .map(|p| {
            let p = unquote(p).to_ascii_lowercase();
            let (negated, glob) = match p.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, p.as_str()),
            };
            Pattern {
                glob: glob.to_string(),
                negated,
            }
        })
        .collect()
}

/// `*` matches any run of characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
