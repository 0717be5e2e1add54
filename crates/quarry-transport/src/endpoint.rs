use std::fmt;
use std::str::FromStr;

use crate::error::{TransportError, TransportResult};

const SSH_SCHEMES: [&str; 3] = ["ssh", "git+ssh", "ssh+git"];

/// A remote repository location as the user wrote it.
///
/// Immutable once constructed. Configuration never rewrites an endpoint;
/// the resolver derives an [`EffectiveEndpoint`](crate::EffectiveEndpoint)
/// from it instead.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    protocol: String,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    path: String,
}

impl Endpoint {
    /// An `ssh` endpoint with no user and no explicit port.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            protocol: "ssh".to_string(),
            user: None,
            password: None,
            host: host.into(),
            port: None,
            path: path.into(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Parse `[user@]host:path` or `ssh://[user[:password]@]host[:port]/path`.
    ///
    /// `git+ssh://` and `ssh+git://` are accepted as aliases of `ssh://`.
    /// The scp-like form also accepts `host:port/path`.
    pub fn parse(input: &str) -> TransportResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(parse_error(input, "empty endpoint"));
        }
        match input.split_once("://") {
            Some((scheme, rest)) => {
                if !SSH_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
                    return Err(parse_error(input, &format!("unsupported scheme {scheme:?}")));
                }
                parse_url(input, rest)
            }
            None => parse_scp(input),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The user written into the endpoint, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The host as written. Also the alias used for host-config lookups.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port as written; `None` when the endpoint does not name one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn parse_error(input: &str, reason: &str) -> TransportError {
    TransportError::EndpointParse {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_url(input: &str, rest: &str) -> TransportResult<Endpoint> {
    let (authority, path) = match rest.find('/') {
        Some(slash) => rest.split_at(slash),
        None => return Err(parse_error(input, "missing repository path")),
    };
    if path.len() <= 1 {
        return Err(parse_error(input, "missing repository path"));
    }

    let (userinfo, host_port) = match authority.rsplit_once('@') {
        Some((userinfo, host_port)) => (Some(userinfo), host_port),
        None => (None, authority),
    };
    let (user, password) = match userinfo {
        None => (None, None),
        Some(info) => {
            let (user, password) = match info.split_once(':') {
                Some((user, password)) => (user, Some(password.to_string())),
                None => (info, None),
            };
            if user.is_empty() {
                return Err(parse_error(input, "empty user"));
            }
            (Some(user.to_string()), password)
        }
    };

    let (host, port) = split_host_port(input, host_port)?;
    if let Some(user) = &user {
        reject_option_like(input, "user", user)?;
    }
    Ok(Endpoint {
        protocol: "ssh".to_string(),
        user,
        password,
        host,
        port,
        path: path.to_string(),
    })
}

fn split_host_port(input: &str, host_port: &str) -> TransportResult<(String, Option<u16>)> {
    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| parse_error(input, "unterminated IPv6 literal"))?;
        match after {
            "" => (host, None),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(parse_error(input, "unexpected text after IPv6 literal")),
            },
        }
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    if host.is_empty() {
        return Err(parse_error(input, "missing host"));
    }
    reject_option_like(input, "host", host)?;
    let port = match port {
        None | Some("") => None,
        Some(port) => Some(parse_port(port).ok_or_else(|| parse_error(input, "invalid port"))?),
    };
    Ok((host.to_string(), port))
}

/// A host or user that `ssh` would read as a command-line option.
fn reject_option_like(input: &str, what: &str, value: &str) -> TransportResult<()> {
    if value.starts_with('-') {
        return Err(parse_error(input, &format!("{what} must not start with '-'")));
    }
    Ok(())
}

fn parse_port(text: &str) -> Option<u16> {
    text.parse::<u16>().ok().filter(|&port| port != 0)
}

fn parse_scp(input: &str) -> TransportResult<Endpoint> {
    let (user, rest) = match input.split_once('@') {
        Some((user, rest)) if !user.contains([':', '/']) => (Some(user), rest),
        _ => (None, input),
    };
    if user == Some("") {
        return Err(parse_error(input, "empty user"));
    }

    let (host, path) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| parse_error(input, "unterminated IPv6 literal"))?;
        let path = after
            .strip_prefix(':')
            .ok_or_else(|| parse_error(input, "expected [user@]host:path"))?;
        (host, path)
    } else {
        rest.split_once(':')
            .ok_or_else(|| parse_error(input, "expected [user@]host:path"))?
    };
    if host.is_empty() || host.contains('/') {
        return Err(parse_error(input, "missing host"));
    }
    reject_option_like(input, "host", host)?;
    if let Some(user) = user {
        reject_option_like(input, "user", user)?;
    }

    let (port, path) = match path.split_once('/') {
        Some((digits, tail))
            if (1..=5).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            let port = parse_port(digits).ok_or_else(|| parse_error(input, "invalid port"))?;
            (Some(port), tail)
        }
        _ => (None, path),
    };
    if path.is_empty() {
        return Err(parse_error(input, "missing repository path"));
    }

    Ok(Endpoint {
        protocol: "ssh".to_string(),
        user: user.map(str::to_string),
        password: None,
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders the scp-like form when it is lossless, the URL form otherwise.
/// The password is never printed.
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let user = self.user.as_deref().map(|u| format!("{u}@")).unwrap_or_default();
        if self.port.is_none() && !self.path.starts_with('/') {
            return write!(f, "{user}{host}:{}", self.path);
        }
        write!(f, "{}://{user}{host}", self.protocol)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if !self.path.starts_with('/') {
            f.write_str("/")?;
        }
        f.write_str(&self.path)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("protocol", &self.protocol)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .finish()
    }
}
