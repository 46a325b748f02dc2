use std::{env, fmt, path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::DEFAULT_URL;

/// Resolves the proxy URL from environment and the built-in default.
pub fn default_url() -> String {
    env::var("GYMPROXY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string())
}

/// Replaces `$NAME` references with process environment values.
///
/// Unset variables are logged and substituted with an empty string.
pub fn expand_env_refs(url: &str) -> String {
    expand_with(url, |name| {
        let value = env::var(name).ok();
        if value.is_none() {
            tracing::warn!(var = name, "no environment var ${name} defined");
        }
        value
    })
}

/// Replaces `$NAME` references using `lookup`; unresolved names expand to "".
pub fn expand_with(url: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let name_len = after
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .unwrap_or(after.len());

        if name_len == 0 {
            out.push('$');
        } else {
            out.push_str(&lookup(&after[..name_len]).unwrap_or_default());
        }
        rest = &after[name_len..];
    }

    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid endpoint '{url}': {reason}")]
pub struct EndpointError {
    pub url: String,
    pub reason: &'static str,
}

/// Socket address a proxy server listens on or a client connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp(String),
    /// `ipc:///path/to/socket`, a UNIX domain socket.
    Ipc(PathBuf),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| EndpointError {
            url: url.to_string(),
            reason,
        };

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(invalid("expected scheme://address"));
        };

        match scheme {
            "tcp" => {
                let Some((host, port)) = rest.rsplit_once(':') else {
                    return Err(invalid("tcp endpoint needs host:port"));
                };
                if host.is_empty() {
                    return Err(invalid("tcp endpoint needs a host"));
                }
                if port.parse::<u16>().is_err() {
                    return Err(invalid("tcp port must be a number in 0..=65535"));
                }
                Ok(Endpoint::Tcp(rest.to_string()))
            }
            "ipc" => {
                if rest.is_empty() {
                    return Err(invalid("ipc endpoint needs a socket path"));
                }
                Ok(Endpoint::Ipc(PathBuf::from(rest)))
            }
            _ => Err(invalid("unsupported scheme, expected tcp or ipc")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Endpoint, expand_with};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("10.0.0.7".to_string()),
            "PORT" => Some("7000".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expands_known_references() {
        assert_eq!(
            expand_with("tcp://$HOST:$PORT", lookup),
            "tcp://10.0.0.7:7000"
        );
    }

    #[test]
    fn unknown_reference_expands_to_empty() {
        assert_eq!(expand_with("tcp://$NOPE:1", lookup), "tcp://:1");
    }

    #[test]
    fn bare_dollar_is_kept() {
        assert_eq!(expand_with("ipc:///tmp/a$/b$", lookup), "ipc:///tmp/a$/b$");
    }

    #[test]
    fn parses_tcp_and_ipc() {
        assert_eq!(
            "tcp://127.0.0.1:6911".parse::<Endpoint>(),
            Ok(Endpoint::Tcp("127.0.0.1:6911".to_string()))
        );
        assert_eq!(
            "ipc:///tmp/gym.sock".parse::<Endpoint>(),
            Ok(Endpoint::Ipc(PathBuf::from("/tmp/gym.sock")))
        );
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!("127.0.0.1:6911".parse::<Endpoint>().is_err());
        assert!("tcp://:6911".parse::<Endpoint>().is_err());
        assert!("tcp://localhost:http".parse::<Endpoint>().is_err());
        assert!("udp://localhost:1".parse::<Endpoint>().is_err());
    }
}
