//! Server endpoint addressing.

use std::fmt;

/// Address of one proxy server endpoint (host, port).
///
/// This is the unit C1 (the endpoint registry) tracks health for, and the
/// unit the cluster-health string (§3, §4.2) is built from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EndpointAddr {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl EndpointAddr {
    /// Build an endpoint address from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Render as `host:port`, the form used inside the cluster-health string
    /// and as the sort key for both.
    #[must_use]
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse the bracketed, comma-separated endpoint list out of an OJP
/// connection URL: `jdbc:ojp[host1:port1,host2:port2,...]_<backend-url>`.
///
/// Returns the parsed endpoints and the backend URL suffix (the part after
/// the bracket, with the leading `_` stripped). A single-alternation regex
/// extracts the bracket contents, per §6.
pub fn parse_connection_url(url: &str) -> Result<(Vec<EndpointAddr>, String), UrlParseError> {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static URL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^jdbc:ojp\[([^\]]+)\]_(.+)$").expect("static regex is valid"));

    let captures = URL_RE
        .captures(url)
        .ok_or_else(|| UrlParseError::Malformed(url.to_string()))?;

    let bracket = &captures[1];
    let backend_url = captures[2].to_string();

    let mut endpoints = Vec::new();
    for part in bracket.split(',') {
        let part = part.trim();
        let (host, port) = part
            .rsplit_once(':')
            .ok_or_else(|| UrlParseError::Malformed(url.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| UrlParseError::InvalidPort(port.to_string()))?;
        endpoints.push(EndpointAddr::new(host, port));
    }

    if endpoints.is_empty() {
        return Err(UrlParseError::Malformed(url.to_string()));
    }

    Ok((endpoints, backend_url))
}

/// Errors from [`parse_connection_url`].
#[derive(Debug, thiserror::Error)]
pub enum UrlParseError {
    /// The URL did not match the `jdbc:ojp[...]_...` grammar.
    #[error("malformed OJP connection URL: {0}")]
    Malformed(String),
    /// A bracketed entry had a non-numeric port.
    #[error("invalid port in connection URL: {0}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_endpoint() {
        let (endpoints, backend) =
            parse_connection_url("jdbc:ojp[localhost:10591]_jdbc:postgresql://db/app").unwrap();
        assert_eq!(endpoints, vec![EndpointAddr::new("localhost", 10591)]);
        assert_eq!(backend, "jdbc:postgresql://db/app");
    }

    #[test]
    fn parses_multiple_endpoints() {
        let (endpoints, _) =
            parse_connection_url("jdbc:ojp[a:1,b:2,c:3]_jdbc:oracle:thin:@db").unwrap();
        assert_eq!(
            endpoints,
            vec![
                EndpointAddr::new("a", 1),
                EndpointAddr::new("b", 2),
                EndpointAddr::new("c", 3),
            ]
        );
    }

    #[test]
    fn rejects_missing_brackets() {
        assert!(parse_connection_url("jdbc:postgresql://db/app").is_err());
    }

    #[test]
    fn rejects_bad_port() {
        assert!(parse_connection_url("jdbc:ojp[localhost:abc]_jdbc:x").is_err());
    }
}
