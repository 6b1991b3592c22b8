//! Cluster-health string grammar (§3, §4.2, §6).
//!
//! A normalized, order-independent, case-normalized string encoding
//! `{endpoint -> UP|DOWN}` as observed by a client at the moment of an RPC.
//! Two clients with the same health view must produce byte-identical
//! strings (P6), which is what makes the string safe to use as a
//! compare-and-swap key on the server side (§4.2, §5).

use crate::endpoint::EndpointAddr;

/// Build the cluster-health string for a set of `(endpoint, healthy)` pairs.
///
/// Endpoints are sorted lexicographically by `host:port` before joining, so
/// the result does not depend on the order the caller observed them in.
#[must_use]
pub fn cluster_health_string(endpoints: &[(EndpointAddr, bool)]) -> String {
    let mut sorted: Vec<&(EndpointAddr, bool)> = endpoints.iter().collect();
    sorted.sort_by_key(|(endpoint, _)| endpoint.host_port());

    sorted
        .iter()
        .map(|(endpoint, healthy)| {
            format!(
                "{}({})",
                endpoint.host_port(),
                if *healthy { "UP" } else { "DOWN" }
            )
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a cluster-health string back into `(endpoint, healthy)` pairs.
///
/// Used by the server side (C2) only for diagnostics; the server otherwise
/// treats the string as an opaque comparison key (§4.2).
pub fn parse_cluster_health(s: &str) -> Result<Vec<(EndpointAddr, bool)>, ClusterHealthParseError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }

    s.split(';')
        .map(|entry| {
            let open = entry
                .find('(')
                .ok_or_else(|| ClusterHealthParseError::Malformed(entry.to_string()))?;
            if !entry.ends_with(')') {
                return Err(ClusterHealthParseError::Malformed(entry.to_string()));
            }
            let host_port = &entry[..open];
            let state = &entry[open + 1..entry.len() - 1];
            let (host, port) = host_port
                .rsplit_once(':')
                .ok_or_else(|| ClusterHealthParseError::Malformed(entry.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| ClusterHealthParseError::Malformed(entry.to_string()))?;
            let healthy = match state {
                "UP" => true,
                "DOWN" => false,
                other => return Err(ClusterHealthParseError::UnknownState(other.to_string())),
            };
            Ok((EndpointAddr::new(host, port), healthy))
        })
        .collect()
}

/// Errors parsing a cluster-health string.
#[derive(Debug, thiserror::Error)]
pub enum ClusterHealthParseError {
    /// An entry did not match the `host:port(UP|DOWN)` grammar.
    #[error("malformed cluster-health entry: {0}")]
    Malformed(String),
    /// An entry's state was neither `UP` nor `DOWN`.
    #[error("unknown cluster-health state: {0}")]
    UnknownState(String),
}
