//! Client configuration (§6 "Configuration (recognized options)").
//!
//! Every option is looked up through [`resolve_str`] and friends, which
//! apply the precedence order fixed by §6: process-level system properties
//! (simulated here via an explicit override map, since Rust has no analogue
//! of JVM `-D` flags) take precedence over environment variables, which take
//! precedence over a TOML config file, which takes precedence over the
//! compiled default baked into [`ClientConfig::default`].

use std::collections::BTreeMap;
use std::time::Duration;

use ojp_protocol::endpoint::{parse_connection_url, UrlParseError};
use ojp_protocol::EndpointAddr;

use crate::health_checker::HealthCheckConfig;
use crate::redistributor::RedistributionConfig;

/// Explicit key-value overrides, standing in for process-level system
/// properties (§6 top of the precedence order).
pub type Overrides = BTreeMap<String, String>;

/// Everything `ojp-client` needs to build its C1/C8/C9/C10 components for
/// one connection URL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClientConfig {
    /// Server endpoints parsed from the URL's bracketed list.
    pub endpoints: Vec<EndpointAddr>,
    /// Backend JDBC-equivalent URL, with the OJP endpoint frame stripped.
    pub backend_url: String,
    /// `multinode.retryAttempts`: bound on the `xaStart` retry loop (§4.8).
    pub max_xa_start_retries: u32,
    /// `multinode.retryDelayMs`: delay between `xaStart` retries.
    pub retry_delay: Duration,
    /// `loadaware.selection.enabled`: whether C8 picks the least-loaded
    /// endpoint for XA binding rather than plain round-robin.
    pub loadaware_selection_enabled: bool,
    /// `health.check.*` (§4.9).
    pub health_check: HealthCheckConfig,
    /// `redistribution.*` (§4.10).
    pub redistribution: RedistributionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            backend_url: String::new(),
            max_xa_start_retries: 3,
            retry_delay: Duration::from_millis(0),
            loadaware_selection_enabled: true,
            health_check: HealthCheckConfig::default(),
            redistribution: RedistributionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build a config from an OJP connection URL plus a layered resolver
    /// (§6). `overrides` and `file` may both be absent; compiled defaults
    /// apply to anything neither one nor the environment sets.
    pub fn from_url(
        url: &str,
        overrides: &Overrides,
        file: Option<&toml::Value>,
    ) -> Result<Self, UrlParseError> {
        let (endpoints, backend_url) = parse_connection_url(url)?;
        let mut config = Self {
            endpoints,
            backend_url,
            ..Self::default()
        };

        if let Some(v) = resolve_u32("multinode.retryAttempts", overrides, file) {
            config.max_xa_start_retries = v;
        }
        if let Some(v) = resolve_u64("multinode.retryDelayMs", overrides, file) {
            config.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = resolve_bool("loadaware.selection.enabled", overrides, file) {
            config.loadaware_selection_enabled = v;
        }
        if let Some(v) = resolve_u64("health.check.interval", overrides, file) {
            config.health_check.check_interval = Duration::from_millis(v);
        }
        if let Some(v) = resolve_u64("health.check.threshold", overrides, file) {
            config.health_check.threshold = Duration::from_millis(v);
        }
        if let Some(v) = resolve_u64("health.check.timeout", overrides, file) {
            config.health_check.probe_timeout = Duration::from_millis(v);
        }
        if let Some(v) = resolve_bool("redistribution.enabled", overrides, file) {
            config.redistribution.enabled = v;
        }
        if let Some(v) = resolve_u32("redistribution.maxClosePerRecovery", overrides, file) {
            config.redistribution.max_close_per_recovery = v;
        }

        Ok(config)
    }
}

/// Look up `key` in the precedence order fixed by §6: `overrides`, then the
/// `OJP_`-prefixed, underscore-joined environment variable, then `file`
/// (dotted segments navigated as nested tables), then `None`.
#[must_use]
pub fn resolve_str(key: &str, overrides: &Overrides, file: Option<&toml::Value>) -> Option<String> {
    if let Some(v) = overrides.get(key) {
        return Some(v.clone());
    }

    let env_key = format!(
        "OJP_{}",
        key.to_uppercase().replace(['.', '-'], "_")
    );
    if let Ok(v) = std::env::var(&env_key) {
        return Some(v);
    }

    let file = file?;
    let mut current = file;
    for segment in key.split('.') {
        current = current.get(segment)?;
    }
    current.as_str().map(str::to_string).or_else(|| {
        // numeric/bool TOML values stringify through Display instead of as_str.
        Some(current.to_string())
    })
}

/// [`resolve_str`], parsed as `u32`.
#[must_use]
pub fn resolve_u32(key: &str, overrides: &Overrides, file: Option<&toml::Value>) -> Option<u32> {
    resolve_str(key, overrides, file)?.parse().ok()
}

/// [`resolve_str`], parsed as `u64`.
#[must_use]
pub fn resolve_u64(key: &str, overrides: &Overrides, file: Option<&toml::Value>) -> Option<u64> {
    resolve_str(key, overrides, file)?.parse().ok()
}

/// [`resolve_str`], parsed as `bool` (`true`/`false`, case-insensitive).
#[must_use]
pub fn resolve_bool(key: &str, overrides: &Overrides, file: Option<&toml::Value>) -> Option<bool> {
    let raw = resolve_str(key, overrides, file)?;
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoints_and_backend_url() {
        let config = ClientConfig::from_url(
            "jdbc:ojp[localhost:10591,localhost:10592]_jdbc:postgresql://db/app",
            &Overrides::new(),
            None,
        )
        .unwrap();

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.backend_url, "jdbc:postgresql://db/app");
        assert_eq!(config.max_xa_start_retries, 3);
    }

    #[test]
    fn override_wins_over_file() {
        let mut overrides = Overrides::new();
        overrides.insert("multinode.retryAttempts".to_string(), "7".to_string());

        let file: toml::Value = toml::from_str("[multinode]\nretryAttempts = 2\n").unwrap();

        assert_eq!(
            resolve_u32("multinode.retryAttempts", &overrides, Some(&file)),
            Some(7)
        );
    }

    #[test]
    fn file_is_consulted_when_no_override_or_env() {
        let file: toml::Value = toml::from_str("[redistribution]\nenabled = false\n").unwrap();
        assert_eq!(
            resolve_bool("redistribution.enabled", &Overrides::new(), Some(&file)),
            Some(false)
        );
    }

    #[test]
    fn missing_key_falls_through_to_none() {
        assert_eq!(
            resolve_u32("health.check.interval", &Overrides::new(), None),
            None
        );
    }
}
