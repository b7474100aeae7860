use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CSP: &str =
    "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline';";

/// Security pipeline configuration.
///
/// Every field has a default, so a partial YAML file is valid. Defaults
/// follow a secure-by-default profile: filters on, 10 MB request cap,
/// 8 KB header cap, 50 query parameters, private networks allowed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    // Rate limiting is enforced by an external limiter; these are passed through.
    pub enable_rate_limit: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_burst: u32,
    pub rate_limit_per_endpoint: bool,

    pub enable_ip_filter: bool,
    pub allowed_ips: Vec<String>,
    pub blocked_ips: Vec<String>,
    pub allow_private_networks: bool,
    /// Take the client IP from the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,

    pub enable_request_validation: bool,
    pub max_request_size: u64,
    pub max_header_size: usize,
    pub max_query_params: usize,

    pub enable_security_headers: bool,
    pub csp_directives: String,

    pub enable_sql_injection_filter: bool,
    pub enable_xss_filter: bool,
    pub enable_command_injection_filter: bool,

    pub enable_fingerprinting: bool,
    pub enable_honeypot: bool,
    pub enable_threat_intelligence: bool,

    pub log_security_events: bool,
    pub alert_on_threats: bool,

    /// Block an IP once its recorded attack attempts reach this many. 0 disables.
    pub attack_block_threshold: u64,
    /// Forget attack tallies and threat records idle this long. 0 keeps them forever.
    pub tracking_retention_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_rate_limit: true,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            rate_limit_burst: 20,
            rate_limit_per_endpoint: true,
            enable_ip_filter: true,
            allowed_ips: vec![],
            blocked_ips: vec![],
            allow_private_networks: true,
            trust_forwarded_for: false,
            enable_request_validation: true,
            max_request_size: 10 * 1024 * 1024, // 10MB
            max_header_size: 8192,              // 8KB
            max_query_params: 50,
            enable_security_headers: true,
            csp_directives: DEFAULT_CSP.to_string(),
            enable_sql_injection_filter: true,
            enable_xss_filter: true,
            enable_command_injection_filter: true,
            enable_fingerprinting: false,
            enable_honeypot: false,
            enable_threat_intelligence: false,
            log_security_events: true,
            alert_on_threats: true,
            attack_block_threshold: 0,
            tracking_retention_secs: 0,
        }
    }
}

impl SecurityConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn tracking_retention(&self) -> Option<Duration> {
        (self.tracking_retention_secs > 0).then(|| Duration::from_secs(self.tracking_retention_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::default();
        assert!(config.enable_ip_filter);
        assert!(config.allow_private_networks);
        assert_eq!(config.max_request_size, 10485760);
        assert_eq!(config.max_header_size, 8192);
        assert_eq!(config.max_query_params, 50);
        assert!(config.enable_sql_injection_filter);
        assert!(!config.enable_threat_intelligence);
        assert_eq!(config.csp_directives, DEFAULT_CSP);
        assert_eq!(config.tracking_retention(), None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = SecurityConfig::from_yaml(
            "blocked_ips:\n  - 203.0.113.5\nenable_xss_filter: false\nmax_query_params: 10\n",
        )
        .unwrap();

        assert_eq!(config.blocked_ips, vec!["203.0.113.5".to_string()]);
        assert!(!config.enable_xss_filter);
        assert_eq!(config.max_query_params, 10);
        assert!(config.enable_sql_injection_filter);
        assert_eq!(config.max_header_size, 8192);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(SecurityConfig::from_yaml("  \n").unwrap(), SecurityConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            SecurityConfig::from_yaml("max_request_size: [not, a, number]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_sample_file_loads() {
        let config = SecurityConfig::from_file("config/security.yaml").unwrap();
        assert!(config.enable_request_validation);
        assert_eq!(config.max_request_size, 10485760);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SecurityConfig::from_file("nonexistent.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
