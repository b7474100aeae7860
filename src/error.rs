use std::fmt;

use serde_json::json;
use thiserror::Error;

use crate::waf::{AttackKind, ThreatInfo};

/// Errors raised while loading configuration or building detector state.
///
/// Entries rejected during pipeline construction are logged and skipped;
/// only file loading and watcher setup hand these back to the caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid IP address or CIDR notation: {0}")]
    InvalidNetwork(String),

    #[error("invalid pattern {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

/// Pattern family a validation match belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternFamily {
    SqlInjection,
    Xss,
    CommandInjection,
}

impl PatternFamily {
    pub fn attack_kind(self) -> AttackKind {
        match self {
            PatternFamily::SqlInjection => AttackKind::SqlInjection,
            PatternFamily::Xss => AttackKind::Xss,
            PatternFamily::CommandInjection => AttackKind::CommandInjection,
        }
    }
}

impl fmt::Display for PatternFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatternFamily::SqlInjection => "SQL injection",
            PatternFamily::Xss => "XSS attack",
            PatternFamily::CommandInjection => "command injection",
        })
    }
}

/// Part of the request a pattern matched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLocation {
    Url,
    Headers,
}

impl fmt::Display for MatchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchLocation::Url => "URL",
            MatchLocation::Headers => "headers",
        })
    }
}

/// Structural or content violation found by the request validator.
///
/// The display form is what the client sees, so it never carries the
/// matched pattern; `pattern` is kept for the security log only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request size exceeds maximum allowed ({limit} bytes)")]
    RequestTooLarge { limit: u64 },

    #[error("header size exceeds maximum allowed ({limit} bytes)")]
    HeadersTooLarge { limit: usize },

    #[error("too many query parameters (max: {limit})")]
    TooManyQueryParams { limit: usize },

    #[error("potential {family} detected in {location}")]
    MaliciousPattern {
        family: PatternFamily,
        location: MatchLocation,
        pattern: &'static str,
    },
}

impl ValidationError {
    /// Attack category to charge against the client, if this was a pattern hit.
    pub fn attack_kind(&self) -> Option<AttackKind> {
        match self {
            ValidationError::MaliciousPattern { family, .. } => Some(family.attack_kind()),
            _ => None,
        }
    }

    pub fn pattern_name(&self) -> Option<&'static str> {
        match self {
            ValidationError::MaliciousPattern { pattern, .. } => Some(pattern),
            _ => None,
        }
    }
}

/// Why the IP filter refused a client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    InvalidIp,
    BlockedIp,
    NotInAllowlist,
    PrivateNetworkBlocked,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::InvalidIp => "invalid_ip",
            BlockReason::BlockedIp => "blocked_ip",
            BlockReason::NotInAllowlist => "not_in_allowlist",
            BlockReason::PrivateNetworkBlocked => "private_network_blocked",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final decision to abort a request.
#[derive(Debug, Clone, Error)]
pub enum Rejection {
    #[error("Access denied")]
    IpBlocked { reason: BlockReason },

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),

    #[error("Potential attack detected")]
    AttackDetected,

    #[error("Access denied due to threat intelligence")]
    ThreatDetected { threat: ThreatInfo },
}

impl Rejection {
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::InvalidRequest(_) => 400,
            Rejection::IpBlocked { .. }
            | Rejection::AttackDetected
            | Rejection::ThreatDetected { .. } => 403,
        }
    }

    /// Response body sent to the client.
    pub fn to_json(&self) -> String {
        json!({
            "success": false,
            "error": self.to_string(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Rejection::IpBlocked {
                reason: BlockReason::BlockedIp
            }
            .status_code(),
            403
        );
        assert_eq!(Rejection::AttackDetected.status_code(), 403);
        let err = ValidationError::TooManyQueryParams { limit: 50 };
        assert_eq!(Rejection::from(err).status_code(), 400);
    }

    #[test]
    fn test_json_body_is_terse() {
        let rejection = Rejection::from(ValidationError::MaliciousPattern {
            family: PatternFamily::SqlInjection,
            location: MatchLocation::Url,
            pattern: "union_select",
        });
        let body: serde_json::Value = serde_json::from_str(&rejection.to_json()).unwrap();

        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Invalid request: potential SQL injection detected in URL"
        );
        assert!(!rejection.to_json().contains("union_select"));
    }

    #[test]
    fn test_size_message_names_limit() {
        let err = ValidationError::RequestTooLarge { limit: 10485760 };
        assert_eq!(
            err.to_string(),
            "request size exceeds maximum allowed (10485760 bytes)"
        );
    }
}
