pub mod attack_detector;
pub mod fingerprint;
pub mod ip_filter;
pub mod patterns;
pub mod request_validator;
pub mod threat_intel;

pub use attack_detector::*;
pub use fingerprint::*;
pub use ip_filter::*;
pub use patterns::{NamedPattern, PatternSet};
pub use request_validator::*;
pub use threat_intel::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal threat severity. Only `High` and `Critical` reject a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn is_blocking(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attack categories tracked per source IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    SqlInjection,
    Xss,
    CommandInjection,
    PathTraversal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_gate() {
        assert!(!Severity::Low.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert!(Severity::High.is_blocking());
        assert!(Severity::Critical.is_blocking());
    }

    #[test]
    fn test_severity_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
        let parsed: Severity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(parsed, Severity::Medium);
    }
}
