use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use pingora::http::RequestHeader;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::patterns::{
    NamedPattern, PatternSet, PATH_TRAVERSAL_PATTERN, SCANNER_AGENT_PATTERNS,
    SENSITIVE_FILE_PATTERNS,
};
use super::request_validator::{decode_for_scan, header_text};
use super::AttackKind;

/// Per-IP tally of attack attempts. Counters only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackCount {
    pub sql_injection: u64,
    pub xss: u64,
    pub command_injection: u64,
    pub path_traversal: u64,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl AttackCount {
    pub fn total(&self) -> u64 {
        self.sql_injection + self.xss + self.command_injection + self.path_traversal
    }

    fn bump(&mut self, kind: AttackKind, at: DateTime<Utc>) {
        let counter = match kind {
            AttackKind::SqlInjection => &mut self.sql_injection,
            AttackKind::Xss => &mut self.xss,
            AttackKind::CommandInjection => &mut self.command_injection,
            AttackKind::PathTraversal => &mut self.path_traversal,
        };
        *counter += 1;
        self.last_attempt = Some(at);
    }
}

/// What a single `detect` call found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub path_traversal: bool,
    pub scanner_agent: Option<&'static str>,
    pub sensitive_files: Vec<&'static str>,
}

impl Detection {
    pub fn detected(&self) -> bool {
        self.path_traversal || self.scanner_agent.is_some() || !self.sensitive_files.is_empty()
    }

    /// Name of the first signature that fired, for the security log.
    pub fn primary_signature(&self) -> Option<&'static str> {
        if self.path_traversal {
            return Some(PATH_TRAVERSAL_PATTERN.0);
        }
        self.scanner_agent
            .or_else(|| self.sensitive_files.first().copied())
    }
}

/// Heuristic signature matching with a per-source-IP attack tally.
pub struct AttackDetector {
    path_traversal: Option<NamedPattern>,
    scanner_agents: PatternSet,
    sensitive_files: PatternSet,
    attack_counts: DashMap<String, AttackCount>,
}

impl AttackDetector {
    pub fn new() -> Self {
        let (name, pattern) = PATH_TRAVERSAL_PATTERN;
        let path_traversal = match NamedPattern::compile(name, pattern) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                warn!("Skipping attack signature: {}", e);
                None
            }
        };

        Self {
            path_traversal,
            scanner_agents: PatternSet::compile("scanner agent", SCANNER_AGENT_PATTERNS),
            sensitive_files: PatternSet::compile("sensitive file", SENSITIVE_FILE_PATTERNS),
            attack_counts: DashMap::new(),
        }
    }

    /// Run every signature against the request.
    ///
    /// A path-traversal hit increments that IP's `path_traversal` counter
    /// once per call, no matter how many forms of the URL matched.
    pub fn inspect(&self, client_ip: &str, request: &RequestHeader) -> Detection {
        let url = request.uri.to_string();
        let decoded = decode_for_scan(&url);
        let url_inputs = [url.as_str(), decoded.as_ref()];
        let user_agent = request
            .headers
            .get(http::header::USER_AGENT)
            .map(header_text)
            .unwrap_or_default();

        let mut detection = Detection::default();

        if let Some(pattern) = &self.path_traversal {
            if url_inputs.iter().any(|input| pattern.regex.is_match(input)) {
                detection.path_traversal = true;
                self.record(client_ip, AttackKind::PathTraversal);
                warn!("Path traversal attempt from {}: {}", client_ip, url);
            }
        }

        if !user_agent.is_empty() {
            if let Some(name) = self.scanner_agents.first_match(&[user_agent.as_ref()]) {
                detection.scanner_agent = Some(name);
                warn!("Scanner signature {} from {}: {}", name, client_ip, user_agent);
            }
        }

        for pattern in self.sensitive_files.iter() {
            if url_inputs.iter().any(|input| pattern.regex.is_match(input)) {
                detection.sensitive_files.push(pattern.name);
                warn!(
                    "Sensitive file access attempt ({}) from {}: {}",
                    pattern.name, client_ip, url
                );
            }
        }

        detection
    }

    pub fn detect(&self, client_ip: &str, request: &RequestHeader) -> bool {
        self.inspect(client_ip, request).detected()
    }

    /// Charge one attempt of `kind` against `client_ip` and return the new tally.
    pub fn record(&self, client_ip: &str, kind: AttackKind) -> AttackCount {
        let mut entry = self.attack_counts.entry(client_ip.to_string()).or_default();
        entry.bump(kind, Utc::now());
        entry.value().clone()
    }

    pub fn attack_count(&self, client_ip: &str) -> Option<AttackCount> {
        self.attack_counts.get(client_ip).map(|entry| entry.value().clone())
    }

    pub fn attack_counts(&self) -> Vec<(String, AttackCount)> {
        self.attack_counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn tracked_ips(&self) -> usize {
        self.attack_counts.len()
    }

    /// Drop tallies whose last attempt is older than `max_age`. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let before = self.attack_counts.len();
        self.attack_counts
            .retain(|_, count| count.last_attempt.map_or(false, |at| at >= cutoff));
        before.saturating_sub(self.attack_counts.len())
    }
}

impl Default for AttackDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_uri(uri: &str) -> RequestHeader {
        RequestHeader::build("GET", uri.as_bytes(), None).unwrap()
    }

    fn request_with_ua(ua: &str) -> RequestHeader {
        let mut req = RequestHeader::build("GET", b"/api/devices", None).unwrap();
        req.insert_header("User-Agent", ua).unwrap();
        req
    }

    #[test]
    fn test_path_traversal_counts_once_per_call() {
        let detector = AttackDetector::new();
        let req = request_with_uri("/files?path=../../../etc/passwd");

        let detection = detector.inspect("198.51.100.9", &req);
        assert!(detection.path_traversal);
        assert!(detection.detected());
        assert_eq!(detector.attack_count("198.51.100.9").unwrap().path_traversal, 1);

        assert!(detector.detect("198.51.100.9", &req));
        let count = detector.attack_count("198.51.100.9").unwrap();
        assert_eq!(count.path_traversal, 2);
        assert!(count.last_attempt.is_some());
    }

    #[test]
    fn test_encoded_traversal() {
        let detector = AttackDetector::new();
        assert!(detector.detect("1.1.1.1", &request_with_uri("/api/%2e%2e%2f%2e%2e%2fsecret")));
        assert!(detector.detect("1.1.1.1", &request_with_uri("/api/..%5C..%5Cwindows")));
    }

    #[test]
    fn test_scanner_user_agents() {
        let detector = AttackDetector::new();

        let detection = detector.inspect("1.1.1.1", &request_with_ua("Nikto/2.1.6"));
        assert_eq!(detection.scanner_agent, Some("vulnerability_scan"));

        let detection = detector.inspect("1.1.1.1", &request_with_ua("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert_eq!(detection.scanner_agent, Some("automated_tools"));

        // scanner hits are a logged signal only
        assert!(detector.attack_count("1.1.1.1").is_none());
    }

    #[test]
    fn test_scanner_agent_with_non_ascii_byte() {
        let detector = AttackDetector::new();
        let mut req = RequestHeader::build("GET", b"/api/devices", None).unwrap();
        let ua = http::HeaderValue::from_bytes(b"Nikto/2.1.6 \xe9").unwrap();
        req.insert_header("User-Agent", ua).unwrap();

        assert_eq!(
            detector.inspect("1.1.1.1", &req).scanner_agent,
            Some("vulnerability_scan")
        );
    }

    #[test]
    fn test_sensitive_file_probes() {
        let detector = AttackDetector::new();

        for (uri, name) in [
            ("/download/site.bak", "backup_files"),
            ("/app/.env", "config_files"),
            ("/var/app/error.log", "log_files"),
            ("/static/.htpasswd", "password_files"),
        ] {
            let detection = detector.inspect("2.2.2.2", &request_with_uri(uri));
            assert!(detection.sensitive_files.contains(&name), "{} -> {:?}", uri, detection);
        }
    }

    #[test]
    fn test_normal_request_not_flagged() {
        let detector = AttackDetector::new();
        let req = request_with_ua("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36");
        assert!(!detector.detect("3.3.3.3", &req));
        assert!(!detector.detect("3.3.3.3", &request_with_uri("/api/users/123/profile")));
        assert_eq!(detector.tracked_ips(), 0);
    }

    #[test]
    fn test_record_is_monotonic() {
        let detector = AttackDetector::new();
        detector.record("4.4.4.4", AttackKind::SqlInjection);
        detector.record("4.4.4.4", AttackKind::Xss);
        let count = detector.record("4.4.4.4", AttackKind::SqlInjection);

        assert_eq!(count.sql_injection, 2);
        assert_eq!(count.xss, 1);
        assert_eq!(count.command_injection, 0);
        assert_eq!(count.total(), 3);
    }

    #[test]
    fn test_prune_keeps_recent_entries() {
        let detector = AttackDetector::new();
        detector.record("5.5.5.5", AttackKind::PathTraversal);

        assert_eq!(detector.prune(Duration::from_secs(3600)), 0);
        assert_eq!(detector.tracked_ips(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(detector.prune(Duration::from_millis(1)), 1);
        assert_eq!(detector.tracked_ips(), 0);
    }
}
