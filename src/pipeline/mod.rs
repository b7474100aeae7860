//! Per-request security orchestration.
//!
//! Stages run strictly in order and any of them may end the request:
//! IP filter, request validation, attack detection, threat intelligence.
//! An admitted request later picks up the security response headers.

pub mod events;

use arc_swap::ArcSwap;
use log::{info, warn};
use pingora::http::RequestHeader;
use std::sync::Arc;

use crate::config::SecurityConfig;
use crate::error::{ConfigError, Rejection};
use crate::metrics::{MetricsSnapshot, SecurityMetrics};
use crate::waf::{
    header_text, request_fingerprint, AttackCount, AttackDetector, IpFilter, RequestValidator, ThreatInfo,
    ThreatIntelligence,
};
pub use events::SecurityEvent;

const BASE_HEADERS: &[(&str, &str)] = &[
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ("Permissions-Policy", "geolocation=(), microphone=(), camera=()"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

/// Everything derived from one configuration. Replaced whole on reload.
struct Policy {
    config: SecurityConfig,
    validator: RequestValidator,
    headers: Vec<(&'static str, String)>,
}

impl Policy {
    fn new(config: SecurityConfig) -> Self {
        let mut headers = Vec::new();
        if config.enable_security_headers {
            headers.extend(BASE_HEADERS.iter().map(|(k, v)| (*k, v.to_string())));
            if !config.csp_directives.is_empty() {
                headers.push(("Content-Security-Policy", config.csp_directives.clone()));
            }
        }

        Self {
            validator: RequestValidator::new(&config),
            headers,
            config,
        }
    }
}

/// What an admitted request carries forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    /// Sub-blocking threat-intelligence hit, if any.
    pub threat: Option<ThreatInfo>,
    pub fingerprint: Option<String>,
}

pub struct SecurityPipeline {
    policy: ArcSwap<Policy>,
    ip_filter: IpFilter,
    attack_detector: AttackDetector,
    threat_intel: ThreatIntelligence,
    metrics: SecurityMetrics,
}

impl SecurityPipeline {
    pub fn new(config: SecurityConfig) -> Self {
        let ip_filter = IpFilter::from_lists(
            &config.allowed_ips,
            &config.blocked_ips,
            config.allow_private_networks,
        );
        info!(
            "Security pipeline ready: {} allowed networks, {} blocked entries",
            ip_filter.allowlist_count(),
            ip_filter.blocklist_count()
        );

        Self {
            policy: ArcSwap::from_pointee(Policy::new(config)),
            ip_filter,
            attack_detector: AttackDetector::new(),
            threat_intel: ThreatIntelligence::new(),
            metrics: SecurityMetrics::new(),
        }
    }

    /// Run stages 1-4 for one request.
    ///
    /// Each rejection increments exactly one counter: IP filter →
    /// `ip_filter_violations`, validation → `requests_blocked`, attack
    /// signature → `attacks_detected`, blocking threat → `suspicious_requests`.
    pub fn inspect(&self, client_ip: &str, request: &RequestHeader) -> Result<Admission, Rejection> {
        let policy = self.policy.load();
        let config = &policy.config;

        let fingerprint = config
            .enable_fingerprinting
            .then(|| request_fingerprint(client_ip, request));
        let event = SecurityEvent::new(
            client_ip,
            request,
            fingerprint.as_deref(),
            config.log_security_events,
            config.alert_on_threats,
        );

        if config.enable_ip_filter {
            if let Err(reason) = self.ip_filter.check_ip(client_ip) {
                self.metrics.increment_ip_filter_violations();
                event.ip_blocked(reason);
                return Err(Rejection::IpBlocked { reason });
            }
        }

        if config.enable_request_validation {
            if let Err(err) = policy.validator.validate(request) {
                self.metrics.increment_requests_blocked();
                event.validation_failed(&err);
                if let Some(kind) = err.attack_kind() {
                    let count = self.attack_detector.record(client_ip, kind);
                    self.escalate(config, &event, client_ip, &count);
                }
                return Err(Rejection::InvalidRequest(err));
            }
        }

        let detection = self.attack_detector.inspect(client_ip, request);
        if detection.detected() {
            self.metrics.increment_attacks_detected();
            event.attack_detected(&detection);
            if let Some(count) = self.attack_detector.attack_count(client_ip) {
                self.escalate(config, &event, client_ip, &count);
            }
            return Err(Rejection::AttackDetected);
        }

        let mut threat = None;
        if config.enable_threat_intelligence {
            let user_agent = request
                .headers
                .get(http::header::USER_AGENT)
                .map(header_text);
            if let Some(found) = self.threat_intel.check(client_ip, user_agent.as_deref()) {
                self.metrics.increment_suspicious_requests();
                event.threat_detected(&found);
                if found.severity.is_blocking() {
                    return Err(Rejection::ThreatDetected { threat: found });
                }
                threat = Some(found);
            }
        }

        Ok(Admission { threat, fingerprint })
    }

    fn escalate(
        &self,
        config: &SecurityConfig,
        event: &SecurityEvent<'_>,
        client_ip: &str,
        count: &AttackCount,
    ) {
        let threshold = config.attack_block_threshold;
        if threshold == 0 || count.total() < threshold {
            return;
        }
        match self.ip_filter.block_ip(client_ip) {
            Ok(()) => event.auto_blocked(count.total()),
            Err(e) => warn!("Cannot auto-block {}: {}", client_ip, e),
        }
    }

    /// Response headers for admitted requests. Empty when headers are disabled.
    pub fn security_headers(&self) -> Vec<(&'static str, String)> {
        self.policy.load().headers.clone()
    }

    /// Post-handler `request_processed` event.
    pub fn log_request_processed(
        &self,
        client_ip: &str,
        request: &RequestHeader,
        fingerprint: Option<&str>,
        status: u16,
        duration_ms: u64,
    ) {
        let policy = self.policy.load();
        let config = &policy.config;
        SecurityEvent::new(
            client_ip,
            request,
            fingerprint,
            config.log_security_events,
            config.alert_on_threats,
        )
        .request_processed(status, duration_ms);
    }

    pub fn config(&self) -> SecurityConfig {
        self.policy.load().config.clone()
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.policy.load().config.trust_forwarded_for
    }

    /// Swap in a new configuration.
    ///
    /// Validator patterns, headers and toggles are replaced atomically.
    /// The allow-list and private-network policy are re-applied and the
    /// configured block-list is merged in. Administrative blocks, attack
    /// tallies, threat records and metrics are kept.
    pub fn reload(&self, config: SecurityConfig) {
        self.ip_filter.set_allowlist(&config.allowed_ips);
        self.ip_filter.set_allow_private(config.allow_private_networks);
        for entry in &config.blocked_ips {
            if let Err(e) = self.ip_filter.block_ip(entry) {
                warn!("Ignoring blocked IP entry: {}", e);
            }
        }
        self.policy.store(Arc::new(Policy::new(config)));
        info!("Security policy reloaded");
    }

    /// Evict tracking state idle longer than the retention window.
    /// Returns `(attack tallies, threat records)` removed.
    pub fn prune_stale(&self) -> (usize, usize) {
        let Some(max_age) = self.policy.load().config.tracking_retention() else {
            return (0, 0);
        };
        let pruned = (
            self.attack_detector.prune(max_age),
            self.threat_intel.prune(max_age),
        );
        if pruned != (0, 0) {
            info!(
                "Pruned {} attack tallies and {} threat records",
                pruned.0, pruned.1
            );
        }
        pruned
    }

    /// Called by the external rate limiter for each request it rejects.
    pub fn record_rate_limit_violation(&self) {
        self.metrics.increment_rate_limit_violations();
    }

    pub fn block_ip(&self, ip_or_cidr: &str) -> Result<(), ConfigError> {
        self.ip_filter.block_ip(ip_or_cidr)
    }

    pub fn unblock_ip(&self, ip_or_cidr: &str) -> Result<(), ConfigError> {
        self.ip_filter.unblock_ip(ip_or_cidr)
    }

    pub fn blocked_ips(&self) -> Vec<String> {
        self.ip_filter.blocked_entries()
    }

    pub fn update_threat_intelligence(&self, ip: &str, threat: ThreatInfo) {
        self.threat_intel.update(ip, threat);
    }

    pub fn remove_threat(&self, ip: &str) -> Option<ThreatInfo> {
        self.threat_intel.remove(ip)
    }

    pub fn threats(&self) -> Vec<(String, ThreatInfo)> {
        self.threat_intel.threats()
    }

    pub fn attack_count(&self, ip: &str) -> Option<AttackCount> {
        self.attack_detector.attack_count(ip)
    }

    pub fn attack_counts(&self) -> Vec<(String, AttackCount)> {
        self.attack_detector.attack_counts()
    }

    pub fn metrics(&self) -> &SecurityMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Default for SecurityPipeline {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}
