//! Structured security events.
//!
//! Every event goes to the `security` log target with the same base keys
//! (`event_type`, `ip`, `method`, `path`, `user_agent`, `fingerprint`) plus
//! event-specific ones. Alerts go to `security::alert` at error level.

use log::{error, info};
use pingora::http::RequestHeader;

use crate::error::{BlockReason, ValidationError};
use crate::waf::{Detection, ThreatInfo};

pub const TARGET: &str = "security";
pub const ALERT_TARGET: &str = "security::alert";

/// Request identity shared by every event emitted for one request.
#[derive(Debug, Clone, Copy)]
pub struct SecurityEvent<'a> {
    ip: &'a str,
    method: &'a str,
    path: &'a str,
    user_agent: &'a str,
    fingerprint: &'a str,
    log_events: bool,
    alerts: bool,
}

impl<'a> SecurityEvent<'a> {
    pub fn new(
        ip: &'a str,
        request: &'a RequestHeader,
        fingerprint: Option<&'a str>,
        log_events: bool,
        alerts: bool,
    ) -> Self {
        Self {
            ip,
            method: request.method.as_str(),
            path: request.uri.path(),
            user_agent: request
                .headers
                .get(http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
            fingerprint: fingerprint.unwrap_or_default(),
            log_events,
            alerts,
        }
    }

    pub fn ip_blocked(&self, reason: BlockReason) {
        if !self.log_events {
            return;
        }
        info!(
            target: TARGET,
            event_type = "ip_blocked", ip = self.ip, method = self.method, path = self.path,
            user_agent = self.user_agent, fingerprint = self.fingerprint, reason = reason.as_str();
            "Security event"
        );
    }

    pub fn validation_failed(&self, err: &ValidationError) {
        if !self.log_events {
            return;
        }
        let message = err.to_string();
        info!(
            target: TARGET,
            event_type = "request_validation_failed", ip = self.ip, method = self.method,
            path = self.path, user_agent = self.user_agent, fingerprint = self.fingerprint,
            error = message.as_str(), pattern = err.pattern_name().unwrap_or_default();
            "Security event"
        );
    }

    pub fn attack_detected(&self, detection: &Detection) {
        if !self.log_events {
            return;
        }
        info!(
            target: TARGET,
            event_type = "attack_detected", ip = self.ip, method = self.method, path = self.path,
            user_agent = self.user_agent, fingerprint = self.fingerprint,
            pattern = detection.primary_signature().unwrap_or_default();
            "Security event"
        );
    }

    pub fn threat_detected(&self, threat: &ThreatInfo) {
        if self.log_events {
            info!(
                target: TARGET,
                event_type = "threat_detected", ip = self.ip, method = self.method,
                path = self.path, user_agent = self.user_agent, fingerprint = self.fingerprint,
                threat_type = threat.threat_type.as_str(), severity = threat.severity.as_str();
                "Security event"
            );
        }
        if self.alerts && threat.severity.is_blocking() {
            error!(
                target: ALERT_TARGET,
                ip = self.ip, threat_type = threat.threat_type.as_str(),
                severity = threat.severity.as_str();
                "Blocking request from {}: {}", self.ip, threat.description
            );
        }
    }

    pub fn auto_blocked(&self, attempts: u64) {
        if self.log_events {
            info!(
                target: TARGET,
                event_type = "ip_auto_blocked", ip = self.ip, method = self.method,
                path = self.path, user_agent = self.user_agent, fingerprint = self.fingerprint,
                attempts = attempts;
                "Security event"
            );
        }
        if self.alerts {
            error!(
                target: ALERT_TARGET,
                ip = self.ip, attempts = attempts;
                "Blocked {} after {} attack attempts", self.ip, attempts
            );
        }
    }

    pub fn request_processed(&self, status: u16, duration_ms: u64) {
        if !self.log_events {
            return;
        }
        info!(
            target: TARGET,
            event_type = "request_processed", ip = self.ip, method = self.method, path = self.path,
            user_agent = self.user_agent, fingerprint = self.fingerprint,
            status = status, duration_ms = duration_ms;
            "Security event"
        );
    }
}
