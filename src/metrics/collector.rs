use log::warn;
use parking_lot::RwLock;
use prometheus::{IntCounter, Registry};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of the security counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_blocked: u64,
    pub attacks_detected: u64,
    pub suspicious_requests: u64,
    pub rate_limit_violations: u64,
    pub ip_filter_violations: u64,
}

/// Monotonic security-event counters.
///
/// Increments share `gate`; `snapshot` takes it exclusively so the five
/// values it returns were all true at the same instant.
pub struct SecurityMetrics {
    registry: Registry,
    gate: RwLock<()>,
    requests_blocked: IntCounter,
    attacks_detected: IntCounter,
    suspicious_requests: IntCounter,
    rate_limit_violations: IntCounter,
    ip_filter_violations: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation failed");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!("Failed to register metric {}: {}", name, e);
    }
    counter
}

impl SecurityMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        Self {
            requests_blocked: counter(
                &registry,
                "security_requests_blocked_total",
                "Requests rejected by request validation",
            ),
            attacks_detected: counter(
                &registry,
                "security_attacks_detected_total",
                "Requests rejected by attack signatures",
            ),
            suspicious_requests: counter(
                &registry,
                "security_suspicious_requests_total",
                "Requests matched by threat intelligence",
            ),
            rate_limit_violations: counter(
                &registry,
                "security_rate_limit_violations_total",
                "Rate limit violations reported by the limiter",
            ),
            ip_filter_violations: counter(
                &registry,
                "security_ip_filter_violations_total",
                "Requests rejected by the IP filter",
            ),
            gate: RwLock::new(()),
            registry,
        }
    }

    /// Also expose the counters through the process-wide default registry,
    /// which pingora's prometheus service scrapes.
    pub fn register_global(&self) -> Result<(), prometheus::Error> {
        for c in [
            &self.requests_blocked,
            &self.attacks_detected,
            &self.suspicious_requests,
            &self.rate_limit_violations,
            &self.ip_filter_violations,
        ] {
            prometheus::register(Box::new(c.clone()))?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn increment_requests_blocked(&self) {
        let _gate = self.gate.read();
        self.requests_blocked.inc();
    }

    pub fn increment_attacks_detected(&self) {
        let _gate = self.gate.read();
        self.attacks_detected.inc();
    }

    pub fn increment_suspicious_requests(&self) {
        let _gate = self.gate.read();
        self.suspicious_requests.inc();
    }

    pub fn increment_rate_limit_violations(&self) {
        let _gate = self.gate.read();
        self.rate_limit_violations.inc();
    }

    pub fn increment_ip_filter_violations(&self) {
        let _gate = self.gate.read();
        self.ip_filter_violations.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let _gate = self.gate.write();
        MetricsSnapshot {
            requests_blocked: self.requests_blocked.get(),
            attacks_detected: self.attacks_detected.get(),
            suspicious_requests: self.suspicious_requests.get(),
            rate_limit_violations: self.rate_limit_violations.get(),
            ip_filter_violations: self.ip_filter_violations.get(),
        }
    }
}

impl Default for SecurityMetrics {
    fn default() -> Self {
        Self::new()
    }
}
