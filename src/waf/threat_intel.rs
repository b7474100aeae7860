use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::patterns::{PatternSet, SUSPICIOUS_AGENT_PATTERNS};
use super::Severity;

/// Threat record kept for a known-bad IP, or synthesized for a suspicious agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatInfo {
    pub threat_type: String,
    pub severity: Severity,
    pub description: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub report_count: u32,
}

impl ThreatInfo {
    pub fn new(threat_type: &str, severity: Severity, description: &str) -> Self {
        let now = Utc::now();
        Self {
            threat_type: threat_type.to_string(),
            severity,
            description: description.to_string(),
            first_seen: now,
            last_seen: now,
            report_count: 1,
        }
    }
}

/// Known-bad-IP registry plus suspicious User-Agent signatures.
pub struct ThreatIntelligence {
    known_bad_ips: DashMap<String, ThreatInfo>,
    suspicious_agents: PatternSet,
}

impl ThreatIntelligence {
    pub fn new() -> Self {
        Self {
            known_bad_ips: DashMap::new(),
            suspicious_agents: PatternSet::compile("suspicious agent", SUSPICIOUS_AGENT_PATTERNS),
        }
    }

    /// Look up the client.
    ///
    /// A registry hit refreshes `last_seen` and returns the stored record.
    /// Otherwise a User-Agent signature hit yields a transient medium
    /// severity record that is not stored.
    pub fn check(&self, client_ip: &str, user_agent: Option<&str>) -> Option<ThreatInfo> {
        if let Some(mut threat) = self.known_bad_ips.get_mut(client_ip) {
            threat.last_seen = Utc::now();
            return Some(threat.value().clone());
        }

        let user_agent = user_agent.filter(|ua| !ua.is_empty())?;
        self.suspicious_agents
            .first_match(&[user_agent])
            .map(|_| {
                ThreatInfo::new(
                    "suspicious_user_agent",
                    Severity::Medium,
                    "Request from suspicious user agent",
                )
            })
    }

    /// Insert or replace the record for `ip`.
    pub fn update(&self, ip: &str, threat: ThreatInfo) {
        info!(
            "Threat intelligence updated for {}: {} ({})",
            ip, threat.threat_type, threat.severity
        );
        self.known_bad_ips.insert(ip.to_string(), threat);
    }

    pub fn remove(&self, ip: &str) -> Option<ThreatInfo> {
        let removed = self.known_bad_ips.remove(ip).map(|(_, threat)| threat);
        if removed.is_some() {
            info!("Threat intelligence entry removed for {}", ip);
        }
        removed
    }

    pub fn get(&self, ip: &str) -> Option<ThreatInfo> {
        self.known_bad_ips.get(ip).map(|entry| entry.value().clone())
    }

    pub fn threats(&self) -> Vec<(String, ThreatInfo)> {
        self.known_bad_ips
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn known_bad_ip_count(&self) -> usize {
        self.known_bad_ips.len()
    }

    /// Drop records not seen within `max_age`. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let before = self.known_bad_ips.len();
        self.known_bad_ips.retain(|_, threat| threat.last_seen >= cutoff);
        before.saturating_sub(self.known_bad_ips.len())
    }
}

impl Default for ThreatIntelligence {
    fn default() -> Self {
        Self::new()
    }
}
