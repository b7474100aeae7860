use ipnetwork::IpNetwork;
use log::{info, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{BlockReason, ConfigError};

static PRIVATE_NETWORKS: Lazy<Vec<IpNetwork>> = Lazy::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "::1/128",
        "fc00::/7",
    ]
    .iter()
    .map(|cidr| IpNetwork::from_str(cidr).unwrap())
    .collect()
});

/// Parse an IP address or CIDR notation string into an IpNetwork
///
/// Supports:
/// - "192.168.1.1" -> 192.168.1.1/32
/// - "192.168.1.0/24" -> 192.168.1.0/24
/// - "::1" -> ::1/128
/// - "2001:db8::/32" -> 2001:db8::/32
pub fn parse_ip_or_cidr(input: &str) -> Result<IpNetwork, ConfigError> {
    let input = input.trim();
    if input.contains('/') {
        return IpNetwork::from_str(input)
            .map_err(|_| ConfigError::InvalidNetwork(input.to_string()));
    }

    IpAddr::from_str(input)
        .map(|ip| IpNetwork::from(ip.to_canonical()))
        .map_err(|_| ConfigError::InvalidNetwork(input.to_string()))
}

fn is_private(ip: IpAddr) -> bool {
    PRIVATE_NETWORKS.iter().any(|network| network.contains(ip))
}

#[derive(Debug, Default)]
struct FilterState {
    allowed: Vec<IpNetwork>,
    blocked_hosts: HashSet<IpAddr>,
    blocked_networks: Vec<IpNetwork>,
    allow_private: bool,
}

impl FilterState {
    fn is_explicitly_blocked(&self, ip: IpAddr) -> bool {
        self.blocked_hosts.contains(&ip)
            || self.blocked_networks.iter().any(|network| network.contains(ip))
    }
}

/// IP filter with allow-list, block-list and private-network policy.
///
/// Decision order: unparsable address, explicit block, allow-list miss,
/// private network. An explicit block always wins over allow-list
/// membership. Bare addresses in either list are host networks (/32 or
/// /128).
#[derive(Debug)]
pub struct IpFilter {
    state: RwLock<FilterState>,
}

impl IpFilter {
    pub fn new(allow_private: bool) -> Self {
        Self {
            state: RwLock::new(FilterState {
                allow_private,
                ..FilterState::default()
            }),
        }
    }

    /// Build a filter from configured lists. Malformed entries are logged and skipped.
    pub fn from_lists(allowed: &[String], blocked: &[String], allow_private: bool) -> Self {
        let filter = Self::new(allow_private);
        filter.set_allowlist(allowed);
        for entry in blocked {
            if let Err(e) = filter.insert_blocked(entry) {
                warn!("Ignoring blocked IP entry: {}", e);
            }
        }
        filter
    }

    /// Replace the allow-list. Malformed entries are logged and skipped.
    pub fn set_allowlist(&self, entries: &[String]) {
        let allowed: Vec<IpNetwork> = entries
            .iter()
            .filter_map(|entry| match parse_ip_or_cidr(entry) {
                Ok(network) => Some(network),
                Err(e) => {
                    warn!("Ignoring allowed IP entry: {}", e);
                    None
                }
            })
            .collect();
        self.state.write().allowed = allowed;
    }

    pub fn set_allow_private(&self, allow_private: bool) {
        self.state.write().allow_private = allow_private;
    }

    /// Check if an IP address passes the filter
    pub fn check_ip(&self, ip_str: &str) -> Result<(), BlockReason> {
        // IPv4-mapped IPv6 peers (dual-stack listeners) are checked as IPv4
        let ip = IpAddr::from_str(ip_str.trim())
            .map_err(|_| BlockReason::InvalidIp)?
            .to_canonical();
        let state = self.state.read();

        if state.is_explicitly_blocked(ip) {
            return Err(BlockReason::BlockedIp);
        }

        if !state.allowed.is_empty() && !state.allowed.iter().any(|network| network.contains(ip)) {
            return Err(BlockReason::NotInAllowlist);
        }

        if !state.allow_private && is_private(ip) {
            return Err(BlockReason::PrivateNetworkBlocked);
        }

        Ok(())
    }

    fn insert_blocked(&self, ip_or_cidr: &str) -> Result<bool, ConfigError> {
        let network = parse_ip_or_cidr(ip_or_cidr)?;
        let mut state = self.state.write();
        let inserted = if network.prefix() == max_prefix(&network) {
            state.blocked_hosts.insert(network.ip())
        } else if state.blocked_networks.contains(&network) {
            false
        } else {
            state.blocked_networks.push(network);
            true
        };
        Ok(inserted)
    }

    /// Add an IP or CIDR range to the block-list. Idempotent.
    pub fn block_ip(&self, ip_or_cidr: &str) -> Result<(), ConfigError> {
        if self.insert_blocked(ip_or_cidr)? {
            info!("IP {} has been blocked", ip_or_cidr);
        }
        Ok(())
    }

    /// Remove an IP or CIDR range from the block-list. Idempotent.
    pub fn unblock_ip(&self, ip_or_cidr: &str) -> Result<(), ConfigError> {
        let network = parse_ip_or_cidr(ip_or_cidr)?;
        let mut state = self.state.write();
        let removed = if network.prefix() == max_prefix(&network) {
            state.blocked_hosts.remove(&network.ip())
        } else {
            let before = state.blocked_networks.len();
            state.blocked_networks.retain(|n| *n != network);
            state.blocked_networks.len() != before
        };
        drop(state);

        if removed {
            info!("IP {} has been unblocked", ip_or_cidr);
        }
        Ok(())
    }

    /// Current block-list entries, hosts first.
    pub fn blocked_entries(&self) -> Vec<String> {
        let state = self.state.read();
        let mut hosts: Vec<String> = state.blocked_hosts.iter().map(|ip| ip.to_string()).collect();
        hosts.sort();
        hosts.extend(state.blocked_networks.iter().map(|n| n.to_string()));
        hosts
    }

    pub fn allowlist_count(&self) -> usize {
        self.state.read().allowed.len()
    }

    pub fn blocklist_count(&self) -> usize {
        let state = self.state.read();
        state.blocked_hosts.len() + state.blocked_networks.len()
    }
}

fn max_prefix(network: &IpNetwork) -> u8 {
    match network {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_ip_allowlist() {
        let filter = IpFilter::from_lists(&strings(&["192.168.1.1"]), &[], true);

        assert!(filter.check_ip("192.168.1.1").is_ok());
        assert_eq!(filter.check_ip("192.168.1.2"), Err(BlockReason::NotInAllowlist));
    }

    #[test]
    fn test_cidr_allowlist() {
        let filter = IpFilter::from_lists(&strings(&["192.168.1.0/24"]), &[], true);

        assert!(filter.check_ip("192.168.1.1").is_ok());
        assert!(filter.check_ip("192.168.1.255").is_ok());
        assert_eq!(filter.check_ip("192.168.2.1"), Err(BlockReason::NotInAllowlist));
        assert_eq!(filter.check_ip("10.0.0.1"), Err(BlockReason::NotInAllowlist));
    }

    #[test]
    fn test_cidr_blocklist_boundaries() {
        let filter = IpFilter::from_lists(&[], &strings(&["10.0.0.0/8"]), true);

        assert_eq!(filter.check_ip("10.0.0.0"), Err(BlockReason::BlockedIp));
        assert_eq!(filter.check_ip("10.255.255.255"), Err(BlockReason::BlockedIp));
        assert!(filter.check_ip("11.0.0.0").is_ok());
    }

    #[test]
    fn test_block_wins_over_allowlist() {
        let filter = IpFilter::from_lists(
            &strings(&["192.168.0.0/16"]),
            &strings(&["192.168.1.100"]),
            true,
        );

        assert_eq!(filter.check_ip("192.168.1.100"), Err(BlockReason::BlockedIp));
        assert!(filter.check_ip("192.168.1.1").is_ok());
        assert_eq!(filter.check_ip("8.8.8.8"), Err(BlockReason::NotInAllowlist));
    }

    #[test]
    fn test_invalid_ip() {
        let filter = IpFilter::new(true);
        assert_eq!(filter.check_ip("not-an-ip"), Err(BlockReason::InvalidIp));
        assert_eq!(filter.check_ip("1.2.3.4:8080"), Err(BlockReason::InvalidIp));
    }

    #[test]
    fn test_private_networks() {
        let filter = IpFilter::new(false);

        for ip in ["10.1.2.3", "172.16.0.1", "172.31.255.255", "192.168.0.1", "127.0.0.1", "::1", "fd00::1"] {
            assert_eq!(
                filter.check_ip(ip),
                Err(BlockReason::PrivateNetworkBlocked),
                "{} should be private",
                ip
            );
        }
        assert!(filter.check_ip("172.32.0.1").is_ok());
        assert!(filter.check_ip("2001:db8::1").is_ok());

        filter.set_allow_private(true);
        assert!(filter.check_ip("10.1.2.3").is_ok());
    }

    #[test]
    fn test_allowlist_miss_reported_before_private_policy() {
        let filter = IpFilter::from_lists(&strings(&["203.0.113.0/24"]), &[], false);
        assert_eq!(filter.check_ip("10.0.0.1"), Err(BlockReason::NotInAllowlist));
    }

    #[test]
    fn test_block_then_unblock_restores_result() {
        let filter = IpFilter::from_lists(&strings(&["198.51.100.0/24"]), &[], true);
        let before = filter.check_ip("198.51.100.7");

        filter.block_ip("198.51.100.7").unwrap();
        filter.block_ip("198.51.100.7").unwrap();
        assert_eq!(filter.check_ip("198.51.100.7"), Err(BlockReason::BlockedIp));
        assert_eq!(filter.blocklist_count(), 1);

        filter.unblock_ip("198.51.100.7").unwrap();
        filter.unblock_ip("198.51.100.7").unwrap();
        assert_eq!(filter.check_ip("198.51.100.7"), before);
    }

    #[test]
    fn test_ipv4_mapped_addresses_checked_as_ipv4() {
        let filter = IpFilter::from_lists(&[], &strings(&["203.0.113.5", "198.51.100.0/24"]), false);

        assert_eq!(filter.check_ip("::ffff:203.0.113.5"), Err(BlockReason::BlockedIp));
        assert_eq!(filter.check_ip("::ffff:198.51.100.9"), Err(BlockReason::BlockedIp));
        assert_eq!(
            filter.check_ip("::ffff:10.0.0.1"),
            Err(BlockReason::PrivateNetworkBlocked)
        );
        assert!(filter.check_ip("::ffff:8.8.8.8").is_ok());

        filter.block_ip("::ffff:192.0.2.44").unwrap();
        assert_eq!(filter.check_ip("192.0.2.44"), Err(BlockReason::BlockedIp));
        assert_eq!(filter.blocked_entries()[0], "192.0.2.44");
    }

    #[test]
    fn test_ipv6_cidr() {
        let filter = IpFilter::from_lists(&strings(&["2001:db8::/32"]), &[], true);

        assert!(filter.check_ip("2001:db8::1").is_ok());
        assert_eq!(filter.check_ip("2001:db9::1"), Err(BlockReason::NotInAllowlist));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let filter = IpFilter::from_lists(
            &strings(&["invalid", "192.168.1.0/33", "192.168.1.0/24"]),
            &strings(&["nope"]),
            true,
        );
        assert_eq!(filter.allowlist_count(), 1);
        assert_eq!(filter.blocklist_count(), 0);
        assert!(filter.block_ip("garbage").is_err());
    }

    #[test]
    fn test_blocked_entries_listing() {
        let filter = IpFilter::new(true);
        filter.block_ip("203.0.113.5").unwrap();
        filter.block_ip("10.0.0.0/8").unwrap();
        assert_eq!(
            filter.blocked_entries(),
            vec!["203.0.113.5".to_string(), "10.0.0.0/8".to_string()]
        );
    }
}
