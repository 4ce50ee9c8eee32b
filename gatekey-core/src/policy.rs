//! Gating policy: who has to pass MFA at all.
//!
//! Evaluated by the host before the first render. A user exempted here takes
//! the no-auth-required fast path through the orchestrator.

use std::net::Ipv4Addr;

use tracing::debug;

/// How the configured group list is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupMode {
    /// Members of a listed group skip MFA.
    #[default]
    Exclude,
    /// Only members of a listed group need MFA.
    Include,
}

/// A client-address exclusion: a single address or an inclusive range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRule {
    Single(Ipv4Addr),
    Range(Ipv4Addr, Ipv4Addr),
}

impl IpRule {
    fn matches(&self, ip: Ipv4Addr) -> bool {
        match self {
            Self::Single(addr) => *addr == ip,
            Self::Range(start, end) => {
                let (ip, start, end) = (u32::from(ip), u32::from(*start), u32::from(*end));
                ip >= start && ip <= end
            }
        }
    }
}

/// Facts about the requesting user the host resolves for the policy.
#[derive(Debug, Clone, Default)]
pub struct GateContext<'a> {
    pub client_ip: Option<Ipv4Addr>,
    pub user_groups: &'a [String],
}

/// MFA gating policy from the plugin configuration.
#[derive(Debug, Clone, Default)]
pub struct MfaGatePolicy {
    pub enabled: bool,
    pub excluded_ips: Vec<IpRule>,
    pub groups: Vec<String>,
    pub group_mode: GroupMode,
}

impl MfaGatePolicy {
    /// Parse a comma-separated exclusion list of addresses and
    /// `start-end` ranges. Unparsable entries are dropped with a log.
    pub fn parse_ip_rules(value: &str) -> Vec<IpRule> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|entry| match entry.split_once('-') {
                Some((start, end)) => {
                    match (start.trim().parse(), end.trim().parse()) {
                        (Ok(start), Ok(end)) => Some(IpRule::Range(start, end)),
                        _ => {
                            debug!(entry = %entry, "Ignoring unparsable IP range");
                            None
                        }
                    }
                }
                None => match entry.parse() {
                    Ok(addr) => Some(IpRule::Single(addr)),
                    Err(_) => {
                        debug!(entry = %entry, "Ignoring unparsable IP address");
                        None
                    }
                },
            })
            .collect()
    }

    /// Whether the requesting user must pass MFA.
    pub fn requires_mfa(&self, ctx: &GateContext) -> bool {
        if !self.enabled {
            debug!("MFA is not enabled");
            return false;
        }

        if let Some(ip) = ctx.client_ip {
            if self.excluded_ips.iter().any(|rule| rule.matches(ip)) {
                debug!(client_ip = %ip, "Client address is excluded from MFA");
                return false;
            }
        }

        if !self.groups.is_empty() {
            let member = self
                .groups
                .iter()
                .any(|group| ctx.user_groups.contains(group));
            match self.group_mode {
                GroupMode::Exclude if member => {
                    debug!("User is in an excluded group, no MFA required");
                    return false;
                }
                GroupMode::Include if !member => {
                    debug!("User is in no included group, no MFA required");
                    return false;
                }
                _ => {}
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: GroupMode, groups: &[&str]) -> MfaGatePolicy {
        MfaGatePolicy {
            enabled: true,
            excluded_ips: Vec::new(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            group_mode: mode,
        }
    }

    #[test]
    fn test_disabled_policy_never_requires_mfa() {
        let policy = MfaGatePolicy::default();
        assert!(!policy.requires_mfa(&GateContext::default()));
    }

    #[test]
    fn test_enabled_policy_requires_mfa_by_default() {
        let policy = policy(GroupMode::Exclude, &[]);
        assert!(policy.requires_mfa(&GateContext::default()));
    }

    #[test]
    fn test_excluded_single_ip() {
        let mut policy = policy(GroupMode::Exclude, &[]);
        policy.excluded_ips = MfaGatePolicy::parse_ip_rules("192.0.2.10");
        let excluded = GateContext {
            client_ip: Some(Ipv4Addr::new(192, 0, 2, 10)),
            user_groups: &[],
        };
        let other = GateContext {
            client_ip: Some(Ipv4Addr::new(192, 0, 2, 11)),
            user_groups: &[],
        };
        assert!(!policy.requires_mfa(&excluded));
        assert!(policy.requires_mfa(&other));
    }

    #[test]
    fn test_excluded_ip_range() {
        let mut policy = policy(GroupMode::Exclude, &[]);
        policy.excluded_ips = MfaGatePolicy::parse_ip_rules("10.0.0.1-10.0.0.20, 192.0.2.1");
        assert_eq!(policy.excluded_ips.len(), 2);
        let in_range = GateContext {
            client_ip: Some(Ipv4Addr::new(10, 0, 0, 15)),
            user_groups: &[],
        };
        let out_of_range = GateContext {
            client_ip: Some(Ipv4Addr::new(10, 0, 1, 15)),
            user_groups: &[],
        };
        assert!(!policy.requires_mfa(&in_range));
        assert!(policy.requires_mfa(&out_of_range));
    }

    #[test]
    fn test_unparsable_ip_rules_are_dropped() {
        let rules = MfaGatePolicy::parse_ip_rules("not-an-ip, 10.0.0.1, 10.0.0.2-banana");
        assert_eq!(rules, vec![IpRule::Single(Ipv4Addr::new(10, 0, 0, 1))]);
    }

    #[test]
    fn test_exclude_group_membership() {
        let policy = policy(GroupMode::Exclude, &["admins"]);
        let member_groups = vec!["admins".to_string()];
        let other_groups = vec!["users".to_string()];
        assert!(!policy.requires_mfa(&GateContext {
            client_ip: None,
            user_groups: &member_groups,
        }));
        assert!(policy.requires_mfa(&GateContext {
            client_ip: None,
            user_groups: &other_groups,
        }));
    }

    #[test]
    fn test_include_group_membership() {
        let policy = policy(GroupMode::Include, &["staff"]);
        let member_groups = vec!["staff".to_string()];
        let other_groups = vec!["guests".to_string()];
        assert!(policy.requires_mfa(&GateContext {
            client_ip: None,
            user_groups: &member_groups,
        }));
        assert!(!policy.requires_mfa(&GateContext {
            client_ip: None,
            user_groups: &other_groups,
        }));
    }
}
