//! Plugin configuration.
//!
//! The host exposes a flat namespaced key-value store; [`ConfigSource`] is
//! the narrow contract over it and [`PluginConfig::load`] materializes every
//! known key with its default. [`MfaServerConfig`] is the subset the HTTP
//! client is built from.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;
use zeroize::Zeroizing;

use crate::error::{GatekeyError, Result};
use crate::policy::{GroupMode, MfaGatePolicy};

/// Configuration keys in the host's store.
pub mod keys {
    pub const ENABLED: &str = "enabled";
    pub const SERVER_URL: &str = "server_url";
    pub const REALM: &str = "realm";
    pub const SSL_VERIFY: &str = "ssl_verify";
    pub const NO_PROXY: &str = "no_proxy";
    pub const SERVICE_ACCOUNT_NAME: &str = "service_account_name";
    pub const SERVICE_ACCOUNT_PASS: &str = "service_account_pass";
    pub const SERVICE_ACCOUNT_REALM: &str = "service_account_realm";
    pub const FORWARD_CLIENT_IP: &str = "forward_client_ip";
    pub const AUTH_FLOW: &str = "auth_flow";
    pub const STATIC_PASS: &str = "static_pass";
    pub const DEFAULT_MESSAGE: &str = "default_message";
    pub const FORWARD_HEADERS: &str = "forward_headers";
    pub const POLL_IN_BROWSER: &str = "poll_in_browser";
    pub const POLL_IN_BROWSER_URL: &str = "poll_in_browser_url";
    pub const ACTIVATE_AUTO_SUBMIT: &str = "activate_auto_submit_otp_length";
    pub const AUTO_SUBMIT_OTP_LENGTH: &str = "auto_submit_otp_length";
    pub const EXCLUDED_IPS: &str = "excluded_ips";
    pub const GATE_GROUPS: &str = "gate_groups";
    pub const GATE_GROUP_MODE: &str = "gate_group_mode";
}

/// Flat key-value lookup provided by the host framework.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn get_flag(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        }
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Which first-render flow drives the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFlow {
    /// Prompt for an OTP; challenges are triggered by the first check.
    #[default]
    Default,
    /// Trigger all challenges up front using the service account.
    TriggerChallenge,
    /// Send a configured static pass first; may already complete the
    /// authentication or trigger the challenges.
    SendStaticPass,
    /// Password and OTP are collected in separate input fields.
    SeparateOtp,
}

impl AuthFlow {
    fn from_config(value: &str) -> Self {
        match value {
            "trigger_challenge" => Self::TriggerChallenge,
            "send_static_pass" => Self::SendStaticPass,
            "separate_otp" => Self::SeparateOtp,
            "default" | "" => Self::Default,
            other => {
                tracing::error!(flow = %other, "Unknown authentication flow, falling back to default");
                Self::Default
            }
        }
    }
}

/// Connection settings for the remote MFA server.
#[derive(Clone)]
pub struct MfaServerConfig {
    pub base_url: Url,
    pub realm: String,
    pub ssl_verify: bool,
    pub no_proxy: bool,
    pub service_account_name: String,
    pub service_account_pass: Zeroizing<String>,
    pub service_account_realm: String,
    /// Forwarded as the `client` parameter so server policies can match the
    /// original client address.
    pub forward_client_ip: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl MfaServerConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatekeyError::InvalidConfig(format!("invalid server URL: {e}")))?;
        Ok(Self {
            base_url,
            realm: String::new(),
            ssl_verify: true,
            no_proxy: false,
            service_account_name: String::new(),
            service_account_pass: Zeroizing::new(String::new()),
            service_account_realm: String::new(),
            forward_client_ip: None,
            timeout: Duration::from_secs(5),
            user_agent: concat!("gatekey/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// Whether a service account is configured. Required for the
    /// trigger-challenge flow.
    pub fn service_account_available(&self) -> bool {
        !self.service_account_name.is_empty() && !self.service_account_pass.is_empty()
    }
}

impl std::fmt::Debug for MfaServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaServerConfig")
            .field("base_url", &self.base_url.as_str())
            .field("realm", &self.realm)
            .field("ssl_verify", &self.ssl_verify)
            .field("no_proxy", &self.no_proxy)
            .field("service_account_name", &self.service_account_name)
            .field("service_account_pass", &"[REDACTED]")
            .field("service_account_realm", &self.service_account_realm)
            .field("forward_client_ip", &self.forward_client_ip)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Everything the orchestrator needs, materialized from the host store.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub server: MfaServerConfig,
    pub auth_flow: AuthFlow,
    pub static_pass: String,
    pub default_message: String,
    /// Header names the host should forward to the MFA server.
    pub forward_headers: Vec<String>,
    pub poll_in_browser: bool,
    pub poll_in_browser_url: String,
    pub auto_submit_otp_length: Option<usize>,
    pub gate: MfaGatePolicy,
}

impl PluginConfig {
    /// Load the configuration from the host store.
    ///
    /// Fails only when the server URL is missing or unparsable; every other
    /// key falls back to its default.
    pub fn load(source: &dyn ConfigSource, client_ip: Option<&str>) -> Result<Self> {
        let server_url = source.get(keys::SERVER_URL).unwrap_or_default();
        if server_url.is_empty() {
            return Err(GatekeyError::InvalidConfig(
                "server URL missing in configuration".to_string(),
            ));
        }
        let mut server = MfaServerConfig::new(&server_url)?;
        server.realm = source.get_or(keys::REALM, "");
        server.ssl_verify = source.get_flag(keys::SSL_VERIFY, true);
        server.no_proxy = source.get_flag(keys::NO_PROXY, false);
        server.service_account_name = source.get_or(keys::SERVICE_ACCOUNT_NAME, "");
        server.service_account_pass =
            Zeroizing::new(source.get_or(keys::SERVICE_ACCOUNT_PASS, ""));
        server.service_account_realm = source.get_or(keys::SERVICE_ACCOUNT_REALM, "");
        if source.get_flag(keys::FORWARD_CLIENT_IP, false) {
            server.forward_client_ip = client_ip.map(str::to_string);
        }

        let auto_submit_otp_length = if source.get_flag(keys::ACTIVATE_AUTO_SUBMIT, false) {
            source
                .get_or(keys::AUTO_SUBMIT_OTP_LENGTH, "6")
                .parse()
                .ok()
        } else {
            None
        };

        let gate = MfaGatePolicy {
            enabled: source.get_flag(keys::ENABLED, false),
            excluded_ips: MfaGatePolicy::parse_ip_rules(&source.get_or(keys::EXCLUDED_IPS, "")),
            groups: split_list(&source.get_or(keys::GATE_GROUPS, "")),
            group_mode: match source.get_or(keys::GATE_GROUP_MODE, "exclude").as_str() {
                "include" => GroupMode::Include,
                _ => GroupMode::Exclude,
            },
        };

        Ok(Self {
            server,
            auth_flow: AuthFlow::from_config(&source.get_or(keys::AUTH_FLOW, "default")),
            static_pass: source.get_or(keys::STATIC_PASS, ""),
            default_message: source.get_or(keys::DEFAULT_MESSAGE, "Please enter the OTP!"),
            forward_headers: split_list(&source.get_or(keys::FORWARD_HEADERS, "")),
            poll_in_browser: source.get_flag(keys::POLL_IN_BROWSER, false),
            poll_in_browser_url: source.get_or(keys::POLL_IN_BROWSER_URL, ""),
            auto_submit_otp_length,
            gate,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_requires_server_url() {
        let result = PluginConfig::load(&store(&[]), None);
        assert!(matches!(result, Err(GatekeyError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_defaults() {
        let config =
            PluginConfig::load(&store(&[(keys::SERVER_URL, "https://mfa.example.com")]), None)
                .unwrap();
        assert_eq!(config.auth_flow, AuthFlow::Default);
        assert_eq!(config.default_message, "Please enter the OTP!");
        assert!(config.server.ssl_verify);
        assert!(!config.server.service_account_available());
        assert!(config.auto_submit_otp_length.is_none());
        assert_eq!(config.server.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_trigger_challenge_flow() {
        let config = PluginConfig::load(
            &store(&[
                (keys::SERVER_URL, "https://mfa.example.com"),
                (keys::AUTH_FLOW, "trigger_challenge"),
                (keys::SERVICE_ACCOUNT_NAME, "svc"),
                (keys::SERVICE_ACCOUNT_PASS, "secret"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.auth_flow, AuthFlow::TriggerChallenge);
        assert!(config.server.service_account_available());
    }

    #[test]
    fn test_unknown_flow_falls_back_to_default() {
        let config = PluginConfig::load(
            &store(&[
                (keys::SERVER_URL, "https://mfa.example.com"),
                (keys::AUTH_FLOW, "piAuthFlowSomethingElse"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.auth_flow, AuthFlow::Default);
    }

    #[test]
    fn test_forward_client_ip_requires_flag() {
        let with_flag = PluginConfig::load(
            &store(&[
                (keys::SERVER_URL, "https://mfa.example.com"),
                (keys::FORWARD_CLIENT_IP, "1"),
            ]),
            Some("203.0.113.7"),
        )
        .unwrap();
        assert_eq!(
            with_flag.server.forward_client_ip.as_deref(),
            Some("203.0.113.7")
        );

        let without_flag = PluginConfig::load(
            &store(&[(keys::SERVER_URL, "https://mfa.example.com")]),
            Some("203.0.113.7"),
        )
        .unwrap();
        assert!(without_flag.server.forward_client_ip.is_none());
    }

    #[test]
    fn test_auto_submit_length() {
        let config = PluginConfig::load(
            &store(&[
                (keys::SERVER_URL, "https://mfa.example.com"),
                (keys::ACTIVATE_AUTO_SUBMIT, "1"),
                (keys::AUTO_SUBMIT_OTP_LENGTH, "8"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.auto_submit_otp_length, Some(8));
    }

    #[test]
    fn test_forward_headers_are_trimmed() {
        let config = PluginConfig::load(
            &store(&[
                (keys::SERVER_URL, "https://mfa.example.com"),
                (keys::FORWARD_HEADERS, "X-Forwarded-For, Accept-Language"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(
            config.forward_headers,
            vec!["X-Forwarded-For".to_string(), "Accept-Language".to_string()]
        );
    }

    #[test]
    fn test_debug_redacts_service_pass() {
        let mut server = MfaServerConfig::new("https://mfa.example.com").unwrap();
        server.service_account_pass = Zeroizing::new("hunter2".to_string());
        let debug = format!("{server:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
