//! HTTP client for the remote MFA server.
//!
//! A thin, stateless façade over the server's validate/auth endpoints. One
//! instance is built per configuration and is safe to share across
//! concurrent login attempts. The wire contract is the server's own
//! form-encoded API and is not redesigned here.
//!
//! Error contract: [`GatekeyError::UnreachableServer`] only when the
//! transport cannot complete the exchange; every other failure (missing
//! parameters, empty or malformed bodies) degrades to "no result" with a
//! log, so the orchestrator's generic re-prompt path handles it uniformly.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::config::MfaServerConfig;
use crate::error::{GatekeyError, Result};
use crate::response::AuthResult;

pub const ENDPOINT_VALIDATE_CHECK: &str = "/validate/check";
pub const ENDPOINT_VALIDATE_TRIGGERCHALLENGE: &str = "/validate/triggerchallenge";
pub const ENDPOINT_VALIDATE_POLLTRANSACTION: &str = "/validate/polltransaction";
pub const ENDPOINT_VALIDATE_INITIALIZE: &str = "/validate/initialize";
pub const ENDPOINT_AUTH: &str = "/auth";

/// Headers forwarded with a request, resolved by the host.
pub type ForwardHeaders = [(String, String)];

/// The remote server's capabilities, one operation per endpoint use.
///
/// The orchestrator is written against this trait so tests can substitute a
/// scripted server.
#[async_trait]
pub trait MfaApi: Send + Sync {
    /// Primary OTP/challenge-response check. `pass` may be the OTP, a PIN
    /// to trigger a token, or PIN+OTP, depending on server policy.
    async fn check(
        &self,
        username: &str,
        pass: &str,
        transaction_id: Option<&str>,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Trigger all pending challenges for the user without consuming an
    /// OTP. Requires a service account.
    async fn trigger_challenge(
        &self,
        username: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Cheap status probe for a push challenge.
    async fn poll_transaction(
        &self,
        transaction_id: &str,
        headers: &ForwardHeaders,
    ) -> Result<bool>;

    /// Answer a WebAuthn challenge with the browser's assertion.
    async fn check_webauthn(
        &self,
        username: &str,
        transaction_id: &str,
        sign_response: &str,
        origin: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Authenticate with a passkey. No username is supplied; the server
    /// resolves the identity from the credential.
    async fn check_passkey(
        &self,
        transaction_id: &str,
        sign_response: &str,
        origin: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Second half of an enrollment-during-login passkey registration.
    async fn complete_passkey_registration(
        &self,
        transaction_id: &str,
        serial: &str,
        username: &str,
        registration_response: &str,
        origin: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Abandon an in-progress enrollment without failing the login.
    async fn cancel_enrollment(
        &self,
        transaction_id: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Request a fresh passkey challenge without a prior username.
    async fn initialize_passkey_login(
        &self,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>>;

    /// Service-account login. Returns an empty string unless the account
    /// resolves to an admin-role token.
    async fn get_auth_token(&self) -> Result<String>;
}

/// Reqwest-backed [`MfaApi`] implementation.
pub struct MfaClient {
    client: Client,
    config: MfaServerConfig,
}

impl MfaClient {
    pub fn new(config: MfaServerConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());
        if !config.ssl_verify {
            warn!("TLS verification is disabled for the MFA server connection");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if config.no_proxy {
            debug!("Ignoring system proxy settings");
            builder = builder.no_proxy();
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &MfaServerConfig {
        &self.config
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        format!("{base}{endpoint}")
    }

    /// Parameters every validate request starts from.
    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ip) = &self.config.forward_client_ip {
            params.push(("client", ip.clone()));
        }
        params
    }

    fn push_realm(&self, params: &mut Vec<(&'static str, String)>) {
        if !self.config.realm.is_empty() {
            params.push(("realm", self.config.realm.clone()));
        }
    }

    async fn post_form(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
        headers: &ForwardHeaders,
    ) -> Result<String> {
        debug!(endpoint, params = ?param_names(&params), "Sending request");
        let mut request = self.client.post(self.endpoint_url(endpoint)).form(&params);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        Ok(response.text().await?)
    }

    async fn get_query(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
        headers: &ForwardHeaders,
    ) -> Result<String> {
        debug!(endpoint, params = ?param_names(&params), "Sending request");
        let mut request = self.client.get(self.endpoint_url(endpoint)).query(&params);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        Ok(response.text().await?)
    }

    /// Parse a validate response, degrading parse failures to "no result".
    fn parse_response(&self, raw: &str, endpoint: &str) -> Option<AuthResult> {
        match AuthResult::parse(raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(endpoint, error = %e, "Server did not respond with a usable body");
                None
            }
        }
    }
}

#[async_trait]
impl MfaApi for MfaClient {
    #[instrument(level = "debug", skip_all, fields(username = %username))]
    async fn check(
        &self,
        username: &str,
        pass: &str,
        transaction_id: Option<&str>,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        if username.is_empty() {
            debug!("Missing username for /validate/check");
            return Ok(None);
        }
        let mut params = self.base_params();
        params.push(("user", username.to_string()));
        params.push(("pass", pass.to_string()));
        if let Some(tid) = transaction_id.filter(|t| !t.is_empty()) {
            params.push(("transaction_id", tid.to_string()));
        }
        self.push_realm(&mut params);
        let body = self.post_form(ENDPOINT_VALIDATE_CHECK, params, headers).await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_CHECK))
    }

    #[instrument(level = "debug", skip_all, fields(username = %username))]
    async fn trigger_challenge(
        &self,
        username: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        if username.is_empty() {
            debug!("Missing username for /validate/triggerchallenge");
            return Ok(None);
        }
        let token = self.get_auth_token().await?;
        if token.is_empty() {
            return Ok(None);
        }
        let mut params = self.base_params();
        params.push(("user", username.to_string()));
        self.push_realm(&mut params);

        let mut all_headers: Vec<(String, String)> = headers.to_vec();
        all_headers.push(("Authorization".to_string(), token));
        let body = self
            .post_form(ENDPOINT_VALIDATE_TRIGGERCHALLENGE, params, &all_headers)
            .await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_TRIGGERCHALLENGE))
    }

    #[instrument(level = "debug", skip_all, fields(transaction_id = %transaction_id))]
    async fn poll_transaction(
        &self,
        transaction_id: &str,
        headers: &ForwardHeaders,
    ) -> Result<bool> {
        if transaction_id.is_empty() {
            debug!("Missing transaction id for /validate/polltransaction");
            return Ok(false);
        }
        let mut params = self.base_params();
        params.push(("transaction_id", transaction_id.to_string()));
        let body = self
            .get_query(ENDPOINT_VALIDATE_POLLTRANSACTION, params, headers)
            .await?;
        let confirmed = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/result/value").and_then(Value::as_bool))
            .unwrap_or(false);
        Ok(confirmed)
    }

    #[instrument(level = "debug", skip_all, fields(username = %username, transaction_id = %transaction_id))]
    async fn check_webauthn(
        &self,
        username: &str,
        transaction_id: &str,
        sign_response: &str,
        origin: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        if username.is_empty()
            || transaction_id.is_empty()
            || sign_response.is_empty()
            || origin.is_empty()
        {
            debug!("Incomplete parameters for WebAuthn check");
            return Ok(None);
        }
        let Ok(payload) = serde_json::from_str::<Value>(sign_response) else {
            debug!("WebAuthn sign response is not valid JSON");
            return Ok(None);
        };

        let mut params = self.base_params();
        params.push(("user", username.to_string()));
        params.push(("pass", String::new()));
        params.push(("transaction_id", transaction_id.to_string()));
        self.push_realm(&mut params);
        for (param, required) in [
            ("credentialid", true),
            ("clientdata", true),
            ("signaturedata", true),
            ("authenticatordata", true),
            ("userhandle", false),
            ("assertionclientextensions", false),
        ] {
            match payload.get(param).and_then(Value::as_str) {
                Some(value) if !value.is_empty() => params.push((param, value.to_string())),
                _ if required => {
                    debug!(param, "WebAuthn sign response is missing a required field");
                    return Ok(None);
                }
                _ => {}
            }
        }

        let all_headers = with_origin(headers, origin);
        let body = self
            .post_form(ENDPOINT_VALIDATE_CHECK, params, &all_headers)
            .await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_CHECK))
    }

    #[instrument(level = "debug", skip_all, fields(transaction_id = %transaction_id))]
    async fn check_passkey(
        &self,
        transaction_id: &str,
        sign_response: &str,
        origin: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        if transaction_id.is_empty() || sign_response.is_empty() || origin.is_empty() {
            debug!("Incomplete parameters for passkey check");
            return Ok(None);
        }
        let Ok(payload) = serde_json::from_str::<Value>(sign_response) else {
            debug!("Passkey sign response is not valid JSON");
            return Ok(None);
        };

        let mut params = self.base_params();
        params.push(("transaction_id", transaction_id.to_string()));
        self.push_realm(&mut params);
        for (param, required) in [
            ("credential_id", true),
            ("clientDataJSON", true),
            ("signature", true),
            ("authenticatorData", true),
            ("userHandle", false),
        ] {
            match payload.get(param).and_then(Value::as_str) {
                Some(value) if !value.is_empty() => params.push((param, value.to_string())),
                _ if required => {
                    debug!(param, "Passkey sign response is missing a required field");
                    return Ok(None);
                }
                _ => {}
            }
        }

        let all_headers = with_origin(headers, origin);
        let body = self
            .post_form(ENDPOINT_VALIDATE_CHECK, params, &all_headers)
            .await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_CHECK))
    }

    #[instrument(level = "debug", skip_all, fields(transaction_id = %transaction_id, serial = %serial, username = %username))]
    async fn complete_passkey_registration(
        &self,
        transaction_id: &str,
        serial: &str,
        username: &str,
        registration_response: &str,
        origin: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        if transaction_id.is_empty()
            || serial.is_empty()
            || username.is_empty()
            || registration_response.is_empty()
            || origin.is_empty()
        {
            debug!("Incomplete parameters for passkey registration completion");
            return Ok(None);
        }
        let Ok(payload) = serde_json::from_str::<Value>(registration_response) else {
            debug!("Passkey registration response is not valid JSON");
            return Ok(None);
        };

        let mut params = self.base_params();
        params.push(("transaction_id", transaction_id.to_string()));
        params.push(("serial", serial.to_string()));
        params.push(("user", username.to_string()));
        params.push(("type", "passkey".to_string()));
        self.push_realm(&mut params);
        for (param, required) in [
            ("credential_id", true),
            ("clientDataJSON", true),
            ("attestationObject", true),
            ("authenticatorAttachment", false),
            ("rawId", true),
        ] {
            match payload.get(param).and_then(Value::as_str) {
                Some(value) if !value.is_empty() => params.push((param, value.to_string())),
                _ if required => {
                    debug!(param, "Passkey registration response is missing a required field");
                    return Ok(None);
                }
                _ => {}
            }
        }

        let all_headers = with_origin(headers, origin);
        let body = self
            .post_form(ENDPOINT_VALIDATE_CHECK, params, &all_headers)
            .await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_CHECK))
    }

    #[instrument(level = "debug", skip_all, fields(transaction_id = %transaction_id))]
    async fn cancel_enrollment(
        &self,
        transaction_id: &str,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        if transaction_id.is_empty() {
            debug!("Missing transaction id for enrollment cancellation");
            return Ok(None);
        }
        let mut params = self.base_params();
        params.push(("transaction_id", transaction_id.to_string()));
        params.push(("cancel_enrollment", "true".to_string()));
        self.push_realm(&mut params);
        let body = self.post_form(ENDPOINT_VALIDATE_CHECK, params, headers).await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_CHECK))
    }

    #[instrument(level = "debug", skip_all)]
    async fn initialize_passkey_login(
        &self,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        let mut params = self.base_params();
        params.push(("type", "passkey".to_string()));
        self.push_realm(&mut params);
        let body = self
            .post_form(ENDPOINT_VALIDATE_INITIALIZE, params, headers)
            .await?;
        Ok(self.parse_response(&body, ENDPOINT_VALIDATE_INITIALIZE))
    }

    #[instrument(level = "debug", skip_all)]
    async fn get_auth_token(&self) -> Result<String> {
        if !self.config.service_account_available() {
            error!("Cannot retrieve an auth token without a service account");
            return Ok(String::new());
        }
        let mut params = vec![
            ("username", self.config.service_account_name.clone()),
            ("password", self.config.service_account_pass.to_string()),
        ];
        if !self.config.service_account_realm.is_empty() {
            params.push(("realm", self.config.service_account_realm.clone()));
        }
        let body = self.post_form(ENDPOINT_AUTH, params, &[]).await?;
        Ok(extract_admin_token(&body))
    }
}

/// Forward the ceremony origin as a request header, never a body parameter.
fn with_origin(headers: &ForwardHeaders, origin: &str) -> Vec<(String, String)> {
    let mut out = headers.to_vec();
    out.push(("Origin".to_string(), origin.to_string()));
    out
}

fn param_names(params: &[(&'static str, String)]) -> Vec<&'static str> {
    params.iter().map(|(name, _)| *name).collect()
}

/// Pull the auth token out of an `/auth` response.
///
/// Fails closed: a token is returned only when the role claim at
/// `result.value.role` is exactly `admin`. A token for a non-privileged
/// account must never be used to trigger challenges.
fn extract_admin_token(raw: &str) -> String {
    let Ok(body) = serde_json::from_str::<Value>(raw) else {
        warn!("Auth response is not valid JSON");
        return String::new();
    };
    let Some(token) = body
        .pointer("/result/value/token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    else {
        debug!("Auth response did not contain a token");
        return String::new();
    };
    match body.pointer("/result/value/role").and_then(Value::as_str) {
        Some("admin") => token.to_string(),
        role => {
            debug!(role = ?role, "Auth token does not belong to an admin account");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> MfaClient {
        let config = MfaServerConfig::new("https://mfa.example.com").unwrap();
        MfaClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_check_requires_username() {
        let result = client().check("", "1234", None, &[]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_poll_requires_transaction_id() {
        assert!(!client().poll_transaction("", &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_webauthn_check_requires_all_parameters() {
        let c = client();
        assert!(c
            .check_webauthn("alice", "", "{}", "https://host", &[])
            .await
            .unwrap()
            .is_none());
        assert!(c
            .check_webauthn("alice", "tx", "", "https://host", &[])
            .await
            .unwrap()
            .is_none());
        assert!(c
            .check_webauthn("alice", "tx", "{}", "", &[])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_webauthn_check_rejects_incomplete_payload() {
        // Parseable JSON, but the assertion fields are missing.
        let result = client()
            .check_webauthn("alice", "tx", r#"{"credentialid": "abc"}"#, "https://host", &[])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_passkey_check_requires_all_parameters() {
        let c = client();
        assert!(c.check_passkey("", "{}", "https://host", &[]).await.unwrap().is_none());
        assert!(c.check_passkey("tx", "", "https://host", &[]).await.unwrap().is_none());
        assert!(c.check_passkey("tx", "{}", "", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registration_completion_requires_all_parameters() {
        let result = client()
            .complete_passkey_registration("tx", "PKEY1", "", "{}", "https://host", &[])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cancel_enrollment_requires_transaction_id() {
        let result = client().cancel_enrollment("", &[]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_auth_token_requires_service_account() {
        let token = client().get_auth_token().await.unwrap();
        assert!(token.is_empty());
    }

    #[test]
    fn test_extract_admin_token() {
        let body = json!({
            "result": {"status": true, "value": {"token": "tok123", "role": "admin"}}
        })
        .to_string();
        assert_eq!(extract_admin_token(&body), "tok123");
    }

    #[test]
    fn test_extract_token_rejects_user_role() {
        let body = json!({
            "result": {"status": true, "value": {"token": "tok123", "role": "user"}}
        })
        .to_string();
        assert_eq!(extract_admin_token(&body), "");
    }

    #[test]
    fn test_extract_token_rejects_missing_role() {
        let body = json!({
            "result": {"status": true, "value": {"token": "tok123"}}
        })
        .to_string();
        assert_eq!(extract_admin_token(&body), "");
    }

    #[test]
    fn test_extract_token_handles_garbage() {
        assert_eq!(extract_admin_token("not json"), "");
        assert_eq!(extract_admin_token("{}"), "");
    }

    #[test]
    fn test_origin_is_a_header_not_a_parameter() {
        let headers = with_origin(&[("X-Forwarded-For".to_string(), "10.0.0.1".to_string())], "https://host.example.com");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].0, "Origin");
        assert_eq!(headers[1].1, "https://host.example.com");
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let config = MfaServerConfig::new("https://mfa.example.com/").unwrap();
        let client = MfaClient::new(config).unwrap();
        assert_eq!(
            client.endpoint_url(ENDPOINT_VALIDATE_CHECK),
            "https://mfa.example.com/validate/check"
        );
    }
}
