//! Parsing of raw MFA server responses.
//!
//! Every endpoint answers with the same envelope: a top-level `result`
//! (status, value, optional authentication verdict, optional error object)
//! and an optional `detail` (messages, transaction id, triggered
//! challenges). [`AuthResult::parse`] lifts that envelope into a typed
//! [`AuthResult`]; a server-reported error takes precedence over every
//! other field.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::challenge::{Challenge, ChallengeSet, ClientMode, TokenKind};
use crate::error::{GatekeyError, Result};

/// Authentication verdict reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationStatus {
    Challenge,
    Accept,
    Reject,
    /// Missing or unrecognized verdict. Logged, never fatal.
    #[default]
    None,
}

impl AuthenticationStatus {
    fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("CHALLENGE") => Self::Challenge,
            Some("ACCEPT") => Self::Accept,
            Some("REJECT") => Self::Reject,
            other => {
                if other.is_some() {
                    debug!(value = ?other, "Unknown authentication status");
                }
                Self::None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    result: Option<WireResult>,
    detail: Option<WireDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct WireResult {
    status: Option<bool>,
    value: Option<Value>,
    authentication: Option<String>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: Option<Value>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDetail {
    message: Option<String>,
    messages: Option<Vec<String>>,
    serial: Option<String>,
    username: Option<String>,
    transaction_id: Option<String>,
    preferred_client_mode: Option<String>,
    multi_challenge: Option<Vec<Value>>,
    passkey: Option<Value>,
}

/// One parsed server response.
#[derive(Debug, Clone, Default)]
pub struct AuthResult {
    /// The request was processed by the server without a protocol error.
    pub status: bool,
    /// Raw `result.value` flag.
    pub value: bool,
    pub authentication_status: AuthenticationStatus,
    /// Correlates follow-up requests to this challenge round. Empty if none.
    pub transaction_id: String,
    /// Message of this response, to be shown to the user.
    pub message: String,
    /// Deduplicated, comma-joined messages of all triggered challenges.
    pub messages: String,
    /// Serial of the token associated with this response, if any.
    pub serial: String,
    /// Username resolved by the server (passkey authentication).
    pub username: String,
    pub preferred_client_mode: Option<ClientMode>,
    pub challenges: ChallengeSet,
    /// A passkey challenge, forwarded to the browser as the whole challenge
    /// object the server sent.
    pub passkey_challenge: Option<String>,
    /// Creation options of an enrollment-during-login passkey registration.
    pub passkey_registration: Option<String>,
    pub passkey_registration_serial: String,
    /// Set only when the server reported an error; mutually exclusive with
    /// a meaningful authentication verdict.
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// The response exactly as received.
    pub raw: String,
}

impl AuthResult {
    /// Parse a raw server response.
    ///
    /// Fails when the body is empty, is not JSON, or carries neither a
    /// `result.value` nor an error object.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(GatekeyError::EmptyResponse);
        }
        let envelope: WireEnvelope = serde_json::from_str(raw)
            .map_err(|e| GatekeyError::MalformedResponse(e.to_string()))?;

        let result = envelope.result.unwrap_or_default();
        let mut out = Self {
            raw: raw.to_string(),
            ..Self::default()
        };

        // A server-side error short-circuits everything else.
        if let Some(error) = result.error {
            out.error_code = error.code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            });
            out.error_message = error.message;
            return Ok(out);
        }
        if result.value.is_none() {
            return Err(GatekeyError::MalformedResponse(
                "response carries neither result.value nor an error".to_string(),
            ));
        }

        out.status = result.status.unwrap_or(false);
        out.value = result
            .value
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false);
        out.authentication_status =
            AuthenticationStatus::from_wire(result.authentication.as_deref());

        let detail = envelope.detail.unwrap_or_default();
        if let Some(messages) = detail.messages {
            let unique: BTreeSet<String> = messages.into_iter().collect();
            out.messages = unique.into_iter().collect::<Vec<_>>().join(", ");
        }
        out.message = detail.message.unwrap_or_default();
        out.username = detail.username.unwrap_or_default();
        out.serial = detail.serial.unwrap_or_default();
        out.transaction_id = detail.transaction_id.unwrap_or_default();
        out.preferred_client_mode = detail
            .preferred_client_mode
            .as_deref()
            .map(ClientMode::from_wire);

        // A passkey challenge requested via /validate/initialize arrives in
        // detail.passkey and carries its own transaction id; adopt it when no
        // top-level one was set.
        if let Some(passkey) = detail.passkey.filter(|v| !v.is_null()) {
            if out.transaction_id.is_empty() {
                if let Some(tid) = passkey.get("transaction_id").and_then(Value::as_str) {
                    out.transaction_id = tid.to_string();
                }
            }
            out.passkey_challenge = serde_json::to_string(&passkey).ok();
        }

        let mut challenges = Vec::new();
        for entry in detail.multi_challenge.unwrap_or_default() {
            let challenge = Challenge::from_wire(&entry);
            if challenge.kind == TokenKind::Passkey {
                out.passkey_challenge = serde_json::to_string(&challenge.raw).ok();
            }
            if let Some(registration) = &challenge.passkey_registration {
                out.passkey_registration = serde_json::to_string(registration).ok();
                out.passkey_registration_serial = challenge.serial.clone();
            }
            challenges.push(challenge);
        }
        out.challenges = ChallengeSet::new(challenges);

        Ok(out)
    }

    /// Whether this response is a final, successful authentication.
    ///
    /// A response with pending challenges is never a success, regardless of
    /// its value flag.
    pub fn is_authentication_successful(&self) -> bool {
        if !self.challenges.is_empty() {
            return false;
        }
        self.authentication_status == AuthenticationStatus::Accept || self.value
    }

    /// Whether the server reported an error for this exchange.
    pub fn is_error(&self) -> bool {
        self.error_code.is_some() || self.error_message.is_some()
    }
}
