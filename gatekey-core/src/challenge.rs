//! Challenges triggered by one authentication attempt.
//!
//! A server response may carry several challenges at once (one per eligible
//! token). [`ChallengeSet`] keeps them in server order and answers the
//! queries the orchestrator needs: which token kinds were triggered, the
//! per-kind messages, and a single WebAuthn sign request merged across all
//! eligible credentials.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Kind of token a challenge belongs to.
///
/// A closed set with an explicit fallback; the server vocabulary is open, so
/// unknown kinds are carried verbatim instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Push,
    WebAuthn,
    Passkey,
    Smartphone,
    Other(String),
}

impl TokenKind {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "push" => Self::Push,
            "webauthn" => Self::WebAuthn,
            "passkey" => Self::Passkey,
            "smartphone" => Self::Smartphone,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Push => "push",
            Self::WebAuthn => "webauthn",
            Self::Passkey => "passkey",
            Self::Smartphone => "smartphone",
            Self::Other(s) => s,
        }
    }

    /// Whether answering this challenge requires a typed input field.
    /// Push is confirmed out-of-band and WebAuthn through a credential
    /// ceremony; everything else prompts for a value.
    pub fn is_interactive(&self) -> bool {
        !matches!(self, Self::Push | Self::WebAuthn)
    }
}

/// UI mode the client should operate in.
///
/// Shared between the server-side state machine and the browser half. The
/// server vocabulary is normalized on entry: `poll` means push confirmation,
/// `interactive` means a typed OTP; anything else passes through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ClientMode {
    Otp,
    Push,
    WebAuthn,
    Passkey,
    Other(String),
}

impl ClientMode {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "poll" | "push" => Self::Push,
            "interactive" | "otp" => Self::Otp,
            "webauthn" => Self::WebAuthn,
            "passkey" => Self::Passkey,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Otp => "otp",
            Self::Push => "push",
            Self::WebAuthn => "webauthn",
            Self::Passkey => "passkey",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ClientMode {
    fn from(value: String) -> Self {
        Self::from_wire(&value)
    }
}

impl From<ClientMode> for String {
    fn from(value: ClientMode) -> Self {
        value.as_str().to_string()
    }
}

/// One triggered challenge, scoped to a transaction id and a token.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub transaction_id: String,
    pub serial: String,
    pub kind: TokenKind,
    pub message: String,
    /// QR code or similar, as a data URL, for enrollment challenges.
    pub image: Option<String>,
    pub enrollment_link: Option<String>,
    pub client_mode: Option<ClientMode>,
    pub attributes: Option<Value>,
    /// Present when `kind` is WebAuthn; the sign request from the
    /// challenge's attributes.
    pub webauthn_sign_request: Option<Value>,
    /// Creation options for an enrollment-during-login passkey registration.
    pub passkey_registration: Option<Value>,
    pub enroll_via_multichallenge: bool,
    pub enroll_via_multichallenge_optional: bool,
    /// The challenge object exactly as the server sent it. Passkey
    /// challenges are forwarded to the browser whole.
    pub raw: Value,
}

impl Challenge {
    /// Build a challenge from one `multi_challenge` entry.
    pub fn from_wire(entry: &Value) -> Self {
        let kind = TokenKind::from_wire(str_field(entry, "type").unwrap_or_default());
        let attributes = entry.get("attributes").cloned();
        let webauthn_sign_request = if kind == TokenKind::WebAuthn {
            attributes
                .as_ref()
                .and_then(|a| a.get("webAuthnSignRequest"))
                .cloned()
        } else {
            None
        };
        Self {
            transaction_id: str_field(entry, "transaction_id").unwrap_or_default().to_string(),
            serial: str_field(entry, "serial").unwrap_or_default().to_string(),
            message: str_field(entry, "message").unwrap_or_default().to_string(),
            image: str_field(entry, "image").map(str::to_string),
            enrollment_link: str_field(entry, "link").map(str::to_string),
            client_mode: str_field(entry, "client_mode").map(ClientMode::from_wire),
            passkey_registration: entry
                .get("passkey_registration")
                .filter(|v| !v.is_null())
                .cloned(),
            enroll_via_multichallenge: bool_field(entry, "enroll_via_multichallenge"),
            enroll_via_multichallenge_optional: bool_field(
                entry,
                "enroll_via_multichallenge_optional",
            ),
            kind,
            attributes,
            webauthn_sign_request,
            raw: entry.clone(),
        }
    }
}

fn str_field<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn bool_field(entry: &Value, key: &str) -> bool {
    entry.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// The challenges of one authentication attempt, in server order.
#[derive(Debug, Clone, Default)]
pub struct ChallengeSet {
    challenges: Vec<Challenge>,
}

impl ChallengeSet {
    pub fn new(challenges: Vec<Challenge>) -> Self {
        Self { challenges }
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Challenge> {
        self.challenges.iter()
    }

    /// Unique token kinds triggered, in first-seen order.
    pub fn kinds(&self) -> Vec<TokenKind> {
        let mut out: Vec<TokenKind> = Vec::new();
        for c in &self.challenges {
            if !out.contains(&c.kind) {
                out.push(c.kind.clone());
            }
        }
        out
    }

    pub fn contains_kind(&self, kind: &TokenKind) -> bool {
        self.challenges.iter().any(|c| &c.kind == kind)
    }

    /// A push or smartphone-container challenge can be confirmed out-of-band.
    pub fn push_available(&self) -> bool {
        self.challenges
            .iter()
            .any(|c| matches!(c.kind, TokenKind::Push | TokenKind::Smartphone))
    }

    /// Message of the first challenge answered with a typed input.
    pub fn otp_message(&self) -> Option<&str> {
        self.message_where(|c| c.kind.is_interactive())
    }

    pub fn push_message(&self) -> Option<&str> {
        self.message_where(|c| c.kind == TokenKind::Push)
    }

    pub fn webauthn_message(&self) -> Option<&str> {
        self.message_where(|c| c.kind == TokenKind::WebAuthn)
    }

    pub fn passkey_message(&self) -> Option<&str> {
        self.message_where(|c| c.kind == TokenKind::Passkey)
    }

    fn message_where(&self, pred: impl Fn(&Challenge) -> bool) -> Option<&str> {
        self.challenges
            .iter()
            .find(|c| pred(c))
            .map(|c| c.message.as_str())
    }

    /// Merge all WebAuthn challenges into one sign request.
    ///
    /// One browser prompt can cover several eligible credentials: the first
    /// challenge's request is used as the template and the first
    /// `allowCredentials` entry of every WebAuthn challenge is folded into
    /// its credential list. Returns the merged request serialized as JSON.
    pub fn merged_webauthn_sign_request(&self) -> Option<String> {
        let mut template: Option<Value> = None;
        let mut credentials: Vec<Value> = Vec::new();

        for challenge in &self.challenges {
            let Some(request) = &challenge.webauthn_sign_request else {
                continue;
            };
            if template.is_none() {
                template = Some(request.clone());
            }
            match request.get("allowCredentials").and_then(Value::as_array) {
                Some(allowed) if !allowed.is_empty() => credentials.push(allowed[0].clone()),
                _ => debug!(
                    serial = %challenge.serial,
                    "WebAuthn challenge without allowCredentials, skipping"
                ),
            }
        }

        let mut merged = template?;
        merged["allowCredentials"] = Value::Array(credentials);
        serde_json::to_string(&merged).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webauthn_challenge(serial: &str, cred_id: &str) -> Value {
        json!({
            "transaction_id": "tx1",
            "serial": serial,
            "type": "webauthn",
            "message": format!("Please confirm with {serial}"),
            "attributes": {
                "webAuthnSignRequest": {
                    "challenge": "Y2hhbGxlbmdl",
                    "rpId": "example.com",
                    "userVerification": "preferred",
                    "allowCredentials": [{"id": cred_id, "type": "public-key"}]
                }
            }
        })
    }

    #[test]
    fn test_token_kind_from_wire() {
        assert_eq!(TokenKind::from_wire("push"), TokenKind::Push);
        assert_eq!(TokenKind::from_wire("webauthn"), TokenKind::WebAuthn);
        assert_eq!(
            TokenKind::from_wire("hotp"),
            TokenKind::Other("hotp".to_string())
        );
    }

    #[test]
    fn test_client_mode_normalization() {
        assert_eq!(ClientMode::from_wire("poll"), ClientMode::Push);
        assert_eq!(ClientMode::from_wire("interactive"), ClientMode::Otp);
        assert_eq!(ClientMode::from_wire("webauthn"), ClientMode::WebAuthn);
        assert_eq!(
            ClientMode::from_wire("voice"),
            ClientMode::Other("voice".to_string())
        );
        assert_eq!(ClientMode::from_wire("voice").as_str(), "voice");
    }

    #[test]
    fn test_interactive_kinds() {
        assert!(!TokenKind::Push.is_interactive());
        assert!(!TokenKind::WebAuthn.is_interactive());
        assert!(TokenKind::Other("hotp".to_string()).is_interactive());
    }

    #[test]
    fn test_challenge_from_wire_webauthn_extracts_sign_request() {
        let challenge = Challenge::from_wire(&webauthn_challenge("WAN1", "cred-a"));
        assert_eq!(challenge.kind, TokenKind::WebAuthn);
        let request = challenge.webauthn_sign_request.unwrap();
        assert_eq!(request["rpId"], "example.com");
    }

    #[test]
    fn test_merged_sign_request_covers_all_credentials() {
        let set = ChallengeSet::new(vec![
            Challenge::from_wire(&webauthn_challenge("WAN1", "cred-a")),
            Challenge::from_wire(&webauthn_challenge("WAN2", "cred-b")),
        ]);
        let merged: Value =
            serde_json::from_str(&set.merged_webauthn_sign_request().unwrap()).unwrap();
        let creds = merged["allowCredentials"].as_array().unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0]["id"], "cred-a");
        assert_eq!(creds[1]["id"], "cred-b");
        // Template fields come from the first challenge.
        assert_eq!(merged["rpId"], "example.com");
    }

    #[test]
    fn test_merged_sign_request_empty_without_webauthn() {
        let set = ChallengeSet::new(vec![Challenge::from_wire(&json!({
            "transaction_id": "tx1",
            "serial": "PUSH1",
            "type": "push",
            "message": "Confirm on your phone"
        }))]);
        assert!(set.merged_webauthn_sign_request().is_none());
        assert!(set.push_available());
        assert_eq!(set.push_message(), Some("Confirm on your phone"));
        assert_eq!(set.otp_message(), None);
    }

    #[test]
    fn test_kinds_are_unique() {
        let push = json!({"transaction_id": "t", "serial": "s", "type": "push"});
        let set = ChallengeSet::new(vec![
            Challenge::from_wire(&push),
            Challenge::from_wire(&push),
        ]);
        assert_eq!(set.kinds(), vec![TokenKind::Push]);
    }
}
