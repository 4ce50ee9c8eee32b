//! Data contracts of the browser credential ceremonies.
//!
//! The browser half drives `navigator.credentials`; everything around that
//! call (decoding server-issued challenge data, validating options, shaping
//! the wire payloads) is plain data work and lives here so both halves
//! share one contract and the host-side tests cover it.
//!
//! Two encodings coexist on this wire: WebAuthn sign requests and
//! registration options carry web-safe base64 (`-`/`_` alphabet, no
//! padding), while a passkey challenge transports its challenge as a raw
//! byte-string (one byte per character) and its response fields in standard
//! base64.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatekeyError, Result};

/// Web-safe base64 encode, as specified by WebAuthn: `-`/`_` alphabet
/// without padding.
pub fn websafe_b64_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Web-safe base64 decode. Padding is stripped before decoding, so both
/// padded and unpadded input round-trip.
pub fn websafe_b64_decode(value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| GatekeyError::MalformedResponse(format!("invalid web-safe base64: {e}")))
}

/// Standard base64 encode, used by the passkey response fields.
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Undo the HTML-entity escaping some template layers apply to embedded
/// JSON before it can be parsed.
pub fn unescape_html_quotes(value: &str) -> String {
    value.replace("&quot;", "\"")
}

const USER_VERIFICATION_VALUES: [&str; 3] = ["required", "preferred", "discouraged"];

/// Clamp a `user_verification` value to the enumerated set, defaulting to
/// `preferred` for anything else.
pub fn normalize_user_verification(value: Option<&str>) -> &'static str {
    match value {
        Some(v) => USER_VERIFICATION_VALUES
            .iter()
            .find(|candidate| **candidate == v)
            .copied()
            .unwrap_or("preferred"),
        None => "preferred",
    }
}

/// A passkey challenge as issued by the server.
///
/// Forwarded to the browser as the whole challenge object; the transaction
/// id inside it may differ from the primary challenge round's.
#[derive(Debug, Clone, Deserialize)]
pub struct PasskeyChallengeData {
    pub challenge: String,
    #[serde(rename = "rpId", default)]
    pub rp_id: Option<String>,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub user_verification: Option<String>,
}

impl PasskeyChallengeData {
    pub fn parse(raw: &str) -> Result<Self> {
        let unescaped = unescape_html_quotes(raw);
        serde_json::from_str(&unescaped)
            .map_err(|e| GatekeyError::MalformedResponse(format!("invalid passkey challenge: {e}")))
    }

    /// The challenge bytes. The server transports them as a byte-string,
    /// one byte per character, not as base64.
    pub fn challenge_bytes(&self) -> Vec<u8> {
        self.challenge.encode_utf16().map(|unit| unit as u8).collect()
    }

    pub fn user_verification(&self) -> &'static str {
        normalize_user_verification(self.user_verification.as_deref())
    }
}

/// A credential descriptor inside a sign request's `allowCredentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowCredential {
    /// Credential id, web-safe base64.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

impl AllowCredential {
    pub fn id_bytes(&self) -> Result<Vec<u8>> {
        websafe_b64_decode(&self.id)
    }
}

/// A WebAuthn sign request as issued by the server (possibly merged across
/// several eligible tokens).
#[derive(Debug, Clone, Deserialize)]
pub struct WebAuthnSignRequestData {
    /// Challenge, web-safe base64.
    pub challenge: String,
    #[serde(rename = "allowCredentials", default)]
    pub allow_credentials: Vec<AllowCredential>,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "userVerification", default)]
    pub user_verification: Option<String>,
    #[serde(default)]
    pub timeout: Option<u32>,
}

impl WebAuthnSignRequestData {
    pub fn parse(raw: &str) -> Result<Self> {
        let unescaped = unescape_html_quotes(raw);
        serde_json::from_str(&unescaped).map_err(|e| {
            GatekeyError::MalformedResponse(format!("invalid WebAuthn sign request: {e}"))
        })
    }

    pub fn challenge_bytes(&self) -> Result<Vec<u8>> {
        websafe_b64_decode(&self.challenge)
    }

    pub fn user_verification(&self) -> &'static str {
        normalize_user_verification(self.user_verification.as_deref())
    }

    /// Ceremony timeout in milliseconds.
    pub fn timeout_ms(&self) -> u32 {
        self.timeout.unwrap_or(60_000)
    }
}

/// Credential creation options for an enrollment during login, passkey or
/// WebAuthn.
///
/// Kept as raw JSON plus decoded accessors: the browser rebuilds the
/// options object field by field, and the server may add fields we should
/// pass through untouched.
#[derive(Debug, Clone)]
pub struct RegistrationRequestData {
    raw: Value,
}

impl RegistrationRequestData {
    pub fn parse(raw: &str) -> Result<Self> {
        let unescaped = unescape_html_quotes(raw);
        let value: Value = serde_json::from_str(&unescaped).map_err(|e| {
            GatekeyError::MalformedResponse(format!("invalid registration request: {e}"))
        })?;
        if value.get("challenge").and_then(Value::as_str).is_none() {
            return Err(GatekeyError::MalformedResponse(
                "registration request without a challenge".to_string(),
            ));
        }
        Ok(Self { raw: value })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Challenge bytes, web-safe base64 decoded.
    pub fn challenge_bytes(&self) -> Result<Vec<u8>> {
        let challenge = self
            .raw
            .get("challenge")
            .and_then(Value::as_str)
            .unwrap_or_default();
        websafe_b64_decode(challenge)
    }

    /// The user handle bytes, web-safe base64 decoded.
    pub fn user_id_bytes(&self) -> Result<Vec<u8>> {
        let id = self
            .raw
            .pointer("/user/id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatekeyError::MalformedResponse(
                    "registration request without a user id".to_string(),
                )
            })?;
        websafe_b64_decode(id)
    }

    /// Credential ids the authenticator must not re-register, decoded.
    pub fn exclude_credential_ids(&self) -> Vec<(String, Vec<u8>)> {
        self.raw
            .get("excludeCredentials")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let id = entry.get("id").and_then(Value::as_str)?;
                        let bytes = websafe_b64_decode(id).ok()?;
                        Some((id.to_string(), bytes))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Assertion result of a WebAuthn sign ceremony, in the legacy field naming
/// the check endpoint expects. Binary fields are web-safe base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnSignPayload {
    pub credentialid: String,
    pub clientdata: String,
    pub signaturedata: String,
    pub authenticatordata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userhandle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertionclientextensions: Option<String>,
}

impl WebAuthnSignPayload {
    pub fn new(
        credential_id: &str,
        client_data: &[u8],
        signature: &[u8],
        authenticator_data: &[u8],
    ) -> Self {
        Self {
            credentialid: credential_id.to_string(),
            clientdata: websafe_b64_encode(client_data),
            signaturedata: websafe_b64_encode(signature),
            authenticatordata: websafe_b64_encode(authenticator_data),
            userhandle: None,
            assertionclientextensions: None,
        }
    }

    /// The user handle is transported as a UTF-8 string, not base64.
    pub fn with_user_handle(mut self, user_handle: String) -> Self {
        self.userhandle = Some(user_handle);
        self
    }

    /// Extension results are JSON, transported web-safe base64 encoded.
    pub fn with_extensions(mut self, extensions_json: &str) -> Self {
        self.assertionclientextensions = Some(websafe_b64_encode(extensions_json.as_bytes()));
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Assertion result of a passkey ceremony, in the snake_case field naming
/// the check endpoint expects. Binary fields are standard base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeySignPayload {
    pub transaction_id: String,
    pub credential_id: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    #[serde(rename = "userHandle", default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

impl PasskeySignPayload {
    pub fn new(
        transaction_id: &str,
        credential_id: &str,
        client_data: &[u8],
        signature: &[u8],
        authenticator_data: &[u8],
    ) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            credential_id: credential_id.to_string(),
            client_data_json: b64_encode(client_data),
            signature: b64_encode(signature),
            authenticator_data: b64_encode(authenticator_data),
            user_handle: None,
        }
    }

    pub fn with_user_handle(mut self, user_handle: &[u8]) -> Self {
        self.user_handle = Some(b64_encode(user_handle));
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Result of a passkey registration ceremony, sent back to complete an
/// enrollment-during-login. Binary fields are web-safe base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyRegistrationPayload {
    pub credential_id: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    #[serde(
        rename = "authenticatorAttachment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    #[serde(rename = "credProps", default, skip_serializing_if = "Option::is_none")]
    pub cred_props: Option<Value>,
}

impl PasskeyRegistrationPayload {
    pub fn new(
        credential_id: &str,
        client_data: &[u8],
        attestation_object: &[u8],
        raw_id: &[u8],
    ) -> Self {
        Self {
            credential_id: credential_id.to_string(),
            client_data_json: websafe_b64_encode(client_data),
            attestation_object: websafe_b64_encode(attestation_object),
            authenticator_attachment: None,
            raw_id: websafe_b64_encode(raw_id),
            cred_props: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<String>) -> Self {
        self.authenticator_attachment = attachment;
        self
    }

    pub fn with_cred_props(mut self, cred_props: Option<Value>) -> Self {
        self.cred_props = cred_props;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Attestation result of a plain WebAuthn registration ceremony, in the
/// legacy field naming of the enrollment endpoint. Binary fields are
/// web-safe base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnRegistrationPayload {
    pub credentialid: String,
    pub clientdata: String,
    pub regdata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrationclientextensions: Option<String>,
}

impl WebAuthnRegistrationPayload {
    pub fn new(credential_id: &str, client_data: &[u8], attestation_object: &[u8]) -> Self {
        Self {
            credentialid: credential_id.to_string(),
            clientdata: websafe_b64_encode(client_data),
            regdata: websafe_b64_encode(attestation_object),
            registrationclientextensions: None,
        }
    }

    /// Extension results are JSON, transported web-safe base64 encoded.
    pub fn with_extensions(mut self, extensions_json: &str) -> Self {
        self.registrationclientextensions = Some(websafe_b64_encode(extensions_json.as_bytes()));
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_websafe_b64_round_trip() {
        let cases: [&[u8]; 5] = [
            b"",
            b"f",
            b"fo",
            b"foo",
            &[0x00, 0xff, 0x7f, 0x80, 0x3e, 0x3f],
        ];
        for bytes in cases {
            let encoded = websafe_b64_encode(bytes);
            assert!(!encoded.contains('+'));
            assert!(!encoded.contains('/'));
            assert!(!encoded.contains('='));
            assert_eq!(websafe_b64_decode(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_websafe_b64_round_trip_all_byte_values() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = websafe_b64_encode(&bytes);
        assert_eq!(websafe_b64_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_websafe_b64_decode_accepts_padded_input() {
        assert_eq!(websafe_b64_decode("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(websafe_b64_decode("AQI=").unwrap(), vec![1, 2]);
        assert_eq!(websafe_b64_decode("AQ==").unwrap(), vec![1]);
    }

    #[test]
    fn test_websafe_b64_decode_rejects_garbage() {
        assert!(websafe_b64_decode("!!not-base64!!").is_err());
    }

    #[test]
    fn test_user_verification_normalization() {
        assert_eq!(normalize_user_verification(Some("required")), "required");
        assert_eq!(normalize_user_verification(Some("preferred")), "preferred");
        assert_eq!(
            normalize_user_verification(Some("discouraged")),
            "discouraged"
        );
        assert_eq!(normalize_user_verification(Some("mandatory")), "preferred");
        assert_eq!(normalize_user_verification(None), "preferred");
    }

    #[test]
    fn test_passkey_challenge_unescapes_html_quotes() {
        let raw = "{&quot;challenge&quot;:&quot;abc&quot;,&quot;rpId&quot;:\
                   &quot;example.com&quot;,&quot;transaction_id&quot;:&quot;tx1&quot;}";
        let data = PasskeyChallengeData::parse(raw).unwrap();
        assert_eq!(data.challenge, "abc");
        assert_eq!(data.rp_id.as_deref(), Some("example.com"));
        assert_eq!(data.transaction_id, "tx1");
    }

    #[test]
    fn test_passkey_challenge_bytes_are_char_codes() {
        let data = PasskeyChallengeData::parse(
            &json!({"challenge": "ABC", "transaction_id": "tx"}).to_string(),
        )
        .unwrap();
        assert_eq!(data.challenge_bytes(), vec![65, 66, 67]);
    }

    #[test]
    fn test_passkey_challenge_invalid_user_verification_defaults() {
        let data = PasskeyChallengeData::parse(
            &json!({"challenge": "x", "user_verification": "always"}).to_string(),
        )
        .unwrap();
        assert_eq!(data.user_verification(), "preferred");
    }

    #[test]
    fn test_sign_request_parsing() {
        let raw = json!({
            "challenge": "Y2hhbGxlbmdl",
            "rpId": "example.com",
            "userVerification": "discouraged",
            "allowCredentials": [
                {"id": "AQID", "type": "public-key", "transports": ["usb"]}
            ]
        })
        .to_string();
        let request = WebAuthnSignRequestData::parse(&raw).unwrap();
        assert_eq!(request.rp_id, "example.com");
        assert_eq!(request.user_verification(), "discouraged");
        assert_eq!(request.timeout_ms(), 60_000);
        assert_eq!(request.challenge_bytes().unwrap(), b"challenge");
        assert_eq!(request.allow_credentials.len(), 1);
        assert_eq!(request.allow_credentials[0].id_bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_registration_data_accessors() {
        let raw = json!({
            "rp": {"id": "example.com", "name": "Example"},
            "user": {"id": "BAUG", "name": "alice", "displayName": "Alice"},
            "challenge": "AQID",
            "pubKeyCredParams": [{"type": "public-key", "alg": -7}],
            "excludeCredentials": [{"id": "BwgJ", "type": "public-key"}]
        })
        .to_string();
        let data = RegistrationRequestData::parse(&raw).unwrap();
        assert_eq!(data.challenge_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(data.user_id_bytes().unwrap(), vec![4, 5, 6]);
        let excluded = data.exclude_credential_ids();
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].1, vec![7, 8, 9]);
    }

    #[test]
    fn test_registration_data_requires_challenge() {
        assert!(RegistrationRequestData::parse("{}").is_err());
    }

    #[test]
    fn test_webauthn_payload_field_names() {
        let payload = WebAuthnSignPayload::new("cred-1", b"client", b"sig", b"auth")
            .with_user_handle("alice".to_string())
            .with_extensions("{}");
        let value: Value = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(value["credentialid"], "cred-1");
        assert_eq!(value["clientdata"], websafe_b64_encode(b"client"));
        assert_eq!(value["signaturedata"], websafe_b64_encode(b"sig"));
        assert_eq!(value["authenticatordata"], websafe_b64_encode(b"auth"));
        assert_eq!(value["userhandle"], "alice");
        assert_eq!(
            value["assertionclientextensions"],
            websafe_b64_encode(b"{}")
        );
    }

    #[test]
    fn test_passkey_payload_field_names() {
        let payload = PasskeySignPayload::new("tx1", "cred-1", b"client", b"sig", b"auth")
            .with_user_handle(b"handle");
        let value: Value = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(value["transaction_id"], "tx1");
        assert_eq!(value["credential_id"], "cred-1");
        assert_eq!(value["clientDataJSON"], b64_encode(b"client"));
        assert_eq!(value["signature"], b64_encode(b"sig"));
        assert_eq!(value["authenticatorData"], b64_encode(b"auth"));
        assert_eq!(value["userHandle"], b64_encode(b"handle"));
    }

    #[test]
    fn test_registration_payload_field_names() {
        let payload = PasskeyRegistrationPayload::new("cred-1", b"client", b"att", b"raw")
            .with_attachment(Some("platform".to_string()))
            .with_cred_props(Some(json!({"rk": true})));
        let value: Value = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(value["credential_id"], "cred-1");
        assert_eq!(value["clientDataJSON"], websafe_b64_encode(b"client"));
        assert_eq!(value["attestationObject"], websafe_b64_encode(b"att"));
        assert_eq!(value["authenticatorAttachment"], "platform");
        assert_eq!(value["rawId"], websafe_b64_encode(b"raw"));
        assert_eq!(value["credProps"]["rk"], true);
    }

    #[test]
    fn test_webauthn_registration_payload_field_names() {
        let payload = WebAuthnRegistrationPayload::new("cred-1", b"client", b"att")
            .with_extensions("{}");
        let value: Value = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(value["credentialid"], "cred-1");
        assert_eq!(value["clientdata"], websafe_b64_encode(b"client"));
        assert_eq!(value["regdata"], websafe_b64_encode(b"att"));
        assert_eq!(
            value["registrationclientextensions"],
            websafe_b64_encode(b"{}")
        );
    }

    #[test]
    fn test_optional_payload_fields_are_omitted() {
        let value: Value =
            serde_json::from_str(&WebAuthnSignPayload::new("c", b"a", b"b", b"d").to_json())
                .unwrap();
        assert!(value.get("userhandle").is_none());
        assert!(value.get("assertionclientextensions").is_none());
    }
}
