//! Platform credential ceremonies.
//!
//! Each ceremony is one awaited call into `navigator.credentials` with
//! exactly two outcomes: a resolved credential serialized into the wire
//! payload, or a rejection/cancellation. The option objects are assembled
//! with `js_sys::Reflect` from the server-issued challenge data; the
//! decoding and payload shaping live in `gatekey_core::ceremony` where they
//! are unit-tested off the browser.

use gatekey_core::ceremony::{
    PasskeyChallengeData, PasskeySignPayload, RegistrationRequestData, WebAuthnSignPayload,
    WebAuthnSignRequestData,
};
use js_sys::{Array, Function, Object, Reflect, Uint8Array};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    AuthenticatorAssertionResponse, AuthenticatorAttestationResponse, CredentialCreationOptions,
    CredentialRequestOptions, CredentialsContainer, PublicKeyCredential,
};

/// Outcome of one credential ceremony, handed back to the form glue.
#[derive(Debug, Clone, Serialize)]
pub struct CeremonyOutcome {
    /// `completed`, `cancelled`, or `failed`.
    pub status: &'static str,
    /// The serialized wire payload, set when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CeremonyOutcome {
    pub fn completed(response: String) -> Self {
        Self {
            status: "completed",
            response: Some(response),
            error: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: "cancelled",
            response: None,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: "failed",
            response: None,
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    fn to_js(&self) -> JsValue {
        serde_wasm_bindgen::to_value(self).unwrap_or(JsValue::NULL)
    }
}

/// Sign a (possibly merged) WebAuthn request.
///
/// Returns a `{status, response?, error?}` object; `response` is the
/// legacy-named sign payload for the check endpoint.
#[wasm_bindgen]
pub async fn sign_webauthn(sign_request_json: String) -> JsValue {
    webauthn_ceremony(&sign_request_json).await.to_js()
}

/// Authenticate with a passkey.
///
/// Any ceremony rejection is reported as `cancelled` so the server half
/// falls back to OTP mode instead of treating it as a protocol failure.
#[wasm_bindgen]
pub async fn authenticate_with_passkey(challenge_json: String) -> JsValue {
    passkey_ceremony(&challenge_json).await.to_js()
}

/// Register a passkey as part of an enrollment-during-login flow.
#[wasm_bindgen]
pub async fn register_passkey(registration_json: String) -> JsValue {
    registration_ceremony(&registration_json).await.to_js()
}

/// Register a plain WebAuthn token, reporting the attestation in the
/// legacy field naming of the enrollment endpoint.
#[wasm_bindgen]
pub async fn register_webauthn(register_request_json: String) -> JsValue {
    webauthn_registration_ceremony(&register_request_json)
        .await
        .to_js()
}

pub(crate) async fn webauthn_ceremony(sign_request_json: &str) -> CeremonyOutcome {
    let request = match WebAuthnSignRequestData::parse(sign_request_json) {
        Ok(request) => request,
        Err(e) => return CeremonyOutcome::failed(e.to_string()),
    };
    match run_webauthn(&request).await {
        Ok(payload) => CeremonyOutcome::completed(payload),
        Err(err) if is_cancellation(&err) => CeremonyOutcome::cancelled(),
        Err(err) => CeremonyOutcome::failed(describe(&err)),
    }
}

pub(crate) async fn passkey_ceremony(challenge_json: &str) -> CeremonyOutcome {
    let challenge = match PasskeyChallengeData::parse(challenge_json) {
        Ok(challenge) => challenge,
        Err(e) => return CeremonyOutcome::failed(e.to_string()),
    };
    match run_passkey(&challenge).await {
        Ok(payload) => CeremonyOutcome::completed(payload),
        // The user backing out and a broken authenticator look the same to
        // the state machine: the passkey path is abandoned for this pass.
        Err(_) => CeremonyOutcome::cancelled(),
    }
}

pub(crate) async fn registration_ceremony(registration_json: &str) -> CeremonyOutcome {
    let registration = match RegistrationRequestData::parse(registration_json) {
        Ok(registration) => registration,
        Err(e) => return CeremonyOutcome::failed(e.to_string()),
    };
    match run_registration(&registration).await {
        Ok(payload) => CeremonyOutcome::completed(payload),
        Err(err) if is_cancellation(&err) => CeremonyOutcome::cancelled(),
        Err(err) => CeremonyOutcome::failed(describe(&err)),
    }
}

pub(crate) async fn webauthn_registration_ceremony(register_request_json: &str) -> CeremonyOutcome {
    let registration = match RegistrationRequestData::parse(register_request_json) {
        Ok(registration) => registration,
        Err(e) => return CeremonyOutcome::failed(e.to_string()),
    };
    match run_webauthn_registration(&registration).await {
        Ok(payload) => CeremonyOutcome::completed(payload),
        Err(err) if is_cancellation(&err) => CeremonyOutcome::cancelled(),
        Err(err) => CeremonyOutcome::failed(describe(&err)),
    }
}

async fn run_webauthn(request: &WebAuthnSignRequestData) -> Result<String, JsValue> {
    let public_key = Object::new();
    let challenge = request
        .challenge_bytes()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    set(&public_key, "challenge", &uint8(&challenge))?;

    let allow = Array::new();
    for credential in &request.allow_credentials {
        let descriptor = Object::new();
        let id = credential
            .id_bytes()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        set(&descriptor, "id", &uint8(&id))?;
        set(&descriptor, "type", &JsValue::from_str(&credential.kind))?;
        if let Some(transports) = &credential.transports {
            let list = Array::new();
            for transport in transports {
                list.push(&JsValue::from_str(transport));
            }
            set(&descriptor, "transports", &list)?;
        }
        allow.push(&descriptor);
    }
    set(&public_key, "allowCredentials", &allow)?;
    set(&public_key, "rpId", &JsValue::from_str(&request.rp_id))?;
    set(
        &public_key,
        "userVerification",
        &JsValue::from_str(request.user_verification()),
    )?;
    set(
        &public_key,
        "timeout",
        &JsValue::from_f64(f64::from(request.timeout_ms())),
    )?;

    let credential = get_credential(&public_key).await?;
    let assertion: AuthenticatorAssertionResponse = credential.response().dyn_into()?;

    let mut payload = WebAuthnSignPayload::new(
        &credential.id(),
        &buffer_bytes(&assertion.client_data_json()),
        &buffer_bytes(&assertion.signature()),
        &buffer_bytes(&assertion.authenticator_data()),
    );
    if let Some(handle) = assertion.user_handle() {
        // The user handle travels as a UTF-8 string on this wire.
        payload =
            payload.with_user_handle(String::from_utf8_lossy(&buffer_bytes(&handle)).into_owned());
    }
    if let Some(extensions) = extension_results_json(&credential) {
        payload = payload.with_extensions(&extensions);
    }
    Ok(payload.to_json())
}

async fn run_passkey(challenge: &PasskeyChallengeData) -> Result<String, JsValue> {
    let public_key = Object::new();
    set(&public_key, "challenge", &uint8(&challenge.challenge_bytes()))?;
    if let Some(rp_id) = &challenge.rp_id {
        set(&public_key, "rpId", &JsValue::from_str(rp_id))?;
    }
    set(
        &public_key,
        "userVerification",
        &JsValue::from_str(challenge.user_verification()),
    )?;

    let credential = get_credential(&public_key).await?;
    let assertion: AuthenticatorAssertionResponse = credential.response().dyn_into()?;

    let mut payload = PasskeySignPayload::new(
        &challenge.transaction_id,
        &credential.id(),
        &buffer_bytes(&assertion.client_data_json()),
        &buffer_bytes(&assertion.signature()),
        &buffer_bytes(&assertion.authenticator_data()),
    );
    if let Some(handle) = assertion.user_handle() {
        payload = payload.with_user_handle(&buffer_bytes(&handle));
    }
    Ok(payload.to_json())
}

async fn run_registration(registration: &RegistrationRequestData) -> Result<String, JsValue> {
    let credential = create_credential(registration, true).await?;
    let response: AuthenticatorAttestationResponse = credential.response().dyn_into()?;

    let mut payload = gatekey_core::ceremony::PasskeyRegistrationPayload::new(
        &credential.id(),
        &buffer_bytes(&response.client_data_json()),
        &buffer_bytes(&response.attestation_object()),
        &buffer_bytes(&credential.raw_id()),
    );
    payload = payload.with_attachment(
        Reflect::get(credential.as_ref(), &JsValue::from_str("authenticatorAttachment"))
            .ok()
            .and_then(|v| v.as_string()),
    );
    if let Some(extensions) = extension_results_value(&credential) {
        if let Some(cred_props) = extensions.get("credProps") {
            payload = payload.with_cred_props(Some(cred_props.clone()));
        }
    }
    Ok(payload.to_json())
}

async fn run_webauthn_registration(
    registration: &RegistrationRequestData,
) -> Result<String, JsValue> {
    let credential = create_credential(registration, false).await?;
    let response: AuthenticatorAttestationResponse = credential.response().dyn_into()?;

    let mut payload = gatekey_core::ceremony::WebAuthnRegistrationPayload::new(
        &credential.id(),
        &buffer_bytes(&response.client_data_json()),
        &buffer_bytes(&response.attestation_object()),
    );
    if let Some(extensions) = extension_results_json(&credential) {
        payload = payload.with_extensions(&extensions);
    }
    Ok(payload.to_json())
}

/// Build the creation options from the server-issued registration data and
/// run the creation ceremony.
async fn create_credential(
    registration: &RegistrationRequestData,
    request_cred_props: bool,
) -> Result<PublicKeyCredential, JsValue> {
    let raw = registration.raw();
    let public_key = Object::new();

    for passthrough in ["rp", "pubKeyCredParams", "timeout", "attestation", "authenticatorSelection"] {
        if let Some(value) = raw.get(passthrough) {
            set(&public_key, passthrough, &to_js(value)?)?;
        }
    }

    let challenge = registration
        .challenge_bytes()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    set(&public_key, "challenge", &uint8(&challenge))?;

    // The user entry is copied with its id swapped for the decoded bytes.
    if let Some(user) = raw.get("user") {
        let user_obj: Object = to_js(user)?.dyn_into()?;
        let id = registration
            .user_id_bytes()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        set(&user_obj, "id", &uint8(&id))?;
        set(&public_key, "user", &user_obj)?;
    }

    if let Some(entries) = raw.get("excludeCredentials").and_then(Value::as_array) {
        let excludes = Array::new();
        for entry in entries {
            let descriptor: Object = to_js(entry)?.dyn_into()?;
            if let Some(id) = entry.get("id").and_then(Value::as_str) {
                let bytes = gatekey_core::ceremony::websafe_b64_decode(id)
                    .map_err(|e| JsValue::from_str(&e.to_string()))?;
                set(&descriptor, "id", &uint8(&bytes))?;
            }
            excludes.push(&descriptor);
        }
        set(&public_key, "excludeCredentials", &excludes)?;
    }

    // Ask for the credProps extension so the enrollment can report whether
    // the credential is discoverable.
    if request_cred_props || raw.get("extensions").is_some() {
        let extensions = match raw.get("extensions") {
            Some(value) => to_js(value)?.dyn_into::<Object>()?,
            None => Object::new(),
        };
        if request_cred_props {
            set(&extensions, "credProps", &JsValue::TRUE)?;
        }
        set(&public_key, "extensions", &extensions)?;
    }

    let options = Object::new();
    set(&options, "publicKey", &public_key)?;
    let options: CredentialCreationOptions = options.unchecked_into();

    let promise = credentials_container()?.create_with_options(&options)?;
    let credential = JsFuture::from(promise).await?;
    credential.dyn_into()
}

async fn get_credential(public_key: &Object) -> Result<PublicKeyCredential, JsValue> {
    let options = Object::new();
    set(&options, "publicKey", public_key)?;
    let options: CredentialRequestOptions = options.unchecked_into();
    let promise = credentials_container()?.get_with_options(&options)?;
    let credential = JsFuture::from(promise).await?;
    credential.dyn_into()
}

fn credentials_container() -> Result<CredentialsContainer, JsValue> {
    let window =
        web_sys::window().ok_or_else(|| JsValue::from_str("no window in this context"))?;
    Ok(window.navigator().credentials())
}

fn set(target: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(target, &JsValue::from_str(key), value)?;
    Ok(())
}

fn to_js(value: &Value) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn uint8(bytes: &[u8]) -> JsValue {
    Uint8Array::from(bytes).into()
}

fn buffer_bytes(buffer: &js_sys::ArrayBuffer) -> Vec<u8> {
    Uint8Array::new(buffer).to_vec()
}

/// Call `getClientExtensionResults()` and serialize the outputs, if any.
fn extension_results_json(credential: &PublicKeyCredential) -> Option<String> {
    let results = call_method0(credential.as_ref(), "getClientExtensionResults")?;
    let json = js_sys::JSON::stringify(&results).ok()?;
    let json: String = json.into();
    match json.as_str() {
        "{}" | "null" | "undefined" => None,
        _ => Some(json),
    }
}

fn extension_results_value(credential: &PublicKeyCredential) -> Option<Value> {
    extension_results_json(credential).and_then(|json| serde_json::from_str(&json).ok())
}

fn call_method0(target: &JsValue, name: &str) -> Option<JsValue> {
    let func = Reflect::get(target, &JsValue::from_str(name)).ok()?;
    let func: Function = func.dyn_into().ok()?;
    func.call0(target).ok()
}

fn error_name(err: &JsValue) -> String {
    Reflect::get(err, &JsValue::from_str("name"))
        .ok()
        .and_then(|v| v.as_string())
        .unwrap_or_default()
}

/// The user backing out of the platform prompt surfaces as one of these
/// DOMException names.
fn is_cancellation(err: &JsValue) -> bool {
    matches!(error_name(err).as_str(), "NotAllowedError" | "AbortError")
}

fn describe(err: &JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}
