//! Hidden-form-field plumbing.
//!
//! The login form's hidden fields are the serialization contract between
//! the browser and server halves (`gatekey_core::fields`); this module
//! reads and writes them and drives the ceremony entry points the page
//! hooks up to its buttons and load events.

use gatekey_core::fields;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlFormElement, HtmlInputElement};

use crate::ceremony;

/// Element id of the login form.
pub const LOGIN_FORM_ID: &str = "mfaLoginForm";

fn document() -> Option<Document> {
    web_sys::window().and_then(|w| w.document())
}

/// Read a form field's value; missing elements read as empty.
#[wasm_bindgen]
pub fn get_value(id: &str) -> String {
    document()
        .and_then(|d| d.get_element_by_id(id))
        .and_then(|e| e.dyn_into::<HtmlInputElement>().ok())
        .map(|input| input.value())
        .unwrap_or_default()
}

/// Write a form field's value; missing elements are ignored.
#[wasm_bindgen]
pub fn set_value(id: &str, value: &str) {
    if let Some(input) = document()
        .and_then(|d| d.get_element_by_id(id))
        .and_then(|e| e.dyn_into::<HtmlInputElement>().ok())
    {
        input.set_value(value);
    } else {
        web_sys::console::log_1(&JsValue::from_str(&format!("{id} is missing in the form")));
    }
}

/// Submit the login form, re-entering the server-side state machine.
#[wasm_bindgen]
pub fn submit_login_form() {
    if let Some(form) = document()
        .and_then(|d| d.get_element_by_id(LOGIN_FORM_ID))
        .and_then(|e| e.dyn_into::<HtmlFormElement>().ok())
    {
        let _ = form.submit();
    }
}

/// Switch the UI mode. This is a local transition: the server sees
/// `modeChanged=1` and re-renders without a protocol step.
#[wasm_bindgen]
pub fn change_mode(new_mode: &str) {
    set_value(fields::MODE, new_mode);
    set_value(fields::MODE_CHANGED, "1");
    submit_login_form();
}

fn set_origin_field() {
    if let Some(origin) = web_sys::window().and_then(|w| w.location().origin().ok()) {
        set_value(fields::ORIGIN, &origin);
    }
}

/// Guard a WebAuthn ceremony: push mode would reload mid-ceremony, and an
/// insecure context cannot run one at all. Returns `false` when the
/// ceremony must not start; the mode is already downgraded to OTP then.
#[wasm_bindgen]
pub fn ensure_secure_context_and_mode() -> bool {
    if get_value(fields::MODE) == "push" {
        set_value(fields::MODE, "webauthn");
    }
    let secure = web_sys::window().map(|w| w.is_secure_context()).unwrap_or(false);
    if !secure {
        set_value(
            fields::ERROR_MESSAGE,
            "Unable to proceed with WebAuthn because the context is insecure!",
        );
        set_value(fields::MODE, "otp");
        return false;
    }
    true
}

/// Run the WebAuthn sign ceremony from the form's sign request and submit
/// the result. Any failure falls back to OTP mode.
#[wasm_bindgen]
pub async fn process_webauthn() {
    if !ensure_secure_context_and_mode() {
        return;
    }
    let sign_request = get_value(fields::WEBAUTHN_SIGN_REQUEST);
    if sign_request.is_empty() {
        set_value(
            fields::ERROR_MESSAGE,
            "Could not process the WebAuthn request. Please try again or use another token.",
        );
        change_mode("otp");
        return;
    }
    set_origin_field();

    let outcome = ceremony::webauthn_ceremony(&sign_request).await;
    if outcome.is_completed() {
        if let Some(response) = outcome.response {
            set_value(fields::WEBAUTHN_SIGN_RESPONSE, &response);
            set_value(fields::MODE, "webauthn");
            submit_login_form();
            return;
        }
    }
    if let Some(error) = &outcome.error {
        web_sys::console::log_1(&JsValue::from_str(&format!(
            "Error while signing the WebAuthn request: {error}"
        )));
    }
    change_mode("otp");
}

/// Run the passkey authentication ceremony from the form's challenge and
/// submit the result. A rejected or failed ceremony submits with the
/// cancellation flag so the server falls back to OTP.
#[wasm_bindgen]
pub async fn process_passkey_authentication() {
    // Push mode would reload the page under the ceremony.
    if get_value(fields::MODE) == "push" {
        set_value(fields::MODE, "passkey");
    }
    let challenge = get_value(fields::PASSKEY_CHALLENGE);
    if challenge.is_empty() {
        web_sys::console::log_1(&JsValue::from_str("Passkey challenge data is empty"));
        return;
    }
    set_value(fields::PASSKEY_LOGIN_CANCELLED, "0");
    set_origin_field();

    let outcome = ceremony::passkey_ceremony(&challenge).await;
    if outcome.is_completed() {
        if let Some(response) = outcome.response {
            set_value(fields::PASSKEY_SIGN_RESPONSE, &response);
            submit_login_form();
            return;
        }
    }
    set_value(fields::PASSKEY_LOGIN_CANCELLED, "1");
    submit_login_form();
}

/// Run the passkey registration ceremony (enrollment during login) and
/// submit the result.
#[wasm_bindgen]
pub async fn process_passkey_registration() {
    let registration = get_value(fields::PASSKEY_REGISTRATION);
    if registration.is_empty() {
        return;
    }
    set_origin_field();

    let outcome = ceremony::registration_ceremony(&registration).await;
    if outcome.is_completed() {
        if let Some(response) = outcome.response {
            set_value(fields::PASSKEY_REGISTRATION_RESPONSE, &response);
            submit_login_form();
            return;
        }
    }
    let error = outcome.error.unwrap_or_else(|| "ceremony rejected".to_string());
    set_value(
        fields::ERROR_MESSAGE,
        &format!("Error during passkey registration: {error}"),
    );
}
