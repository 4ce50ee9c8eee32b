//! WebAssembly bindings for the browser half of the gatekey MFA bridge.
//!
//! This crate drives the platform credential ceremonies
//! (`navigator.credentials`) for WebAuthn and passkey logins, moves their
//! results through the hidden-form-field contract shared with the server
//! half, and runs the optional in-browser push poller.
//!
//! Every ceremony has exactly two interesting outcomes for the state
//! machine: a serialized credential payload, or a cancellation. Failures
//! never dead-end the login; the form falls back to OTP mode instead.

mod ceremony;
mod form;
mod poll;

use wasm_bindgen::prelude::*;

pub use ceremony::{authenticate_with_passkey, register_passkey, register_webauthn, sign_webauthn};
pub use form::{ensure_secure_context_and_mode, process_passkey_authentication,
    process_passkey_registration, process_webauthn};
pub use poll::{reload_delay_ms, PushPoller};

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Get the library version.
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
