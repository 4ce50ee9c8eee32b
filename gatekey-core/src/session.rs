//! Per-login-attempt state.
//!
//! One [`SessionState`] lives from the first render of a login attempt to
//! its terminal accept or reject, mutated once per submission by the
//! orchestrator and discarded by the host afterwards. It replaces the
//! stringly key-value session of the reference implementation with named,
//! typed fields; [`SessionState::template_state`] flattens it back into the
//! key-value map the host's template layer renders from.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::challenge::ClientMode;

/// Hidden-form-field names shared between the server and browser halves.
///
/// These names are the serialization contract of the state machine across a
/// full-page round trip and must not change.
pub mod fields {
    pub const MODE: &str = "mode";
    pub const MODE_CHANGED: &str = "modeChanged";
    pub const TRANSACTION_ID: &str = "transactionID";
    pub const LOAD_COUNTER: &str = "loadCounter";
    pub const WEBAUTHN_SIGN_REQUEST: &str = "webAuthnSignRequest";
    pub const WEBAUTHN_SIGN_RESPONSE: &str = "webAuthnSignResponse";
    pub const PASSKEY_CHALLENGE: &str = "passkeyChallenge";
    pub const PASSKEY_SIGN_RESPONSE: &str = "passkeySignResponse";
    pub const PASSKEY_REGISTRATION: &str = "passkeyRegistration";
    pub const PASSKEY_REGISTRATION_RESPONSE: &str = "passkeyRegistrationResponse";
    pub const PASSKEY_LOGIN_CANCELLED: &str = "passkeyLoginCancelled";
    pub const ENROLLMENT_CANCELLED: &str = "enrollmentCancelled";
    pub const ORIGIN: &str = "origin";
    pub const ERROR_MESSAGE: &str = "errorMessage";
    pub const AUTO_SUBMIT: &str = "autoSubmit";
    pub const OTP: &str = "otp";
}

/// Durable state of one login attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Current UI mode. `None` until a challenge round selects one.
    pub mode: Option<ClientMode>,
    /// Transaction of the primary OTP/push challenge round.
    pub transaction_id: Option<String>,
    /// A passkey challenge may arrive under a different transaction than the
    /// primary challenge; tracked separately.
    pub passkey_transaction_id: Option<String>,
    /// Push-poll reload count. Starts at 1.
    pub load_counter: u32,
    pub message: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// One-shot phase guard: the trigger-challenge flow already ran.
    pub trigger_challenge_done: bool,
    /// One-shot phase guard: the static-pass flow already ran.
    pub static_pass_done: bool,
    /// Terminal flag: authentication accepted. Later submissions
    /// short-circuit to success without touching the server.
    pub success: bool,
    /// Terminal flag: this user is exempt from MFA.
    pub no_auth_required: bool,
    pub auto_submit: bool,
    /// The password and OTP are collected in separate input fields.
    pub separate_otp: bool,
    /// Username resolved by the server (passkey flows).
    pub username: Option<String>,
    pub webauthn_sign_request: Option<String>,
    pub passkey_challenge: Option<String>,
    pub passkey_registration: Option<String>,
    pub passkey_registration_serial: Option<String>,
    pub push_available: bool,
    pub otp_available: bool,
    pub img_webauthn: Option<String>,
    pub img_push: Option<String>,
    pub img_smartphone: Option<String>,
    pub img_otp: Option<String>,
    pub enrollment_link: Option<String>,
    pub enroll_via_multichallenge: bool,
    pub enroll_via_multichallenge_optional: bool,
    pub poll_in_browser_failed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: None,
            transaction_id: None,
            passkey_transaction_id: None,
            load_counter: 1,
            message: None,
            error_code: None,
            error_message: None,
            trigger_challenge_done: false,
            static_pass_done: false,
            success: false,
            no_auth_required: false,
            auto_submit: false,
            separate_otp: false,
            username: None,
            webauthn_sign_request: None,
            passkey_challenge: None,
            passkey_registration: None,
            passkey_registration_serial: None,
            push_available: false,
            otp_available: false,
            img_webauthn: None,
            img_push: None,
            img_smartphone: None,
            img_otp: None,
            enrollment_link: None,
            enroll_via_multichallenge: false,
            enroll_via_multichallenge_optional: false,
            poll_in_browser_failed: false,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all passkey-login state. Called on any terminal outcome of the
    /// passkey path so a stale transaction id can never be replayed.
    pub fn clear_passkey_login(&mut self) {
        self.passkey_challenge = None;
        self.passkey_transaction_id = None;
    }

    /// Drop a pending enrollment-during-login registration.
    pub fn clear_passkey_registration(&mut self) {
        self.passkey_registration = None;
        self.passkey_registration_serial = None;
    }

    /// Flatten the post-step state into the key-value map the host renders
    /// from. Only set fields appear; `message` falls back to the given
    /// default prompt.
    pub fn template_state(&self, default_message: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                out.insert(key.to_string(), value);
            }
        };

        put(fields::MODE, self.mode.as_ref().map(|m| m.as_str().to_string()));
        put(fields::TRANSACTION_ID, self.transaction_id.clone());
        put(fields::LOAD_COUNTER, Some(self.load_counter.to_string()));
        put(
            "message",
            Some(
                self.message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| default_message.to_string()),
            ),
        );
        put(fields::ERROR_MESSAGE, self.error_message.clone());
        put(fields::WEBAUTHN_SIGN_REQUEST, self.webauthn_sign_request.clone());
        put(fields::PASSKEY_CHALLENGE, self.passkey_challenge.clone());
        put(fields::PASSKEY_REGISTRATION, self.passkey_registration.clone());
        put(
            "passkeyRegistrationSerial",
            self.passkey_registration_serial.clone(),
        );
        put("imgWebauthn", self.img_webauthn.clone());
        put("imgPush", self.img_push.clone());
        put("imgSmartphone", self.img_smartphone.clone());
        put("imgOtp", self.img_otp.clone());
        put("link", self.enrollment_link.clone());

        let mut flag = |key: &str, value: bool| {
            if value {
                out.insert(key.to_string(), "1".to_string());
            }
        };
        flag("isPushAvailable", self.push_available);
        flag("otpAvailable", self.otp_available);
        flag("isEnrollViaMultichallenge", self.enroll_via_multichallenge);
        flag(
            "isEnrollViaMultichallengeOptional",
            self.enroll_via_multichallenge_optional,
        );
        flag("separateOTP", self.separate_otp);
        flag("pollInBrowserFailed", self.poll_in_browser_failed);
        flag(fields::AUTO_SUBMIT, self.auto_submit);

        out
    }
}

/// Delay before the next push-poll reload.
///
/// The schedule is a UI cadence, not a correctness value: it is
/// monotonically non-increasing and bounded below by a positive floor so a
/// long-pending push cannot turn into a request storm.
pub fn poll_delay(load_counter: u32) -> Duration {
    const SCHEDULE: [u64; 3] = [4, 3, 2];
    let index = (load_counter.max(1) as usize - 1).min(SCHEDULE.len() - 1);
    Duration::from_secs(SCHEDULE[index])
}
