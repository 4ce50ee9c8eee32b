//! The authentication state machine.
//!
//! One login attempt is a sequence of synchronous passes: the host calls
//! [`AuthOrchestrator::begin_login`] once at first render and
//! [`AuthOrchestrator::verify`] on every form submission, with the
//! [`SessionState`] carried between passes. `verify` returns `Ok(true)` only
//! on an accepted authentication; every other outcome is an
//! [`GatekeyError::AuthFailure`] whose message is shown to the user (a blank
//! message re-renders without an error banner).
//!
//! The branch order within one pass is fixed: terminal fast path, local mode
//! switch, passkey assertion, passkey cancellation, enrollment cancellation,
//! registration completion, then the mode dispatch (push poll / WebAuthn /
//! OTP check) and the shared verdict computation.

use tracing::{debug, error, info, warn};

use crate::challenge::{ClientMode, TokenKind};
use crate::client::{ForwardHeaders, MfaApi};
use crate::config::{AuthFlow, PluginConfig};
use crate::error::{GatekeyError, Result};
use crate::response::{AuthResult, AuthenticationStatus};
use crate::session::SessionState;

/// One form submission, decoded from the hidden-field contract by the host.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// The typed OTP (or whatever the active challenge asks for).
    pub challenge: String,
    /// Password prefix when password and OTP arrive in separate fields;
    /// concatenated in front of `challenge`.
    pub pass_prefix: Option<String>,
    pub mode: Option<ClientMode>,
    /// The user clicked a mode-switch button; re-render without a server
    /// call.
    pub mode_changed: bool,
    pub webauthn_sign_response: Option<String>,
    pub passkey_sign_response: Option<String>,
    pub passkey_login_cancelled: bool,
    pub enrollment_cancelled: bool,
    pub passkey_registration_response: Option<String>,
    pub origin: Option<String>,
    pub load_counter: Option<u32>,
    /// Headers the host resolved from its forward-headers configuration.
    pub headers: Vec<(String, String)>,
}

impl Submission {
    fn origin(&self) -> Option<&str> {
        self.origin.as_deref().filter(|o| !o.is_empty())
    }
}

/// Drives one login attempt against a remote MFA server.
pub struct AuthOrchestrator<'a, A: MfaApi + ?Sized> {
    api: &'a A,
    config: &'a PluginConfig,
}

impl<'a, A: MfaApi + ?Sized> AuthOrchestrator<'a, A> {
    pub fn new(api: &'a A, config: &'a PluginConfig) -> Self {
        Self { api, config }
    }

    /// First-render step: runs the configured authentication flow once and
    /// seeds the session with the resulting challenges.
    ///
    /// `mfa_required` is the host-evaluated gate verdict; an exempt user
    /// takes the no-auth-required fast path on the next submission.
    pub async fn begin_login(
        &self,
        username: &str,
        mfa_required: bool,
        session: &mut SessionState,
        headers: &ForwardHeaders,
    ) -> Result<()> {
        if !mfa_required {
            session.no_auth_required = true;
            return Ok(());
        }

        debug!(flow = ?self.config.auth_flow, "Selected authentication flow");
        match self.config.auth_flow {
            AuthFlow::TriggerChallenge => {
                if !self.config.server.service_account_available() {
                    error!(
                        "Service account name or password is not configured, \
                         cannot trigger challenges"
                    );
                } else if !session.trigger_challenge_done {
                    session.trigger_challenge_done = true;
                    match self.api.trigger_challenge(username, headers).await {
                        Ok(Some(response)) => self.process_response(session, &response),
                        Ok(None) => {
                            error!("No response from the MFA server for trigger-challenge");
                        }
                        Err(e) => record_unreachable(session, &e),
                    }
                }
            }
            AuthFlow::SendStaticPass => {
                // The static pass may already complete the authentication
                // (pass-on-no-token policy); otherwise it triggers the
                // challenges.
                if !session.static_pass_done {
                    session.static_pass_done = true;
                    match self
                        .api
                        .check(username, &self.config.static_pass, None, headers)
                        .await
                    {
                        Ok(Some(response)) => {
                            if response.authentication_status == AuthenticationStatus::Accept {
                                session.success = true;
                            } else {
                                self.process_response(session, &response);
                            }
                        }
                        Ok(None) => {
                            error!("No response from the MFA server for the static pass");
                        }
                        Err(e) => record_unreachable(session, &e),
                    }
                }
            }
            AuthFlow::SeparateOtp => session.separate_otp = true,
            AuthFlow::Default => {}
        }
        Ok(())
    }

    /// Verify one submission. The single entry point the host calls.
    pub async fn verify(
        &self,
        username: &str,
        session: &mut SessionState,
        submission: &Submission,
    ) -> Result<bool> {
        // Exempt users and idempotent re-submission after success.
        if session.no_auth_required || session.success {
            session.success = true;
            session.auto_submit = true;
            return Ok(true);
        }

        if let Some(mode) = &submission.mode {
            session.mode = Some(mode.clone());
        }
        let headers = submission.headers.as_slice();

        // A mode switch is a local UI transition, not a protocol step.
        if submission.mode_changed {
            return Err(GatekeyError::silent_reprompt());
        }

        if let Some(outcome) = self
            .handle_passkey_assertion(session, submission, headers)
            .await?
        {
            return outcome;
        }

        // Passkey login cancelled by the user: drop the challenge and fall
        // back to OTP.
        if submission.passkey_login_cancelled {
            session.clear_passkey_login();
            session.mode = Some(ClientMode::Otp);
            return Err(GatekeyError::silent_reprompt());
        }

        if submission.enrollment_cancelled {
            let transaction_id = session.transaction_id.clone().unwrap_or_default();
            if let Some(response) = self.api.cancel_enrollment(&transaction_id, headers).await? {
                if let Some(message) = nonempty(&response.error_message) {
                    return Err(GatekeyError::auth_failure(message));
                }
                if response.is_authentication_successful() {
                    // Cleared only on confirmed cancellation; on error the
                    // enrollment stays retryable.
                    session.clear_passkey_registration();
                    session.success = true;
                    return Ok(true);
                }
            }
        }

        // Enrollment via multichallenge: the registration response arrives
        // after the authentication itself already succeeded.
        if let Some(registration) = nonempty(&submission.passkey_registration_response) {
            let transaction_id = session.transaction_id.clone().unwrap_or_default();
            let serial = session.passkey_registration_serial.clone().unwrap_or_default();
            let origin = submission.origin().unwrap_or_default();
            if let Some(response) = self
                .api
                .complete_passkey_registration(
                    &transaction_id,
                    &serial,
                    username,
                    &registration,
                    origin,
                    headers,
                )
                .await?
            {
                if let Some(message) = nonempty(&response.error_message) {
                    return Err(GatekeyError::auth_failure(message));
                }
                if response.is_authentication_successful() {
                    session.clear_passkey_registration();
                    session.success = true;
                    return Ok(true);
                }
            }
        }

        // The mode this pass dispatches on; process_response may rewrite
        // session.mode before the verdict is computed.
        let dispatched_mode = session.mode.clone();
        let round = self
            .dispatch_mode(username, session, submission, headers)
            .await?;
        self.final_verdict(dispatched_mode, session, round)
    }

    /// Step 3: an attached passkey assertion. Returns `None` to fall through
    /// to the remaining branches.
    async fn handle_passkey_assertion(
        &self,
        session: &mut SessionState,
        submission: &Submission,
        headers: &ForwardHeaders,
    ) -> Result<Option<Result<bool>>> {
        let Some(sign_response) = nonempty(&submission.passkey_sign_response) else {
            return Ok(None);
        };
        let Some(origin) = submission.origin() else {
            debug!("Origin is missing for passkey authentication");
            return Ok(None);
        };
        let transaction_id = session.passkey_transaction_id.clone().unwrap_or_default();
        let Some(response) = self
            .api
            .check_passkey(&transaction_id, &sign_response, origin, headers)
            .await?
        else {
            return Ok(None);
        };

        if response.is_authentication_successful() {
            if !response.username.is_empty() {
                session.username = Some(response.username.clone());
            }
            session.clear_passkey_login();
            session.success = true;
            return Ok(Some(Ok(true)));
        }
        match response.authentication_status {
            AuthenticationStatus::Challenge => {
                // Enrollment continuation or a follow-up round.
                self.process_response(session, &response);
                Ok(Some(Err(GatekeyError::silent_reprompt())))
            }
            AuthenticationStatus::Reject => {
                error!("Passkey authentication rejected");
                // Terminal for the passkey path: never replay this
                // transaction id.
                session.clear_passkey_login();
                session.error_message = Some("Passkey authentication rejected!".to_string());
                session.mode = Some(ClientMode::Otp);
                Ok(Some(Err(GatekeyError::silent_reprompt())))
            }
            _ => {
                if let Some(message) = nonempty(&response.error_message) {
                    Ok(Some(Err(GatekeyError::auth_failure(message))))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Step 7: dispatch on the current mode and run one protocol exchange.
    async fn dispatch_mode(
        &self,
        username: &str,
        session: &mut SessionState,
        submission: &Submission,
        headers: &ForwardHeaders,
    ) -> Result<Option<AuthResult>> {
        let transaction_id = session.transaction_id.clone();
        match session.mode.clone() {
            Some(ClientMode::Push) => {
                debug!("Processing push response");
                let tid = transaction_id.unwrap_or_default();
                let mut round = None;
                if self.api.poll_transaction(&tid, headers).await? {
                    // Confirmed out-of-band; an empty-pass check retrieves
                    // the final verdict.
                    if let Some(response) =
                        self.api.check(username, "", Some(&tid), headers).await?
                    {
                        self.process_response(session, &response);
                        round = Some(response);
                    }
                } else {
                    debug!("Push not confirmed yet");
                }
                if let Some(counter) = submission.load_counter {
                    session.load_counter = counter.saturating_add(1);
                }
                Ok(round)
            }
            Some(ClientMode::WebAuthn) => {
                let sign_response = nonempty(&submission.webauthn_sign_response);
                let origin = submission.origin().unwrap_or_default();
                let Some(sign_response) = sign_response else {
                    error!(
                        "Incomplete data for WebAuthn authentication: \
                         sign response is missing"
                    );
                    return Ok(None);
                };
                let tid = transaction_id.unwrap_or_default();
                match self
                    .api
                    .check_webauthn(username, &tid, &sign_response, origin, headers)
                    .await?
                {
                    Some(response) => {
                        self.process_response(session, &response);
                        Ok(Some(response))
                    }
                    None => Ok(None),
                }
            }
            _ => {
                let pass = match &submission.pass_prefix {
                    Some(prefix) => format!("{prefix}{}", submission.challenge),
                    None => submission.challenge.clone(),
                };
                if let Some(tid) = &transaction_id {
                    debug!(transaction_id = %tid, "Transaction-scoped check");
                }
                match self
                    .api
                    .check(username, &pass, transaction_id.as_deref(), headers)
                    .await?
                {
                    Some(response) => {
                        self.process_response(session, &response);
                        Ok(Some(response))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Step 9: compute the submission's verdict from the protocol round.
    fn final_verdict(
        &self,
        dispatched_mode: Option<ClientMode>,
        session: &mut SessionState,
        round: Option<AuthResult>,
    ) -> Result<bool> {
        let Some(result) = round else {
            return Err(GatekeyError::silent_reprompt());
        };
        if let Some(message) = nonempty(&result.error_message) {
            return Err(GatekeyError::auth_failure(message));
        }
        if result.status {
            if result.authentication_status == AuthenticationStatus::Accept {
                debug!("User authenticated successfully");
                session.success = true;
                return Ok(true);
            }
            let message = if result.messages.is_empty() {
                result.message.clone()
            } else {
                result.messages.clone()
            };
            debug!(message = %message, "Authentication continues");
            session.message = Some(message.clone());
            return Err(GatekeyError::auth_failure(message));
        }
        if dispatched_mode == Some(ClientMode::Push) {
            // Not yet confirmed is not a failure.
            debug!("Push not confirmed yet");
            return Err(GatekeyError::silent_reprompt());
        }
        error!(
            code = ?result.error_code,
            message = ?result.error_message,
            "Authentication request failed"
        );
        Err(GatekeyError::auth_failure(format!(
            "Failed to authenticate. {}",
            result.error_message.as_deref().unwrap_or_default()
        )))
    }

    /// Step 8: fold a challenge-carrying response into the session.
    fn process_response(&self, session: &mut SessionState, result: &AuthResult) {
        session.mode = Some(ClientMode::Otp);
        if !result.transaction_id.is_empty() {
            session.transaction_id = Some(result.transaction_id.clone());
        }
        if !result.challenges.is_empty() {
            if let Some(preferred) = &result.preferred_client_mode {
                session.mode = Some(preferred.clone());
                debug!(mode = %preferred.as_str(), "Preferred client mode");
            }
            session.push_available = result.challenges.push_available();
            session.otp_available = true;
            session.message = Some(result.messages.clone());

            if result.challenges.contains_kind(&TokenKind::WebAuthn) {
                session.webauthn_sign_request = result.challenges.merged_webauthn_sign_request();
            }
            if let Some(registration) = &result.passkey_registration {
                session.passkey_registration = Some(registration.clone());
                session.message = Some(result.message.clone());
                session.passkey_registration_serial =
                    Some(result.passkey_registration_serial.clone());
            }
            // The passkey challenge may run under its own transaction.
            if let Some(challenge) = &result.passkey_challenge {
                session.passkey_challenge = Some(challenge.clone());
                session.passkey_transaction_id = Some(result.transaction_id.clone());
            }

            let enrolling = result
                .challenges
                .iter()
                .any(|c| c.enroll_via_multichallenge);
            for challenge in result.challenges.iter() {
                if let Some(image) = &challenge.image {
                    match (&challenge.client_mode, &challenge.kind) {
                        (Some(ClientMode::Otp), _) => {
                            session.img_otp = Some(image.clone());
                            if enrolling {
                                session.mode = Some(ClientMode::Otp);
                            }
                        }
                        (Some(ClientMode::Push), TokenKind::Push) => {
                            session.img_push = Some(image.clone());
                            if enrolling {
                                session.mode = Some(ClientMode::Push);
                            }
                        }
                        (Some(ClientMode::Push), TokenKind::Smartphone) => {
                            session.img_smartphone = Some(image.clone());
                            if enrolling {
                                session.mode = Some(ClientMode::Push);
                            }
                        }
                        (Some(ClientMode::WebAuthn), _) => {
                            session.img_webauthn = Some(image.clone());
                            if enrolling {
                                session.mode = Some(ClientMode::WebAuthn);
                            }
                        }
                        _ => {}
                    }
                }
                if let Some(link) = &challenge.enrollment_link {
                    session.enrollment_link = Some(link.clone());
                }
                if challenge.enroll_via_multichallenge {
                    session.enroll_via_multichallenge = true;
                }
                if challenge.enroll_via_multichallenge_optional {
                    session.enroll_via_multichallenge_optional = true;
                }
            }
        } else if result.is_error() {
            error!(
                code = ?result.error_code,
                message = ?result.error_message,
                "Server reported an error"
            );
            session.error_code = result.error_code.clone();
            session.error_message = result.error_message.clone();
        } else if result.authentication_status == AuthenticationStatus::Accept {
            // True accept with no residual challenges; the caller finalizes.
            info!(message = %result.message, "Authentication accepted");
        } else {
            warn!(message = %result.message, "Unexpected response shape");
            session.error_message = Some(result.message.clone());
        }
    }
}

fn record_unreachable(session: &mut SessionState, error: &GatekeyError) {
    error!(error = %error, "MFA server exchange failed");
    session.error_message = Some(error.to_string());
}

fn nonempty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}
