//! Gatekey Core - MFA challenge-response bridge
//!
//! This crate implements the server-side half of a multi-factor
//! authentication plugin: it drives a login attempt against a remote MFA
//! server through zero or more rounds of challenge issuance, client-side
//! credential ceremonies, push polling, and verification, while reconciling
//! the competing authentication modes (OTP, push, WebAuthn, passkey).
//!
//! # Features
//!
//! - Typed parsing of the server's validate/auth responses
//! - A challenge-response state machine with explicit per-attempt session
//!   state
//! - Push confirmation via polling with a bounded reload cadence
//! - WebAuthn and passkey ceremonies, including enrollment during login
//! - Admin-gated service-account tokens for triggering challenges
//!
//! The browser half lives in the companion `gatekey-wasm` crate; the data
//! contracts it shares with this crate (ceremony payloads, form-field
//! names) compile without the `network` feature.
//!
//! # Example
//!
//! ```no_run
//! use gatekey_core::{
//!     AuthOrchestrator, MfaClient, PluginConfig, SessionState, Submission,
//! };
//! # async fn example(config: PluginConfig) -> gatekey_core::Result<()> {
//! let client = MfaClient::new(config.server.clone())?;
//! let orchestrator = AuthOrchestrator::new(&client, &config);
//!
//! let mut session = SessionState::new();
//! orchestrator.begin_login("alice", true, &mut session, &[]).await?;
//!
//! // One pass per form submission until the attempt is accepted.
//! let submission = Submission {
//!     challenge: "123456".to_string(),
//!     ..Submission::default()
//! };
//! let accepted = orchestrator.verify("alice", &mut session, &submission).await?;
//! # let _ = accepted;
//! # Ok(())
//! # }
//! ```

pub mod ceremony;
pub mod challenge;
pub mod config;
pub mod error;
pub mod policy;
pub mod response;
pub mod session;

#[cfg(feature = "network")]
pub mod client;
#[cfg(feature = "network")]
pub mod orchestrator;

// Re-export main types for convenience
pub use challenge::{Challenge, ChallengeSet, ClientMode, TokenKind};
pub use config::{AuthFlow, ConfigSource, MfaServerConfig, PluginConfig};
pub use error::{GatekeyError, Result};
pub use policy::{GateContext, GroupMode, MfaGatePolicy};
pub use response::{AuthResult, AuthenticationStatus};
pub use session::{fields, poll_delay, SessionState};

#[cfg(feature = "network")]
pub use client::{MfaApi, MfaClient};
#[cfg(feature = "network")]
pub use orchestrator::{AuthOrchestrator, Submission};
