use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatekeyError {
    /// The transport could not complete the exchange. This is the only
    /// condition that aborts a whole submission; it is never retried here.
    #[cfg(feature = "network")]
    #[error("unable to reach the authentication server: {0}")]
    UnreachableServer(#[from] reqwest::Error),

    #[error("empty response from the authentication server")]
    EmptyResponse,

    #[error("malformed response from the authentication server: {0}")]
    MalformedResponse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The submission did not end in an accepted authentication. The message
    /// is user-facing; a blank message means "re-render without an error
    /// banner".
    #[error("{message}")]
    AuthFailure { message: String },
}

impl GatekeyError {
    /// Re-prompt the user with the given message.
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Re-prompt the user without showing an error banner.
    pub fn silent_reprompt() -> Self {
        Self::AuthFailure {
            message: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatekeyError>;
