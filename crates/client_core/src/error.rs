use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by the API client and the resource bindings.
///
/// Cloneable so a failed read can be handed to every observer of the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("server responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response payload: {0}")]
    Decode(String),
    #[error("request not issued: {0}")]
    PreconditionNotMet(&'static str),
    #[error("not signed in")]
    NotSignedIn,
    #[error("{0} is already in progress")]
    MutationInFlight(&'static str),
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            message
        };
        Self::Status {
            status: status.as_u16(),
            message,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for a toast or banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::Status { status: 401, .. } => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Status { status: 403, .. } => {
                "You do not have permission to do that.".to_string()
            }
            Self::Status { status, message } if message.trim().is_empty() => {
                format!("Request failed with status {status}.")
            }
            Self::Status { message, .. } => message.clone(),
            Self::Decode(_) => "The server sent a response we could not read.".to_string(),
            Self::PreconditionNotMet(reason) => format!("Missing information: {reason}."),
            Self::NotSignedIn => "Please sign in to continue.".to_string(),
            Self::MutationInFlight(name) => format!("Please wait, {name} is still running."),
            Self::InvalidConfig(reason) => format!("Client misconfigured: {reason}."),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::status(status, String::new());
        }
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
