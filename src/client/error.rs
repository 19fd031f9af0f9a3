// src/client/error.rs

use std::fmt;

use crate::exam::ExamError;

/// Errors seen by the candidate client.
#[derive(Debug)]
pub enum ClientError {
    /// The request never got an HTTP answer.
    Transport(reqwest::Error),
    /// The backend answered with a non-success status.
    Api { status: u16, message: String },
    /// The local state machine refused the operation.
    Exam(ExamError),
    /// The local store could not be read or written.
    Store(String),
    InvalidBaseUrl(String),
    /// No session has been started or resumed.
    NoSession,
    /// A final submission for this session is already running.
    SubmissionInFlight,
}

impl ClientError {
    /// Whether trying again later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "network error: {}", e),
            ClientError::Api { status, message } => write!(f, "server returned {}: {}", status, message),
            ClientError::Exam(e) => write!(f, "{}", e),
            ClientError::Store(msg) => write!(f, "local store error: {}", msg),
            ClientError::InvalidBaseUrl(url) => write!(f, "invalid backend url '{}'", url),
            ClientError::NoSession => write!(f, "no exam session"),
            ClientError::SubmissionInFlight => write!(f, "submission already in progress"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(e),
            ClientError::Exam(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err)
    }
}

impl From<ExamError> for ClientError {
    fn from(err: ExamError) -> Self {
        ClientError::Exam(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Store(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Store(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidBaseUrl(err.to_string())
    }
}
