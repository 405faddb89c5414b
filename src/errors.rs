use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action_parser::ParseError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error ({status}): {message}")]
    LlmProvider { status: u16, message: String },

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Empty model response")]
    EmptyResponse,

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Operator error: {0}")]
    Operator(String),

    #[error("Action parse error: {0}")]
    ActionParse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Task cancelled")]
    Cancelled,
}

/// How the retry layer and the control loop treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The run was aborted. Never retried, never reported through `on_error`.
    Cancelled,
    /// Worth another attempt under the stage's retry policy.
    Transient,
    /// Retrying cannot help.
    Fatal,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::LlmProvider { status, .. } => {
                // 408 and 429 are the only client errors a retry can fix.
                if (400..500).contains(status) && *status != 408 && *status != 429 {
                    ErrorKind::Fatal
                } else {
                    ErrorKind::Transient
                }
            }
            AgentError::SseParsing(_)
            | AgentError::EmptyResponse
            | AgentError::Perception(_)
            | AgentError::Operator(_)
            | AgentError::Io(_)
            | AgentError::Http(_) => ErrorKind::Transient,
            AgentError::Config(_)
            | AgentError::ActionParse(_)
            | AgentError::Json(_)
            | AgentError::TomlDe(_)
            | AgentError::TomlSer(_)
            | AgentError::Image(_)
            | AgentError::Base64(_)
            | AgentError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl serde::Serialize for AgentError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Stable codes reported to observers alongside a failed or exhausted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvokeRetryError,
    ReachMaxLoop,
    TooManyScreenshotErrors,
    EnvironmentError,
    Unknown,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::InvokeRetryError => -100_001,
            ErrorCode::ReachMaxLoop => -100_003,
            ErrorCode::TooManyScreenshotErrors => -100_004,
            ErrorCode::EnvironmentError => -100_005,
            ErrorCode::Unknown => -100_099,
        }
    }
}

/// Error details attached to a run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stack: None,
        }
    }

    /// Builds a payload whose `stack` is the error's source chain.
    pub fn from_error(code: ErrorCode, error: &AgentError) -> Self {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            code,
            message: error.to_string(),
            stack: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\ncaused by: "))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(AgentError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(AgentError::EmptyResponse.kind(), ErrorKind::Transient);
        assert_eq!(AgentError::Operator("boom".into()).kind(), ErrorKind::Transient);
        assert_eq!(AgentError::Config("missing".into()).kind(), ErrorKind::Fatal);
        assert_eq!(
            AgentError::LlmProvider { status: 401, message: "unauthorized".into() }.kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            AgentError::LlmProvider { status: 429, message: "slow down".into() }.kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            AgentError::LlmProvider { status: 503, message: "unavailable".into() }.kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_error_serializes_as_display_string() {
        let json = serde_json::to_string(&AgentError::Operator("no window".into())).unwrap();
        assert_eq!(json, "\"Operator error: no window\"");
    }

    #[test]
    fn test_payload_codes() {
        let payload = ErrorPayload::from_error(ErrorCode::InvokeRetryError, &AgentError::EmptyResponse);
        assert_eq!(payload.message, "Empty model response");
        assert!(payload.stack.is_none());
        assert_eq!(payload.code.as_i32(), -100_001);
    }

    #[test]
    fn test_reported_codes() {
        let codes = [
            (ErrorCode::InvokeRetryError, "\"INVOKE_RETRY_ERROR\"", -100_001),
            (ErrorCode::ReachMaxLoop, "\"REACH_MAX_LOOP\"", -100_003),
            (ErrorCode::TooManyScreenshotErrors, "\"TOO_MANY_SCREENSHOT_ERRORS\"", -100_004),
            (ErrorCode::EnvironmentError, "\"ENVIRONMENT_ERROR\"", -100_005),
            (ErrorCode::Unknown, "\"UNKNOWN\"", -100_099),
        ];
        for (code, json, number) in codes {
            assert_eq!(serde_json::to_string(&code).unwrap(), json);
            assert_eq!(code.as_i32(), number);
        }
    }
}
