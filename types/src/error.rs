//! Classified session errors.
//!
//! Every failure that reaches a caller carries a stable [`ErrorCode`] so the
//! caller can decide between re-prompting for credentials, asking the user to
//! retry, or reporting an outage. Messages are human-readable; codes are the
//! contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session error with a stable classification.
///
/// - `code`: stable error code
/// - `message`: human-readable description
/// - `retryability`: whether the failing operation may succeed if repeated
/// - `details`: optional error-specific context
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SsoError {
    /// Stable error code.
    pub code: ErrorCode,

    /// Human-readable description.
    pub message: String,

    /// Whether retry may succeed.
    pub retryability: Retryability,

    /// Error-specific context.
    pub details: ErrorDetails,
}

impl SsoError {
    /// Create an error whose retryability follows the code's default.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryability: code.default_retryability(),
            details: ErrorDetails::default(),
        }
    }

    pub fn credentials_absent(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CredentialsAbsent, message)
    }

    pub fn captcha_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CaptchaRejected, message)
    }

    pub fn still_unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StillUnauthenticated, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transport, message)
    }

    pub fn authorization_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthorizationDenied, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Add a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.0.push((key.into(), value.into()));
        self
    }

    /// Mark the error as final for the current call.
    ///
    /// Used once a component has exhausted its own retry budget: the
    /// classification stays, only the retry hint changes.
    #[must_use]
    pub fn into_terminal(mut self) -> Self {
        self.retryability = Retryability::NotRetryable;
        self
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryability == Retryability::Retryable
    }

    /// Look up a detail value by key.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to JSON for callers that report errors across a boundary.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code,
            "message": self.message,
            "retryable": self.is_retryable(),
        });

        if !self.details.0.is_empty() {
            let details: serde_json::Map<String, serde_json::Value> = self
                .details
                .0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            obj["details"] = serde_json::Value::Object(details);
        }

        obj
    }
}

impl Serialize for SsoError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retryability {
    Retryable,
    NotRetryable,
}

impl Retryability {
    #[must_use]
    pub const fn from_bool(retryable: bool) -> Self {
        if retryable {
            Self::Retryable
        } else {
            Self::NotRetryable
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No cached credentials; re-prompt the user.
    CredentialsAbsent,
    /// The identity provider rejected the captcha answer.
    CaptchaRejected,
    /// Submission did not leave the login page.
    StillUnauthenticated,
    /// The identity provider rejected the username/password.
    CredentialsRejected,
    /// The account is locked by the identity provider.
    AccountLocked,
    /// IP frozen by the identity provider, or relogin cooldown active.
    Throttled,
    /// Network, timeout, or unusable response.
    Transport,
    /// The downstream service still refuses after a relogin.
    AuthorizationDenied,
    /// Malformed URL or request parameters.
    InvalidInput,
}

impl ErrorCode {
    /// Retryability of a fresh error with this code.
    ///
    /// Transient codes become terminal once the owning component exhausts
    /// its budget (see [`SsoError::into_terminal`]).
    #[must_use]
    pub fn default_retryability(&self) -> Retryability {
        Retryability::from_bool(matches!(
            self,
            ErrorCode::CaptchaRejected | ErrorCode::StillUnauthenticated | ErrorCode::Transport
        ))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CredentialsAbsent => "credentials_absent",
            Self::CaptchaRejected => "captcha_rejected",
            Self::StillUnauthenticated => "still_unauthenticated",
            Self::CredentialsRejected => "credentials_rejected",
            Self::AccountLocked => "account_locked",
            Self::Throttled => "throttled",
            Self::Transport => "transport",
            Self::AuthorizationDenied => "authorization_denied",
            Self::InvalidInput => "invalid_input",
        }
    }
}

/// Error details as key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails(pub Vec<(String, String)>);
