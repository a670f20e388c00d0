//! Login form and attempt outcomes.

use std::fmt;

use url::Url;

/// Username/password pair supplied by a [`CredentialSource`](crate::CredentialSource).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields present after trimming.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Captcha reference embedded in a login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    /// Cache-busting reference (millisecond timestamp).
    pub id: String,
    pub image_url: Url,
}

/// One-time login form.
///
/// Invariant: `execution_token` is non-empty. A descriptor is valid for a
/// single submission; every attempt fetches a fresh one.
#[derive(Debug, Clone)]
pub struct LoginPageDescriptor {
    pub execution_token: String,
    pub submit_url: Url,
    pub captcha: Option<CaptchaChallenge>,
    /// Password encryption salt, when the page publishes one.
    pub salt: Option<String>,
    /// Other named inputs echoed back on submission.
    pub hidden_fields: Vec<(String, String)>,
}

impl LoginPageDescriptor {
    #[must_use]
    pub fn requires_captcha(&self) -> bool {
        self.captcha.is_some()
    }

    #[must_use]
    pub fn hidden_field(&self, name: &str) -> Option<&str> {
        self.hidden_fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of fetching the login page for a service.
#[derive(Debug, Clone)]
pub enum LoginPage {
    Form(LoginPageDescriptor),
    /// The identity provider redirected straight to the service.
    AlreadyAuthenticated(Url),
}

/// Terminal refusals by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadCredentials,
    AccountLocked,
    Throttled,
}

impl Rejection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadCredentials => "bad_credentials",
            Self::AccountLocked => "account_locked",
            Self::Throttled => "throttled",
        }
    }
}

/// Classified result of one login submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Carries the URL the identity provider redirected to.
    Authenticated(Url),
    CaptchaRejected,
    StillUnauthenticated,
    TransportFailure(String),
    Rejected(Rejection),
}

impl LoginOutcome {
    /// Outcomes worth another attempt with a fresh descriptor.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CaptchaRejected | Self::StillUnauthenticated | Self::TransportFailure(_)
        )
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticated(_) => "authenticated",
            Self::CaptchaRejected => "captcha_rejected",
            Self::StillUnauthenticated => "still_unauthenticated",
            Self::TransportFailure(_) => "transport_failure",
            Self::Rejected(r) => r.as_str(),
        }
    }
}

/// Identity-provider session state as inferred from a login-page redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Valid,
    Expired,
}

/// Bounded counter of login submissions for one authentication round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    max: u32,
    used: u32,
}

impl AttemptBudget {
    /// A budget of zero is raised to one.
    #[must_use]
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            used: 0,
        }
    }

    /// Consume one unit. Returns `false` when nothing is left.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[must_use]
    pub fn max(&self) -> u32 {
        self.max
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max - self.used
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// Billing warm-up result. Never fails the renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUp {
    Established,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// No credentials cached; nothing was sent.
    NoCredentials,
    Ready { logged_in: bool, warm_up: WarmUp },
}
