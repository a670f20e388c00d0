//! SSO session renewal and billing token acquisition.
//!
//! The flow, outermost first:
//!
//! - [`SessionManager::ensure_token`] reuses, validates or acquires a token
//! - [`TokenAcquirer`] runs SSO passes against the billing entry, and asks
//!   the renewer for at most one relogin
//! - [`SessionRenewer`] checks the portal session under a login gate and
//!   runs a bounded [`LoginAttempter`] round when it has expired
//! - [`LoginPageFetcher`] parses one-time login forms
//!
//! All HTTP goes through the [`Transport`] held by the [`SessionContext`];
//! all response heuristics go through its [`ResponseClassifier`].

mod classify;
mod credentials;
mod encrypt;
mod form;
mod login;
mod orchestrator;
mod renew;
mod retry;
mod token;
mod validate;

use std::sync::Arc;

use casgate_types::{SessionSettings, SsoError, Transport};

pub use classify::{MarkerClassifier, PageClass, ResponseClassifier};
pub use credentials::{MemoryCredentials, StaticCredentials};
pub use encrypt::{SaltedAesPassword, password_encoder};
pub use form::{CAPTCHA_FIELDS, Submission, parse_login_form};
pub use login::{LoginAttempter, LoginPageFetcher};
pub use orchestrator::{SessionManager, SessionManagerBuilder};
pub use renew::SessionRenewer;
pub use retry::{backoff_delay, get_with_retry};
pub use token::TokenAcquirer;
pub use validate::TokenValidator;

/// What every component shares: one transport (one cookie jar), the
/// resolved settings, and the classifier.
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub settings: Arc<SessionSettings>,
    pub classifier: Arc<dyn ResponseClassifier>,
}

impl SessionContext {
    /// Context using [`MarkerClassifier`]; fails if the configured token
    /// pattern does not compile.
    pub fn new(transport: Arc<dyn Transport>, settings: SessionSettings) -> Result<Self, SsoError> {
        let classifier = Arc::new(MarkerClassifier::new(&settings)?);
        Ok(Self {
            transport,
            settings: Arc::new(settings),
            classifier,
        })
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}
