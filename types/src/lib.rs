//! Core domain types for casgate.
//!
//! This crate contains pure domain types with no IO and no async runtime:
//! the error taxonomy, login and token values, resolved settings, and the
//! collaborator traits (`Transport`, `CredentialSource`, `CaptchaSolver`,
//! `PasswordEncoder`) the session core is written against.

mod collab;
mod error;
mod login;
mod settings;
mod token;
mod transport;

pub use collab::{CaptchaSolver, CredentialSource, PasswordEncoder, PlainPassword, SolveFut};
pub use error::{ErrorCode, ErrorDetails, Retryability, SsoError};
pub use login::{
    AttemptBudget, CaptchaChallenge, Credentials, LoginOutcome, LoginPage, LoginPageDescriptor,
    Rejection, RenewOutcome, SessionState, WarmUp,
};
pub use settings::{
    DEFAULT_ATTEMPT_BUDGET, DEFAULT_BILLING_ENTRY_PATH, DEFAULT_BILLING_REFRESH_PATH,
    DEFAULT_BILLING_TOKEN_PATH, DEFAULT_CAPTCHA_PATH, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_INITIAL_BACKOFF, DEFAULT_JITTER_FACTOR, DEFAULT_LOGIN_PATH, DEFAULT_MAX_BACKOFF,
    DEFAULT_MAX_REDIRECTS, DEFAULT_ORG_ID, DEFAULT_RELOGIN_COOLDOWN, DEFAULT_REVALIDATE_AFTER,
    DEFAULT_SERVICE_ID, DEFAULT_TIMEOUT, DEFAULT_TOKEN_PATTERN, DEFAULT_TRANSPORT_RETRIES,
    DEFAULT_USER_AGENT, DEFAULT_VALIDITY_ENDPOINTS, Endpoints, Markers, PasswordEncoding,
    ReloginFailurePolicy, RetryPolicy, SessionSettings, TransportSettings, ValidityEndpoint,
    join_base,
};
pub use token::{ServiceId, ServiceToken, TokenCheck, TokenGrant, TokenSignal};
pub use transport::{
    HttpExchange, HttpRequest, Method, RedirectHop, RequestBody, Transport, TransportFut,
    query_param,
};

// Re-exported so downstream crates agree on one `Url` type.
pub use url::Url;
