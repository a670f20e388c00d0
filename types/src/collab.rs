//! Collaborator seams supplied by the embedding application.

use std::future::Future;
use std::pin::Pin;

use crate::{CaptchaChallenge, Credentials, SsoError};

/// Captcha solver future type alias.
pub type SolveFut<'a> = Pin<Box<dyn Future<Output = Result<String, SsoError>> + Send + 'a>>;

/// Supplies the cached username/password, if any.
///
/// Absence is an expected state (the user never logged in, or logged out),
/// not an error.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

/// Turns a captcha image into an answer string.
pub trait CaptchaSolver: Send + Sync {
    fn solve<'a>(&'a self, challenge: &'a CaptchaChallenge, image: &'a [u8]) -> SolveFut<'a>;
}

/// Transforms the plaintext password before it is submitted.
///
/// Identity providers that publish a salt on the login page usually expect
/// the password encrypted with it.
pub trait PasswordEncoder: Send + Sync {
    fn encode(&self, password: &str, salt: Option<&str>) -> Result<String, SsoError>;
}

/// Submits the password as typed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPassword;

impl PasswordEncoder for PlainPassword {
    fn encode(&self, password: &str, _salt: Option<&str>) -> Result<String, SsoError> {
        Ok(password.to_string())
    }
}
