//! Login page fetching and credential submission.

use std::sync::Arc;

use casgate_types::{
    AttemptBudget, CaptchaChallenge, CaptchaSolver, Credentials, ErrorCode, HttpRequest,
    LoginOutcome, LoginPage, PasswordEncoder, Rejection, SessionState, SsoError, Url,
};
use chrono::Utc;

use crate::SessionContext;
use crate::classify::PageClass;
use crate::form::{CAPTCHA_FIELDS, Submission, parse_login_form};
use crate::retry::backoff_delay;

/// Retrieves one-time login forms from the identity provider.
#[derive(Clone)]
pub struct LoginPageFetcher {
    ctx: SessionContext,
}

impl LoginPageFetcher {
    #[must_use]
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    /// GET `<idp>/login?service=<service>` and parse what comes back.
    ///
    /// Never retries; every call yields a fresh descriptor.
    pub async fn fetch(&self, service: &Url) -> Result<LoginPage, SsoError> {
        let endpoints = &self.ctx.settings.endpoints;
        let url = endpoints.login_url_for(service);
        let exchange = self.ctx.transport.send(HttpRequest::get(url)).await?;

        match self.ctx.classifier.login_page(&exchange) {
            PageClass::Throttled => Err(rejection_error(Rejection::Throttled)),
            PageClass::AlreadyAuthenticated => {
                tracing::debug!(
                    host = exchange.final_url.host_str().unwrap_or_default(),
                    "Identity provider redirected past the login form"
                );
                Ok(LoginPage::AlreadyAuthenticated(exchange.final_url))
            }
            PageClass::Form => {
                if !exchange.is_success() {
                    return Err(SsoError::transport(format!(
                        "login page returned HTTP {}",
                        exchange.status
                    ))
                    .with_detail("status", exchange.status.to_string()));
                }
                let descriptor = parse_login_form(
                    &exchange.text(),
                    &exchange.final_url,
                    &endpoints.captcha_url,
                    Utc::now().timestamp_millis(),
                )?;
                tracing::debug!(
                    execution_len = descriptor.execution_token.len(),
                    captcha = descriptor.requires_captcha(),
                    salted = descriptor.salt.is_some(),
                    fields = descriptor.hidden_fields.len(),
                    "Fetched login form"
                );
                Ok(LoginPage::Form(descriptor))
            }
        }
    }
}

/// Submits credentials against the identity provider.
#[derive(Clone)]
pub struct LoginAttempter {
    ctx: SessionContext,
    fetcher: LoginPageFetcher,
    solver: Option<Arc<dyn CaptchaSolver>>,
    encoder: Arc<dyn PasswordEncoder>,
}

impl LoginAttempter {
    #[must_use]
    pub fn new(
        ctx: SessionContext,
        solver: Option<Arc<dyn CaptchaSolver>>,
        encoder: Arc<dyn PasswordEncoder>,
    ) -> Self {
        Self {
            fetcher: LoginPageFetcher::new(ctx.clone()),
            ctx,
            solver,
            encoder,
        }
    }

    /// One submission with a freshly fetched descriptor.
    ///
    /// `Err` is reserved for failures no retry can fix (the password encoder
    /// refused); everything the identity provider says is an outcome.
    pub async fn attempt(
        &self,
        service: &Url,
        credentials: &Credentials,
    ) -> Result<LoginOutcome, SsoError> {
        let descriptor = match self.fetcher.fetch(service).await {
            Ok(LoginPage::Form(descriptor)) => descriptor,
            Ok(LoginPage::AlreadyAuthenticated(url)) => {
                return Ok(LoginOutcome::Authenticated(url));
            }
            Err(err) if err.code == ErrorCode::Throttled => {
                return Ok(LoginOutcome::Rejected(Rejection::Throttled));
            }
            Err(err) => return Ok(LoginOutcome::TransportFailure(err.message)),
        };

        let answer = match &descriptor.captcha {
            Some(challenge) => match self.solve_captcha(challenge).await {
                Ok(answer) => answer,
                Err(err) => return Ok(LoginOutcome::TransportFailure(err.message)),
            },
            None => None,
        };

        let password = self
            .encoder
            .encode(&credentials.password, descriptor.salt.as_deref())?;

        let mut form = Submission::from_descriptor(&descriptor);
        form.set_first(&["username", "loginname"], "username", &credentials.username);
        form.set_first(&["password", "passwd"], "password", &password);
        // Force the username/password flow over QR or dynamic-code login.
        form.set_first(&["cllt"], "cllt", "userNameLogin");
        form.set_first(&["dllt"], "dllt", "generalLogin");
        form.set_first(&["execution"], "execution", &descriptor.execution_token);
        form.set_first(&["_eventId"], "_eventId", "submit");
        form.set_first(&["rmShown"], "rmShown", "1");
        if let Some(answer) = answer.as_deref() {
            form.set_all(CAPTCHA_FIELDS, "captcha", answer);
        }

        let request = HttpRequest::post_form(descriptor.submit_url.clone(), form.into_fields());
        let exchange = match self.ctx.transport.send(request).await {
            Ok(exchange) => exchange,
            Err(err) => return Ok(LoginOutcome::TransportFailure(err.message)),
        };

        let outcome = self.ctx.classifier.submission(&exchange);
        tracing::debug!(
            status = exchange.status,
            outcome = outcome.kind(),
            "Login submission classified"
        );

        match outcome {
            LoginOutcome::Authenticated(url) if self.ctx.settings.retry.verify_after_login => {
                Ok(self.verify(service, url).await)
            }
            other => Ok(other),
        }
    }

    /// Bounded login loop over `budget`.
    ///
    /// Transient outcomes back off and retry with a fresh descriptor while
    /// budget remains; rejections return at once. Exhaustion reports the last
    /// transient classification as terminal.
    pub async fn run_round(
        &self,
        service: &Url,
        credentials: &Credentials,
        budget: &mut AttemptBudget,
    ) -> Result<Url, SsoError> {
        let policy = &self.ctx.settings.retry;
        let mut last_error: Option<SsoError> = None;

        while budget.try_consume() {
            let attempt = budget.used();
            match self.attempt(service, credentials).await? {
                LoginOutcome::Authenticated(url) => {
                    tracing::info!(attempt, "Identity provider login succeeded");
                    return Ok(url);
                }
                LoginOutcome::Rejected(rejection) => {
                    tracing::warn!(
                        attempt,
                        reason = rejection.as_str(),
                        "Identity provider rejected login"
                    );
                    return Err(
                        rejection_error(rejection).with_detail("attempts", attempt.to_string())
                    );
                }
                transient if transient.is_transient() => {
                    tracing::warn!(
                        attempt,
                        remaining = budget.remaining(),
                        outcome = transient.kind(),
                        "Login attempt failed"
                    );
                    last_error = Some(outcome_error(&transient));
                    if !budget.exhausted() {
                        tokio::time::sleep(backoff_delay(attempt - 1, policy)).await;
                    }
                }
                settled => {
                    return Err(outcome_error(&settled)
                        .with_detail("attempts", attempt.to_string())
                        .into_terminal());
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| SsoError::still_unauthenticated("login attempt budget exhausted"));
        Err(err
            .with_detail("attempts", budget.used().to_string())
            .into_terminal())
    }

    async fn solve_captcha(
        &self,
        challenge: &CaptchaChallenge,
    ) -> Result<Option<String>, SsoError> {
        let Some(solver) = &self.solver else {
            tracing::warn!("Captcha required but no solver configured");
            return Ok(None);
        };

        let exchange = self
            .ctx
            .transport
            .send(HttpRequest::get(challenge.image_url.clone()))
            .await?;
        if !exchange.is_success() || exchange.body.is_empty() {
            return Err(SsoError::transport(format!(
                "captcha image returned HTTP {}",
                exchange.status
            )));
        }

        match solver.solve(challenge, &exchange.body).await {
            Ok(answer) => {
                let answer = answer.trim().to_string();
                Ok((!answer.is_empty()).then_some(answer))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Captcha solver failed; submitting without answer");
                Ok(None)
            }
        }
    }

    /// Re-check the service; landing back on the login page means the
    /// submission only looked successful.
    async fn verify(&self, service: &Url, url: Url) -> LoginOutcome {
        let check_url = self.ctx.settings.endpoints.login_url_for(service);
        match self.ctx.transport.send(HttpRequest::get(check_url)).await {
            Ok(exchange)
                if self.ctx.classifier.session_state(&exchange) == SessionState::Expired =>
            {
                tracing::warn!("Login looked successful but the service still redirects to login");
                LoginOutcome::StillUnauthenticated
            }
            Ok(_) => LoginOutcome::Authenticated(url),
            Err(err) => {
                tracing::warn!(error = %err, "Post-login verification request failed");
                LoginOutcome::Authenticated(url)
            }
        }
    }
}

pub(crate) fn rejection_error(rejection: Rejection) -> SsoError {
    match rejection {
        Rejection::BadCredentials => SsoError::new(
            ErrorCode::CredentialsRejected,
            "identity provider rejected the username or password",
        ),
        Rejection::AccountLocked => {
            SsoError::new(ErrorCode::AccountLocked, "account locked by identity provider")
        }
        Rejection::Throttled => SsoError::new(
            ErrorCode::Throttled,
            "identity provider froze this client's IP; try again later",
        ),
    }
}

fn outcome_error(outcome: &LoginOutcome) -> SsoError {
    match outcome {
        LoginOutcome::CaptchaRejected => {
            SsoError::captcha_rejected("captcha answer rejected by identity provider")
        }
        LoginOutcome::TransportFailure(detail) => {
            SsoError::transport(format!("login request failed: {detail}"))
        }
        LoginOutcome::Rejected(rejection) => rejection_error(*rejection),
        LoginOutcome::StillUnauthenticated | LoginOutcome::Authenticated(_) => {
            SsoError::still_unauthenticated("login submission did not leave the login page")
        }
    }
}
