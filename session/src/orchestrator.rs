//! `SessionManager`: the entry point callers hold.

use std::sync::Arc;

use casgate_types::{
    CaptchaSolver, CredentialSource, Credentials, PasswordEncoder, ReloginFailurePolicy,
    RenewOutcome, ServiceToken, SessionSettings, SsoError, TokenCheck, Transport,
};
use chrono::Utc;

use crate::SessionContext;
use crate::classify::ResponseClassifier;
use crate::encrypt::password_encoder;
use crate::login::LoginAttempter;
use crate::renew::SessionRenewer;
use crate::token::TokenAcquirer;
use crate::validate::TokenValidator;

struct Inner {
    ctx: SessionContext,
    credentials: Arc<dyn CredentialSource>,
    renewer: Arc<SessionRenewer>,
    acquirer: TokenAcquirer,
    validator: TokenValidator,
}

/// Decides between reusing a cached billing token, validating it, or
/// acquiring a new one.
///
/// Cheap to clone; clones share the transport (and with it the cookie jar)
/// and the login gate.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Manager with the default classifier, no captcha solver and the
    /// password encoder named by `settings.password_encoding`.
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, SsoError> {
        Ok(Self::builder(settings, transport, credentials)?.build())
    }

    pub fn builder(
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<SessionManagerBuilder, SsoError> {
        let encoder = password_encoder(settings.password_encoding);
        Ok(SessionManagerBuilder {
            ctx: SessionContext::new(transport, settings)?,
            credentials,
            solver: None,
            encoder,
        })
    }

    /// Return a usable billing token.
    ///
    /// A token validated within `revalidate_after` is returned without any
    /// network call. Errors from acquisition are returned as classified;
    /// this never loops.
    pub async fn ensure_token(
        &self,
        cached: Option<ServiceToken>,
    ) -> Result<ServiceToken, SsoError> {
        let inner = &self.inner;
        let settings = &inner.ctx.settings;
        let now = Utc::now();

        let cached = cached.filter(|token| {
            let matches = token.service == settings.service_id;
            if !matches {
                tracing::debug!(service = %token.service, "Ignoring token cached for another scope");
            }
            matches
        });
        let Some(cached) = cached else {
            return inner.acquirer.acquire(None).await;
        };

        if cached.is_fresh(now, settings.retry.revalidate_after) {
            tracing::debug!("Cached billing token is fresh");
            return Ok(cached);
        }

        // A past expiry only rules out the fast path; the service decides.
        if cached.is_expired(now) {
            tracing::debug!("Cached billing token is past its advertised expiry");
        }
        let check = inner.validator.check(&cached).await;
        if check == TokenCheck::Accepted {
            return Ok(cached.revalidated(Utc::now()));
        }

        match inner.acquirer.acquire(Some(&cached)).await {
            Ok(token) => Ok(token),
            Err(err)
                if check == TokenCheck::Uncertain
                    && settings.retry.on_relogin_failure
                        == ReloginFailurePolicy::ReuseUnconfirmed =>
            {
                tracing::warn!(
                    error = %err,
                    code = err.code.as_str(),
                    "Acquisition failed; reusing unconfirmed cached token"
                );
                Ok(cached)
            }
            Err(err) => Err(err),
        }
    }

    /// Renew the portal session and warm up billing without acquiring a
    /// token.
    pub async fn renew_session(&self) -> Result<RenewOutcome, SsoError> {
        self.inner.renewer.renew().await
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.credentials.credentials()
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.ctx.transport
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.inner.ctx.settings
    }
}

pub struct SessionManagerBuilder {
    ctx: SessionContext,
    credentials: Arc<dyn CredentialSource>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    encoder: Arc<dyn PasswordEncoder>,
}

impl SessionManagerBuilder {
    #[must_use]
    pub fn captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    #[must_use]
    pub fn password_encoder(mut self, encoder: Arc<dyn PasswordEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn ResponseClassifier>) -> Self {
        self.ctx = self.ctx.with_classifier(classifier);
        self
    }

    #[must_use]
    pub fn build(self) -> SessionManager {
        let Self {
            ctx,
            credentials,
            solver,
            encoder,
        } = self;

        let attempter = LoginAttempter::new(ctx.clone(), solver, encoder);
        let renewer = Arc::new(SessionRenewer::new(
            ctx.clone(),
            attempter,
            Arc::clone(&credentials),
        ));

        SessionManager {
            inner: Arc::new(Inner {
                acquirer: TokenAcquirer::new(ctx.clone(), Arc::clone(&renewer)),
                validator: TokenValidator::new(ctx.clone()),
                renewer,
                credentials,
                ctx,
            }),
        }
    }
}
