//! Identity provider session renewal behind the login gate.

use std::sync::Arc;
use std::time::Instant;

use casgate_types::{
    AttemptBudget, CredentialSource, HttpRequest, RenewOutcome, SessionState, SsoError, WarmUp,
};
use tokio::sync::Mutex;

use crate::SessionContext;
use crate::login::LoginAttempter;
use crate::retry::get_with_retry;

/// The last failed relogin, kept for the cooldown.
#[derive(Debug)]
struct Failure {
    at: Instant,
    error: SsoError,
}

#[derive(Debug, Default)]
struct GateState {
    last_failure: Option<Failure>,
}

/// Keeps the portal session alive and the billing service warmed up.
///
/// The session check, login and warm-up sequence runs under a single async mutex:
/// concurrent callers queue, then find the session already renewed by the
/// first one. A failed login is replayed, with `retry_after_seconds`, to
/// every caller entering the gate within `relogin_cooldown`, so callers
/// queued behind it see the same classification. The guard is scoped, so a
/// dropped future releases it.
pub struct SessionRenewer {
    ctx: SessionContext,
    attempter: LoginAttempter,
    credentials: Arc<dyn CredentialSource>,
    gate: Mutex<GateState>,
}

impl SessionRenewer {
    #[must_use]
    pub fn new(
        ctx: SessionContext,
        attempter: LoginAttempter,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            ctx,
            attempter,
            credentials,
            gate: Mutex::new(GateState::default()),
        }
    }

    /// Make sure the portal session is valid, logging in when it is not.
    pub async fn renew(&self) -> Result<RenewOutcome, SsoError> {
        let Some(credentials) = self.credentials.credentials().filter(|c| c.is_complete()) else {
            tracing::debug!("No cached credentials; skipping session renewal");
            return Ok(RenewOutcome::NoCredentials);
        };

        let mut gate = self.gate.lock().await;
        let policy = &self.ctx.settings.retry;

        if let Some(failure) = &gate.last_failure {
            let elapsed = failure.at.elapsed();
            if elapsed < policy.relogin_cooldown {
                let seconds = (policy.relogin_cooldown - elapsed).as_secs().max(1);
                tracing::warn!(
                    retry_after_seconds = seconds,
                    code = failure.error.code.as_str(),
                    "Relogin suppressed by cooldown"
                );
                return Err(failure
                    .error
                    .clone()
                    .with_detail("retry_after_seconds", seconds.to_string()));
            }
        }

        let endpoints = &self.ctx.settings.endpoints;
        let check_url = endpoints.login_url_for(&endpoints.portal_service);
        let landing = get_with_retry(self.ctx.transport.as_ref(), &check_url, policy).await?;
        let state = self.ctx.classifier.session_state(&landing);
        tracing::debug!(?state, "Checked identity provider session");

        let logged_in = if state == SessionState::Expired {
            let mut budget = AttemptBudget::new(policy.attempt_budget);
            match self
                .attempter
                .run_round(&endpoints.portal_service, &credentials, &mut budget)
                .await
            {
                Ok(_) => {
                    gate.last_failure = None;
                    tracing::info!(attempts = budget.used(), "Identity provider session renewed");
                    true
                }
                Err(err) => {
                    gate.last_failure = Some(Failure {
                        at: Instant::now(),
                        error: err.clone(),
                    });
                    tracing::warn!(
                        error = %err,
                        code = err.code.as_str(),
                        "Session renewal failed"
                    );
                    return Err(err);
                }
            }
        } else {
            false
        };

        let warm_up = self.warm_up().await;
        drop(gate);

        Ok(RenewOutcome::Ready { logged_in, warm_up })
    }

    /// Follow the billing SSO entry so it validates a ticket and sets its
    /// own session cookies.
    async fn warm_up(&self) -> WarmUp {
        let entry = self.ctx.settings.endpoints.billing_entry.clone();
        match self.ctx.transport.send(HttpRequest::get(entry)).await {
            Ok(exchange) if exchange.is_success() => {
                tracing::debug!(hops = exchange.redirects.len(), "Billing service warmed up");
                WarmUp::Established
            }
            Ok(exchange) => {
                tracing::warn!(status = exchange.status, "Billing warm-up returned error status");
                WarmUp::Failed(format!("billing entry returned HTTP {}", exchange.status))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Billing warm-up failed");
                WarmUp::Failed(err.message)
            }
        }
    }
}
