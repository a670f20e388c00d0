//! Billing token acquisition with at most one relogin cycle.

use std::sync::Arc;

use casgate_types::{
    HttpRequest, RenewOutcome, ServiceToken, SsoError, TokenGrant, TokenSignal, Url,
};
use chrono::Utc;
use serde_json::json;

use crate::SessionContext;
use crate::renew::SessionRenewer;
use crate::retry::get_with_retry;

/// Result of one pass over the billing SSO entry.
enum Pass {
    Granted(TokenGrant),
    NeedsLogin {
        tid: Option<String>,
        ticket: Option<String>,
    },
}

pub struct TokenAcquirer {
    ctx: SessionContext,
    renewer: Arc<SessionRenewer>,
}

impl TokenAcquirer {
    #[must_use]
    pub fn new(ctx: SessionContext, renewer: Arc<SessionRenewer>) -> Self {
        Self { ctx, renewer }
    }

    /// Obtain a billing token.
    ///
    /// A refresh token on `previous` is tried first when enabled. Otherwise
    /// one SSO pass runs; if it needs login the session is renewed once and
    /// a second pass runs. There is never a third pass.
    pub async fn acquire(&self, previous: Option<&ServiceToken>) -> Result<ServiceToken, SsoError> {
        if self.ctx.settings.retry.use_refresh_token
            && let Some(previous) = previous
            && let Some(refresh_token) = previous.refresh_token.as_deref()
        {
            if let Some(token) = self.refresh(previous, refresh_token).await {
                tracing::info!("Billing token refreshed");
                return Ok(token);
            }
            tracing::debug!("Refresh token not accepted; falling back to SSO");
        }

        if let Pass::Granted(grant) = self.fetch_once().await? {
            tracing::debug!("Billing token granted on first pass");
            return Ok(self.token(grant));
        }

        tracing::info!("Billing service needs login; renewing session");
        match self.renewer.renew().await? {
            RenewOutcome::NoCredentials => {
                return Err(SsoError::credentials_absent(
                    "billing authorization unavailable: no cached credentials, re-login required",
                ));
            }
            RenewOutcome::Ready { logged_in, warm_up } => {
                tracing::debug!(logged_in, ?warm_up, "Session renewed for billing");
            }
        }

        match self.fetch_once().await? {
            Pass::Granted(grant) => {
                tracing::info!("Billing token granted after relogin");
                Ok(self.token(grant))
            }
            Pass::NeedsLogin { tid, ticket } => {
                tracing::warn!(
                    tid_seen = tid.is_some(),
                    ticket_seen = ticket.is_some(),
                    "Billing still requires login after relogin"
                );
                Err(
                    SsoError::authorization_denied("authorization denied even after re-login")
                        .with_detail("tid", presence(tid.as_ref()))
                        .with_detail("ticket", presence(ticket.as_ref())),
                )
            }
        }
    }

    async fn fetch_once(&self) -> Result<Pass, SsoError> {
        let endpoints = &self.ctx.settings.endpoints;
        let exchange = get_with_retry(
            self.ctx.transport.as_ref(),
            &endpoints.billing_entry,
            &self.ctx.settings.retry,
        )
        .await?;

        match self.ctx.classifier.token_flow(&exchange) {
            TokenSignal::Granted(grant) => Ok(Pass::Granted(grant)),
            TokenSignal::NeedsLogin { tid, ticket } => Ok(Pass::NeedsLogin { tid, ticket }),
            TokenSignal::Exchange { tid, ticket } => {
                tracing::debug!(
                    tid_seen = tid.is_some(),
                    ticket_seen = ticket.is_some(),
                    "Exchanging billing transaction for token"
                );
                match self.exchange(tid.as_deref(), ticket.as_deref()).await? {
                    Some(grant) => Ok(Pass::Granted(grant)),
                    None => Ok(Pass::NeedsLogin { tid, ticket }),
                }
            }
        }
    }

    /// GET the token endpoint with `tid` (plus `orgId`), then with `ticket`.
    async fn exchange(
        &self,
        tid: Option<&str>,
        ticket: Option<&str>,
    ) -> Result<Option<TokenGrant>, SsoError> {
        let endpoints = &self.ctx.settings.endpoints;
        let org_id = endpoints.org_id.to_string();

        let mut candidates: Vec<Url> = Vec::with_capacity(2);
        if let Some(tid) = tid {
            let mut url = endpoints.billing_token.clone();
            url.query_pairs_mut()
                .append_pair("tid", tid)
                .append_pair("orgId", &org_id);
            candidates.push(url);
        }
        if let Some(ticket) = ticket {
            let mut url = endpoints.billing_token.clone();
            url.query_pairs_mut().append_pair("ticket", ticket);
            candidates.push(url);
        }

        for url in candidates {
            let exchange =
                get_with_retry(self.ctx.transport.as_ref(), &url, &self.ctx.settings.retry).await?;
            if !exchange.is_success() {
                tracing::debug!(status = exchange.status, "Token endpoint refused exchange");
                continue;
            }
            if let Some(grant) = self.ctx.classifier.token_grant(&exchange) {
                return Ok(Some(grant));
            }
        }
        Ok(None)
    }

    /// Try the refresh endpoint with each payload shape the billing service
    /// has been seen to accept. A missing refresh token in the reply keeps
    /// the old one.
    async fn refresh(&self, previous: &ServiceToken, refresh_token: &str) -> Option<ServiceToken> {
        let payloads = [
            json!({"refreshToken": refresh_token, "token": previous.value, "transferType": 0}),
            json!({
                "refreshToken": refresh_token,
                "accessToken": previous.value,
                "transferType": 0,
            }),
            json!({"refreshToken": refresh_token}),
        ];
        let url = &self.ctx.settings.endpoints.billing_refresh;

        for (idx, payload) in payloads.into_iter().enumerate() {
            let request = HttpRequest::post_json(url.clone(), payload)
                .header("token", previous.value.clone());
            match self.ctx.transport.send(request).await {
                Ok(exchange) if exchange.is_success() => {
                    if let Some(mut grant) = self.ctx.classifier.token_grant(&exchange) {
                        if grant.refresh_token.is_none() {
                            grant.refresh_token = Some(refresh_token.to_string());
                        }
                        return Some(self.token(grant));
                    }
                    tracing::debug!(variant = idx, "Refresh response carried no token");
                }
                Ok(exchange) => {
                    tracing::debug!(variant = idx, status = exchange.status, "Refresh refused");
                }
                Err(err) => {
                    tracing::debug!(variant = idx, error = %err, "Refresh request failed");
                }
            }
        }
        None
    }

    fn token(&self, grant: TokenGrant) -> ServiceToken {
        ServiceToken::from_grant(grant, self.ctx.settings.service_id.clone(), Utc::now())
    }
}

fn presence<T>(value: Option<&T>) -> &'static str {
    if value.is_some() { "present" } else { "absent" }
}
