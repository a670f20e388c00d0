//! Lightweight cached-token check against the billing user-info endpoints.

use casgate_types::{HttpRequest, Method, ServiceToken, TokenCheck, ValidityEndpoint};

use crate::SessionContext;

#[derive(Clone)]
pub struct TokenValidator {
    ctx: SessionContext,
}

impl TokenValidator {
    #[must_use]
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    /// One request per configured endpoint, no retries. The first definite
    /// answer wins; an `Uncertain` endpoint (404, 5xx, unreachable) defers
    /// to the next one. Transport failures are never `Rejected`: an
    /// unreachable server says nothing about the token.
    pub async fn check(&self, token: &ServiceToken) -> TokenCheck {
        for (idx, endpoint) in self.ctx.settings.endpoints.billing_validate.iter().enumerate() {
            match self.check_one(endpoint, token).await {
                TokenCheck::Uncertain => {
                    tracing::debug!(endpoint = idx, "Validity endpoint undecided; trying next");
                }
                decided => return decided,
            }
        }
        TokenCheck::Uncertain
    }

    async fn check_one(&self, endpoint: &ValidityEndpoint, token: &ServiceToken) -> TokenCheck {
        let request = match endpoint.method {
            Method::Post => HttpRequest::post_empty(endpoint.url.clone()),
            Method::Get => HttpRequest::get(endpoint.url.clone()),
        }
        .header("Authorization", token.value.clone())
        .header("token", token.value.clone());

        match self.ctx.transport.send(request).await {
            Ok(exchange) => {
                let check = self.ctx.classifier.token_check(&exchange);
                tracing::debug!(
                    method = endpoint.method.as_str(),
                    status = exchange.status,
                    ?check,
                    "Validated cached token"
                );
                check
            }
            Err(err) => {
                tracing::debug!(error = %err, "Token validation request failed");
                TokenCheck::Uncertain
            }
        }
    }
}
