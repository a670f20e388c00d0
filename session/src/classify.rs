//! Response classification.
//!
//! Every substring and URL heuristic lives here, behind
//! [`ResponseClassifier`], so the flow code only ever matches on named
//! outcomes. [`MarkerClassifier`] is the default, driven by configurable
//! [`Markers`].

use casgate_types::{
    Endpoints, HttpExchange, LoginOutcome, Markers, Rejection, SessionSettings, SessionState,
    SsoError, TokenCheck, TokenGrant, TokenSignal, query_param,
};
use regex::Regex;
use serde_json::Value;

/// What a GET of the login page turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// A login form was served.
    Form,
    /// The identity provider redirected away from the login page.
    AlreadyAuthenticated,
    /// The identity provider froze this client.
    Throttled,
}

pub trait ResponseClassifier: Send + Sync {
    fn login_page(&self, exchange: &HttpExchange) -> PageClass;

    fn submission(&self, exchange: &HttpExchange) -> LoginOutcome;

    fn session_state(&self, exchange: &HttpExchange) -> SessionState;

    /// Classify one pass over a service's SSO entry.
    fn token_flow(&self, exchange: &HttpExchange) -> TokenSignal;

    /// Token material in a token or refresh endpoint response.
    fn token_grant(&self, exchange: &HttpExchange) -> Option<TokenGrant>;

    fn token_check(&self, exchange: &HttpExchange) -> TokenCheck;
}

#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    endpoints: Endpoints,
    markers: Markers,
    token_pattern: Regex,
    tid_pattern: Regex,
    ticket_pattern: Regex,
}

impl MarkerClassifier {
    pub fn new(settings: &SessionSettings) -> Result<Self, SsoError> {
        let token_pattern = Regex::new(&settings.endpoints.token_pattern).map_err(|e| {
            SsoError::invalid_input(format!("invalid token pattern: {e}"))
                .with_detail("pattern", settings.endpoints.token_pattern.clone())
        })?;
        let tid_pattern = Regex::new(r#"[?&"']tid["']?\s*[=:]\s*["']?([A-Za-z0-9_\-]+)"#)
            .map_err(|e| SsoError::invalid_input(e.to_string()))?;
        let ticket_pattern = Regex::new(r"[?&]ticket=([A-Za-z0-9_\-.]+)")
            .map_err(|e| SsoError::invalid_input(e.to_string()))?;

        Ok(Self {
            endpoints: settings.endpoints.clone(),
            markers: settings.markers.clone(),
            token_pattern,
            tid_pattern,
            ticket_pattern,
        })
    }

    fn landed_on_login(&self, exchange: &HttpExchange) -> bool {
        self.endpoints.is_login_page(&exchange.final_url)
            && !Endpoints::has_ticket(&exchange.final_url)
    }

    /// Token from an `Authorization` or `token` header on any hop.
    fn header_token(exchange: &HttpExchange) -> Option<String> {
        ["authorization", "token"].iter().find_map(|name| {
            exchange.header_values(name).find_map(|value| {
                let value = value.trim();
                let value = value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
                    .unwrap_or(value)
                    .trim();
                (!value.is_empty()).then(|| value.to_string())
            })
        })
    }

    fn body_token(&self, body: &str) -> Option<String> {
        self.token_pattern
            .find(body)
            .map(|m| m.as_str().to_string())
    }

    fn body_param(exchange: &HttpExchange, pattern: &Regex) -> Option<String> {
        pattern
            .captures(&exchange.text())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl ResponseClassifier for MarkerClassifier {
    fn login_page(&self, exchange: &HttpExchange) -> PageClass {
        if Markers::contains_any(&exchange.text(), &self.markers.throttled) {
            return PageClass::Throttled;
        }
        if self.landed_on_login(exchange) {
            PageClass::Form
        } else {
            PageClass::AlreadyAuthenticated
        }
    }

    fn submission(&self, exchange: &HttpExchange) -> LoginOutcome {
        let body = exchange.text();
        let markers = &self.markers;

        if Markers::contains_any(&body, &markers.throttled) {
            return LoginOutcome::Rejected(Rejection::Throttled);
        }
        if Markers::contains_any(&body, &markers.captcha_rejected) {
            return LoginOutcome::CaptchaRejected;
        }
        if Markers::contains_any(&body, &markers.bad_credentials) {
            return LoginOutcome::Rejected(Rejection::BadCredentials);
        }
        if Markers::contains_any(&body, &markers.account_locked) {
            return LoginOutcome::Rejected(Rejection::AccountLocked);
        }

        let on_idp_login_markup = self.endpoints.is_idp_host(&exchange.final_url)
            && !Endpoints::has_ticket(&exchange.final_url)
            && Markers::contains_any(&body, &markers.login_page);
        if exchange.status == 401 || self.landed_on_login(exchange) || on_idp_login_markup {
            return LoginOutcome::StillUnauthenticated;
        }

        LoginOutcome::Authenticated(exchange.final_url.clone())
    }

    fn session_state(&self, exchange: &HttpExchange) -> SessionState {
        if self.landed_on_login(exchange) {
            SessionState::Expired
        } else {
            SessionState::Valid
        }
    }

    fn token_flow(&self, exchange: &HttpExchange) -> TokenSignal {
        let landed_on_login = self.landed_on_login(exchange);

        if !landed_on_login
            && let Some(grant) = self.token_grant(exchange)
        {
            return TokenSignal::Granted(grant);
        }

        let tid = exchange.visited_urls().find_map(|url| query_param(url, "tid"));
        let ticket = exchange
            .visited_urls()
            .find_map(|url| query_param(url, "ticket"));

        if landed_on_login {
            return TokenSignal::NeedsLogin { tid, ticket };
        }

        let tid = tid.or_else(|| Self::body_param(exchange, &self.tid_pattern));
        let ticket = ticket.or_else(|| Self::body_param(exchange, &self.ticket_pattern));

        if tid.is_some() || ticket.is_some() {
            TokenSignal::Exchange { tid, ticket }
        } else {
            TokenSignal::NeedsLogin { tid, ticket }
        }
    }

    fn token_grant(&self, exchange: &HttpExchange) -> Option<TokenGrant> {
        let body = exchange.text();
        parse_token_envelope(&body)
            .or_else(|| Self::header_token(exchange).map(TokenGrant::new))
            .or_else(|| self.body_token(&body).map(TokenGrant::new))
    }

    fn token_check(&self, exchange: &HttpExchange) -> TokenCheck {
        let body = exchange.text();
        let markers = &self.markers;

        if Markers::contains_any(&body, &markers.throttled) {
            return TokenCheck::Uncertain;
        }

        match exchange.status {
            401 | 403 => TokenCheck::Rejected,
            404 | 500..=599 => TokenCheck::Uncertain,
            200..=299 => {
                if self.landed_on_login(exchange)
                    || Markers::contains_any(&body, &markers.login_page)
                {
                    return TokenCheck::Rejected;
                }
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    return TokenCheck::Uncertain;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(json) => {
                        if json_reports_success(&json) {
                            TokenCheck::Accepted
                        } else {
                            TokenCheck::Rejected
                        }
                    }
                    Err(_) if Markers::contains_any(&body, &markers.unauthenticated) => {
                        TokenCheck::Rejected
                    }
                    Err(_) => TokenCheck::Accepted,
                }
            }
            _ => TokenCheck::Uncertain,
        }
    }
}

fn json_reports_success(json: &Value) -> bool {
    if let Some(success) = json.get("success").and_then(Value::as_bool) {
        return success;
    }
    ["data", "resultData"]
        .iter()
        .any(|key| json.get(key).is_some_and(|v| !v.is_null()))
}

/// Parse `{success, resultData: {accessToken | token | access_token,
/// refreshToken, accessTokenExpire}}`.
pub(crate) fn parse_token_envelope(body: &str) -> Option<TokenGrant> {
    let json: Value = serde_json::from_str(body.trim()).ok()?;
    if json.get("success").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    let result = json
        .get("resultData")
        .or_else(|| json.get("data"))
        .filter(|v| v.is_object())
        .unwrap_or(&json);

    let access_token = ["accessToken", "token", "access_token"]
        .iter()
        .find_map(|key| result.get(key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())?;

    let refresh_token = result
        .get("refreshToken")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let expires_in = result.get("accessTokenExpire").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    });

    Some(TokenGrant {
        access_token: access_token.to_string(),
        refresh_token,
        expires_in,
    })
}
