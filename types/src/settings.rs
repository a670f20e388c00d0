//! Resolved settings shared across crates.
//!
//! These types represent fully-validated runtime state. Raw TOML structs with
//! `Option` fields stay private in `casgate-config`, which resolves them into
//! these types at the parse boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Method, ServiceId, query_param};

pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_CAPTCHA_PATH: &str = "/getCaptcha.htl";
pub const DEFAULT_BILLING_ENTRY_PATH: &str = "/server/auth/host/open?host=28&org=2";
pub const DEFAULT_BILLING_TOKEN_PATH: &str = "/server/auth/getToken";
/// Validity endpoints tried in order until one gives a definite answer.
pub const DEFAULT_VALIDITY_ENDPOINTS: &[(Method, &str)] = &[
    (Method::Post, "/server/user/info"),
    (Method::Get, "/server/auth/getLoginUser"),
    (Method::Get, "/server/auth/getUserInfo"),
];
pub const DEFAULT_BILLING_REFRESH_PATH: &str = "/server/auth/updateToken";
pub const DEFAULT_ORG_ID: u32 = 2;
pub const DEFAULT_TOKEN_PATTERN: &str = r"C2CDB[0-9A-F]{10,}(?:\.[0-9A-Za-z]+){2,}";
pub const DEFAULT_SERVICE_ID: &str = "billing";

pub const DEFAULT_ATTEMPT_BUDGET: u32 = 4;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 1;
pub const DEFAULT_RELOGIN_COOLDOWN: Duration = Duration::from_secs(180);
pub const DEFAULT_REVALIDATE_AFTER: Duration = Duration::from_secs(60);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: u32 = 15;
pub const DEFAULT_USER_AGENT: &str = concat!("casgate/", env!("CARGO_PKG_VERSION"));

/// Absolute URLs of every endpoint the session manager talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Identity-provider login page, without a `service` parameter.
    pub login_url: Url,
    pub captcha_url: Url,
    /// Service URL the portal session is checked and renewed against.
    pub portal_service: Url,
    pub billing_entry: Url,
    pub billing_token: Url,
    /// Tried in order; an endpoint that cannot decide defers to the next.
    pub billing_validate: Vec<ValidityEndpoint>,
    pub billing_refresh: Url,
    pub org_id: u32,
    /// Regex matching a bare access token in a response body.
    pub token_pattern: String,
}

impl Endpoints {
    /// Endpoints under the default paths.
    pub fn from_bases(
        idp_base: &str,
        portal_service: &str,
        billing_base: &str,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            login_url: join_base(idp_base, DEFAULT_LOGIN_PATH)?,
            captcha_url: join_base(idp_base, DEFAULT_CAPTCHA_PATH)?,
            portal_service: Url::parse(portal_service)?,
            billing_entry: join_base(billing_base, DEFAULT_BILLING_ENTRY_PATH)?,
            billing_token: join_base(billing_base, DEFAULT_BILLING_TOKEN_PATH)?,
            billing_validate: DEFAULT_VALIDITY_ENDPOINTS
                .iter()
                .map(|(method, path)| {
                    join_base(billing_base, path).map(|url| ValidityEndpoint::new(*method, url))
                })
                .collect::<Result<_, _>>()?,
            billing_refresh: join_base(billing_base, DEFAULT_BILLING_REFRESH_PATH)?,
            org_id: DEFAULT_ORG_ID,
            token_pattern: DEFAULT_TOKEN_PATTERN.to_string(),
        })
    }

    /// Login page URL carrying `service`.
    #[must_use]
    pub fn login_url_for(&self, service: &Url) -> Url {
        let mut url = self.login_url.clone();
        url.query_pairs_mut().append_pair("service", service.as_str());
        url
    }

    /// Same origin as the identity provider.
    #[must_use]
    pub fn is_idp_host(&self, url: &Url) -> bool {
        url.host_str() == self.login_url.host_str()
            && url.port_or_known_default() == self.login_url.port_or_known_default()
    }

    /// The identity provider's login page, with or without query.
    #[must_use]
    pub fn is_login_page(&self, url: &Url) -> bool {
        self.is_idp_host(url)
            && url.path().trim_end_matches('/') == self.login_url.path().trim_end_matches('/')
    }

    #[must_use]
    pub fn has_ticket(url: &Url) -> bool {
        query_param(url, "ticket").is_some()
    }
}

/// One billing endpoint that answers whether a token is still accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityEndpoint {
    pub method: Method,
    pub url: Url,
}

impl ValidityEndpoint {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }
}

/// Join a base URL and an absolute path by concatenation, so a base with a
/// path prefix (`https://auth.example.edu/authserver`) keeps it.
pub fn join_base(base: &str, path: &str) -> Result<Url, url::ParseError> {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return Url::parse(base);
    }
    if path.starts_with('/') {
        Url::parse(&format!("{base}{path}"))
    } else {
        Url::parse(&format!("{base}/{path}"))
    }
}

/// What the orchestrator does when acquisition fails but a cached token
/// exists whose validity could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloginFailurePolicy {
    /// Surface the classified error.
    #[default]
    Abort,
    /// Return the cached token when the service answered neither yes nor no.
    ReuseUnconfirmed,
}

/// How the password is transformed before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasswordEncoding {
    #[default]
    Plain,
    /// AES-128-CBC keyed on the login page salt, base64 encoded. Pages
    /// without a 16-byte salt fail the login.
    SaltedAes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Login submissions per authentication round (>= 1).
    pub attempt_budget: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of each delay removed at random, in [0, 1].
    pub jitter_factor: f64,
    /// Extra tries for idempotent GETs that fail at the transport layer.
    pub transport_retries: u32,
    /// Minimum gap after a failed relogin before the next one.
    pub relogin_cooldown: Duration,
    pub on_relogin_failure: ReloginFailurePolicy,
    /// Re-check the service after a login that looked successful.
    pub verify_after_login: bool,
    pub use_refresh_token: bool,
    /// Cached tokens validated more recently than this skip the network.
    pub revalidate_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_budget: DEFAULT_ATTEMPT_BUDGET,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            relogin_cooldown: DEFAULT_RELOGIN_COOLDOWN,
            on_relogin_failure: ReloginFailurePolicy::Abort,
            verify_after_login: true,
            use_refresh_token: true,
            revalidate_after: DEFAULT_REVALIDATE_AFTER,
        }
    }
}

/// Substrings the default classifier looks for in response bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub captcha_rejected: Vec<String>,
    pub bad_credentials: Vec<String>,
    pub account_locked: Vec<String>,
    /// IP-freeze pages.
    pub throttled: Vec<String>,
    /// Login-page markup.
    pub login_page: Vec<String>,
    /// Service responses meaning "no session".
    pub unauthenticated: Vec<String>,
}

impl Markers {
    /// Whether `text` contains any of `markers`. Empty markers never match.
    #[must_use]
    pub fn contains_any(text: &str, markers: &[String]) -> bool {
        markers
            .iter()
            .any(|marker| !marker.is_empty() && text.contains(marker.as_str()))
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            captcha_rejected: strings(&["验证码错误", "验证码无效"]),
            bad_credentials: strings(&["密码错误", "帐号或密码错误", "认证失败"]),
            account_locked: strings(&["账户被锁定", "冻结"]),
            throttled: strings(&["IP冻结", "ip-freeze", "ip冻结"]),
            login_page: strings(&["统一身份认证", "pwdEncryptSalt"]),
            unauthenticated: strings(&["unauthorized", "未登录", "统一身份认证"]),
        }
    }
}

/// Everything the session core needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub endpoints: Endpoints,
    pub retry: RetryPolicy,
    pub markers: Markers,
    /// Scope stamped on acquired tokens.
    pub service_id: ServiceId,
    pub password_encoding: PasswordEncoding,
}

impl SessionSettings {
    #[must_use]
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            retry: RetryPolicy::default(),
            markers: Markers::default(),
            service_id: ServiceId::new(DEFAULT_SERVICE_ID),
            password_encoding: PasswordEncoding::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: u32,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: false,
        }
    }
}
