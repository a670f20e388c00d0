//! Stateful in-memory campus: identity provider, portal and billing service
//! behind one `Transport`, with counters the scenarios assert on.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

use casgate_session::{SessionManager, StaticCredentials};
use casgate_types::{
    CaptchaChallenge, CaptchaSolver, CredentialSource, Credentials, Endpoints, HttpExchange,
    HttpRequest, Method, RedirectHop, RequestBody, ServiceId, ServiceToken, SessionSettings,
    SolveFut, SsoError, Transport, TransportFut, Url, query_param,
};
use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;

pub const IDP: &str = "https://idp.test/authserver";
pub const PORTAL: &str = "https://portal.test/login";
pub const BILLING: &str = "https://pay.test";
pub const PASSWORD: &str = "secret";
pub const SALT: &str = "rjBFAaHsNkKAhpoi";

const MAX_HOPS: usize = 10;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateMode {
    Accept,
    Reject,
    /// Every validity endpoint answers 503 or 404.
    Unavailable,
    /// The first endpoint answers 503; the login-user endpoint accepts.
    FirstDown,
}

enum Reply {
    Page(u16, Vec<u8>),
    Redirect(Url),
    Stall,
}

fn html(status: u16, body: impl Into<String>) -> Reply {
    Reply::Page(status, body.into().into_bytes())
}

#[derive(Debug)]
struct State {
    idp_session: bool,
    billing_session: bool,
    billing_denies: bool,
    stall_posts: bool,
    ignore_logins: bool,
    forget_logins: bool,
    encrypted_passwords: bool,
    refresh_accepts: bool,
    captcha_script: VecDeque<bool>,
    validate: ValidateMode,
    live_executions: HashSet<String>,
    used_executions: Vec<String>,
    issued_tids: HashSet<String>,
    issued_refresh: HashSet<String>,
    serial: u32,
    calls: usize,
    portal_forms: usize,
    submissions: usize,
    captcha_fetches: usize,
    entry_calls: usize,
    refresh_calls: usize,
    validate_calls: usize,
}

pub struct FakeCampus {
    state: Mutex<State>,
}

impl FakeCampus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                idp_session: false,
                billing_session: false,
                billing_denies: false,
                stall_posts: false,
                ignore_logins: false,
                forget_logins: false,
                encrypted_passwords: false,
                refresh_accepts: false,
                captcha_script: VecDeque::new(),
                validate: ValidateMode::Accept,
                live_executions: HashSet::new(),
                used_executions: Vec::new(),
                issued_tids: HashSet::new(),
                issued_refresh: HashSet::new(),
                serial: 0,
                calls: 0,
                portal_forms: 0,
                submissions: 0,
                captcha_fetches: 0,
                entry_calls: 0,
                refresh_calls: 0,
                validate_calls: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_idp_session(&self, on: bool) {
        self.state().idp_session = on;
    }

    pub fn set_billing_session(&self, on: bool) {
        self.state().billing_session = on;
    }

    pub fn deny_billing(&self) {
        self.state().billing_denies = true;
    }

    pub fn stall_posts(&self, on: bool) {
        self.state().stall_posts = on;
    }

    /// Answer every submission with the bare login form again.
    pub fn ignore_logins(&self, on: bool) {
        self.state().ignore_logins = on;
    }

    /// Redirect accepted submissions to the service without keeping the
    /// identity provider session.
    pub fn forget_logins(&self, on: bool) {
        self.state().forget_logins = on;
    }

    /// Expect the password AES-encrypted with [`SALT`].
    pub fn require_encrypted_password(&self, on: bool) {
        self.state().encrypted_passwords = on;
    }

    /// Captcha verdicts for upcoming submissions; unscripted ones pass.
    pub fn script_captcha(&self, verdicts: &[bool]) {
        self.state().captcha_script = verdicts.iter().copied().collect();
    }

    pub fn set_validate(&self, mode: ValidateMode) {
        self.state().validate = mode;
    }

    pub fn accept_refresh(&self, refresh_token: &str) {
        let mut state = self.state();
        state.refresh_accepts = true;
        state.issued_refresh.insert(refresh_token.to_string());
    }

    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn portal_forms(&self) -> usize {
        self.state().portal_forms
    }

    pub fn submissions(&self) -> usize {
        self.state().submissions
    }

    pub fn captcha_fetches(&self) -> usize {
        self.state().captcha_fetches
    }

    pub fn entry_calls(&self) -> usize {
        self.state().entry_calls
    }

    pub fn refresh_calls(&self) -> usize {
        self.state().refresh_calls
    }

    pub fn validate_calls(&self) -> usize {
        self.state().validate_calls
    }

    pub fn used_executions(&self) -> Vec<String> {
        self.state().used_executions.clone()
    }

    pub fn idp_session(&self) -> bool {
        self.state().idp_session
    }

    /// Run one request (and the redirects it triggers) against the campus.
    /// Returns `None` when the request should hang.
    fn handle(&self, request: &HttpRequest) -> Option<Result<HttpExchange, SsoError>> {
        let mut state = self.state();
        state.calls += 1;

        let mut url = request.url.clone();
        let mut hops = Vec::new();
        let mut reply = state.respond(request.method, &url, Some(request));
        loop {
            match reply {
                Reply::Stall => return None,
                Reply::Page(status, body) => {
                    let mut exchange = HttpExchange::new(url, status, body);
                    exchange.redirects = hops;
                    return Some(Ok(exchange));
                }
                Reply::Redirect(location) => {
                    if hops.len() >= MAX_HOPS {
                        return Some(Err(SsoError::transport("too many redirects").into_terminal()));
                    }
                    hops.push(RedirectHop {
                        url: url.clone(),
                        status: 302,
                        location: location.clone(),
                        headers: Vec::new(),
                    });
                    url = location;
                    reply = state.respond(Method::Get, &url, None);
                }
            }
        }
    }
}

impl Transport for FakeCampus {
    fn send(&self, request: HttpRequest) -> TransportFut<'_> {
        let response = self.handle(&request);
        Box::pin(async move {
            match response {
                Some(result) => result,
                None => {
                    std::future::pending::<()>().await;
                    Err(SsoError::transport("unreachable"))
                }
            }
        })
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn with_param(base: &Url, key: &str, value: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair(key, value);
    url
}

fn without_param(base: &Url, key: &str) -> Url {
    let pairs: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = base.clone();
    url.set_query(None);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    url
}

fn login_page(action_query: &str, execution: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>统一身份认证</title></head>
<body>
<form id="pwdFromId" action="/authserver/login?{action_query}" method="post">
  <input type="text" name="username" value="">
  <input type="password" name="password" value="">
  <input type="text" name="captcha" value="">
  <input type="hidden" name="lt" value="">
  <input type="hidden" name="cllt" value="qrLogin">
  <input type="hidden" name="dllt" value="generalLogin">
  <input type="hidden" name="execution" value="{execution}">
  <input type="hidden" name="_eventId" value="submit">
  <input type="hidden" id="pwdEncryptSalt" value="{SALT}">
</form>
<img id="captchaImg" src="getCaptcha.htl">
</body></html>"#
    )
}

const ACCEPTED_USER: &str = r#"{"success":true,"data":{"name":"alice"}}"#;

/// What the identity provider does with an encrypted password: decrypt with
/// the salt under any IV and drop the 64-character random prefix.
fn decrypt_password(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let plain = cbc::Decryptor::<aes::Aes128>::new_from_slices(SALT.as_bytes(), &[0u8; 16])
        .ok()?
        .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
        .ok()?;
    plain.get(64..).map(|p| String::from_utf8_lossy(p).into_owned())
}

impl State {
    fn next(&mut self) -> u32 {
        self.serial += 1;
        self.serial
    }

    fn respond(&mut self, method: Method, target: &Url, request: Option<&HttpRequest>) -> Reply {
        let host = target.host_str().unwrap_or_default().to_string();
        match (host.as_str(), target.path(), method) {
            ("idp.test", "/authserver/login", Method::Get) => self.login_get(target),
            ("idp.test", "/authserver/login", Method::Post) => self.login_post(target, request),
            ("idp.test", "/authserver/getCaptcha.htl", Method::Get) => {
                self.captcha_fetches += 1;
                Reply::Page(200, b"\x89PNG fake".to_vec())
            }
            ("portal.test", _, _) => html(200, "<html>portal home</html>"),
            ("pay.test", "/server/auth/host/open", Method::Get) => self.billing_entry(target),
            ("pay.test", "/home", Method::Get) => html(200, "<html>billing home</html>"),
            ("pay.test", "/server/auth/getToken", Method::Get) => self.token(target),
            ("pay.test", "/server/user/info", Method::Post) => {
                self.validate_calls += 1;
                match self.validate {
                    ValidateMode::Accept => html(200, ACCEPTED_USER),
                    ValidateMode::Reject => html(401, ""),
                    ValidateMode::Unavailable | ValidateMode::FirstDown => html(503, ""),
                }
            }
            ("pay.test", "/server/auth/getLoginUser", Method::Get) => {
                self.validate_calls += 1;
                match self.validate {
                    ValidateMode::FirstDown => html(200, ACCEPTED_USER),
                    _ => html(404, "not found"),
                }
            }
            ("pay.test", "/server/auth/getUserInfo", Method::Get) => {
                self.validate_calls += 1;
                html(404, "not found")
            }
            ("pay.test", "/server/auth/updateToken", Method::Post) => self.refresh(request),
            _ => html(404, "not found"),
        }
    }

    fn login_get(&mut self, target: &Url) -> Reply {
        let service = query_param(target, "service").and_then(|s| Url::parse(&s).ok());
        let renew = query_param(target, "renew").is_some();

        if self.idp_session && !renew {
            return match service {
                Some(service) => {
                    let ticket = format!("ST-{}", self.next());
                    Reply::Redirect(with_param(&service, "ticket", &ticket))
                }
                None => html(200, "<html>identity provider home</html>"),
            };
        }

        let execution = format!("e{}s1", self.next());
        self.live_executions.insert(execution.clone());
        if service.as_ref().map(Url::as_str) == Some(PORTAL) {
            self.portal_forms += 1;
        }
        html(
            200,
            login_page(target.query().unwrap_or_default(), &execution),
        )
    }

    fn login_post(&mut self, target: &Url, request: Option<&HttpRequest>) -> Reply {
        self.submissions += 1;
        if self.stall_posts {
            return Reply::Stall;
        }
        let Some(request) = request else {
            return html(400, "bad request");
        };
        let field = |name: &str| request.form_field(name).unwrap_or_default().to_string();

        let execution = field("execution");
        self.used_executions.push(execution.clone());
        if !self.live_executions.remove(&execution) {
            return html(200, "<html><title>统一身份认证</title>stale execution</html>");
        }

        if self.ignore_logins {
            return html(200, login_page(target.query().unwrap_or_default(), "e0s0"));
        }

        let captcha_ok = self.captcha_script.pop_front().unwrap_or(true);
        if !captcha_ok || field("captcha").is_empty() {
            return html(
                200,
                "<html><title>统一身份认证</title><span id=\"showErrorTip\">验证码错误</span></html>",
            );
        }
        let password = if self.encrypted_passwords {
            decrypt_password(&field("password")).unwrap_or_default()
        } else {
            field("password")
        };
        if field("username").is_empty() || password != PASSWORD {
            return html(
                200,
                "<html><title>统一身份认证</title><span id=\"showErrorTip\">帐号或密码错误</span></html>",
            );
        }

        self.idp_session = !self.forget_logins;
        match query_param(target, "service").and_then(|s| Url::parse(&s).ok()) {
            Some(service) => {
                let ticket = format!("ST-{}", self.next());
                Reply::Redirect(with_param(&service, "ticket", &ticket))
            }
            None => html(200, "<html>identity provider home</html>"),
        }
    }

    fn billing_entry(&mut self, target: &Url) -> Reply {
        self.entry_calls += 1;
        if query_param(target, "ticket").is_some() {
            if !self.billing_denies {
                self.billing_session = true;
            }
            return Reply::Redirect(without_param(target, "ticket"));
        }
        if self.billing_session && !self.billing_denies {
            let tid = format!("TID-{}", self.next());
            self.issued_tids.insert(tid.clone());
            return Reply::Redirect(with_param(&url("https://pay.test/home"), "tid", &tid));
        }

        let mut login = with_param(&url(&format!("{IDP}/login")), "service", target.as_str());
        if self.billing_denies {
            login = with_param(&login, "renew", "true");
        }
        Reply::Redirect(login)
    }

    fn token(&mut self, target: &Url) -> Reply {
        let valid = query_param(target, "tid").is_some_and(|tid| self.issued_tids.contains(&tid));
        if !valid || self.billing_denies {
            return html(200, r#"{"success":false,"message":"invalid tid"}"#);
        }
        let n = self.next();
        let refresh = format!("rt-{n}");
        self.issued_refresh.insert(refresh.clone());
        html(
            200,
            format!(
                r#"{{"success":true,"resultData":{{"accessToken":"tok-{n}","refreshToken":"{refresh}","accessTokenExpire":7200}}}}"#
            ),
        )
    }

    fn refresh(&mut self, request: Option<&HttpRequest>) -> Reply {
        self.refresh_calls += 1;
        let refresh_token = request.and_then(|r| match &r.body {
            RequestBody::Json(json) => json
                .get("refreshToken")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        });
        let accepted = self.refresh_accepts
            && refresh_token.is_some_and(|rt| self.issued_refresh.contains(&rt));
        if !accepted {
            return html(200, r#"{"success":false}"#);
        }
        let n = self.next();
        html(
            200,
            format!(r#"{{"success":true,"resultData":{{"accessToken":"refreshed-{n}","accessTokenExpire":7200}}}}"#),
        )
    }
}

/// Always answers the same text; the campus decides acceptance from its
/// captcha script.
pub struct FixedSolver;

impl CaptchaSolver for FixedSolver {
    fn solve<'a>(&'a self, _challenge: &'a CaptchaChallenge, _image: &'a [u8]) -> SolveFut<'a> {
        Box::pin(async { Ok("abcd".to_string()) })
    }
}

pub fn settings() -> SessionSettings {
    let mut settings =
        SessionSettings::new(Endpoints::from_bases(IDP, PORTAL, BILLING).unwrap());
    settings.retry.initial_backoff = Duration::from_millis(1);
    settings.retry.max_backoff = Duration::from_millis(2);
    settings.retry.relogin_cooldown = Duration::ZERO;
    settings
}

pub fn alice() -> Credentials {
    Credentials::new("alice", PASSWORD)
}

/// Fails the first `failures` login submissions at the transport layer,
/// before they reach the campus.
pub struct FlakyLogin {
    campus: Arc<FakeCampus>,
    remaining: AtomicUsize,
    failed: AtomicUsize,
}

impl FlakyLogin {
    pub fn new(campus: &Arc<FakeCampus>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            campus: Arc::clone(campus),
            remaining: AtomicUsize::new(failures),
            failed: AtomicUsize::new(0),
        })
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl Transport for FlakyLogin {
    fn send(&self, request: HttpRequest) -> TransportFut<'_> {
        let is_submission =
            request.method == Method::Post && request.url.path() == "/authserver/login";
        if is_submission
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Box::pin(async { Err(SsoError::transport("connection reset by peer")) });
        }
        self.campus.send(request)
    }
}

pub fn manager_over(
    transport: Arc<dyn Transport>,
    credentials: Option<Credentials>,
    settings: SessionSettings,
) -> SessionManager {
    let source: Arc<dyn CredentialSource> = Arc::new(StaticCredentials::new(credentials));
    SessionManager::builder(settings, transport, source)
        .unwrap()
        .captcha_solver(Arc::new(FixedSolver))
        .build()
}

pub fn manager_with(
    campus: &Arc<FakeCampus>,
    credentials: Option<Credentials>,
    settings: SessionSettings,
) -> SessionManager {
    manager_over(campus.clone(), credentials, settings)
}

pub fn manager(campus: &Arc<FakeCampus>, credentials: Option<Credentials>) -> SessionManager {
    manager_with(campus, credentials, settings())
}

pub fn cached_token(value: &str, validated_at: DateTime<Utc>) -> ServiceToken {
    ServiceToken {
        value: value.to_string(),
        service: ServiceId::new("billing"),
        refresh_token: None,
        expires_at: None,
        validated_at,
    }
}
