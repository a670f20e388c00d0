//! Configuration for casgate.
//!
//! `~/.casgate/config.toml` is parsed into the boundary structs below, whose
//! fields are all optional, and then resolved into the invariant-safe
//! [`SessionSettings`] and [`TransportSettings`] the other crates consume.
//!
//! ```toml
//! [identity_provider]
//! base_url = "https://auth.example.edu/authserver"
//! password_encoding = "salted-aes"
//!
//! [portal]
//! service_url = "https://portal.example.edu/login"
//!
//! [billing]
//! base_url = "https://pay.example.edu"
//!
//! [credentials]
//! username = "${CAS_USERNAME}"
//! password = "${CAS_PASSWORD}"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use casgate_types::{
    Credentials, DEFAULT_BILLING_ENTRY_PATH, DEFAULT_BILLING_REFRESH_PATH,
    DEFAULT_BILLING_TOKEN_PATH, DEFAULT_CAPTCHA_PATH, DEFAULT_LOGIN_PATH, DEFAULT_ORG_ID,
    DEFAULT_SERVICE_ID, DEFAULT_TOKEN_PATTERN, DEFAULT_VALIDITY_ENDPOINTS, Endpoints, Markers,
    Method, PasswordEncoding, ReloginFailurePolicy, RetryPolicy, ServiceId, SessionSettings,
    TransportSettings, Url, ValidityEndpoint, join_base,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CasgateConfig {
    pub identity_provider: Option<IdentityProviderConfig>,
    pub portal: Option<PortalConfig>,
    pub billing: Option<BillingConfig>,
    pub retry: Option<RetryConfig>,
    pub transport: Option<TransportConfig>,
    pub markers: Option<MarkersConfig>,
    pub credentials: Option<CredentialsConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentityProviderConfig {
    /// Identity provider root, e.g. `https://auth.example.edu/authserver`.
    pub base_url: Option<String>,
    pub login_path: Option<String>,
    pub captcha_path: Option<String>,
    /// `"plain"` (default) or `"salted-aes"`.
    pub password_encoding: Option<PasswordEncoding>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PortalConfig {
    /// Service URL whose session is checked and renewed.
    pub service_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingConfig {
    pub service_id: Option<String>,
    pub base_url: Option<String>,
    pub entry_path: Option<String>,
    pub token_path: Option<String>,
    /// Shorthand for a single `POST` validity endpoint.
    pub validate_path: Option<String>,
    /// Validity endpoints in the order they are tried. Takes precedence
    /// over `validate_path`.
    pub validate: Option<Vec<ValidateConfig>>,
    pub refresh_path: Option<String>,
    pub org_id: Option<u32>,
    pub token_pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateConfig {
    /// `GET` or `POST` (default).
    pub method: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryConfig {
    pub attempt_budget: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub jitter_factor: Option<f64>,
    pub transport_retries: Option<u32>,
    pub relogin_cooldown_seconds: Option<u64>,
    /// `"abort"` (default) or `"reuse-unconfirmed"`.
    pub on_relogin_failure: Option<ReloginFailurePolicy>,
    pub verify_after_login: Option<bool>,
    pub use_refresh_token: Option<bool>,
    pub revalidate_after_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransportConfig {
    pub timeout_seconds: Option<u64>,
    pub connect_timeout_seconds: Option<u64>,
    pub max_redirects: Option<u32>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Replacement marker lists. An absent list keeps the built-in one.
#[derive(Debug, Default, Deserialize)]
pub struct MarkersConfig {
    pub captcha_rejected: Option<Vec<String>>,
    pub bad_credentials: Option<Vec<String>>,
    pub account_locked: Option<Vec<String>>,
    pub throttled: Option<Vec<String>>,
    pub login_page: Option<Vec<String>>,
    pub unauthenticated: Option<Vec<String>>,
}

#[derive(Default, Deserialize)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

// Manual Debug impl to prevent leaking the password in logs.
impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field(
                "password",
                &if self.password.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub session: SessionSettings,
    pub transport: TransportSettings,
    /// `None` when the file carries no usable credentials.
    pub credentials: Option<Credentials>,
}

/// Expand `${VAR}` references. Unset variables expand to the empty string.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".casgate").join("config.toml"))
}

impl CasgateConfig {
    /// Load from [`config_path`]. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let session = SessionSettings {
            endpoints: self.resolve_endpoints()?,
            retry: resolve_retry(self.retry.as_ref()),
            markers: resolve_markers(self.markers.as_ref()),
            service_id: ServiceId::new(
                self.billing
                    .as_ref()
                    .and_then(|b| non_empty(b.service_id.as_deref()))
                    .unwrap_or(DEFAULT_SERVICE_ID),
            ),
            password_encoding: self
                .identity_provider
                .as_ref()
                .and_then(|c| c.password_encoding)
                .unwrap_or_default(),
        };

        Ok(ResolvedConfig {
            session,
            transport: resolve_transport(self.transport.as_ref()),
            credentials: self.credentials.as_ref().and_then(resolve_credentials),
        })
    }

    fn resolve_endpoints(&self) -> Result<Endpoints, ConfigError> {
        let idp = self.identity_provider.as_ref();
        let billing = self.billing.as_ref();

        let idp_base = required(
            "identity_provider.base_url",
            idp.and_then(|c| c.base_url.as_deref()),
        )?;
        let portal_service = required(
            "portal.service_url",
            self.portal.as_ref().and_then(|c| c.service_url.as_deref()),
        )?;
        let billing_base = required("billing.base_url", billing.and_then(|c| c.base_url.as_deref()))?;

        let login_path = path_or(idp.and_then(|c| c.login_path.as_deref()), DEFAULT_LOGIN_PATH);
        let captcha_path = path_or(
            idp.and_then(|c| c.captcha_path.as_deref()),
            DEFAULT_CAPTCHA_PATH,
        );
        let entry_path = path_or(
            billing.and_then(|c| c.entry_path.as_deref()),
            DEFAULT_BILLING_ENTRY_PATH,
        );
        let token_path = path_or(
            billing.and_then(|c| c.token_path.as_deref()),
            DEFAULT_BILLING_TOKEN_PATH,
        );
        let refresh_path = path_or(
            billing.and_then(|c| c.refresh_path.as_deref()),
            DEFAULT_BILLING_REFRESH_PATH,
        );

        let token_pattern = billing
            .and_then(|c| non_empty(c.token_pattern.as_deref()))
            .unwrap_or(DEFAULT_TOKEN_PATTERN)
            .to_string();
        if let Err(err) = regex::Regex::new(&token_pattern) {
            return Err(ConfigError::invalid("billing.token_pattern", err.to_string()));
        }

        Ok(Endpoints {
            login_url: join_url("identity_provider.login_path", &idp_base, login_path)?,
            captcha_url: join_url("identity_provider.captcha_path", &idp_base, captcha_path)?,
            portal_service: Url::parse(&portal_service)
                .map_err(|err| ConfigError::invalid("portal.service_url", err.to_string()))?,
            billing_entry: join_url("billing.entry_path", &billing_base, entry_path)?,
            billing_token: join_url("billing.token_path", &billing_base, token_path)?,
            billing_validate: resolve_validity(billing, &billing_base)?,
            billing_refresh: join_url("billing.refresh_path", &billing_base, refresh_path)?,
            org_id: billing.and_then(|c| c.org_id).unwrap_or(DEFAULT_ORG_ID),
            token_pattern,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn path_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    non_empty(value).unwrap_or(default)
}

fn required(field: &str, value: Option<&str>) -> Result<String, ConfigError> {
    let expanded = value.map(expand_env_vars);
    match non_empty(expanded.as_deref()) {
        Some(v) => Ok(v.to_string()),
        None => Err(ConfigError::invalid(field, "value is required")),
    }
}

fn join_url(field: &str, base: &str, path: &str) -> Result<Url, ConfigError> {
    join_base(base, path).map_err(|err| ConfigError::invalid(field, err.to_string()))
}

fn resolve_validity(
    billing: Option<&BillingConfig>,
    base: &str,
) -> Result<Vec<ValidityEndpoint>, ConfigError> {
    if let Some(list) = billing.and_then(|c| c.validate.as_ref()) {
        if list.is_empty() {
            return Err(ConfigError::invalid(
                "billing.validate",
                "at least one endpoint is required",
            ));
        }
        return list
            .iter()
            .map(|entry| {
                let path = required("billing.validate.path", entry.path.as_deref())?;
                let method = match non_empty(entry.method.as_deref()) {
                    None => Method::Post,
                    Some(m) if m.eq_ignore_ascii_case("post") => Method::Post,
                    Some(m) if m.eq_ignore_ascii_case("get") => Method::Get,
                    Some(m) => {
                        return Err(ConfigError::invalid(
                            "billing.validate.method",
                            format!("expected GET or POST, got {m:?}"),
                        ));
                    }
                };
                let url = join_url("billing.validate.path", base, &path)?;
                Ok(ValidityEndpoint::new(method, url))
            })
            .collect();
    }

    if let Some(path) = billing.and_then(|c| non_empty(c.validate_path.as_deref())) {
        let url = join_url("billing.validate_path", base, path)?;
        return Ok(vec![ValidityEndpoint::new(Method::Post, url)]);
    }

    DEFAULT_VALIDITY_ENDPOINTS
        .iter()
        .map(|(method, path)| {
            join_url("billing.validate", base, path).map(|url| ValidityEndpoint::new(*method, url))
        })
        .collect()
}

fn resolve_retry(config: Option<&RetryConfig>) -> RetryPolicy {
    let defaults = RetryPolicy::default();
    let Some(config) = config else {
        return defaults;
    };

    let initial_backoff = config
        .initial_backoff_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.initial_backoff);
    let max_backoff = config
        .max_backoff_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.max_backoff)
        .max(initial_backoff);
    let jitter_factor = config
        .jitter_factor
        .filter(|j| j.is_finite())
        .map(|j| j.clamp(0.0, 1.0))
        .unwrap_or(defaults.jitter_factor);

    RetryPolicy {
        attempt_budget: config
            .attempt_budget
            .unwrap_or(defaults.attempt_budget)
            .max(1),
        initial_backoff,
        max_backoff,
        jitter_factor,
        transport_retries: config
            .transport_retries
            .unwrap_or(defaults.transport_retries),
        relogin_cooldown: config
            .relogin_cooldown_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.relogin_cooldown),
        on_relogin_failure: config
            .on_relogin_failure
            .unwrap_or(defaults.on_relogin_failure),
        verify_after_login: config
            .verify_after_login
            .unwrap_or(defaults.verify_after_login),
        use_refresh_token: config
            .use_refresh_token
            .unwrap_or(defaults.use_refresh_token),
        revalidate_after: config
            .revalidate_after_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.revalidate_after),
    }
}

fn resolve_transport(config: Option<&TransportConfig>) -> TransportSettings {
    let defaults = TransportSettings::default();
    let Some(config) = config else {
        return defaults;
    };

    TransportSettings {
        timeout: config
            .timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        connect_timeout: config
            .connect_timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout),
        max_redirects: config.max_redirects.unwrap_or(defaults.max_redirects),
        user_agent: non_empty(config.user_agent.as_deref())
            .map(str::to_string)
            .unwrap_or(defaults.user_agent),
        accept_invalid_certs: config.accept_invalid_certs,
    }
}

fn resolve_markers(config: Option<&MarkersConfig>) -> Markers {
    let mut markers = Markers::default();
    let Some(config) = config else {
        return markers;
    };

    let lists = [
        (&config.captcha_rejected, &mut markers.captcha_rejected),
        (&config.bad_credentials, &mut markers.bad_credentials),
        (&config.account_locked, &mut markers.account_locked),
        (&config.throttled, &mut markers.throttled),
        (&config.login_page, &mut markers.login_page),
        (&config.unauthenticated, &mut markers.unauthenticated),
    ];
    for (configured, target) in lists {
        if let Some(values) = configured {
            *target = values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
        }
    }

    markers
}

fn resolve_credentials(config: &CredentialsConfig) -> Option<Credentials> {
    let username = expand_env_vars(config.username.as_deref().unwrap_or_default());
    let password = expand_env_vars(config.password.as_deref().unwrap_or_default());
    let credentials = Credentials::new(username.trim(), password);
    credentials.is_complete().then_some(credentials)
}
