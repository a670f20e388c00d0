//! reqwest-backed [`Transport`] for casgate.
//!
//! One [`ReqwestTransport`] is one logical browser session: every request
//! goes through the same cookie jar, so identity-provider and service
//! cookies set along a redirect chain are replayed on later calls.
//!
//! Redirects are followed manually (`Policy::none()`) so each hop can be
//! recorded. Tickets and transaction ids often only appear in an
//! intermediate `Location` header.

mod cookies;

use std::sync::Arc;

use casgate_types::{
    HttpExchange, HttpRequest, Method, RedirectHop, RequestBody, SsoError, Transport,
    TransportFut, TransportSettings,
};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use url::Url;

pub use cookies::{CookieEntry, CookieSnapshot};

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
    max_redirects: u32,
}

impl ReqwestTransport {
    /// Build a transport with an empty cookie jar.
    pub fn new(settings: &TransportSettings) -> Result<Self, SsoError> {
        let jar = Arc::new(Jar::default());

        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .cookie_provider(Arc::clone(&jar))
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout);

        if settings.accept_invalid_certs {
            tracing::warn!("TLS certificate validation disabled for SSO transport");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| {
            SsoError::transport(format!("failed to build HTTP client: {e}"))
                .with_detail("error", e.to_string())
                .into_terminal()
        })?;

        Ok(Self {
            client,
            jar,
            max_redirects: settings.max_redirects,
        })
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpExchange, SsoError> {
        let origin = request.url.clone();
        let mut current_url = request.url;
        let mut method = request.method;
        let mut body = request.body;
        let mut headers = request.headers;
        let mut redirects: Vec<RedirectHop> = Vec::new();

        loop {
            let builder = self.build_request(method, &current_url, &headers, &body);
            let response = builder
                .send()
                .await
                .map_err(|e| send_error(&e, &current_url))?;

            let status = response.status().as_u16();
            let response_headers = lowercase_headers(response.headers());

            if matches!(status, 301 | 302 | 303 | 307 | 308)
                && let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
            {
                if redirects.len() as u32 >= self.max_redirects {
                    return Err(SsoError::transport("redirect limit exceeded")
                        .with_detail("count", (redirects.len() + 1).to_string())
                        .with_detail("max", self.max_redirects.to_string())
                        .with_detail("url", display_url(&origin))
                        .into_terminal());
                }

                let next_url = current_url.join(location).map_err(|_| {
                    SsoError::transport("redirect Location could not be resolved")
                        .with_detail("url", display_url(&current_url))
                        .into_terminal()
                })?;

                tracing::debug!(
                    status,
                    from = %display_url(&current_url),
                    to = %display_url(&next_url),
                    "Following redirect"
                );

                // 307/308 replay the request; every other redirect becomes a GET.
                if !matches!(status, 307 | 308) {
                    method = Method::Get;
                    body = RequestBody::Empty;
                }
                if next_url.host_str() != current_url.host_str() {
                    headers.clear();
                }

                redirects.push(RedirectHop {
                    url: current_url,
                    status,
                    location: next_url.clone(),
                    headers: response_headers,
                });
                current_url = next_url;
                continue;
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| send_error(&e, &current_url))?;

            tracing::debug!(
                status,
                url = %display_url(&current_url),
                hops = redirects.len(),
                body_len = body.len(),
                "Request complete"
            );

            return Ok(HttpExchange {
                final_url: current_url,
                status,
                headers: response_headers,
                body: body.to_vec(),
                redirects,
            });
        }
    }

    fn build_request(
        &self,
        method: Method,
        url: &Url,
        headers: &[(String, String)],
        body: &RequestBody,
    ) -> reqwest::RequestBuilder {
        let mut builder = match method {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(value) => builder.json(value),
        }
    }

    /// Export the cookies the jar would send to each of `urls`.
    #[must_use]
    pub fn snapshot(&self, urls: &[Url]) -> CookieSnapshot {
        cookies::snapshot(&self.jar, urls)
    }

    /// Load cookies from an earlier [`snapshot`](Self::snapshot).
    pub fn restore(&self, snapshot: &CookieSnapshot) {
        cookies::restore(&self.jar, snapshot);
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> TransportFut<'_> {
        Box::pin(self.execute(request))
    }
}

fn lowercase_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// URL without query or fragment. Queries carry tickets.
fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    shown.to_string()
}

fn send_error(err: &reqwest::Error, url: &Url) -> SsoError {
    let phase = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_body() || err.is_decode() {
        "response"
    } else {
        "request"
    };
    SsoError::transport(format!("request failed ({phase}): {}", display_url(url)))
        .with_detail("phase", phase)
        .with_detail("url", display_url(url))
        .with_detail("error", err.to_string())
}
