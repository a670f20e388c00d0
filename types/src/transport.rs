//! Transport seam.
//!
//! The session core never talks to an HTTP client directly. It hands a
//! [`HttpRequest`] to a [`Transport`] and inspects the [`HttpExchange`] that
//! comes back: final landing URL, status, headers, body and every redirect hop
//! traversed on the way. Cookie persistence is the transport's business.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

use url::Url;

use crate::SsoError;

/// Transport future type alias.
pub type TransportFut<'a> = Pin<Box<dyn Future<Output = Result<HttpExchange, SsoError>> + Send + 'a>>;

/// HTTP transport shared by every component of one logical session.
///
/// Implementations must follow redirects, persist cookies across calls and
/// bound every request with a timeout. A timeout or connection failure is
/// reported as an [`ErrorCode::Transport`](crate::ErrorCode::Transport) error.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> TransportFut<'_>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            body: RequestBody::Form(fields),
        }
    }

    #[must_use]
    pub fn post_json(url: Url, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    #[must_use]
    pub fn post_empty(url: Url) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Form field lookup (test and logging helper).
    #[must_use]
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// One redirect response observed while following a chain.
#[derive(Debug, Clone)]
pub struct RedirectHop {
    /// URL that answered with the redirect.
    pub url: Url,
    pub status: u16,
    /// Resolved `Location` target.
    pub location: Url,
    /// Response headers, names lowercased.
    pub headers: Vec<(String, String)>,
}

/// Result of one logical request after redirects were followed.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub final_url: Url,
    pub status: u16,
    /// Final response headers, names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Redirects traversed before `final_url`, in order.
    pub redirects: Vec<RedirectHop>,
}

impl HttpExchange {
    /// Exchange without redirects.
    #[must_use]
    pub fn new(final_url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            final_url,
            status,
            headers: Vec::new(),
            body: body.into(),
            redirects: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    #[must_use]
    pub fn with_redirect(mut self, hop: RedirectHop) -> Self {
        self.redirects.push(hop);
        self
    }

    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Every URL touched by the exchange: hop URLs, their `Location` targets,
    /// and the final URL.
    pub fn visited_urls(&self) -> impl Iterator<Item = &Url> {
        self.redirects
            .iter()
            .flat_map(|hop| [&hop.url, &hop.location])
            .chain(std::iter::once(&self.final_url))
    }

    /// Header values with this name across every hop, then the final response.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.redirects
            .iter()
            .filter_map(move |hop| find_header(&hop.headers, name))
            .chain(self.header(name))
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Value of a query parameter, if present and non-empty.
#[must_use]
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}
