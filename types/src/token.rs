//! Service tokens.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a downstream service a token is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access token for one downstream service.
///
/// Opaque to the session core. Only ever constructed from a response of the
/// service itself, and `validated_at` records the last time the service
/// confirmed it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceToken {
    pub value: String,
    pub service: ServiceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub validated_at: DateTime<Utc>,
}

impl ServiceToken {
    /// Build from a grant the service just issued.
    #[must_use]
    pub fn from_grant(grant: TokenGrant, service: ServiceId, now: DateTime<Utc>) -> Self {
        let expires_at = grant
            .expires_in
            .and_then(chrono::Duration::try_seconds)
            .map(|d| now + d);
        Self {
            value: grant.access_token,
            service,
            refresh_token: grant.refresh_token,
            expires_at,
            validated_at: now,
        }
    }

    /// Whether the token may be used without asking the service again.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, revalidate_after: Duration) -> bool {
        if self.is_expired(now) {
            return false;
        }
        let window = chrono::Duration::from_std(revalidate_after).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.validated_at) < window
    }

    /// Past the server-provided expiry, if one was given.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    #[must_use]
    pub fn revalidated(mut self, now: DateTime<Utc>) -> Self {
        self.validated_at = now;
        self
    }
}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceToken")
            .field("value_len", &self.value.len())
            .field("service", &self.service)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("validated_at", &self.validated_at)
            .finish()
    }
}

/// Token material returned by a service's token or refresh endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
        }
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token_len", &self.access_token.len())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Classification of one pass over a service's SSO entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSignal {
    Granted(TokenGrant),
    /// A transaction id or ticket was seen and should be exchanged.
    Exchange {
        tid: Option<String>,
        ticket: Option<String>,
    },
    NeedsLogin {
        tid: Option<String>,
        ticket: Option<String>,
    },
}

/// Result of asking the service whether a cached token is still good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Accepted,
    Rejected,
    /// The service could not be asked (outage, throttling, transport).
    Uncertain,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(validated_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> ServiceToken {
        ServiceToken {
            value: "C2CDB0123456789AB.x.y".into(),
            service: ServiceId::new("billing"),
            refresh_token: None,
            expires_at,
            validated_at,
        }
    }

    #[test]
    fn fresh_within_window() {
        let now = Utc::now();
        let t = token(now - chrono::Duration::seconds(10), None);
        assert!(t.is_fresh(now, Duration::from_secs(60)));
        assert!(!t.is_fresh(now, Duration::from_secs(5)));
    }

    #[test]
    fn expired_token_is_never_fresh() {
        let now = Utc::now();
        let t = token(now, Some(now - chrono::Duration::seconds(1)));
        assert!(t.is_expired(now));
        assert!(!t.is_fresh(now, Duration::from_secs(3600)));
    }

    #[test]
    fn from_grant_computes_expiry() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "tok".into(),
            refresh_token: Some("rt".into()),
            expires_in: Some(3600),
        };
        let t = ServiceToken::from_grant(grant, ServiceId::new("billing"), now);
        assert_eq!(t.expires_at, Some(now + chrono::Duration::seconds(3600)));
        assert_eq!(t.validated_at, now);
        assert_eq!(t.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn debug_hides_token_value() {
        let t = token(Utc::now(), None);
        let rendered = format!("{t:?}");
        assert!(!rendered.contains("C2CDB"));
        assert!(rendered.contains("value_len"));
    }

    #[test]
    fn serde_roundtrip_preserves_service() {
        let t = token(Utc::now(), None);
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("refresh_token"));
        let back: ServiceToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
