//! Cookie jar export and restore.
//!
//! Lets a caller persist an authenticated session across process restarts
//! without the session core ever looking at cookie values.

use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSnapshot {
    pub entries: Vec<CookieEntry>,
}

/// Cookies (`name=value`) the jar sends to one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub url: Url,
    pub cookies: Vec<String>,
}

impl CookieSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.cookies.is_empty())
    }
}

pub(crate) fn snapshot(jar: &Jar, urls: &[Url]) -> CookieSnapshot {
    let entries = urls
        .iter()
        .filter_map(|url| {
            let header = jar.cookies(url)?;
            let header = header.to_str().ok()?;
            let cookies: Vec<String> = header
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            (!cookies.is_empty()).then(|| CookieEntry {
                url: url.clone(),
                cookies,
            })
        })
        .collect();
    CookieSnapshot { entries }
}

pub(crate) fn restore(jar: &Jar, snapshot: &CookieSnapshot) {
    for entry in &snapshot.entries {
        for cookie in &entry.cookies {
            jar.add_cookie_str(&format!("{cookie}; Path=/"), &entry.url);
        }
    }
    tracing::debug!(entries = snapshot.entries.len(), "Restored cookie snapshot");
}
