//! Login form parsing and submission building.

use casgate_types::{CaptchaChallenge, LoginPageDescriptor, SsoError, Url};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Input names that carry the captcha answer.
pub const CAPTCHA_FIELDS: &[&str] = &["captcha", "captchaResponse", "c_response"];

const SALT_FIELDS: &[&str] = &["pwdEncryptSalt", "pwdDefaultEncryptSalt"];

/// Parse a login page into a one-time descriptor.
///
/// `page_url` is where the page was served from; relative form actions
/// resolve against it. `captcha_url` is the identity provider's image
/// endpoint; the challenge id is the millisecond timestamp `now_ms`.
pub fn parse_login_form(
    html: &str,
    page_url: &Url,
    captcha_url: &Url,
    now_ms: i64,
) -> Result<LoginPageDescriptor, SsoError> {
    let document = Html::parse_document(html);

    let form = find_login_form(&document);
    let selector = input_selector()?;
    let inputs = match form {
        Some(form) => collect_inputs(form.select(&selector)),
        None => collect_inputs(document.select(&selector)),
    };

    let execution_token = inputs
        .iter()
        .find(|input| input.name.as_deref() == Some("execution"))
        .map(|input| input.value.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            SsoError::transport("login page carries no execution token")
                .with_detail("url", page_url.path())
        })?;

    // Some themes render the salt input outside the login form.
    let salt = collect_inputs(document.select(&selector))
        .into_iter()
        .find(|input| {
            SALT_FIELDS
                .iter()
                .any(|f| input.name.as_deref() == Some(*f) || input.id.as_deref() == Some(*f))
        })
        .map(|input| input.value.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| script_salt(html));

    let captcha_required = inputs
        .iter()
        .any(|input| {
            input
                .name
                .as_deref()
                .is_some_and(|name| CAPTCHA_FIELDS.contains(&name))
        })
        || html.contains("getCaptcha");
    let captcha = if captcha_required {
        let id = now_ms.to_string();
        let mut image_url = captcha_url.clone();
        image_url.set_query(Some(&id));
        Some(CaptchaChallenge { id, image_url })
    } else {
        None
    };

    let submit_url = form
        .and_then(|form| form.value().attr("action"))
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .and_then(|action| page_url.join(action).ok())
        .unwrap_or_else(|| page_url.clone());

    let hidden_fields = inputs
        .into_iter()
        .filter_map(|input| input.name.map(|name| (name, input.value)))
        .filter(|(name, _)| !matches!(name.as_str(), "username" | "password" | "execution"))
        .collect();

    Ok(LoginPageDescriptor {
        execution_token,
        submit_url,
        captcha,
        salt,
        hidden_fields,
    })
}

struct FormInput {
    name: Option<String>,
    id: Option<String>,
    value: String,
}

fn input_selector() -> Result<Selector, SsoError> {
    Selector::parse("input")
        .map_err(|e| SsoError::invalid_input(format!("bad input selector: {e}")))
}

fn collect_inputs<'a>(elements: impl Iterator<Item = ElementRef<'a>>) -> Vec<FormInput> {
    elements
        .map(|el| {
            let attrs = el.value();
            FormInput {
                name: attrs
                    .attr("name")
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
                id: attrs.attr("id").map(str::to_string),
                value: attrs.attr("value").unwrap_or_default().to_string(),
            }
        })
        .collect()
}

/// The form that carries the execution token, if any form does.
fn find_login_form(document: &Html) -> Option<ElementRef<'_>> {
    let forms = Selector::parse("form").ok()?;
    let execution = Selector::parse("input[name=\"execution\"]").ok()?;
    document
        .select(&forms)
        .find(|form| form.select(&execution).next().is_some())
}

/// Salt assigned in an inline script, e.g. `var pwdEncryptSalt = "abc";`.
fn script_salt(html: &str) -> Option<String> {
    let pattern =
        Regex::new(r#"(?:pwdEncryptSalt|pwdDefaultEncryptSalt)["']?\s*[=:]\s*["']([^"']+)["']"#)
            .ok()?;
    pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Ordered form fields for one submission.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    fields: Vec<(String, String)>,
}

impl Submission {
    /// Start from the page's own fields so fields the server validates for
    /// presence are echoed back even when empty.
    #[must_use]
    pub fn from_descriptor(descriptor: &LoginPageDescriptor) -> Self {
        Self {
            fields: descriptor.hidden_fields.clone(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Set the first of `keys` already present, else add `default_key`.
    pub fn set_first(&mut self, keys: &[&str], default_key: &str, value: &str) {
        if let Some(idx) = keys.iter().find_map(|k| self.position(k)) {
            self.fields[idx].1 = value.to_string();
        } else {
            self.fields.push((default_key.to_string(), value.to_string()));
        }
    }

    /// Set every one of `keys` present, else add `default_key`.
    pub fn set_all(&mut self, keys: &[&str], default_key: &str, value: &str) {
        let mut set_any = false;
        for (k, v) in &mut self.fields {
            if keys.contains(&k.as_str()) {
                *v = value.to_string();
                set_any = true;
            }
        }
        if !set_any {
            self.fields.push((default_key.to_string(), value.to_string()));
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|idx| self.fields[idx].1.as_str())
    }

    #[must_use]
    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}
