//! Authenticated session against the remote library account.
//!
//! Holds the polite client plus cookie state. Cookies observed on responses
//! are persisted to an auth file so later runs can skip the sign-in POST; an
//! explicit `refresh` re-authenticates mid-scrape when the session expires.

use crate::scraper::library::{check_response, is_signin_page, parse_selector};
use crate::scraper::{PoliteClient, ScraperError, SessionCookie};
use reqwest::Url;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LIBRARY_URL: &str = "https://www.audible.com/library/titles";

const EMAIL_ENV: &str = "AUDISHELF_EMAIL";
const PASSWORD_ENV: &str = "AUDISHELF_PASSWORD";

/// Account credentials for the sign-in form.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Read credentials from the environment. `fallback_email` (from config)
    /// is used when the email variable is unset. Returns None unless both an
    /// email and a password are available.
    pub fn from_env(fallback_email: Option<&str>) -> Option<Self> {
        let email = std::env::var(EMAIL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| fallback_email.map(String::from));
        let password = std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty());
        Self::from_parts(email, password)
    }

    pub fn from_parts(email: Option<String>, password: Option<String>) -> Option<Self> {
        match (email, password) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        }
    }
}

/// Cookie state as written to the auth file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    cookies: Vec<SessionCookie>,
}

impl StoredSession {
    fn load(path: &Path) -> Result<Option<StoredSession>, ScraperError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ScraperError::AuthFileRead {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let stored: StoredSession =
            serde_json::from_str(&raw).map_err(|e| ScraperError::AuthFileRead {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(stored))
    }

    fn save(&self, path: &Path) -> Result<(), ScraperError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ScraperError::AuthFileWrite {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ScraperError::AuthFileWrite {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        std::fs::write(path, json).map_err(|e| ScraperError::AuthFileWrite {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Sign-in form as parsed from the sign-in page: POST target plus the hidden
/// fields that must be echoed back.
#[derive(Debug)]
struct SigninForm {
    action: String,
    hidden: Vec<(String, String)>,
}

/// Parse the sign-in form out of a sign-in page. The action is resolved
/// against the page URL.
fn parse_signin_form(html: &str, page_url: &str) -> Result<SigninForm, ScraperError> {
    let doc = Html::parse_document(html);
    let form_sel = parse_selector("form[name=\"signIn\"], form[action*=\"signin\"]")?;
    let hidden_sel = parse_selector("input[type=\"hidden\"]")?;

    let form = doc
        .select(&form_sel)
        .next()
        .ok_or_else(|| ScraperError::SigninFormParse {
            reason: "no sign-in form on page".to_string(),
        })?;
    let action_attr =
        form.value()
            .attr("action")
            .ok_or_else(|| ScraperError::SigninFormParse {
                reason: "sign-in form has no action".to_string(),
            })?;
    let base = Url::parse(page_url).map_err(|e| ScraperError::SigninFormParse {
        reason: format!("invalid page URL {}: {}", page_url, e),
    })?;
    let action = base
        .join(action_attr)
        .map_err(|e| ScraperError::SigninFormParse {
            reason: format!("invalid form action {}: {}", action_attr, e),
        })?
        .to_string();

    let hidden = form
        .select(&hidden_sel)
        .filter_map(|input| {
            let name = input.value().attr("name")?.to_string();
            let value = input.value().attr("value").unwrap_or("").to_string();
            Some((name, value))
        })
        .collect();

    Ok(SigninForm { action, hidden })
}

/// Authenticated client context. Every network call of the scrape goes
/// through this object; `refresh` is the explicit re-authentication step.
pub struct Session {
    client: PoliteClient,
    auth_path: PathBuf,
    credentials: Option<Credentials>,
    library_url: String,
}

impl Session {
    /// Wrap a client, seeding its cookie jar from the auth file when present.
    pub fn open(
        client: PoliteClient,
        auth_path: impl Into<PathBuf>,
        credentials: Option<Credentials>,
        library_url: impl Into<String>,
    ) -> Result<Self, ScraperError> {
        let auth_path = auth_path.into();
        let mut session = Session {
            client,
            auth_path,
            credentials,
            library_url: library_url.into(),
        };
        if let Some(stored) = StoredSession::load(&session.auth_path)? {
            for cookie in &stored.cookies {
                session.client.seed_cookie(cookie);
            }
        }
        Ok(session)
    }

    pub fn library_url(&self) -> &str {
        &self.library_url
    }

    /// Direct client access, for unauthenticated fetches (cover images).
    pub fn client_mut(&mut self) -> &mut PoliteClient {
        &mut self.client
    }

    /// Make sure the session is signed in: probe the library page and run the
    /// sign-in flow if it bounces. Persists cookies on success.
    pub fn establish(&mut self) -> Result<(), ScraperError> {
        let url = self.library_url.clone();
        let (final_url, html) = self.fetch_raw(&url, Some("library page"))?;
        if is_signin_page(&final_url, &html) {
            self.sign_in()?;
        }
        self.persist()
    }

    /// Re-authenticate an expired session. Fails when no credentials are
    /// available to sign in with.
    pub fn refresh(&mut self) -> Result<(), ScraperError> {
        if self.credentials.is_none() {
            return Err(ScraperError::AuthenticationExpired);
        }
        self.sign_in()?;
        self.persist()
    }

    /// Fetch an authenticated page. A sign-in bounce triggers one refresh and
    /// retry; a second bounce is reported as expiry rather than returned as
    /// empty data.
    pub fn fetch_page(&mut self, url: &str, context: Option<&str>) -> Result<String, ScraperError> {
        let (final_url, html) = self.fetch_raw(url, context)?;
        if !is_signin_page(&final_url, &html) {
            return Ok(html);
        }
        eprintln!("Session expired at {}; signing in again.", url);
        self.refresh()?;
        let (final_url, html) = self.fetch_raw(url, context)?;
        if is_signin_page(&final_url, &html) {
            return Err(ScraperError::AuthenticationExpired);
        }
        Ok(html)
    }

    /// Write the cookies observed so far back to the auth file.
    pub fn persist(&self) -> Result<(), ScraperError> {
        let stored = StoredSession {
            cookies: self.client.session_cookies(),
        };
        stored.save(&self.auth_path)
    }

    fn fetch_raw(
        &mut self,
        url: &str,
        context: Option<&str>,
    ) -> Result<(String, String), ScraperError> {
        let response = self
            .client
            .get_with_retry(url)
            .map_err(|e| ScraperError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let final_url = response.url().to_string();
        let html = check_response(response, url, context)?;
        Ok((final_url, html))
    }

    /// Run the sign-in flow: fetch the sign-in form, POST credentials plus
    /// hidden fields, verify the library page is reachable afterwards.
    fn sign_in(&mut self) -> Result<(), ScraperError> {
        let credentials = self
            .credentials
            .clone()
            .ok_or(ScraperError::MissingCredentials)?;

        let library_url = self.library_url.clone();
        let (signin_url, signin_html) = self.fetch_raw(&library_url, Some("sign-in page"))?;
        if !is_signin_page(&signin_url, &signin_html) {
            // Stored cookies were enough after all.
            return Ok(());
        }

        let form = parse_signin_form(&signin_html, &signin_url)?;
        let mut fields: Vec<(&str, &str)> = form
            .hidden
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        fields.push(("email", credentials.email.as_str()));
        fields.push(("password", credentials.password.as_str()));
        fields.push(("rememberMe", "true"));

        let response = self
            .client
            .post_form(&form.action, &fields)
            .map_err(|e| ScraperError::Network {
                url: form.action.clone(),
                source: e,
            })?;
        let final_url = response.url().to_string();
        let html = check_response(response, &form.action, Some("sign-in POST"))?;

        if html.contains("auth-error-message-box") {
            return Err(ScraperError::AuthenticationFailed {
                reason: "the sign-in page rejected the credentials".to_string(),
            });
        }
        if final_url.contains("/ap/cvf/") || html.contains("cvf-widget") {
            return Err(ScraperError::AuthenticationFailed {
                reason: "sign-in requires a verification challenge (captcha/OTP); \
                         sign in with a browser and copy its cookies into the auth file"
                    .to_string(),
            });
        }

        let (probe_url, probe_html) = self.fetch_raw(&library_url, Some("library page"))?;
        if is_signin_page(&probe_url, &probe_html) {
            return Err(ScraperError::AuthenticationFailed {
                reason: "sign-in did not produce an authenticated session".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNIN_PAGE: &str = r#"<html><body>
<form name="signIn" method="post" action="/ap/signin">
  <input type="hidden" name="appActionToken" value="tok123"/>
  <input type="hidden" name="openid.return_to" value="https://www.audible.com/library/titles"/>
  <input type="email" id="ap_email" name="email"/>
  <input type="password" id="ap_password" name="password"/>
</form>
</body></html>"#;

    #[test]
    fn parses_signin_form_action_and_hidden_fields() -> Result<(), ScraperError> {
        let form = parse_signin_form(SIGNIN_PAGE, "https://www.amazon.com/ap/signin?openid=x")?;
        assert_eq!(form.action, "https://www.amazon.com/ap/signin");
        assert_eq!(form.hidden.len(), 2);
        assert_eq!(
            form.hidden[0],
            ("appActionToken".to_string(), "tok123".to_string())
        );
        Ok(())
    }

    #[test]
    fn missing_signin_form_is_reported() {
        let result = parse_signin_form("<html><body></body></html>", "https://www.amazon.com/");
        assert!(matches!(
            result,
            Err(ScraperError::SigninFormParse { .. })
        ));
    }

    #[test]
    fn credentials_require_both_parts() {
        assert!(Credentials::from_parts(Some("a@b.c".into()), None).is_none());
        assert!(Credentials::from_parts(None, Some("pw".into())).is_none());
        let creds = Credentials::from_parts(Some("a@b.c".into()), Some("pw".into()));
        assert_eq!(creds.map(|c| c.email), Some("a@b.c".to_string()));
    }

    #[test]
    fn stored_session_round_trips_through_file() -> Result<(), ScraperError> {
        let path = std::env::temp_dir().join("audishelf_test_auth.json");
        let stored = StoredSession {
            cookies: vec![SessionCookie {
                name: "session-id".to_string(),
                value: "xyz".to_string(),
                domain: "www.audible.com".to_string(),
            }],
        };
        stored.save(&path)?;
        let loaded = StoredSession::load(&path)?.expect("auth file should exist");
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.cookies, stored.cookies);
        Ok(())
    }

    #[test]
    fn missing_auth_file_loads_as_none() -> Result<(), ScraperError> {
        let path = std::env::temp_dir().join("audishelf_test_auth_missing.json");
        std::fs::remove_file(&path).ok();
        assert!(StoredSession::load(&path)?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_auth_file_is_an_error() {
        let path = std::env::temp_dir().join("audishelf_test_auth_corrupt.json");
        std::fs::write(&path, "{not json").unwrap();
        let result = StoredSession::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ScraperError::AuthFileRead { .. })));
    }
}
