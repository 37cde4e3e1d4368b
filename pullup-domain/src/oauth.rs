use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::auth::OAuthProfile;

/// Timeout for token exchange and userinfo calls.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Unknown provider {0}")]
    UnknownProvider(String),
    #[error("The state cookie did not match")]
    StateMismatch,
    #[error("Code exchange failed: {0}")]
    Exchange(String),
    #[error("Userinfo fetch failed: {0}")]
    Userinfo(String),
    #[error("The provider returned an unusable profile")]
    MalformedProfile,
}

/// A generic OAuth provider driver: every provider is the same flow
/// parameterized by its three URLs and the shape of its userinfo payload.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: &'static str,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub userinfo_url: &'static str,
    pub scope: &'static str,
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderConfig {
    fn from_env(
        name: &'static str,
        auth_url: &'static str,
        token_url: &'static str,
        userinfo_url: &'static str,
        scope: &'static str,
    ) -> Option<Self> {
        let prefix = name.to_uppercase();
        let client_id = env::var(format!("{prefix}_CLIENT_ID")).ok()?;
        let client_secret = env::var(format!("{prefix}_CLIENT_SECRET")).unwrap_or_default();

        Some(Self {
            name,
            auth_url,
            token_url,
            userinfo_url,
            scope,
            client_id,
            client_secret,
        })
    }
}

pub struct OAuth {
    http: reqwest::Client,
    providers: HashMap<&'static str, ProviderConfig>,
}

impl OAuth {
    /// Builds the driver from provider credentials in the environment.
    /// Providers without configured credentials are simply absent.
    pub fn from_env() -> Self {
        let configured = [
            ProviderConfig::from_env(
                "google",
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                "https://www.googleapis.com/oauth2/v2/userinfo",
                "openid email profile",
            ),
            ProviderConfig::from_env(
                "kakao",
                "https://kauth.kakao.com/oauth/authorize",
                "https://kauth.kakao.com/oauth/token",
                "https://kapi.kakao.com/v2/user/me",
                "account_email profile_nickname",
            ),
            ProviderConfig::from_env(
                "naver",
                "https://nid.naver.com/oauth2.0/authorize",
                "https://nid.naver.com/oauth2.0/token",
                "https://openapi.naver.com/v1/nid/me",
                "",
            ),
            ProviderConfig::from_env(
                "github",
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
                "https://api.github.com/user",
                "read:user user:email",
            ),
        ];

        let providers = configured
            .into_iter()
            .flatten()
            .map(|p| (p.name, p))
            .collect();

        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .expect("http client builds");

        Self { http, providers }
    }

    fn provider(&self, name: &str) -> Result<&ProviderConfig, OAuthError> {
        self.providers
            .get(name)
            .ok_or_else(|| OAuthError::UnknownProvider(name.to_string()))
    }

    /// The URL to redirect the browser to for the web flow.
    pub fn authorize_url(
        &self,
        name: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, OAuthError> {
        let provider = self.provider(name)?;

        Ok(format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            provider.auth_url, provider.client_id, redirect_uri, provider.scope, state
        ))
    }

    /// Exchanges an authorization code for an access token.
    pub async fn exchange_code(
        &self,
        name: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, OAuthError> {
        let provider = self.provider(name)?;

        let response = self
            .http
            .post(provider.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OAuthError::Exchange("no access_token in response".to_string()))
    }

    /// Fetches the userinfo document and extracts a normalized profile. The
    /// mobile flow enters here directly with a client-supplied access token.
    pub async fn fetch_profile(
        &self,
        name: &str,
        access_token: &str,
    ) -> Result<OAuthProfile, OAuthError> {
        let provider = self.provider(name)?;

        let response = self
            .http
            .get(provider.userinfo_url)
            .bearer_auth(access_token)
            .header("User-Agent", "pullup-server")
            .send()
            .await
            .map_err(|e| OAuthError::Userinfo(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| OAuthError::Userinfo(e.to_string()))?;

        extract_profile(provider.name, &body).ok_or(OAuthError::MalformedProfile)
    }
}

/// Pulls the `(provider id, email, username)` triple out of each provider's
/// userinfo shape.
fn extract_profile(provider: &str, body: &Value) -> Option<OAuthProfile> {
    let (id, email, username) = match provider {
        "google" => (
            string_or_number(body.get("id").or_else(|| body.get("sub"))?),
            body.get("email"),
            body.get("name"),
        ),
        "kakao" => (
            string_or_number(body.get("id")?),
            body.pointer("/kakao_account/email"),
            body.pointer("/kakao_account/profile/nickname"),
        ),
        "naver" => (
            string_or_number(body.pointer("/response/id")?),
            body.pointer("/response/email"),
            body.pointer("/response/nickname"),
        ),
        "github" => (
            string_or_number(body.get("id")?),
            body.get("email"),
            body.get("login"),
        ),
        _ => return None,
    };

    Some(OAuthProfile {
        provider: provider.to_string(),
        provider_id: id?,
        email: email.and_then(Value::as_str).map(str::to_string),
        username: username.and_then(Value::as_str).map(str::to_string),
    })
}

fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kakao_profile_extraction() {
        let body = json!({
            "id": 12345,
            "kakao_account": {
                "email": "user@kakao.com",
                "profile": { "nickname": "철봉러" }
            }
        });

        let profile = extract_profile("kakao", &body).expect("profile extracts");

        assert_eq!(profile.provider_id, "12345");
        assert_eq!(profile.email.as_deref(), Some("user@kakao.com"));
        assert_eq!(profile.username.as_deref(), Some("철봉러"));
    }

    #[test]
    fn test_naver_profile_extraction() {
        let body = json!({
            "response": { "id": "abc-def", "email": "user@naver.com", "nickname": "pull" }
        });

        let profile = extract_profile("naver", &body).expect("profile extracts");

        assert_eq!(profile.provider, "naver");
        assert_eq!(profile.provider_id, "abc-def");
    }

    #[test]
    fn test_profile_without_id_is_rejected() {
        let body = json!({ "email": "user@example.com" });

        assert!(extract_profile("github", &body).is_none());
    }
}
