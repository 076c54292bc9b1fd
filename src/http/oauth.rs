//! OAuth 2.0 authorization-code flow with PKCE (RFC 6749 / RFC 7636),
//! token refresh, and a credential-store-backed valid-token accessor.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::client::HttpClient;
use crate::credentials::{CredentialError, CredentialStore};
#[cfg(test)]
use crate::credentials::InMemoryCredentialStore;

const REFRESH_BUFFER_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("provider {0} does not support token refresh")]
    RefreshUnsupported(String),

    #[error("no refresh token available for {0}/{1}")]
    NoRefreshToken(String, String),

    #[error("credential store error: {0}")]
    Credential(#[from] CredentialError),

    #[error("token endpoint request failed: {0}")]
    Request(String),

    #[error("failed to (de)serialize token payload: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A static descriptor for a named OAuth provider.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub authorization_url: &'static str,
    pub token_url: &'static str,
    pub default_scopes: &'static [&'static str],
    pub pkce: bool,
    pub refreshable: bool,
}

pub const GOOGLE: ProviderDescriptor = ProviderDescriptor {
    name: "google",
    authorization_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    default_scopes: &["openid", "email", "profile"],
    pkce: true,
    refreshable: true,
};

pub const GITHUB: ProviderDescriptor = ProviderDescriptor {
    name: "github",
    authorization_url: "https://github.com/login/oauth/authorize",
    token_url: "https://github.com/login/oauth/access_token",
    default_scopes: &["read:user"],
    pkce: false,
    refreshable: false,
};

pub const STRIPE: ProviderDescriptor = ProviderDescriptor {
    name: "stripe",
    authorization_url: "https://connect.stripe.com/oauth/authorize",
    token_url: "https://connect.stripe.com/oauth/token",
    default_scopes: &["read_write"],
    pkce: false,
    refreshable: true,
};

pub const SLACK: ProviderDescriptor = ProviderDescriptor {
    name: "slack",
    authorization_url: "https://slack.com/oauth/v2/authorize",
    token_url: "https://slack.com/api/oauth.v2.access",
    default_scopes: &["chat:write"],
    pkce: true,
    refreshable: true,
};

/// Look up a built-in provider descriptor by name.
pub fn provider_by_name(name: &str) -> Result<&'static ProviderDescriptor, OAuthError> {
    match name {
        "google" => Ok(&GOOGLE),
        "github" => Ok(&GITHUB),
        "stripe" => Ok(&STRIPE),
        "slack" => Ok(&SLACK),
        other => Err(OAuthError::UnknownProvider(other.to_string())),
    }
}

/// Persisted OAuth token set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub scope: String,
}

impl OAuthTokens {
    fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(exp) => exp <= Utc::now().timestamp() + REFRESH_BUFFER_SECS,
            None => false,
        }
    }
}

/// Returned from `build_authorization_url`; the caller retains `state` and
/// `code_verifier` through to the callback.
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: Option<String>,
}

fn random_base64url(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub struct OAuthManager<'a> {
    client: &'a HttpClient,
    credentials: &'a dyn CredentialStore,
}

impl<'a> OAuthManager<'a> {
    pub fn new(client: &'a HttpClient, credentials: &'a dyn CredentialStore) -> Self {
        Self { client, credentials }
    }

    pub fn build_authorization_url(
        &self,
        provider: &ProviderDescriptor,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[&str],
    ) -> AuthorizationRequest {
        let state = random_base64url(16);
        let code_verifier = provider.pkce.then(|| random_base64url(32));

        let mut url = reqwest::Url::parse(provider.authorization_url).expect("static provider URL");
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("response_type", "code");
            qp.append_pair("client_id", client_id);
            qp.append_pair("redirect_uri", redirect_uri);
            qp.append_pair("state", &state);
            qp.append_pair("scope", &scopes.join(" "));
            if let Some(verifier) = &code_verifier {
                qp.append_pair("code_challenge", &code_challenge_s256(verifier));
                qp.append_pair("code_challenge_method", "S256");
            }
        }

        AuthorizationRequest {
            url: url.to_string(),
            state,
            code_verifier,
        }
    }

    pub async fn exchange_code(
        &self,
        provider: &ProviderDescriptor,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthTokens, OAuthError> {
        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("client_id", client_id);
        form.insert("client_secret", client_secret);
        form.insert("redirect_uri", redirect_uri);
        if let Some(verifier) = code_verifier {
            form.insert("code_verifier", verifier);
        }

        let body = self
            .client
            .post_form(provider.token_url, &form)
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        stamp_expiry(body)
    }

    pub async fn refresh(
        &self,
        provider: &ProviderDescriptor,
        client_id: &str,
        client_secret: &str,
        tokens: &OAuthTokens,
    ) -> Result<OAuthTokens, OAuthError> {
        if !provider.refreshable {
            return Err(OAuthError::RefreshUnsupported(provider.name.to_string()));
        }
        let Some(refresh_token) = &tokens.refresh_token else {
            return Err(OAuthError::NoRefreshToken(provider.name.to_string(), String::new()));
        };

        let mut form: HashMap<&str, &str> = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", client_id);
        form.insert("client_secret", client_secret);

        let body = self
            .client
            .post_form(provider.token_url, &form)
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        let mut refreshed = stamp_expiry(body)?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = tokens.refresh_token.clone();
        }
        Ok(refreshed)
    }

    /// Load, refresh-if-needed, persist, and return a valid access token
    /// for `(provider, user_id)`. A credential store miss is not an error:
    /// it surfaces as `Ok(None)` so the caller can kick off an auth flow.
    pub async fn valid_access_token(
        &self,
        provider: &ProviderDescriptor,
        client_id: &str,
        client_secret: &str,
        user_id: &str,
    ) -> Result<Option<String>, OAuthError> {
        let key = format!("{}-{}", provider.name, user_id);
        let Some(raw) = self.credentials.get("oauth", &key).await? else {
            return Ok(None);
        };
        let tokens: OAuthTokens = serde_json::from_str(&raw)?;

        if tokens.needs_refresh() {
            let refreshed = self.refresh(provider, client_id, client_secret, &tokens).await?;
            let serialized = serde_json::to_string(&refreshed)?;
            self.credentials.set("oauth", &key, &serialized).await?;
            return Ok(Some(refreshed.access_token));
        }

        Ok(Some(tokens.access_token))
    }
}

fn stamp_expiry(body: serde_json::Value) -> Result<OAuthTokens, OAuthError> {
    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OAuthError::Request("missing access_token in response".to_string()))?
        .to_string();
    let refresh_token = body.get("refresh_token").and_then(|v| v.as_str()).map(str::to_string);
    let expires_in = body.get("expires_in").and_then(serde_json::Value::as_i64);
    let token_type = body
        .get("token_type")
        .and_then(|v| v.as_str())
        .unwrap_or("Bearer")
        .to_string();
    let scope = body.get("scope").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    Ok(OAuthTokens {
        access_token,
        refresh_token,
        expires_at: expires_in.map(|secs| Utc::now().timestamp() + secs),
        token_type,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_registry_covers_the_required_minimum() {
        for name in ["google", "github", "stripe", "slack"] {
            assert!(provider_by_name(name).is_ok());
        }
        assert!(provider_by_name("bogus").is_err());
    }

    #[test]
    fn code_challenge_is_base64url_of_sha256() {
        let verifier = "test-verifier";
        let challenge = code_challenge_s256(verifier);
        assert!(!challenge.contains('+'));
        assert!(!challenge.contains('/'));
        assert!(!challenge.contains('='));
    }

    #[test]
    fn tokens_need_refresh_within_buffer_window() {
        let tokens = OAuthTokens {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            expires_at: Some(Utc::now().timestamp() + 100),
            token_type: "Bearer".to_string(),
            scope: String::new(),
        };
        assert!(tokens.needs_refresh());

        let fresh = OAuthTokens {
            expires_at: Some(Utc::now().timestamp() + 10_000),
            ..tokens
        };
        assert!(!fresh.needs_refresh());
    }

    #[tokio::test]
    async fn valid_access_token_is_none_not_err_on_credential_miss() {
        let client = HttpClient::new();
        let credentials = InMemoryCredentialStore::new();
        let manager = OAuthManager::new(&client, &credentials);

        let token = manager
            .valid_access_token(&GITHUB, "client-id", "client-secret", "user-without-tokens")
            .await
            .unwrap();
        assert!(token.is_none());
    }
}
